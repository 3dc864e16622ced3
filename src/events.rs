// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Asynchronous host notifications.
//!
//! `emit` never blocks the command engine. The queue is bounded: when it is
//! full the oldest unsent event is dropped and the loss is logged, never
//! escalated to the active transaction. Events are delivered in emission
//! order, interleaved with command/response traffic by the responder loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::sync::Notify;

use crate::wire::container::Container;
use crate::wire::EventCode;

/// A pending host notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub code: EventCode,
    pub params: Vec<u32>,
}

impl Event {
    /// Wire form. Unsolicited events carry transaction id 0.
    pub fn into_container(self) -> Container {
        Container::event(self.code, 0, self.params)
    }
}

struct EventQueue {
    pending: Mutex<VecDeque<Event>>,
    notify: Notify,
    depth: usize,
}

/// Producer/consumer handle over the bounded event queue. Cloning is cheap;
/// all clones share one queue.
#[derive(Clone)]
pub struct EventEmitter {
    queue: Arc<EventQueue>,
}

impl EventEmitter {
    pub fn new(depth: usize) -> Self {
        Self {
            queue: Arc::new(EventQueue {
                pending: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                depth: depth.max(1),
            }),
        }
    }

    /// Enqueues an event for transmission. Non-blocking; drops the oldest
    /// pending event when the queue is saturated.
    pub fn emit(&self, code: EventCode, params: &[u32]) {
        let mut pending = self.queue.pending.lock().unwrap();
        if pending.len() == self.queue.depth {
            if let Some(dropped) = pending.pop_front() {
                warn!(
                    "event queue saturated, dropping oldest event {:?} {:?}",
                    dropped.code, dropped.params
                );
            }
        }
        pending.push_back(Event {
            code,
            params: params.to_vec(),
        });
        drop(pending);
        self.queue.notify.notify_one();
    }

    /// Dequeues the next event, waiting until one is available.
    pub async fn next(&self) -> Event {
        loop {
            if let Some(event) = self.try_next() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Dequeues the next event if one is pending.
    pub fn try_next(&self) -> Option<Event> {
        self.queue.pending.lock().unwrap().pop_front()
    }

    /// Discards all pending events (session teardown).
    pub fn clear(&self) {
        self.queue.pending.lock().unwrap().clear();
    }
}
