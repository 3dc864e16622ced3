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

//! The responder service: one task owning the transport and the command
//! engine, multiplexing inbound traffic, link notifications and outbound
//! events.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::DeviceContext;
use crate::engine::{CommandEngine, Outbound};
use crate::transport::{LinkEvent, Transport, TransportError};
use crate::wire::{Container, ResponseCode};

/// Handle over a spawned responder task.
pub struct ResponderHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ResponderHandle {
    /// Requests shutdown and waits for the loop to wind down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("responder task failed: {}", e);
        }
    }

    /// Hard-kills the task. Prefer [`shutdown`](Self::shutdown).
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Spawns the responder loop over the given transport. Link notifications
/// arrive on `link_rx`; closing that channel behaves like a detach.
pub fn spawn_responder(
    ctx: Arc<DeviceContext>,
    transport: Arc<dyn Transport>,
    mut link_rx: mpsc::Receiver<LinkEvent>,
) -> ResponderHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let join = tokio::spawn(async move {
        let mut engine = CommandEngine::new(ctx.clone());
        let mut link_open = true;
        info!("responder loop started");
        'run: loop {
            tokio::select! {
                biased;

                _ = task_cancel.cancelled() => {
                    engine.reset();
                    break;
                }

                link = link_rx.recv(), if link_open => {
                    match link {
                        Some(LinkEvent::CancelTransaction) => {
                            if let Some(response) = engine.cancel() {
                                if send_all(transport.as_ref(), &[response]).await.is_err() {
                                    engine.reset();
                                    break;
                                }
                            }
                        }
                        Some(LinkEvent::Detached) => {
                            info!("link detached");
                            engine.reset();
                        }
                        Some(LinkEvent::Attached) => debug!("link attached"),
                        Some(LinkEvent::Suspended) => debug!("link suspended"),
                        Some(LinkEvent::Resumed) => debug!("link resumed"),
                        None => {
                            debug!("link notification channel closed");
                            engine.reset();
                            link_open = false;
                        }
                    }
                }

                event = ctx.events.next(), if engine.session_open() => {
                    let container = event.into_container();
                    if send_all(transport.as_ref(), &[container]).await.is_err() {
                        engine.reset();
                        break;
                    }
                }

                inbound = read_inbound(
                    transport.as_ref(),
                    engine.awaiting_data(),
                    ctx.config.data_phase_timeout,
                ) => {
                    match inbound {
                        Ok(Some(bytes)) => {
                            if bytes.len() > ctx.config.read_usb_size {
                                warn!(
                                    "inbound transfer of {} bytes exceeds read_usb_size {}; dropped",
                                    bytes.len(),
                                    ctx.config.read_usb_size
                                );
                                engine.discard_data_phase();
                                continue;
                            }
                            let outbound = match Container::decode(&bytes) {
                                Ok(container) => engine.handle_container(container).await,
                                Err(e) => {
                                    warn!("undecodable container ({} bytes): {}", bytes.len(), e);
                                    engine.discard_data_phase();
                                    Outbound::Batch(vec![])
                                }
                            };
                            match outbound {
                                Outbound::Batch(containers) => {
                                    if send_all(transport.as_ref(), &containers).await.is_err() {
                                        engine.reset();
                                        break;
                                    }
                                }
                                Outbound::Object(mut stream) => {
                                    // Each chunk is written out before the
                                    // next one is read from disk.
                                    while let Some(container) = stream.next().await {
                                        if send_all(transport.as_ref(), &[container]).await.is_err() {
                                            engine.reset();
                                            break 'run;
                                        }
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            // Data phase stalled past the deadline.
                            let response = engine.abort_data_phase(ResponseCode::IncompleteTransfer);
                            if let Some(response) = response {
                                if send_all(transport.as_ref(), &[response]).await.is_err() {
                                    engine.reset();
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("transport failed: {}", e);
                            engine.reset();
                            break;
                        }
                    }
                }
            }
        }
        info!("responder loop stopped");
    });
    ResponderHandle { cancel, join }
}

/// Reads the next inbound transfer; `Ok(None)` means the data phase deadline
/// expired. Outside a data phase the read waits indefinitely.
async fn read_inbound(
    transport: &dyn Transport,
    awaiting_data: bool,
    deadline: Duration,
) -> Result<Option<Vec<u8>>, TransportError> {
    if awaiting_data {
        match tokio::time::timeout(deadline, transport.read()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    } else {
        transport.read().await.map(Some)
    }
}

async fn send_all(transport: &dyn Transport, containers: &[Container]) -> Result<(), TransportError> {
    for container in containers {
        debug!(
            "tx {:?} {:#06x} tid {}",
            container.kind, container.code, container.transaction_id
        );
        transport.write(&container.encode()).await?;
    }
    Ok(())
}
