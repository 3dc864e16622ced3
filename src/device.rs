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

//! The single-instance device context.
//!
//! Initialized once at process start and torn down at shutdown; every
//! component receives a reference instead of reaching for process globals.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::MtpConfig;
use crate::events::EventEmitter;
use crate::store::ObjectStore;

/// Identity strings reported in the DeviceInfo dataset.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
    pub vendor_extension_desc: String,
}

impl DeviceIdentity {
    /// Fallback serial for platforms that expose none: model name plus a
    /// boot-time stamp, unique enough for host-side device matching.
    pub fn alternate_serial(model: &str) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        format!("{}-{:010}-{:011}", model, now.as_secs(), now.subsec_nanos())
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        let model = "MTP Responder".to_string();
        Self {
            manufacturer: "Generic".to_string(),
            serial_number: Self::alternate_serial(&model),
            device_version: env!("CARGO_PKG_VERSION").to_string(),
            vendor_extension_desc: "microsoft.com: 1.0;".to_string(),
            model,
        }
    }
}

/// Explicitly owned aggregate of everything the responder shares: tuning
/// parameters, the object store, the event channel and the device identity.
pub struct DeviceContext {
    pub config: MtpConfig,
    pub store: ObjectStore,
    pub events: EventEmitter,
    pub identity: DeviceIdentity,
}

impl DeviceContext {
    pub fn new(config: MtpConfig, identity: DeviceIdentity) -> Self {
        let events = EventEmitter::new(config.event_queue_depth);
        Self {
            config,
            store: ObjectStore::new(),
            events,
            identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_serial_embeds_model_name() {
        let serial = DeviceIdentity::alternate_serial("Widget");
        assert!(serial.starts_with("Widget-"));
        let parts: Vec<&str> = serial.rsplitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 10);
        assert_eq!(parts[0].len(), 11);
    }

    #[test]
    fn context_wires_event_depth_from_config() {
        let mut config = MtpConfig::default();
        config.event_queue_depth = 2;
        let ctx = DeviceContext::new(config, DeviceIdentity::default());
        ctx.events.emit(crate::wire::EventCode::ObjectAdded, &[1]);
        ctx.events.emit(crate::wire::EventCode::ObjectAdded, &[2]);
        ctx.events.emit(crate::wire::EventCode::ObjectAdded, &[3]);
        assert_eq!(ctx.events.try_next().unwrap().params, vec![2]);
    }
}
