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

//! Device-side MTP responder: wire codec, object store, command engine and
//! the responder service loop, glued to a pluggable transport.

pub mod config;
pub mod device;
pub mod engine;
pub mod events;
pub mod service;
pub mod store;
pub mod transport;
pub mod wire;

pub use config::MtpConfig;
pub use device::{DeviceContext, DeviceIdentity};
pub use engine::{CommandEngine, ObjectStream, Outbound};
pub use service::{spawn_responder, ResponderHandle};
pub use transport::{ChannelTransport, LinkEvent, Transport, TransportError};
