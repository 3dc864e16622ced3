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

//! MTP wire format: container framing, string coding and datasets.
//!
//! Everything in this module is stateless per call; the command engine owns
//! all cross-container state.

pub mod bytes;
pub mod codes;
pub mod container;
pub mod datasets;
pub mod errors;
pub mod strings;

pub use codes::{ContainerKind, EventCode, OperationCode, ResponseCode};
pub use container::Container;
pub use errors::WireError;

/// Object format code for a plain binary file.
pub const FORMAT_UNDEFINED: u16 = 0x3000;
/// Object format code for a folder (association).
pub const FORMAT_ASSOCIATION: u16 = 0x3001;
/// Object format code for a plain text file.
pub const FORMAT_TEXT: u16 = 0x3004;
