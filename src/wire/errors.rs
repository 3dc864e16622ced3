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

use thiserror::Error;

use crate::wire::codes::ContainerKind;

/// Decode/encode failures for the MTP wire format.
///
/// A malformed inbound container aborts the transaction that owns it; no
/// partial response is ever built from bytes that failed to decode.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("buffer of {0} bytes is too short for a container header")]
    TooShort(usize),

    #[error("declared container length {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("unknown container type {0:#06x}")]
    UnknownKind(u16),

    #[error("parameter area of {len} bytes is not a whole number of parameters")]
    MisalignedParams { len: usize },

    #[error("{kind:?} container carries {count} parameters, limit is {limit}")]
    TooManyParams {
        kind: ContainerKind,
        count: usize,
        limit: usize,
    },

    #[error("string of {units} UTF-16 units does not fit the 8-bit length prefix")]
    StringTooLong { units: usize },

    #[error("string is not terminated")]
    UnterminatedString,

    #[error("string is not valid UTF-16")]
    InvalidUtf16,

    #[error("dataset truncated: needed {needed} more bytes")]
    DatasetTruncated { needed: usize },
}
