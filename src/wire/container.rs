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

//! The MTP container: 12-byte header plus a type-specific body.
//!
//! Header layout, all little-endian: u32 total length, u16 container type,
//! u16 code, u32 transaction id. Command, Response and Event containers carry
//! a fixed-size parameter list; Data containers carry a raw payload slice of
//! the transfer. The codec is stateless: splitting a large data phase across
//! several Data containers is the caller's job.

use crate::wire::codes::{ContainerKind, EventCode, OperationCode, ResponseCode};
use crate::wire::errors::WireError;

pub const CONTAINER_HEADER_LEN: usize = 12;

/// Parameter list limits per container kind.
pub const MAX_COMMAND_PARAMS: usize = 5;
pub const MAX_RESPONSE_PARAMS: usize = 5;
pub const MAX_EVENT_PARAMS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerBody {
    Params(Vec<u32>),
    Data(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub kind: ContainerKind,
    pub code: u16,
    pub transaction_id: u32,
    pub body: ContainerBody,
}

impl Container {
    pub fn command(code: OperationCode, transaction_id: u32, params: Vec<u32>) -> Self {
        Self {
            kind: ContainerKind::Command,
            code: code as u16,
            transaction_id,
            body: ContainerBody::Params(params),
        }
    }

    pub fn data(code: u16, transaction_id: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: ContainerKind::Data,
            code,
            transaction_id,
            body: ContainerBody::Data(payload),
        }
    }

    pub fn response(code: ResponseCode, transaction_id: u32, params: Vec<u32>) -> Self {
        Self {
            kind: ContainerKind::Response,
            code: code as u16,
            transaction_id,
            body: ContainerBody::Params(params),
        }
    }

    /// Unsolicited events carry transaction id 0.
    pub fn event(code: EventCode, transaction_id: u32, params: Vec<u32>) -> Self {
        Self {
            kind: ContainerKind::Event,
            code: code as u16,
            transaction_id,
            body: ContainerBody::Params(params),
        }
    }

    /// Parameter list, empty for Data containers.
    pub fn params(&self) -> &[u32] {
        match &self.body {
            ContainerBody::Params(p) => p,
            ContainerBody::Data(_) => &[],
        }
    }

    /// Nth parameter, 0 when absent. Trailing zero parameters and absent
    /// parameters are equivalent on the wire.
    pub fn param(&self, index: usize) -> u32 {
        self.params().get(index).copied().unwrap_or(0)
    }

    /// Raw payload, empty for non-Data containers.
    pub fn payload(&self) -> &[u8] {
        match &self.body {
            ContainerBody::Data(d) => d,
            ContainerBody::Params(_) => &[],
        }
    }

    fn param_limit(kind: ContainerKind) -> usize {
        match kind {
            ContainerKind::Command => MAX_COMMAND_PARAMS,
            ContainerKind::Response => MAX_RESPONSE_PARAMS,
            ContainerKind::Event => MAX_EVENT_PARAMS,
            ContainerKind::Data => 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = match &self.body {
            ContainerBody::Params(p) => p.len() * 4,
            ContainerBody::Data(d) => d.len(),
        };
        let total = CONTAINER_HEADER_LEN + body_len;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(self.kind as u16).to_le_bytes());
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(&self.transaction_id.to_le_bytes());
        match &self.body {
            ContainerBody::Params(params) => {
                for p in params {
                    out.extend_from_slice(&p.to_le_bytes());
                }
            }
            ContainerBody::Data(payload) => out.extend_from_slice(payload),
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < CONTAINER_HEADER_LEN {
            return Err(WireError::TooShort(buf.len()));
        }
        let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if declared as usize != buf.len() {
            return Err(WireError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }
        let raw_kind = u16::from_le_bytes([buf[4], buf[5]]);
        let kind = ContainerKind::from_u16(raw_kind).ok_or(WireError::UnknownKind(raw_kind))?;
        let code = u16::from_le_bytes([buf[6], buf[7]]);
        let transaction_id = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let rest = &buf[CONTAINER_HEADER_LEN..];

        let body = match kind {
            ContainerKind::Data => ContainerBody::Data(rest.to_vec()),
            _ => {
                if rest.len() % 4 != 0 {
                    return Err(WireError::MisalignedParams { len: rest.len() });
                }
                let count = rest.len() / 4;
                let limit = Self::param_limit(kind);
                if count > limit {
                    return Err(WireError::TooManyParams { kind, count, limit });
                }
                let params = rest
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                ContainerBody::Params(params)
            }
        };

        Ok(Self {
            kind,
            code,
            transaction_id,
            body,
        })
    }
}
