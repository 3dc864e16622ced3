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

//! MTP string coding.
//!
//! An MTP string is an 8-bit count of UTF-16 code units (terminating NUL
//! included), followed by that many little-endian code units. The empty
//! string is the single byte 0x00 with no payload.

use crate::wire::errors::WireError;

/// Largest number of UTF-16 units (including NUL) the length prefix can hold.
pub const MAX_UNITS: usize = u8::MAX as usize;

/// Appends `value` to `out` in MTP string coding.
pub fn encode(out: &mut Vec<u8>, value: &str) -> Result<(), WireError> {
    if value.is_empty() {
        out.push(0);
        return Ok(());
    }
    let units = value.encode_utf16().count() + 1;
    if units > MAX_UNITS {
        return Err(WireError::StringTooLong { units });
    }
    out.push(units as u8);
    for unit in value.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    Ok(())
}

/// Decodes one MTP string from the front of `buf`.
///
/// Returns the string and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(String, usize), WireError> {
    let Some((&count, rest)) = buf.split_first() else {
        return Err(WireError::DatasetTruncated { needed: 1 });
    };
    if count == 0 {
        return Ok((String::new(), 1));
    }
    let byte_len = count as usize * 2;
    if rest.len() < byte_len {
        return Err(WireError::DatasetTruncated {
            needed: byte_len - rest.len(),
        });
    }
    let mut units = Vec::with_capacity(count as usize);
    for pair in rest[..byte_len].chunks_exact(2) {
        units.push(u16::from_le_bytes([pair[0], pair[1]]));
    }
    if units.pop() != Some(0) {
        return Err(WireError::UnterminatedString);
    }
    let value = String::from_utf16(&units).map_err(|_| WireError::InvalidUtf16)?;
    Ok((value, 1 + byte_len))
}
