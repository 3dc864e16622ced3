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

//! Per-opcode dispatch metadata: parameter counts, data phase direction and
//! session gating.

use crate::wire::{EventCode, OperationCode};

/// Direction of an operation's data phase, seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    /// No data phase.
    None,
    /// Device sends data to the host.
    In,
    /// Host sends data to the device.
    Out,
}

#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    /// Number of meaningful parameters; trailing zero parameters beyond this
    /// are tolerated, non-zero ones are rejected.
    pub required_params: usize,
    pub data: DataDirection,
    /// Whether the operation is gated on an open session.
    pub needs_session: bool,
}

pub fn spec(op: OperationCode) -> OpSpec {
    use DataDirection::{In, None, Out};
    use OperationCode::*;
    match op {
        GetDeviceInfo => OpSpec { required_params: 0, data: In, needs_session: false },
        OpenSession => OpSpec { required_params: 1, data: None, needs_session: false },
        CloseSession => OpSpec { required_params: 0, data: None, needs_session: true },
        GetStorageIds => OpSpec { required_params: 0, data: In, needs_session: true },
        GetStorageInfo => OpSpec { required_params: 1, data: In, needs_session: true },
        GetNumObjects => OpSpec { required_params: 3, data: None, needs_session: true },
        GetObjectHandles => OpSpec { required_params: 3, data: In, needs_session: true },
        GetObjectInfo => OpSpec { required_params: 1, data: In, needs_session: true },
        GetObject => OpSpec { required_params: 1, data: In, needs_session: true },
        DeleteObject => OpSpec { required_params: 2, data: None, needs_session: true },
        SendObjectInfo => OpSpec { required_params: 2, data: Out, needs_session: true },
        SendObject => OpSpec { required_params: 0, data: Out, needs_session: true },
        MoveObject => OpSpec { required_params: 3, data: None, needs_session: true },
    }
}

/// Accepts the parameter list when everything beyond the required count is
/// zero; hosts routinely pad command containers with zero parameters.
pub fn params_acceptable(params: &[u32], required: usize) -> bool {
    params.iter().skip(required).all(|p| *p == 0)
}

/// Operation table advertised in DeviceInfo.
pub const SUPPORTED_OPERATIONS: &[OperationCode] = &[
    OperationCode::GetDeviceInfo,
    OperationCode::OpenSession,
    OperationCode::CloseSession,
    OperationCode::GetStorageIds,
    OperationCode::GetStorageInfo,
    OperationCode::GetNumObjects,
    OperationCode::GetObjectHandles,
    OperationCode::GetObjectInfo,
    OperationCode::GetObject,
    OperationCode::DeleteObject,
    OperationCode::SendObjectInfo,
    OperationCode::SendObject,
    OperationCode::MoveObject,
];

/// Event table advertised in DeviceInfo.
pub const SUPPORTED_EVENTS: &[EventCode] = &[
    EventCode::ObjectAdded,
    EventCode::ObjectRemoved,
    EventCode::StoreAdded,
    EventCode::StoreRemoved,
    EventCode::ObjectInfoChanged,
    EventCode::StorageInfoChanged,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_zero_params_are_acceptable() {
        assert!(params_acceptable(&[1, 0, 0], 1));
        assert!(params_acceptable(&[], 1));
        assert!(!params_acceptable(&[1, 2], 1));
    }

    #[test]
    fn only_device_info_and_open_session_skip_the_gate() {
        for op in SUPPORTED_OPERATIONS {
            let gated = spec(*op).needs_session;
            match op {
                OperationCode::GetDeviceInfo | OperationCode::OpenSession => assert!(!gated),
                _ => assert!(gated, "{:?} must require a session", op),
            }
        }
    }
}
