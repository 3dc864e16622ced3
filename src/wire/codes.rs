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

//! MTP code tables: container types, operations, responses and events.

/// Container type field of the 12-byte header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

impl ContainerKind {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::Command),
            2 => Some(Self::Data),
            3 => Some(Self::Response),
            4 => Some(Self::Event),
            _ => None,
        }
    }
}

/// Operation codes implemented by this responder.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIds = 0x1004,
    GetStorageInfo = 0x1005,
    GetNumObjects = 0x1006,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    DeleteObject = 0x100B,
    SendObjectInfo = 0x100C,
    SendObject = 0x100D,
    MoveObject = 0x1019,
}

impl OperationCode {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x1001 => Some(Self::GetDeviceInfo),
            0x1002 => Some(Self::OpenSession),
            0x1003 => Some(Self::CloseSession),
            0x1004 => Some(Self::GetStorageIds),
            0x1005 => Some(Self::GetStorageInfo),
            0x1006 => Some(Self::GetNumObjects),
            0x1007 => Some(Self::GetObjectHandles),
            0x1008 => Some(Self::GetObjectInfo),
            0x1009 => Some(Self::GetObject),
            0x100B => Some(Self::DeleteObject),
            0x100C => Some(Self::SendObjectInfo),
            0x100D => Some(Self::SendObject),
            0x1019 => Some(Self::MoveObject),
            _ => None,
        }
    }
}

/// Response codes this responder can emit.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok = 0x2001,
    GeneralError = 0x2002,
    SessionNotOpen = 0x2003,
    InvalidTransactionId = 0x2004,
    OperationNotSupported = 0x2005,
    ParameterNotSupported = 0x2006,
    IncompleteTransfer = 0x2007,
    InvalidStorageId = 0x2008,
    InvalidObjectHandle = 0x2009,
    StoreFull = 0x200C,
    ObjectWriteProtected = 0x200D,
    StoreReadOnly = 0x200E,
    AccessDenied = 0x200F,
    NoValidObjectInfo = 0x2015,
    InvalidParentObject = 0x201A,
    InvalidParameter = 0x201D,
    SessionAlreadyOpen = 0x201E,
    TransactionCancelled = 0x201F,
}

impl ResponseCode {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x2001 => Some(Self::Ok),
            0x2002 => Some(Self::GeneralError),
            0x2003 => Some(Self::SessionNotOpen),
            0x2004 => Some(Self::InvalidTransactionId),
            0x2005 => Some(Self::OperationNotSupported),
            0x2006 => Some(Self::ParameterNotSupported),
            0x2007 => Some(Self::IncompleteTransfer),
            0x2008 => Some(Self::InvalidStorageId),
            0x2009 => Some(Self::InvalidObjectHandle),
            0x200C => Some(Self::StoreFull),
            0x200D => Some(Self::ObjectWriteProtected),
            0x200E => Some(Self::StoreReadOnly),
            0x200F => Some(Self::AccessDenied),
            0x2015 => Some(Self::NoValidObjectInfo),
            0x201A => Some(Self::InvalidParentObject),
            0x201D => Some(Self::InvalidParameter),
            0x201E => Some(Self::SessionAlreadyOpen),
            0x201F => Some(Self::TransactionCancelled),
            _ => None,
        }
    }
}

/// Event codes sent on the interrupt-style channel.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    ObjectAdded = 0x4002,
    ObjectRemoved = 0x4003,
    StoreAdded = 0x4004,
    StoreRemoved = 0x4005,
    ObjectInfoChanged = 0x4007,
    StorageInfoChanged = 0x400C,
}

impl EventCode {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x4002 => Some(Self::ObjectAdded),
            0x4003 => Some(Self::ObjectRemoved),
            0x4004 => Some(Self::StoreAdded),
            0x4005 => Some(Self::StoreRemoved),
            0x4007 => Some(Self::ObjectInfoChanged),
            0x400C => Some(Self::StorageInfoChanged),
            _ => None,
        }
    }
}
