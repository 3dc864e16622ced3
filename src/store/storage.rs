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

use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;

/// MTP storage id. The id space is host-visible; 0xFFFFFFFF addresses all
/// storages in enumeration operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(pub u32);

/// Wildcard storage id used by GetObjectHandles/GetNumObjects.
pub const STORAGE_ALL: StorageId = StorageId(0xFFFF_FFFF);

/// Conventional id of the built-in storage.
pub const STORAGE_INTERNAL: StorageId = StorageId(0x0001_0001);
/// Conventional id of a removable card storage.
pub const STORAGE_EXTERNAL: StorageId = StorageId(0x0002_0001);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

bitflags! {
    /// Capability flags of a mounted storage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StorageFlags: u32 {
        const READ_ONLY = 1 << 0;
        const REMOVABLE = 1 << 1;
    }
}

/// A mounted volume exposed to the host.
#[derive(Debug, Clone)]
pub struct Storage {
    pub id: StorageId,
    pub root: PathBuf,
    pub description: String,
    /// Total capacity reported to the host; free space is derived from the
    /// sizes of registered objects.
    pub capacity: u64,
    pub flags: StorageFlags,
}

impl Storage {
    pub fn new(id: StorageId, root: impl Into<PathBuf>, description: impl Into<String>, capacity: u64) -> Self {
        Self {
            id,
            root: root.into(),
            description: description.into(),
            capacity,
            flags: StorageFlags::empty(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.flags |= StorageFlags::READ_ONLY;
        self
    }

    pub fn removable(mut self) -> Self {
        self.flags |= StorageFlags::REMOVABLE;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(StorageFlags::READ_ONLY)
    }

    pub fn is_removable(&self) -> bool {
        self.flags.contains(StorageFlags::REMOVABLE)
    }
}
