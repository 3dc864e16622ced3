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

//! MTP datasets carried in Data containers: DeviceInfo, ObjectInfo and
//! StorageInfo. DeviceInfo and StorageInfo only flow device-to-host here;
//! ObjectInfo flows both ways (GetObjectInfo out, SendObjectInfo in).

use crate::wire::bytes::{self, ByteReader};
use crate::wire::errors::WireError;
use crate::wire::strings;

/// MTP standard version reported in DeviceInfo, in hundredths (1.00).
pub const STANDARD_VERSION: u16 = 100;

/// DeviceInfo dataset (GetDeviceInfo data phase).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub vendor_extension_desc: String,
    pub functional_mode: u16,
    pub operations_supported: Vec<u16>,
    pub events_supported: Vec<u16>,
    pub device_properties_supported: Vec<u16>,
    pub capture_formats: Vec<u16>,
    pub playback_formats: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        bytes::put_u16(&mut out, self.standard_version);
        bytes::put_u32(&mut out, self.vendor_extension_id);
        bytes::put_u16(&mut out, self.vendor_extension_version);
        strings::encode(&mut out, &self.vendor_extension_desc)?;
        bytes::put_u16(&mut out, self.functional_mode);
        bytes::put_u16_array(&mut out, &self.operations_supported);
        bytes::put_u16_array(&mut out, &self.events_supported);
        bytes::put_u16_array(&mut out, &self.device_properties_supported);
        bytes::put_u16_array(&mut out, &self.capture_formats);
        bytes::put_u16_array(&mut out, &self.playback_formats);
        strings::encode(&mut out, &self.manufacturer)?;
        strings::encode(&mut out, &self.model)?;
        strings::encode(&mut out, &self.device_version)?;
        strings::encode(&mut out, &self.serial_number)?;
        Ok(out)
    }
}

/// ObjectInfo dataset.
///
/// Thumbnail and image fields are carried but always zero for generic files;
/// hosts still expect the slots to be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: u16,
    pub protection_status: u16,
    pub object_compressed_size: u32,
    pub thumb_format: u16,
    pub thumb_compressed_size: u32,
    pub thumb_pix_width: u32,
    pub thumb_pix_height: u32,
    pub image_pix_width: u32,
    pub image_pix_height: u32,
    pub image_bit_depth: u32,
    pub parent_object: u32,
    pub association_type: u16,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: String,
    pub date_created: String,
    pub date_modified: String,
    pub keywords: String,
}

impl ObjectInfo {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        bytes::put_u32(&mut out, self.storage_id);
        bytes::put_u16(&mut out, self.object_format);
        bytes::put_u16(&mut out, self.protection_status);
        bytes::put_u32(&mut out, self.object_compressed_size);
        bytes::put_u16(&mut out, self.thumb_format);
        bytes::put_u32(&mut out, self.thumb_compressed_size);
        bytes::put_u32(&mut out, self.thumb_pix_width);
        bytes::put_u32(&mut out, self.thumb_pix_height);
        bytes::put_u32(&mut out, self.image_pix_width);
        bytes::put_u32(&mut out, self.image_pix_height);
        bytes::put_u32(&mut out, self.image_bit_depth);
        bytes::put_u32(&mut out, self.parent_object);
        bytes::put_u16(&mut out, self.association_type);
        bytes::put_u32(&mut out, self.association_desc);
        bytes::put_u32(&mut out, self.sequence_number);
        strings::encode(&mut out, &self.filename)?;
        strings::encode(&mut out, &self.date_created)?;
        strings::encode(&mut out, &self.date_modified)?;
        strings::encode(&mut out, &self.keywords)?;
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(buf);
        Ok(Self {
            storage_id: r.u32()?,
            object_format: r.u16()?,
            protection_status: r.u16()?,
            object_compressed_size: r.u32()?,
            thumb_format: r.u16()?,
            thumb_compressed_size: r.u32()?,
            thumb_pix_width: r.u32()?,
            thumb_pix_height: r.u32()?,
            image_pix_width: r.u32()?,
            image_pix_height: r.u32()?,
            image_bit_depth: r.u32()?,
            parent_object: r.u32()?,
            association_type: r.u16()?,
            association_desc: r.u32()?,
            sequence_number: r.u32()?,
            filename: r.string()?,
            date_created: r.string()?,
            date_modified: r.string()?,
            keywords: r.string()?,
        })
    }
}

/// Storage type field of StorageInfo.
pub const STORAGE_TYPE_FIXED_RAM: u16 = 0x0003;
pub const STORAGE_TYPE_REMOVABLE_RAM: u16 = 0x0004;
/// Filesystem type field: generic hierarchical.
pub const FILESYSTEM_TYPE_HIERARCHICAL: u16 = 0x0002;
/// Access capability field.
pub const ACCESS_READ_WRITE: u16 = 0x0000;
pub const ACCESS_READ_ONLY: u16 = 0x0001;

/// StorageInfo dataset (GetStorageInfo data phase).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub storage_type: u16,
    pub filesystem_type: u16,
    pub access_capability: u16,
    pub max_capacity: u64,
    pub free_space_bytes: u64,
    pub free_space_objects: u32,
    pub storage_description: String,
    pub volume_identifier: String,
}

impl StorageInfo {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        bytes::put_u16(&mut out, self.storage_type);
        bytes::put_u16(&mut out, self.filesystem_type);
        bytes::put_u16(&mut out, self.access_capability);
        bytes::put_u64(&mut out, self.max_capacity);
        bytes::put_u64(&mut out, self.free_space_bytes);
        bytes::put_u32(&mut out, self.free_space_objects);
        strings::encode(&mut out, &self.storage_description)?;
        strings::encode(&mut out, &self.volume_identifier)?;
        Ok(out)
    }
}
