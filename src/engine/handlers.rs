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

//! Per-operation handlers. Each returns the containers to transmit, or a
//! response code which the dispatcher wraps into the single Response of the
//! transaction.

use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use crate::store::{ObjectFilter, ObjectHandle, ObjectRecord, StorageId, StoreError, HANDLE_ROOT, STORAGE_ALL};
use crate::wire::bytes;
use crate::wire::container::{Container, CONTAINER_HEADER_LEN};
use crate::wire::datasets::{
    DeviceInfo, ObjectInfo, StorageInfo, ACCESS_READ_ONLY, ACCESS_READ_WRITE,
    FILESYSTEM_TYPE_HIERARCHICAL, STANDARD_VERSION, STORAGE_TYPE_FIXED_RAM,
    STORAGE_TYPE_REMOVABLE_RAM,
};
use crate::wire::{EventCode, OperationCode, ResponseCode, FORMAT_ASSOCIATION, FORMAT_TEXT, FORMAT_UNDEFINED};

use super::{CommandEngine, DataPhase, DataSink, ObjectStream, Phase};

pub(super) type HandlerResult = Result<Vec<Container>, ResponseCode>;

/// Maps store failures to MTP response codes. I/O details are logged here;
/// the host only sees the code.
pub(super) fn store_response(err: StoreError) -> ResponseCode {
    match err {
        StoreError::NotFound(_) => ResponseCode::InvalidObjectHandle,
        StoreError::InvalidStorage(_) => ResponseCode::InvalidStorageId,
        StoreError::InvalidParent(_) => ResponseCode::InvalidParentObject,
        StoreError::Conflict(_) => ResponseCode::AccessDenied,
        StoreError::Quota(_) => ResponseCode::StoreFull,
        StoreError::ReadOnly(_) => ResponseCode::StoreReadOnly,
        StoreError::Permission(path) => {
            warn!("permission denied: {}", path.display());
            ResponseCode::AccessDenied
        }
        StoreError::StorageExists(id) => {
            warn!("storage {} already installed", id);
            ResponseCode::GeneralError
        }
        StoreError::Io(e) => {
            warn!("filesystem error: {}", e);
            ResponseCode::GeneralError
        }
    }
}

/// MTP datetime string, `YYYYMMDDThhmmss` in UTC. Empty when the timestamp is
/// unknown or before the epoch.
pub(super) fn mtp_datetime(time: Option<SystemTime>) -> String {
    let Some(time) = time else {
        return String::new();
    };
    let Ok(elapsed) = time.duration_since(UNIX_EPOCH) else {
        return String::new();
    };
    let secs = elapsed.as_secs();
    let days = (secs / 86_400) as i64;
    let tod = secs % 86_400;
    // Civil-from-days conversion over 400-year eras.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}",
        year,
        month,
        day,
        tod / 3_600,
        (tod / 60) % 60,
        tod % 60
    )
}

/// Parent parameter of GetNumObjects/GetObjectHandles: 0 means anywhere on
/// the storage, 0xFFFFFFFF means directly under the root.
fn parent_filter(raw: u32) -> Option<ObjectHandle> {
    match raw {
        0 => None,
        0xFFFF_FFFF => Some(HANDLE_ROOT),
        _ => Some(ObjectHandle(raw)),
    }
}

fn object_filter(c: &Container) -> ObjectFilter {
    ObjectFilter {
        storage: StorageId(c.param(0)),
        format: c.param(1) as u16,
        parent: parent_filter(c.param(2)),
    }
}

fn object_info_from_record(record: &ObjectRecord) -> ObjectInfo {
    let modified = mtp_datetime(record.modified);
    ObjectInfo {
        storage_id: record.storage.0,
        object_format: record.format,
        object_compressed_size: record.size.min(u32::MAX as u64) as u32,
        parent_object: record.parent.0,
        association_type: if record.is_folder() { 1 } else { 0 },
        filename: record.name.clone(),
        date_created: modified.clone(),
        date_modified: modified,
        ..Default::default()
    }
}

/// Wraps a dataset into the transaction's Data container plus the Ok
/// response. Encoding failures become GeneralError.
fn dataset_reply(op: OperationCode, tid: u32, encoded: Result<Vec<u8>, crate::wire::WireError>) -> HandlerResult {
    let payload = encoded.map_err(|e| {
        warn!("dataset encoding failed: {}", e);
        ResponseCode::GeneralError
    })?;
    Ok(vec![
        Container::data(op as u16, tid, payload),
        Container::response(ResponseCode::Ok, tid, vec![]),
    ])
}

impl CommandEngine {
    pub(super) fn handle_get_device_info(&self, tid: u32) -> HandlerResult {
        let identity = &self.ctx.identity;
        let info = DeviceInfo {
            standard_version: STANDARD_VERSION,
            vendor_extension_id: 0x0000_0006,
            vendor_extension_version: STANDARD_VERSION,
            vendor_extension_desc: identity.vendor_extension_desc.clone(),
            functional_mode: 0,
            operations_supported: super::ops::SUPPORTED_OPERATIONS
                .iter()
                .map(|op| *op as u16)
                .collect(),
            events_supported: super::ops::SUPPORTED_EVENTS
                .iter()
                .map(|e| *e as u16)
                .collect(),
            device_properties_supported: vec![],
            capture_formats: vec![],
            playback_formats: vec![FORMAT_UNDEFINED, FORMAT_ASSOCIATION, FORMAT_TEXT],
            manufacturer: identity.manufacturer.clone(),
            model: identity.model.clone(),
            device_version: identity.device_version.clone(),
            serial_number: identity.serial_number.clone(),
        };
        dataset_reply(OperationCode::GetDeviceInfo, tid, info.encode())
    }

    pub(super) fn handle_open_session(&mut self, tid: u32, id: u32) -> HandlerResult {
        if id == 0 {
            return Err(ResponseCode::InvalidParameter);
        }
        match self.session.open(id) {
            Ok(()) => Ok(vec![Container::response(ResponseCode::Ok, tid, vec![])]),
            Err(existing) => Ok(vec![Container::response(
                ResponseCode::SessionAlreadyOpen,
                tid,
                vec![existing],
            )]),
        }
    }

    pub(super) fn handle_close_session(&mut self, tid: u32) -> HandlerResult {
        if let Some(staged) = self.pending_send.take() {
            self.ctx.store.abort_object(staged);
        }
        self.session.close();
        self.ctx.events.clear();
        Ok(vec![Container::response(ResponseCode::Ok, tid, vec![])])
    }

    pub(super) fn handle_get_storage_ids(&self, tid: u32) -> HandlerResult {
        let ids: Vec<u32> = self.ctx.store.storages().iter().map(|s| s.id.0).collect();
        let mut payload = Vec::with_capacity(4 + ids.len() * 4);
        bytes::put_u32_array(&mut payload, &ids);
        Ok(vec![
            Container::data(OperationCode::GetStorageIds as u16, tid, payload),
            Container::response(ResponseCode::Ok, tid, vec![]),
        ])
    }

    pub(super) fn handle_get_storage_info(&self, tid: u32, raw_id: u32) -> HandlerResult {
        let id = StorageId(raw_id);
        let storage = self.ctx.store.storage(id).map_err(store_response)?;
        let (capacity, free) = self.ctx.store.storage_space(id).map_err(store_response)?;
        let info = StorageInfo {
            storage_type: if storage.is_removable() {
                STORAGE_TYPE_REMOVABLE_RAM
            } else {
                STORAGE_TYPE_FIXED_RAM
            },
            filesystem_type: FILESYSTEM_TYPE_HIERARCHICAL,
            access_capability: if storage.is_read_only() {
                ACCESS_READ_ONLY
            } else {
                ACCESS_READ_WRITE
            },
            max_capacity: capacity,
            free_space_bytes: free,
            free_space_objects: 0xFFFF_FFFF,
            storage_description: storage.description.clone(),
            volume_identifier: String::new(),
        };
        dataset_reply(OperationCode::GetStorageInfo, tid, info.encode())
    }

    pub(super) fn handle_get_num_objects(&self, tid: u32, c: &Container) -> HandlerResult {
        let count = self
            .ctx
            .store
            .num_objects(object_filter(c))
            .map_err(store_response)?;
        Ok(vec![Container::response(
            ResponseCode::Ok,
            tid,
            vec![count as u32],
        )])
    }

    pub(super) fn handle_get_object_handles(&self, tid: u32, c: &Container) -> HandlerResult {
        let handles: Vec<u32> = self
            .ctx
            .store
            .objects(object_filter(c))
            .map_err(store_response)?
            .iter()
            .map(|o| o.handle.0)
            .collect();
        let mut payload = Vec::with_capacity(4 + handles.len() * 4);
        bytes::put_u32_array(&mut payload, &handles);
        Ok(vec![
            Container::data(OperationCode::GetObjectHandles as u16, tid, payload),
            Container::response(ResponseCode::Ok, tid, vec![]),
        ])
    }

    pub(super) fn handle_get_object_info(&self, tid: u32, raw_handle: u32) -> HandlerResult {
        let record = self
            .ctx
            .store
            .resolve(ObjectHandle(raw_handle))
            .map_err(store_response)?;
        let info = object_info_from_record(&record);
        dataset_reply(OperationCode::GetObjectInfo, tid, info.encode())
    }

    /// Validates the target and opens its payload stream. Data containers
    /// are pulled from the stream one chunk at a time; the whole object is
    /// never buffered.
    pub(super) async fn handle_get_object(
        &self,
        tid: u32,
        raw_handle: u32,
    ) -> Result<ObjectStream, ResponseCode> {
        let record = self
            .ctx
            .store
            .resolve(ObjectHandle(raw_handle))
            .map_err(store_response)?;
        if record.is_folder() {
            return Err(ResponseCode::InvalidObjectHandle);
        }
        let file = tokio::fs::File::open(&record.path).await.map_err(|e| {
            warn!("cannot open {}: {}", record.path.display(), e);
            ResponseCode::GeneralError
        })?;

        let config = &self.ctx.config;
        // Each Data container must fit one outbound transfer, header included.
        let chunk = config
            .read_file_size
            .min(config.max_io_buf_size)
            .min(config.write_usb_size.saturating_sub(CONTAINER_HEADER_LEN))
            .max(1);
        Ok(ObjectStream {
            file,
            path: record.path,
            transaction_id: tid,
            chunk,
            delay: config.read_file_delay,
            started: false,
            last_chunk_seen: false,
            finished: false,
        })
    }

    pub(super) fn handle_delete_object(&mut self, tid: u32, c: &Container) -> HandlerResult {
        // Format-scoped deletion is not implemented; a non-zero format
        // parameter is rejected rather than silently misapplied.
        if c.param(1) != 0 {
            return Err(ResponseCode::ParameterNotSupported);
        }
        let removed = self
            .ctx
            .store
            .delete(ObjectHandle(c.param(0)))
            .map_err(store_response)?;
        for handle in removed {
            self.ctx.events.emit(EventCode::ObjectRemoved, &[handle.0]);
        }
        Ok(vec![Container::response(ResponseCode::Ok, tid, vec![])])
    }

    /// Opens the data phase of SendObjectInfo. The reservation for a
    /// previously announced but never sent object is discarded here.
    pub(super) fn handle_send_object_info(&mut self, tid: u32, c: &Container) -> HandlerResult {
        if let Some(stale) = self.pending_send.take() {
            warn!("discarding unconsumed object reservation {}", stale.handle);
            self.ctx.store.abort_object(stale);
        }
        let storage = match c.param(0) {
            0 => self.default_storage()?,
            raw => StorageId(raw),
        };
        self.ctx.store.storage(storage).map_err(store_response)?;
        let parent = match c.param(1) {
            0 | 0xFFFF_FFFF => HANDLE_ROOT,
            raw => ObjectHandle(raw),
        };
        self.phase = Phase::AwaitingData(DataPhase {
            op: OperationCode::SendObjectInfo,
            transaction_id: tid,
            expected: 0,
            received: 0,
            sink: DataSink::ObjectInfo { storage, parent },
        });
        Ok(vec![])
    }

    fn default_storage(&self) -> Result<StorageId, ResponseCode> {
        self.ctx
            .store
            .storages()
            .first()
            .map(|s| s.id)
            .ok_or(ResponseCode::InvalidStorageId)
    }

    /// Completes SendObjectInfo once its dataset arrived. Folders are created
    /// immediately; files become a staged reservation consumed by SendObject.
    pub(super) fn finish_object_info(
        &mut self,
        storage: StorageId,
        parent: ObjectHandle,
        payload: &[u8],
        tid: u32,
    ) -> Vec<Container> {
        let info = match ObjectInfo::decode(payload) {
            Ok(info) => info,
            Err(e) => {
                warn!("undecodable ObjectInfo dataset: {}", e);
                return vec![Container::response(ResponseCode::InvalidParameter, tid, vec![])];
            }
        };
        if info.filename.is_empty() || info.filename.contains(['/', '\0']) {
            return vec![Container::response(ResponseCode::InvalidParameter, tid, vec![])];
        }

        if info.object_format == FORMAT_ASSOCIATION {
            return match self.ctx.store.create_folder(storage, parent, &info.filename) {
                Ok(record) => {
                    self.ctx.events.emit(EventCode::ObjectAdded, &[record.handle.0]);
                    vec![Container::response(
                        ResponseCode::Ok,
                        tid,
                        vec![storage.0, parent.0, record.handle.0],
                    )]
                }
                Err(e) => vec![Container::response(store_response(e), tid, vec![])],
            };
        }

        match self.ctx.store.stage_object(
            storage,
            parent,
            info.object_format,
            &info.filename,
            u64::from(info.object_compressed_size),
        ) {
            Ok(staged) => {
                let handle = staged.handle;
                self.pending_send = Some(staged);
                vec![Container::response(
                    ResponseCode::Ok,
                    tid,
                    vec![storage.0, parent.0, handle.0],
                )]
            }
            Err(e) => vec![Container::response(store_response(e), tid, vec![])],
        }
    }

    /// Opens the data phase of SendObject against the staged reservation.
    pub(super) async fn handle_send_object(&mut self, tid: u32) -> HandlerResult {
        let staged = self
            .pending_send
            .take()
            .ok_or(ResponseCode::NoValidObjectInfo)?;
        let file = match tokio::fs::OpenOptions::new()
            .write(true)
            .open(&staged.path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                warn!("cannot reopen staged object {}: {}", staged.path.display(), e);
                self.ctx.store.abort_object(staged);
                return Err(ResponseCode::GeneralError);
            }
        };
        let expected = staged.declared_size;
        self.phase = Phase::AwaitingData(DataPhase {
            op: OperationCode::SendObject,
            transaction_id: tid,
            expected,
            received: 0,
            sink: DataSink::Payload { staged, file },
        });
        Ok(vec![])
    }

    pub(super) fn handle_move_object(&mut self, tid: u32, c: &Container) -> HandlerResult {
        let handle = ObjectHandle(c.param(0));
        let storage = StorageId(c.param(1));
        if storage == STORAGE_ALL {
            return Err(ResponseCode::InvalidStorageId);
        }
        let parent = match c.param(2) {
            0 | 0xFFFF_FFFF => HANDLE_ROOT,
            raw => ObjectHandle(raw),
        };
        self.ctx
            .store
            .move_object(handle, storage, parent)
            .map_err(store_response)?;
        self.ctx.events.emit(EventCode::ObjectInfoChanged, &[handle.0]);
        Ok(vec![Container::response(ResponseCode::Ok, tid, vec![])])
    }
}
