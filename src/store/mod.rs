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

//! The object store: maps MTP object handles to filesystem paths and mirrors
//! storage ids to mounted volumes.
//!
//! Handle allocation is monotonically increasing and a handle value is never
//! reissued for the lifetime of the store, even after deletion or an aborted
//! transfer. The handle table is guarded by one mutex with short critical
//! sections; every blocking filesystem operation runs outside the lock. An
//! object only becomes visible once it is committed, and a handle is
//! invalidated before its path is unlinked, so no reader ever resolves a
//! handle to a vanishing path.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use log::{debug, warn};
use thiserror::Error;

pub mod storage;

pub use storage::{Storage, StorageFlags, StorageId, STORAGE_ALL, STORAGE_EXTERNAL, STORAGE_INTERNAL};

use crate::wire::{FORMAT_ASSOCIATION, FORMAT_UNDEFINED};

/// Opaque 32-bit object handle. Handle 0 denotes the storage root when used
/// as a parent reference and is never allocated to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u32);

/// Parent reference meaning "directly under the storage root".
pub const HANDLE_ROOT: ObjectHandle = ObjectHandle(0);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object handle {0} not found")]
    NotFound(ObjectHandle),

    #[error("storage {0} not installed")]
    InvalidStorage(StorageId),

    #[error("storage {0} already installed")]
    StorageExists(StorageId),

    #[error("parent handle {0} is not a folder")]
    InvalidParent(ObjectHandle),

    #[error("an object named {0:?} already exists under the target parent")]
    Conflict(String),

    #[error("storage {0} has insufficient free space")]
    Quota(StorageId),

    #[error("storage {0} is read-only")]
    ReadOnly(StorageId),

    #[error("permission denied: {}", .0.display())]
    Permission(PathBuf),

    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
}

fn fs_error(path: &Path, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        StoreError::Permission(path.to_path_buf())
    } else {
        StoreError::Io(err)
    }
}

/// One file or folder exposed to the host.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub handle: ObjectHandle,
    pub storage: StorageId,
    pub parent: ObjectHandle,
    pub format: u16,
    pub size: u64,
    pub name: String,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

impl ObjectRecord {
    pub fn is_folder(&self) -> bool {
        self.format == FORMAT_ASSOCIATION
    }
}

/// Reservation for an inbound object transfer.
///
/// The handle is allocated up front so SendObjectInfo can report it, but the
/// object is only published by [`ObjectStore::commit_object`]; until then no
/// reader can resolve it. Aborting unlinks the partially written file and the
/// handle value stays burned.
#[derive(Debug)]
pub struct StagedObject {
    pub handle: ObjectHandle,
    pub storage: StorageId,
    pub parent: ObjectHandle,
    pub format: u16,
    pub name: String,
    pub path: PathBuf,
    pub declared_size: u64,
}

#[derive(Default)]
struct StoreInner {
    storages: BTreeMap<u32, Storage>,
    /// Bytes accounted against each storage's capacity.
    used: BTreeMap<u32, u64>,
    /// Keyed by raw handle; BTreeMap iteration order equals creation order
    /// because handles are allocated monotonically.
    objects: BTreeMap<u32, ObjectRecord>,
    next_handle: u32,
}

impl StoreInner {
    fn allocate_handle(&mut self) -> ObjectHandle {
        self.next_handle += 1;
        ObjectHandle(self.next_handle)
    }

    fn storage(&self, id: StorageId) -> Result<&Storage, StoreError> {
        self.storages.get(&id.0).ok_or(StoreError::InvalidStorage(id))
    }

    fn resolve(&self, handle: ObjectHandle) -> Result<&ObjectRecord, StoreError> {
        self.objects.get(&handle.0).ok_or(StoreError::NotFound(handle))
    }

    fn free_space(&self, id: StorageId) -> Result<u64, StoreError> {
        let storage = self.storage(id)?;
        let used = self.used.get(&id.0).copied().unwrap_or(0);
        Ok(storage.capacity.saturating_sub(used))
    }

    /// Resolves a parent reference to its directory path, validating that it
    /// is a folder on the given storage.
    fn parent_dir(&self, storage: StorageId, parent: ObjectHandle) -> Result<PathBuf, StoreError> {
        if parent == HANDLE_ROOT {
            return Ok(self.storage(storage)?.root.clone());
        }
        let record = self.resolve(parent)?;
        if !record.is_folder() || record.storage != storage {
            return Err(StoreError::InvalidParent(parent));
        }
        Ok(record.path.clone())
    }

    fn name_taken(&self, storage: StorageId, parent: ObjectHandle, name: &str) -> bool {
        self.objects
            .values()
            .any(|o| o.storage == storage && o.parent == parent && o.name == name)
    }

    /// Handles of `root` and everything beneath it, in creation order.
    fn subtree(&self, root: ObjectHandle) -> Vec<ObjectHandle> {
        let mut members = vec![root];
        let mut i = 0;
        while i < members.len() {
            let parent = members[i];
            members.extend(
                self.objects
                    .values()
                    .filter(|o| o.parent == parent)
                    .map(|o| o.handle),
            );
            i += 1;
        }
        members.sort();
        members
    }
}

/// Filters for object enumeration. `format` 0 means any format; `parent`
/// `None` means anywhere on the storage.
#[derive(Debug, Clone, Copy)]
pub struct ObjectFilter {
    pub storage: StorageId,
    pub format: u16,
    pub parent: Option<ObjectHandle>,
}

pub struct ObjectStore {
    inner: Mutex<StoreInner>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Installs a storage and registers every file and folder already under
    /// its root. Creates the root directory when missing.
    pub fn install_storage(&self, storage: Storage) -> Result<StorageId, StoreError> {
        fs::create_dir_all(&storage.root).map_err(|e| fs_error(&storage.root, e))?;
        let entries = scan_tree(&storage.root)?;

        let mut inner = self.inner.lock().unwrap();
        if inner.storages.contains_key(&storage.id.0) {
            return Err(StoreError::StorageExists(storage.id));
        }
        let id = storage.id;
        inner.storages.insert(id.0, storage);

        let mut handles: Vec<ObjectHandle> = Vec::with_capacity(entries.len());
        let mut used = 0u64;
        for entry in &entries {
            let handle = inner.allocate_handle();
            handles.push(handle);
            let parent = match entry.parent {
                Some(index) => handles[index],
                None => HANDLE_ROOT,
            };
            used += entry.size;
            inner.objects.insert(
                handle.0,
                ObjectRecord {
                    handle,
                    storage: id,
                    parent,
                    format: if entry.is_dir { FORMAT_ASSOCIATION } else { FORMAT_UNDEFINED },
                    size: entry.size,
                    name: entry.name.clone(),
                    path: entry.path.clone(),
                    modified: entry.modified,
                },
            );
        }
        inner.used.insert(id.0, used);
        debug!("installed storage {} with {} objects", id, entries.len());
        Ok(id)
    }

    /// Removes a storage and invalidates every handle under it. The on-disk
    /// tree is left untouched. Returns the invalidated handles in creation
    /// order.
    pub fn uninstall_storage(&self, id: StorageId) -> Result<Vec<ObjectHandle>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.storage(id)?;
        inner.storages.remove(&id.0);
        inner.used.remove(&id.0);
        let removed: Vec<ObjectHandle> = inner
            .objects
            .values()
            .filter(|o| o.storage == id)
            .map(|o| o.handle)
            .collect();
        for handle in &removed {
            inner.objects.remove(&handle.0);
        }
        debug!("uninstalled storage {}, invalidated {} handles", id, removed.len());
        Ok(removed)
    }

    pub fn storages(&self) -> Vec<Storage> {
        self.inner.lock().unwrap().storages.values().cloned().collect()
    }

    pub fn storage(&self, id: StorageId) -> Result<Storage, StoreError> {
        Ok(self.inner.lock().unwrap().storage(id)?.clone())
    }

    /// Capacity and free space of a storage, in bytes.
    pub fn storage_space(&self, id: StorageId) -> Result<(u64, u64), StoreError> {
        let inner = self.inner.lock().unwrap();
        let capacity = inner.storage(id)?.capacity;
        let free = inner.free_space(id)?;
        Ok((capacity, free))
    }

    pub fn resolve(&self, handle: ObjectHandle) -> Result<ObjectRecord, StoreError> {
        Ok(self.inner.lock().unwrap().resolve(handle)?.clone())
    }

    /// Objects matching the filter, in creation order. The ordering is stable
    /// across calls so the host sees a deterministic enumeration.
    pub fn objects(&self, filter: ObjectFilter) -> Result<Vec<ObjectRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if filter.storage != STORAGE_ALL {
            inner.storage(filter.storage)?;
        }
        if let Some(parent) = filter.parent {
            if parent != HANDLE_ROOT && !inner.resolve(parent)?.is_folder() {
                return Err(StoreError::InvalidParent(parent));
            }
        }
        Ok(inner
            .objects
            .values()
            .filter(|o| filter.storage == STORAGE_ALL || o.storage == filter.storage)
            .filter(|o| filter.format == 0 || o.format == filter.format)
            .filter(|o| filter.parent.map_or(true, |p| o.parent == p))
            .cloned()
            .collect())
    }

    pub fn num_objects(&self, filter: ObjectFilter) -> Result<usize, StoreError> {
        Ok(self.objects(filter)?.len())
    }

    /// Creates a folder object. The handle is reserved first, the mkdir runs
    /// outside the lock and the record is published afterwards; a failed
    /// mkdir burns the handle, as with an aborted stage.
    pub fn create_folder(
        &self,
        storage: StorageId,
        parent: ObjectHandle,
        name: &str,
    ) -> Result<ObjectRecord, StoreError> {
        let (handle, path) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.storage(storage)?.is_read_only() {
                return Err(StoreError::ReadOnly(storage));
            }
            let dir = inner.parent_dir(storage, parent)?;
            if inner.name_taken(storage, parent, name) {
                return Err(StoreError::Conflict(name.to_string()));
            }
            (inner.allocate_handle(), dir.join(name))
        };
        fs::create_dir(&path).map_err(|e| fs_error(&path, e))?;
        let record = ObjectRecord {
            handle,
            storage,
            parent,
            format: FORMAT_ASSOCIATION,
            size: 0,
            name: name.to_string(),
            path,
            modified: Some(SystemTime::now()),
        };
        let mut inner = self.inner.lock().unwrap();
        if inner.storages.get(&storage.0).is_none() {
            // Storage vanished while the directory was being created.
            drop(inner);
            let _ = fs::remove_dir(&record.path);
            return Err(StoreError::InvalidStorage(storage));
        }
        inner.objects.insert(handle.0, record.clone());
        Ok(record)
    }

    /// Reserves a handle and creates an empty file for an inbound transfer.
    /// The object stays invisible until [`commit_object`](Self::commit_object).
    pub fn stage_object(
        &self,
        storage: StorageId,
        parent: ObjectHandle,
        format: u16,
        name: &str,
        declared_size: u64,
    ) -> Result<StagedObject, StoreError> {
        let (handle, path) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.storage(storage)?.is_read_only() {
                return Err(StoreError::ReadOnly(storage));
            }
            let dir = inner.parent_dir(storage, parent)?;
            if inner.name_taken(storage, parent, name) {
                return Err(StoreError::Conflict(name.to_string()));
            }
            if declared_size > inner.free_space(storage)? {
                return Err(StoreError::Quota(storage));
            }
            (inner.allocate_handle(), dir.join(name))
        };
        // File creation happens outside the lock; the burned handle is fine
        // even if creation fails.
        fs::File::create(&path).map_err(|e| fs_error(&path, e))?;
        Ok(StagedObject {
            handle,
            storage,
            parent,
            format,
            name: name.to_string(),
            path,
            declared_size,
        })
    }

    /// Publishes a completed transfer under its reserved handle.
    pub fn commit_object(&self, staged: StagedObject, actual_size: u64) -> Result<ObjectRecord, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.storages.get(&staged.storage.0).is_none() {
            // Storage vanished mid-transfer; nothing to publish into.
            let id = staged.storage;
            drop(inner);
            self.abort_object(staged);
            return Err(StoreError::InvalidStorage(id));
        }
        let record = ObjectRecord {
            handle: staged.handle,
            storage: staged.storage,
            parent: staged.parent,
            format: staged.format,
            size: actual_size,
            name: staged.name,
            path: staged.path,
            modified: Some(SystemTime::now()),
        };
        *inner.used.entry(staged.storage.0).or_insert(0) += actual_size;
        inner.objects.insert(record.handle.0, record.clone());
        Ok(record)
    }

    /// Discards a staged transfer, unlinking whatever was written.
    pub fn abort_object(&self, staged: StagedObject) {
        if let Err(e) = fs::remove_file(&staged.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove staged object {}: {}", staged.path.display(), e);
            }
        }
    }

    /// Deletes an object, recursively for folders. Returns every removed
    /// handle in creation order (parents before their children).
    ///
    /// The subtree is unregistered under the lock before the unlink, so no
    /// reader can resolve a handle to a path that is about to disappear. A
    /// path that is already gone from disk still deletes cleanly.
    pub fn delete(&self, handle: ObjectHandle) -> Result<Vec<ObjectHandle>, StoreError> {
        let (record, removed) = {
            let mut inner = self.inner.lock().unwrap();
            let record = inner.resolve(handle)?.clone();
            if inner.storage(record.storage)?.is_read_only() {
                return Err(StoreError::ReadOnly(record.storage));
            }
            let removed = inner.subtree(handle);
            let mut freed = 0u64;
            for h in &removed {
                if let Some(gone) = inner.objects.remove(&h.0) {
                    freed += gone.size;
                }
            }
            if let Some(used) = inner.used.get_mut(&record.storage.0) {
                *used = used.saturating_sub(freed);
            }
            (record, removed)
        };
        let result = if record.is_folder() {
            fs::remove_dir_all(&record.path)
        } else {
            fs::remove_file(&record.path)
        };
        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(fs_error(&record.path, e));
            }
        }
        Ok(removed)
    }

    /// Moves an object under a new parent, possibly on another storage. The
    /// rename runs outside the lock; the table is updated once it succeeded.
    pub fn move_object(
        &self,
        handle: ObjectHandle,
        new_storage: StorageId,
        new_parent: ObjectHandle,
    ) -> Result<ObjectRecord, StoreError> {
        let (record, new_path) = {
            let inner = self.inner.lock().unwrap();
            let record = inner.resolve(handle)?.clone();
            if inner.storage(record.storage)?.is_read_only() {
                return Err(StoreError::ReadOnly(record.storage));
            }
            if inner.storage(new_storage)?.is_read_only() {
                return Err(StoreError::ReadOnly(new_storage));
            }
            // A folder must not be moved beneath itself.
            let mut ancestor = new_parent;
            while ancestor != HANDLE_ROOT {
                if ancestor == handle {
                    return Err(StoreError::InvalidParent(new_parent));
                }
                ancestor = inner.resolve(ancestor)?.parent;
            }
            let dir = inner.parent_dir(new_storage, new_parent)?;
            if inner.name_taken(new_storage, new_parent, &record.name) {
                return Err(StoreError::Conflict(record.name.clone()));
            }
            let new_path = dir.join(&record.name);
            (record, new_path)
        };
        fs::rename(&record.path, &new_path).map_err(|e| fs_error(&record.path, e))?;

        let mut inner = self.inner.lock().unwrap();
        let members = inner.subtree(handle);
        let mut moved_bytes = 0u64;
        for h in &members {
            if let Some(obj) = inner.objects.get_mut(&h.0) {
                let rel = obj
                    .path
                    .strip_prefix(&record.path)
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                obj.path = if rel.as_os_str().is_empty() {
                    new_path.clone()
                } else {
                    new_path.join(rel)
                };
                obj.storage = new_storage;
                moved_bytes += obj.size;
            }
        }
        if new_storage != record.storage {
            if let Some(used) = inner.used.get_mut(&record.storage.0) {
                *used = used.saturating_sub(moved_bytes);
            }
            *inner.used.entry(new_storage.0).or_insert(0) += moved_bytes;
        }
        match inner.objects.get_mut(&handle.0) {
            Some(updated) => {
                updated.parent = new_parent;
                Ok(updated.clone())
            }
            None => {
                warn!("object {} vanished from the table during a move", handle);
                Err(StoreError::NotFound(handle))
            }
        }
    }
}

struct ScanEntry {
    path: PathBuf,
    parent: Option<usize>,
    is_dir: bool,
    size: u64,
    name: String,
    modified: Option<SystemTime>,
}

/// Parents-first scan of a storage root. Directory entries are visited in
/// name order so repeated installs enumerate identically.
fn scan_tree(root: &Path) -> Result<Vec<ScanEntry>, StoreError> {
    let mut entries: Vec<ScanEntry> = Vec::new();
    let mut pending: Vec<(PathBuf, Option<usize>)> = vec![(root.to_path_buf(), None)];

    while let Some((dir, parent)) = pending.pop() {
        let mut names: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| fs_error(&dir, e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| fs_error(&dir, e))?
            .into_iter()
            .map(|e| e.path())
            .collect();
        names.sort();
        for path in names {
            let meta = fs::symlink_metadata(&path).map_err(|e| fs_error(&path, e))?;
            if meta.file_type().is_symlink() {
                debug!("skipping symlink {}", path.display());
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                warn!("skipping object with non-UTF-8 name: {}", path.display());
                continue;
            };
            let is_dir = meta.is_dir();
            entries.push(ScanEntry {
                path: path.clone(),
                parent,
                is_dir,
                size: if is_dir { 0 } else { meta.len() },
                name,
                modified: meta.modified().ok(),
            });
            if is_dir {
                pending.push((path, Some(entries.len() - 1)));
            }
        }
    }
    Ok(entries)
}
