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

//! The command engine: one transaction at a time, driven by inbound
//! containers.
//!
//! A transaction is Command, optional Data phase, then exactly one Response.
//! The engine never emits a second response for the same transaction; aborted
//! transactions that already owe the host a response get exactly one
//! (cancelled, incomplete or an error code). Rolling back an inbound transfer
//! leaves no partially written object visible to any reader.

pub mod ops;
pub mod session;

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::device::DeviceContext;
use crate::store::{ObjectHandle, StagedObject, StorageId};
use crate::wire::container::Container;
use crate::wire::{ContainerKind, EventCode, OperationCode, ResponseCode};

use handlers::store_response;
use session::SessionState;

enum Phase {
    Idle,
    AwaitingData(DataPhase),
}

struct DataPhase {
    op: OperationCode,
    transaction_id: u32,
    /// Total payload bytes announced for the transfer; `u32::MAX` means the
    /// host did not declare a size and the first Data container delimits it.
    expected: u64,
    received: u64,
    sink: DataSink,
}

enum DataSink {
    /// SendObjectInfo dataset; a single Data container completes it.
    ObjectInfo {
        storage: StorageId,
        parent: ObjectHandle,
    },
    /// SendObject payload streamed straight to the staged file.
    Payload {
        staged: StagedObject,
        file: tokio::fs::File,
    },
}

/// Outbound traffic produced by one inbound container.
///
/// Most operations materialize their whole reply up front. A device-to-host
/// object transfer instead hands back a stream so the caller can transmit
/// each Data container before the next file chunk is read; at most one chunk
/// is in memory at a time regardless of the object's size.
pub enum Outbound {
    Batch(Vec<Container>),
    Object(ObjectStream),
}

/// Pull-based payload stream for GetObject: one Data container per file
/// chunk, closed by the transaction's single response.
pub struct ObjectStream {
    file: tokio::fs::File,
    path: PathBuf,
    transaction_id: u32,
    chunk: usize,
    delay: Duration,
    started: bool,
    last_chunk_seen: bool,
    finished: bool,
}

impl ObjectStream {
    /// The next container to transmit, or `None` once the closing response
    /// has been yielded. A read failure mid-stream ends the transfer with
    /// IncompleteTransfer.
    pub async fn next(&mut self) -> Option<Container> {
        if self.finished {
            return None;
        }
        if self.last_chunk_seen {
            self.finished = true;
            return Some(Container::response(ResponseCode::Ok, self.transaction_id, vec![]));
        }
        if self.started && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut buf = vec![0u8; self.chunk];
        match read_chunk(&mut self.file, &mut buf).await {
            Ok(n) => {
                buf.truncate(n);
                if n == 0 && self.started {
                    self.finished = true;
                    return Some(Container::response(ResponseCode::Ok, self.transaction_id, vec![]));
                }
                self.started = true;
                if n < self.chunk {
                    self.last_chunk_seen = true;
                }
                Some(Container::data(
                    OperationCode::GetObject as u16,
                    self.transaction_id,
                    buf,
                ))
            }
            Err(e) => {
                warn!("read failed for {}: {}", self.path.display(), e);
                self.finished = true;
                Some(Container::response(
                    ResponseCode::IncompleteTransfer,
                    self.transaction_id,
                    vec![],
                ))
            }
        }
    }
}

async fn read_chunk(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub struct CommandEngine {
    ctx: Arc<DeviceContext>,
    session: SessionState,
    phase: Phase,
    /// Reservation made by SendObjectInfo, consumed by the next SendObject.
    pending_send: Option<StagedObject>,
}

impl CommandEngine {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            ctx,
            session: SessionState::default(),
            phase: Phase::Idle,
            pending_send: None,
        }
    }

    pub fn session_open(&self) -> bool {
        self.session.is_open()
    }

    /// Whether a data phase is open; the responder loop arms the data phase
    /// timeout off this.
    pub fn awaiting_data(&self) -> bool {
        matches!(self.phase, Phase::AwaitingData(_))
    }

    /// Feeds one inbound container through the state machine and returns the
    /// outbound traffic, in order.
    pub async fn handle_container(&mut self, container: Container) -> Outbound {
        match container.kind {
            ContainerKind::Command => self.handle_command(container).await,
            ContainerKind::Data => Outbound::Batch(self.handle_data(container).await),
            ContainerKind::Response | ContainerKind::Event => {
                warn!("host sent a {:?} container; dropped", container.kind);
                Outbound::Batch(vec![])
            }
        }
    }

    async fn handle_command(&mut self, c: Container) -> Outbound {
        if self.awaiting_data() {
            // The host abandoned the previous transaction; its response is
            // forfeit, the new command proceeds.
            warn!("command {:#06x} interrupts an open data phase", c.code);
            self.discard_data_phase();
        }
        let tid = c.transaction_id;
        let Some(op) = OperationCode::from_u16(c.code) else {
            debug!("unsupported operation {:#06x} (tid {})", c.code, tid);
            return Outbound::Batch(vec![Container::response(
                ResponseCode::OperationNotSupported,
                tid,
                vec![],
            )]);
        };
        let spec = ops::spec(op);
        if spec.needs_session && !self.session.is_open() {
            return Outbound::Batch(vec![Container::response(ResponseCode::SessionNotOpen, tid, vec![])]);
        }
        if !ops::params_acceptable(c.params(), spec.required_params) {
            return Outbound::Batch(vec![Container::response(
                ResponseCode::ParameterNotSupported,
                tid,
                vec![],
            )]);
        }
        debug!("{:?} tid {} params {:?}", op, tid, c.params());

        let result = match op {
            OperationCode::GetObject => {
                return match self.handle_get_object(tid, c.param(0)).await {
                    Ok(stream) => Outbound::Object(stream),
                    Err(code) => Outbound::Batch(vec![Container::response(code, tid, vec![])]),
                }
            }
            OperationCode::GetDeviceInfo => self.handle_get_device_info(tid),
            OperationCode::OpenSession => self.handle_open_session(tid, c.param(0)),
            OperationCode::CloseSession => self.handle_close_session(tid),
            OperationCode::GetStorageIds => self.handle_get_storage_ids(tid),
            OperationCode::GetStorageInfo => self.handle_get_storage_info(tid, c.param(0)),
            OperationCode::GetNumObjects => self.handle_get_num_objects(tid, &c),
            OperationCode::GetObjectHandles => self.handle_get_object_handles(tid, &c),
            OperationCode::GetObjectInfo => self.handle_get_object_info(tid, c.param(0)),
            OperationCode::DeleteObject => self.handle_delete_object(tid, &c),
            OperationCode::SendObjectInfo => self.handle_send_object_info(tid, &c),
            OperationCode::SendObject => self.handle_send_object(tid).await,
            OperationCode::MoveObject => self.handle_move_object(tid, &c),
        };
        Outbound::Batch(match result {
            Ok(containers) => containers,
            Err(code) => vec![Container::response(code, tid, vec![])],
        })
    }

    async fn handle_data(&mut self, c: Container) -> Vec<Container> {
        let Phase::AwaitingData(phase) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            warn!("stray Data container (tid {}); dropped", c.transaction_id);
            return vec![];
        };
        if c.transaction_id != phase.transaction_id {
            warn!(
                "Data tid {} does not belong to active {:?} transaction {}",
                c.transaction_id, phase.op, phase.transaction_id
            );
            let tid = phase.transaction_id;
            self.rollback(phase.sink);
            return vec![Container::response(ResponseCode::InvalidTransactionId, tid, vec![])];
        }

        match phase.sink {
            DataSink::ObjectInfo { storage, parent } => {
                self.finish_object_info(storage, parent, c.payload(), phase.transaction_id)
            }
            DataSink::Payload { staged, file } => {
                self.consume_payload(phase.op, phase.transaction_id, phase.expected, phase.received, staged, file, c.payload())
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn consume_payload(
        &mut self,
        op: OperationCode,
        tid: u32,
        expected: u64,
        received_before: u64,
        staged: StagedObject,
        mut file: tokio::fs::File,
        payload: &[u8],
    ) -> Vec<Container> {
        let write_chunk = self.ctx.config.write_file_size.max(1);
        for chunk in payload.chunks(write_chunk) {
            if let Err(e) = file.write_all(chunk).await {
                warn!("write failed for {}: {}", staged.path.display(), e);
                drop(file);
                self.ctx.store.abort_object(staged);
                return vec![Container::response(ResponseCode::GeneralError, tid, vec![])];
            }
        }
        let received = received_before + payload.len() as u64;
        let complete = expected == u64::from(u32::MAX) || received >= expected;
        if !complete {
            self.phase = Phase::AwaitingData(DataPhase {
                op,
                transaction_id: tid,
                expected,
                received,
                sink: DataSink::Payload { staged, file },
            });
            return vec![];
        }
        if let Err(e) = file.flush().await {
            warn!("flush failed for {}: {}", staged.path.display(), e);
            drop(file);
            self.ctx.store.abort_object(staged);
            return vec![Container::response(ResponseCode::GeneralError, tid, vec![])];
        }
        drop(file);
        match self.ctx.store.commit_object(staged, received) {
            Ok(record) => {
                info!("stored object {} ({} bytes)", record.handle, received);
                self.ctx.events.emit(EventCode::ObjectAdded, &[record.handle.0]);
                vec![Container::response(ResponseCode::Ok, tid, vec![])]
            }
            Err(e) => vec![Container::response(store_response(e), tid, vec![])],
        }
    }

    /// Host-initiated cancel. Rolls back the in-flight transfer and any
    /// unconsumed reservation; returns the cancelled response if one is still
    /// owed for the active transaction.
    pub fn cancel(&mut self) -> Option<Container> {
        if let Some(stale) = self.pending_send.take() {
            self.ctx.store.abort_object(stale);
        }
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => None,
            Phase::AwaitingData(phase) => {
                info!("transaction {} cancelled by host", phase.transaction_id);
                let tid = phase.transaction_id;
                self.rollback(phase.sink);
                Some(Container::response(ResponseCode::TransactionCancelled, tid, vec![]))
            }
        }
    }

    /// Aborts a stalled data phase, answering with the given code.
    pub fn abort_data_phase(&mut self, code: ResponseCode) -> Option<Container> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => None,
            Phase::AwaitingData(phase) => {
                warn!(
                    "aborting {:?} transaction {} after {} of {} bytes",
                    phase.op, phase.transaction_id, phase.received, phase.expected
                );
                let tid = phase.transaction_id;
                self.rollback(phase.sink);
                Some(Container::response(code, tid, vec![]))
            }
        }
    }

    /// Link-level teardown: no responses, everything rolled back, session
    /// closed and pending events discarded.
    pub fn reset(&mut self) {
        self.discard_data_phase();
        if let Some(stale) = self.pending_send.take() {
            self.ctx.store.abort_object(stale);
        }
        if self.session.is_open() {
            info!("session closed by link reset");
        }
        self.session.close();
        self.ctx.events.clear();
    }

    /// Silently rolls back an open data phase. Used when the traffic itself
    /// is unusable (undecodable container, interrupting command) and no
    /// response can be attributed to a transaction.
    pub fn discard_data_phase(&mut self) {
        if let Phase::AwaitingData(phase) = std::mem::replace(&mut self.phase, Phase::Idle) {
            self.rollback(phase.sink);
        }
    }

    fn rollback(&self, sink: DataSink) {
        if let DataSink::Payload { staged, file } = sink {
            drop(file);
            self.ctx.store.abort_object(staged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    use crate::config::MtpConfig;
    use crate::device::{DeviceContext, DeviceIdentity};
    use crate::store::{Storage, STORAGE_INTERNAL};
    use crate::wire::container::ContainerBody;
    use crate::wire::datasets::ObjectInfo;
    use crate::wire::{FORMAT_ASSOCIATION, FORMAT_UNDEFINED};

    fn test_engine(capacity: u64) -> (CommandEngine, Arc<DeviceContext>, TempDir) {
        let ctx = Arc::new(DeviceContext::new(MtpConfig::default(), DeviceIdentity::default()));
        let dir = TempDir::new().unwrap();
        ctx.store
            .install_storage(Storage::new(STORAGE_INTERNAL, dir.path(), "Internal", capacity))
            .unwrap();
        (CommandEngine::new(ctx.clone()), ctx, dir)
    }

    fn response_code(c: &Container) -> u16 {
        assert_eq!(c.kind, ContainerKind::Response);
        c.code
    }

    /// Drives one container through the engine and drains the full reply,
    /// pulling any payload stream to completion.
    async fn run(engine: &mut CommandEngine, c: Container) -> Vec<Container> {
        match engine.handle_container(c).await {
            Outbound::Batch(containers) => containers,
            Outbound::Object(mut stream) => {
                let mut out = Vec::new();
                while let Some(c) = stream.next().await {
                    out.push(c);
                }
                out
            }
        }
    }

    async fn open_session(engine: &mut CommandEngine) {
        let out = run(engine, Container::command(OperationCode::OpenSession, 1, vec![1])).await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);
    }

    fn object_info(name: &str, size: u32) -> Vec<u8> {
        ObjectInfo {
            object_format: FORMAT_UNDEFINED,
            object_compressed_size: size,
            filename: name.to_string(),
            ..Default::default()
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn device_info_is_served_without_a_session() {
        let (mut engine, _ctx, _dir) = test_engine(1 << 20);
        let out = run(&mut engine, Container::command(OperationCode::GetDeviceInfo, 1, vec![])).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, ContainerKind::Data);
        assert!(!out[0].payload().is_empty());
        assert_eq!(response_code(&out[1]), ResponseCode::Ok as u16);
    }

    #[tokio::test]
    async fn gated_operations_require_a_session() {
        let (mut engine, _ctx, _dir) = test_engine(1 << 20);
        let out = run(&mut engine, Container::command(OperationCode::GetStorageIds, 1, vec![])).await;
        assert_eq!(out.len(), 1);
        assert_eq!(response_code(&out[0]), ResponseCode::SessionNotOpen as u16);
    }

    #[tokio::test]
    async fn second_open_session_reports_the_existing_id() {
        let (mut engine, _ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        let out = run(&mut engine, Container::command(OperationCode::OpenSession, 2, vec![9])).await;
        assert_eq!(response_code(&out[0]), ResponseCode::SessionAlreadyOpen as u16);
        assert_eq!(out[0].params(), &[1]);
    }

    #[tokio::test]
    async fn open_session_with_id_zero_is_invalid() {
        let (mut engine, _ctx, _dir) = test_engine(1 << 20);
        let out = run(&mut engine, Container::command(OperationCode::OpenSession, 1, vec![0])).await;
        assert_eq!(response_code(&out[0]), ResponseCode::InvalidParameter as u16);
        assert!(!engine.session_open());
    }

    #[tokio::test]
    async fn unknown_opcode_is_rejected() {
        let (mut engine, _ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        let out = run(
            &mut engine,
            Container {
                kind: ContainerKind::Command,
                code: 0x100A,
                transaction_id: 2,
                body: ContainerBody::Params(vec![]),
            },
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::OperationNotSupported as u16);
    }

    #[tokio::test]
    async fn excess_nonzero_parameters_are_rejected() {
        let (mut engine, _ctx, _dir) = test_engine(1 << 20);
        let out = run(&mut engine, Container::command(OperationCode::OpenSession, 1, vec![1, 7])).await;
        assert_eq!(response_code(&out[0]), ResponseCode::ParameterNotSupported as u16);
    }

    #[tokio::test]
    async fn enumeration_matches_store_order() {
        let (mut engine, ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        let a = ctx.store.create_folder(STORAGE_INTERNAL, crate::store::HANDLE_ROOT, "a").unwrap();
        let b = ctx.store.create_folder(STORAGE_INTERNAL, crate::store::HANDLE_ROOT, "b").unwrap();

        let out = run(
            &mut engine,
            Container::command(OperationCode::GetObjectHandles, 2, vec![0xFFFF_FFFF, 0, 0]),
        )
        .await;
        assert_eq!(out[0].kind, ContainerKind::Data);
        let payload = out[0].payload();
        assert_eq!(response_code(&out[1]), ResponseCode::Ok as u16);
        let mut r = crate::wire::bytes::ByteReader::new(payload);
        assert_eq!(r.u32().unwrap(), 2);
        assert_eq!(r.u32().unwrap(), a.handle.0);
        assert_eq!(r.u32().unwrap(), b.handle.0);
    }

    #[tokio::test]
    async fn num_objects_is_returned_as_a_response_parameter() {
        let (mut engine, ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        ctx.store.create_folder(STORAGE_INTERNAL, crate::store::HANDLE_ROOT, "only").unwrap();
        let out = run(
            &mut engine,
            Container::command(OperationCode::GetNumObjects, 2, vec![0xFFFF_FFFF, 0, 0]),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);
        assert_eq!(out[0].params(), &[1]);
    }

    #[tokio::test]
    async fn send_object_info_then_send_object_stores_the_file() {
        let (mut engine, ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;

        let out = run(
            &mut engine,
            Container::command(
                OperationCode::SendObjectInfo,
                2,
                vec![STORAGE_INTERNAL.0, 0xFFFF_FFFF],
            ),
        )
        .await;
        assert!(out.is_empty(), "data phase must be open");
        assert!(engine.awaiting_data());

        let out = run(
            &mut engine,
            Container::data(
                OperationCode::SendObjectInfo as u16,
                2,
                object_info("note.txt", 5),
            ),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);
        assert_eq!(out[0].params()[0], STORAGE_INTERNAL.0);
        let handle = out[0].params()[2];
        assert_ne!(handle, 0);
        // Reserved but not yet published.
        assert!(ctx.store.resolve(ObjectHandle(handle)).is_err());

        let out = run(&mut engine, Container::command(OperationCode::SendObject, 3, vec![])).await;
        assert!(out.is_empty());
        let out = run(
            &mut engine,
            Container::data(OperationCode::SendObject as u16, 3, b"hello".to_vec()),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);

        let record = ctx.store.resolve(ObjectHandle(handle)).unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(fs::read(dir.path().join("note.txt")).unwrap(), b"hello");
        assert_eq!(ctx.events.try_next().unwrap().params, vec![handle]);
    }

    #[tokio::test]
    async fn folder_object_info_creates_the_folder_immediately() {
        let (mut engine, ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;

        run(
            &mut engine,
            Container::command(OperationCode::SendObjectInfo, 2, vec![STORAGE_INTERNAL.0, 0]),
        )
        .await;
        let payload = ObjectInfo {
            object_format: FORMAT_ASSOCIATION,
            filename: "Music".to_string(),
            ..Default::default()
        }
        .encode()
        .unwrap();
        let out = run(
            &mut engine,
            Container::data(OperationCode::SendObjectInfo as u16, 2, payload),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);
        let handle = out[0].params()[2];
        assert!(dir.path().join("Music").is_dir());
        assert!(ctx.store.resolve(ObjectHandle(handle)).unwrap().is_folder());
        assert_eq!(ctx.events.try_next().unwrap().code, EventCode::ObjectAdded);
    }

    #[tokio::test]
    async fn send_object_without_info_is_rejected() {
        let (mut engine, _ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        let out = run(&mut engine, Container::command(OperationCode::SendObject, 2, vec![])).await;
        assert_eq!(response_code(&out[0]), ResponseCode::NoValidObjectInfo as u16);
    }

    #[tokio::test]
    async fn mismatched_data_transaction_rolls_back_the_transfer() {
        let (mut engine, ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;

        run(
            &mut engine,
            Container::command(OperationCode::SendObjectInfo, 2, vec![STORAGE_INTERNAL.0, 0]),
        )
        .await;
        let out = run(
            &mut engine,
            Container::data(
                OperationCode::SendObjectInfo as u16,
                2,
                object_info("half.bin", 100),
            ),
        )
        .await;
        let handle = out[0].params()[2];

        run(&mut engine, Container::command(OperationCode::SendObject, 3, vec![])).await;
        let out = run(
            &mut engine,
            Container::data(OperationCode::SendObject as u16, 99, vec![0; 10]),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::InvalidTransactionId as u16);
        assert_eq!(out[0].transaction_id, 3);

        assert!(!engine.awaiting_data());
        assert!(!dir.path().join("half.bin").exists());
        assert!(ctx.store.resolve(ObjectHandle(handle)).is_err());
    }

    #[tokio::test]
    async fn cancel_mid_transfer_leaves_no_partial_object() {
        let (mut engine, ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;

        run(
            &mut engine,
            Container::command(OperationCode::SendObjectInfo, 2, vec![STORAGE_INTERNAL.0, 0]),
        )
        .await;
        let out = run(
            &mut engine,
            Container::data(
                OperationCode::SendObjectInfo as u16,
                2,
                object_info("big.bin", 1000),
            ),
        )
        .await;
        let handle = out[0].params()[2];
        run(&mut engine, Container::command(OperationCode::SendObject, 3, vec![])).await;
        let out = run(
            &mut engine,
            Container::data(OperationCode::SendObject as u16, 3, vec![0; 500]),
        )
        .await;
        assert!(out.is_empty(), "transfer is only half done");

        let response = engine.cancel().expect("a response is owed");
        assert_eq!(response_code(&response), ResponseCode::TransactionCancelled as u16);
        assert_eq!(response.transaction_id, 3);
        assert!(!dir.path().join("big.bin").exists());
        assert!(ctx.store.resolve(ObjectHandle(handle)).is_err());
        assert!(engine.cancel().is_none(), "no second response for the transaction");
    }

    #[tokio::test]
    async fn stalled_data_phase_aborts_as_incomplete() {
        let (mut engine, _ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        run(
            &mut engine,
            Container::command(OperationCode::SendObjectInfo, 2, vec![STORAGE_INTERNAL.0, 0]),
        )
        .await;
        run(
            &mut engine,
            Container::data(
                OperationCode::SendObjectInfo as u16,
                2,
                object_info("stall.bin", 100),
            ),
        )
        .await;
        run(&mut engine, Container::command(OperationCode::SendObject, 3, vec![])).await;

        let response = engine.abort_data_phase(ResponseCode::IncompleteTransfer).unwrap();
        assert_eq!(response_code(&response), ResponseCode::IncompleteTransfer as u16);
        assert!(!dir.path().join("stall.bin").exists());
    }

    #[tokio::test]
    async fn command_interrupting_a_data_phase_wins() {
        let (mut engine, _ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        run(
            &mut engine,
            Container::command(OperationCode::SendObjectInfo, 2, vec![STORAGE_INTERNAL.0, 0]),
        )
        .await;
        run(
            &mut engine,
            Container::data(
                OperationCode::SendObjectInfo as u16,
                2,
                object_info("orphan.bin", 10),
            ),
        )
        .await;
        run(&mut engine, Container::command(OperationCode::SendObject, 3, vec![])).await;

        let out = run(&mut engine, Container::command(OperationCode::GetStorageIds, 4, vec![])).await;
        assert_eq!(out[0].kind, ContainerKind::Data);
        assert_eq!(response_code(&out[1]), ResponseCode::Ok as u16);
        assert!(!engine.awaiting_data());
        assert!(!dir.path().join("orphan.bin").exists());
    }

    #[tokio::test]
    async fn get_object_yields_one_bounded_chunk_per_pull() {
        let ctx = Arc::new(DeviceContext::new(
            MtpConfig {
                read_file_size: 4,
                ..MtpConfig::default()
            },
            DeviceIdentity::default(),
        ));
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("payload.bin"), b"0123456789").unwrap();
        ctx.store
            .install_storage(Storage::new(STORAGE_INTERNAL, dir.path(), "Internal", 1 << 20))
            .unwrap();
        let mut engine = CommandEngine::new(ctx.clone());
        open_session(&mut engine).await;
        let handle = ctx
            .store
            .objects(crate::store::ObjectFilter {
                storage: STORAGE_INTERNAL,
                format: 0,
                parent: None,
            })
            .unwrap()[0]
            .handle;

        let outbound = engine
            .handle_container(Container::command(OperationCode::GetObject, 2, vec![handle.0]))
            .await;
        let Outbound::Object(mut stream) = outbound else {
            panic!("expected a payload stream");
        };
        // 10 bytes at 4 per chunk: each pull yields one Data container no
        // larger than the chunk size, never the whole object.
        let mut collected = Vec::new();
        let mut data_containers = 0;
        loop {
            let c = stream.next().await.expect("stream ended early");
            if c.kind == ContainerKind::Data {
                assert!(c.payload().len() <= 4);
                assert_eq!(c.transaction_id, 2);
                collected.extend_from_slice(c.payload());
                data_containers += 1;
            } else {
                assert_eq!(response_code(&c), ResponseCode::Ok as u16);
                break;
            }
        }
        assert_eq!(data_containers, 3);
        assert_eq!(collected, b"0123456789");
        assert!(stream.next().await.is_none(), "no traffic after the response");
    }

    #[tokio::test]
    async fn get_object_chunks_fit_the_outbound_transfer_limit() {
        let ctx = Arc::new(DeviceContext::new(
            MtpConfig {
                write_usb_size: 16,
                ..MtpConfig::default()
            },
            DeviceIdentity::default(),
        ));
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("wide.bin"), vec![7u8; 50]).unwrap();
        ctx.store
            .install_storage(Storage::new(STORAGE_INTERNAL, dir.path(), "Internal", 1 << 20))
            .unwrap();
        let mut engine = CommandEngine::new(ctx.clone());
        open_session(&mut engine).await;
        let handle = ctx
            .store
            .objects(crate::store::ObjectFilter {
                storage: STORAGE_INTERNAL,
                format: 0,
                parent: None,
            })
            .unwrap()[0]
            .handle;

        let out = run(&mut engine, Container::command(OperationCode::GetObject, 2, vec![handle.0])).await;
        for c in &out[..out.len() - 1] {
            assert_eq!(c.kind, ContainerKind::Data);
            // 16-byte transfer limit minus the 12-byte container header.
            assert!(c.encode().len() <= 16);
        }
        assert_eq!(response_code(&out[out.len() - 1]), ResponseCode::Ok as u16);
    }

    #[tokio::test]
    async fn get_object_on_a_folder_is_rejected() {
        let (mut engine, ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        let folder = ctx
            .store
            .create_folder(STORAGE_INTERNAL, crate::store::HANDLE_ROOT, "d")
            .unwrap();
        let out = run(
            &mut engine,
            Container::command(OperationCode::GetObject, 2, vec![folder.handle.0]),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::InvalidObjectHandle as u16);
    }

    #[tokio::test]
    async fn delete_emits_one_event_per_removed_object() {
        let (mut engine, ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        let top = ctx
            .store
            .create_folder(STORAGE_INTERNAL, crate::store::HANDLE_ROOT, "top")
            .unwrap();
        let sub = ctx.store.create_folder(STORAGE_INTERNAL, top.handle, "sub").unwrap();

        let out = run(
            &mut engine,
            Container::command(OperationCode::DeleteObject, 2, vec![top.handle.0, 0]),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);
        assert_eq!(ctx.events.try_next().unwrap().params, vec![top.handle.0]);
        assert_eq!(ctx.events.try_next().unwrap().params, vec![sub.handle.0]);
    }

    #[tokio::test]
    async fn delete_with_format_scope_is_not_supported() {
        let (mut engine, ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        let folder = ctx
            .store
            .create_folder(STORAGE_INTERNAL, crate::store::HANDLE_ROOT, "keep")
            .unwrap();
        let out = run(
            &mut engine,
            Container::command(
                OperationCode::DeleteObject,
                2,
                vec![folder.handle.0, FORMAT_ASSOCIATION as u32],
            ),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::ParameterNotSupported as u16);
        assert!(ctx.store.resolve(folder.handle).is_ok());
    }

    #[tokio::test]
    async fn move_object_emits_info_changed() {
        let (mut engine, ctx, _dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        let src = ctx
            .store
            .create_folder(STORAGE_INTERNAL, crate::store::HANDLE_ROOT, "src")
            .unwrap();
        let dst = ctx
            .store
            .create_folder(STORAGE_INTERNAL, crate::store::HANDLE_ROOT, "dst")
            .unwrap();

        let out = run(
            &mut engine,
            Container::command(
                OperationCode::MoveObject,
                2,
                vec![src.handle.0, STORAGE_INTERNAL.0, dst.handle.0],
            ),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);
        let event = ctx.events.try_next().unwrap();
        assert_eq!(event.code, EventCode::ObjectInfoChanged);
        assert_eq!(event.params, vec![src.handle.0]);
        assert_eq!(ctx.store.resolve(src.handle).unwrap().parent, dst.handle);
    }

    #[tokio::test]
    async fn close_session_discards_the_pending_reservation() {
        let (mut engine, _ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        run(
            &mut engine,
            Container::command(OperationCode::SendObjectInfo, 2, vec![STORAGE_INTERNAL.0, 0]),
        )
        .await;
        run(
            &mut engine,
            Container::data(
                OperationCode::SendObjectInfo as u16,
                2,
                object_info("never-sent.bin", 10),
            ),
        )
        .await;

        let out = run(&mut engine, Container::command(OperationCode::CloseSession, 3, vec![])).await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);
        assert!(!engine.session_open());
        assert!(!dir.path().join("never-sent.bin").exists());
    }

    #[tokio::test]
    async fn reset_rolls_back_and_closes_everything() {
        let (mut engine, ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        run(
            &mut engine,
            Container::command(OperationCode::SendObjectInfo, 2, vec![STORAGE_INTERNAL.0, 0]),
        )
        .await;
        run(
            &mut engine,
            Container::data(
                OperationCode::SendObjectInfo as u16,
                2,
                object_info("gone.bin", 10),
            ),
        )
        .await;
        ctx.events.emit(EventCode::StorageInfoChanged, &[STORAGE_INTERNAL.0]);

        engine.reset();
        assert!(!engine.session_open());
        assert!(!engine.awaiting_data());
        assert!(!dir.path().join("gone.bin").exists());
        assert_eq!(ctx.events.try_next(), None);
    }

    #[tokio::test]
    async fn empty_file_transfer_completes_on_the_first_container() {
        let (mut engine, ctx, dir) = test_engine(1 << 20);
        open_session(&mut engine).await;
        run(
            &mut engine,
            Container::command(OperationCode::SendObjectInfo, 2, vec![STORAGE_INTERNAL.0, 0]),
        )
        .await;
        let out = run(
            &mut engine,
            Container::data(
                OperationCode::SendObjectInfo as u16,
                2,
                object_info("empty.txt", 0),
            ),
        )
        .await;
        let handle = out[0].params()[2];
        run(&mut engine, Container::command(OperationCode::SendObject, 3, vec![])).await;
        let out = run(
            &mut engine,
            Container::data(OperationCode::SendObject as u16, 3, vec![]),
        )
        .await;
        assert_eq!(response_code(&out[0]), ResponseCode::Ok as u16);
        assert_eq!(ctx.store.resolve(ObjectHandle(handle)).unwrap().size, 0);
        assert!(dir.path().join("empty.txt").exists());
    }
}
