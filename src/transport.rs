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

//! The transport seam between the responder and the USB gadget driver.
//!
//! A transport moves whole bulk transfers; framing below that (endpoint
//! electricals, packetization) is the driver's business. Link state changes
//! and the cancel control request arrive out of band as [`LinkEvent`]
//! messages.

use std::io;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use thiserror::Error;

/// Transport failures abort the whole session, not just the transaction;
/// the host renegotiates after reconnect.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("link disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Out-of-band link notifications from the gadget/hot-plug boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Attached,
    Detached,
    Suspended,
    Resumed,
    /// Host issued the cancel-transaction control request.
    CancelTransaction,
}

/// Byte-stream view of the USB bulk endpoints.
///
/// Methods take `&self` so the responder loop can await a read while still
/// being able to write responses and events; implementations serialize
/// internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Receives one inbound bulk transfer.
    ///
    /// Must be cancel-safe: the responder loop drops an unfinished read when
    /// another branch wins, and no transfer may be lost by that.
    async fn read(&self) -> Result<Vec<u8>, TransportError>;

    /// Sends one outbound bulk transfer.
    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;
}

/// In-memory duplex transport used by tests and loopback setups. Created in
/// pairs; each end reads what the other wrote.
pub struct ChannelTransport {
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelTransport {
    /// Builds a connected pair of endpoints.
    pub fn pair(depth: usize) -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::channel(depth);
        let (b_tx, b_rx) = mpsc::channel(depth);
        (
            ChannelTransport {
                rx: Mutex::new(a_rx),
                tx: b_tx,
            },
            ChannelTransport {
                rx: Mutex::new(b_rx),
                tx: a_tx,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Disconnected)
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(data.to_vec())
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_moves_transfers_both_ways() {
        let (host, device) = ChannelTransport::pair(4);
        host.write(b"ping").await.unwrap();
        assert_eq!(device.read().await.unwrap(), b"ping");
        device.write(b"pong").await.unwrap();
        assert_eq!(host.read().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn dropped_peer_reads_as_disconnected() {
        let (host, device) = ChannelTransport::pair(4);
        drop(host);
        assert!(matches!(
            device.read().await,
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(
            device.write(b"x").await,
            Err(TransportError::Disconnected)
        ));
    }
}
