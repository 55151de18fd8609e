//! The remote side of an in-memory connection.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex};
use wirelane::{
    Connection,
    ConnectionOptions,
    Envelope,
    lane::{LaneConfig, LaneError, LaneReader, LaneWriter},
};

/// Duplex buffer size used by [`duplex_connection`].
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Framed access to the peer end of a duplex transport.
///
/// Methods panic on transport failure; they are meant for test bodies.
pub struct PeerLane {
    reader: LaneReader<ReadHalf<DuplexStream>>,
    writer: LaneWriter<WriteHalf<DuplexStream>>,
}

impl PeerLane {
    #[must_use]
    pub fn new(stream: DuplexStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: LaneReader::new(read_half, LaneConfig::default()),
            writer: LaneWriter::new(write_half, LaneConfig::default()),
        }
    }

    /// Send one envelope to the connection under test.
    ///
    /// # Panics
    ///
    /// Panics if the write fails.
    pub async fn send(&mut self, envelope: &Envelope) {
        self.writer
            .write_envelope(envelope)
            .await
            .expect("peer failed to send envelope");
    }

    /// Receive the next envelope, failing the test after five seconds.
    ///
    /// # Panics
    ///
    /// Panics on timeout or transport failure.
    pub async fn recv(&mut self) -> Envelope {
        self.recv_within(RECV_TIMEOUT)
            .await
            .expect("peer timed out waiting for an envelope")
    }

    /// Receive the next envelope if one arrives within `limit`.
    ///
    /// # Panics
    ///
    /// Panics on transport failure.
    pub async fn recv_within(&mut self, limit: Duration) -> Option<Envelope> {
        tokio::time::timeout(limit, self.reader.read_envelope())
            .await
            .ok()
            .map(|read| read.expect("peer failed to read envelope"))
    }

    /// Receive the next envelope, surfacing lane errors such as EOF.
    ///
    /// # Errors
    ///
    /// Returns the lane failure.
    pub async fn try_recv(&mut self) -> Result<Envelope, LaneError> { self.reader.read_envelope().await }

    /// Write unframed bytes.
    ///
    /// # Panics
    ///
    /// Panics if the write fails.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_raw(bytes).await.expect("peer raw write failed");
    }

    /// Read exactly `len` unframed bytes.
    ///
    /// # Panics
    ///
    /// Panics on timeout, EOF or transport failure.
    pub async fn read_raw_exact(&mut self, len: usize) -> Vec<u8> {
        let mut received = Vec::with_capacity(len);
        let mut buf = vec![0_u8; len];
        while received.len() < len {
            let want = len - received.len();
            let n = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_raw(&mut buf[..want]))
                .await
                .expect("peer timed out reading raw bytes")
                .expect("peer raw read failed");
            assert!(n > 0, "unexpected EOF after {} bytes", received.len());
            received.extend_from_slice(&buf[..n]);
        }
        received
    }

    /// Shut down the peer's write direction; the connection sees a clean
    /// close.
    ///
    /// # Panics
    ///
    /// Panics if the shutdown fails.
    pub async fn shutdown(&mut self) { self.writer.shutdown().await.expect("peer shutdown failed"); }
}

/// Build a connection over a duplex pair and return it with its peer.
///
/// `configure` receives default options for the connection end.
pub fn duplex_connection(
    configure: impl FnOnce(ConnectionOptions<DuplexStream>) -> ConnectionOptions<DuplexStream>,
) -> (Connection<DuplexStream>, PeerLane) {
    duplex_connection_with_capacity(DEFAULT_CAPACITY, configure)
}

/// As [`duplex_connection`] with an explicit duplex buffer size.
pub fn duplex_connection_with_capacity(
    capacity: usize,
    configure: impl FnOnce(ConnectionOptions<DuplexStream>) -> ConnectionOptions<DuplexStream>,
) -> (Connection<DuplexStream>, PeerLane) {
    let (near, far) = duplex(capacity);
    let conn = Connection::new(configure(ConnectionOptions::new(near)));
    (conn, PeerLane::new(far))
}

/// Write raw bytes straight to a duplex stream, bypassing any lane.
///
/// # Panics
///
/// Panics if the write fails.
pub async fn write_all(stream: &mut DuplexStream, bytes: &[u8]) {
    stream.write_all(bytes).await.expect("raw write failed");
}

/// Read raw bytes straight from a duplex stream until `len` have arrived.
///
/// # Panics
///
/// Panics on EOF or failure.
pub async fn read_exact(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0_u8; len];
    stream.read_exact(&mut buf).await.expect("raw read failed");
    buf
}
