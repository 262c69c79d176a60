//! Shared configuration, transfer stage, and the file-side capability
//! bundles the sender and receiver state machines are generic over.

use crate::error::Result;
use std::time::Duration;

/// Default interval between repeated handshake characters.
pub const DEFAULT_HANDSHAKE_INTERVAL_MS: u64 = 1000;
/// Default timeout for a single packet wait.
pub const DEFAULT_WAIT_PACKET_TIMEOUT_MS: u64 = 3000;
/// Default timeout for a single character wait.
pub const DEFAULT_WAIT_CHAR_TIMEOUT_MS: u64 = 3000;
/// Default maximum retry/error budget before a transfer fails.
pub const DEFAULT_MAX_ERRORS: u32 = 5;
/// Default number of CAN bytes sent to signal an abort.
pub const DEFAULT_CAN_SEND_COUNT: u32 = 7;
/// Default maximum filename length.
pub const DEFAULT_MAX_FILENAME_LEN: usize = 256;
/// Default maximum payload size (STX block).
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;

/// The current phase of a transfer. Monotone non-decreasing over a
/// successful run; a fatal error leaves the stage wherever it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// No transfer in progress.
    None,
    /// Handshake in progress (waiting for/sending 'C').
    Establishing,
    /// Handshake complete, file-info exchanged.
    Established,
    /// Data blocks are being sent or received.
    Transmitting,
    /// EOT / null-packet finish sequence in progress.
    Finishing,
    /// Transfer complete.
    Finished,
}

/// Tunable protocol timing and limits. Defaults match the protocol's
/// reference constants.
#[derive(Debug, Clone)]
pub struct YmodemConfig {
    /// Timeout for a single character read.
    pub wait_char_timeout: Duration,
    /// Timeout for a single packet read.
    pub wait_packet_timeout: Duration,
    /// Interval at which handshake characters are retried.
    pub handshake_interval: Duration,
    /// Total time budget for the handshake phase.
    pub handshake_timeout: Duration,
    /// Maximum consecutive errors for a single packet before failing.
    pub max_errors: u32,
    /// Number of CAN bytes sent to signal an abort.
    pub can_send_count: u32,
    /// Maximum filename length accepted in packet 0.
    pub max_filename_len: usize,
    /// Maximum payload size (the STX block length).
    pub max_payload: usize,
}

impl Default for YmodemConfig {
    fn default() -> Self {
        Self {
            wait_char_timeout: Duration::from_millis(DEFAULT_WAIT_CHAR_TIMEOUT_MS),
            wait_packet_timeout: Duration::from_millis(DEFAULT_WAIT_PACKET_TIMEOUT_MS),
            handshake_interval: Duration::from_millis(DEFAULT_HANDSHAKE_INTERVAL_MS),
            handshake_timeout: Duration::from_secs(60),
            max_errors: DEFAULT_MAX_ERRORS,
            can_send_count: DEFAULT_CAN_SEND_COUNT,
            max_filename_len: DEFAULT_MAX_FILENAME_LEN,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// File capability bundle required by the sender.
///
/// `size` is called once, immediately after `open`, and is taken to mean
/// the total file size at that moment — not "remaining bytes". End of file
/// during the data loop is detected by a zero-length `read`, never by
/// comparing against `size`.
pub trait FileSource {
    /// Open the underlying file for reading.
    fn open(&mut self) -> Result<()>;
    /// Read up to `buf.len()` bytes. A `0` return means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Total size of the file, queried once at open time.
    fn size(&self) -> Result<u64>;
    /// Close the file. Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// File capability bundle required by the receiver.
pub trait FileSink {
    /// Open (create/truncate) `filename` for writing.
    fn open(&mut self, filename: &str) -> Result<()>;
    /// Write `buf` in full. A short write is a fatal `FileError`.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    /// Close the file. Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;
}
