//! A portable implementation of the YMODEM file transfer protocol.
//!
//! This crate implements only the protocol state machines: packet framing,
//! CRC-16 verification, and the sender/receiver handshakes. It is generic
//! over a [`Transport`] (the byte channel) and over [`FileSource`] /
//! [`FileSink`] (the file being sent or written), so it has no direct
//! dependency on a particular serial port or filesystem API.

#![warn(missing_docs)]

pub mod context;
pub mod crc;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod transport;

pub use context::{FileSink, FileSource, Stage, YmodemConfig};
pub use error::{Error, ErrorKind, Result};
pub use receiver::{FileInfo, Receiver};
pub use sender::Sender;
pub use transport::Transport;
