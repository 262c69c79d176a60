//! Sender state machine: handshake, file-info, data-block loop, and the
//! two-EOT / null-packet finish sequence.

use crate::context::{FileSource, Stage, YmodemConfig};
use crate::error::{Error, Result};
use crate::packet::{self, Header, control};
use crate::transport::Transport;
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// Drives a YMODEM send of a single file over `transport`, reading from
/// `file`.
pub struct Sender<T: Transport, F: FileSource> {
    transport: T,
    file: F,
    config: YmodemConfig,
    stage: Stage,
}

impl<T: Transport, F: FileSource> Sender<T, F> {
    /// Create a new sender.
    pub fn new(transport: T, file: F, config: YmodemConfig) -> Self {
        Self {
            transport,
            file,
            config,
            stage: Stage::None,
        }
    }

    /// The current transfer stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Consume the sender, returning its transport and file for reuse.
    #[must_use]
    pub fn into_parts(self) -> (T, F) {
        (self.transport, self.file)
    }

    /// Send `filename`, whose contents come from the configured
    /// [`FileSource`]. On every exit path (success or error) the file
    /// handle is closed and `stage` reflects where the transfer stopped.
    pub fn send(&mut self, filename: &str) -> Result<()> {
        let result = self.send_inner(filename);
        let _ = self.file.close();
        if result.is_err() {
            warn!("YMODEM send failed at stage {:?}", self.stage);
        }
        result
    }

    fn send_inner(&mut self, filename: &str) -> Result<()> {
        if filename.len() >= self.config.max_filename_len {
            return Err(Error::WrongDataSize(format!(
                "filename {filename:?} exceeds max_filename_len ({})",
                self.config.max_filename_len
            )));
        }

        self.stage = Stage::Establishing;
        self.file.open()?;
        let filesize = self.file.size()?;

        debug!("establishing: waiting for 'C' ({filename}, {filesize} bytes)");
        self.wait_for_handshake_c()?;

        debug!("sending file-info packet 0");
        self.send_file_info(filename, filesize)?;

        debug!("waiting for ACK+C");
        self.wait_for_ack_and_c()?;
        self.stage = Stage::Established;

        debug!("transmitting data blocks");
        self.stage = Stage::Transmitting;
        self.transmit_data()?;

        debug!("finishing transfer");
        self.stage = Stage::Finishing;
        self.finish()?;

        self.stage = Stage::Finished;
        debug!("YMODEM send complete");
        Ok(())
    }

    fn wait_for_handshake_c(&mut self) -> Result<()> {
        let start = Instant::now();
        while start.elapsed() < self.config.handshake_timeout {
            match self.transport.recv_byte(self.config.handshake_interval)? {
                Some(control::C) => return Ok(()),
                Some(byte) => trace!("handshake: ignoring unexpected byte {byte:#04x}"),
                None => {},
            }
        }
        Err(Error::Timeout("no 'C' received during handshake".into()))
    }

    fn send_file_info(&mut self, filename: &str, filesize: u64) -> Result<()> {
        let mut payload = [0u8; packet::SOH_BLOCK_SIZE];
        packet::encode_file_info(filename, filesize, &mut payload)?;
        let mut out = [0u8; packet::MAX_PACKET_SIZE];
        let len = packet::build_packet(Header::Soh, 0, &payload, &mut out)?;
        if !self.transport.send_bytes(&out[..len])? {
            return Err(Error::AckError("failed to send file-info packet".into()));
        }
        Ok(())
    }

    fn wait_for_ack_and_c(&mut self) -> Result<()> {
        let mut saw_ack = false;
        let mut saw_c = false;
        for _ in 0..5 {
            match self.transport.recv_byte(self.config.wait_packet_timeout)? {
                Some(control::ACK) => saw_ack = true,
                Some(control::C) => {
                    // A lone 'C' absorbs a lost ACK.
                    saw_ack = true;
                    saw_c = true;
                },
                Some(control::CAN) => return Err(Error::Cancelled),
                Some(byte) => trace!("ack+C wait: ignoring byte {byte:#04x}"),
                None => {},
            }
            if saw_ack && saw_c {
                return Ok(());
            }
        }
        Err(Error::AckError(
            "did not observe ACK and 'C' for file-info packet".into(),
        ))
    }

    fn transmit_data(&mut self) -> Result<()> {
        let mut seq: u8 = 1;
        let mut first_packet = true;

        loop {
            let mut buf = [0u8; packet::STX_BLOCK_SIZE];
            let mut filled = 0usize;
            let mut end_of_file = false;

            for attempt in 0..10 {
                let n = self.file.read(&mut buf[filled..])?;
                if n == 0 {
                    if attempt == 0 {
                        end_of_file = true;
                    }
                    break;
                }
                filled += n;
                if filled == buf.len() {
                    break;
                }
            }

            if end_of_file {
                break;
            }

            let last_block = filled < packet::STX_BLOCK_SIZE;
            if last_block {
                buf[filled..].fill(control::SUB);
            }

            let header = if filled <= packet::SOH_BLOCK_SIZE {
                Header::Soh
            } else {
                Header::Stx
            };
            let payload_len = header.expected_payload_size().expect("data header");
            let payload = &buf[..payload_len];

            let mut out = [0u8; packet::MAX_PACKET_SIZE];
            let len = packet::build_packet(header, seq, payload, &mut out)?;

            self.send_data_block(&out[..len], seq, first_packet)?;
            first_packet = false;
            seq = seq.wrapping_add(1);

            if last_block {
                break;
            }
        }

        Ok(())
    }

    fn send_data_block(&mut self, packet: &[u8], seq: u8, first_packet: bool) -> Result<()> {
        let mut retries = 0;
        loop {
            if !self.transport.send_bytes(packet)? {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "transport rejected packet",
                )));
            }

            match self.transport.recv_byte(self.config.wait_packet_timeout)? {
                Some(control::ACK) => {
                    trace!("block {seq} ACKed");
                    return Ok(());
                },
                Some(control::C) if first_packet => {
                    trace!("block {seq}: treating duplicated 'C' as ACK");
                    return Ok(());
                },
                Some(control::CAN) => return Err(Error::Cancelled),
                Some(control::NAK) => {
                    warn!("block {seq} NAKed, retrying");
                },
                Some(byte) => warn!("block {seq}: unexpected reply {byte:#04x}, retrying"),
                None => warn!("block {seq}: timeout waiting for ACK, retrying"),
            }

            retries += 1;
            if retries >= self.config.max_errors {
                return Err(Error::AckError(format!(
                    "block {seq} not acknowledged after {retries} retries"
                )));
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        // First EOT: the receiver's canonical reply is NAK.
        let mut retries = 0;
        loop {
            self.transport.send_byte(control::EOT)?;
            match self.transport.recv_byte(self.config.wait_packet_timeout)? {
                Some(control::NAK) => break,
                Some(byte) => trace!("first EOT: unexpected reply {byte:#04x}"),
                None => trace!("first EOT: timeout waiting for NAK"),
            }
            retries += 1;
            if retries >= self.config.max_errors {
                warn!("first EOT not NAKed after {retries} retries, proceeding anyway");
                break;
            }
        }

        // Second EOT: ACK or NAK both mean "proceed".
        self.transport.send_byte(control::EOT)?;
        match self.transport.recv_byte(self.config.wait_packet_timeout)? {
            Some(control::ACK | control::NAK) => {},
            Some(byte) => trace!("second EOT: unexpected reply {byte:#04x}, proceeding"),
            None => trace!("second EOT: timeout, proceeding"),
        }

        // A following 'C' is expected but its absence is survivable.
        let mut saw_c = false;
        for _ in 0..self.config.max_errors {
            if self.transport.recv_byte(self.config.wait_packet_timeout)? == Some(control::C) {
                saw_c = true;
                break;
            }
        }
        if !saw_c {
            trace!("no 'C' seen before batch terminator, proceeding anyway");
        }

        // Batch terminator: SOH/SEQ=0, all-zero payload.
        let payload = [0u8; packet::SOH_BLOCK_SIZE];
        let mut out = [0u8; packet::MAX_PACKET_SIZE];
        let len = packet::build_packet(Header::Soh, 0, &payload, &mut out)?;
        self.transport.send_bytes(&out[..len])?;

        match self.transport.recv_byte(self.config.wait_packet_timeout)? {
            Some(control::ACK) => debug!("batch terminator ACKed"),
            _ => debug!("no final ACK observed, transfer still considered complete"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::InMemoryTransport;

    struct MemFile {
        data: Vec<u8>,
        pos: usize,
    }

    impl MemFile {
        fn new(data: Vec<u8>) -> Self {
            Self { data, pos: 0 }
        }
    }

    impl FileSource for MemFile {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let remaining = &self.data[self.pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.pos += n;
            Ok(n)
        }

        fn size(&self) -> Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn short_config() -> YmodemConfig {
        YmodemConfig {
            wait_char_timeout: Duration::from_millis(20),
            wait_packet_timeout: Duration::from_millis(20),
            handshake_interval: Duration::from_millis(5),
            handshake_timeout: Duration::from_millis(200),
            max_errors: 5,
            ..YmodemConfig::default()
        }
    }

    #[test]
    fn happy_path_single_soh_block() {
        let (sender_t, mut peer_t) = InMemoryTransport::pair();

        // Prime the queue with exactly what a real receiver would have
        // sent by this point in the exchange.
        peer_t.send_byte(control::C).unwrap();
        peer_t.send_byte(control::ACK).unwrap();
        peer_t.send_byte(control::C).unwrap();
        peer_t.send_byte(control::ACK).unwrap(); // data block 1
        peer_t.send_byte(control::NAK).unwrap(); // first EOT
        peer_t.send_byte(control::ACK).unwrap(); // second EOT
        peer_t.send_byte(control::C).unwrap();
        peer_t.send_byte(control::ACK).unwrap(); // batch terminator

        let file = MemFile::new(vec![0x41, 0x42, 0x43]);
        let mut sender = Sender::new(sender_t, file, short_config());
        let result = sender.send("a.bin");
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(sender.stage(), Stage::Finished);
    }

    #[test]
    fn empty_file_sends_no_data_blocks() {
        let (sender_t, mut peer_t) = InMemoryTransport::pair();
        peer_t.send_byte(control::C).unwrap();
        peer_t.send_byte(control::ACK).unwrap();
        peer_t.send_byte(control::C).unwrap();
        peer_t.send_byte(control::NAK).unwrap();
        peer_t.send_byte(control::ACK).unwrap();
        peer_t.send_byte(control::C).unwrap();
        peer_t.send_byte(control::ACK).unwrap();

        let file = MemFile::new(vec![]);
        let mut sender = Sender::new(sender_t, file, short_config());
        sender.send("empty.bin").unwrap();
        assert_eq!(sender.stage(), Stage::Finished);
    }

    #[test]
    fn overlong_filename_fails_before_transmitting_anything() {
        let (sender_t, _peer_t) = InMemoryTransport::pair();
        let file = MemFile::new(vec![1, 2, 3]);
        let mut cfg = short_config();
        cfg.max_filename_len = 256;
        let mut sender = Sender::new(sender_t, file, cfg);
        let filename = "x".repeat(300);
        let err = sender.send(&filename).unwrap_err();
        assert!(matches!(err, Error::WrongDataSize(_)));
        assert_eq!(sender.stage(), Stage::None);
    }

    #[test]
    fn handshake_timeout_surfaces_timeout_error() {
        let (sender_t, _peer_t) = InMemoryTransport::pair();
        let file = MemFile::new(vec![1]);
        let mut cfg = short_config();
        cfg.handshake_timeout = Duration::from_millis(20);
        let mut sender = Sender::new(sender_t, file, cfg);
        let err = sender.send("a.bin").unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn cancel_during_data_block_is_reported() {
        let (sender_t, mut peer_t) = InMemoryTransport::pair();
        peer_t.send_byte(control::C).unwrap();
        peer_t.send_byte(control::ACK).unwrap();
        peer_t.send_byte(control::C).unwrap();
        peer_t.send_byte(control::CAN).unwrap();

        let file = MemFile::new(vec![0u8; 4096]);
        let mut sender = Sender::new(sender_t, file, short_config());
        let err = sender.send("big.bin").unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
