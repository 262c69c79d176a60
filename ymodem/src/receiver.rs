//! Receiver state machine: handshake, file-info packet, data-block loop
//! with sequence validation, and the two-EOT finish sequence (tolerant of a
//! missing first EOT and a missing batch terminator, but not of a second EOT
//! that never arrives even after a retry).

use crate::context::{FileSink, Stage, YmodemConfig};
use crate::error::{Error, Result};
use crate::packet::{self, Header, control};
use crate::transport::Transport;
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// The filename and size decoded from packet 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// The transmitted filename.
    pub filename: String,
    /// The transmitted file size, in bytes.
    pub size: u64,
}

/// Drives a YMODEM receive into the configured [`FileSink`].
pub struct Receiver<T: Transport, S: FileSink> {
    transport: T,
    sink: S,
    config: YmodemConfig,
    stage: Stage,
    /// Set when `receive_data` consumes the sender's first EOT itself, so
    /// `finish` knows not to wait for a second copy of it.
    pending_eot: bool,
}

impl<T: Transport, S: FileSink> Receiver<T, S> {
    /// Create a new receiver.
    pub fn new(transport: T, sink: S, config: YmodemConfig) -> Self {
        Self {
            transport,
            sink,
            config,
            stage: Stage::None,
            pending_eot: false,
        }
    }

    /// The current transfer stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Consume the receiver, returning its transport and sink for reuse.
    #[must_use]
    pub fn into_parts(self) -> (T, S) {
        (self.transport, self.sink)
    }

    /// Receive a single file, returning the [`FileInfo`] decoded from
    /// packet 0. On every exit path (success or error) the sink is closed.
    pub fn receive(&mut self) -> Result<FileInfo> {
        let result = self.receive_inner();
        let _ = self.sink.close();
        if result.is_err() {
            warn!("YMODEM receive failed at stage {:?}", self.stage);
        }
        result
    }

    fn receive_inner(&mut self) -> Result<FileInfo> {
        self.stage = Stage::Establishing;
        debug!("establishing: sending 'C' and waiting for packet 0");
        let info = self.establish_and_read_file_info()?;
        if info.filename.is_empty() {
            // An immediate batch terminator ends the batch with no file.
            self.stage = Stage::Finished;
            return Ok(info);
        }

        self.sink.open(&info.filename)?;
        self.stage = Stage::Established;
        self.transport.send_byte(control::ACK)?;
        self.transport.send_byte(control::C)?;

        debug!(
            "receiving data blocks for {} ({} bytes)",
            info.filename, info.size
        );
        self.stage = Stage::Transmitting;
        let mut received: u64 = 0;
        self.receive_data(&info, &mut received)?;

        debug!("finishing transfer");
        self.stage = Stage::Finishing;
        self.finish()?;

        self.stage = Stage::Finished;
        debug!("YMODEM receive complete");
        Ok(info)
    }

    /// Read a header byte within `timeout`. `Ok(None)` means nothing
    /// arrived; a CAN or EOT byte is reported directly so callers can
    /// react to it without going through packet validation.
    fn read_header_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        self.transport.recv_byte(timeout)
    }

    /// Having already read `first` as a data-block header byte, read the
    /// remaining SEQ/~SEQ/payload/CRC bytes and validate the whole packet.
    fn read_validated(&mut self, first: u8, header: Header) -> Result<(u8, Vec<u8>)> {
        let payload_len = header
            .expected_payload_size()
            .expect("caller checked header is a data block");

        let mut rest = vec![0u8; 2 + payload_len + 2];
        let n = self
            .transport
            .recv_exact_or_short(&mut rest, self.config.wait_packet_timeout)?;
        if n != rest.len() {
            return Err(Error::WrongDataSize(format!(
                "short packet body: got {n} of {} bytes",
                rest.len()
            )));
        }

        let mut full = Vec::with_capacity(1 + rest.len());
        full.push(first);
        full.extend_from_slice(&rest);

        let validated = packet::validate_packet(&full)?;
        Ok((validated.seq, validated.payload.to_vec()))
    }

    /// Send repeated 'C' bytes until packet 0 arrives, decode it.
    fn establish_and_read_file_info(&mut self) -> Result<FileInfo> {
        let start = Instant::now();
        loop {
            if start.elapsed() >= self.config.handshake_timeout {
                return Err(Error::Timeout(
                    "no packet 0 received during handshake".into(),
                ));
            }
            self.transport.send_byte(control::C)?;

            let Some(first) = self.read_header_byte(self.config.handshake_interval)? else {
                continue;
            };
            let header = Header::from_byte(first);
            match header {
                Header::Can => return Err(Error::Cancelled),
                Header::Soh | Header::Stx => {},
                _ => {
                    trace!("handshake: ignoring byte {first:#04x} while waiting for packet 0");
                    continue;
                },
            }

            match self.read_validated(first, header) {
                Ok((0, payload)) => {
                    let (filename, size) = packet::decode_file_info(&payload)?;
                    return Ok(FileInfo { filename, size });
                },
                Ok((seq, _)) => {
                    trace!("handshake: ignoring packet with seq {seq}, expected 0");
                    self.transport.send_byte(control::NAK)?;
                },
                Err(e) => {
                    trace!("handshake: discarding malformed packet 0: {e}");
                    self.transport.send_byte(control::NAK)?;
                },
            }
        }
    }

    fn receive_data(&mut self, info: &FileInfo, received: &mut u64) -> Result<()> {
        let mut expected_seq: u8 = 1;
        let mut errors = 0u32;

        loop {
            let Some(first) = self.read_header_byte(self.config.wait_packet_timeout)? else {
                return Err(Error::Timeout("no data packet received".into()));
            };

            let header = Header::from_byte(first);
            if header == Header::Eot {
                self.pending_eot = true;
                return Ok(());
            }
            if header == Header::Can {
                return Err(Error::Cancelled);
            }
            if header.expected_payload_size().is_none() {
                warn!("unexpected header byte {first:#04x}, NAKing");
                errors += 1;
                self.transport.send_byte(control::NAK)?;
                if errors >= self.config.max_errors {
                    return Err(Error::WrongCode(format!("unexpected header {first:#04x}")));
                }
                continue;
            }

            let (seq, payload) = match self.read_validated(first, header) {
                Ok(v) => v,
                Err(e) => {
                    warn!("packet rejected: {e}");
                    errors += 1;
                    self.transport.send_byte(control::NAK)?;
                    if errors >= self.config.max_errors {
                        return Err(e);
                    }
                    continue;
                },
            };

            if seq == expected_seq.wrapping_sub(1) {
                // A retransmit of the packet we already accepted: ACK again
                // without writing the bytes twice.
                trace!("duplicate packet {seq} re-ACKed");
                self.transport.send_byte(control::ACK)?;
                continue;
            }
            if seq != expected_seq {
                warn!("sequence mismatch: expected {expected_seq}, got {seq}");
                return Err(Error::WrongSequence(format!(
                    "expected {expected_seq}, got {seq}"
                )));
            }

            let to_write: &[u8] = if info.size > 0 {
                let remaining = info.size.saturating_sub(*received);
                let take = (remaining as usize).min(payload.len());
                &payload[..take]
            } else {
                &payload
            };
            if !to_write.is_empty() {
                self.sink.write(to_write)?;
                *received += to_write.len() as u64;
            }

            errors = 0;
            expected_seq = expected_seq.wrapping_add(1);
            self.transport.send_byte(control::ACK)?;
        }
    }

    fn finish(&mut self) -> Result<()> {
        if !self.pending_eot {
            match self.read_header_byte(self.config.wait_packet_timeout)? {
                Some(control::EOT) => {},
                Some(byte) => trace!("finish: unexpected byte {byte:#04x} before first EOT"),
                None => trace!("finish: timeout waiting for first EOT"),
            }
        }
        self.pending_eot = false;
        self.transport.send_byte(control::NAK)?;

        let mut got_second_eot = matches!(
            self.read_header_byte(self.config.wait_packet_timeout)?,
            Some(control::EOT)
        );
        if !got_second_eot {
            trace!("finish: second EOT missing, resending NAK and retrying once");
            self.transport.send_byte(control::NAK)?;
            got_second_eot = matches!(
                self.read_header_byte(self.config.wait_packet_timeout)?,
                Some(control::EOT)
            );
        }
        if !got_second_eot {
            return Err(Error::WrongCode(
                "second EOT not received after retry".into(),
            ));
        }
        self.transport.send_byte(control::ACK)?;

        self.transport.send_byte(control::C)?;

        // A batch-terminator (null filename, SOH/SEQ=0) packet may follow;
        // tolerate its absence.
        match self.read_header_byte(self.config.wait_packet_timeout)? {
            Some(first) => {
                let header = Header::from_byte(first);
                if header.expected_payload_size().is_some() {
                    match self.read_validated(first, header) {
                        Ok((0, payload)) => {
                            if let Ok((name, _)) = packet::decode_file_info(&payload) {
                                if name.is_empty() {
                                    self.transport.send_byte(control::ACK)?;
                                }
                            }
                        },
                        Ok((seq, _)) => {
                            trace!("finish: ignoring packet with seq {seq}, expected batch terminator");
                        },
                        Err(e) => debug!("batch terminator packet rejected, ignoring: {e}"),
                    }
                } else {
                    trace!("finish: ignoring byte {first:#04x} after second EOT");
                }
            },
            None => debug!("no batch terminator observed, transfer still considered complete"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::InMemoryTransport;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct MemSink {
        inner: Arc<Mutex<MemSinkInner>>,
    }

    #[derive(Default)]
    struct MemSinkInner {
        filename: Option<String>,
        data: Vec<u8>,
    }

    impl FileSink for MemSink {
        fn open(&mut self, filename: &str) -> Result<()> {
            self.inner.lock().unwrap().filename = Some(filename.to_string());
            Ok(())
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.inner.lock().unwrap().data.extend_from_slice(buf);
            Ok(buf.len())
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

    fn send_packet(t: &mut InMemoryTransport, header: Header, seq: u8, payload: &[u8]) {
        let mut out = [0u8; packet::MAX_PACKET_SIZE];
        let len = packet::build_packet(header, seq, payload, &mut out).unwrap();
        t.send_bytes(&out[..len]).unwrap();
    }

    #[test]
    fn happy_path_single_soh_block() {
        let (receiver_t, mut peer_t) = InMemoryTransport::pair();
        let sink = MemSink::default();
        let sink_clone = sink.clone();

        let data = b"hello";
        let mut info_payload = [0u8; packet::SOH_BLOCK_SIZE];
        packet::encode_file_info("a.bin", data.len() as u64, &mut info_payload).unwrap();

        // Consume the receiver's leading 'C' bytes before feeding packet 0.
        let mut cfg = short_config();
        cfg.handshake_timeout = Duration::from_millis(500);
        let mut receiver = Receiver::new(receiver_t, sink, cfg);

        // Drive by hand: the receiver sends 'C', we answer with packet 0,
        // then ACK+C, then the data block, then finish.
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let result = receiver.receive();
                assert!(result.is_ok(), "{result:?}");
                let info = result.unwrap();
                assert_eq!(info.filename, "a.bin");
                assert_eq!(info.size, data.len() as u64);
            });

            // Wait for at least one 'C'.
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::C));
            send_packet(&mut peer_t, Header::Soh, 0, &info_payload);

            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::ACK));
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::C));

            let mut block = [control::SUB; packet::SOH_BLOCK_SIZE];
            block[..data.len()].copy_from_slice(data);
            send_packet(&mut peer_t, Header::Soh, 1, &block);
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::ACK));

            peer_t.send_byte(control::EOT).unwrap();
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::NAK));
            peer_t.send_byte(control::EOT).unwrap();
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::ACK));
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::C));

            let terminator = [0u8; packet::SOH_BLOCK_SIZE];
            send_packet(&mut peer_t, Header::Soh, 0, &terminator);
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::ACK));
        });

        assert_eq!(sink_clone.inner.lock().unwrap().data, data);
    }

    #[test]
    fn sequence_mismatch_is_rejected() {
        let (receiver_t, mut peer_t) = InMemoryTransport::pair();
        let sink = MemSink::default();
        let cfg = short_config();
        let mut receiver = Receiver::new(receiver_t, sink, cfg);

        let mut info_payload = [0u8; packet::SOH_BLOCK_SIZE];
        packet::encode_file_info("a.bin", 4, &mut info_payload).unwrap();

        std::thread::scope(|scope| {
            let handle = scope.spawn(|| receiver.receive());

            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::C));
            send_packet(&mut peer_t, Header::Soh, 0, &info_payload);
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::ACK));
            assert_eq!(peer_t.recv_byte(Duration::from_millis(500)).unwrap(), Some(control::C));

            // Send seq 2 instead of the expected seq 1.
            let block = [control::SUB; packet::SOH_BLOCK_SIZE];
            send_packet(&mut peer_t, Header::Soh, 2, &block);

            let result = handle.join().unwrap();
            assert!(matches!(result, Err(Error::WrongSequence(_))));
        });
    }
}
