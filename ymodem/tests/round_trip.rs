//! End-to-end sender/receiver round trips over the in-memory loopback
//! transport, covering the block-size boundaries and sequence wraparound.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ymodem::context::{FileSink, FileSource};
use ymodem::transport::loopback::InMemoryTransport;
use ymodem::{Receiver, Sender, YmodemConfig};

struct VecSource {
    data: Vec<u8>,
    pos: usize,
}

impl VecSource {
    fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl FileSource for VecSource {
    fn open(&mut self) -> ymodem::Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> ymodem::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn size(&self) -> ymodem::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn close(&mut self) -> ymodem::Result<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
struct VecSink {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl FileSink for VecSink {
    fn open(&mut self, _filename: &str) -> ymodem::Result<()> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> ymodem::Result<usize> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) -> ymodem::Result<()> {
        Ok(())
    }
}

fn fast_config() -> YmodemConfig {
    YmodemConfig {
        wait_char_timeout: Duration::from_millis(200),
        wait_packet_timeout: Duration::from_millis(200),
        handshake_interval: Duration::from_millis(10),
        handshake_timeout: Duration::from_secs(5),
        ..YmodemConfig::default()
    }
}

fn round_trip(filename: &str, data: Vec<u8>) -> (String, Vec<u8>) {
    let (sender_t, receiver_t) = InMemoryTransport::pair();
    let source = VecSource::new(data);
    let sink = VecSink::default();
    let sink_for_read = sink.clone();

    let mut sender = Sender::new(sender_t, source, fast_config());
    let mut receiver = Receiver::new(receiver_t, sink, fast_config());

    std::thread::scope(|scope| {
        let recv_handle = scope.spawn(|| receiver.receive());
        let send_handle = scope.spawn(|| sender.send(filename));

        let recv_result = recv_handle.join().unwrap();
        let send_result = send_handle.join().unwrap();
        send_result.unwrap_or_else(|e| panic!("send failed: {e}"));
        let info = recv_result.unwrap_or_else(|e| panic!("receive failed: {e}"));
        assert_eq!(info.filename, filename);
    });

    let received = sink_for_read.inner.lock().unwrap().clone();
    (filename.to_string(), received)
}

#[test]
fn empty_file_round_trips() {
    let (_, received) = round_trip("empty.bin", vec![]);
    assert!(received.is_empty());
}

#[test]
fn exact_soh_block_round_trips() {
    let data: Vec<u8> = (0..128u16).map(|i| (i % 256) as u8).collect();
    let (_, received) = round_trip("soh.bin", data.clone());
    assert_eq!(received, data);
}

#[test]
fn exact_stx_block_round_trips() {
    let data: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
    let (_, received) = round_trip("stx.bin", data.clone());
    assert_eq!(received, data);
}

#[test]
fn stx_plus_one_byte_round_trips() {
    let data: Vec<u8> = (0..1025u32).map(|i| (i % 256) as u8).collect();
    let (_, received) = round_trip("stx_plus_one.bin", data.clone());
    assert_eq!(received, data);
}

#[test]
fn large_file_wraps_sequence_number() {
    // 256 full STX blocks: sequence numbers run 1..=255 then wrap to 0,
    // exercising the mod-256 wraparound the protocol requires.
    let data: Vec<u8> = (0..256usize * 1024)
        .map(|i| (i % 251) as u8) // avoid an accidental periodic pattern
        .collect();
    let (_, received) = round_trip("wrap.bin", data.clone());
    assert_eq!(received, data);
}

#[test]
fn single_short_byte_round_trips() {
    let (_, received) = round_trip("one_byte.bin", vec![0x42]);
    assert_eq!(received, vec![0x42]);
}
