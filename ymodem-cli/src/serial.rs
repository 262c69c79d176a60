//! Serial port transport: adapts `serialport`'s blocking `Read`/`Write` port
//! to [`ymodem::Transport`].

use anyhow::{Context, Result};
use std::io::Read;
use std::time::Duration;
use ymodem::Transport;

/// A YMODEM transport backed by a real serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate`, 8N1, no flow control.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .with_context(|| format!("failed to open serial port {port_name}"))?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send_bytes(&mut self, buf: &[u8]) -> ymodem::Result<bool> {
        use std::io::Write;
        self.port.write_all(buf).map_err(ymodem::Error::Io)?;
        Ok(true)
    }

    fn recv_bytes(&mut self, out: &mut [u8], timeout: Duration) -> ymodem::Result<usize> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| ymodem::Error::FileError(format!("failed to set port timeout: {e}")))?;
        match self.port.read(out) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(ymodem::Error::Io(e)),
        }
    }
}

/// List available serial port names.
pub fn list_ports() -> Result<Vec<String>> {
    Ok(serialport::available_ports()
        .context("failed to enumerate serial ports")?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}
