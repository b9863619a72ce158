//! Serial transport: the concrete byte stream underneath the frame decoder
//! and response writer. Grounded on `crates/testing/src/backends/serial_backend.rs`
//! for the real termios-configured UART path, and on `tokio::io::duplex` for
//! the in-memory test transport used throughout the test suite.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Shared, mutex-guarded line writer. The same mutex instance is handed to
/// `NativeCapabilities` so `uart_print` output and protocol response lines
/// (LOAD_OK, RESULT, ...) can never interleave on the wire, matching the
/// original firmware's single `uart_tx_mutex`.
pub struct ResponseWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W: AsyncWrite + Unpin + Send> ResponseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write a single protocol line, appending the `\n` terminator.
    pub async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.write_all(line.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await
    }

    /// Write raw bytes with no terminator, used by `uart_print`.
    pub async fn write_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.write_all(bytes).await?;
        guard.flush().await
    }
}

impl<W> Clone for ResponseWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read raw bytes off `reader` and feed them to `decoder`, handing completed
/// frames to `on_frame`. Runs until the reader returns EOF or an error,
/// mirroring the original firmware's UART ISR: never does anything but read
/// bytes and hand frames onward.
pub async fn run_reader<R>(
    mut reader: R,
    mut on_frame: impl FnMut(crate::protocol::Frame),
    decoder: &mut crate::protocol::FrameDecoder,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;
    let mut buf = [0u8; 256];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        for &byte in &buf[..n] {
            if let Some(frame) = decoder.feed(byte) {
                on_frame(frame);
            }
        }
    }
}

/// Open and configure a real UART device for production use: set the baud
/// rate and put the line into raw mode via `nix::sys::termios`, since no
/// other dependency in this workspace speaks to a serial device.
#[cfg(unix)]
pub fn configure_serial_port(file: &std::fs::File, baud_rate: u32) -> nix::Result<()> {
    use nix::sys::termios::{self, BaudRate, SetArg};

    let mut settings = termios::tcgetattr(file)?;
    let baud = match baud_rate {
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        230400 => BaudRate::B230400,
        _ => BaudRate::B115200,
    };
    termios::cfsetispeed(&mut settings, baud)?;
    termios::cfsetospeed(&mut settings, baud)?;
    termios::cfmakeraw(&mut settings);
    termios::tcsetattr(file, SetArg::TCSANOW, &settings)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, FrameDecoder};

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (client, mut server) = tokio::io::duplex(64);
        let writer = ResponseWriter::new(client);
        writer.write_line("STATUS_OK modules=\"none\"").await.unwrap();

        let mut buf = [0u8; 64];
        use tokio::io::AsyncReadExt;
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"STATUS_OK modules=\"none\"\n");
    }

    #[tokio::test]
    async fn run_reader_feeds_decoder_and_invokes_callback() {
        let (mut client, server) = tokio::io::duplex(64);
        use tokio::io::AsyncWriteExt;
        client.write_all(b"STATUS\n").await.unwrap();
        drop(client);

        let mut decoder = FrameDecoder::new(256);
        let mut seen = Vec::new();
        run_reader(server, |frame| seen.push(frame), &mut decoder)
            .await
            .unwrap();
        assert_eq!(seen, vec![Frame::Line("STATUS".to_string())]);
    }
}
