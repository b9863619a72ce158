//! Native Capability Table (C4): host functions exposed to modules under the
//! fixed import module name `env`. Grounded on the GPIO/UART mutex
//! discipline in the original firmware (`gpio_mutex` held across
//! set+sleep+clear, a single TX mutex shared between response writes and
//! `uart_print` so the two never interleave on the wire).

use crate::transport::ResponseWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::info;

/// Fixed import module name a concrete `ModuleRuntime` links these
/// functions under when instantiating a module.
pub const NATIVE_MODULE_NAME: &str = "env";

/// Shared host-side resources native functions serialize on. `writer` is the
/// same [`ResponseWriter`] the dispatcher uses for protocol lines, so
/// `uart_print` output can never interleave with a LOAD_OK/RESULT/etc. line.
pub struct NativeCapabilities<W> {
    gpio: Arc<Mutex<()>>,
    writer: ResponseWriter<W>,
}

// Manual impl: `#[derive(Clone)]` would add a spurious `W: Clone` bound.
// `ResponseWriter<W>` is cheaply cloneable (it's an `Arc` inside) regardless
// of whether the underlying write half implements `Clone`.
impl<W> Clone for NativeCapabilities<W> {
    fn clone(&self) -> Self {
        Self {
            gpio: Arc::clone(&self.gpio),
            writer: self.writer.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> NativeCapabilities<W> {
    pub fn new(writer: ResponseWriter<W>) -> Self {
        Self {
            gpio: Arc::new(Mutex::new(())),
            writer,
        }
    }

    /// `gpio_toggle() -> void`: toggles the indicator pin, holds it for one
    /// second, then clears it. The GPIO mutex is held across the whole
    /// sequence so concurrent callers serialize rather than interleave.
    pub async fn gpio_toggle(&self) {
        let _guard = self.gpio.lock().await;
        info!("GPIO ON");
        tokio::time::sleep(Duration::from_secs(1)).await;
        info!("GPIO OFF");
    }

    /// `led_toggle(duration_ms: u32) -> void`: same pattern as `gpio_toggle`
    /// but with a caller-supplied hold duration, logging around the guarded
    /// section so interleavings are externally observable and testable.
    pub async fn led_toggle(&self, duration_ms: u32) {
        let _guard = self.gpio.lock().await;
        info!("LED ON");
        tokio::time::sleep(Duration::from_millis(duration_ms as u64)).await;
        info!("LED OFF");
    }

    /// `uart_print(offset: u32) -> void`: writes a NUL-terminated string read
    /// from the caller's already-validated linear memory slice (validation
    /// happens before this is called -- the mock runtime has no linear
    /// memory to validate against, so real address-range checking belongs
    /// to a concrete `ModuleRuntime` implementation), holding the same
    /// mutex the response writer uses so output never interleaves with a
    /// protocol line.
    pub async fn uart_print(&self, text: &str) {
        self.writer.write_raw(text.as_bytes()).await.ok();
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

}

/// `should_stop() -> u32`: returns 1 once the owning slot's stop flag has
/// been raised, 0 otherwise. Modules that call this in a loop exit
/// cooperatively instead of requiring a hard abort. Free function: it reads
/// a slot's atomic directly and has no need of a writer, so it carries none
/// of `NativeCapabilities`'s transport bounds.
pub fn should_stop(flag: &AtomicBool) -> u32 {
    u32::from(flag.load(Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_stop_reflects_flag() {
        let flag = AtomicBool::new(false);
        assert_eq!(should_stop(&flag), 0);
        flag.store(true, Ordering::SeqCst);
        assert_eq!(should_stop(&flag), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn uart_print_writes_through_shared_response_writer() {
        let (client, mut server) = tokio::io::duplex(64);
        let writer = ResponseWriter::new(client);
        let caps = NativeCapabilities::new(writer);

        let handle = tokio::spawn(async move {
            caps.uart_print("hello").await;
        });

        let mut buf = [0u8; 64];
        use tokio::io::AsyncReadExt;
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        handle.await.unwrap();
    }
}
