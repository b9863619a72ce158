//! Top-level `Agent` value: owns the slot table, runtime, native capability
//! table and transport writer. Grounded on `QemuSupervisor`
//! (`apps/daemon/src/qemu/supervisor.rs`) as "the one thing main.rs
//! constructs and runs" -- the explicit-owned-arena replacement for the
//! original firmware's process-global state (SPEC_FULL.md §1 / spec.md §9).

use crate::config::AgentConfig;
use crate::dispatcher::Dispatcher;
use crate::native::NativeCapabilities;
use crate::runtime::ModuleRuntime;
use crate::slots::SlotTable;
use crate::transport::ResponseWriter;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Events observable by a tracing layer or test harness, independent of the
/// wire protocol.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    LogLine {
        level: String,
        target: String,
        msg: String,
    },
}

pub struct Agent<W> {
    pub config: Arc<AgentConfig>,
    pub table: Arc<SlotTable>,
    pub runtime: Arc<dyn ModuleRuntime>,
    pub events: Arc<broadcast::Sender<AgentEvent>>,
    writer: ResponseWriter<W>,
    native: NativeCapabilities<W>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> Agent<W> {
    pub fn new(config: AgentConfig, runtime: Arc<dyn ModuleRuntime>, writer: W) -> Self {
        let config = Arc::new(config);
        let table = Arc::new(SlotTable::new(config.max_modules));
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let writer = ResponseWriter::new(writer);
        let native = NativeCapabilities::new(writer.clone());
        Self {
            config,
            table,
            runtime,
            events: Arc::new(tx),
            writer,
            native,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Run the agent against `reader` until it returns EOF or an error.
    /// Emits HELLO first, then dispatches commands until the connection closes.
    pub async fn run<R: AsyncRead + Unpin>(&self, reader: R) {
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&self.config),
            Arc::clone(&self.table),
            Arc::clone(&self.runtime),
            self.writer.clone(),
            self.native.clone(),
        );
        dispatcher.run(reader).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::{MockBehavior, MockRuntime};

    #[tokio::test]
    async fn hello_is_emitted_on_run_start() {
        let runtime = Arc::new(MockRuntime::new());
        let (client_to_agent, mut agent_sees_client) = tokio::io::duplex(1024);
        let (agent_writes, mut test_reads_agent_output) = tokio::io::duplex(1024);

        let agent = Agent::new(AgentConfig::default(), runtime, agent_writes);
        let handle = tokio::spawn(async move {
            agent.run(agent_sees_client).await;
        });

        let mut buf = vec![0u8; 256];
        use tokio::io::AsyncReadExt;
        let n = test_reads_agent_output.read(&mut buf).await.unwrap();
        let hello = String::from_utf8_lossy(&buf[..n]);
        assert!(hello.starts_with("HELLO device_id=nucleo_f746zg rtos=tokio runtime=WAMR"));

        drop(client_to_agent);
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_with_no_modules_reports_none() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.register_module("noop", vec![("app_main", MockBehavior::ReturnOk(None))]);
        let (client_in, agent_reads) = tokio::io::duplex(4096);
        let (agent_writes, mut test_reads) = tokio::io::duplex(4096);

        let agent = Agent::new(AgentConfig::default(), runtime, agent_writes);
        let handle = tokio::spawn(async move {
            agent.run(agent_reads).await;
        });

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut client_in = client_in;
        // drain HELLO
        let mut buf = vec![0u8; 4096];
        let _ = test_reads.read(&mut buf).await.unwrap();

        client_in.write_all(b"STATUS\n").await.unwrap();
        let n = test_reads.read(&mut buf).await.unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.contains("modules=\"none\""));

        drop(client_in);
        let _ = handle.await;
    }
}
