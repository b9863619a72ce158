//! On-device module execution agent binary.
//!
//! Opens a UART device (or, for local development, a pseudo-terminal/file
//! path given via `AGENT_SERIAL_DEVICE`), configures it with
//! `nix::sys::termios`, and runs the agent against it until the connection
//! drops.
//!
//! The sandbox runtime is out of this crate's scope (see SPEC_FULL.md's
//! Non-goals): this binary runs against `runtime::mock::MockRuntime` loaded
//! with a small fixed set of demo modules, the same role the original
//! firmware's `wasm/c/*.c` sample apps play in the retrieved corpus this
//! spec was distilled from. Swapping in a concrete `ModuleRuntime` is a
//! drop-in replacement at the `Agent::new` call site.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wasm_agent::config::AgentConfig;
use wasm_agent::runtime::mock::{MockBehavior, MockRuntime};
use wasm_agent::tracing_layer::EventBroadcastLayer;
use wasm_agent::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::from_env();

    let runtime = Arc::new(MockRuntime::new());
    runtime.register_module("app_main", vec![("app_main", MockBehavior::ReturnOk(Some(0)))]);
    runtime.register_module(
        "toggle_forever",
        vec![("toggle_forever", MockBehavior::LoopUntilTerminated)],
    );

    let device_path = std::env::var("AGENT_SERIAL_DEVICE").unwrap_or_else(|_| "/dev/ttyUSB0".to_string());

    let file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&device_path)
        .await?;

    #[cfg(unix)]
    {
        let std_file = file.try_clone().await?.into_std().await;
        wasm_agent::transport::configure_serial_port(&std_file, 115_200).ok();
    }

    let (reader, writer) = tokio::io::split(file);

    let agent = Agent::new(config, runtime, writer);

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EventBroadcastLayer::new(Arc::clone(&agent.events)))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,wasm_agent=debug")))
        .init();

    info!("starting wasm-agent, version {}", env!("CARGO_PKG_VERSION"));
    info!("listening on {}", device_path);

    agent.run(reader).await;

    Ok(())
}
