//! On-device module execution agent: a UART command protocol, a fixed-size
//! wasm module slot table, and the native capability table modules call
//! back into. See `SPEC_FULL.md` at the workspace root for the full design.

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod native;
pub mod protocol;
pub mod runtime;
pub mod slots;
pub mod status;
pub mod tracing_layer;
pub mod transport;

pub use agent::{Agent, AgentEvent};
pub use config::AgentConfig;
