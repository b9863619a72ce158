//! Internal error types. These are logged via `tracing`, never transmitted
//! directly on the wire -- wire-visible failures are represented separately
//! in `protocol::response` so their `Display` output stays byte-exact.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("module load failed: {0}")]
    LoadFailed(String),
    #[error("instantiation failed: {0}")]
    InstantiateFailed(String),
    #[error("failed to create exec env")]
    NoExecEnv,
    #[error("out of memory: free={free} requested={requested}")]
    OutOfMemory { free: u32, requested: u32 },
}

#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    #[error("exception: {0}")]
    Exception(String),
    #[error("execution terminated")]
    Terminated,
}

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("no free slot")]
    NoSlot,
    #[error("slot {0} busy")]
    SlotBusy(String),
    #[error("slot {0} not found")]
    NoModule(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed command: {0}")]
    BadCommand(String),
}
