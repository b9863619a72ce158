//! Agent configuration: slot counts, guard thresholds, timeouts and device metadata.
//!
//! Mirrors the daemon's own config module: a `Default` impl with sane
//! built-in values, plus a `from_env()` that starts from the default and
//! overrides individual fields when the corresponding environment variable
//! parses successfully.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Device identifier reported in HELLO.
    pub device_id: String,
    /// RTOS name reported in HELLO. This rewrite runs on tokio, not an RTOS,
    /// but the wire field is retained for compatibility with existing hosts.
    pub rtos_name: String,
    /// Sandbox runtime name reported in HELLO.
    pub runtime_name: String,

    /// Number of module slots. Spec default is 2; widened here to a runtime
    /// value rather than a compile-time constant since buffers are heap-owned.
    pub max_modules: usize,
    /// Max accepted module_id length in bytes.
    pub max_module_id_len: usize,
    /// Max accepted func name length in bytes.
    pub max_func_name_len: usize,
    /// Max accepted call argument count.
    pub max_call_args: usize,
    /// Max accepted line length before a line is rejected as oversized.
    pub line_buf_size: usize,
    /// Depth of the bounded line queue between the reader task and the dispatcher.
    pub line_queue_depth: usize,

    /// Timeout waiting for a declared BINARY payload to arrive in full.
    pub binary_payload_timeout_ms: u64,
    /// Delay before the stop-escalation timer forcibly aborts an unresponsive worker.
    pub stop_force_delay_ms: u64,

    /// Free-heap guard required to admit a START when the slot has no cached exec_env.
    pub start_guard_bytes_need_exec_env: u32,
    /// Free-heap guard required to admit a START when the slot already has a cached exec_env.
    pub start_guard_bytes_have_exec_env: u32,
    /// Free-heap guard required to admit a LOAD.
    pub load_guard_bytes: u32,

    /// Threshold below which a slot is reported in STATUS's `low_stack` field.
    pub low_stack_threshold_bytes: u64,

    /// Default entry point invoked by START when no `func=` argument is given.
    pub default_entry_point: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "nucleo_f746zg".to_string(),
            rtos_name: "tokio".to_string(),
            runtime_name: "WAMR".to_string(),

            max_modules: 2,
            max_module_id_len: 31,
            max_func_name_len: 63,
            max_call_args: 4,
            line_buf_size: 256,
            line_queue_depth: 4,

            binary_payload_timeout_ms: 5_000,
            stop_force_delay_ms: 1_200,

            start_guard_bytes_need_exec_env: 16 * 1024,
            start_guard_bytes_have_exec_env: 4 * 1024,
            load_guard_bytes: 8 * 1024,

            low_stack_threshold_bytes: 512,

            default_entry_point: "app_main".to_string(),
        }
    }
}

impl AgentConfig {
    /// Build a config starting from defaults, applying `AGENT_*` environment
    /// variable overrides where present and parseable. Unparseable or absent
    /// variables silently keep the default, matching the daemon's own
    /// `from_env()` convention.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("AGENT_DEVICE_ID") {
            config.device_id = v;
        }
        if let Ok(v) = std::env::var("AGENT_RUNTIME_NAME") {
            config.runtime_name = v;
        }
        if let Ok(v) = std::env::var("AGENT_MAX_MODULES") {
            if let Ok(val) = v.parse() {
                config.max_modules = val;
            }
        }
        if let Ok(v) = std::env::var("AGENT_BINARY_PAYLOAD_TIMEOUT_MS") {
            if let Ok(val) = v.parse() {
                config.binary_payload_timeout_ms = val;
            }
        }
        if let Ok(v) = std::env::var("AGENT_STOP_FORCE_DELAY_MS") {
            if let Ok(val) = v.parse() {
                config.stop_force_delay_ms = val;
            }
        }
        if let Ok(v) = std::env::var("AGENT_LOW_STACK_THRESHOLD_BYTES") {
            if let Ok(val) = v.parse() {
                config.low_stack_threshold_bytes = val;
            }
        }
        if let Ok(v) = std::env::var("AGENT_DEFAULT_ENTRY_POINT") {
            config.default_entry_point = v;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let config = AgentConfig::default();
        assert_eq!(config.max_modules, 2);
        assert_eq!(config.max_call_args, 4);
        assert_eq!(config.stop_force_delay_ms, 1_200);
        assert_eq!(config.default_entry_point, "app_main");
    }

    #[test]
    fn from_env_overrides_only_present_vars() {
        std::env::set_var("AGENT_DEVICE_ID", "test_device");
        std::env::remove_var("AGENT_MAX_MODULES");
        let config = AgentConfig::from_env();
        assert_eq!(config.device_id, "test_device");
        assert_eq!(config.max_modules, 2);
        std::env::remove_var("AGENT_DEVICE_ID");
    }
}
