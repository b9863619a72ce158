//! Test double for [`ModuleRuntime`], in the style of this workspace's
//! interchangeable-backend mocks (`crates/testing/src/backends/mock_npu_backend.rs`):
//! a builder-registered table of named "modules" with scripted function
//! behaviors, so tests can exercise the worker loop, stop escalation and
//! exception classification without a real wasm engine.

use super::{ExecEnvHandle, FunctionHandle, HeapInfo, InstanceHandle, ModuleHandle, ModuleRuntime};
use crate::error::{InvokeError, RuntimeError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Scripted behavior for a single exported function of a mock module.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Returns immediately, optionally writing a result into argv[0].
    ReturnOk(Option<u32>),
    /// Raises a trap classified as an exception.
    Exception(String),
    /// Loops cooperatively, checking for `terminate()` on every iteration
    /// (models `toggle_forever`-style modules that check an interrupt flag).
    LoopUntilTerminated,
    /// Loops forever, never observing `terminate()` (models a module
    /// blocked in an uninterruptible native call -- requires a hard abort).
    LoopForever,
}

#[derive(Default)]
struct ModuleSpec {
    functions: HashMap<String, MockBehavior>,
}

pub struct MockRuntime {
    registered: Mutex<HashMap<String, ModuleSpec>>,
    modules: Mutex<HashMap<ModuleHandle, String>>,
    instances: Mutex<HashMap<InstanceHandle, ModuleHandle>>,
    functions: Mutex<HashMap<FunctionHandle, (InstanceHandle, MockBehavior)>>,
    exceptions: Mutex<HashMap<InstanceHandle, String>>,
    terminated: Mutex<HashSet<InstanceHandle>>,
    heap: Mutex<HeapInfo>,
    next_id: AtomicU64,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            registered: Mutex::new(HashMap::new()),
            modules: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            exceptions: Mutex::new(HashMap::new()),
            terminated: Mutex::new(HashSet::new()),
            heap: Mutex::new(HeapInfo {
                total: 216 * 1024,
                free: 216 * 1024,
                used: 0,
                highmark: 0,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a module by name (the bytes passed to `load` are interpreted
    /// as this name, UTF-8 encoded) with the named function behaviors it exports.
    pub fn register_module(&self, name: &str, functions: Vec<(&str, MockBehavior)>) {
        let mut spec = ModuleSpec::default();
        for (fname, behavior) in functions {
            spec.functions.insert(fname.to_string(), behavior);
        }
        self.registered.lock().unwrap().insert(name.to_string(), spec);
    }

    pub fn set_heap_free(&self, free: u32) {
        self.heap.lock().unwrap().free = free;
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleRuntime for MockRuntime {
    async fn load(&self, bytes: &[u8]) -> Result<ModuleHandle, RuntimeError> {
        let name = String::from_utf8(bytes.to_vec())
            .map_err(|_| RuntimeError::LoadFailed("non-utf8 module name in mock".to_string()))?;
        if !self.registered.lock().unwrap().contains_key(&name) {
            return Err(RuntimeError::LoadFailed(format!("unknown mock module {}", name)));
        }
        let handle = ModuleHandle(self.next());
        self.modules.lock().unwrap().insert(handle, name);
        Ok(handle)
    }

    async fn instantiate(
        &self,
        module: ModuleHandle,
        _stack_size: u32,
        _heap_size: u32,
    ) -> Result<InstanceHandle, RuntimeError> {
        if !self.modules.lock().unwrap().contains_key(&module) {
            return Err(RuntimeError::InstantiateFailed("unknown module handle".to_string()));
        }
        let handle = InstanceHandle(self.next());
        self.instances.lock().unwrap().insert(handle, module);
        Ok(handle)
    }

    async fn create_exec_env(
        &self,
        instance: InstanceHandle,
        _stack_size: u32,
    ) -> Result<ExecEnvHandle, RuntimeError> {
        if !self.instances.lock().unwrap().contains_key(&instance) {
            return Err(RuntimeError::NoExecEnv);
        }
        Ok(ExecEnvHandle(self.next()))
    }

    async fn lookup(&self, instance: InstanceHandle, name: &str) -> Option<FunctionHandle> {
        let module = *self.instances.lock().unwrap().get(&instance)?;
        let module_name = self.modules.lock().unwrap().get(&module)?.clone();
        let registered = self.registered.lock().unwrap();
        let spec = registered.get(&module_name)?;
        let behavior = spec.functions.get(name)?.clone();
        drop(registered);
        let handle = FunctionHandle(self.next());
        self.functions.lock().unwrap().insert(handle, (instance, behavior));
        Some(handle)
    }

    async fn result_count(&self, function: FunctionHandle, _instance: InstanceHandle) -> u32 {
        match self.functions.lock().unwrap().get(&function) {
            Some((_, MockBehavior::ReturnOk(Some(_)))) => 1,
            _ => 0,
        }
    }

    async fn invoke(
        &self,
        _exec_env: ExecEnvHandle,
        function: FunctionHandle,
        argv: &mut [u32],
    ) -> Result<(), InvokeError> {
        let (instance, behavior) = self
            .functions
            .lock()
            .unwrap()
            .get(&function)
            .cloned()
            .expect("invoke called with unknown function handle");

        match behavior {
            MockBehavior::ReturnOk(ret) => {
                if let Some(v) = ret {
                    if let Some(slot) = argv.get_mut(0) {
                        *slot = v;
                    }
                }
                Ok(())
            }
            MockBehavior::Exception(msg) => {
                self.exceptions.lock().unwrap().insert(instance, msg.clone());
                Err(InvokeError::Exception(msg))
            }
            MockBehavior::LoopUntilTerminated => {
                loop {
                    if self.terminated.lock().unwrap().contains(&instance) {
                        return Err(InvokeError::Terminated);
                    }
                    tokio::task::yield_now().await;
                }
            }
            MockBehavior::LoopForever => loop {
                tokio::task::yield_now().await;
            },
        }
    }

    async fn get_exception(&self, instance: InstanceHandle) -> Option<String> {
        self.exceptions.lock().unwrap().get(&instance).cloned()
    }

    async fn clear_exception(&self, instance: InstanceHandle) {
        self.exceptions.lock().unwrap().remove(&instance);
    }

    async fn terminate(&self, instance: InstanceHandle) {
        self.terminated.lock().unwrap().insert(instance);
    }

    async fn destroy_exec_env(&self, _exec_env: ExecEnvHandle) {}

    async fn destroy_instance(&self, instance: InstanceHandle) {
        self.instances.lock().unwrap().remove(&instance);
        self.terminated.lock().unwrap().remove(&instance);
        self.exceptions.lock().unwrap().remove(&instance);
    }

    async fn destroy_module(&self, module: ModuleHandle) {
        self.modules.lock().unwrap().remove(&module);
    }

    async fn init_thread_env(&self) {}

    async fn destroy_thread_env(&self) {}

    async fn heap_info(&self) -> HeapInfo {
        *self.heap.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_unknown_module_fails() {
        let runtime = MockRuntime::new();
        let result = runtime.load(b"nonexistent").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn return_ok_writes_argv_and_result_count() {
        let runtime = MockRuntime::new();
        runtime.register_module("m", vec![("app_main", MockBehavior::ReturnOk(Some(42)))]);
        let module = runtime.load(b"m").await.unwrap();
        let instance = runtime.instantiate(module, 0, 0).await.unwrap();
        let exec_env = runtime.create_exec_env(instance, 0).await.unwrap();
        let func = runtime.lookup(instance, "app_main").await.unwrap();
        assert_eq!(runtime.result_count(func, instance).await, 1);
        let mut argv = [0u32; 1];
        runtime.invoke(exec_env, func, &mut argv).await.unwrap();
        assert_eq!(argv[0], 42);
    }

    #[tokio::test]
    async fn exception_is_recorded_and_returned() {
        let runtime = MockRuntime::new();
        runtime.register_module(
            "m",
            vec![("app_main", MockBehavior::Exception("div by zero".to_string()))],
        );
        let module = runtime.load(b"m").await.unwrap();
        let instance = runtime.instantiate(module, 0, 0).await.unwrap();
        let exec_env = runtime.create_exec_env(instance, 0).await.unwrap();
        let func = runtime.lookup(instance, "app_main").await.unwrap();
        let result = runtime.invoke(exec_env, func, &mut []).await;
        assert!(matches!(result, Err(InvokeError::Exception(_))));
        assert_eq!(runtime.get_exception(instance).await.as_deref(), Some("div by zero"));
    }

    #[tokio::test]
    async fn cooperative_loop_ends_after_terminate() {
        let runtime = MockRuntime::new();
        runtime.register_module(
            "m",
            vec![("toggle_forever", MockBehavior::LoopUntilTerminated)],
        );
        let module = runtime.load(b"m").await.unwrap();
        let instance = runtime.instantiate(module, 0, 0).await.unwrap();
        let exec_env = runtime.create_exec_env(instance, 0).await.unwrap();
        let func = runtime.lookup(instance, "toggle_forever").await.unwrap();

        runtime.terminate(instance).await;
        let result = runtime.invoke(exec_env, func, &mut []).await;
        assert!(matches!(result, Err(InvokeError::Terminated)));
    }
}
