//! Module Runtime Adapter (C3): an abstract interface over a wasm sandbox
//! runtime. This crate does not bundle a concrete wasm engine -- the choice
//! of AOT vs interpreter is explicitly out of scope -- only the trait and a
//! test double (`mock::MockRuntime`) live here.

pub mod mock;

use crate::error::{InvokeError, RuntimeError};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub u64);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecEnvHandle(pub u64);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapInfo {
    pub total: u32,
    pub free: u32,
    pub used: u32,
    pub highmark: u32,
}

/// Abstract interface over a module sandbox runtime: load, instantiate,
/// resolve and invoke exported functions, and tear everything back down.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    async fn load(&self, bytes: &[u8]) -> Result<ModuleHandle, RuntimeError>;
    async fn instantiate(
        &self,
        module: ModuleHandle,
        stack_size: u32,
        heap_size: u32,
    ) -> Result<InstanceHandle, RuntimeError>;
    async fn create_exec_env(
        &self,
        instance: InstanceHandle,
        stack_size: u32,
    ) -> Result<ExecEnvHandle, RuntimeError>;
    async fn lookup(&self, instance: InstanceHandle, name: &str) -> Option<FunctionHandle>;
    async fn result_count(&self, function: FunctionHandle, instance: InstanceHandle) -> u32;
    async fn invoke(
        &self,
        exec_env: ExecEnvHandle,
        function: FunctionHandle,
        argv: &mut [u32],
    ) -> Result<(), InvokeError>;
    async fn get_exception(&self, instance: InstanceHandle) -> Option<String>;
    async fn clear_exception(&self, instance: InstanceHandle);
    async fn terminate(&self, instance: InstanceHandle);
    async fn destroy_exec_env(&self, exec_env: ExecEnvHandle);
    async fn destroy_instance(&self, instance: InstanceHandle);
    async fn destroy_module(&self, module: ModuleHandle);
    async fn init_thread_env(&self);
    async fn destroy_thread_env(&self);
    async fn heap_info(&self) -> HeapInfo;
}
