//! Slot Worker (C7): one task per slot, woken by the dispatcher whenever a
//! START request is queued, running the nine-step invoke loop from the
//! original firmware's `module_worker()` (kept across both the simple and
//! `firmware_2` variants: lookup, ensure exec_env, invoke, classify, reply,
//! reset) but rewritten around `tokio::sync::Notify` instead of `k_sem`.

use crate::protocol::ResultLine;
use crate::runtime::ModuleRuntime;
use crate::slots::table::{Slot, SlotState};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use crate::transport::ResponseWriter;

const EXEC_ENV_STACK_SIZE: u32 = 8 * 1024;

/// Runs until the task is aborted (by the stop-escalation timer) or the
/// agent shuts down. One iteration handles exactly one queued START.
pub async fn run_worker<W: AsyncWrite + Unpin + Send + 'static>(
    slot: Arc<Slot>,
    runtime: Arc<dyn ModuleRuntime>,
    writer: ResponseWriter<W>,
) {
    loop {
        slot.job_signal.notified().await;

        let request = {
            let mut inner = slot.inner.lock().await;
            match inner.pending_request.take() {
                Some(r) => r,
                None => continue,
            }
        };

        let (instance, cached_exec_env, module_id) = {
            let inner = slot.inner.lock().await;
            (
                inner.instance_handle,
                inner.exec_env_handle,
                inner.module_id.clone().unwrap_or_default(),
            )
        };

        let instance = match instance {
            Some(i) => i,
            None => {
                finish(&slot, SlotState::Loaded).await;
                continue;
            }
        };

        let function = runtime.lookup(instance, &request.func_name).await;
        let function = match function {
            Some(f) => f,
            None => {
                writer.write_line(&ResultLine::NoFunc.to_string()).await.ok();
                finish(&slot, SlotState::Loaded).await;
                continue;
            }
        };

        let exec_env = match cached_exec_env {
            Some(e) => e,
            None => match runtime.create_exec_env(instance, EXEC_ENV_STACK_SIZE).await {
                Ok(e) => {
                    slot.inner.lock().await.exec_env_handle = Some(e);
                    e
                }
                Err(_) => {
                    let free = runtime.heap_info().await.free;
                    writer
                        .write_line(&ResultLine::NoExecEnv { free: Some(free) }.to_string())
                        .await
                        .ok();
                    finish(&slot, SlotState::Loaded).await;
                    continue;
                }
            },
        };

        {
            let mut inner = slot.inner.lock().await;
            inner.state = SlotState::Running;
            inner.running_func = Some(request.func_name.clone());
        }

        let mut argv = request.argv.clone();
        let outcome = runtime.invoke(exec_env, function, &mut argv).await;

        let result = match outcome {
            Ok(()) => {
                let ret_i32 = if runtime.result_count(function, instance).await > 0 {
                    argv.first().copied()
                } else {
                    None
                };
                ResultLine::Ok {
                    module_id: module_id.clone(),
                    func: request.func_name.clone(),
                    ret_i32,
                }
            }
            Err(crate::error::InvokeError::Exception(msg)) => {
                warn!(%module_id, "module raised exception: {}", msg);
                ResultLine::Exception {
                    module_id: module_id.clone(),
                    func: request.func_name.clone(),
                    msg,
                }
            }
            Err(crate::error::InvokeError::Terminated) => {
                info!(%module_id, "module terminated on soft stop");
                ResultLine::Stopped {
                    module_id: module_id.clone(),
                    func: request.func_name.clone(),
                    msg: "terminated".to_string(),
                }
            }
        };

        writer.write_line(&result.to_string()).await.ok();

        slot.stop_requested.store(false, Ordering::SeqCst);
        slot.terminate_requested.store(false, Ordering::SeqCst);
        finish(&slot, SlotState::Loaded).await;
    }
}

async fn finish(slot: &Arc<Slot>, state: SlotState) {
    let mut inner = slot.inner.lock().await;
    inner.state = state;
    inner.running_func = None;
    let timer = inner.stop_timer.take();
    drop(inner);
    if let Some(handle) = timer {
        handle.abort();
    }
    slot.busy.store(false, Ordering::SeqCst);
}
