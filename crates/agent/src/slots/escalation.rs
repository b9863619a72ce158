//! Stop Escalation Timer (C8): a delayed one-shot that forcibly reclaims a
//! slot whose worker did not honor a soft STOP in time. Ported from
//! `stop_dwork_handler()` in the `firmware_2` original: re-check
//! preconditions under the load mutex, abort the worker, destroy and
//! re-instantiate from the retained module handle, recreate the worker, and
//! report `RESULT status=STOPPED forced=1`.

use crate::protocol::ResultLine;
use crate::runtime::ModuleRuntime;
use crate::slots::table::{Slot, SlotState};
use crate::slots::worker::run_worker;
use crate::slots::SlotTable;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::warn;

use crate::transport::ResponseWriter;

const INSTANTIATE_STACK_SIZE: u32 = 8 * 1024;
const INSTANTIATE_HEAP_SIZE: u32 = 8 * 1024;
const EXEC_ENV_STACK_SIZE: u32 = 8 * 1024;

/// Spawn the escalation timer for a slot that just received STOP. Returns
/// the task handle so the caller can store it on the slot and abort it
/// early if the worker finishes on its own before the delay elapses.
pub fn spawn_stop_timer<W: AsyncWrite + Unpin + Send + 'static>(
    slot: Arc<Slot>,
    runtime: Arc<dyn ModuleRuntime>,
    writer: ResponseWriter<W>,
    table: Arc<SlotTable>,
    delay_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        let _load_guard = table.load_mutex.lock().await;

        if !slot.busy.load(Ordering::SeqCst) {
            // Worker already finished (soft stop landed in time); nothing to escalate.
            return;
        }

        let (module_id, func_name) = {
            let inner = slot.inner.lock().await;
            (
                inner.module_id.clone().unwrap_or_default(),
                inner.running_func.clone().unwrap_or_else(|| "unknown".to_string()),
            )
        };
        warn!(%module_id, "soft stop did not land in time, forcing abort");

        let (worker_task, module_handle, old_instance, old_exec_env) = {
            let mut inner = slot.inner.lock().await;
            (
                inner.worker_task.take(),
                inner.module_handle,
                inner.instance_handle.take(),
                inner.exec_env_handle.take(),
            )
        };

        if let Some(handle) = worker_task {
            handle.abort();
        }

        if let Some(exec_env) = old_exec_env {
            runtime.destroy_exec_env(exec_env).await;
        }
        if let Some(instance) = old_instance {
            runtime.destroy_instance(instance).await;
        }

        let module_handle = match module_handle {
            Some(m) => m,
            None => {
                // No retained module handle (should not happen once LOADED);
                // leave the slot reset to LOADED-without-instance so a
                // subsequent START reports NO_EXEC_ENV rather than panicking.
                finalize_forced(&module_id, &func_name, &writer).await;
                return;
            }
        };

        let new_instance = runtime
            .instantiate(module_handle, INSTANTIATE_STACK_SIZE, INSTANTIATE_HEAP_SIZE)
            .await
            .ok();
        let new_exec_env = match new_instance {
            Some(instance) => runtime.create_exec_env(instance, EXEC_ENV_STACK_SIZE).await.ok(),
            None => None,
        };

        {
            let mut inner = slot.inner.lock().await;
            inner.instance_handle = new_instance;
            inner.exec_env_handle = new_exec_env;
            inner.state = SlotState::Loaded;
            inner.stop_timer = None;
        }

        slot.busy.store(false, Ordering::SeqCst);
        slot.stop_requested.store(false, Ordering::SeqCst);
        slot.terminate_requested.store(false, Ordering::SeqCst);

        if new_instance.is_some() {
            let worker_handle = tokio::spawn(run_worker(
                Arc::clone(&slot),
                Arc::clone(&runtime),
                writer.clone(),
            ));
            slot.inner.lock().await.worker_task = Some(worker_handle);
        }

        finalize_forced(&module_id, &func_name, &writer).await;
    })
}

async fn finalize_forced<W: AsyncWrite + Unpin + Send + 'static>(
    module_id: &str,
    func: &str,
    writer: &ResponseWriter<W>,
) {
    writer
        .write_line(
            &ResultLine::StoppedForced {
                module_id: module_id.to_string(),
                func: func.to_string(),
            }
            .to_string(),
        )
        .await
        .ok();
}
