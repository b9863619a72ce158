//! Command Dispatcher (C6): the single task that parses LOAD/START/STOP/
//! STATUS lines and drives the slot table. Grounded on `ShellExecutor`'s
//! single-consumer command loop (`apps/daemon/src/qemu/shell_executor.rs`)
//! generalized from "one shell command at a time" to this protocol's four
//! verbs, and on `handle_load_cmd`/`handle_start_cmd`/`handle_stop_cmd`/
//! `handle_status_cmd` in the `firmware_2` original for the exact admission
//! rules.

use crate::config::AgentConfig;
use crate::native::NativeCapabilities;
use crate::protocol::crc32::{crc32_hex, crc32_ieee};
use crate::protocol::response::{LoadErrorCode, StartStatus, StopStatus};
use crate::protocol::{Command, Frame, FrameDecoder, ResultLine};
use crate::runtime::ModuleRuntime;
use crate::slots::table::{PendingRequest, SlotState};
use crate::slots::worker::run_worker;
use crate::slots::{escalation, SlotTable};
use crate::transport::ResponseWriter;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::instrument;

pub struct Dispatcher<W> {
    config: Arc<AgentConfig>,
    table: Arc<SlotTable>,
    runtime: Arc<dyn ModuleRuntime>,
    writer: ResponseWriter<W>,
    /// Held so a concrete `ModuleRuntime` can be constructed with these
    /// host-function callbacks wired into its import linking step; the
    /// mock runtime used in this crate's tests does not call back into it.
    #[allow(dead_code)]
    native: NativeCapabilities<W>,
    decoder: FrameDecoder,
}

impl<W: AsyncWrite + Unpin + Send + 'static> Dispatcher<W> {
    pub fn new(
        config: Arc<AgentConfig>,
        table: Arc<SlotTable>,
        runtime: Arc<dyn ModuleRuntime>,
        writer: ResponseWriter<W>,
        native: NativeCapabilities<W>,
    ) -> Self {
        let line_buf_size = config.line_buf_size;
        Self {
            config,
            table,
            runtime,
            writer,
            native,
            decoder: FrameDecoder::new(line_buf_size),
        }
    }

    pub async fn emit_hello(&self) {
        let line = format!(
            "HELLO device_id={} rtos={} runtime={} fw_version={}",
            self.config.device_id,
            self.config.rtos_name,
            self.config.runtime_name,
            env!("CARGO_PKG_VERSION")
        );
        self.writer.write_line(&line).await.ok();
    }

    /// Drain `reader` byte by byte, dispatching one completed line at a time.
    /// Mirrors a single COMM task reading off the UART; unsolicited binary
    /// frames (no pending LOAD armed them) are silently dropped.
    pub async fn run<R: AsyncRead + Unpin>(&mut self, mut reader: R) {
        self.emit_hello().await;
        loop {
            match next_frame(&mut reader, &mut self.decoder).await {
                Ok(Frame::Line(line)) => self.handle_line(&mut reader, &line).await,
                Ok(Frame::Binary(_)) => {}
                Err(_) => return,
            }
        }
    }

    #[instrument(skip(self, reader, line))]
    async fn handle_line<R: AsyncRead + Unpin>(&mut self, reader: &mut R, line: &str) {
        match crate::protocol::command::parse_line(line, self.config.max_call_args) {
            Command::Load {
                module_id,
                size,
                crc32,
                replace,
                replace_victim,
            } => {
                self.handle_load(reader, module_id, size, crc32, replace, replace_victim)
                    .await
            }
            Command::Start {
                module_id,
                func,
                args,
            } => self.handle_start(module_id, func, args).await,
            Command::Stop { module_id } => self.handle_stop(module_id).await,
            Command::Status => self.handle_status().await,
            Command::LoadBadParams => {
                self.load_err(LoadErrorCode::BadParams).await;
            }
            Command::Unknown => {
                self.writer.write_line("ERROR code=UNKNOWN_COMMAND").await.ok();
            }
        }
    }

    async fn handle_load<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        module_id: String,
        size: usize,
        crc32_hex_expected: String,
        replace: bool,
        replace_victim: Option<String>,
    ) {
        if module_id.is_empty()
            || module_id.len() > self.config.max_module_id_len
            || size == 0
        {
            self.load_err(LoadErrorCode::BadParams).await;
            return;
        }

        let _load_guard = self.table.load_mutex.lock().await;

        let mut warn_victim_ignored = false;

        if let Some(existing) = self.table.find_by_module_id(&module_id).await {
            let busy = existing.busy.load(Ordering::SeqCst);
            if busy && !replace {
                self.load_err(LoadErrorCode::Busy).await;
                return;
            }
            if busy && replace {
                self.force_abort_slot(&existing).await;
            }
            if replace_victim.is_some() {
                warn_victim_ignored = true;
            }
        } else if self.table.is_full().await {
            match &replace_victim {
                None => {
                    self.load_err(LoadErrorCode::Full { msg: "NEED_VICTIM" }).await;
                    return;
                }
                Some(victim_id) => {
                    let victim = match self.table.find_by_module_id(victim_id).await {
                        Some(v) => v,
                        None => {
                            self.load_err(LoadErrorCode::BadVictim).await;
                            return;
                        }
                    };
                    if victim.busy.load(Ordering::SeqCst) && !replace {
                        self.load_err(LoadErrorCode::BadVictim).await;
                        return;
                    }
                    self.force_abort_slot(&victim).await;
                    self.evict_slot(&victim).await;
                }
            }
        } else if replace_victim.is_some() {
            // A free slot exists already; the caller's victim hint was unnecessary.
            warn_victim_ignored = true;
        }

        let heap = self.runtime.heap_info().await;
        if (heap.free as usize) < size {
            self.load_err(LoadErrorCode::NoMem).await;
            return;
        }

        self.writer
            .write_line(&format!(
                "LOAD_READY module_id={} size={} crc32={}",
                module_id,
                size,
                crc32_hex_expected.to_lowercase()
            ))
            .await
            .ok();

        self.decoder.arm_binary(size);
        let payload = tokio::time::timeout(
            Duration::from_millis(self.config.binary_payload_timeout_ms),
            next_frame(reader, &mut self.decoder),
        )
        .await;

        let bytes = match payload {
            Err(_) => {
                self.decoder.disarm_binary();
                self.load_err(LoadErrorCode::Timeout).await;
                return;
            }
            Ok(Err(_)) => return,
            Ok(Ok(Frame::Line(_))) => {
                self.load_err(LoadErrorCode::Timeout).await;
                return;
            }
            Ok(Ok(Frame::Binary(bytes))) => bytes,
        };

        let computed = crc32_hex(crc32_ieee(&bytes));
        if computed != crc32_hex_expected.to_lowercase() {
            self.load_err(LoadErrorCode::BadCrc {
                expected: crc32_hex_expected,
                got: computed,
            })
            .await;
            return;
        }

        let module_handle = match self.runtime.load(&bytes).await {
            Ok(h) => h,
            Err(e) => {
                self.load_err(LoadErrorCode::LoadFail { msg: e.to_string() }).await;
                return;
            }
        };

        let instance_handle = match self
            .runtime
            .instantiate(module_handle, 8 * 1024, self.config.load_guard_bytes)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                self.runtime.destroy_module(module_handle).await;
                self.load_err(LoadErrorCode::InstantiateFail { msg: e.to_string() })
                    .await;
                return;
            }
        };

        let slot = match self.table.find_by_module_id(&module_id).await {
            Some(s) => s,
            None => match self.table.find_free().await {
                Some(s) => s,
                None => {
                    self.load_err(LoadErrorCode::NoSlot).await;
                    return;
                }
            },
        };

        {
            let mut inner = slot.inner.lock().await;
            inner.used = true;
            inner.module_id = Some(module_id.clone());
            inner.state = SlotState::Loaded;
            inner.bytecode = Some(bytes);
            inner.module_handle = Some(module_handle);
            inner.instance_handle = Some(instance_handle);
            inner.exec_env_handle = None;
        }
        slot.busy.store(false, Ordering::SeqCst);

        let worker_handle = tokio::spawn(run_worker(
            Arc::clone(&slot),
            Arc::clone(&self.runtime),
            self.writer.clone(),
        ));
        slot.inner.lock().await.worker_task = Some(worker_handle);

        if warn_victim_ignored {
            self.writer
                .write_line(&format!(
                    "LOAD_OK warn=VICTIM_IGNORED replace_victim={}",
                    replace_victim.unwrap_or_default()
                ))
                .await
                .ok();
        } else {
            self.writer.write_line("LOAD_OK").await.ok();
        }
    }

    async fn load_err(&self, code: LoadErrorCode) {
        self.writer.write_line(&format!("LOAD_ERR code={}", code)).await.ok();
    }

    async fn force_abort_slot(&self, slot: &Arc<crate::slots::Slot>) {
        let (worker, instance, exec_env, module) = {
            let mut inner = slot.inner.lock().await;
            (
                inner.worker_task.take(),
                inner.instance_handle.take(),
                inner.exec_env_handle.take(),
                inner.module_handle.take(),
            )
        };
        if let Some(handle) = worker {
            handle.abort();
        }
        if let Some(e) = exec_env {
            self.runtime.destroy_exec_env(e).await;
        }
        if let Some(i) = instance {
            self.runtime.destroy_instance(i).await;
        }
        if let Some(m) = module {
            self.runtime.destroy_module(m).await;
        }
        slot.busy.store(false, Ordering::SeqCst);
    }

    async fn evict_slot(&self, slot: &Arc<crate::slots::Slot>) {
        let mut inner = slot.inner.lock().await;
        inner.used = false;
        inner.module_id = None;
        inner.state = SlotState::Empty;
        inner.bytecode = None;
    }

    async fn handle_start(&self, module_id: String, func: Option<String>, args: Vec<(String, u32)>) {
        let slot = match self.table.find_by_module_id(&module_id).await {
            Some(s) => s,
            None => {
                self.writer
                    .write_line(&ResultLine::StartRejected(StartStatus::NoModule).to_string())
                    .await
                    .ok();
                return;
            }
        };

        if slot.busy.load(Ordering::SeqCst) {
            self.writer
                .write_line(&ResultLine::StartRejected(StartStatus::Busy).to_string())
                .await
                .ok();
            return;
        }

        let defaulted = func.is_none();
        let func_name = func.unwrap_or_else(|| self.config.default_entry_point.clone());

        let (instance, has_exec_env) = {
            let inner = slot.inner.lock().await;
            (inner.instance_handle, inner.exec_env_handle.is_some())
        };
        let instance = match instance {
            Some(i) => i,
            None => {
                self.writer
                    .write_line(&ResultLine::StartRejected(StartStatus::NoModule).to_string())
                    .await
                    .ok();
                return;
            }
        };

        // Only the defaulted entry point is checked eagerly: an explicit but
        // unresolvable `func` is not NO_ENTRYPOINT, it's NO_FUNC, and must be
        // queued to the worker to produce that reply (spec.md's NO_ENTRYPOINT
        // is reserved for "app_main absent and func also omitted").
        if defaulted && self.runtime.lookup(instance, &func_name).await.is_none() {
            self.writer
                .write_line(&ResultLine::StartRejected(StartStatus::NoEntrypoint).to_string())
                .await
                .ok();
            return;
        }

        let heap = self.runtime.heap_info().await;
        let guard = if has_exec_env {
            self.config.start_guard_bytes_have_exec_env
        } else {
            self.config.start_guard_bytes_need_exec_env
        };
        if heap.free < guard {
            self.writer
                .write_line(&ResultLine::StartRejected(StartStatus::NoMem { free: heap.free }).to_string())
                .await
                .ok();
            return;
        }

        let mut argv: Vec<u32> = args.into_iter().map(|(_, v)| v).collect();
        argv.resize(self.config.max_call_args, 0);

        {
            let mut inner = slot.inner.lock().await;
            inner.pending_request = Some(PendingRequest {
                func_name,
                argv,
            });
            inner.state = SlotState::Running;
        }
        slot.busy.store(true, Ordering::SeqCst);
        slot.job_signal.notify_one();

        self.writer.write_line("START_OK").await.ok();
    }

    async fn handle_stop(&self, module_id: String) {
        let slot = match self.table.find_by_module_id(&module_id).await {
            Some(s) => s,
            None => {
                self.writer
                    .write_line(&format!("STOP_OK status={}", StopStatus::NoJob))
                    .await
                    .ok();
                return;
            }
        };

        if !slot.busy.load(Ordering::SeqCst) {
            self.writer
                .write_line(&format!("STOP_OK status={}", StopStatus::Idle))
                .await
                .ok();
            return;
        }

        slot.stop_requested.store(true, Ordering::SeqCst);
        slot.terminate_requested.store(true, Ordering::SeqCst);

        let instance = slot.inner.lock().await.instance_handle;
        if let Some(instance) = instance {
            self.runtime.terminate(instance).await;
        }

        let timer = escalation::spawn_stop_timer(
            Arc::clone(&slot),
            Arc::clone(&self.runtime),
            self.writer.clone(),
            Arc::clone(&self.table),
            self.config.stop_force_delay_ms,
        );
        slot.inner.lock().await.stop_timer = Some(timer);

        self.writer
            .write_line(&format!("STOP_OK status={}", StopStatus::Pending))
            .await
            .ok();
    }

    async fn handle_status(&self) {
        let heap = self.runtime.heap_info().await;
        let line = crate::status::build_status_line(
            &self.table,
            heap,
            self.config.low_stack_threshold_bytes,
        )
        .await;
        self.writer.write_line(&line).await.ok();
    }
}

async fn next_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
) -> std::io::Result<Frame> {
    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        }
        if let Some(frame) = decoder.feed(byte[0]) {
            return Ok(frame);
        }
    }
}
