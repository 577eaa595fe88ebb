//! Shared guest invocation on the Wasm substrate.
//!
//! Both execution families run WASI command modules: the script family runs
//! the script-engine wasm inside a per-run store, the Python family runs the
//! interpreter wasm on the long-lived runtime engine. This module holds the
//! invocation path they share: store setup, resource limiting, WASI linking
//! and error mapping.

pub mod io;
pub mod limits;

use std::path::Path;

use wasmtime::{Engine, Linker, Module, Store};
use wasmtime_wasi::pipe::MemoryOutputPipe;
use wasmtime_wasi::preview1;
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

use crate::error::{Result, SandboxError};
use self::limits::StoreData;

/// Compile an interpreter module from disk.
pub fn compile_module(engine: &Engine, path: &Path) -> Result<Module> {
    let wasm_bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SandboxError::InterpreterNotFound(path.display().to_string())
        } else {
            SandboxError::Io(e)
        }
    })?;

    Module::new(engine, &wasm_bytes)
        .map_err(|e| SandboxError::ModuleLoad(anyhow::anyhow!("failed to compile module: {}", e)))
}

/// Run a WASI command module to completion on the current thread.
///
/// The guest gets no preopened directories, no network and no host
/// environment; its only observable effects are the bytes it writes to the
/// provided pipes and its exit code. When `epoch_deadline` is set the store
/// traps on the next engine epoch increment past the deadline, which is how
/// grace-period teardown interrupts a running script context.
pub fn run_guest(
    engine: &Engine,
    module: &Module,
    argv: &[String],
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
    max_memory: u64,
    epoch_deadline: Option<u64>,
) -> Result<i32> {
    let wasi_ctx = WasiCtxBuilder::new()
        .args(argv)
        .stdout(stdout)
        .stderr(stderr)
        .build_p1();

    let store_data = StoreData::new(max_memory, wasi_ctx);
    let mut store = Store::new(engine, store_data);
    store.limiter(|data| &mut data.limiter);

    if let Some(deadline) = epoch_deadline {
        store.epoch_deadline_trap();
        store.set_epoch_deadline(deadline);
    }

    let mut linker = Linker::new(engine);
    preview1::add_to_linker_sync(&mut linker, |data: &mut StoreData| &mut data.wasi)
        .map_err(|e| SandboxError::RuntimeInit(anyhow::anyhow!("failed to link WASI: {}", e)))?;

    let instance = linker.instantiate(&mut store, module).map_err(|e| {
        if store.data().limiter.limit_exceeded() {
            return SandboxError::MemoryLimitExceeded(
                "memory limit exceeded during instantiation".to_string(),
            );
        }
        SandboxError::ModuleLoad(anyhow::anyhow!("failed to instantiate: {}", e))
    })?;

    let start = instance
        .get_typed_func::<(), ()>(&mut store, "_start")
        .map_err(|e| {
            SandboxError::ModuleLoad(anyhow::anyhow!("failed to get _start function: {}", e))
        })?;

    match start.call(&mut store, ()) {
        Ok(()) => Ok(0),
        Err(e) => {
            if store.data().limiter.limit_exceeded() {
                return Err(SandboxError::MemoryLimitExceeded(
                    "memory limit exceeded during execution".to_string(),
                ));
            }

            // Epoch traps are teardown, not user-visible failures.
            let text = e.to_string();
            if text.contains("epoch") || text.contains("interrupt") {
                return Err(SandboxError::Interrupted);
            }

            if let Some(exit) = e.downcast_ref::<I32Exit>() {
                Ok(exit.0)
            } else {
                Err(SandboxError::ExecutionFailed(text))
            }
        }
    }
}
