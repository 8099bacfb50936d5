use std::{env, path::PathBuf};

use anyhow::{Context, Result, bail};
use wasmtime::{Caller, Config, Engine, Extern, Linker, Module, Store};
use wasmtime_wasi::{
    I32Exit, WasiCtxBuilder,
    preview1::{self as p1, WasiP1Ctx},
};

use crate::{
    loader,
    shim::{Dispatcher, ShimConfig},
};

/// Import namespace the guest's socket functions live under.
pub const IMPORT_MODULE: &str = "posix_sockets";

pub const SOCKET_IMPORTS: [&str; 9] = [
    "socket", "connect", "send", "recv", "close", "bind", "listen", "accept", "shutdown",
];

pub const ENTRY_POINT: &str = "_start";

/// Store data that can hand out the instance's socket shim.
pub trait SocketView {
    fn sockets(&self) -> &Dispatcher;
}

/// Per-instance state: the WASI context and this guest's own socket table.
pub struct HostState {
    wasi: WasiP1Ctx,
    sockets: Dispatcher,
}

impl SocketView for HostState {
    fn sockets(&self) -> &Dispatcher {
        &self.sockets
    }
}

/// How a guest run ended.
#[derive(Debug)]
pub enum GuestExit {
    /// `_start` returned (0) or the guest called `proc_exit`.
    Exited(i32),
    /// No callable `_start` export.
    MissingEntry,
    Trapped(anyhow::Error),
}

impl GuestExit {
    pub fn code(&self) -> i32 {
        match self {
            GuestExit::Exited(code) => *code,
            GuestExit::MissingEntry | GuestExit::Trapped(_) => 1,
        }
    }
}

/// Everything needed to run one guest.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub module: PathBuf,
    pub args: Vec<String>,
    pub shim: ShimConfig,
}

impl RunConfig {
    /// Build a config, applying `SOCKBRIDGE_FD_BASE` and
    /// `SOCKBRIDGE_REUSEADDR` overrides from the environment.
    pub fn from_env(module: PathBuf, args: Vec<String>) -> Result<Self> {
        let mut shim = ShimConfig::default();

        if let Ok(base) = env::var("SOCKBRIDGE_FD_BASE") {
            let base: i32 = base
                .parse()
                .with_context(|| format!("SOCKBRIDGE_FD_BASE={base:?} is not a number"))?;
            if base < 0 {
                bail!("SOCKBRIDGE_FD_BASE must not be negative (got {base})");
            }
            shim.fd_base = base;
        }
        if let Ok(reuse) = env::var("SOCKBRIDGE_REUSEADDR") {
            shim.reuse_addr = !matches!(reuse.as_str(), "0" | "false" | "no" | "off");
        }

        Ok(Self { module, args, shim })
    }

    /// Guest argv: the module path followed by the guest's own arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.module.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Register the nine socket functions under `posix_sockets`.
pub fn add_to_linker<T: SocketView + 'static>(linker: &mut Linker<T>) -> Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "socket",
        |caller: Caller<'_, T>, domain: i32, ty: i32, protocol: i32| -> i32 {
            caller.data().sockets().socket(domain, ty, protocol)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "connect",
        |mut caller: Caller<'_, T>, fd: i32, addr_ptr: i32, addr_len: i32| -> i32 {
            with_memory(&mut caller, |sockets, mem| {
                sockets.connect(&*mem, fd, addr_ptr, addr_len)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "send",
        |mut caller: Caller<'_, T>, fd: i32, buf_ptr: i32, len: i32, flags: i32| -> i32 {
            with_memory(&mut caller, |sockets, mem| {
                sockets.send(&*mem, fd, buf_ptr, len, flags)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "recv",
        |mut caller: Caller<'_, T>, fd: i32, buf_ptr: i32, len: i32, flags: i32| -> i32 {
            with_memory(&mut caller, |sockets, mem| {
                sockets.recv(mem, fd, buf_ptr, len, flags)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "close",
        |caller: Caller<'_, T>, fd: i32| -> i32 { caller.data().sockets().close(fd) },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bind",
        |mut caller: Caller<'_, T>, fd: i32, addr_ptr: i32, addr_len: i32| -> i32 {
            with_memory(&mut caller, |sockets, mem| {
                sockets.bind(&*mem, fd, addr_ptr, addr_len)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "listen",
        |caller: Caller<'_, T>, fd: i32, backlog: i32| -> i32 {
            caller.data().sockets().listen(fd, backlog)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "accept",
        |mut caller: Caller<'_, T>, fd: i32, addr_ptr: i32, addrlen_ptr: i32| -> i32 {
            with_memory(&mut caller, |sockets, mem| {
                sockets.accept(mem, fd, addr_ptr, addrlen_ptr)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "shutdown",
        |caller: Caller<'_, T>, fd: i32, how: i32| -> i32 {
            caller.data().sockets().shutdown(fd, how)
        },
    )?;
    Ok(())
}

/// Lend the shim the guest's exported memory for one call. A guest without
/// an exported `memory` gets an empty view, so every pointer is out of bounds.
fn with_memory<T, R, F>(caller: &mut Caller<'_, T>, f: F) -> R
where
    T: SocketView + 'static,
    F: FnOnce(&Dispatcher, &mut [u8]) -> R,
{
    match caller.get_export("memory").and_then(Extern::into_memory) {
        Some(memory) => {
            let (data, state) = memory.data_and_store_mut(&mut *caller);
            f(state.sockets(), data)
        }
        None => f(caller.data().sockets(), &mut []),
    }
}

/// Loads guests and runs each in its own store with its own socket table.
pub struct GuestRunner {
    engine: Engine,
}

impl GuestRunner {
    pub fn new() -> Result<Self> {
        let engine = Engine::new(&Config::new()).context("creating wasm engine")?;
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn load(&self, config: &RunConfig) -> Result<Module> {
        loader::load_module(&self.engine, &config.module)
    }

    pub fn run(&self, module: &Module, argv: &[String], shim: &ShimConfig) -> Result<GuestExit> {
        if !loader::has_entry_point(module) {
            return Ok(GuestExit::MissingEntry);
        }

        let mut builder = WasiCtxBuilder::new();
        builder.inherit_stdio().args(argv);
        let state = HostState {
            wasi: builder.build_p1(),
            sockets: Dispatcher::new(shim),
        };

        let mut store = Store::new(&self.engine, state);
        let mut linker = Linker::new(&self.engine);
        p1::add_to_linker_sync(&mut linker, |state: &mut HostState| &mut state.wasi)?;
        add_to_linker(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, module)
            .context("instantiating guest module")?;
        let Ok(start) = instance.get_typed_func::<(), ()>(&mut store, ENTRY_POINT) else {
            return Ok(GuestExit::MissingEntry);
        };

        let exit = match start.call(&mut store, ()) {
            Ok(()) => GuestExit::Exited(0),
            Err(err) => match err.downcast_ref::<I32Exit>() {
                Some(I32Exit(code)) => GuestExit::Exited(*code),
                None => GuestExit::Trapped(err),
            },
        };

        let leaked = store.data().sockets.open_descriptors();
        if leaked > 0 {
            log::debug!("guest exited with {leaked} sockets open; closing them");
        }
        Ok(exit)
    }
}
