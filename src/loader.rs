use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use wasmtime::{Engine, ExternType, Module};

use crate::runtime::{ENTRY_POINT, IMPORT_MODULE, SOCKET_IMPORTS};

/// Read, compile and validate a guest module. Accepts binary wasm or WAT.
pub fn load_module(engine: &Engine, path: &Path) -> Result<Module> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    compile_module(engine, &bytes).with_context(|| format!("loading {}", path.display()))
}

pub fn compile_module(engine: &Engine, bytes: &[u8]) -> Result<Module> {
    let module = Module::new(engine, bytes)?;

    let mut socket_imports = 0;
    for import in module.imports() {
        if import.module() != IMPORT_MODULE {
            continue;
        }
        if !SOCKET_IMPORTS.contains(&import.name()) {
            bail!(
                "module imports unknown function {}::{}",
                IMPORT_MODULE,
                import.name()
            );
        }
        if !matches!(import.ty(), ExternType::Func(_)) {
            bail!("{}::{} must be imported as a function", IMPORT_MODULE, import.name());
        }
        socket_imports += 1;
    }
    log::debug!("module imports {socket_imports} {IMPORT_MODULE} functions");

    Ok(module)
}

/// True if the module exports a `_start` function.
pub fn has_entry_point(module: &Module) -> bool {
    module
        .exports()
        .any(|export| export.name() == ENTRY_POINT && matches!(export.ty(), ExternType::Func(_)))
}
