use std::{
    env,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Result, bail};

use sockbridge::{GuestExit, GuestRunner, RunConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let result = run();
    // process::exit skips destructors; don't lose guest output.
    let _ = io::stdout().flush();

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let (module, args) = parse_args()?;
    let config = RunConfig::from_env(module, args)?;

    let runner = GuestRunner::new()?;
    let module = runner.load(&config)?;
    let exit = runner.run(&module, &config.argv(), &config.shim)?;

    match &exit {
        GuestExit::Exited(code) => log::debug!("guest exited with {code}"),
        GuestExit::MissingEntry => eprintln!("Error: module has no _start export"),
        GuestExit::Trapped(err) => eprintln!("wasm trap: {err:?}"),
    }
    Ok(exit.code())
}

fn parse_args() -> Result<(PathBuf, Vec<String>)> {
    let mut args = env::args().skip(1);
    match args.next() {
        Some(path) => Ok((PathBuf::from(path), args.collect())),
        None => bail!("expected path to a wasm module (usage: sockbridge <module.wasm> [args...])"),
    }
}
