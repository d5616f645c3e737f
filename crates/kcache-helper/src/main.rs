//! kcache-helper entrypoint
//!
//! Usage: kcache-helper <target_arch>
//!
//! Reads kernel source from stdin and writes the compiled code object to
//! stdout. The compiler command comes from the TOML file named by
//! `KCACHE_HELPER_CONFIG`.

use std::path::PathBuf;
use std::process::ExitCode;

use kcache_helper::{fail, load_backend, run, HelperStatus, CONFIG_ENV};

fn main() -> ExitCode {
    kcache::logging::init("warn");

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 || args[1].is_empty() || args[1].starts_with('-') {
        eprintln!("Usage: kcache-helper <target_arch>");
        eprintln!();
        eprintln!("Compiles kernel source read from stdin and writes the code object to stdout.");
        return ExitCode::from(HelperStatus::Usage.code());
    }
    let target_arch = &args[1];

    let Some(config_path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from) else {
        let message = format!("{} is not set; no compiler configured", CONFIG_ENV);
        return ExitCode::from(fail(&mut std::io::stdout().lock(), &message).code());
    };

    let backend = match load_backend(&config_path) {
        Ok(backend) => backend,
        Err(e) => return ExitCode::from(fail(&mut std::io::stdout().lock(), &e.to_string()).code()),
    };

    ExitCode::from(run(&backend, target_arch).code())
}
