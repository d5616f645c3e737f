//! kcache CLI
//!
//! Maintenance entry point for kernel cache files: inspect the resolved tiers,
//! list entries, export snapshots and merge them into a cache file.

use clap::{Parser, Subcommand};
use kcache::compile::SubprocessCompiler;
use kcache::{CacheSettings, OpenMode, PersistentStore, StoreLocation, TierManager};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "kcache")]
#[command(about = "JIT GPU kernel cache maintenance", version)]
struct Cli {
    /// Optional settings file (TOML); environment variables still override it
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show resolved cache tiers and effective settings
    Info {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List entries of a cache file
    List {
        /// Cache database file
        #[arg(long)]
        db: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Export a cache file as a snapshot
    Export {
        /// Cache database file
        #[arg(long)]
        db: PathBuf,

        /// Snapshot file to write
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// Merge snapshots into a cache file, creating it if needed
    Merge {
        /// Cache database file
        #[arg(long)]
        db: PathBuf,

        /// Snapshot files, merged in order
        #[arg(required = true)]
        snapshots: Vec<PathBuf>,
    },
}

fn main() {
    kcache::logging::init("warn");
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { json } => run_info(cli.config.as_deref(), json),
        Commands::List { db, json } => run_list(&db, json),
        Commands::Export { db, output } => run_export(&db, &output),
        Commands::Merge { db, snapshots } => run_merge(&db, &snapshots),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

fn load_settings(config_path: Option<&Path>) -> CacheSettings {
    match CacheSettings::load(config_path, |name| std::env::var(name).ok()) {
        Ok(settings) => settings,
        Err(e) => fail(e),
    }
}

fn open_existing(db: &Path, mode: OpenMode) -> PersistentStore {
    if !db.is_file() {
        fail(format!("cache file not found: {}", db.display()));
    }
    match PersistentStore::open(StoreLocation::File(db.to_path_buf()), mode) {
        Ok(store) => store,
        Err(e) => fail(e),
    }
}

fn run_info(config_path: Option<&Path>, json_output: bool) {
    let settings = load_settings(config_path);
    let tiers = match TierManager::open(&settings) {
        Ok(tiers) => tiers,
        Err(e) => fail(e),
    };
    let report = tiers.describe();
    let subprocess = SubprocessCompiler::from_settings(&settings);
    let helper = subprocess.helper_path().map(|p| p.display().to_string());

    if json_output {
        let output = serde_json::json!({
            "tiers": report,
            "helper": helper,
            "settings": settings,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => fail(format!("serializing output: {}", e)),
        }
        return;
    }

    let user_entries = tiers.user_store().len().ok();
    let sys_entries = tiers.sys_store().and_then(|s| s.len().ok());

    println!("User tier:   {}", report.user);
    if let Some(n) = user_entries {
        println!("             {} entries", n);
    }
    match &report.sys {
        Some(sys) => {
            println!("System tier: {}", sys);
            if let Some(n) = sys_entries {
                println!("             {} entries", n);
            }
        }
        None => println!("System tier: (none)"),
    }
    println!("Reads:       {}", if report.read_disabled { "disabled" } else { "enabled" });
    println!("Writes:      {}", if report.write_disabled { "disabled" } else { "enabled" });
    println!("Mode:        {}", settings.compile_mode);
    println!("Helper:      {}", helper.as_deref().unwrap_or("(not found)"));
    if let Some(timeout) = settings.helper_timeout {
        println!("Timeout:     {}s", timeout.as_secs());
    }
}

fn run_list(db: &Path, json_output: bool) {
    let store = open_existing(db, OpenMode::ReadOnly);
    let entries = match store.entries() {
        Ok(entries) => entries,
        Err(e) => fail(e),
    };

    if json_output {
        match serde_json::to_string_pretty(&entries) {
            Ok(json) => println!("{}", json),
            Err(e) => fail(format!("serializing output: {}", e)),
        }
        return;
    }

    if entries.is_empty() {
        println!("No entries in {}.", db.display());
        return;
    }

    println!("{} entries in {}:\n", entries.len(), db.display());
    for entry in &entries {
        let when = entry
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {}  {} bytes  {}", entry.key, entry.code_size, when);
    }
}

fn run_export(db: &Path, output: &Path) {
    let store = open_existing(db, OpenMode::ReadOnly);
    let image = match store.snapshot() {
        Ok(image) => image,
        Err(e) => fail(e),
    };
    if let Err(e) = fs::write(output, &image) {
        fail(format!("writing {}: {}", output.display(), e));
    }
    eprintln!("Exported {} bytes to {}", image.len(), output.display());
}

fn run_merge(db: &Path, snapshots: &[PathBuf]) {
    if let Some(parent) = db.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent) {
            fail(format!("creating {}: {}", parent.display(), e));
        }
    }
    let store = match PersistentStore::open(StoreLocation::File(db.to_path_buf()), OpenMode::ReadWrite) {
        Ok(store) => store,
        Err(e) => fail(e),
    };

    let mut total = 0;
    for snapshot in snapshots {
        let image = match fs::read(snapshot) {
            Ok(image) => image,
            Err(e) => fail(format!("reading {}: {}", snapshot.display(), e)),
        };
        match store.merge(&image) {
            Ok(rows) => {
                eprintln!("Merged {} entries from {}", rows, snapshot.display());
                total += rows;
            }
            Err(e) => fail(format!("{}: {}", snapshot.display(), e)),
        }
    }
    eprintln!("Merged {} entries into {}", total, db.display());
}
