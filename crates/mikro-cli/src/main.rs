//! MIKRO - micro-kernel plugin runtime shell.
//!
//! # Configuration
//!
//! Kernel tunables come from (lowest to highest priority):
//!
//! 1. Compile-time defaults
//! 2. `mikro.toml` in the working directory (or `--config FILE`)
//! 3. Command-line flags
//!
//! The config file mirrors [`KernelConfig`], e.g.:
//!
//! ```toml
//! plugin_root = "plugins"
//! worker_pool_size = 5
//! start_timeout_ms = 3000
//! stop_timeout_ms = 2000
//! task_grace_ms = 1000
//!
//! [protected_keys]
//! policy = "exact"
//! keys = ["admin"]
//! ```

mod shell;

use anyhow::{Context, Result};
use clap::Parser;
use mikro_kernel::{Kernel, KernelConfig, PatternAuditor};
use mikro_lua::LuaBundleLoader;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use shell::{Shell, PROMPT};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Default config file looked up in the working directory.
const CONFIG_FILE: &str = "mikro.toml";

/// MIKRO - micro-kernel plugin runtime shell
#[derive(Parser, Debug)]
#[command(name = "mikro")]
#[command(version, about, long_about = None)]
struct Args {
    /// Plugin root directory (overrides the config file)
    #[arg(short = 'C', long)]
    root: Option<PathBuf>,

    /// Config file path (default: ./mikro.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Disable the pre-load source audit
    #[arg(long)]
    no_audit: bool,

    /// One-shot command to run instead of the interactive shell
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn load_config(args: &Args) -> Result<KernelConfig> {
    let mut config = match &args.config {
        Some(path) => read_config(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => {
            let default = Path::new(CONFIG_FILE);
            if default.is_file() {
                read_config(default)
                    .with_context(|| format!("cannot load config {CONFIG_FILE}"))?
            } else {
                KernelConfig::default()
            }
        }
    };
    if let Some(root) = &args.root {
        config.plugin_root = root.clone();
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<KernelConfig> {
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logging: --debug > --verbose > RUST_LOG env > default "warn"
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;
    let mut kernel = Kernel::new(config, Box::new(LuaBundleLoader::new()));
    if !args.no_audit {
        kernel = kernel.with_audit(Box::new(PatternAuditor::lua_defaults()));
    }

    let report = kernel.init();
    println!(
        "[*] {} plugin(s) up, {} failed, {} excluded",
        report.loaded.len(),
        report.failed.len(),
        report.excluded.len()
    );
    for (name, error) in &report.failed {
        println!("[!] {name}: {error}");
    }
    for error in &report.excluded {
        println!("[!] {error}");
    }

    let bring_up_fatal = report.loaded.is_empty() && !report.is_clean();

    let shell = Shell::new(&kernel);

    // One-shot command mode.
    if !args.command.is_empty() {
        let line = args.command.join(" ");
        shell.dispatch(&line);
        kernel.shutdown();
        if bring_up_fatal {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Interactive shell.
    println!("=== MIKRO kernel shell ===");
    println!("type 'help' for commands, '<command> -h' for details");

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                if !shell.dispatch(&line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("shutting down...");
                break;
            }
            Err(e) => {
                eprintln!("[!] input error: {e}");
                break;
            }
        }
    }

    kernel.shutdown();
    if bring_up_fatal {
        std::process::exit(1);
    }
    Ok(())
}
