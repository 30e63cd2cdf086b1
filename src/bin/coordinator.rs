//! `corral-coordinator`: start a [`corral::Coordinator`], populate it from
//! a newline-delimited JSON argument file, serve it, and on exit print
//! the accounting block and optionally write a snapshot.

use std::io::BufRead;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use corral::config::{CliOverrides, ResolvedConfig};
use corral::Coordinator;

/// Start a corral coordinator.
#[derive(Parser, Debug)]
#[command(name = "corral-coordinator", version, about)]
struct Args {
    /// Optional TOML config file; CLI flags here still take priority.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the coordinator's listener on.
    #[arg(long)]
    server: Option<String>,

    /// Port to bind.
    #[arg(long)]
    port: Option<u16>,

    /// Path to the shared HMAC authkey file (generated if missing).
    #[arg(long)]
    authkey_file: Option<PathBuf>,

    /// Newline-delimited JSON file of arguments to enqueue at startup
    /// (one JSON value per line). Optional — a driver can also populate
    /// the coordinator programmatically via the library.
    #[arg(long)]
    args_file: Option<PathBuf>,

    /// Optional directory the job queue spills to; memory-only if unset.
    #[arg(long)]
    spill_dir: Option<PathBuf>,

    /// Where to write the snapshot on exit.
    #[arg(long)]
    snapshot_out: Option<PathBuf>,

    /// Resume from a previously written snapshot instead of `args_file`.
    #[arg(long)]
    resume_from: Option<PathBuf>,
}

fn main() -> Result<()> {
    corral::logging::init("coordinator");
    let args = Args::parse();

    let cli = CliOverrides {
        server: args.server.clone(),
        port: args.port,
        authkey_file: args.authkey_file.clone(),
        ..CliOverrides::default()
    };
    let config = ResolvedConfig::load(cli, args.config.as_deref()).context("loading configuration")?;

    ensure_authkey_file(&config.authkey_file).context("preparing authkey file")?;

    let coordinator = build_coordinator(&args, &config)?;
    let coordinator = Arc::new(coordinator);

    if let Some(args_file) = &args.args_file {
        load_args_file(&coordinator, args_file).context("loading args file")?;
    }

    let listener = TcpListener::bind((config.server.as_str(), config.port))
        .with_context(|| format!("binding {}:{}", config.server, config.port))?;
    log::info!("coordinator listening on {}:{}", config.server, config.port);

    // SIGINT and SIGTERM both map to "begin shutdown" for the coordinator
    // (§5): the main loop exits at its next poll and a snapshot is taken.
    let shutdown = corral::signal::install_shutdown_flag().context("installing shutdown signal handler")?;

    let authkey = Arc::new(std::fs::read(&config.authkey_file).context("reading authkey file")?);
    let serve_listener = listener.try_clone().context("cloning listener")?;
    let serve_coordinator = Arc::clone(&coordinator);
    let serve_shutdown = Arc::clone(&shutdown);
    let accept_handle = std::thread::spawn(move || {
        if let Err(e) = serve_coordinator.serve(serve_listener, authkey, &serve_shutdown) {
            log::error!("accept loop exited with error: {e}");
        }
    });

    let accounting = coordinator.run(&shutdown).context("coordinator main loop")?;
    log::info!("coordinator shutting down: {accounting:?}");

    coordinator.close();
    accept_handle.join().map_err(|_| anyhow::anyhow!("accept thread panicked"))?;

    if let Some(path) = &args.snapshot_out {
        coordinator.write_snapshot(path).with_context(|| format!("writing snapshot to {}", path.display()))?;
        log::info!("snapshot written to {}", path.display());
    }

    Ok(())
}

fn build_coordinator(args: &Args, config: &ResolvedConfig) -> Result<Coordinator> {
    if let Some(resume_path) = &args.resume_from {
        let snapshot = corral::Snapshot::static_load(resume_path)
            .with_context(|| format!("loading snapshot from {}", resume_path.display()))?;
        return Coordinator::restore(&snapshot, args.spill_dir.as_deref(), None, config.msg_interval)
            .context("restoring coordinator from snapshot");
    }
    match &args.spill_dir {
        Some(dir) => Coordinator::with_spill_dir(dir, None, config.msg_interval).context("opening spill directory"),
        None => Ok(Coordinator::new(None, config.msg_interval)),
    }
}

fn load_args_file(coordinator: &Coordinator, path: &std::path::Path) -> Result<()> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("parsing JSON argument: {line}"))?;
        let bytes = bincode::serialize(&value).context("encoding argument")?;
        coordinator.insert(bytes).context("inserting argument")?;
    }
    Ok(())
}

fn ensure_authkey_file(path: &std::path::Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    std::fs::write(path, key)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
