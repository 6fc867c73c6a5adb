// Cellar launcher entry point

use anyhow::{Context, Result};
use cellar_core::config::{ConfigLoader, CoreConfig};
use cellar_core::descriptor::DescriptorStore;
use cellar_core::logging::{init_logging, init_minimal_logging};
use cellar_system::gateway::{claim, resolve_request, Claim, ForwardRequest, GatewayServer};
use cellar_system::process_table::{PgrepProcessTable, ProcessTable};
use cellar_system::{owner_channel, termination};
use cellar_system::{IndicatorIndex, Launcher, LogNotifier, OwnerEvent, OwnerHandle, Shell, ShellSettings};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "cellar", version, about = "Launch and supervise Windows applications in isolated environments")]
struct Args {
    /// Executable or `.charm` descriptor to open, relative to the working directory.
    file: Option<String>,
    /// Kill every running Windows executable first.
    #[arg(long)]
    kill_all: bool,
    /// User configuration file to read instead of the default one.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    if args.kill_all {
        let signature = config.supervisor.self_signature.clone();
        tokio::task::spawn_blocking(move || {
            termination::kill_all(&PgrepProcessTable::new(), &signature, std::process::id())
        })
        .await
        .context("Kill-all task failed")?;
    }

    let cwd = std::env::current_dir().context("Failed to determine the working directory")?;
    let forward = args.file.map(|file| ForwardRequest::new(cwd, file));

    let socket_path = &config.paths.socket_path;
    let server = match claim(socket_path, forward.as_ref())
        .await
        .with_context(|| format!("Failed to claim {}", socket_path.display()))?
    {
        Claim::Forwarded => return Ok(()),
        Claim::Primary(server) => server,
    };
    run_primary(config, server, forward).await
}

fn load_config(user_config_path: Option<&Path>) -> Result<CoreConfig> {
    let loaded = match user_config_path {
        Some(path) => ConfigLoader::load_from(path),
        None => ConfigLoader::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            init_minimal_logging();
            error!("Failed to load configuration: {}", e);
            return Err(e).context("Failed to load configuration");
        }
    };
    if let Err(e) = init_logging(&config.logging, false) {
        init_minimal_logging();
        warn!("Configured logging unavailable, using stderr: {}", e);
    }
    Ok(config)
}

async fn run_primary(config: CoreConfig, server: GatewayServer, forward: Option<ForwardRequest>) -> Result<()> {
    info!(socket = %server.path().display(), runner = %config.supervisor.runner, "Cellar starting");

    let table: Arc<dyn ProcessTable> = Arc::new(PgrepProcessTable::new());
    let (owner, events) = owner_channel();
    let shell = Shell::new(
        DescriptorStore::new(config.paths.prefixes_dir.clone()),
        Launcher::new(config.supervisor.runner.clone()),
        table,
        IndicatorIndex::logging(),
        Box::new(LogNotifier),
        owner.clone(),
        ShellSettings::from_config(&config.supervisor),
    );
    shell.reconcile_on_startup();
    let prober = shell.prober().spawn(owner.clone(), config.supervisor.probe_interval());
    let gateway = tokio::spawn(server.serve(owner.clone()));
    let owner_loop = tokio::spawn(shell.run(events));

    if let Some(request) = forward {
        open_locally(&owner, &request).await;
    }

    wait_for_shutdown_signal().await?;
    info!("Shutting down");
    let _ = owner.post(OwnerEvent::Shutdown);
    owner_loop.await.context("Owner loop failed")?;

    // Dropping the server removes the socket file.
    gateway.abort();
    let _ = gateway.await;
    prober.abort();
    Ok(())
}

/// Resolves the file given on the command line the way forwarded requests are.
async fn open_locally(owner: &OwnerHandle, request: &ForwardRequest) {
    let message = request.encode();
    match tokio::task::spawn_blocking(move || resolve_request(&message)).await {
        Ok(Ok(paths)) => {
            for path in paths {
                let _ = owner.post(OwnerEvent::OpenFile(path));
            }
        }
        Ok(Err(e)) => warn!(file = %request.file, "Cannot open: {}", e),
        Err(e) => warn!("File resolution task failed: {}", e),
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
