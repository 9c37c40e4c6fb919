use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lido::autosave::run_autosave;
use lido::calendar::{SystemClock, format_day};
use lido::config::{ConfigError, ServerConfig, load_season};
use lido::context::Context;
use lido::persist::{Database, PersistError};
use lido::shutdown::drain_and_persist;
use lido::wire;

/// Anything that stops the server before it starts serving.
#[derive(Debug)]
enum StartupError {
    Config(ConfigError),
    Persist(PersistError),
    Metrics(metrics_exporter_prometheus::BuildError),
    Io(&'static str, io::Error),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Config(e) => write!(f, "config: {e}"),
            StartupError::Persist(e) => write!(f, "database: {e}"),
            StartupError::Metrics(e) => write!(f, "metrics exporter: {e}"),
            StartupError::Io(what, e) => write!(f, "{what}: {e}"),
        }
    }
}

impl StartupError {
    fn exit_code(&self) -> ExitCode {
        match self {
            StartupError::Config(_) => ExitCode::from(2),
            StartupError::Persist(_) => ExitCode::from(3),
            StartupError::Metrics(_) => ExitCode::FAILURE,
            StartupError::Io(_, e) => e
                .raw_os_error()
                .and_then(|code| u8::try_from(code).ok())
                .filter(|&code| code != 0)
                .map_or(ExitCode::FAILURE, ExitCode::from),
        }
    }
}

fn init_logging(log_file: Option<&Path>) -> io::Result<()> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => tracing_subscriber::fmt::init(),
    }
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() -> io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}

async fn run(config: ServerConfig) -> Result<ExitCode, StartupError> {
    lido::observability::init(config.metrics_port).map_err(StartupError::Metrics)?;

    let season = load_season(&config.config_path).map_err(StartupError::Config)?;
    let ctx = Context::load(
        season,
        Database::new(&config.data_path),
        config.max_connections,
        Arc::new(SystemClock),
    )
    .map_err(StartupError::Persist)?;
    let ctx = Arc::new(ctx);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| StartupError::Io("bind", e))?;

    let season = ctx.season();
    let date = |day| format_day(season.year, day).unwrap_or_default();
    info!("lido listening on {addr}");
    info!("  season: {} to {}", date(season.start), date(season.end));
    info!("  grid: {} rows x {} cols", season.rows, season.cols);
    info!("  data: {}", config.data_path.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  autosave: {}", config.autosave.map_or("disabled".to_string(), |d| format!("every {}s", d.as_secs())));
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let stop = CancellationToken::new();
    let acceptor = tokio::spawn(wire::serve(listener, ctx.clone(), stop.clone()));
    if let Some(period) = config.autosave {
        tokio::spawn(run_autosave(ctx.clone(), period, stop.clone()));
    }

    shutdown_signal()
        .await
        .map_err(|e| StartupError::Io("signal handler", e))?;
    info!("shutdown signal received, stopping accept loop");
    stop.cancel();
    let _ = acceptor.await;

    match drain_and_persist(&ctx).await {
        Ok(closed) => {
            info!("lido stopped ({closed} sessions closed)");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("final save to {} failed: {e}", ctx.database.path().display());
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = ServerConfig::from_env();
    if let Err(e) = init_logging(config.log_file.as_deref()) {
        eprintln!("cannot open log file: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}
