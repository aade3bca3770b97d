use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking writers flushing until the process exits.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

/// Initialize logging for a scout run (console, plus a rolling file when the
/// log directory is writable).
pub fn init_service_logging(log_dir: &Path, service_name: &str) -> anyhow::Result<LogGuards> {
    // RUST_LOG wins over the default level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stdout());

    if !can_write(log_dir) {
        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!(
            "Logging initialized - console output only (could not write to {})",
            log_dir.display()
        );
        return Ok(LogGuards {
            _guards: vec![console_guard],
        });
    }

    let _ = rotate_logs_on_startup(log_dir, service_name);

    let appender = tracing_appender::rolling::daily(log_dir, format!("{service_name}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);
    let console_layer = fmt::layer()
        .with_writer(console_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    info!(
        "Logging initialized - logs will be written to {}/{}.log",
        log_dir.display(),
        service_name
    );
    Ok(LogGuards {
        _guards: vec![file_guard, console_guard],
    })
}

fn can_write(log_dir: &Path) -> bool {
    let marker = log_dir.join(".write_check");
    std::fs::create_dir_all(log_dir)
        .and_then(|_| std::fs::File::create(&marker))
        .map(|_| std::fs::remove_file(&marker))
        .is_ok()
}

/// Move the previous run's log aside so each run starts with a fresh file.
pub fn rotate_logs_on_startup(log_dir: &Path, service_name: &str) -> anyhow::Result<()> {
    let current = log_dir.join(format!("{service_name}.log"));
    if current.exists() {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup = log_dir.join(format!("{service_name}.{timestamp}.log"));
        std::fs::rename(&current, &backup)?;
        info!("Previous log file backed up to: {}", backup.display());
    }
    Ok(())
}
