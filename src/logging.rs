use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "ASISTENCIA_LOG";

/// Installs the global subscriber. Output goes to stderr because stdout
/// carries the IPC protocol. `ASISTENCIA_LOG` overrides `default_filter`.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
