/// Logging initialization.
///
/// - stderr via `tracing-subscriber::fmt`, filtered by `RUST_LOG` when set
/// - optionally mirrored to `<data_dir>/deskchat.log` (`log_to_file` in config)
///
/// Called once at the start of `ChatApp::new()`. Later calls (several apps
/// in one test binary) are no-ops.
pub fn init_logging(data_dir: &str, to_file: bool) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "deskchat_core=debug,info".into());

    let file_layer = if to_file {
        let log_path = std::path::Path::new(data_dir).join("deskchat.log");
        let _ = std::fs::create_dir_all(data_dir);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
            })
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}
