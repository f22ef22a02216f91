//! Logging initialization (§9.1): a daily-rotating file sink with a
//! writability preflight, layered with a console sink, for the long-running
//! `run` subcommand; a minimal console-only initializer for one-shot
//! subcommands (`scan`, `status`) that shouldn't spray log noise.

use tracing_subscriber::EnvFilter;

pub fn init_logging(config: &xvenue_arb::AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_new(&config.logging.filter)
        .unwrap_or_else(|_| EnvFilter::new("info,xvenue_arb=debug"));

    let log_dir = config
        .logging
        .log_dir
        .clone()
        .unwrap_or_else(|| "/var/log/xvenue-arb".to_string());

    // `tracing_appender::rolling::daily` panics if it can't create the initial
    // log file, so preflight writability rather than let a bad log directory
    // take the process down.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".xvenue_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&test_path) {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "xvenue-arb.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Long-running binary: leaking the guard keeps the writer
                // alive for the process lifetime instead of threading it
                // through every call site.
                Box::leak(Box::new(guard));

                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true);

                Some(if config.logging.json {
                    layer.json().boxed()
                } else {
                    layer.boxed()
                })
            }
            Err(e) => {
                eprintln!("warning: could not write to log directory {} ({}), file logging disabled", log_dir, e);
                None
            }
        }
    } else {
        eprintln!("warning: could not create log directory {}, file logging disabled", log_dir);
        None
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        eprintln!("logging to: {}/xvenue-arb.log", log_dir);
    }
}

pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
