//! Tracing subscriber setup shared by the server and the CLI.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Options for [`init_tracing`].
#[derive(Debug, Clone, Default)]
pub struct LogOptions<'a> {
    pub verbose: bool,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Also write a daily rolling log file into this directory.
    pub log_dir: Option<&'a Path>,
}

impl LogOptions<'_> {
    /// `LOG_FORMAT=json` switches to JSON output.
    pub fn json_from_env() -> bool {
        std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,appforge=debug,tower_http=debug")
        } else {
            EnvFilter::new("warn,appforge=info")
        }
    })
}

/// Install the global subscriber. The returned guard must be kept alive for
/// the file writer to flush; it is `None` when no log dir is configured.
///
/// Calling this twice is harmless: the second install is ignored.
pub fn init_tracing(options: LogOptions<'_>) -> Option<WorkerGuard> {
    let stderr_layer = if options.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match options.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "appforge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(default_filter(options.verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}
