use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Shape of the diagnostic lines written to stderr.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    /// One JSON object per event, for piping into a log collector.
    Json,
}

/// How much of the engine's activity to show.
///
/// `warn` covers timeouts, flushed passthrough data and reconnects. `debug`
/// adds state transitions and every queued frame. `trace` also dumps each
/// byte read from and written to the serial line.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Byte dumps come from both the reader and the writer; the event target
    /// tells them apart.
    fn shows_targets(self) -> bool {
        matches!(self, LogLevel::Trace)
    }
}

/// Send engine diagnostics to stderr. Stdout carries only command output,
/// so `--format raw` can be piped as-is. Thread names (`xbridge-reader`,
/// `xbridge-sender`, `xbridge-supervisor`) show which worker logged.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(level.shows_targets())
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
