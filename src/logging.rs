use colored::*;
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// A custom tracing event formatter for colorizing log output based on level.
///
/// Console output is meant for the person running the benchmark, so the
/// whole line is colored by severity and no timestamps or targets are printed.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // format_fields writes directly, so buffer to color the whole line
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Console level for the `-v`/`-q` flags
pub fn console_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the flags for the console layer. With a
/// log file, everything at debug and above is also written there, uncolored.
/// Keep the returned guard alive until exit so the file writer flushes.
pub fn init_logging(
    verbose: u8,
    quiet: bool,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directive(verbose, quiet)));
    let console = tracing_subscriber::fmt::layer()
        .event_format(ColorizedFormatter)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_directive() {
        assert_eq!(console_directive(0, false), "info");
        assert_eq!(console_directive(1, false), "debug");
        assert_eq!(console_directive(5, false), "trace");
        assert_eq!(console_directive(3, true), "error");
    }
}
