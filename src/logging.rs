use std::fmt;

use miette::{Context, IntoDiagnostic, Result};
use owo_colors::{OwoColorize, Style};
use time::{
    format_description::{self, FormatItem},
    OffsetDateTime, UtcOffset,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{format, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
    FmtSubscriber,
};

/// Initialize the logging system.
///
/// Must be called before any thread is spawned, for the local time offset
/// to be readable.
pub fn init_logging(level: Level) -> Result<()> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let subscriber = FmtSubscriber::builder()
        .event_format(JobLogFormat::new(offset)?)
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err("Setting default subscriber failed")
}

/// Lines of the form `HH:MM:SS LEVEL [thread] message`.
///
/// Workers run on threads named after their job (`load-3`, `download-3`),
/// so the thread tag tells which job a line is about.
struct JobLogFormat {
    offset: UtcOffset,
    clock: Vec<FormatItem<'static>>,
}

impl JobLogFormat {
    fn new(offset: UtcOffset) -> Result<Self> {
        let clock = format_description::parse("[hour]:[minute]:[second]")
            .into_diagnostic()
            .wrap_err("Invalid log time format")?;
        Ok(Self { offset, clock })
    }

    fn now(&self) -> Result<String, fmt::Error> {
        OffsetDateTime::now_utc()
            .to_offset(self.offset)
            .format(&self.clock)
            .map_err(|_| fmt::Error)
    }
}

fn level_style(level: Level) -> Style {
    match level {
        Level::ERROR => Style::new().red().bold(),
        Level::WARN => Style::new().yellow(),
        Level::INFO => Style::new().green(),
        _ => Style::new().blue(),
    }
}

impl<S, N> FormatEvent<S, N> for JobLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = *event.metadata().level();
        let current = std::thread::current();
        let thread = current.name().unwrap_or("worker");
        let now = self.now()?;

        if writer.has_ansi_escapes() {
            let tag = format!("[{thread}]");
            write!(
                writer,
                "{} {:>5} {} ",
                now.dimmed(),
                level.style(level_style(level)),
                tag.cyan()
            )?;
        } else {
            write!(writer, "{now} {level:>5} [{thread}] ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
