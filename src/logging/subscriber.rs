//! Tracing subscriber setup: console formatter, file layer, and initialisation.
//!
//! The registry and the orchestrator wrap each task and plugin hook in a
//! span named [`TASK_SPAN`] or [`PLUGIN_SPAN`] carrying an `id` field. The
//! file layer prefixes every line logged inside such a span with its id, so
//! a failed install can be traced back in `<command>.log` without guessing
//! which plugin asked for it.
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::registry::LookupSpan;

use super::utils::{format_utc_datetime, format_utc_time, log_file_path, strip_ansi};

const STAGE_TARGET: &str = "provision::stage";

/// Span name for one system task; its `id` is the task id.
pub const TASK_SPAN: &str = "task";

/// Span name for one plugin hook call; its `id` is the plugin id.
pub const PLUGIN_SPAN: &str = "plugin";

/// Captures one named field from an event or span.
struct FieldExtractor {
    field: &'static str,
    value: Option<String>,
}

impl FieldExtractor {
    const fn new(field: &'static str) -> Self {
        Self { field, value: None }
    }
}

impl tracing::field::Visit for FieldExtractor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == self.field {
            self.value = Some(format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == self.field {
            self.value = Some(value.to_string());
        }
    }
}

fn event_message(event: &tracing::Event<'_>) -> String {
    let mut extractor = FieldExtractor::new("message");
    event.record(&mut extractor);
    extractor.value.unwrap_or_default()
}

/// `task linux:apt:update`, stored on task and plugin spans.
struct SpanTag(String);

/// A [`tracing_subscriber::Layer`] that appends all events to the persistent
/// log file with timestamps, the innermost task or plugin id, and ANSI codes
/// stripped.
///
/// Always captures events at `DEBUG` level and above regardless of the
/// console verbosity setting.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Open the log file for `command` under the cache directory.
    ///
    /// Returns `None` if the cache directory cannot be created or the file
    /// cannot be opened.
    pub(super) fn new(command: &str) -> Option<Self> {
        Self::at(&log_file_path(command)?)
    }

    /// Truncate `path`, write a run header, and append events from then on.
    fn at(path: &Path) -> Option<Self> {
        let version = option_env!("PROVISION_VERSION")
            .unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
        let header = format!(
            "==========================================\n\
             Provision {version} {}\n\
             ==========================================\n",
            format_utc_datetime(),
        );
        fs::write(path, header).ok()?;
        let file = fs::OpenOptions::new().append(true).open(path).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S> tracing_subscriber::Layer<S> for FileLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let name = attrs.metadata().name();
        if name != TASK_SPAN && name != PLUGIN_SPAN {
            return;
        }
        let mut extractor = FieldExtractor::new("id");
        attrs.record(&mut extractor);
        if let (Some(value), Some(span)) = (extractor.value, ctx.span(id)) {
            span.extensions_mut().insert(SpanTag(format!("{name} {value}")));
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        let target = metadata.target();

        let msg = strip_ansi(&event_message(event));
        let ts = format_utc_time();
        let tag = ctx
            .event_scope(event)
            .and_then(|scope| {
                scope
                    .into_iter()
                    .find_map(|span| span.extensions().get::<SpanTag>().map(|t| t.0.clone()))
            })
            .map(|t| format!("[{t}] "))
            .unwrap_or_default();

        let line = match (level, target) {
            (tracing::Level::INFO, STAGE_TARGET) => format!("[{ts}] ==> {msg}"),
            (tracing::Level::ERROR, _) => format!("[{ts}]     [error] {tag}{msg}"),
            (tracing::Level::WARN, _) => format!("[{ts}]     [warn] {tag}{msg}"),
            (tracing::Level::DEBUG, _) => format!("[{ts}]     [debug] {tag}{msg}"),
            _ => format!("[{ts}]     {tag}{msg}"),
        };

        if let Ok(mut f) = self.file.lock() {
            writeln!(f, "{line}").ok();
        }
    }
}

/// A [`tracing_subscriber::fmt::FormatEvent`] that emits provision-style
/// console output.
struct ProvisionFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ProvisionFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = *metadata.level();
        let target = metadata.target();

        let msg = event_message(event);

        match level {
            tracing::Level::ERROR => writeln!(writer, "\x1b[31mERROR\x1b[0m {msg}"),
            tracing::Level::WARN => writeln!(writer, "\x1b[33mWARN\x1b[0m  {msg}"),
            tracing::Level::INFO if target == STAGE_TARGET => {
                writeln!(writer, "\x1b[1;34m==>\x1b[0m \x1b[1m{msg}\x1b[0m")
            }
            tracing::Level::INFO => writeln!(writer, "  {msg}"),
            _ => writeln!(writer, "  \x1b[2m{msg}\x1b[0m"),
        }
    }
}

/// Initialise the global [`tracing`] subscriber.
///
/// Sets up a console layer that formats events in the provision output style
/// and a file layer that writes all events (including `debug`) to
/// `$XDG_CACHE_HOME/provision/<command>.log`. With `machine_output`, the
/// console only shows warnings and errors (on stderr) so stdout stays
/// parseable.
/// Must be called once at program startup, before any logging.
pub fn init_subscriber(verbose: bool, machine_output: bool, command: &str) {
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{
        Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let console_level = if machine_output {
        LevelFilter::WARN
    } else if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let make_writer = std::io::stderr
        .with_max_level(tracing::Level::WARN)
        .and(std::io::stdout.with_min_level(tracing::Level::INFO));

    let console_layer = fmt::layer()
        .event_format(ProvisionFormatter)
        .with_writer(make_writer)
        .with_filter(console_level);

    let file_layer = FileLayer::new(command).map(|l| l.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}
