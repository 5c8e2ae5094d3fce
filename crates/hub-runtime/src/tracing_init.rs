use std::collections::HashMap;
use std::fmt::{self as stdfmt, Write as _};
use std::path::Path;

use anyhow::Result;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent};
use tracing_subscriber::layer::{Context, Filter, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use hub_config::{LogFormat, LoggingConfig};

// ---------------------------------------------------------------------------
// Domain palette
// ---------------------------------------------------------------------------

/// The six domains the `hub_*!` macros emit, with the ANSI color each gets
/// in plain output. Cluster coordination (`clu`) is deliberately loud (red)
/// so leader/follower traffic stands out from record flow, and `pipe` gets
/// its own color because it dominates volume at debug level.
const DOMAINS: [(&str, &str); 6] = [
    ("sys", "36"),  // cyan    — lifecycle
    ("conn", "34"), // blue    — drivers and external endpoints
    ("pipe", "35"), // magenta — record flow
    ("res", "32"),  // green   — metrics and resources
    ("conf", "33"), // yellow  — registry and pending changes
    ("clu", "31"),  // red     — cluster coordination
];

fn domain_color(domain: &str) -> Option<&'static str> {
    DOMAINS
        .iter()
        .find(|(name, _)| *name == domain)
        .map(|(_, color)| *color)
}

// ---------------------------------------------------------------------------
// DomainLevelFilter — `[logging] domains` level caps
// ---------------------------------------------------------------------------

/// Filters events by their `domain` field against the per-domain caps in
/// `[logging] domains` (e.g. `clu = "warn"` mutes routine sync chatter
/// while `pipe` stays at the global level). Events without a domain —
/// typically from dependencies — pass through untouched.
struct DomainLevelFilter {
    caps: HashMap<String, Level>,
}

impl DomainLevelFilter {
    fn from_config(config: &LoggingConfig) -> Result<Self> {
        let mut caps = HashMap::new();
        for (domain, level) in &config.domains {
            if domain_color(domain).is_none() {
                anyhow::bail!(
                    "unknown log domain {domain:?} (expected sys|conn|pipe|res|conf|clu)"
                );
            }
            let level: Level = level
                .parse()
                .map_err(|_| anyhow::anyhow!("bad level {level:?} for log domain {domain:?}"))?;
            caps.insert(domain.clone(), level);
        }
        Ok(Self { caps })
    }

    fn allows(&self, domain: Option<&str>, level: &Level) -> bool {
        match domain.and_then(|d| self.caps.get(d)) {
            // More-verbose-than-cap events are dropped (TRACE > DEBUG > … ).
            Some(cap) => level <= cap,
            None => true,
        }
    }
}

impl<S: Subscriber> Filter<S> for DomainLevelFilter {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        // The domain is an event field, not metadata; decide per event.
        true
    }

    fn event_enabled(&self, event: &Event<'_>, _cx: &Context<'_, S>) -> bool {
        if self.caps.is_empty() {
            return true;
        }
        let mut probe = DomainProbe::default();
        event.record(&mut probe);
        self.allows(probe.domain.as_deref(), event.metadata().level())
    }
}

/// Minimal visitor that only sniffs the `domain` field.
#[derive(Default)]
struct DomainProbe {
    domain: Option<String>,
}

impl Visit for DomainProbe {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "domain" {
            self.domain = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn stdfmt::Debug) {}
}

// ---------------------------------------------------------------------------
// HubFormat — colored `[domain]` prefix per the palette
// ---------------------------------------------------------------------------

/// Plain-text event formatter: timestamp, level, the `[domain]` prefix in
/// its palette color, the message, then remaining fields.
///
/// ```text
/// 2026-07-30T09:12:44Z  INFO [clu] sync delivered node=worker-1 version=12
/// ```
///
/// Domains outside the palette (and events without one) render dim or bare.
pub struct HubFormat {
    timer: SystemTime,
}

impl HubFormat {
    pub fn new() -> Self {
        Self { timer: SystemTime }
    }
}

impl Default for HubFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for HubFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> fmt::FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let ansi = writer.has_ansi_escapes();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        if ansi {
            write!(writer, "\x1b[2m")?;
        }
        if self.timer.format_time(&mut writer).is_err() {
            write!(writer, "-")?;
        }
        if ansi {
            write!(writer, "\x1b[0m")?;
        }

        let level = *event.metadata().level();
        if ansi {
            let style = match level {
                Level::ERROR => "1;31",
                Level::WARN => "1;33",
                Level::INFO => "32",
                Level::DEBUG => "34",
                Level::TRACE => "90",
            };
            write!(writer, " \x1b[{style}m{level:>5}\x1b[0m ")?;
        } else {
            write!(writer, " {level:>5} ")?;
        }

        if let Some(domain) = &fields.domain {
            match (ansi, domain_color(domain)) {
                (true, Some(color)) => write!(writer, "\x1b[1;{color}m[{domain}]\x1b[0m ")?,
                (true, None) => write!(writer, "\x1b[2m[{domain}]\x1b[0m ")?,
                (false, _) => write!(writer, "[{domain}] ")?,
            }
        }

        write!(writer, "{}", fields.message)?;
        for (name, value) in &fields.pairs {
            if ansi {
                write!(writer, " \x1b[3m{name}={value}\x1b[0m")?;
            } else {
                write!(writer, " {name}={value}")?;
            }
        }

        writeln!(writer)
    }
}

/// Splits an event into domain, message, and the remaining key/value pairs.
///
/// Numeric and boolean fields arrive through the `record_debug` default
/// forwarding, so two methods cover every field type.
#[derive(Default)]
struct FieldCollector {
    domain: Option<String>,
    message: String,
    pairs: Vec<(String, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "domain" => self.domain = Some(value.to_string()),
            "message" => self.message = value.to_string(),
            name => self.pairs.push((name.to_string(), format!("{value:?}"))),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        match field.name() {
            "domain" => {
                let raw = format!("{value:?}");
                self.domain = Some(raw.trim_matches('"').to_string());
            }
            "message" => {
                write!(&mut self.message, "{value:?}").ok();
            }
            name => self.pairs.push((name.to_string(), format!("{value:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Initialise the `tracing` subscriber stack from [`LoggingConfig`].
///
/// Returns an optional [`WorkerGuard`] that **must** be held until the
/// process exits — dropping it flushes and closes the non-blocking file
/// writer.
///
/// Precedence: `RUST_LOG` overrides the config-driven module directives;
/// `[logging] domains` caps apply on top of either. The file layer (when
/// configured) skips the module filter so a post-incident read has full
/// verbosity, but still honors the domain caps.
pub fn init_tracing(config: &LoggingConfig, base_dir: &Path) -> Result<Option<WorkerGuard>> {
    let env_filter = build_env_filter(config)?;
    let file_writer = match &config.file {
        Some(path) => Some(open_log_file(path, base_dir)?),
        None => None,
    };
    // `Filter` is consumed per layer; build one per destination.
    let stderr_domains = DomainLevelFilter::from_config(config)?;
    let file_domains = DomainLevelFilter::from_config(config)?;

    let mut guard = None;
    match (config.format, file_writer) {
        (LogFormat::Plain, None) => {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .event_format(HubFormat::new())
                        .with_writer(std::io::stderr)
                        .with_filter(env_filter)
                        .with_filter(stderr_domains),
                )
                .init();
        }
        (LogFormat::Json, None) => {
            // JSON keeps `domain` as a regular field — consumers query by key.
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .with_filter(env_filter)
                        .with_filter(stderr_domains),
                )
                .init();
        }
        (LogFormat::Plain, Some((non_blocking, file_guard))) => {
            guard = Some(file_guard);
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .event_format(HubFormat::new())
                        .with_writer(std::io::stderr)
                        .with_filter(env_filter)
                        .with_filter(stderr_domains),
                )
                .with(
                    fmt::layer()
                        .event_format(HubFormat::new())
                        .with_ansi(false)
                        .with_writer(non_blocking)
                        .with_filter(file_domains),
                )
                .init();
        }
        (LogFormat::Json, Some((non_blocking, file_guard))) => {
            guard = Some(file_guard);
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .with_filter(env_filter)
                        .with_filter(stderr_domains),
                )
                .with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(non_blocking)
                        .with_filter(file_domains),
                )
                .init();
        }
    }

    Ok(guard)
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(EnvFilter::from_default_env());
    }
    let directives = std::iter::once(config.level.clone())
        .chain(
            config
                .modules
                .iter()
                .map(|(module, level)| format!("{module}={level}")),
        )
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("invalid log filter {directives:?}: {e}"))
}

fn open_log_file(file_path: &Path, base_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let resolved = if file_path.is_relative() {
        base_dir.join(file_path)
    } else {
        file_path.to_path_buf()
    };
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = resolved
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log file path has no file name"))?
        .to_os_string();
    let dir = resolved
        .parent()
        .ok_or_else(|| anyhow::anyhow!("log file path has no parent directory"))?;
    Ok(tracing_appender::non_blocking(
        tracing_appender::rolling::never(dir, file_name),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_domains(pairs: &[(&str, &str)]) -> LoggingConfig {
        let mut config = LoggingConfig::default();
        for (domain, level) in pairs {
            config
                .domains
                .insert(domain.to_string(), level.to_string());
        }
        config
    }

    #[test]
    fn palette_covers_all_macro_domains() {
        for domain in ["sys", "conn", "pipe", "res", "conf", "clu"] {
            assert!(domain_color(domain).is_some(), "{domain} missing a color");
        }
        assert!(domain_color("kern").is_none());
    }

    #[test]
    fn domain_caps_drop_verbose_events() {
        let filter =
            DomainLevelFilter::from_config(&config_with_domains(&[("clu", "warn")])).unwrap();
        assert!(filter.allows(Some("clu"), &Level::ERROR));
        assert!(filter.allows(Some("clu"), &Level::WARN));
        assert!(!filter.allows(Some("clu"), &Level::INFO));
        assert!(!filter.allows(Some("clu"), &Level::DEBUG));
        // Uncapped domains and domainless events pass.
        assert!(filter.allows(Some("pipe"), &Level::TRACE));
        assert!(filter.allows(None, &Level::TRACE));
    }

    #[test]
    fn reject_unknown_domain_and_bad_level() {
        assert!(DomainLevelFilter::from_config(&config_with_domains(&[("kern", "info")])).is_err());
        assert!(DomainLevelFilter::from_config(&config_with_domains(&[("clu", "loud")])).is_err());
    }

    #[test]
    fn empty_caps_pass_everything() {
        let filter = DomainLevelFilter::from_config(&LoggingConfig::default()).unwrap();
        assert!(filter.allows(Some("clu"), &Level::TRACE));
    }
}
