//! Process-wide tracing setup for larder binaries.
//!
//! Console output goes to stderr so stdout stays free for the bridge
//! protocol. Setting `LARDER_SCAN_LOG_ROLL=1` additionally writes the
//! `larder::scan` target to a rolling file.

use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

pub const SCAN_TARGET: &str = "larder::scan";

static SCAN_LOG_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Where the scan log rolls to, when enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLogSettings {
    pub dir: PathBuf,
    pub prefix: String,
    pub rotation: Rotation,
}

impl ScanLogSettings {
    /// `None` unless `LARDER_SCAN_LOG_ROLL=1`.
    pub fn from_env() -> Option<Self> {
        if std::env::var("LARDER_SCAN_LOG_ROLL").ok().as_deref() != Some("1") {
            return None;
        }
        let dir = std::env::var("LARDER_SCAN_LOG_DIR")
            .ok()
            .or_else(|| std::env::var("LARDER_LOGS_DIR").ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "logs".to_string());
        let prefix = std::env::var("LARDER_SCAN_LOG_PREFIX").unwrap_or_else(|_| "scan".into());
        let rotation = std::env::var("LARDER_SCAN_LOG_ROTATION")
            .map(|r| Rotation::parse(&r))
            .unwrap_or(Rotation::Daily);
        Some(Self {
            dir: PathBuf::from(dir),
            prefix,
            rotation,
        })
    }

    fn appender(&self) -> tracing_appender::rolling::RollingFileAppender {
        match self.rotation {
            Rotation::Hourly => tracing_appender::rolling::hourly(&self.dir, &self.prefix),
            Rotation::Minutely => tracing_appender::rolling::minutely(&self.dir, &self.prefix),
            Rotation::Daily => tracing_appender::rolling::daily(&self.dir, &self.prefix),
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);
    let registry = tracing_subscriber::registry().with(console);

    let Some(settings) = ScanLogSettings::from_env() else {
        let _ = registry.try_init();
        return;
    };
    if std::fs::create_dir_all(&settings.dir).is_err() {
        eprintln!(
            "larder: failed to create scan log directory {}",
            settings.dir.display()
        );
        let _ = registry.try_init();
        return;
    }
    let (nb, guard) = tracing_appender::non_blocking(settings.appender());
    let _ = SCAN_LOG_GUARD.set(guard);
    let targets = Targets::new().with_target(SCAN_TARGET, tracing::Level::INFO);
    let scan_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(nb)
        .with_filter(targets);
    let _ = registry.with(scan_layer).try_init();
}
