//! Process-wide log output.
//!
//! `RUST_LOG` takes precedence over the `[logging]` section:
//! ```bash
//! RUST_LOG=debug debias run data.csv
//! RUST_LOG=debias::cluster=trace,debias::pipeline=debug debias run data.csv
//! ```
//!
//! Per-job diagnostics are kept separately in each job's `status.json`.

use std::sync::Once;

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// `HH:MM:SS.mmm`
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directive built from `config`: the default level followed by
/// `module=level` overrides in sorted order.
pub fn filter_directive(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    let mut directive = config.default.clone();
    for (module, level) in modules {
        directive.push_str(&format!(",{module}={level}"));
    }
    directive
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directive(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_writer(std::io::stderr)
            .with_filter(filter);

        // A subscriber installed elsewhere (tests, embedding apps) wins.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

pub fn init() {
    init_with_config(&LoggingConfig::default());
}
