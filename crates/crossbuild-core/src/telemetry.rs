//! Log setup for `crossbuild`.
//!
//! Job and step events carry the target triple as a `triple` field, so the
//! module path is left out of each line. Without `RUST_LOG`, only the
//! crossbuild crates log at the requested level and everything else is held
//! to warnings.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    format!("warn,crossbuild_core={0},crossbuild={0}", level.as_str().to_lowercase())
}

/// Install the global subscriber, writing to stderr.
///
/// `json` switches to one JSON object per event. Only the first call in a
/// process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
