use env_logger::{Builder, Target};
use log::LevelFilter;

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Warn;

/// Routes the `log` macros to stderr; stdout carries only the JSON result.
/// `RUST_LOG` overrides the build-profile default level.
pub fn init()
{
    // A logger may already be installed, e.g. by a test harness.
    let _ = Builder::new()
        .filter_level(LOG_LEVEL)
        .parse_default_env()
        .target(Target::Stderr)
        .try_init();
}
