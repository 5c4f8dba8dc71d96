//! Logging setup for the binary

use tracing::Level;

/// Map a `-v` count to a max level: 0 = INFO, 1 = DEBUG, 2+ = TRACE
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the fmt subscriber on stderr.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level_for(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
