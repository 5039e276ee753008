// Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Pick the default log level from CLI flags
pub fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize logging based on CLI flags.
///
/// `RUST_LOG` wins over the flags when set. Calling this twice is harmless.
pub fn init_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose > 2)
        .with_writer(std::io::stderr)
        .try_init();
}
