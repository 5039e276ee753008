// procpipe command-line library

pub mod commands;
pub mod error;
pub mod logging;
pub mod router;
pub mod settings;

pub use error::{CliError, CliResult};
pub use logging::init_logging;
pub use router::{Cli, CommandRouter, Commands};
pub use settings::load_settings;
