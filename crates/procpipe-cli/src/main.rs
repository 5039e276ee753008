// procpipe CLI entry point

use procpipe_cli::router::CommandRouter;

fn main() {
    match CommandRouter::route() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            tracing::debug!(details = %e.technical_details(), "Command failed");
            std::process::exit(e.exit_code());
        }
    }
}
