// sprig dev server — binary entry point.

use sprig::cli::CliHandler;
use sprig::utils::errors::SprigError;

#[tokio::main]
async fn main() {
    let handler = CliHandler::new();

    if let Err(err) = handler.run().await {
        match &err {
            SprigError::Transform { .. } => eprintln!("{}", err.format_detailed()),
            _ => eprintln!("error: {}", err),
        }
        std::process::exit(1);
    }
}
