//! Entry point: parses CLI arguments and dispatches to the runner.

use containerize_rs::cli::Args;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if let Err(e) = containerize_rs::cli::run(args).await {
        eprintln!("❌ ERROR: {e}");
        std::process::exit(1);
    }
    Ok(())
}
