//! Agent relay CLI entry point.

use clap::Parser;

use agent_relay::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = cli::run(cli).await {
        if json {
            eprintln!("{}", serde_json::json!({ "error": format!("{err:#}") }));
        } else {
            eprintln!("Error: {err:#}");
        }
        std::process::exit(1);
    }
}
