use clap::Parser;
use pulp_squeezer::{run, Cli};
use pulp_squeezer_core::SqueezerError;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries only the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) => match serde_json::to_string(&report) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                println!("{}", json!({ "failed": true, "msg": format!("failed to render result: {e}") }));
                std::process::exit(1);
            }
        },
        Err(e) => {
            println!("{}", json!({ "failed": true, "msg": format!("{e:#}") }));
            let setup = e
                .downcast_ref::<SqueezerError>()
                .is_some_and(SqueezerError::is_setup);
            std::process::exit(if setup { 2 } else { 1 });
        }
    }
}
