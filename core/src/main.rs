/// WardLink CLI - main entry point
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize tracing; quiet by default so command output stays readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn"))
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    // Errors are already printed by the CLI layer
    if wardlink_core::cli_app::run(args).await.is_err() {
        std::process::exit(1);
    }
}
