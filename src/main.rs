mod config;
mod io;
mod logging;
mod lsp;
mod server;

#[cfg(test)]
mod test_utils;

use clap::Parser;
use config::{DEFAULT_COMPILER_TIMEOUT_SECS, DEFAULT_DEBOUNCE_MS, ServerConfig};
use io::{ExternalCompiler, StdioTransport};
use logging::{LogConfig, init_logging};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// CLI arguments for the LPython language server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the lpython executable (overrides LPYTHON_PATH env var)
    #[arg(long, value_name = "PATH")]
    compiler_path: Option<String>,

    /// Cooldown between two validations of the same document
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_DEBOUNCE_MS)]
    debounce_ms: u64,

    /// Kill the compiler after this many seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_COMPILER_TIMEOUT_SECS)]
    compiler_timeout_secs: u64,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides LPYTHON_LSP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Talk LSP over stdin/stdout. Accepted for editor compatibility; stdio
    /// is the only transport.
    #[arg(long)]
    stdio: bool,
}

fn build_config(args: &Args) -> Result<ServerConfig, config::ConfigError> {
    let mut builder = ServerConfig::builder();
    if let Some(path) = &args.compiler_path {
        builder = builder.compiler_path(path.clone());
    }

    builder
        .compiler_path_from_env()
        .debounce(Duration::from_millis(args.debounce_ms))
        .compiler_timeout(Duration::from_secs(args.compiler_timeout_secs))
        .build()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Stdout carries the protocol, so logs go to stderr or a file
    let log_config =
        LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Starting {} {} (stdio: {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        args.stdio
    );

    let compiler = ExternalCompiler::new(config.compiler_timeout);
    let status = server::serve(
        StdioTransport::from_process_stdio(),
        config,
        Arc::new(compiler),
    )
    .await;

    info!("Server stopped: {:?}", status);
    std::process::exit(status.code());
}
