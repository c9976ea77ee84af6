//! switchboard: a configuration-driven MCP server.
//!
//! Loads a configuration document, builds the dispatcher, and serves it over the
//! selected transport.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use switchboard::errors::ServerError;
use switchboard::handler::registry::HandlerRegistry;
use switchboard::transport::http::serve_http;
use switchboard::transport::sse::serve_sse;
use switchboard::transport::stdio_transport;
use switchboard::{serve, MCPServiceBuilder, ServerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Newline-delimited JSON over stdin/stdout.
    Stdio,
    /// Session-bearing streamable HTTP.
    Http,
    /// Streamable HTTP without sessions.
    HttpStateless,
    /// Legacy SSE (GET /sse + POST /messages).
    Sse,
}

/// A configurable MCP server. Capabilities are declared in the configuration document
/// and bound at runtime to file, inline-expression, HTTP or registry handlers.
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration document
    #[arg(value_name = "CONFIG_FILE")]
    config: PathBuf,

    /// Transport to serve
    #[arg(short, long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Override the port from the configuration document
    #[arg(short, long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Logs go to stderr unconditionally: on the stdio transport, stdout belongs to the
/// protocol.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Handlers implemented in this binary, referenced from configuration as
/// `{ "kind": "registry", "key": "..." }`.
fn builtin_registry() -> Arc<HandlerRegistry> {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register_fn("echo", |args, _ctx| Ok(args));
    registry
}

async fn run(args: Args, config: ServerConfig) -> Result<(), ServerError> {
    let port = args.port.unwrap_or(config.port);
    let cors = config.cors.clone();
    let sweep_interval = config.sweep_interval();

    let service = MCPServiceBuilder::new(config)
        .with_registry(builtin_registry())
        .build();
    service.sessions().spawn_sweeper(sweep_interval);

    match args.transport {
        Transport::Stdio => serve(service, stdio_transport()).await?,
        Transport::Http => serve_http(service, cors, true, port).await?,
        Transport::HttpStateless => serve_http(service, cors, false, port).await?,
        Transport::Sse => serve_sse(service, cors, port).await?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(log_level(args.verbose, args.quiet));

    // A malformed document aborts before any transport opens; every structural problem
    // is reported in one pass.
    let config = match ServerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.name,
        transport = ?args.transport,
        "Starting switchboard"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args, config)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
