//! relais: expose a local TCP service through the relais relay.
//!
//! # Example usage
//!
//! ```bash
//! # Store the auth token once
//! relais set-token tk_yourtoken
//!
//! # Expose localhost:3000 over HTTP
//! relais tunnel -p 3000
//!
//! # TCP tunnel with a pinned remote port and a custom relay
//! relais tunnel -p 5432 -t tcp -r 15432 -s relay.example.com:7000
//! ```

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use relais_agent::{supervisor, SessionConfig, TunnelProtocol};

mod token_store;

/// Reverse-tunnel agent for the relais relay
#[derive(Parser, Debug)]
#[command(
    name = "relais",
    about = "Expose a local TCP service through the relais relay",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store the authentication token for this user
    SetToken { token: String },
    /// Start a tunnel and keep it alive
    Tunnel(TunnelArgs),
}

#[derive(Args, Debug)]
struct TunnelArgs {
    /// Local port to expose
    #[arg(short = 'p', long, env = "RELAIS_LOCAL_PORT")]
    port: u16,

    /// Host the local service listens on
    #[arg(long, env = "RELAIS_LOCAL_HOST", default_value = "localhost")]
    host: String,

    /// Relay server address (host:port)
    #[arg(
        short = 's',
        long = "server",
        env = "RELAIS_SERVER",
        default_value = "relay.relais.dev:7000"
    )]
    server: String,

    /// Tunnel protocol (http or tcp)
    #[arg(
        short = 't',
        long = "type",
        value_parser = parse_protocol,
        default_value = "http"
    )]
    protocol: TunnelProtocol,

    /// Custom domain to request
    #[arg(short = 'd', long, env = "RELAIS_DOMAIN")]
    domain: Option<String>,

    /// Specific remote port to request
    #[arg(short = 'r', long)]
    remote_port: Option<u16>,

    /// Auth token (overrides the stored token)
    #[arg(short = 'k', long)]
    token: Option<String>,

    /// Establishment timeout in seconds (1-300)
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Enable the periodic health checks (default)
    #[arg(long, overrides_with = "no_health_check")]
    health_check: bool,

    /// Disable the periodic health checks
    #[arg(long, overrides_with = "health_check")]
    no_health_check: bool,

    /// Health-check interval in seconds
    #[arg(long, default_value_t = 30)]
    health_check_interval: u64,

    /// Disable control-channel encryption (legacy relays only)
    #[arg(long)]
    insecure: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn parse_protocol(s: &str) -> Result<TunnelProtocol, String> {
    s.parse()
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    match cli.command {
        Commands::SetToken { token } => match token_store::save_token(&token) {
            Ok(path) => {
                println!("✅ Token saved to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("failed to save token: {err:#}");
                ExitCode::from(1)
            }
        },
        Commands::Tunnel(args) => run_tunnel(args).await,
    }
}

async fn run_tunnel(args: TunnelArgs) -> ExitCode {
    init_tracing(args.verbose);

    let token = args.token.clone().or_else(token_store::load_token);
    let health_check = args.health_check || !args.no_health_check;
    let config = SessionConfig::new(args.port, args.server.clone())
        .with_local_host(args.host.clone())
        .with_protocol(args.protocol)
        .with_domain(args.domain.clone())
        .with_remote_port(args.remote_port)
        .with_token(token)
        .with_establish_timeout_secs(args.timeout)
        .with_health_check(health_check)
        .with_health_check_interval_secs(args.health_check_interval)
        .with_encryption(!args.insecure);

    info!(
        relay = %config.relay_addr,
        local = %config.local_addr(),
        protocol = %config.protocol,
        "starting relais agent"
    );
    if config.token.is_none() {
        warn!("no auth token configured; run `relais set-token <token>` if the relay requires one");
    }
    if !config.encryption {
        warn!("⚠️ encryption disabled, the control channel is plaintext");
    }

    tokio::select! {
        err = supervisor::run(config) => {
            error!(error = %err, "agent terminated");
            ExitCode::from(1)
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
            ExitCode::SUCCESS
        }
    }
}
