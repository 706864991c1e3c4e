use std::path::PathBuf;

use anyhow::Result;
use atlassian_mcp_gateway::{
    AuthContext, GatewayConfig, HeaderBag, create_gateway, load_config, serve_http, serve_stdio,
};
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atlassian-mcp-gateway")]
#[command(about = "MCP gateway for Jira and Confluence")]
struct Cli {
    /// Path to the gateway JSON config (defaults to $GATEWAY_CONFIG, then ./gateway.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server token that unlocks the configured system credentials over HTTP
    #[arg(long, global = true, env = "GATEWAY_SERVER_TOKEN", hide_env_values = true)]
    server_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdin/stdout (for use in mcp.json)
    Stdio,
    /// Serve MCP over HTTP (`POST /mcp`) and SSE (`GET /sse`)
    Http {
        /// Bind address, e.g. 0.0.0.0:3000 (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the tool registry and exit
    Tools,
}

fn gateway_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(token) = &cli.server_token {
        config.server_token = Some(token.clone());
    }
    if let Commands::Http { bind: Some(bind) } = &cli.command {
        config.bind = bind.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the stdio transport
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("atlassian_mcp_gateway=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let config = gateway_config(&cli)?;
    let bind = config.bind.clone();
    let state = create_gateway(config)?;

    match cli.command {
        Commands::Stdio => {
            let auth = state.resolver.system_context().unwrap_or_else(|e| {
                warn!(error = %e, "No system credentials; stdio tool calls will fail");
                AuthContext::system(HeaderBag::new())
            });
            serve_stdio(state.router.clone(), auth).await?;
        }
        Commands::Http { .. } => {
            serve_http(state, &bind).await?;
        }
        Commands::Tools => {
            let registry = state.router.dispatcher().snapshot().await;
            info!(count = registry.len(), "Tool registry");
            println!("{}", serde_json::to_string_pretty(&registry.summary())?);
        }
    }

    Ok(())
}
