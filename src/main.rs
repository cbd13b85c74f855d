//! bnserve CLI: inspect and query Bayesian networks offline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use bnserve::api::{InferRequest, QueryService};
use bnserve::config::{ConfigOverrides, ServeConfig};
use bnserve::error::ServeError;
use bnserve::registry::NetworkRegistry;

#[derive(Parser)]
#[command(name = "bnserve", version, about = "Bayesian network inference from the command line")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the networks found in the network directory.
    Nets,

    /// Describe a network, or one of its nodes.
    Describe {
        /// Network name or index.
        net: String,
        /// Node name or index.
        node: Option<String>,
    },

    /// Run a batch of cases and print the inferred value of a target node.
    Infer {
        /// Network name or index.
        net: String,
        /// Target node name or index.
        node: String,
        /// JSON file with `{"id": ..., "cases": [{"Node": "evidence"}, ...]}`.
        #[arg(long)]
        cases: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServeConfig::resolve(&cli.overrides).map_err(ServeError::from)?;

    let registry = NetworkRegistry::from_config(&config)?;
    let engine = Arc::clone(registry.engine());
    tracing::debug!(banner = engine.banner(), "engine ready");
    let service = QueryService::new(Arc::clone(&registry), config.api_prefix());

    let outcome = run(&service, cli.command);

    registry.close_all();
    engine.shutdown().map_err(ServeError::from)?;
    outcome
}

fn run(service: &QueryService, command: Commands) -> Result<()> {
    match command {
        Commands::Nets => {
            let nets = service.list_networks();
            if nets.is_empty() {
                println!("No networks loaded.");
            }
            for net in nets {
                if net.title.is_empty() {
                    println!("{:>4}  {}", net.index, net.name);
                } else {
                    println!("{:>4}  {}  ({})", net.index, net.name, net.title);
                }
            }
        }
        Commands::Describe { net, node } => {
            let json = match node {
                Some(node) => serde_json::to_string_pretty(&service.describe_node(&net, &node)?),
                None => serde_json::to_string_pretty(&service.describe_network(&net)?),
            }
            .into_diagnostic()?;
            println!("{json}");
        }
        Commands::Infer { net, node, cases } => {
            let content = std::fs::read_to_string(&cases).into_diagnostic()?;
            let request: InferRequest = serde_json::from_str(&content).into_diagnostic()?;
            let response = service.infer(&net, &node, request)?;
            println!("{}", serde_json::to_string_pretty(&response).into_diagnostic()?);
        }
    }
    Ok(())
}
