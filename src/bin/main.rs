use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use client_auth_pipeline::auth::{authority_strings, generate_client_secret};
use client_auth_pipeline::{ContextStrategy, MethodRestriction, PipelineConfig};

#[derive(Parser)]
#[command(name = "client-auth-pipeline")]
#[command(about = "OAuth client credentials authentication pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the token endpoint behind the authentication pipeline
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "127.0.0.1:8080", env = "AUTH_PIPELINE_BIND")]
        bind: String,
        /// Path to the pipeline config (defaults to AUTH_PIPELINE_CONFIG or ./auth-pipeline.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the token endpoint path
        #[arg(long)]
        mount_path: Option<String>,
        /// Only accept POST on the token endpoint
        #[arg(long, default_value_t = false)]
        post_only: bool,
        /// Override the security context strategy
        #[arg(long, value_enum)]
        strategy: Option<ContextStrategy>,
    },
    /// Generate a new client secret and its stored hash
    GenerateSecret,
    /// Load and validate a pipeline config
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("client_auth_pipeline=info".parse()?)
                .add_directive("tower_http=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            config,
            mount_path,
            post_only,
            strategy,
        } => {
            let mut pipeline_config = PipelineConfig::load(config.as_deref())?;

            if let Some(path) = mount_path {
                pipeline_config.mount_path = path;
            }
            if post_only {
                pipeline_config.method_restriction = MethodRestriction::PostOnly;
            }
            if let Some(strategy) = strategy {
                pipeline_config.context_strategy = strategy;
            }

            info!(
                "Starting client authentication server ({} clients, {} strategy)",
                pipeline_config.clients.len(),
                pipeline_config.context_strategy
            );
            client_auth_pipeline::server::serve(pipeline_config, &bind).await?;
        }
        Commands::GenerateSecret => {
            let (secret, hash) = generate_client_secret();

            println!("Client secret generated successfully!");
            println!();
            println!("  Secret:  {}", secret);
            println!("  SHA-256: {}", hash);
            println!();
            println!("IMPORTANT: Save this secret now. Only the hash belongs in the config.");
            println!("Use with: \"client_secret_hash\": \"{}\"", hash);
        }
        Commands::CheckConfig { config } => {
            let pipeline_config = PipelineConfig::load(config.as_deref())?;
            pipeline_config.validate()?;
            let store = pipeline_config.client_store()?;

            println!(
                "Config OK: mount path {}{}, methods {:?}, strategy {}",
                pipeline_config.context_path,
                pipeline_config.mount_path,
                pipeline_config.method_restriction,
                pipeline_config.context_strategy
            );
            println!();

            let clients = store.list().await;
            if clients.is_empty() {
                println!("No clients configured.");
                return Ok(());
            }

            println!(
                "{:<24} {:<14} {:<10} {}",
                "CLIENT ID", "TYPE", "STATUS", "AUTHORITIES"
            );
            println!("{}", "-".repeat(80));

            for client in clients {
                let kind = if client.secret_hash.is_some() {
                    "confidential"
                } else {
                    "public"
                };
                let status = if client.disabled {
                    "Disabled"
                } else if client.locked {
                    "Locked"
                } else {
                    "Active"
                };
                let authorities: Vec<String> =
                    authority_strings(&client.authorities).into_iter().collect();

                println!(
                    "{:<24} {:<14} {:<10} {}",
                    client.client_id,
                    kind,
                    status,
                    authorities.join(", ")
                );
            }
        }
    }

    Ok(())
}
