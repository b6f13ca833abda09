use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "skyforge")]
#[command(version, about = "Cloud provisioning orchestrator with webhook progress reporting")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(long, global = true, default_value = skyforge::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the provisioning HTTP service
    Serve {
        /// Address to bind (overrides [server].host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides [server].port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print a blueprint's rendered setup script
    Render {
        blueprint: String,

        /// Template value as KEY=VALUE (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Webhook the script reports to
        #[arg(long)]
        hook_url: Option<String>,
    },
    /// List the available blueprints
    Blueprints,
    /// Show the effective configuration
    Config {
        /// Only validate and print warnings
        #[arg(long)]
        check: bool,
    },
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "skyforge=debug,tower_http=debug"
    } else {
        "skyforge=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Commands::Serve { host, port } => {
            cmd::cmd_serve(&cli.config, host.clone(), *port).await?;
        }
        Commands::Render {
            blueprint,
            params,
            hook_url,
        } => cmd::cmd_render(&cli.config, blueprint, params, hook_url.as_deref())?,
        Commands::Blueprints => cmd::cmd_blueprints(&cli.config)?,
        Commands::Config { check } => cmd::cmd_config(&cli.config, *check)?,
    }

    Ok(())
}
