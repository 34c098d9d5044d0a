use anyhow::{Context, Result};
use appforge::config::AppForgeConfig;
use appforge::logging::{LogOptions, init_tracing};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "appforge")]
#[command(version, about = "Turn a one-line app idea into a deployed preview")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to appforge.toml (defaults to .appforge/appforge.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Build server URL, overrides [client].server_url
    #[arg(long, global = true, env = "APPFORGE_SERVER_URL")]
    pub server_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the build API server and pipeline runner
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive)
        #[arg(long)]
        dev: bool,

        /// Open the health page in a browser once the server is up
        #[arg(long)]
        open: bool,
    },
    /// Launch a build from a prompt and watch it
    Build {
        /// What the app should do
        prompt: String,

        #[arg(long, env = "APPFORGE_OWNER", default_value = "local")]
        owner: String,

        /// Stop after the specification so it can be reviewed
        #[arg(long)]
        review: bool,

        /// Print the job id and exit
        #[arg(long)]
        no_watch: bool,

        /// Open the preview in a browser when done
        #[arg(long)]
        open: bool,
    },
    /// Watch an existing build job
    Watch {
        job_id: String,

        /// Offer to continue when the job waits for review
        #[arg(long)]
        review: bool,

        #[arg(long)]
        open: bool,
    },
    /// Continue a job waiting for specification review
    Resume {
        job_id: String,

        #[arg(long)]
        no_watch: bool,
    },
    /// Print a job as JSON
    Show { job_id: String },
    /// List recent build jobs
    List {
        #[arg(long, env = "APPFORGE_OWNER", default_value = "local")]
        owner: String,

        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config =
        AppForgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = &cli.server_url {
        config.client.server_url = url.clone();
    }
    if let Commands::Serve {
        port, db_path, dev, ..
    } = &cli.command
    {
        if let Some(port) = port {
            config.server.port = *port;
        }
        if let Some(db_path) = db_path {
            config.server.db_path = db_path.clone();
        }
        config.server.dev_mode |= *dev;
    }

    // Only the server writes a log file.
    let log_dir = match &cli.command {
        Commands::Serve { .. } => config.server.log_dir.clone(),
        _ => None,
    };
    let _guard = init_tracing(LogOptions {
        verbose: cli.verbose,
        json: LogOptions::json_from_env(),
        log_dir: log_dir.as_deref(),
    });

    match &cli.command {
        Commands::Serve { open, .. } => cmd::cmd_serve(&config, *open).await?,
        Commands::Build {
            prompt,
            owner,
            review,
            no_watch,
            open,
        } => {
            let options = cmd::WatchOptions {
                review: *review,
                open: *open,
            };
            cmd::cmd_build(&config, prompt, owner, *no_watch, options).await?;
        }
        Commands::Watch {
            job_id,
            review,
            open,
        } => {
            let options = cmd::WatchOptions {
                review: *review,
                open: *open,
            };
            cmd::cmd_watch(&config, job_id, options).await?;
        }
        Commands::Resume { job_id, no_watch } => {
            cmd::cmd_resume(&config, job_id, *no_watch).await?
        }
        Commands::Show { job_id } => cmd::cmd_show(&config, job_id).await?,
        Commands::List { owner, limit } => cmd::cmd_list(&config, owner, *limit).await?,
    }

    Ok(())
}
