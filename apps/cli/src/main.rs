use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use sally_core_sdk::{config::Settings, diagnostic, llm, models::Persona, prompt, server, telemetry};

/**
 * \brief Command-line entry point for the Sally chat gateway.
 */
#[derive(Parser, Debug)]
#[command(name = "sally", version, about = "Persona chat gateway for OpenAI")]
struct Cli {
    /** \brief Local override file; its values win over exported variables. */
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /** \brief Also append log lines to `<dir>/sally.log`. */
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief Serve `/health`, `/chat` and `/chat/stream`.
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
    },

    /**
     * \brief Send one message and stream the reply to stdout.
     * \param message Text to send
     * \param role    Persona, e.g. Sister
     * \param name    Optional name to be addressed by
     */
    Chat {
        #[arg(long)]
        message: String,
        #[arg(long)]
        role: Persona,
        #[arg(long)]
        name: Option<String>,
    },

    /**
     * \brief One-shot provider smoke test; prints a JSON report.
     */
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    telemetry::init(cli.verbose, cli.log_dir.as_deref()).context("init logging failed")?;
    let settings = Settings::load(Some(cli.env_file.as_path())).context("load settings failed")?;

    match cli.command {
        Commands::Serve { addr } => {
            server::run(Arc::new(settings), &addr).await?;
        }
        Commands::Chat {
            message,
            role,
            name,
        } => {
            anyhow::ensure!(!message.is_empty(), "message must not be empty");
            let client = llm::OpenAiClient::new(&settings).context("provider not configured")?;
            let messages = prompt::build_messages(&message, role, name.as_deref());

            let mut stream = client
                .stream_complete(&messages)
                .await
                .context("create stream failed")?;

            while let Some(delta) = stream
                .as_mut()
                .next()
                .await
                .transpose()
                .context("stream error")?
            {
                print!("{}", delta);
                std::io::stdout().flush().ok();
            }
            println!();
        }
        Commands::Check => {
            let report = diagnostic::probe(&settings).await;
            println!("{}", serde_json::to_string(&report)?);
            if !report.is_ok() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
