//! HCQA CLI - Command-line interface
//!
//! Usage:
//!   hcqa serve [--config <file>]
//!   hcqa ask <question>
//!   hcqa chat
//!   hcqa upload <file.jsonl>

mod client;

use anyhow::Context;
use clap::{Parser, Subcommand};
use client::HcqaClient;
use hcqa_core::config::AppConfig;
use hcqa_rag::parse_json_lines;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "hcqa")]
#[command(about = "Healthcare question answering over streaming documents")]
#[command(version)]
struct Cli {
    /// Server address for client commands
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// User name sent with each query
    #[arg(long, global = true, default_value = "user")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion and query server in this process
    Serve {
        /// TOML configuration file; environment variables still override it
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Ask a single question
    Ask {
        /// Question to ask
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Ask questions read from stdin, one per line
    Chat,
    /// Upload a JSON Lines file of `{"doc": "..."}` records
    Upload {
        /// Path to the JSON Lines file
        path: PathBuf,

        /// Documents per request
        #[arg(long, default_value_t = 500)]
        batch_size: usize,

        /// Return only after the server has committed the documents
        #[arg(long)]
        wait: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let config = AppConfig::load(config.as_deref())?;
            hcqa_api::init_tracing(&config.logging);
            hcqa_api::serve(config).await?;
        }
        Commands::Ask { question } => {
            init_client_tracing();
            let client = HcqaClient::new(&cli.url);
            let answer = client.ask(&question.join(" "), &cli.user).await?;
            println!("{answer}");
        }
        Commands::Chat => {
            init_client_tracing();
            chat(&HcqaClient::new(&cli.url), &cli.user).await?;
        }
        Commands::Upload {
            path,
            batch_size,
            wait,
        } => {
            init_client_tracing();
            upload(&HcqaClient::new(&cli.url), &path, batch_size, wait).await?;
        }
    }

    Ok(())
}

fn init_client_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn chat(client: &HcqaClient, user: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut asked = 0usize;

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        asked += 1;
        match client.ask(line, user).await {
            Ok(answer) => println!("{answer}"),
            // One failed question does not end the session
            Err(e) => eprintln!("error: {e:#}"),
        }
    }

    tracing::debug!(asked, "Chat session ended");
    Ok(())
}

async fn upload(
    client: &HcqaClient,
    path: &Path,
    batch_size: usize,
    wait: bool,
) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = parse_json_lines(&content);

    println!(
        "Parsed {} documents from {}",
        parsed.documents.len(),
        path.display()
    );
    if !parsed.rejected_lines.is_empty() {
        println!(
            "Skipped {} invalid lines: {:?}",
            parsed.rejected_lines.len(),
            parsed.rejected_lines
        );
    }

    let mut accepted = 0usize;
    for batch in parsed.documents.chunks(batch_size.max(1)) {
        let response = client.upload(batch, wait).await?;
        accepted += response.accepted.len();
        tracing::debug!(batch = batch.len(), accepted, "Batch uploaded");
    }

    if wait {
        println!("Uploaded {accepted} documents; they are searchable now");
    } else {
        println!("Uploaded {accepted} documents");
    }
    Ok(())
}
