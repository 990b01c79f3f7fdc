use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use deepchat::models::{OpenAICompatible, DEFAULT_MODEL};
use deepchat::orchestrator::{Orchestrator, TurnOutcome, WorkingChat};
use deepchat::server::{self, AppState};
use deepchat::storage::{ChatStore, FsChatStore};

#[derive(Debug, Parser)]
#[command(name = "deepchat")]
#[command(about = "Chat session store and streaming completion client", long_about = None)]
struct Cli {
    /// Data directory; defaults to the platform data home.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the persistence server the browser client talks to.
    Start {
        #[arg(long, default_value = "127.0.0.1:5000")]
        listen: String,
    },
    /// Submit one turn from the terminal and stream the response to stdout.
    /// Ctrl-C cancels the stream; the partial response is discarded.
    Ask {
        prompt: String,
        /// Continue an existing chat instead of creating a new one.
        #[arg(long)]
        chat: Option<String>,
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
    },
}

fn open_store(data_dir: Option<PathBuf>) -> anyhow::Result<FsChatStore> {
    Ok(match data_dir {
        Some(dir) => FsChatStore::open(dir)?,
        None => FsChatStore::open_default()?,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { listen } => {
            let addr: SocketAddr = listen.parse()?;
            let store = Arc::new(open_store(cli.data_dir)?);
            server::serve(addr, AppState { store }).await?;
        }
        Commands::Ask { prompt, chat, model } => {
            let store = Arc::new(open_store(cli.data_dir)?);
            let orch = Arc::new(Orchestrator::new(store.clone(), Arc::new(OpenAICompatible::from_env())));

            let mut active = match chat {
                Some(id) => {
                    let messages = store.load_chat(&id).await?;
                    Some(WorkingChat { id, name: String::new(), messages })
                }
                None => None,
            };

            {
                let orch = orch.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        orch.cancel();
                    }
                });
            }

            let mut printed = 0;
            let outcome = orch
                .submit(&mut active, &prompt, &model, |live| {
                    print!("{}", &live[printed..]);
                    let _ = std::io::stdout().flush();
                    printed = live.len();
                })
                .await?;
            println!();

            match outcome {
                TurnOutcome::Completed => {}
                TurnOutcome::Skipped => eprintln!("nothing to send"),
                TurnOutcome::Cancelled => eprintln!("cancelled; partial response discarded"),
                TurnOutcome::Failed => {
                    if let Some(active) = &active {
                        if let Some(last) = active.messages.last() {
                            eprintln!("{}", last.content);
                        }
                    }
                }
                TurnOutcome::CompletedSaveFailed => {
                    eprintln!("response received but could not be saved");
                }
            }
            if let Some(active) = &active {
                eprintln!("chat: {}", active.id);
            }
        }
    }
    Ok(())
}
