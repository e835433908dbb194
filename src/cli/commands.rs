//! CLI commands

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::environment::{RecordStoreFactory, Task};
use crate::subject::{ScriptedAgent, SubjectServer};
use crate::transport::TransportMode;

#[derive(Parser)]
#[command(name = "assessor")]
#[command(about = "Run turn-based evaluation sessions against a subject agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config path (default: ~/.assessor/config.yml)
    #[arg(long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an assessment and print the results
    Run {
        /// Task definition (YAML)
        #[arg(long)]
        task: String,

        /// Subject peer id
        #[arg(long)]
        subject: String,

        /// Transport mode (direct, relayed); defaults to the config's
        #[arg(long)]
        mode: Option<String>,

        /// Number of independent sessions to run
        #[arg(long, default_value = "1")]
        repeat: usize,

        /// Drop the relay registration afterwards
        #[arg(long)]
        release: bool,
    },

    /// Resolve a peer and print its binding
    Resolve {
        /// Peer id
        peer: String,

        /// Transport mode (direct, relayed)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Host a scripted subject agent
    ServeSubject {
        /// Port number
        #[arg(long, default_value = "9101")]
        port: u16,

        /// Script of actions (YAML)
        #[arg(long)]
        script: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Create a multi-threaded runtime for CLI operations
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        match cli.command {
        Commands::Run {
            task,
            subject,
            mode,
            repeat,
            release,
        } => {
            let mode = parse_mode(mode.as_deref(), &config)?;
            let task = Arc::new(Task::load(&task)?);
            let coordinator = Coordinator::from_config(&config, Arc::new(RecordStoreFactory));

            let cancel = CancelToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling sessions");
                    on_interrupt.cancel();
                }
            });

            let results = coordinator
                .run_repeated(task, &subject, mode, repeat.max(1), cancel)
                .await;

            for result in &results {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
            let completed = results.iter().filter(|r| r.is_success()).count();
            let total_reward: f64 = results.iter().map(|r| r.reward).sum();
            println!(
                "{}/{} session(s) completed, mean reward {:.3}",
                completed,
                results.len(),
                total_reward / results.len().max(1) as f64
            );

            if release {
                coordinator.release(&subject, mode).await?;
            }
            Ok(())
        }

        Commands::Resolve { peer, mode } => {
            let mode = parse_mode(mode.as_deref(), &config)?;
            let coordinator = Coordinator::from_config(&config, Arc::new(RecordStoreFactory));

            let binding = coordinator
                .resolve(&peer, mode, &CancelToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&binding)?);
            Ok(())
        }

        Commands::ServeSubject { port, script } => {
            let agent = ScriptedAgent::load(&script)?;
            tracing::info!(
                "Serving scripted subject ({} action(s)) on port {}",
                agent.actions.len(),
                port
            );

            let listener = TcpListener::bind(format!("0.0.0.0:{}", port))
                .await
                .with_context(|| format!("Failed to bind port {}", port))?;
            SubjectServer::new(Arc::new(agent)).serve(listener).await
        }
        }
    })
}

fn parse_mode(mode: Option<&str>, config: &Config) -> Result<TransportMode> {
    match mode {
        Some(m) => TransportMode::from_str(m),
        None => Ok(config.mode),
    }
}
