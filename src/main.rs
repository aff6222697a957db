// SPDX-License-Identifier: MIT

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use leadflow_rs::nurture::builder::{Builder, Runtime};
use leadflow_rs::nurture::config::{NurtureConfig, StoreConfig};
use leadflow_rs::nurture::workflow::engine::RunOutcome;
use leadflow_rs::nurture::server;
use leadflow_rs::nurture::workflow::gateway::ResumeEvent;
use leadflow_rs::nurture::workflow::state::{InboundReply, NewLead};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
    /// Start a run for the lead described in a JSON file
    Start {
        #[arg(short, long)]
        lead: PathBuf,
    },
    /// Record a review decision for a run awaiting approval
    Approve {
        #[arg(long)]
        run_id: String,

        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        approved: bool,
    },
    /// Record an inbound reply
    Reply {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        content: String,

        #[arg(long, default_value = "cli")]
        source: String,
    },
    /// Fire timeouts for runs whose reply window has closed
    CheckTimeouts,
    /// Cancel a run
    Cancel {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        reason: Option<String>,
    },
    /// Print a run record
    Show {
        #[arg(long)]
        run_id: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<NurtureConfig> {
    let config = match path {
        Some(path) => NurtureConfig::load(path)?,
        None => NurtureConfig::from_env()?,
    };
    Ok(config)
}

async fn runtime(config: NurtureConfig) -> anyhow::Result<Runtime> {
    if config.store == StoreConfig::Memory {
        log::warn!("Using the in-memory store, runs are lost on exit");
    }
    Ok(Builder::new(config).build().await?)
}

/// Print `output`, noting when the run still needs something from outside
fn report<T: Serialize>(run_id: &str, outcome: &RunOutcome, output: &T) -> anyhow::Result<()> {
    if !outcome.is_terminal() {
        log::info!("Run {} is not finished: {:?}", run_id, outcome);
    }
    print_json(output)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Commands::Serve { port } => {
            let runtime = runtime(config).await?;
            server::serve(runtime, port)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        Commands::Start { lead } => {
            let content = std::fs::read_to_string(&lead)
                .with_context(|| format!("cannot read lead file {:?}", lead))?;
            let lead: NewLead = serde_json::from_str(&content).context("invalid lead JSON")?;
            let runtime = runtime(config).await?;
            let started = runtime.gateway.start(lead).await?;
            report(&started.run_id, &started.outcome, &started)?;
        }
        Commands::Approve { run_id, approved } => {
            let runtime = runtime(config).await?;
            let outcome = runtime
                .gateway
                .resume(&run_id, ResumeEvent::Approval { approved })
                .await?;
            report(&run_id, &outcome, &outcome)?;
        }
        Commands::Reply {
            run_id,
            content,
            source,
        } => {
            let runtime = runtime(config).await?;
            let reply = InboundReply {
                content,
                received_at: chrono::Utc::now(),
                source,
            };
            let outcome = runtime
                .gateway
                .resume(&run_id, ResumeEvent::InboundReply(reply))
                .await?;
            report(&run_id, &outcome, &outcome)?;
        }
        Commands::CheckTimeouts => {
            let runtime = runtime(config).await?;
            let fired = runtime.gateway.check_timeouts(chrono::Utc::now()).await?;
            print_json(&fired)?;
        }
        Commands::Cancel { run_id, reason } => {
            let runtime = runtime(config).await?;
            let outcome = runtime
                .gateway
                .resume(&run_id, ResumeEvent::Cancel { reason })
                .await?;
            report(&run_id, &outcome, &outcome)?;
        }
        Commands::Show { run_id } => {
            let runtime = runtime(config).await?;
            let record = runtime.gateway.engine().store().get(&run_id).await?;
            println!("{}", record.state.describe());
            print_json(&record)?;
        }
    }

    Ok(())
}
