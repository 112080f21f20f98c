//! gesp - governance rule tool
//!
//! Usage: gesp <command>
//!
//! Reads config from GESP_CONFIG (or config/gesp.yaml), with
//! GESP_MAX_STEPS and GESP_MAX_SOURCE_LEN overrides.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use gesp_core::{compile_source, Context, GespConfig, Outcome, Vm};

mod simulate;

#[derive(Parser)]
#[command(name = "gesp")]
#[command(about = "Compile, run and simulate gesp governance rules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and type-check a program, printing its type
    Check { source: String },

    /// Print a program's bytecode and fingerprint as JSON
    Compile { source: String },

    /// Run a program against a hand-built context
    Eval {
        source: String,
        #[arg(long, default_value = "1")]
        initiator: u64,
        #[arg(long, default_value = "0")]
        channel: u64,
        /// Comma-separated named users
        #[arg(long, value_delimiter = ',')]
        named: Vec<u64>,
        /// Comma-separated members
        #[arg(long, value_delimiter = ',')]
        members: Vec<u64>,
        #[arg(long)]
        candidate: Option<u64>,
        /// Value of (answer)
        #[arg(long)]
        answer: Option<bool>,
    },

    /// Run a majority vote end to end against the in-memory store
    Simulate {
        #[arg(long, default_value = "5")]
        members: u64,
        /// How many members vote yes, in order
        #[arg(long, default_value = "3")]
        yes: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gesp_core=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = GespConfig::from_env()?;

    match cli.command {
        Command::Check { source } => {
            let program = compile_source(&source, config.max_source_len)?;
            println!("{}", program.result_type);
        }
        Command::Compile { source } => {
            let program = compile_source(&source, config.max_source_len)?;
            println!("{}", serde_json::to_string_pretty(&program)?);
        }
        Command::Eval {
            source,
            initiator,
            channel,
            named,
            members,
            candidate,
            answer,
        } => {
            let program = compile_source(&source, config.max_source_len)?;
            let mut context = Context::new(initiator, channel)
                .with_named(named)
                .with_members(members)
                .with_candidate(candidate);
            context.answer = answer;

            match Vm::new(config.max_steps).evaluate(&program.program, context)? {
                Outcome::Done(value) => println!("{value}"),
                Outcome::Suspended(suspension) => println!(
                    "{}",
                    serde_json::to_string_pretty(&suspension)
                        .context("Failed to render suspension")?
                ),
            }
        }
        Command::Simulate { members, yes } => simulate::run(config, members, yes).await?,
    }

    Ok(())
}
