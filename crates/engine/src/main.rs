use std::str::FromStr;

use agri_core_common::{
    AnswerOutcome, Collection, EngineConfig, ProviderKind, QueryParams, WorkflowId,
};
use agri_core_engine::{tracing_setup, Engine};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "agri-core", about = "Agricultural query-answering engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question, driving any workflow it spawns to completion
    Query {
        text: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Provider override (groq, perplexity, ollama)
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,
    },
    /// Rebuild vector collections from the reference datasets
    Rebuild {
        /// Collection name; omit to rebuild all
        collection: Option<String>,
    },
    /// Show the progress of a workflow
    Status {
        workflow_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_setup::init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).context("loading configuration")?,
        None => EngineConfig::default(),
    };

    let engine = Engine::new(config).await.context("initializing engine")?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Query {
            text,
            top_k,
            provider,
            model,
        } => {
            let provider = provider
                .map(|p| {
                    ProviderKind::from_str(&p)
                        .map_err(|_| anyhow::anyhow!("unknown provider: {p}"))
                })
                .transpose()?;
            let params = QueryParams {
                top_k,
                provider,
                model,
            };

            match engine.answer(&text, Some(params), &cancel).await? {
                AnswerOutcome::Answer(answer) => {
                    println!("[{}] {}", answer.intent, answer.context_summary);
                    println!("{}", answer.response);
                }
                AnswerOutcome::Workflow(handoff) => {
                    println!(
                        "Complex query, running {} subtasks (workflow {})",
                        handoff.subtasks.len(),
                        handoff.workflow_id
                    );
                    for subtask in &handoff.subtasks {
                        let result = engine
                            .workflow_execute(handoff.workflow_id, subtask.order_index, &cancel)
                            .await?;
                        match (&result.response, &result.error) {
                            (Some(response), _) => {
                                println!("\n[{}] {}", subtask.order_index, subtask.description);
                                println!("{response}");
                            }
                            (_, Some(error)) => {
                                bail!("subtask {} failed: {error}", subtask.order_index)
                            }
                            _ => unreachable!("subtask completed without response or error"),
                        }
                    }
                    let summary = engine.workflow_summary(handoff.workflow_id, &cancel).await?;
                    println!("\nSummary:\n{summary}");
                }
            }
        }
        Commands::Rebuild { collection } => {
            let target = collection
                .map(|name| {
                    Collection::from_str(&name)
                        .map_err(|_| anyhow::anyhow!("unknown collection: {name}"))
                })
                .transpose()?;
            let rebuilt = engine.rebuild_index(target).await?;
            println!("Rebuilt collections: {}", rebuilt.join(", "));
        }
        Commands::Status { workflow_id } => {
            let workflow_id = WorkflowId::from_str(&workflow_id)
                .map_err(|_| anyhow::anyhow!("invalid workflow id: {workflow_id}"))?;
            let snapshot = engine.workflow_status(workflow_id)?;
            println!(
                "{} {} ({}/{} subtasks, {:.0}%)",
                snapshot.workflow_id,
                snapshot.status,
                snapshot.completed.len(),
                snapshot.subtasks.len(),
                snapshot.progress * 100.0
            );
            if let Some(summary) = &snapshot.summary {
                println!("\nSummary:\n{summary}");
            }
        }
    }

    Ok(())
}
