use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use tracing::{error, info, warn};

use crate::RagError;
use crate::config::Config;
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::indexer::IngestionDriver;
use crate::ollama::OllamaClient;
use crate::query::{Answer, QueryDriver};

const RECENT_RUNS: i64 = 5;

/// Build or update the index from the configured data directories
#[inline]
pub async fn ingest(config: Config, rebuild: bool) -> Result<()> {
    info!("Ingesting corpus (rebuild: {})", rebuild);

    let mut driver = IngestionDriver::from_config(config, rebuild).await?;
    match driver.run(rebuild).await {
        Ok(report) => {
            println!("{}", style("✓ Ingestion complete").green());
            println!("  Documents loaded: {}", report.documents);
            println!("  Unchanged sources skipped: {}", report.skipped_unchanged);
            println!("  Chunks created: {}", report.chunks);
            println!("  Entries written: {}", report.entries_written);
            Ok(())
        }
        Err(RagError::NoDocumentsFound(dirs)) => {
            warn!("No documents found in {}", dirs);
            println!(
                "{} No documents found in {}",
                style("⚠").yellow(),
                style(dirs).cyan()
            );
            Ok(())
        }
        Err(e) => Err(e).context("Ingestion failed"),
    }
}

/// Answer a single question without conversation history
#[inline]
pub async fn ask(config: &Config, question: &str) -> Result<()> {
    let mut driver = QueryDriver::from_config(config).await?;
    let answer = driver.ask(question).await?;
    print_answer(&answer);
    Ok(())
}

/// Interactive session; `exit` or `quit` ends it
#[inline]
pub async fn chat(config: &Config) -> Result<()> {
    let mut driver = QueryDriver::from_config(config).await?;

    println!(
        "{}",
        style("Ask about council agendas and minutes. Type 'exit' to quit.").dim()
    );

    loop {
        let line: String = match Input::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()
        {
            Ok(line) => line,
            Err(e) => {
                info!("Input closed: {}", e);
                break;
            }
        };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit_command(question) {
            break;
        }

        match driver.ask(question).await {
            Ok(answer) => print_answer(&answer),
            Err(RagError::ModelUnavailable(message)) => {
                warn!("Turn failed: {}", message);
                println!(
                    "{} Model unavailable: {}",
                    style("⚠").yellow(),
                    message
                );
            }
            Err(e) => {
                error!("Chat session aborted: {}", e);
                return Err(e.into());
            }
        }
    }

    println!(
        "Session ended after {} turns.",
        driver.history().len()
    );
    Ok(())
}

/// Show index statistics, model health and recent ingestion runs
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("{}", style("📊 Council RAG Status").bold().cyan());
    println!("{}", "=".repeat(50));
    println!();

    println!("{}", style("🤖 Ollama:").bold().yellow());
    match OllamaClient::new(&config.ollama).and_then(|client| client.health_check()) {
        Ok(()) => println!(
            "   ✅ Connected ({}:{}), models {} and {} available",
            config.ollama.host,
            config.ollama.port,
            config.ollama.embedding_model,
            config.ollama.chat_model
        ),
        Err(e) => println!("   ⚠️  {}", e),
    }

    println!();
    println!("{}", style("🔍 Vector Index:").bold().yellow());
    match VectorStore::open_existing(config).await {
        Ok(store) => {
            let count = store.count().await?;
            let sources = store.sources().await?;
            println!("   Entries: {}", count);
            println!("   Sources: {}", sources.len());
            println!("   Dimension: {}", store.dimension());
        }
        Err(e) => println!("   ❌ {}", e),
    }

    println!();
    println!("{}", style("🗄️  Catalog:").bold().yellow());
    match Database::open_existing(config).await {
        Ok(database) => print_catalog(&database).await?,
        Err(e) => println!("   ❌ {}", e),
    }

    Ok(())
}

async fn print_catalog(database: &Database) -> Result<()> {
    match database.manifest().await? {
        Some(manifest) => println!(
            "   Embedding model: {} ({} dimensions, pinned {})",
            manifest.embedding_model,
            manifest.embedding_dimension,
            manifest.created_date.format("%Y-%m-%d %H:%M")
        ),
        None => println!("   Index has not been built yet. Run 'council-rag ingest'."),
    }
    println!("   Ingested files: {}", database.list_sources().await?.len());

    let runs = database.recent_runs(RECENT_RUNS).await?;
    if !runs.is_empty() {
        println!();
        println!("{}", style("🔄 Recent Ingestion Runs:").bold().yellow());
    }
    for run in runs {
        let duration = run
            .duration()
            .map(|d| format!("{}s", d.num_seconds()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   #{} {} {} ({}{}): {} documents, {} chunks, {} written",
            run.id,
            run.started_date.format("%Y-%m-%d %H:%M"),
            run.status,
            duration,
            if run.rebuild { ", rebuild" } else { "" },
            run.documents,
            run.chunks,
            run.entries_written
        );
        if let Some(message) = run.error_message {
            println!("      {}", style(message).red());
        }
    }

    Ok(())
}

fn print_answer(answer: &Answer) {
    println!();
    println!("{}", answer.text.trim());

    if !answer.sources.is_empty() {
        println!();
        println!("{}", style("Sources:").dim());
        for (i, source) in answer.sources.iter().enumerate() {
            println!(
                "  [{}] {} {}",
                i + 1,
                source.metadata.citation(),
                style(format!("(similarity {:.2})", source.similarity)).dim()
            );
        }
    }
    println!();
}

/// `exit` or `quit` in any letter case
fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}
