use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use crate::config::Config;
use crate::retrieval::RetrievalService;
use crate::source::{fetch_url_text, read_source_file};
use crate::store::{ConsistencyReport, TenantIndexStore};

/// Documents to ingest in one `ingest` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSources {
    pub text: Option<String>,
    pub files: Vec<PathBuf>,
    pub url: Option<String>,
}

impl IngestSources {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.files.is_empty() && self.url.is_none()
    }
}

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    let embedder = &config.embedder;
    eprintln!("{}", style("Embedder:").bold().yellow());
    eprintln!("  Provider: {}", style(embedder.provider).cyan());
    eprintln!("  Model: {}", style(&embedder.model).cyan());
    eprintln!("  Dimension: {}", style(embedder.embedding_dimension).cyan());
    eprintln!("  Batch Size: {}", style(embedder.batch_size).cyan());
    eprintln!("  Timeout: {}s", style(embedder.timeout_seconds).cyan());
    match embedder.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!();

    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!("  Chunk Size: {}", style(config.chunking.chunk_size).cyan());
    eprintln!("  Overlap: {}", style(config.chunking.overlap).cyan());
    eprintln!();

    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Default k: {}", style(config.retrieval.default_k).cyan());
    eprintln!(
        "  Fetch Timeout: {}s",
        style(config.retrieval.fetch_timeout_seconds).cyan()
    );
    eprintln!();

    let config_path = config.config_file_path();
    let marker = if config_path.exists() {
        ""
    } else {
        " (not written yet, defaults in use)"
    };
    eprintln!(
        "Config file: {}{}",
        style(config_path.display()).dim(),
        marker
    );
    eprintln!("Tenant data: {}", style(config.tenants_dir().display()).dim());

    Ok(())
}

/// Write the current configuration to `config.toml` unless one already exists
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let config_path = config.config_file_path();
    if config_path.exists() {
        eprintln!(
            "{} {}",
            style("Configuration already exists:").yellow(),
            style(config_path.display()).cyan()
        );
        return Ok(());
    }

    config.save()?;
    eprintln!("{}", style("✓ Configuration saved successfully!").green());
    eprintln!("Config file: {}", style(config_path.display()).cyan());
    Ok(())
}

/// Ingest every given source into `tenant`, returning the total number of chunks added
#[inline]
pub async fn ingest(
    service: &RetrievalService,
    tenant: &str,
    sources: &IngestSources,
    fetch_timeout: Duration,
) -> Result<usize> {
    if sources.is_empty() {
        bail!("Nothing to ingest: pass --text, --file or --url");
    }

    let mut total = 0;

    if let Some(text) = &sources.text {
        let added = service
            .ingest(tenant, text)
            .await
            .context("Failed to ingest text")?;
        println!("Added {} chunks from inline text", added);
        total += added;
    }

    if !sources.files.is_empty() {
        total += ingest_files(service, tenant, &sources.files).await?;
    }

    if let Some(url) = &sources.url {
        info!("Fetching {}", url);
        let text = fetch_url_text(url, fetch_timeout)
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        let added = service
            .ingest_from_source(tenant, &text, Some(url))
            .await
            .with_context(|| format!("Failed to ingest {}", url))?;
        println!("Added {} chunks from {}", added, url);
        total += added;
    }

    println!(
        "{}",
        style(format!("✓ Tenant {}: {} chunks added", tenant, total)).green()
    );
    Ok(total)
}

async fn ingest_files(service: &RetrievalService, tenant: &str, files: &[PathBuf]) -> Result<usize> {
    let bar = if files.len() > 1 {
        ProgressBar::new(files.len() as u64).with_style(
            ProgressStyle::with_template("[{pos}/{len}] Ingesting {msg}")
                .context("Invalid progress bar template")?,
        )
    } else {
        ProgressBar::hidden()
    };

    let mut total = 0;
    for path in files {
        let label = path.display().to_string();
        bar.set_message(label.clone());

        let text = read_source_file(path).with_context(|| format!("Failed to read {}", label))?;
        let added = service
            .ingest_from_source(tenant, &text, Some(&label))
            .await
            .with_context(|| format!("Failed to ingest {}", label))?;

        bar.println(format!("Added {} chunks from {}", added, label));
        bar.inc(1);
        total += added;
    }
    bar.finish_and_clear();

    Ok(total)
}

/// Print the chunks closest to `question`, with their distances
#[inline]
pub async fn run_query(
    service: &RetrievalService,
    tenant: &str,
    question: &str,
    k: usize,
) -> Result<()> {
    let hits = service
        .query_scored(tenant, question, k)
        .await
        .with_context(|| format!("Query for tenant {} failed", tenant))?;

    if hits.is_empty() {
        println!("No relevant information found for tenant {}.", tenant);
        println!("Use 'tenant-rag ingest {} --text ...' to add documents.", tenant);
        return Ok(());
    }

    println!("Top {} results for tenant {}:", hits.len(), tenant);
    println!();
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} {}",
            rank + 1,
            style(format!("[distance {:.4}]", hit.distance)).dim(),
            style(format!("#{}", hit.position)).dim()
        );
        for line in hit.text.lines() {
            println!("   {}", line);
        }
        println!();
    }

    Ok(())
}

/// Print stored row counts for one tenant, or for every tenant when `tenant` is `None`
#[inline]
pub async fn show_status(store: &TenantIndexStore, tenant: Option<&str>) -> Result<()> {
    let tenants = match tenant {
        Some(tenant) => vec![tenant.to_string()],
        None => store.tenants().await.context("Failed to list tenants")?,
    };

    if tenants.is_empty() {
        println!("No tenants have been ingested yet.");
        println!("Data directory: {}", store.root().display());
        return Ok(());
    }

    let mut inconsistent = 0;
    for tenant in &tenants {
        match store.status(tenant).await {
            Ok(Some(report)) => {
                if !report.is_consistent() {
                    inconsistent += 1;
                }
                print_report(&report);
            }
            Ok(None) => println!("{}: no knowledge base", style(tenant).bold()),
            Err(e) => {
                error!("Failed to read tenant {}: {}", tenant, e);
                println!("{}: {} {}", style(tenant).bold(), style("error").red(), e);
            }
        }
    }

    if tenant.is_none() {
        println!();
        println!("Summary:");
        println!("  Tenants: {}", tenants.len());
        println!("  Needing repair: {}", inconsistent);
    }

    Ok(())
}

fn print_report(report: &ConsistencyReport) {
    println!(
        "{}: {} chunks, {} dimensions",
        style(&report.tenant).bold(),
        report.usable_rows(),
        report.dimension
    );
    if report.is_consistent() {
        println!("   Status: {}", style("consistent").green());
    } else {
        println!(
            "   Status: {} (index has {} vectors, metadata log has {} records)",
            style("inconsistent").yellow(),
            report.index_rows,
            report.log_rows
        );
        println!("   Run 'tenant-rag repair {}' to fix it.", report.tenant);
    }
}

/// Persist the reconciled state of a torn tenant
#[inline]
pub async fn repair_tenant(store: &TenantIndexStore, tenant: &str) -> Result<()> {
    let Some(report) = store
        .repair(tenant)
        .await
        .with_context(|| format!("Failed to repair tenant {}", tenant))?
    else {
        println!("Tenant {} has no knowledge base.", tenant);
        return Ok(());
    };

    if report.is_consistent() {
        println!(
            "{}",
            style(format!(
                "✓ Tenant {} is consistent ({} chunks); nothing to repair",
                tenant,
                report.usable_rows()
            ))
            .green()
        );
    } else {
        println!(
            "{}",
            style(format!(
                "✓ Tenant {} repaired: dropped {} rows, {} chunks remain",
                tenant,
                report.dropped_rows(),
                report.usable_rows()
            ))
            .green()
        );
    }

    Ok(())
}
