use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tenant_rag::Result;
use tenant_rag::commands::{
    IngestSources, ingest, init_config, repair_tenant, run_query, show_config, show_status,
};
use tenant_rag::config::Config;
use tenant_rag::retrieval::RetrievalService;
use tenant_rag::store::TenantIndexStore;

#[derive(Parser)]
#[command(name = "tenant-rag")]
#[command(about = "Per-tenant document retrieval for customer-support assistants")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Write the default configuration file if none exists
        #[arg(long, conflicts_with = "show")]
        init: bool,
    },
    /// Add documents to a tenant's knowledge base
    Ingest {
        /// Tenant identifier
        tenant: String,
        /// Raw text to ingest
        #[arg(long)]
        text: Option<String>,
        /// Text, HTML or PDF file to ingest; may be repeated
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
        /// Web page to fetch and ingest
        #[arg(long)]
        url: Option<String>,
    },
    /// Find the chunks most relevant to a question
    Query {
        /// Tenant identifier
        tenant: String,
        /// Question text
        question: String,
        /// Number of chunks to return
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Show stored chunk counts and consistency
    Status {
        /// Only show this tenant
        tenant: Option<String>,
    },
    /// Make a torn tenant consistent on disk
    Repair {
        /// Tenant identifier
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load_default()?;

    match cli.command {
        Commands::Config { show, init } => {
            if init && !show {
                init_config(&config)?;
            } else {
                show_config(&config)?;
            }
        }
        Commands::Ingest {
            tenant,
            text,
            files,
            url,
        } => {
            let service = RetrievalService::from_config(&config)?;
            let sources = IngestSources { text, files, url };
            let fetch_timeout = Duration::from_secs(config.retrieval.fetch_timeout_seconds);
            ingest(&service, &tenant, &sources, fetch_timeout).await?;
        }
        Commands::Query {
            tenant,
            question,
            k,
        } => {
            let service = RetrievalService::from_config(&config)?;
            let k = k.unwrap_or_else(|| service.default_k());
            run_query(&service, &tenant, &question, k).await?;
        }
        Commands::Status { tenant } => {
            let store = TenantIndexStore::from_config(&config);
            show_status(&store, tenant.as_deref()).await?;
        }
        Commands::Repair { tenant } => {
            let store = TenantIndexStore::from_config(&config);
            repair_tenant(&store, &tenant).await?;
        }
    }

    Ok(())
}
