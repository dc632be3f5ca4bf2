use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use geoknn::{HnswParams, IndexKind, KnnService, Metric, ServiceConfig, Signal};
use geoknn_storage::{build_index_dir, load_embeddings};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Per-country nearest-neighbor retrieval
#[derive(Parser, Debug)]
#[command(name = "geoknn")]
#[command(about = "Per-country nearest-neighbor retrieval with learned reranking", long_about = None)]
struct Args {
    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an index directory from an embedding directory
    Build {
        #[arg(long)]
        embeddings: PathBuf,
        #[arg(long)]
        index: PathBuf,
        #[arg(long, default_value = "hnsw")]
        kind: IndexKind,
        #[arg(long, default_value = "cosine")]
        metric: Metric,
        #[arg(long, default_value_t = 16)]
        max_connections: usize,
        #[arg(long, default_value_t = 200)]
        ef_construction: usize,
        #[arg(long, default_value_t = 50)]
        ef_search: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Nearest neighbors of a document
    Query(QueryArgs),
    /// Nearest neighbors reranked by a model
    TfQuery {
        #[command(flatten)]
        query: QueryArgs,
        /// Model file to load
        #[arg(long)]
        model: PathBuf,
        #[arg(long, default_value = "tf")]
        model_name: String,
    },
}

#[derive(ClapArgs, Debug)]
struct QueryArgs {
    #[arg(long)]
    country: String,
    #[arg(long)]
    index: PathBuf,
    #[arg(long)]
    embeddings: PathBuf,
    #[arg(long)]
    anchor: u64,
    #[arg(short, long, default_value_t = 10)]
    k: usize,
    /// Signal as doc_id:content_hash:timestamp:weight, repeatable
    #[arg(long = "signal", value_parser = parse_signal)]
    signals: Vec<Signal>,
    /// JSON service configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_signal(raw: &str) -> Result<Signal, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let &[doc_id, content_hash, timestamp, weight] = parts.as_slice() else {
        return Err(format!("expected doc_id:content_hash:timestamp:weight, got '{}'", raw));
    };
    let field = |name: &str, value: &str| format!("invalid {} '{}'", name, value);
    Ok(Signal::new(
        doc_id.parse().map_err(|_| field("doc_id", doc_id))?,
        content_hash.parse().map_err(|_| field("content_hash", content_hash))?,
        timestamp.parse().map_err(|_| field("timestamp", timestamp))?,
        weight.parse().map_err(|_| field("weight", weight))?,
    ))
}

fn service_for(args: &QueryArgs) -> anyhow::Result<KnnService> {
    let config = match &args.config {
        Some(path) => ServiceConfig::from_file(path).with_context(|| format!("reading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    let service = KnnService::new(config)?;
    service
        .load_country(&args.country, &args.index, &args.embeddings)
        .with_context(|| format!("loading country {}", args.country))?;
    Ok(service)
}

fn print_results(results: &[(u64, f32)]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(results)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    info!("Starting GeoKNN v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Build {
            embeddings,
            index,
            kind,
            metric,
            max_connections,
            ef_construction,
            ef_search,
            seed,
        } => {
            let store = load_embeddings(&embeddings)
                .with_context(|| format!("loading embeddings from {}", embeddings.display()))?;
            let params = HnswParams {
                max_connections,
                ef_construction,
                ef_search,
                seed,
                ..HnswParams::default()
            };
            let metadata = build_index_dir(&index, &store, kind, metric, params)?;
            info!(
                documents = metadata.count,
                dim = metadata.dimension,
                "index written to {}",
                index.display()
            );
        }
        Command::Query(query) => {
            let service = service_for(&query)?;
            let results = service.query(&query.country, query.anchor, query.k, &query.signals)?;
            print_results(&results)?;
        }
        Command::TfQuery {
            query,
            model,
            model_name,
        } => {
            let service = service_for(&query)?;
            service
                .load_model(&query.country, &model_name, &model)
                .with_context(|| format!("loading model {}", model.display()))?;
            let results = service.tf_query(&query.country, query.anchor, query.k, &query.signals, &model_name)?;
            print_results(&results)?;
        }
    }
    Ok(())
}
