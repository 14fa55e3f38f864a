//! CLI interface for the vector table

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vector_table::{
    DeleteMiss, EngineConfig, FileStore, Operand, TableConfig, Vector, VectorTable,
};

#[derive(Parser)]
#[command(name = "vectortable")]
#[command(about = "A centroid-partitioned vector table", long_about = None)]
struct Cli {
    /// Data directory the table is persisted to
    #[arg(long)]
    data_dir: String,

    /// JSON file with the table configuration
    #[arg(long)]
    config: Option<String>,

    #[command(flatten)]
    table: TableArgs,

    /// Checkpoint the store after this many commits
    #[arg(long, default_value = "1000")]
    checkpoint_interval: usize,

    #[command(subcommand)]
    command: Commands,
}

/// Table settings; each one overrides the value from `--config`.
#[derive(Args)]
struct TableArgs {
    /// Table name
    #[arg(long)]
    name: Option<String>,

    /// Vector dimension
    #[arg(long)]
    dimension: Option<usize>,

    /// Number of centroids
    #[arg(long)]
    centroids: Option<usize>,

    /// Centroids scanned per search (default: all)
    #[arg(long)]
    probes: Option<usize>,

    /// Report deletes of missing ids as `false` instead of failing
    #[arg(long)]
    ignore_missing_deletes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the table and its centroids
    Init,
    /// Insert a vector, or overwrite an existing id
    Insert {
        /// Vector data as comma-separated values (e.g., "1.0,2.0,3.0")
        vector: String,
        /// Id to write to
        #[arg(long)]
        id: Option<u64>,
    },
    /// Insert several vectors in one transaction
    Batch {
        /// Vectors as comma-separated values
        vectors: Vec<String>,
    },
    /// Print the vectors with the given ids
    Get { ids: Vec<u64> },
    /// Print every vector in id order
    List,
    /// Search for similar vectors
    Search {
        /// Query vector as comma-separated values
        query: String,
        /// Number of results to return
        #[arg(short, long, default_value = "5")]
        k: usize,
    },
    /// Dot product of two operands ("id:N" or comma-separated values)
    Dot { a: String, b: String },
    /// Cosine similarity of two operands ("id:N" or comma-separated values)
    Cosine { a: String, b: String },
    /// Delete a vector
    Delete { id: u64 },
    /// Print the number of stored vectors
    Count,
    /// Print the centroids and their member counts
    Centroids,
    /// Recompute centroids from the stored vectors
    Rebalance,
    /// Snapshot the store and truncate its write-ahead log
    Checkpoint,
    /// Drop the table
    Drop,
    /// Start the HTTP API server
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0:3000")]
        addr: String,
    },
}

fn table_config(cli: &Cli) -> Result<TableConfig> {
    let mut config = match &cli.config {
        Some(path) => TableConfig::from_json_file(path)
            .with_context(|| format!("reading table config {}", path))?,
        None => TableConfig::default(),
    };
    let args = &cli.table;
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(dimension) = args.dimension {
        config.dimension = dimension;
    }
    if let Some(centroids) = args.centroids {
        config.centroid_count = centroids;
    }
    if args.probes.is_some() {
        config.probes = args.probes;
    }
    if args.ignore_missing_deletes {
        config.delete_miss = DeleteMiss::Ignore;
    }
    Ok(config)
}

fn operand(s: &str) -> Result<Operand> {
    s.parse::<Operand>()
        .with_context(|| format!("parsing operand {:?}", s))
}

fn run(table: &VectorTable, store: &FileStore, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            table.initialize(store)?;
            println!(
                "Initialized {} (dimension {}, {} centroids)",
                table.values_table_name(),
                table.dimension(),
                table.config().centroid_count
            );
        }
        Commands::Insert { vector, id } => {
            let v: Vector = vector.parse()?;
            let id = table.upsert(store, &v, id)?;
            println!("Upserted vector with ID: {}", id);
        }
        Commands::Batch { vectors } => {
            let vectors = vectors
                .iter()
                .map(|v| v.parse::<Vector>())
                .collect::<vector_table::Result<Vec<_>>>()?;
            let ids = table.upsert_batch(store, &vectors)?;
            println!("Inserted {} vectors: {:?}", ids.len(), ids);
        }
        Commands::Get { ids } => {
            let found = table.select(store, &ids)?;
            for id in ids {
                match found.get(&id) {
                    Some(values) => println!("{}: {:?}", id, values.as_slice()),
                    None => println!("{}: not found", id),
                }
            }
        }
        Commands::List => {
            let mut total = 0;
            for record in table.select_all(store) {
                let record = record?;
                println!("{}: {:?}", record.id, record.values.as_slice());
                total += 1;
            }
            if total == 0 {
                println!("No vectors in table");
            }
        }
        Commands::Search { query, k } => {
            let q: Vector = query.parse()?;
            let results = table.search(store, &q, k)?;

            if results.is_empty() {
                println!("No results found (table is empty)");
            } else {
                println!("Top {} results:", results.len());
                for (i, result) in results.iter().enumerate() {
                    println!(
                        "{}. {} (similarity: {:.6})",
                        i + 1,
                        result.id,
                        result.similarity
                    );
                }
            }
        }
        Commands::Dot { a, b } => {
            println!("{}", table.dot(store, operand(&a)?, operand(&b)?)?);
        }
        Commands::Cosine { a, b } => {
            println!("{}", table.cosine(store, operand(&a)?, operand(&b)?)?);
        }
        Commands::Delete { id } => {
            if table.delete(store, id)? {
                println!("Deleted vector with ID: {}", id);
            } else {
                println!("No vector with ID: {}", id);
            }
        }
        Commands::Count => {
            println!("{}", table.count(store)?);
        }
        Commands::Centroids => {
            for centroid in table.centroids(store)? {
                println!(
                    "{} ({} members): {:?}",
                    centroid.id,
                    centroid.member_count,
                    centroid.values.as_slice()
                );
            }
        }
        Commands::Rebalance => {
            let report = table.rebalance(store)?;
            println!(
                "Rebalanced in {} iterations (converged: {}, reassigned: {})",
                report.iterations, report.converged, report.reassigned
            );
        }
        Commands::Checkpoint => {
            store.checkpoint()?;
            println!("Checkpoint written");
        }
        Commands::Drop => {
            table.drop_table(store)?;
            println!("Dropped {}", table.values_table_name());
        }
        Commands::Serve { .. } => unreachable!("serve is handled in main"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let table = VectorTable::with_config(table_config(&cli)?)?;
    let store = FileStore::open(
        &cli.data_dir,
        EngineConfig {
            checkpoint_interval: cli.checkpoint_interval,
        },
    )?;

    match cli.command {
        Commands::Serve { addr } => vector_table::server::serve(&addr, table, store).await,
        command => run(&table, &store, command),
    }
}
