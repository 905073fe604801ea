
use anyhow::Result;
use clap::Parser;
use load_test::{LoadOperation, LoadTestConfig, run_load_test};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docbulk")]
#[command(about = "Bulk write load generator for the in-process document server")]
struct Cli {
    /// Connection string of the target deployment
    #[arg(long, default_value = "memdoc://localhost:27017/load?maxPoolSize=4")]
    uri: String,
    #[arg(long, default_value = "load")]
    database: String,
    #[arg(long, default_value = "entities")]
    collection: String,
    #[arg(long, default_value_t = 100_000)]
    entities: usize,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Documents produced per entity for `insert-many`
    #[arg(long, default_value_t = 2)]
    fan_out: usize,
    /// `upsert` and `delete` first seed the collection with the same entities
    #[arg(long, value_enum, default_value_t = LoadOperation::Insert)]
    operation: LoadOperation,
    #[arg(long, default_value_t = 64)]
    payload_size: usize,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    run_load_test(LoadTestConfig {
        uri: cli.uri,
        database: cli.database,
        collection: cli.collection,
        entities: cli.entities,
        workers: cli.workers,
        fan_out: cli.fan_out,
        operation: cli.operation,
        payload_size: cli.payload_size,
    })?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docbulk=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
