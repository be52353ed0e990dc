use clap::Parser;
use miette::{IntoDiagnostic, Result};
use paychan::interfaces::csv::outcome_writer::OutcomeWriter;
use paychan::interfaces::csv::scenario_reader::ScenarioReader;
use paychan::interfaces::simulation::Simulation;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario CSV file with `action,from,to,amount` rows
    scenario: PathBuf,

    /// Directory for persistent party stores (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `paychan=trace`. Defaults to RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).into_diagnostic()?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paychan=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut simulation = Simulation::new();
    if let Some(db_path) = cli.db_path {
        simulation = with_persistent_stores(simulation, db_path);
    }

    let file = File::open(cli.scenario).into_diagnostic()?;
    let reader = ScenarioReader::new(file);
    let mut outcomes = Vec::new();
    for step_result in reader.steps() {
        match step_result {
            Ok(step) => match simulation.apply(&step).await {
                Ok(records) => outcomes.extend(records),
                Err(e) => eprintln!("Error processing action: {}", e),
            },
            Err(e) => {
                eprintln!("Error reading action: {}", e);
            }
        }
    }

    simulation.shutdown().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = OutcomeWriter::new(stdout.lock());
    writer.write_outcomes(outcomes).into_diagnostic()?;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn with_persistent_stores(simulation: Simulation, db_path: PathBuf) -> Simulation {
    use ed25519_dalek::SigningKey;
    use paychan::domain::ports::SharedStore;
    use paychan::domain::registry::ProtocolRegistry;
    use paychan::infrastructure::rocksdb::RocksDbStore;
    use std::sync::Arc;

    simulation.with_store_factory(Box::new(
        move |party: &str, key: SigningKey, registry: Arc<ProtocolRegistry>| -> paychan::error::Result<SharedStore> {
            std::fs::create_dir_all(&db_path)?;
            let store = RocksDbStore::open(db_path.join(party), key, registry)?;
            Ok(Arc::new(store))
        },
    ))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn with_persistent_stores(simulation: Simulation, _db_path: PathBuf) -> Simulation {
    eprintln!(
        "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
    );
    simulation
}
