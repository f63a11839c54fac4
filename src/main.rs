use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chain_explorer::cache::{EntityCache, QueryState, BLOCKCHAIN_KEY, TRANSACTIONS_KEY};
use chain_explorer::config::{validate_settings, Settings};
use chain_explorer::error::NodeApiError;
use chain_explorer::metrics::{self, Metrics};
use chain_explorer::mining::{MiningOrchestrator, MiningState, ViewReconciler};
use chain_explorer::node_api::{
    Blockchain, NodeClient, RemoteDataClient, Transaction, TransactionDraft,
};

#[derive(Parser)]
#[command(
    name = "chain-explorer",
    about = "Browse a node's blocks and transaction pool, and mine new blocks"
)]
struct Args {
    /// Node base URL, overrides NODE__BASE_URL and the config file
    #[arg(long)]
    node_url: Option<String>,

    /// Print client metrics in Prometheus format before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the confirmed blocks
    Blocks,
    /// Show the pending transaction pool
    Pool,
    /// Add a transaction to the pool
    Submit {
        #[arg(long)]
        private_key: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, allow_negative_numbers = true)]
        amount: f64,
    },
    /// Mine a block from the pending transactions and wait for the outcome
    Mine,
}

/// Renders mining progress on the terminal.
struct ConsoleReconciler;

impl ViewReconciler for ConsoleReconciler {
    fn on_state_change(&self, state: &MiningState) {
        match state {
            MiningState::Idle => {}
            MiningState::Starting => println!("Mining block..."),
            MiningState::Polling { job_id } => println!("Mining block... (job {})", job_id),
            MiningState::Succeeded { message } => println!("Mining finished: {}", message),
            MiningState::Failed { message } => println!("Mining failed: {}", message),
        }
    }

    fn on_acknowledge(&self) {
        info!("Refreshing blockchain after mining");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();

    let args = Args::parse();

    // Logs go to stderr so they never interleave with rendered tables
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = Settings::new().unwrap_or_else(|e| {
        error!("Failed to load configuration: {:?}", e);
        std::process::exit(1);
    });
    if let Some(node_url) = args.node_url {
        settings.node.base_url = node_url;
    }
    validate_settings(&settings)?;

    info!("Using node at {}", settings.node.base_url);

    let metrics = if args.metrics {
        Some(Metrics::new(metrics::setup_metrics_recorder()?))
    } else {
        None
    };

    let client: Arc<dyn RemoteDataClient> = Arc::new(NodeClient::new(&settings.node)?);
    let cache = Arc::new(EntityCache::new());

    let result = match args.command {
        Command::Blocks => show_blocks(&cache, &client).await,
        Command::Pool => show_pool(&cache, &client).await,
        Command::Submit {
            private_key,
            from,
            to,
            amount,
        } => {
            let draft = TransactionDraft {
                private_key,
                from,
                to,
                amount,
            };
            submit(&cache, &client, draft).await
        }
        Command::Mine => mine(cache, client, &settings).await,
    };

    if let Some(metrics) = metrics {
        println!("{}", metrics.render());
    }

    result
}

async fn show_blocks(cache: &EntityCache, client: &Arc<dyn RemoteDataClient>) -> Result<()> {
    let client = Arc::clone(client);
    let state = cache
        .query(BLOCKCHAIN_KEY, move || async move {
            client.fetch_blockchain().await
        })
        .await;
    render(state, "blockchain", print_blockchain)
}

async fn show_pool(cache: &EntityCache, client: &Arc<dyn RemoteDataClient>) -> Result<()> {
    let client = Arc::clone(client);
    let state = cache
        .query(TRANSACTIONS_KEY, move || async move {
            client.fetch_transaction_pool().await
        })
        .await;
    render(state, "transaction pool", |pool: &Vec<Transaction>| {
        println!("Pending transactions: {}", pool.len());
        print_transactions(pool);
    })
}

fn render<T>(state: QueryState<T>, what: &str, print: impl Fn(&T)) -> Result<()> {
    if let Some(data) = state.data.as_ref() {
        print(data);
    }
    match state.error {
        Some(error) => {
            println!("Could not load {}: {}. Run the command again to retry.", what, error);
            Err(anyhow!("failed to load {}", what))
        }
        None => Ok(()),
    }
}

async fn submit(
    cache: &EntityCache,
    client: &Arc<dyn RemoteDataClient>,
    draft: TransactionDraft,
) -> Result<()> {
    match client.submit_transaction(&draft).await {
        Ok(tx) => {
            cache.invalidate(TRANSACTIONS_KEY);
            println!("Transaction {} added to the pool", tx.transaction_id);
            print_transactions(std::slice::from_ref(&tx));
            Ok(())
        }
        Err(NodeApiError::Validation { details }) => {
            println!("Transaction rejected: {}", details);
            Err(anyhow!("transaction rejected"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn mine(
    cache: Arc<EntityCache>,
    client: Arc<dyn RemoteDataClient>,
    settings: &Settings,
) -> Result<()> {
    let orchestrator =
        MiningOrchestrator::new(client, cache, Arc::new(ConsoleReconciler), &settings.mining);
    let mut handle = orchestrator.start();

    let outcome = tokio::select! {
        outcome = handle.wait_terminal() => outcome,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, no longer tracking the mining job");
            orchestrator.shutdown();
            return Ok(());
        }
    };

    let Some(outcome) = outcome else {
        return Err(anyhow!("mining job is no longer tracked"));
    };

    match orchestrator.acknowledge().await {
        Ok(Some(chain)) => print_blockchain(&chain),
        Ok(None) => {}
        Err(e) => println!("Could not refresh blockchain: {}", e),
    }

    match outcome {
        MiningState::Failed { message } => Err(anyhow!("mining failed: {}", message)),
        _ => Ok(()),
    }
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

fn print_blockchain(chain: &Blockchain) {
    println!(
        "Blocks: {}  block size: {}  mining reward: {}",
        chain.height(),
        chain.block_size,
        chain.mining_reward
    );
    println!(
        "{:<5} {:<20} {:<10} {:<6} {:<18} {:<18}",
        "#", "TIME", "NONCE", "TXS", "HASH", "PREVIOUS"
    );
    for (index, block) in chain.blocks.iter().enumerate() {
        println!(
            "{:<5} {:<20} {:<10} {:<6} {:<18} {:<18}",
            index,
            format_timestamp(block.timestamp),
            block.nonce,
            format!("{}/{}", block.transactions.len(), block.capacity),
            short_hash(&block.hash),
            short_hash(&block.previous_hash)
        );
    }
}

fn print_transactions(transactions: &[Transaction]) {
    println!(
        "{:<38} {:<24} {:<24} {:>12} {:<20} {:<6}",
        "ID", "FROM", "TO", "AMOUNT", "TIME", "SIGNED"
    );
    for tx in transactions {
        println!(
            "{:<38} {:<24} {:<24} {:>12.2} {:<20} {:<6}",
            tx.transaction_id,
            short_hash(&tx.from_address),
            short_hash(&tx.to_address),
            tx.amount,
            format_timestamp(tx.timestamp),
            if tx.is_sign_valid { "yes" } else { "no" }
        );
    }
}
