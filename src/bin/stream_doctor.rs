//! Connectivity check for C5's stream subscription shape. Grounded on
//! `grpc_verify.rs`'s standalone Yellowstone pipeline, adapted from
//! program-id `account_required` filters (teacher) to the per-wallet
//! `account_include` filters C5 actually subscribes with (`ingress::filters_for`).
//! Connects, subscribes to either `MASTER_WALLETS` or every wallet currently
//! active in the configured database, and prints each matching transaction
//! as it arrives so an operator can confirm the endpoint and filter shape
//! are correct before wiring up the full engine.

use carbon_core::{
    error::CarbonResult, metrics::MetricsCollection, pipeline::Pipeline, pipeline::ShutdownStrategy,
    processor::Processor, transaction::TransactionProcessorInputType,
};
use carbon_log_metrics::LogMetrics;
use carbon_yellowstone_grpc_datasource::YellowstoneGrpcGeyserClient;
use mirrorflow::empty_decoder::EmptyDecoderCollection;
use mirrorflow::persistence::Store;
use solana_pubkey::Pubkey;
use std::{collections::HashMap, env, str::FromStr, sync::Arc};
use tokio::sync::RwLock;
use yellowstone_grpc_proto::geyser::{CommitmentLevel, SubscribeRequestFilterTransactions};

struct Config {
    geyser_url: String,
    x_token: Option<String>,
    wallets: Vec<Pubkey>,
}

impl Config {
    fn from_env() -> Self {
        let geyser_url = env::var("HELIUS_STREAM_ENDPOINT").expect("HELIUS_STREAM_ENDPOINT must be set in .env file");
        let x_token = env::var("X_TOKEN").ok();

        let wallets = match env::var("MASTER_WALLETS") {
            Ok(list) => list
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| Pubkey::from_str(s).unwrap_or_else(|e| panic!("invalid pubkey {s}: {e}")))
                .collect(),
            Err(_) => {
                let db_path = env::var("MIRRORFLOW_DB_PATH").unwrap_or_else(|_| "mirrorflow.db".to_string());
                let store = Store::open(&db_path).unwrap_or_else(|e| panic!("failed to open {db_path}: {e}"));
                store.all_active_wallets().unwrap_or_else(|e| panic!("failed to read active wallets: {e}"))
            }
        };

        Self { geyser_url, x_token, wallets }
    }
}

fn filters_for(wallets: &[Pubkey]) -> HashMap<String, SubscribeRequestFilterTransactions> {
    let mut filters = HashMap::new();
    for wallet in wallets {
        let filter = SubscribeRequestFilterTransactions {
            vote: Some(false),
            failed: Some(false),
            account_include: vec![wallet.to_string()],
            account_exclude: vec![],
            account_required: vec![],
            signature: None,
        };
        filters.insert(format!("trader_{wallet}"), filter);
    }
    filters
}

struct PrintingProcessor {
    wallets: Vec<Pubkey>,
}

#[async_trait::async_trait]
impl Processor for PrintingProcessor {
    type InputType = TransactionProcessorInputType<EmptyDecoderCollection>;

    async fn process(&mut self, (metadata, _instructions, _): Self::InputType, _metrics: Arc<MetricsCollection>) -> CarbonResult<()> {
        let account_keys = metadata.message.static_account_keys();
        let matched: Vec<&Pubkey> = self.wallets.iter().filter(|w| account_keys.contains(w)).collect();
        println!(
            "slot={} sig={} matched_wallets={:?} err={}",
            metadata.slot,
            metadata.signature,
            matched,
            metadata.meta.err.is_some(),
        );
        Ok(())
    }
}

#[tokio::main]
pub async fn main() -> CarbonResult<()> {
    dotenv::dotenv().ok();

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_module("carbon_log_metrics", log::LevelFilter::Warn);
    builder.target(env_logger::Target::Stdout).init();

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("can't set crypto provider to aws_lc_rs");

    let config = Config::from_env();
    if config.wallets.is_empty() {
        log::error!("no wallets to subscribe to: set MASTER_WALLETS or activate at least one trader in the database");
        std::process::exit(1);
    }

    log::info!("stream doctor connecting to {}", config.geyser_url);
    log::info!("watching {} wallet(s):", config.wallets.len());
    for wallet in &config.wallets {
        log::info!("  {wallet}");
    }

    let filters = filters_for(&config.wallets);
    let client = YellowstoneGrpcGeyserClient::new(
        config.geyser_url.clone(),
        config.x_token.clone(),
        Some(CommitmentLevel::Confirmed),
        HashMap::default(),
        filters,
        Default::default(),
        Arc::new(RwLock::new(std::collections::HashSet::new())),
        Default::default(),
    );

    let processor = PrintingProcessor { wallets: config.wallets.clone() };

    log::info!("connected, press Ctrl+C to stop");
    Pipeline::builder()
        .datasource(client)
        .metrics(Arc::new(LogMetrics::new()))
        .metrics_flush_interval(3)
        .transaction::<EmptyDecoderCollection, ()>(processor, None)
        .shutdown_strategy(ShutdownStrategy::Immediate)
        .build()?
        .run()
        .await?;

    Ok(())
}
