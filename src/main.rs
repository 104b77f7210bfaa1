// =============================================================================
// marketwatch-decide — binary entry point
// =============================================================================
//
// Assembles the components declared in the library into one running
// process: loads config, builds the provider pool and supporting services,
// wires the auto-trade cycle, and runs until ctrl-c. No HTTP surface here —
// that layer is an external collaborator per the config's own doc comment.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use marketwatch_decide::anomaly::{AnomalyDetector, AnomalyThresholds};
use marketwatch_decide::cleaning::{CleaningConfig, CleaningEngine};
use marketwatch_decide::config::Config;
use marketwatch_decide::execution::broker::{Broker, RestBroker};
use marketwatch_decide::execution::position::PositionBook;
use marketwatch_decide::execution::scheduler::{run_stop_loss_sweep, AutoTradeScheduler};
use marketwatch_decide::execution::{reconcile, ExecutionEngine};
use marketwatch_decide::features::{generate_features, FeatureVector};
use marketwatch_decide::ingestion::{IngestionConfig, InMemoryStorage, PoolDataSource, SymbolIngester};
use marketwatch_decide::llm::{build_prompt, verdict_to_signal, ChatCompletionAdvisor, LlmAdvisor};
use marketwatch_decide::providers::{EastmoneyProvider, MockProvider, ProviderPool, QuoteProvider, SinaProvider, TencentProvider};
use marketwatch_decide::risk::RiskManager;
use marketwatch_decide::tree::DecisionTree;

const CONFIG_PATH_ENV: &str = "MARKETWATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).init();

    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %config_path, error = %e, "failed to load config file, using defaults");
            Config::default()
        }
    };
    info!(symbols = ?config.symbols, "starting marketwatch-decide");

    // --- C2: provider pool, mock always included as the bottom-priority
    // network-free fallback.
    let providers: Vec<Arc<dyn QuoteProvider>> = vec![
        Arc::new(MockProvider::new()),
        Arc::new(TencentProvider::new()),
        Arc::new(EastmoneyProvider::new()),
        Arc::new(SinaProvider::new()),
    ];
    let pool = Arc::new(ProviderPool::new(providers));

    {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(marketwatch_decide::providers::HEALTH_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                pool.run_health_checks().await;
            }
        });
    }

    // --- C3: anomaly detector, fed from the ingestion/fetch path.
    let anomaly = Arc::new(AnomalyDetector::new(AnomalyThresholds::default()));

    // --- C5: cleaning engine sits in front of storage.
    let cleaning = Arc::new(CleaningEngine::new(CleaningConfig::default()));

    // --- C4: one ingester per configured symbol, backed by in-memory
    // storage (a durable adapter is a drop-in `StorageAdapter` implementor).
    let storage = Arc::new(InMemoryStorage::new());
    let ingestion_config = IngestionConfig::default();
    let mut ingesters = Vec::new();
    for symbol in &config.symbols {
        let source = Arc::new(PoolDataSource::new(pool.clone(), 120));
        let ingester = Arc::new(SymbolIngester::new(symbol.clone(), source, storage.clone(), ingestion_config));
        ingester.init_progress().await.ok();
        ingesters.push(ingester);
    }

    for ingester in &ingesters {
        let ingester = ingester.clone();
        let check_interval = ingestion_config.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = ingester.run_cycle().await {
                    warn!(error = %e, "ingestion cycle failed");
                }
            }
        });
    }

    // --- C7: decision tree, loaded from disk if present; otherwise trained
    // fresh from the bar history the ingesters just pulled in.
    let tree = Arc::new(load_or_train_tree(&config, &storage, &config.symbols));

    // --- C8: LLM advisor, only constructed when an API key is configured.
    let llm: Option<Arc<dyn LlmAdvisor>> = if config.llm.api_key.is_empty() {
        warn!("llm.api_key not set, AI signals disabled for this run");
        None
    } else {
        Some(Arc::new(ChatCompletionAdvisor::new(
            "https://openrouter.ai/api/v1/chat/completions",
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.max_tokens,
            config.llm.timeout,
        )))
    };

    // --- C9/C10: risk manager, position book, broker, execution engine.
    let risk = Arc::new(RiskManager::new(config.trading.risk.clone(), config.trading.initial_capital));
    let positions = Arc::new(PositionBook::new());
    let broker_secret = std::env::var("MARKETWATCH_BROKER_SECRET").unwrap_or_default();
    let broker: Arc<dyn Broker> = Arc::new(RestBroker::new(config.trading.broker.base_url.clone(), config.trading.broker.api_key.clone(), broker_secret));
    let engine = Arc::new(ExecutionEngine::new(broker.clone(), positions.clone(), risk.clone(), config.trading.initial_capital));

    let scheduler = if config.trading.auto_trade.enabled {
        let tree_for_cycle = tree.clone();
        let llm_for_cycle = llm.clone();
        let risk_for_cycle = risk.clone();
        let anomaly_for_cycle = anomaly.clone();

        Some(AutoTradeScheduler::spawn(
            std::time::Duration::from_secs(config.trading.auto_trade.interval_secs),
            config.symbols.clone(),
            engine.clone(),
            pool.clone(),
            move |engine, pool, symbols| {
                let tree = tree_for_cycle.clone();
                let llm = llm_for_cycle.clone();
                let risk = risk_for_cycle.clone();
                let anomaly = anomaly_for_cycle.clone();
                async move {
                    run_stop_loss_sweep(&engine, &risk).await;
                    for symbol in symbols {
                        if let Err(e) = run_symbol_cycle(&symbol, &engine, &pool, &tree, llm.as_deref(), &anomaly).await {
                            error!(symbol = %symbol, error = %e, "auto-trade cycle failed for symbol");
                        }
                    }
                    let equity = engine.positions().equity(engine.cash());
                    risk.update_daily_pnl(0.0, equity);
                }
            },
        ))
    } else {
        info!("auto-trade disabled by config");
        None
    };

    {
        let broker = broker.clone();
        let positions = positions.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                match reconcile::reconcile_once(broker.as_ref(), &positions).await {
                    Ok(result) => info!(checked = result.positions_checked, drift = result.balance_drift, "reconciliation pass complete"),
                    Err(e) => warn!(error = %e, "reconciliation pass failed"),
                }
            }
        });
    }

    {
        let cleaning = cleaning.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                ticker.tick().await;
                let stats = cleaning.stats();
                info!(processed = stats.processed, passed = stats.passed, corrected = stats.corrected, rejected = stats.rejected, "cleaning stats");
            }
        });
    }

    info!("marketwatch-decide running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining ingesters");

    for ingester in &ingesters {
        if let Err(e) = ingester.stop().await {
            warn!(error = %e, "ingester drain failed during shutdown");
        }
    }
    if let Some(scheduler) = scheduler {
        scheduler.stop();
    }

    info!("marketwatch-decide stopped");
    Ok(())
}

/// One symbol's worth of the auto-trade cycle: fetch the latest tick, feed
/// the anomaly detector, assemble the ML signal from the tree and the AI
/// signal from the advisor (if configured), and hand both to the execution
/// engine for fusion and routing.
async fn run_symbol_cycle(
    symbol: &str,
    engine: &ExecutionEngine,
    pool: &ProviderPool,
    tree: &DecisionTree,
    llm: Option<&dyn LlmAdvisor>,
    anomaly: &AnomalyDetector,
) -> anyhow::Result<()> {
    let tick = pool.fetch_tick(symbol).await?;
    anomaly.observe(symbol, tick.price, tick.volume, tick.time);

    let bars = pool.fetch_bars(symbol, 120).await.unwrap_or_default();
    let features = generate_features(&bars);
    let Some(latest) = features.last() else {
        return Ok(());
    };

    let (label, confidence) = tree.predict(&latest.to_array());
    let ml_signal = marketwatch_decide::types::TradingSignal {
        symbol: symbol.to_string(),
        action: label_to_action(label),
        confidence,
        source: marketwatch_decide::types::SignalSource::Ml,
        reason: "decision tree".to_string(),
    };

    let ai_signal = match llm {
        Some(advisor) => {
            let prompt = build_prompt(symbol, tick.price, latest.rsi, latest.macd, latest.macd_signal, latest.ma5, latest.ma20);
            match advisor.advise(symbol, &prompt).await {
                Ok(verdict) => Some(verdict_to_signal(symbol, &verdict)),
                Err(e) => {
                    warn!(symbol, error = %e, "llm advisor call failed, proceeding without an AI signal");
                    None
                }
            }
        }
        None => None,
    };

    let order_money = 1000.0;
    let envelope = engine.decide_and_execute(symbol, tick.price, ai_signal, Some(ml_signal), order_money).await;
    info!(symbol, decision = %envelope.final_decision, action = %envelope.fused_action, confidence = envelope.fused_confidence, "decision cycle complete");
    Ok(())
}

fn label_to_action(label: u8) -> marketwatch_decide::types::Action {
    match marketwatch_decide::types::Label::from_u8(label) {
        Some(marketwatch_decide::types::Label::Up) => marketwatch_decide::types::Action::Buy,
        Some(marketwatch_decide::types::Label::Down) => marketwatch_decide::types::Action::Sell,
        _ => marketwatch_decide::types::Action::Hold,
    }
}

fn load_or_train_tree(config: &Config, storage: &InMemoryStorage, symbols: &[String]) -> DecisionTree {
    if let Ok(tree) = DecisionTree::load(&config.ml.model_path, config.ml.max_tree_depth as usize) {
        info!(path = %config.ml.model_path, "loaded persisted decision tree");
        return tree;
    }

    let mut samples = Vec::new();
    let mut labels = Vec::new();
    for symbol in symbols {
        let bars = storage.snapshot(symbol);
        if bars.len() < marketwatch_decide::features::MIN_HISTORY {
            continue;
        }
        let features = generate_features(&bars);
        let bar_labels = marketwatch_decide::features::generate_labels(&bars, config.ml.features.lookahead);
        let joined = marketwatch_decide::features::join_features_and_labels(bars.len(), &features, &bar_labels);
        for (feature, label) in joined {
            samples.push(feature.to_array().to_vec());
            labels.push(label.as_u8());
        }
    }

    if samples.is_empty() {
        warn!("no historical bars available yet, starting with an untrained single-leaf tree");
        samples.push(vec![0.0; FeatureVector::ARITY]);
        labels.push(marketwatch_decide::types::Label::Flat.as_u8());
    }

    let tree = DecisionTree::train(&samples, &labels, config.ml.max_tree_depth as usize).expect("training samples/labels are constructed with matching length");
    if let Err(e) = tree.save(&config.ml.model_path) {
        warn!(error = %e, "failed to persist freshly trained decision tree");
    }
    tree
}
