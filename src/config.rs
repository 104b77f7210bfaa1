// =============================================================================
// Configuration — §6 YAML config contract
// =============================================================================
//
// Every tunable the core needs lives here so the binary entry point can hand
// a single `Config` value to every component constructor. Unknown YAML keys
// are ignored (serde's default behavior absent `deny_unknown_fields`), and
// every field carries a default so an older config file missing new sections
// still loads.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_symbols() -> Vec<String> {
    vec!["600000".to_string(), "600519".to_string(), "000001".to_string()]
}

fn default_db_path() -> String {
    "./data/market.db".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// database / http / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

// ---------------------------------------------------------------------------
// llm
// ---------------------------------------------------------------------------

fn default_llm_provider() -> String {
    "openrouter".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    12
}

fn default_llm_max_tokens() -> u32 {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout: u64,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: String::new(),
            model: default_llm_model(),
            timeout: default_llm_timeout_secs(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

// ---------------------------------------------------------------------------
// ml
// ---------------------------------------------------------------------------

fn default_model_type() -> String {
    "decision_tree".to_string()
}

fn default_model_path() -> String {
    "./data/model.json".to_string()
}

fn default_max_tree_depth() -> u32 {
    3
}

fn default_train_interval_hours() -> u64 {
    24
}

fn default_lookahead() -> usize {
    3
}

fn default_train_ratio() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlFeaturesConfig {
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
}

impl Default for MlFeaturesConfig {
    fn default() -> Self {
        Self { lookahead: default_lookahead() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlTrainingConfig {
    #[serde(default = "default_train_ratio")]
    pub train_ratio: f64,
}

impl Default for MlTrainingConfig {
    fn default() -> Self {
        Self { train_ratio: default_train_ratio() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: u32,
    #[serde(default = "default_train_interval_hours")]
    pub train_interval: u64,
    #[serde(default)]
    pub features: MlFeaturesConfig,
    #[serde(default)]
    pub training: MlTrainingConfig,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            model_type: default_model_type(),
            model_path: default_model_path(),
            max_tree_depth: default_max_tree_depth(),
            train_interval: default_train_interval_hours(),
            features: MlFeaturesConfig::default(),
            training: MlTrainingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// trading
// ---------------------------------------------------------------------------

fn default_broker_base_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_max_per_symbol_weight() -> f64 {
    0.30
}

fn default_max_open_positions() -> u32 {
    3
}

fn default_daily_stop_loss_pct() -> f64 {
    0.10
}

fn default_per_symbol_stop_loss_pct() -> f64 {
    0.05
}

fn default_min_order_amount() -> f64 {
    100.0
}

fn default_true() -> bool {
    true
}

fn default_auto_trade_interval_secs() -> u64 {
    60
}

fn default_initial_capital() -> f64 {
    100_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { base_url: default_broker_base_url(), api_key: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_per_symbol_weight")]
    pub max_per_symbol_weight: f64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,
    #[serde(default = "default_daily_stop_loss_pct")]
    pub daily_stop_loss_pct: f64,
    #[serde(default = "default_per_symbol_stop_loss_pct")]
    pub per_symbol_stop_loss_pct: f64,
    #[serde(default = "default_min_order_amount")]
    pub min_order_amount: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_per_symbol_weight: default_max_per_symbol_weight(),
            max_open_positions: default_max_open_positions(),
            daily_stop_loss_pct: default_daily_stop_loss_pct(),
            per_symbol_stop_loss_pct: default_per_symbol_stop_loss_pct(),
            min_order_amount: default_min_order_amount(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTradeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_auto_trade_interval_secs")]
    pub interval_secs: u64,
}

impl Default for AutoTradeConfig {
    fn default() -> Self {
        Self { enabled: true, interval_secs: default_auto_trade_interval_secs() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub auto_trade: AutoTradeConfig,
    /// Starting equity the risk manager measures drawdown and daily-stop
    /// thresholds against. Not part of the distilled config contract, but
    /// the risk manager has no other way to know the account's scale.
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            risk: RiskConfig::default(),
            auto_trade: AutoTradeConfig::default(),
            initial_capital: default_initial_capital(),
        }
    }
}

// ---------------------------------------------------------------------------
// top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ml: MlConfig,
    #[serde(default)]
    pub trading: TradingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
            log_level: default_log_level(),
            llm: LlmConfig::default(),
            ml: MlConfig::default(),
            trading: TradingConfig::default(),
        }
    }
}

impl Config {
    /// Parse a config from a YAML string. Unknown fields are ignored.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).context("failed to parse config YAML")
    }

    /// Convenience loader the binary entry point uses. Production deployments
    /// may prefer their own env-overlay and validation wiring in front of this.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))
    }
}
