use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration for the arbitrage engine (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub maker_venue: MakerVenueConfig,
    pub hedge_venue: HedgeVenueConfig,
    pub runtime: RuntimeConfig,
    pub freshness: FreshnessConfig,
    pub hedge: HedgeConfig,
    pub exposure: ExposureConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Maker-venue connectivity and credential pools.
#[derive(Debug, Clone, Deserialize)]
pub struct MakerVenueConfig {
    pub ws_url: String,
    pub rest_url: String,
    /// Credential pool for scan-path (read) requests.
    #[serde(default)]
    pub keys_scan: Vec<String>,
    /// Credential pool for trade-path (write) requests.
    #[serde(default)]
    pub keys_trade: Vec<String>,
    /// `ws` | `legacy`: selects maker-venue book source.
    #[serde(default = "default_orderbook_mode")]
    pub orderbook_mode: String,
}

/// Hedge-venue connectivity and credential pool.
#[derive(Debug, Clone, Deserialize)]
pub struct HedgeVenueConfig {
    pub ws_url: String,
    pub rest_url: String,
    #[serde(default)]
    pub keys: Vec<String>,
    /// `ws` | `rest`: selects hedge source.
    #[serde(default = "default_hedge_orderbook_source")]
    pub orderbook_source: String,
}

/// Process-wide runtime knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_account_name")]
    pub account_name: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    /// Directory `data/<account>/` is rooted at.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Freshness gates and WS health parameters (§4.2/§5).
#[derive(Debug, Clone, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default = "default_stale_calc_ms")]
    pub stale_calc_ms: u64,
    #[serde(default = "default_stale_ui_ms")]
    pub stale_ui_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_ws_health_check_ms")]
    pub ws_health_check_ms: u64,
    #[serde(default = "default_ws_disconnect_pause_ms")]
    pub ws_disconnect_pause_ms: u64,
    #[serde(default = "default_ws_resume_delay_ms")]
    pub ws_resume_delay_ms: u64,
}

impl FreshnessConfig {
    pub fn stale_calc(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stale_calc_ms as i64)
    }

    pub fn stale_ui(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stale_ui_ms as i64)
    }
}

/// Incremental-hedging knobs (§4.7.4).
#[derive(Debug, Clone, Deserialize)]
pub struct HedgeConfig {
    #[serde(default = "default_min_hedge_notional_usd")]
    pub min_hedge_notional_usd: Decimal,
    #[serde(default = "default_min_hedge_qty_shares")]
    pub min_hedge_qty_shares: Decimal,
    #[serde(default = "default_max_pause_count")]
    pub max_pause_count: u32,
    /// Reserved for a future automatic-unwind feature; not reachable in this build.
    #[serde(default = "default_unwind_max_retries")]
    pub unwind_max_retries: u32,
    #[serde(default = "default_max_hedge_retries")]
    pub max_hedge_retries: u32,
}

/// Exposure monitor (§4.8).
#[derive(Debug, Clone, Deserialize)]
pub struct ExposureConfig {
    #[serde(default = "default_exposure_threshold")]
    pub threshold_shares: Decimal,
    #[serde(default = "default_exposure_check_ms")]
    pub check_ms: u64,
}

/// Dashboard surface (§4.9).
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: default_dashboard_port(),
            api_token: None,
        }
    }
}

/// Ambient logging knobs (§9.1).
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            filter: default_log_filter(),
            json: false,
        }
    }
}

/// Notification surface (§4.9).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

fn default_orderbook_mode() -> String {
    "ws".to_string()
}

fn default_hedge_orderbook_source() -> String {
    "ws".to_string()
}

fn default_account_name() -> String {
    "default".to_string()
}

fn default_health_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_stale_calc_ms() -> u64 {
    10_000
}

fn default_stale_ui_ms() -> u64 {
    30_000
}

fn default_poll_ms() -> u64 {
    3_000
}

fn default_ws_health_check_ms() -> u64 {
    5_000
}

fn default_ws_disconnect_pause_ms() -> u64 {
    2_000
}

fn default_ws_resume_delay_ms() -> u64 {
    1_000
}

fn default_min_hedge_notional_usd() -> Decimal {
    dec!(1.0)
}

fn default_min_hedge_qty_shares() -> Decimal {
    dec!(1)
}

fn default_max_pause_count() -> u32 {
    5
}

fn default_unwind_max_retries() -> u32 {
    3
}

fn default_max_hedge_retries() -> u32 {
    3
}

fn default_exposure_threshold() -> Decimal {
    dec!(10)
}

fn default_exposure_check_ms() -> u64 {
    30_000
}

fn default_dashboard_port() -> u16 {
    8090
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from `./config` (directory of `default.toml` +
    /// environment-named overlay) or a single file, layered under env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_path = config_dir.as_ref();

        let mut builder = Config::builder()
            .set_default("maker_venue.orderbook_mode", "ws")?
            .set_default("hedge_venue.orderbook_source", "ws")?
            .set_default("runtime.health_port", 8080)?
            .set_default("dashboard.port", 8090)?;

        if config_path.is_file() {
            builder = builder.add_source(File::from(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::from(config_path.join("default.toml")).required(false))
                .add_source(
                    File::from(config_path.join(
                        std::env::var("XVENUE_ENV").unwrap_or_else(|_| "development".to_string()),
                    ))
                    .required(false),
                );
        }

        builder = builder.add_source(
            Environment::with_prefix("XVENUE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("maker_venue.keys_scan")
                .with_list_parse_key("maker_venue.keys_trade")
                .with_list_parse_key("hedge_venue.keys")
                .try_parsing(true),
        );

        let mut cfg: Self = builder.build()?.try_deserialize()?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// A complete, self-consistent configuration for CLI usage without a config file.
    pub fn default_config(dry_run: bool, account_name: &str) -> Self {
        Self {
            maker_venue: MakerVenueConfig {
                ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
                rest_url: "https://clob.polymarket.com".to_string(),
                keys_scan: Vec::new(),
                keys_trade: Vec::new(),
                orderbook_mode: default_orderbook_mode(),
            },
            hedge_venue: HedgeVenueConfig {
                ws_url: "wss://api.elections.kalshi.com/trade-api/ws/v2".to_string(),
                rest_url: "https://api.elections.kalshi.com/trade-api/v2".to_string(),
                keys: Vec::new(),
                orderbook_source: default_hedge_orderbook_source(),
            },
            runtime: RuntimeConfig {
                account_name: account_name.to_string(),
                dry_run,
                health_port: default_health_port(),
                data_dir: default_data_dir(),
            },
            freshness: FreshnessConfig {
                stale_calc_ms: default_stale_calc_ms(),
                stale_ui_ms: default_stale_ui_ms(),
                poll_ms: default_poll_ms(),
                ws_health_check_ms: default_ws_health_check_ms(),
                ws_disconnect_pause_ms: default_ws_disconnect_pause_ms(),
                ws_resume_delay_ms: default_ws_resume_delay_ms(),
            },
            hedge: HedgeConfig {
                min_hedge_notional_usd: default_min_hedge_notional_usd(),
                min_hedge_qty_shares: default_min_hedge_qty_shares(),
                max_pause_count: default_max_pause_count(),
                unwind_max_retries: default_unwind_max_retries(),
                max_hedge_retries: default_max_hedge_retries(),
            },
            exposure: ExposureConfig {
                threshold_shares: default_exposure_threshold(),
                check_ms: default_exposure_check_ms(),
            },
            dashboard: DashboardConfig::default(),
            logging: LoggingConfig::default(),
            notify: NotifyConfig::default(),
        }
    }

    /// Validate cross-field invariants beyond what `Deserialize` defaults capture.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.freshness.stale_calc_ms == 0 {
            errors.push("freshness.stale_calc_ms must be positive".to_string());
        }
        if self.freshness.stale_ui_ms < self.freshness.stale_calc_ms {
            errors.push("freshness.stale_ui_ms should be >= stale_calc_ms".to_string());
        }
        if self.hedge.min_hedge_notional_usd <= Decimal::ZERO {
            errors.push("hedge.min_hedge_notional_usd must be positive".to_string());
        }
        if self.hedge.min_hedge_qty_shares <= Decimal::ZERO {
            errors.push("hedge.min_hedge_qty_shares must be positive".to_string());
        }
        if self.hedge.max_pause_count == 0 {
            errors.push("hedge.max_pause_count must be >= 1".to_string());
        }
        if self.exposure.threshold_shares <= Decimal::ZERO {
            errors.push("exposure.threshold_shares must be positive".to_string());
        }
        if !matches!(self.maker_venue.orderbook_mode.as_str(), "ws" | "legacy") {
            errors.push("maker_venue.orderbook_mode must be 'ws' or 'legacy'".to_string());
        }
        if !matches!(self.hedge_venue.orderbook_source.as_str(), "ws" | "rest") {
            errors.push("hedge_venue.orderbook_source must be 'ws' or 'rest'".to_string());
        }

        errors
    }

    /// Explicit, auditable environment-variable overrides (§9.1: never implicit
    /// env-var shadowing inside `Deserialize` impls).
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_bool(&["XVENUE_DRY_RUN", "DRY_RUN"]) {
            self.runtime.dry_run = v;
        }
        if let Some(v) = env_u16(&["XVENUE_HEALTH_PORT", "HEALTH_PORT"]) {
            self.runtime.health_port = v;
        }
        if let Some(v) = env_u16(&["XVENUE_DASHBOARD_PORT", "DASHBOARD_PORT"]) {
            self.dashboard.port = v;
        }
        if let Some(v) = env_string(&["XVENUE_ACCOUNT_NAME", "ACCOUNT_NAME"]) {
            self.runtime.account_name = v;
        }
        if let Some(v) = env_string(&["XVENUE_LOG_DIR", "LOG_DIR"]) {
            self.logging.log_dir = Some(v);
        }
        if let Some(v) = env_string(&["RUST_LOG", "LOG_FILTER"]) {
            self.logging.filter = v;
        }
        if let Some(v) = env_string(&["ALERT_WEBHOOK_URL"]) {
            self.notify.webhook_url = Some(v);
        }
        if let Some(v) = env_string(&["DASHBOARD_API_TOKEN"]) {
            self.dashboard.api_token = Some(v);
        }
        if let Some(v) = env_list(&["MAKER_VENUE_KEYS_SCAN"]) {
            self.maker_venue.keys_scan = v;
        }
        if let Some(v) = env_list(&["MAKER_VENUE_KEYS_TRADE"]) {
            self.maker_venue.keys_trade = v;
        }
    }
}

fn env_string(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| std::env::var(k).ok())
}

fn env_u16(keys: &[&str]) -> Option<u16> {
    env_string(keys).and_then(|v| v.parse::<u16>().ok())
}

fn env_bool(keys: &[&str]) -> Option<bool> {
    env_string(keys).and_then(|v| parse_bool_like(&v))
}

fn env_list(keys: &[&str]) -> Option<Vec<String>> {
    env_string(keys).map(|raw| parse_string_list(&raw))
}

fn parse_string_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<String>>(trimmed) {
            return values
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_bool_like(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_clean() {
        let cfg = AppConfig::default_config(true, "test");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn stale_ui_below_stale_calc_is_rejected() {
        let mut cfg = AppConfig::default_config(true, "test");
        cfg.freshness.stale_ui_ms = 1;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("stale_ui_ms")));
    }

    #[test]
    fn parse_string_list_csv_and_json() {
        assert_eq!(parse_string_list("a,b, c ,,d"), vec!["a", "b", "c", "d"]);
        assert_eq!(
            parse_string_list(r#"["k1","k2"]"#),
            vec!["k1".to_string(), "k2".to_string()]
        );
    }
}
