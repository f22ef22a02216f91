//! Chain fill watcher for Polymarket CTF Exchange `OrderFilled` events.
//!
//! Polls `eth_getLogs` over the configured Polygon RPC endpoint rather than a
//! push subscription (the signer/provider feature set pulled in does not
//! include a pubsub transport); functionally this is still the "chain
//! WebSocket" described for the maker-fill merge: a deduplicated stream of
//! on-chain fills filtered to our own wallet address.

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::coordination::ShutdownToken;
use crate::error::{EngineError, Result};

/// Polymarket CTF Exchange on Polygon.
pub const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
/// Polymarket NegRisk CTF Exchange on Polygon.
pub const NEGRISK_CTF_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

const USDC_DECIMALS: u32 = 6;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);
/// Cap per poll to bound RPC response size on congested ranges.
const MAX_BLOCK_RANGE: u64 = 2_000;

sol! {
    #[derive(Debug)]
    event OrderFilled(
        bytes32 indexed orderHash,
        address indexed maker,
        address indexed taker,
        uint256 makerAssetId,
        uint256 takerAssetId,
        uint256 makerAmountFilled,
        uint256 takerAmountFilled,
        uint256 fee
    );
}

/// A deduplicated, decoded `OrderFilled` event touching our wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainFill {
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub order_hash: String,
    pub maker: String,
    pub taker: String,
    pub maker_asset_id: String,
    pub taker_asset_id: String,
    pub maker_amount: u64,
    pub taker_amount: u64,
    pub fee: u64,
    pub observed_at: DateTime<Utc>,
}

impl ChainFill {
    /// Dedup key per §4.7.4: `(txHash, logIndex)`.
    pub fn dedup_key(&self) -> (String, u64) {
        (self.transaction_hash.clone(), self.log_index)
    }

    pub fn is_wallet_buy(&self, wallet: &str) -> bool {
        self.taker.eq_ignore_ascii_case(wallet) && self.taker_asset_id != "0"
    }

    /// Number of outcome tokens filled, in human-readable shares.
    pub fn size_shares(&self) -> f64 {
        let raw = if self.maker_asset_id == "0" {
            self.taker_amount
        } else {
            self.maker_amount
        };
        raw as f64 / 10f64.powi(USDC_DECIMALS as i32)
    }
}

/// Watches the chain for `OrderFilled` events involving one wallet address and
/// rebroadcasts deduplicated fills to any number of subscribers (one per live
/// task's fill-watch sub-scope).
pub struct ChainFillWatcher {
    provider: Arc<dyn Provider + Send + Sync>,
    wallet: Address,
    exchange_addresses: Vec<Address>,
    poll_interval: Duration,
    seen: Mutex<HashSet<(String, u64)>>,
    sender: broadcast::Sender<ChainFill>,
}

impl ChainFillWatcher {
    pub fn new(rpc_url: &str, wallet: Address) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect_http(
                rpc_url
                    .parse()
                    .map_err(|e| EngineError::Config(format!("invalid RPC URL: {}", e)))?,
            );

        let exchange_addresses = [CTF_EXCHANGE, NEGRISK_CTF_EXCHANGE]
            .iter()
            .map(|a| a.parse::<Address>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Config(format!("invalid exchange address constant: {}", e)))?;

        let (sender, _) = broadcast::channel(256);

        Ok(Self {
            provider: Arc::new(provider),
            wallet,
            exchange_addresses,
            poll_interval: DEFAULT_POLL_INTERVAL,
            seen: Mutex::new(HashSet::new()),
            sender,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainFill> {
        self.sender.subscribe()
    }

    /// Poll-loop entry point; run as a long-lived background task.
    ///
    /// This is rooted at the executor/runtime level, not at any one task's
    /// cancellation scope: fill data must keep flowing for the delayed-
    /// settlement verification timer even after a task is cancelled.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        let mut from_block = match self.provider.get_block_number().await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to fetch starting block for chain fill watcher");
                return;
            }
        };

        info!(from_block, wallet = %self.wallet, "chain fill watcher starting");

        loop {
            let sleep = tokio::time::sleep(self.poll_interval);
            tokio::select! {
                _ = sleep => {}
                _ = shutdown.wait_for_shutdown() => {
                    info!("chain fill watcher stopping on shutdown");
                    return;
                }
            }

            match self.poll_once(from_block).await {
                Ok(Some(next_from)) => from_block = next_from,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "chain fill watcher poll failed, will retry"),
            }
        }
    }

    async fn poll_once(&self, from_block: u64) -> Result<Option<u64>> {
        let latest = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| EngineError::Transport(format!("get_block_number failed: {}", e)))?;

        if latest < from_block {
            return Ok(None);
        }
        let to_block = latest.min(from_block + MAX_BLOCK_RANGE);

        let filter = Filter::new()
            .address(self.exchange_addresses.clone())
            .event_signature(OrderFilled::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| EngineError::Transport(format!("get_logs failed: {}", e)))?;

        let mut seen = self.seen.lock().await;
        for log in &logs {
            if let Some(fill) = self.decode_relevant(log) {
                let key = fill.dedup_key();
                if seen.insert(key) {
                    debug!(tx = %fill.transaction_hash, log_index = fill.log_index, "new chain fill");
                    let _ = self.sender.send(fill);
                }
            }
        }
        // Bound memory: drop dedup entries once the broadcast buffer has long
        // since rotated past them.
        if seen.len() > 50_000 {
            seen.clear();
        }

        Ok(Some(to_block + 1))
    }

    fn decode_relevant(&self, log: &Log) -> Option<ChainFill> {
        let decoded = log.log_decode::<OrderFilled>().ok()?;
        let event = &decoded.inner.data;

        if event.maker != self.wallet && event.taker != self.wallet {
            return None;
        }

        let tx_hash = log.transaction_hash.unwrap_or(B256::ZERO);
        let log_index = log.log_index.unwrap_or_default();

        Some(ChainFill {
            block_number: log.block_number.unwrap_or_default(),
            transaction_hash: format!("{:#x}", tx_hash),
            log_index,
            order_hash: format!("{:#x}", event.orderHash),
            maker: format!("{:#x}", event.maker),
            taker: format!("{:#x}", event.taker),
            maker_asset_id: event.makerAssetId.to_string(),
            taker_asset_id: event.takerAssetId.to_string(),
            maker_amount: event.makerAmountFilled.try_into().unwrap_or(u64::MAX),
            taker_amount: event.takerAmountFilled.try_into().unwrap_or(u64::MAX),
            fee: event.fee.try_into().unwrap_or(u64::MAX),
            observed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_fill(tx: &str, log_index: u64) -> ChainFill {
        ChainFill {
            block_number: 50_000_000,
            transaction_hash: tx.to_string(),
            log_index,
            order_hash: "0x123".into(),
            maker: "0xmaker".into(),
            taker: "0xtaker".into(),
            maker_asset_id: "0".into(),
            taker_asset_id: "12345".into(),
            maker_amount: 650_000,
            taker_amount: 1_000_000,
            fee: 1_000,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn dedup_key_is_tx_and_log_index() {
        let a = mock_fill("0xabc", 3);
        let b = mock_fill("0xabc", 3);
        let c = mock_fill("0xabc", 4);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn size_shares_uses_outcome_token_leg() {
        let fill = mock_fill("0xabc", 0);
        assert!((fill.size_shares() - 1.0).abs() < 0.001);
    }

    #[test]
    fn exchange_addresses_parse() {
        assert!(CTF_EXCHANGE.parse::<Address>().is_ok());
        assert!(NEGRISK_CTF_EXCHANGE.parse::<Address>().is_ok());
    }
}
