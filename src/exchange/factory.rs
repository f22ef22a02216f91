use std::sync::Arc;

use crate::adapters::{KalshiClient, PolymarketClient};
use crate::config::AppConfig;
use crate::error::Result;
use crate::signing::Wallet;

use super::VenueClient;

/// Build the maker and hedge venue clients from configuration.
///
/// Returns `(maker, hedge)`. In dry-run the maker client is unauthenticated
/// (read-only market data, synthetic order responses); live trading requires
/// `POLYMARKET_PRIVATE_KEY` (see [`Wallet::from_env`]) and optionally
/// `POLYMARKET_FUNDER` for a proxy-wallet setup.
pub async fn build_venue_clients(config: &AppConfig) -> Result<(Arc<dyn VenueClient>, Arc<dyn VenueClient>)> {
    let maker = build_maker_client(config).await?;
    let hedge = build_hedge_client(config)?;
    Ok((maker, hedge))
}

async fn build_maker_client(config: &AppConfig) -> Result<Arc<dyn VenueClient>> {
    let rest_url = &config.maker_venue.rest_url;

    if config.runtime.dry_run {
        let client = PolymarketClient::new(rest_url, true)?;
        return Ok(Arc::new(client));
    }

    let wallet = Wallet::from_env(crate::adapters::polymarket_clob::POLYGON_CHAIN_ID)?;
    match std::env::var("POLYMARKET_FUNDER").ok() {
        Some(funder_addr) => {
            let client =
                PolymarketClient::new_authenticated_proxy(rest_url, wallet, &funder_addr, true).await?;
            Ok(Arc::new(client))
        }
        None => {
            let client = PolymarketClient::new_authenticated(rest_url, wallet, true).await?;
            Ok(Arc::new(client))
        }
    }
}

fn build_hedge_client(config: &AppConfig) -> Result<Arc<dyn VenueClient>> {
    let base_url = &config.hedge_venue.rest_url;

    let mut api_key = None;
    let mut api_secret = None;
    if !config.runtime.dry_run {
        api_key = std::env::var("KALSHI_API_KEY")
            .ok()
            .or_else(|| std::env::var("KALSHI_ACCESS_KEY").ok());
        api_secret = std::env::var("KALSHI_API_SECRET")
            .ok()
            .or_else(|| std::env::var("KALSHI_ACCESS_SECRET").ok());
    }

    let client = KalshiClient::new(Some(base_url), api_key, api_secret, config.runtime.dry_run)?;
    Ok(Arc::new(client))
}
