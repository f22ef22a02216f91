//! Maker-venue client, backed by the official Polymarket CLOB/Gamma SDK.
//!
//! Signing and wire-encoding are delegated entirely to
//! `polymarket_client_sdk`: this adapter's job is to translate between our
//! domain types ([`Order`], [`OrderRequest`], [`Book`]) and the SDK's request
//!/response shapes, and to implement [`VenueClient`] for the maker role.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use chrono::Utc;
use polymarket_client_sdk::auth::{state::Authenticated, Normal};
use polymarket_client_sdk::clob::types::{
    request::{OrderBookSummaryRequest, OrdersRequest},
    OrderType as SdkOrderType, Side as SdkSide, SignatureType as SdkSignatureType,
};
use polymarket_client_sdk::clob::{Client as ClobClient, Config as ClobConfig};
use polymarket_client_sdk::gamma::types::request::MarketsRequest;
use polymarket_client_sdk::gamma::Client as GammaClient;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeroize::Zeroize;

use crate::domain::{
    Book, BookSource, CachedOrderStatus, Level, Order, OrderLifecycle, OrderRequest, OrderSide,
    TimeInForce, VenueOrderState,
};
use crate::error::{EngineError, Result};
use crate::exchange::{CancelOutcome, PlaceOpts, VenueClient, VenueRole};
use crate::signing::Wallet;

/// Chain ID for Polygon Mainnet.
pub const POLYGON_CHAIN_ID: u64 = 137;
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
type AuthClobClient = ClobClient<Authenticated<Normal>>;

/// Polymarket CLOB/Gamma client for the maker venue.
pub struct PolymarketClient {
    clob_client: ClobClient,
    gamma_client: GammaClient,
    signer: Option<PrivateKeySigner>,
    #[allow(dead_code)]
    wallet: Option<Arc<Wallet>>,
    funder: Option<alloy::primitives::Address>,
    base_url: String,
    dry_run: bool,
    neg_risk: bool,
    /// The upstream SDK requires unique ownership when transitioning an
    /// unauthenticated client to authenticated; serialize that handshake.
    order_mutex: Arc<Mutex<()>>,
}

impl Clone for PolymarketClient {
    fn clone(&self) -> Self {
        Self {
            clob_client: self.clob_client.clone(),
            gamma_client: self.gamma_client.clone(),
            signer: self.signer.clone(),
            wallet: self.wallet.clone(),
            funder: self.funder,
            base_url: self.base_url.clone(),
            dry_run: self.dry_run,
            neg_risk: self.neg_risk,
            order_mutex: self.order_mutex.clone(),
        }
    }
}

impl PolymarketClient {
    /// Read-only client; any write call returns dry-run synthetic responses.
    pub fn new(base_url: &str, dry_run: bool) -> Result<Self> {
        let clob_client = ClobClient::new(base_url, ClobConfig::default())
            .map_err(|e| EngineError::Transport(format!("failed to create CLOB client: {}", e)))?;
        let gamma_client = GammaClient::new(GAMMA_API_URL)
            .map_err(|e| EngineError::Transport(format!("failed to create Gamma client: {}", e)))?;

        info!(dry_run, "created Polymarket SDK client (read-only)");

        Ok(Self {
            clob_client,
            gamma_client,
            signer: None,
            wallet: None,
            funder: None,
            base_url: base_url.trim_end_matches('/').to_string(),
            dry_run,
            neg_risk: false,
            order_mutex: Arc::new(Mutex::new(())),
        })
    }

    /// Authenticated EOA client (wallet holds its own funds).
    pub async fn new_authenticated(base_url: &str, wallet: Wallet, neg_risk: bool) -> Result<Self> {
        Self::new_authenticated_inner(base_url, wallet, None, neg_risk).await
    }

    /// Authenticated proxy-wallet client (Magic/email wallet funded via `funder_address`).
    pub async fn new_authenticated_proxy(
        base_url: &str,
        wallet: Wallet,
        funder_address: &str,
        neg_risk: bool,
    ) -> Result<Self> {
        let funder: alloy::primitives::Address = funder_address
            .parse()
            .map_err(|e| EngineError::Signing(format!("invalid funder address: {}", e)))?;
        Self::new_authenticated_inner(base_url, wallet, Some(funder), neg_risk).await
    }

    async fn new_authenticated_inner(
        base_url: &str,
        wallet: Wallet,
        funder: Option<alloy::primitives::Address>,
        neg_risk: bool,
    ) -> Result<Self> {
        let clob_client = ClobClient::new(base_url, ClobConfig::default())
            .map_err(|e| EngineError::Transport(format!("failed to create CLOB client: {}", e)))?;
        let gamma_client = GammaClient::new(GAMMA_API_URL)
            .map_err(|e| EngineError::Transport(format!("failed to create Gamma client: {}", e)))?;

        let mut private_key_hex = wallet.private_key_hex().to_string();
        let signer_result = private_key_hex
            .trim_start_matches("0x")
            .parse::<PrivateKeySigner>()
            .map_err(|e| EngineError::Signing(format!("invalid private key: {}", e)));
        private_key_hex.zeroize();
        let signer = signer_result?.with_chain_id(Some(POLYGON_CHAIN_ID));

        info!(
            address = %signer.address(),
            proxy = funder.is_some(),
            "created authenticated Polymarket SDK client"
        );

        Ok(Self {
            clob_client,
            gamma_client,
            signer: Some(signer),
            wallet: Some(Arc::new(wallet)),
            funder,
            base_url: base_url.trim_end_matches('/').to_string(),
            dry_run: false,
            neg_risk,
            order_mutex: Arc::new(Mutex::new(())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn authenticate_fresh(&self, signer: &PrivateKeySigner) -> Result<AuthClobClient> {
        // Serialize auth handshakes: the SDK requires unique ownership when
        // transitioning unauthenticated -> authenticated, so build a fresh
        // client per call rather than caching the authenticated state.
        let _guard = self.order_mutex.lock().await;

        let fresh_client = ClobClient::new(&self.base_url, ClobConfig::default())
            .map_err(|e| EngineError::Transport(format!("failed to create CLOB client: {}", e)))?;

        let auth_client = if let Some(funder) = self.funder {
            debug!(%funder, "authenticating with proxy wallet");
            fresh_client
                .authentication_builder(signer)
                .funder(funder)
                .signature_type(SdkSignatureType::Proxy)
                .authenticate()
                .await
                .map_err(|e| EngineError::Signing(format!("proxy authentication failed: {}", e)))?
        } else {
            debug!("authenticating with EOA wallet");
            fresh_client
                .authentication_builder(signer)
                .authenticate()
                .await
                .map_err(|e| EngineError::Signing(format!("authentication failed: {}", e)))?
        };

        Ok(auth_client)
    }

    /// Lookup the Gamma market backing a CLOB token id, used by the market matcher (§4.4).
    #[instrument(skip(self))]
    pub async fn get_gamma_market_by_token_id(
        &self,
        token_id: &str,
    ) -> Result<polymarket_client_sdk::gamma::types::response::Market> {
        let req = MarketsRequest::builder()
            .clob_token_ids(vec![token_id.to_string()])
            .limit(1)
            .build();

        let markets = self
            .gamma_client
            .markets(&req)
            .await
            .map_err(|e| EngineError::Transport(format!("failed to get gamma market: {}", e)))?;

        markets.into_iter().next().ok_or_else(|| {
            EngineError::BadRequest(format!("market not found for token_id={}", token_id))
        })
    }

    /// Lookup by shared `conditionId`, the matcher's first-choice pairing key (§4.4).
    #[instrument(skip(self))]
    pub async fn get_market_by_condition_id(
        &self,
        condition_id: &str,
    ) -> Result<polymarket_client_sdk::gamma::types::response::Market> {
        let req = MarketsRequest::builder()
            .condition_ids(vec![condition_id.to_string()])
            .limit(1)
            .build();

        let markets = self
            .gamma_client
            .markets(&req)
            .await
            .map_err(|e| EngineError::Transport(format!("failed to get gamma market: {}", e)))?;

        markets.into_iter().next().ok_or_else(|| {
            EngineError::BadRequest(format!("market not found for condition_id={}", condition_id))
        })
    }

    fn map_sdk_book(token_id: &str, resp: polymarket_client_sdk::clob::types::response::OrderBookSummaryResponse) -> Book {
        let mut book = Book::new(token_id, BookSource::Rest);
        let bids = resp
            .bids
            .into_iter()
            .map(|l| Level {
                price: l.price,
                size: l.size,
            })
            .collect();
        let asks = resp
            .asks
            .into_iter()
            .map(|l| Level {
                price: l.price,
                size: l.size,
            })
            .collect();
        book.set_levels(bids, asks, BookSource::Rest);
        book
    }

    fn map_sdk_order_status(order: &polymarket_client_sdk::clob::types::response::OpenOrderResponse) -> CachedOrderStatus {
        let filled = order.size_matched;
        let remaining = (order.original_size - filled).max(Decimal::ZERO);
        CachedOrderStatus {
            hash: order.id.clone(),
            status: if remaining <= Decimal::ZERO {
                VenueOrderState::Filled
            } else {
                VenueOrderState::Open
            },
            filled_qty: filled,
            remaining_qty: remaining,
            cancel_reason: None,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl VenueClient for PolymarketClient {
    fn role(&self) -> VenueRole {
        VenueRole::Maker
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    #[instrument(skip(self, request))]
    async fn place_limit(&self, request: &OrderRequest, opts: PlaceOpts) -> Result<Order> {
        let mut order = Order::from_request(request);

        if self.dry_run {
            info!(
                token_id = %request.token_id,
                side = %request.order_side,
                price = %request.limit_price,
                shares = %request.shares,
                "dry run: would submit maker order"
            );
            order.venue_order_id = Some(request.client_order_id.clone());
            order.status = OrderLifecycle::Submitted;
            order.submitted_at = Some(Utc::now());
            return Ok(order);
        }

        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| EngineError::Signing("maker client not authenticated".to_string()))?;
        let auth_client = self.authenticate_fresh(signer).await?;

        let sdk_side = match request.order_side {
            OrderSide::Buy => SdkSide::Buy,
            OrderSide::Sell => SdkSide::Sell,
        };
        let sdk_order_type = match opts.time_in_force {
            TimeInForce::GTC => SdkOrderType::GTC,
            TimeInForce::FOK => SdkOrderType::FOK,
            TimeInForce::IOC => SdkOrderType::FAK,
        };

        let built = auth_client
            .limit_order()
            .token_id(&request.token_id)
            .price(request.limit_price)
            .size(request.shares)
            .side(sdk_side)
            .order_type(sdk_order_type)
            .build()
            .await
            .map_err(|e| EngineError::BadRequest(format!("failed to build order: {}", e)))?;

        let signed = auth_client
            .sign(signer, built)
            .await
            .map_err(|e| EngineError::Signing(format!("failed to sign order: {}", e)))?;

        let resp = auth_client
            .post_order(signed)
            .await
            .map_err(|e| EngineError::BadRequest(format!("venue rejected order: {}", e)))?;

        info!(order_id = %resp.order_id, "maker order submitted");

        order.venue_order_id = Some(resp.order_id);
        order.status = OrderLifecycle::Submitted;
        order.submitted_at = Some(Utc::now());
        let _ = self.neg_risk; // neg-risk routing delegated to `opts.neg_risk` at call sites
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, order_id: &str, _timeout: Duration) -> Result<CancelOutcome> {
        if self.dry_run {
            return Ok(CancelOutcome { cancelled: true });
        }

        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| EngineError::Signing("maker client not authenticated".to_string()))?;
        let auth_client = self.authenticate_fresh(signer).await?;

        match auth_client.cancel_order(order_id).await {
            Ok(_) => Ok(CancelOutcome { cancelled: true }),
            Err(e) => {
                let msg = e.to_string();
                if msg.to_ascii_lowercase().contains("not found")
                    || msg.to_ascii_lowercase().contains("already")
                {
                    Ok(CancelOutcome { cancelled: false })
                } else {
                    Err(EngineError::Transport(format!("cancel failed: {}", msg)))
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_id: &str) -> Result<Option<CachedOrderStatus>> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| EngineError::Signing("maker client not authenticated".to_string()))?;
        let auth_client = self.authenticate_fresh(signer).await?;

        match auth_client.order(order_id).await {
            Ok(order) => {
                let filled = order.size_matched;
                let remaining = (order.original_size - filled).max(Decimal::ZERO);
                Ok(Some(CachedOrderStatus {
                    hash: order.id,
                    status: if remaining <= Decimal::ZERO {
                        VenueOrderState::Filled
                    } else {
                        VenueOrderState::Open
                    },
                    filled_qty: filled,
                    remaining_qty: remaining,
                    cancel_reason: None,
                    updated_at: Utc::now(),
                }))
            }
            Err(e) if e.to_string().to_ascii_lowercase().contains("not found") => Ok(None),
            Err(e) => Err(EngineError::Transport(format!("get_order failed: {}", e))),
        }
    }

    #[instrument(skip(self))]
    async fn list_open_orders(&self) -> Result<Vec<CachedOrderStatus>> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| EngineError::Signing("maker client not authenticated".to_string()))?;
        let auth_client = self.authenticate_fresh(signer).await?;

        let req = OrdersRequest::builder().build();
        let mut cursor: Option<String> = None;
        let mut out = Vec::new();

        loop {
            let page = auth_client
                .orders(&req, cursor.clone())
                .await
                .map_err(|e| EngineError::Transport(format!("failed to list orders: {}", e)))?;

            for order in &page.data {
                out.push(Self::map_sdk_order_status(order));
            }

            if page.next_cursor.is_empty() || page.next_cursor == "LTE=" {
                break;
            }
            cursor = Some(page.next_cursor);
        }

        Ok(out)
    }

    #[instrument(skip(self))]
    async fn get_book(&self, token_id: &str) -> Result<Option<Book>> {
        let req = OrderBookSummaryRequest::builder().token_id(token_id).build();

        match self.clob_client.order_book(&req).await {
            Ok(resp) => Ok(Some(Self::map_sdk_book(token_id, resp))),
            Err(e) if e.to_string().to_ascii_lowercase().contains("not found") => Ok(None),
            Err(e) => Err(EngineError::Transport(format!("get_book failed: {}", e))),
        }
    }
}

/// Runs `future` inside the SDK's auth-serialization scope. Exposed for callers
/// (the executor's hedging pipeline) that need to bracket a submit+cancel pair.
pub async fn with_order_mutex<F, T>(client: &PolymarketClient, future: F) -> T
where
    F: Future<Output = T>,
{
    let _guard = client.order_mutex.lock().await;
    future.await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_client_reports_dry_run() {
        let client = PolymarketClient::new("https://clob.polymarket.com", true).unwrap();
        assert!(client.is_dry_run());
        assert_eq!(client.role(), VenueRole::Maker);
    }

    #[tokio::test]
    async fn dry_run_place_limit_synthesizes_submitted_order() {
        use crate::domain::Side;
        let client = PolymarketClient::new("https://clob.polymarket.com", true).unwrap();
        let req = OrderRequest::buy_limit(
            "tok".to_string(),
            Side::Yes,
            rust_decimal_macros::dec!(10),
            rust_decimal_macros::dec!(0.42),
            false,
        );
        let order = client.place_limit(&req, PlaceOpts::default()).await.unwrap();
        assert_eq!(order.status, OrderLifecycle::Submitted);
        assert!(order.venue_order_id.is_some());
    }
}
