//! Hedge-venue client: a native-Rust Kalshi REST adapter (no vendor SDK).
//!
//! Kalshi's binary markets are addressed by `ticker`, not `token_id`; this
//! adapter encodes the hedge-venue token id as `"<ticker>:<yes|no>"` so the
//! rest of the engine can treat both venues uniformly.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::warn;

use crate::domain::{
    Book, BookSource, CachedOrderStatus, Level, Order, OrderLifecycle, OrderRequest, OrderSide,
    VenueOrderState,
};
use crate::error::{EngineError, Result};
use crate::exchange::{CancelOutcome, PlaceOpts, VenueClient, VenueRole};

const DEFAULT_KALSHI_API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutcomeSide {
    Yes,
    No,
}

impl OutcomeSide {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }

    /// Parse `"<ticker>:yes|no"` (our own canonical form) or a bare Kalshi
    /// ticker with a `-YES`/`-NO`/`_YES`/`_NO` suffix.
    fn from_token_id(token_id: &str) -> (String, Self) {
        if let Some((ticker, side)) = token_id.rsplit_once(':') {
            return (
                ticker.trim().to_string(),
                if side.trim().eq_ignore_ascii_case("no") {
                    Self::No
                } else {
                    Self::Yes
                },
            );
        }
        if let Some(stripped) = token_id.strip_suffix("-YES") {
            return (stripped.to_string(), Self::Yes);
        }
        if let Some(stripped) = token_id.strip_suffix("-NO") {
            return (stripped.to_string(), Self::No);
        }
        if let Some(stripped) = token_id.strip_suffix("_YES") {
            return (stripped.to_string(), Self::Yes);
        }
        if let Some(stripped) = token_id.strip_suffix("_NO") {
            return (stripped.to_string(), Self::No);
        }
        (token_id.trim().to_string(), Self::Yes)
    }
}

#[derive(Clone)]
pub struct KalshiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    dry_run: bool,
}

impl KalshiClient {
    pub fn new(
        base_url: Option<&str>,
        api_key: Option<String>,
        api_secret: Option<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_KALSHI_API_BASE)
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder()
            .user_agent("xvenue-arb-kalshi-adapter/0.1")
            .build()
            .map_err(|e| EngineError::Transport(format!("failed to build Kalshi HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            api_secret,
            dry_run,
        })
    }

    pub fn from_env(base_url: Option<&str>, dry_run: bool) -> Result<Self> {
        let api_key = std::env::var("KALSHI_API_KEY")
            .ok()
            .or_else(|| std::env::var("KALSHI_ACCESS_KEY").ok());
        let api_secret = std::env::var("KALSHI_API_SECRET")
            .ok()
            .or_else(|| std::env::var("KALSHI_ACCESS_SECRET").ok());
        Self::new(base_url, api_key, api_secret, dry_run)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_headers(&self, method: &Method, path: &str, body: &str) -> Result<HeaderMap> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EngineError::Signing("KALSHI_API_KEY is required".to_string()))?;
        let secret = self
            .api_secret
            .as_ref()
            .ok_or_else(|| EngineError::Signing("KALSHI_API_SECRET is required".to_string()))?;

        let timestamp = Utc::now().timestamp_millis().to_string();
        let sign_payload = format!("{}{}{}{}", timestamp, method.as_str().to_uppercase(), path, body);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| EngineError::Signing(format!("invalid Kalshi secret: {}", e)))?;
        mac.update(sign_payload.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("kalshi-access-key"),
            HeaderValue::from_str(key)
                .map_err(|e| EngineError::Signing(format!("invalid key header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("kalshi-access-signature"),
            HeaderValue::from_str(&signature)
                .map_err(|e| EngineError::Signing(format!("invalid signature header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("kalshi-access-timestamp"),
            HeaderValue::from_str(&timestamp)
                .map_err(|e| EngineError::Signing(format!("invalid timestamp header: {}", e)))?,
        );
        Ok(headers)
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<Value>,
        require_auth: bool,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let body_text = body.as_ref().map(|b| b.to_string()).unwrap_or_default();

        let mut req = self.http.request(method.clone(), &url);
        if let Some(query) = query {
            req = req.query(query);
        }
        if require_auth {
            req = req.headers(self.auth_headers(&method, path, &body_text)?);
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.as_u16() == 429 {
            return Err(EngineError::RateLimited(format!(
                "Kalshi API rate limited for {} {}",
                method, path
            )));
        }
        if !status.is_success() {
            return Err(EngineError::BadRequest(format!(
                "Kalshi API {} {} failed: status={} body={}",
                method, path, status, text
            )));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| EngineError::Transport(format!("invalid Kalshi JSON response: {}", e)))
    }

    fn pick_array<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a [Value]> {
        keys.iter()
            .find_map(|key| root.get(*key).and_then(|v| v.as_array()).map(Vec::as_slice))
    }

    fn pick_obj<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
        keys.iter().find_map(|key| root.get(*key))
    }

    fn pick_str<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a str> {
        Self::pick_obj(root, keys).and_then(|v| v.as_str())
    }

    fn parse_decimalish(value: &Value) -> Option<Decimal> {
        match value {
            Value::Null => None,
            Value::String(s) => Decimal::from_str_exact(s.trim()).ok(),
            Value::Number(n) => Decimal::from_str_exact(&n.to_string()).ok(),
            _ => None,
        }
    }

    /// Kalshi prices are integer cents; normalize to a `[0, 1]` decimal.
    fn from_cents_if_needed(value: Decimal) -> Decimal {
        if value > Decimal::ONE && value <= Decimal::new(100, 0) {
            value / Decimal::new(100, 0)
        } else {
            value
        }
    }

    fn extract_levels(value: &Value) -> Vec<Level> {
        let mut out = Vec::new();
        let Some(entries) = value.as_array() else {
            return out;
        };
        for entry in entries {
            match entry {
                Value::Array(pair) if pair.len() >= 2 => {
                    let Some(price) = Self::parse_decimalish(&pair[0]).map(Self::from_cents_if_needed) else {
                        continue;
                    };
                    let Some(size) = Self::parse_decimalish(&pair[1]) else {
                        continue;
                    };
                    out.push(Level { price, size });
                }
                Value::Object(_) => {
                    let price = Self::pick_obj(entry, &["price", "yes_price", "no_price"])
                        .and_then(Self::parse_decimalish)
                        .map(Self::from_cents_if_needed);
                    let size = Self::pick_obj(entry, &["size", "count", "quantity"])
                        .and_then(Self::parse_decimalish);
                    if let (Some(price), Some(size)) = (price, size) {
                        out.push(Level { price, size });
                    }
                }
                _ => {}
            }
        }
        out
    }

    async fn fetch_orderbook(&self, ticker: &str, side: OutcomeSide) -> Result<Book> {
        let path = format!("/markets/{}/orderbook", ticker);
        let value = self
            .request_json(Method::GET, &path, None, None, false)
            .await?;

        let root = Self::pick_obj(&value, &["orderbook", "book"]).unwrap_or(&value);
        let mut bids = Self::pick_obj(root, &["bids", "buy"])
            .map(Self::extract_levels)
            .unwrap_or_default();
        let mut asks = Self::pick_obj(root, &["asks", "sell"])
            .map(Self::extract_levels)
            .unwrap_or_default();

        if bids.is_empty() && asks.is_empty() {
            // Kalshi's binary book is commonly exposed as separate YES/NO ladders
            // rather than a unified bid/ask; derive bid/ask for the requested side.
            let yes = Self::pick_obj(root, &["yes", "yes_orders"]).map(Self::extract_levels);
            let no = Self::pick_obj(root, &["no", "no_orders"]).map(Self::extract_levels);
            match side {
                OutcomeSide::Yes => {
                    bids = yes.unwrap_or_default();
                    asks = no
                        .unwrap_or_default()
                        .into_iter()
                        .map(|l| Level {
                            price: (Decimal::ONE - l.price).max(Decimal::ZERO),
                            size: l.size,
                        })
                        .collect();
                }
                OutcomeSide::No => {
                    bids = no.unwrap_or_default();
                    asks = yes
                        .unwrap_or_default()
                        .into_iter()
                        .map(|l| Level {
                            price: (Decimal::ONE - l.price).max(Decimal::ZERO),
                            size: l.size,
                        })
                        .collect();
                }
            }
        }

        let token_id = format!("{}:{}", ticker, side.as_str());
        let mut book = Book::new(token_id, BookSource::Rest);
        book.set_levels(bids, asks, BookSource::Rest);
        Ok(book)
    }

    fn map_order(order: &Value, fallback_id: Option<&str>) -> CachedOrderStatus {
        let id = Self::pick_str(order, &["order_id", "id", "client_order_id"])
            .map(ToString::to_string)
            .or_else(|| fallback_id.map(ToString::to_string))
            .unwrap_or_else(|| format!("kalshi-{}", Utc::now().timestamp_millis()));

        let status_str = Self::pick_str(order, &["status", "state"])
            .unwrap_or("resting")
            .to_ascii_lowercase();
        let status = match status_str.as_str() {
            "filled" | "executed" => VenueOrderState::Filled,
            "cancelled" | "canceled" => VenueOrderState::Cancelled,
            "expired" => VenueOrderState::Expired,
            "rejected" | "invalid" => VenueOrderState::Invalidated,
            _ => VenueOrderState::Open,
        };

        let size = Self::pick_obj(order, &["count", "size", "quantity"])
            .and_then(Self::parse_decimalish)
            .unwrap_or(Decimal::ZERO);
        let filled = Self::pick_obj(order, &["filled_count", "filled", "size_matched"])
            .and_then(Self::parse_decimalish)
            .unwrap_or(Decimal::ZERO);

        CachedOrderStatus {
            hash: id,
            status,
            filled_qty: filled,
            remaining_qty: (size - filled).max(Decimal::ZERO),
            cancel_reason: None,
            updated_at: Utc::now(),
        }
    }

    pub async fn get_best_prices(&self, token_id: &str) -> Result<(Option<Decimal>, Option<Decimal>)> {
        let (ticker, side) = OutcomeSide::from_token_id(token_id);
        let book = self.fetch_orderbook(&ticker, side).await?;
        if book.bids.is_empty() && book.asks.is_empty() {
            warn!(token_id, "Kalshi order book has no bids/asks");
        }
        Ok((book.best_bid().map(|l| l.price), book.best_ask().map(|l| l.price)))
    }
}

#[async_trait]
impl VenueClient for KalshiClient {
    fn role(&self) -> VenueRole {
        VenueRole::Hedge
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn place_limit(&self, request: &OrderRequest, _opts: PlaceOpts) -> Result<Order> {
        let mut order = Order::from_request(request);

        if self.dry_run {
            order.venue_order_id = Some(request.client_order_id.clone());
            order.status = OrderLifecycle::Submitted;
            order.submitted_at = Some(Utc::now());
            return Ok(order);
        }

        let (ticker, side) = OutcomeSide::from_token_id(&request.token_id);
        let body = json!({
            "ticker": ticker,
            "client_order_id": request.client_order_id,
            "action": if matches!(request.order_side, OrderSide::Buy) { "buy" } else { "sell" },
            "side": side.as_str(),
            "type": "limit",
            "count": request.shares,
            "price": (request.limit_price * Decimal::new(100, 0)).round_dp(0),
            "time_in_force": "immediate_or_cancel",
        });

        let value = self
            .request_json(Method::POST, "/portfolio/orders", None, Some(body), true)
            .await?;
        let raw = Self::pick_obj(&value, &["order", "data", "result"]).unwrap_or(&value);
        let status = Self::map_order(raw, Some(&request.client_order_id));

        order.venue_order_id = Some(status.hash);
        order.status = OrderLifecycle::Submitted;
        order.submitted_at = Some(Utc::now());
        order.filled_shares = status.filled_qty;
        Ok(order)
    }

    async fn cancel(&self, order_id: &str, _timeout: Duration) -> Result<CancelOutcome> {
        if self.dry_run {
            return Ok(CancelOutcome { cancelled: true });
        }

        let path = format!("/portfolio/orders/{}/cancel", order_id);
        match self.request_json(Method::POST, &path, None, Some(json!({})), true).await {
            Ok(_) => Ok(CancelOutcome { cancelled: true }),
            Err(EngineError::BadRequest(msg)) if msg.to_ascii_lowercase().contains("not found") => {
                Ok(CancelOutcome { cancelled: false })
            }
            Err(e) => Err(e),
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<CachedOrderStatus>> {
        let path = format!("/portfolio/orders/{}", order_id);
        match self.request_json(Method::GET, &path, None, None, true).await {
            Ok(value) => {
                let raw = Self::pick_obj(&value, &["order", "data", "result"]).unwrap_or(&value);
                Ok(Some(Self::map_order(raw, Some(order_id))))
            }
            Err(EngineError::BadRequest(msg)) if msg.to_ascii_lowercase().contains("not found") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_open_orders(&self) -> Result<Vec<CachedOrderStatus>> {
        let params = vec![("status".to_string(), "resting".to_string())];
        let params: Vec<(&str, String)> = params.iter().map(|(k, v)| (*k, v.clone())).collect();
        let value = self
            .request_json(Method::GET, "/portfolio/orders", Some(&params), None, true)
            .await?;
        let orders = Self::pick_array(&value, &["orders", "data", "results"]).unwrap_or(&[]);
        Ok(orders.iter().map(|o| Self::map_order(o, None)).collect())
    }

    async fn get_book(&self, token_id: &str) -> Result<Option<Book>> {
        let (ticker, side) = OutcomeSide::from_token_id(token_id);
        match self.fetch_orderbook(&ticker, side).await {
            Ok(book) => Ok(Some(book)),
            Err(EngineError::BadRequest(msg)) if msg.to_ascii_lowercase().contains("not found") => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_outcome_side_from_token_formats() {
        let (ticker, side) = OutcomeSide::from_token_id("BTC-2026:yes");
        assert_eq!(ticker, "BTC-2026");
        assert_eq!(side, OutcomeSide::Yes);

        let (ticker, side) = OutcomeSide::from_token_id("BTC-2026-NO");
        assert_eq!(ticker, "BTC-2026");
        assert_eq!(side, OutcomeSide::No);
    }

    #[test]
    fn from_cents_is_applied_for_small_integer_prices() {
        let cents = Decimal::new(42, 0);
        assert_eq!(KalshiClient::from_cents_if_needed(cents), Decimal::new(42, 2));
        let decimal = Decimal::new(42, 2);
        assert_eq!(KalshiClient::from_cents_if_needed(decimal), decimal);
    }

    #[tokio::test]
    async fn dry_run_place_limit_does_not_touch_network() {
        use crate::domain::Side;
        let client = KalshiClient::new(None, None, None, true).unwrap();
        let req = OrderRequest::hedge_ioc(
            "BTC-2026:yes".to_string(),
            Side::Yes,
            OrderSide::Sell,
            rust_decimal_macros::dec!(10),
            rust_decimal_macros::dec!(0.55),
            false,
        );
        let order = client.place_limit(&req, PlaceOpts::default()).await.unwrap();
        assert_eq!(order.status, OrderLifecycle::Submitted);
    }
}
