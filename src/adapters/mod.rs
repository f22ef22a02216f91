pub mod kalshi_rest;
pub mod onchain_indexer;
pub mod polymarket_clob;
pub mod polymarket_ws;

pub use kalshi_rest::KalshiClient;
pub use onchain_indexer::ChainFillWatcher;
pub use polymarket_clob::PolymarketClient;
pub use polymarket_ws::PolymarketWebSocket;
