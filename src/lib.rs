pub mod adapters;
pub mod cache;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod exposure;
pub mod matcher;
pub mod notify;
pub mod runtime;
pub mod scanner;
pub mod services;
pub mod signing;
pub mod store;
pub mod supervisor;
pub mod validation;

pub use config::AppConfig;
pub use coordination::{
    GracefulShutdown, ShutdownConfig, ShutdownPhase, ShutdownSignal, ShutdownToken,
};
pub use error::{EngineError, Result};
pub use runtime::{bootstrap, run, Engine};
pub use signing::Wallet;
pub use supervisor::{Alert, AlertLevel, AlertManager, AlertManagerConfig};
