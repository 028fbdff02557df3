//! Core valuation logic and the abstractions it depends on

pub mod accuracy;
pub mod backoff;
pub mod backtest;
pub mod cache;
pub mod config;
pub mod error;
pub mod estimator;
pub mod freshness;
pub mod holdings;
pub mod intraday;
pub mod log;
pub mod quote;
pub mod refresh;
pub mod selector;
pub mod session;
pub mod source;

// Re-export main types for cleaner imports
pub use error::{EstimateError, RefreshError};
pub use estimator::{FundEstimate, StrategyVersion, ValuationSource};
pub use holdings::{FundHoldingsSnapshot, FundType, Holding};
pub use quote::{OfficialEstimate, Quote, QuoteMap};
pub use selector::ValuationMode;
pub use source::{
    BacktestDataSource, BestSourceStore, HoldingsProvider, OfficialEstimateProvider,
    QuoteProvider,
};
