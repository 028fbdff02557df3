//! Historical replay of estimation strategies.
//!
//! A candidate strategy is scored against the frozen baseline over a rolling
//! window of trading days, using only data that was public at each day's
//! close.

pub mod job;
pub mod metrics;
pub mod replay;

pub use job::{
    BacktestHandle, BacktestProgress, BacktestReport, BacktestResult, BacktestStatus, Evaluator,
    FundUnderTest, ReportCache,
};
pub use metrics::Metrics;
pub use replay::{FundHistory, predict_day};
