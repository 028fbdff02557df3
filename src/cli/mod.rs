pub mod backtest;
pub mod estimate;
pub mod intraday;
pub mod parse;
pub mod setup;
pub mod ui;
pub mod watch;
