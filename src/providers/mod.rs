pub mod configured;
pub mod dataset;
pub mod eastmoney;
pub mod holdings_api;
pub mod sina;
pub mod util;

pub use configured::ConfiguredHoldings;
pub use dataset::JsonDataset;
pub use eastmoney::EastmoneyProvider;
pub use holdings_api::HoldingsApiProvider;
pub use sina::SinaQuoteProvider;
