pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

pub use crate::core::config;

use crate::core::accuracy::{ACCURACY_COLLECTION, AccuracyHistory};
use crate::core::backoff::NetworkBackoff;
use crate::core::backtest::ReportCache;
use crate::core::backtest::job::BACKTEST_COLLECTION;
use crate::core::cache::{KeyValueCollection, Store};
use crate::core::config::{AppConfig, QuoteSource};
use crate::core::intraday::{INTRADAY_COLLECTION, IntradayRecorder};
use crate::core::refresh::Refresher;
use crate::core::source::{HoldingsProvider, QuoteProvider};
use crate::providers::holdings_api::HOLDINGS_COLLECTION;
use crate::providers::{ConfiguredHoldings, EastmoneyProvider, HoldingsApiProvider, SinaQuoteProvider};
use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub enum AppCommand {
    Estimate,
    Watch,
    Intraday { code: String },
    Backtest { force: bool, dataset: Option<String> },
    Parse { file: String },
}

/// Long-lived services shared by the commands.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<KeyValueStore>,
    pub recorder: Arc<IntradayRecorder>,
    pub accuracy: Arc<AccuracyHistory>,
    pub reports: ReportCache,
    pub refresher: Refresher,
}

fn collection(store: &dyn Store, name: &str) -> Result<Arc<dyn KeyValueCollection>> {
    store
        .get_collection(name, true, true)
        .with_context(|| format!("Failed to open collection {name}"))
}

impl App {
    pub fn new(config: AppConfig, store: Arc<KeyValueStore>) -> Result<Self> {
        config.validate()?;

        let reports = ReportCache::new(
            collection(store.as_ref(), BACKTEST_COLLECTION)?,
            config.backtest.cache_ttl(),
        );
        let recorder = Arc::new(IntradayRecorder::new(collection(
            store.as_ref(),
            INTRADAY_COLLECTION,
        )?));
        let accuracy = Arc::new(
            AccuracyHistory::new(collection(store.as_ref(), ACCURACY_COLLECTION)?)
                .with_reports(reports.clone()),
        );

        let upstream: Option<Arc<dyn HoldingsProvider>> = match &config.providers.holdings {
            Some(api) => Some(Arc::new(HoldingsApiProvider::new(
                &api.base_url,
                collection(store.as_ref(), HOLDINGS_COLLECTION)?,
            )?)),
            None => None,
        };
        let holdings = Arc::new(ConfiguredHoldings::new(upstream, &config.funds));

        let quote_config = &config.providers.quotes;
        let quotes: Arc<dyn QuoteProvider> = match quote_config.source {
            QuoteSource::Sina => Arc::new(SinaQuoteProvider::new(&quote_config.base_url)?),
            QuoteSource::Custom => Arc::new(SinaQuoteProvider::with_template(
                quote_config.custom_url_template.as_deref().unwrap_or_default(),
            )?),
        };

        let mut refresher = Refresher::new(holdings, quotes, accuracy.clone())
            .with_recorder(Arc::clone(&recorder))
            .with_accuracy(Arc::clone(&accuracy))
            .with_mode(config.valuation_mode)
            .with_strategy(config.strategy)
            .with_backoff(NetworkBackoff::new(Duration::from_secs(config.backoff_sec)))
            .with_quote_timeout(config.quote_timeout());
        if let Some(official) = &config.providers.official {
            refresher = refresher.with_official(Arc::new(EastmoneyProvider::new(&official.base_url)?));
        }

        Ok(Self {
            config,
            store,
            recorder,
            accuracy,
            reports,
            refresher,
        })
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    // Parsing a holdings file needs neither config nor storage
    if let AppCommand::Parse { file } = &command {
        return cli::parse::run(file);
    }

    info!("navcast starting...");
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store = Arc::new(KeyValueStore::open(&config.default_data_path()?)?);
    let app = App::new(config, Arc::clone(&store))?;

    let result = match command {
        AppCommand::Estimate => cli::estimate::run(&app).await,
        AppCommand::Watch => cli::watch::run(&app).await,
        AppCommand::Intraday { code } => cli::intraday::run(&app, &code).await,
        AppCommand::Backtest { force, dataset } => {
            cli::backtest::run(&app, force, dataset.as_deref()).await
        }
        AppCommand::Parse { .. } => unreachable!("handled before loading config"),
    };
    store.flush()?;
    result
}
