// Copyright (c) 2024 The Botho Foundation

//! USD price resolution.
//!
//! Static prices from configuration always win. Assets without one are taken
//! from the remote feed, if configured. The controller takes one
//! [`PriceSnapshot`] per cycle so every deposit in a cycle converts at the
//! same prices.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use revo_bridge_core::{
    Asset, BridgeError, BridgeResult, PriceSnapshot, PricingConfig, UsdPrice,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{retry::log_retry, rpc::RpcThrottle};

/// Prices keyed by asset. A provider may omit assets it does not know.
pub type PriceTable = BTreeMap<Asset, UsdPrice>;

/// A source of USD prices.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fetch every price this provider knows.
    async fn fetch_prices(&self) -> BridgeResult<PriceTable>;
}

/// Fixed prices from configuration or the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceProvider {
    prices: PriceTable,
}

impl StaticPriceProvider {
    pub fn new(prices: PriceTable) -> Self {
        Self { prices }
    }

    /// Collect the configured prices, rejecting any that are not positive.
    pub fn from_config(config: &PricingConfig) -> BridgeResult<Self> {
        let mut prices = PriceTable::new();
        for asset in Asset::ALL {
            if let Some(price) = config.static_price(asset) {
                price.ensure_positive(&format!("{} price", asset))?;
                prices.insert(asset, price);
            }
        }
        Ok(Self { prices })
    }

    pub fn get(&self, asset: Asset) -> Option<UsdPrice> {
        self.prices.get(&asset).copied()
    }
}

#[async_trait]
impl PriceProvider for StaticPriceProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_prices(&self) -> BridgeResult<PriceTable> {
        Ok(self.prices.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    cxs_price_usd: Option<UsdPrice>,
    #[serde(default)]
    nextep_price_usd: Option<UsdPrice>,
    #[serde(default)]
    revo_price_usd: Option<UsdPrice>,
}

/// Parse a feed body of the form
/// `{"cxs_price_usd": "0.01", "nextep_price_usd": 0.5, "revo_price_usd": ...}`.
///
/// Zero prices are dropped: converting at zero would mint nothing.
pub fn parse_feed(body: &str) -> BridgeResult<PriceTable> {
    let feed: FeedResponse = serde_json::from_str(body)
        .map_err(|e| BridgeError::PriceUnavailable(format!("Malformed price feed: {}", e)))?;

    Ok([
        (Asset::Cxs, feed.cxs_price_usd),
        (Asset::Nextep, feed.nextep_price_usd),
        (Asset::Revo, feed.revo_price_usd),
    ]
    .into_iter()
    .filter_map(|(asset, price)| price.filter(|p| !p.is_zero()).map(|p| (asset, p)))
    .collect())
}

/// Prices fetched over HTTP from a JSON feed.
pub struct RemotePriceProvider {
    client: reqwest::Client,
    url: String,
    throttle: Arc<RpcThrottle>,
    backoff: ExponentialBuilder,
}

impl RemotePriceProvider {
    pub fn new(
        url: &str,
        timeout: Duration,
        throttle: Arc<RpcThrottle>,
        backoff: ExponentialBuilder,
    ) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            throttle,
            backoff,
        })
    }

    async fn fetch_once(&self) -> BridgeResult<PriceTable> {
        self.throttle.wait().await;

        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| BridgeError::PriceUnavailable(format!("Price feed unreachable: {}", e)))?
            .error_for_status()
            .map_err(|e| BridgeError::PriceUnavailable(format!("Price feed error: {}", e)))?
            .text()
            .await
            .map_err(|e| BridgeError::PriceUnavailable(format!("Price feed unreadable: {}", e)))?;

        parse_feed(&body)
    }
}

#[async_trait]
impl PriceProvider for RemotePriceProvider {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch_prices(&self) -> BridgeResult<PriceTable> {
        (|| self.fetch_once())
            .retry(self.backoff)
            .when(BridgeError::is_retryable)
            .notify(log_retry("price feed"))
            .await
    }
}

/// Resolves prices with static overrides layered over an optional feed.
pub struct PriceOracle {
    overrides: StaticPriceProvider,
    feed: Option<Box<dyn PriceProvider>>,
}

impl PriceOracle {
    pub fn new(overrides: StaticPriceProvider, feed: Option<Box<dyn PriceProvider>>) -> Self {
        Self { overrides, feed }
    }

    /// Build from configuration. Only assets without a static price ever
    /// touch the feed.
    pub fn from_config(
        config: &PricingConfig,
        throttle: Arc<RpcThrottle>,
        backoff: ExponentialBuilder,
    ) -> BridgeResult<Self> {
        let overrides = StaticPriceProvider::from_config(config)?;
        let feed = match &config.feed_url {
            Some(url) => {
                let provider = RemotePriceProvider::new(
                    url,
                    Duration::from_secs(config.feed_timeout_secs),
                    throttle,
                    backoff,
                )?;
                Some(Box::new(provider) as Box<dyn PriceProvider>)
            }
            None => None,
        };

        Ok(Self::new(overrides, feed))
    }

    /// Current price of one asset.
    pub async fn price_of(&self, asset: Asset) -> BridgeResult<UsdPrice> {
        if let Some(price) = self.overrides.get(asset) {
            return Ok(price);
        }
        let fetched = self.fetch_feed(&[asset]).await?;
        fetched
            .get(&asset)
            .copied()
            .ok_or_else(|| BridgeError::PriceUnavailable(format!("No {} price in feed", asset)))
    }

    /// Resolve every asset at once, fetching the feed at most once.
    pub async fn snapshot(&self) -> BridgeResult<PriceSnapshot> {
        let missing: Vec<Asset> = Asset::ALL
            .into_iter()
            .filter(|asset| self.overrides.get(*asset).is_none())
            .collect();
        let fetched = if missing.is_empty() {
            PriceTable::new()
        } else {
            self.fetch_feed(&missing).await?
        };

        let resolve = |asset: Asset| -> BridgeResult<UsdPrice> {
            self.overrides
                .get(asset)
                .or_else(|| fetched.get(&asset).copied())
                .ok_or_else(|| {
                    BridgeError::PriceUnavailable(format!("No {} price available", asset))
                })
        };

        let snapshot = PriceSnapshot::new(
            resolve(Asset::Cxs)?,
            resolve(Asset::Nextep)?,
            resolve(Asset::Revo)?,
        );
        debug!(
            "Prices: CXS {} NEXTEP {} REVO {}",
            snapshot.cxs, snapshot.nextep, snapshot.revo
        );
        Ok(snapshot)
    }

    async fn fetch_feed(&self, wanted: &[Asset]) -> BridgeResult<PriceTable> {
        let Some(feed) = &self.feed else {
            return Err(BridgeError::PriceUnavailable(format!(
                "No price override for {:?} and no price feed configured",
                wanted
            )));
        };

        let prices = feed.fetch_prices().await.map_err(|e| match e {
            BridgeError::PriceUnavailable(_) => e,
            other => BridgeError::PriceUnavailable(other.to_string()),
        })?;
        info!("Fetched {} prices from {}", prices.len(), feed.name());
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn price(s: &str) -> UsdPrice {
        UsdPrice::parse(s).unwrap()
    }

    struct CountingFeed {
        prices: PriceTable,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PriceProvider for CountingFeed {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch_prices(&self) -> BridgeResult<PriceTable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.prices.clone())
        }
    }

    struct DownFeed;

    #[async_trait]
    impl PriceProvider for DownFeed {
        fn name(&self) -> &str {
            "down"
        }

        async fn fetch_prices(&self) -> BridgeResult<PriceTable> {
            Err(BridgeError::RpcUnavailable("connection refused".into()))
        }
    }

    fn pricing(revo: Option<&str>, cxs: Option<&str>, nextep: Option<&str>) -> PricingConfig {
        PricingConfig {
            revo_price: revo.map(price),
            cxs_price: cxs.map(price),
            nextep_price: nextep.map(price),
            ..PricingConfig::default()
        }
    }

    #[test]
    fn test_parse_feed_mixed_types() {
        let table =
            parse_feed(r#"{"cxs_price_usd": "0.0123", "nextep_price_usd": 0.5, "other": 1}"#)
                .unwrap();
        assert_eq!(table.get(&Asset::Cxs), Some(&price("0.0123")));
        assert_eq!(table.get(&Asset::Nextep), Some(&price("0.5")));
        assert!(!table.contains_key(&Asset::Revo));
    }

    #[test]
    fn test_parse_feed_drops_zero_and_rejects_garbage() {
        let table = parse_feed(r#"{"cxs_price_usd": "0", "nextep_price_usd": "1e-2"}"#).unwrap();
        assert!(!table.contains_key(&Asset::Cxs));
        assert_eq!(table.get(&Asset::Nextep), Some(&price("0.01")));

        assert!(matches!(
            parse_feed(r#"{"cxs_price_usd": "-1"}"#),
            Err(BridgeError::PriceUnavailable(_))
        ));
        assert!(matches!(
            parse_feed("<html>"),
            Err(BridgeError::PriceUnavailable(_))
        ));
    }

    #[test]
    fn test_static_rejects_non_positive() {
        let config = pricing(Some("0"), None, None);
        assert!(matches!(
            StaticPriceProvider::from_config(&config),
            Err(BridgeError::InvalidPrice(_))
        ));
    }

    #[tokio::test]
    async fn test_all_static_never_touches_feed() {
        let calls = Arc::new(AtomicU32::new(0));
        let feed = CountingFeed {
            prices: PriceTable::new(),
            calls: calls.clone(),
        };
        let oracle = PriceOracle::new(
            StaticPriceProvider::from_config(&pricing(Some("0.1"), Some("0.5"), Some("0.2")))
                .unwrap(),
            Some(Box::new(feed)),
        );

        let snapshot = oracle.snapshot().await.unwrap();
        assert_eq!(snapshot.revo, price("0.1"));
        assert_eq!(snapshot.cxs, price("0.5"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_override_takes_precedence_over_feed() {
        let calls = Arc::new(AtomicU32::new(0));
        let feed = CountingFeed {
            prices: [
                (Asset::Cxs, price("9")),
                (Asset::Nextep, price("0.25")),
                (Asset::Revo, price("9")),
            ]
            .into_iter()
            .collect(),
            calls: calls.clone(),
        };
        let oracle = PriceOracle::new(
            StaticPriceProvider::from_config(&pricing(Some("0.1"), Some("0.5"), None)).unwrap(),
            Some(Box::new(feed)),
        );

        let snapshot = oracle.snapshot().await.unwrap();
        assert_eq!(snapshot.cxs, price("0.5"));
        assert_eq!(snapshot.revo, price("0.1"));
        assert_eq!(snapshot.nextep, price("0.25"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(oracle.price_of(Asset::Cxs).await.unwrap(), price("0.5"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(oracle.price_of(Asset::Nextep).await.unwrap(), price("0.25"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_feed_failure_is_price_unavailable() {
        let oracle = PriceOracle::new(
            StaticPriceProvider::from_config(&pricing(Some("0.1"), None, Some("0.2"))).unwrap(),
            Some(Box::new(DownFeed)),
        );
        assert!(matches!(
            oracle.snapshot().await,
            Err(BridgeError::PriceUnavailable(_))
        ));
        assert!(matches!(
            oracle.price_of(Asset::Cxs).await,
            Err(BridgeError::PriceUnavailable(_))
        ));
        assert_eq!(oracle.price_of(Asset::Nextep).await.unwrap(), price("0.2"));
    }

    #[tokio::test]
    async fn test_missing_price_without_feed() {
        let oracle = PriceOracle::new(
            StaticPriceProvider::from_config(&pricing(Some("0.1"), Some("0.5"), None)).unwrap(),
            None,
        );
        assert!(matches!(
            oracle.snapshot().await,
            Err(BridgeError::PriceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_remote_feed() {
        let provider = RemotePriceProvider::new(
            "http://127.0.0.1:1/prices",
            Duration::from_secs(2),
            Arc::new(RpcThrottle::unlimited()),
            crate::retry::no_retry(),
        )
        .unwrap();
        assert!(matches!(
            provider.fetch_prices().await,
            Err(BridgeError::PriceUnavailable(_))
        ));
    }
}
