use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use risk_state::{
    FeedError, FundingPoint, Instrument, MetricSample, MetricsFeed, OrderBookSnapshot,
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// Number of levels requested per side of the book.
const DEPTH_LIMIT: u32 = 20;

/// Binance USDⓈ-M futures REST adapter.
///
/// Each [`MetricsFeed::fetch_metrics`] call issues four requests concurrently (premium index,
/// open interest, 24h ticker, depth). A failed request leaves its metrics `None`; the call only
/// fails when every request fails.
#[derive(Debug, Clone)]
pub struct BinanceFuturesFeed {
    client: Client,
    base: Url,
    impact_notional: Decimal,
}

impl BinanceFuturesFeed {
    pub fn new(base: Url, impact_notional: Decimal) -> Self {
        Self {
            client: Client::new(),
            base,
            impact_notional,
        }
    }

    fn endpoint(
        &self,
        instrument: &Instrument,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Url, FeedError> {
        let mut url = self.base.join(path).map_err(|error| FeedError::Request {
            instrument: instrument.clone(),
            message: error.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("symbol", instrument.as_str())
            .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        Ok(url)
    }

    async fn get<T>(
        &self,
        instrument: &Instrument,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FeedError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(instrument, path, query)?;
        debug!(%instrument, %url, "polling Binance futures");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| FeedError::Request {
                instrument: instrument.clone(),
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                instrument: instrument.clone(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|error| FeedError::Decode {
            instrument: instrument.clone(),
            message: error.to_string(),
        })
    }
}

#[async_trait]
impl MetricsFeed for BinanceFuturesFeed {
    async fn fetch_metrics(&self, instrument: &Instrument) -> Result<MetricSample, FeedError> {
        let depth_params = [("limit", DEPTH_LIMIT.to_string())];
        let (premium, open_interest, ticker, depth) = tokio::join!(
            self.get::<PremiumIndex>(instrument, "/fapi/v1/premiumIndex", &[]),
            self.get::<OpenInterest>(instrument, "/fapi/v1/openInterest", &[]),
            self.get::<Ticker24h>(instrument, "/fapi/v1/ticker/24hr", &[]),
            self.get::<Depth>(
                instrument,
                "/fapi/v1/depth",
                &depth_params
            ),
        );

        let results = [
            premium.as_ref().err(),
            open_interest.as_ref().err(),
            ticker.as_ref().err(),
            depth.as_ref().err(),
        ];
        if let Some(first) = results.iter().flatten().next() {
            if results.iter().all(Option::is_some) {
                return Err((*first).clone());
            }
            for error in results.iter().flatten() {
                warn!(%instrument, %error, "partial Binance futures response");
            }
        }

        let premium = premium.ok();
        let mark_price = premium.as_ref().and_then(|premium| premium.mark_price);
        let depth = depth.ok();

        Ok(MetricSample {
            mark_price,
            funding_rate: premium.and_then(|premium| premium.last_funding_rate),
            open_interest: open_interest
                .ok()
                .and_then(|open_interest| open_interest.notional(mark_price?)),
            day_notional_volume: ticker.ok().and_then(|ticker| ticker.quote_volume),
            execution_cost: depth
                .as_ref()
                .and_then(|depth| depth.impact_cost(self.impact_notional)),
            book: depth.as_ref().and_then(Depth::snapshot),
            ..MetricSample::empty(instrument.clone(), Utc::now())
        })
    }

    async fn fetch_funding_history(
        &self,
        instrument: &Instrument,
        since: DateTime<Utc>,
    ) -> Result<Vec<FundingPoint>, FeedError> {
        let entries = self
            .get::<Vec<FundingRateEntry>>(
                instrument,
                "/fapi/v1/fundingRate",
                &[
                    ("startTime", since.timestamp_millis().to_string()),
                    ("limit", "1000".to_string()),
                ],
            )
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(FundingRateEntry::into_point)
            .collect())
    }
}

/// ```json
/// {"symbol":"BTCUSDT","markPrice":"11793.63104562","lastFundingRate":"0.00038246","time":1597370495002}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    mark_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    last_funding_rate: Option<f64>,
}

/// ```json
/// {"openInterest":"10659.509","symbol":"BTCUSDT","time":1589437530011}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterest {
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    open_interest: Option<f64>,
}

impl OpenInterest {
    /// Open interest is quoted in contracts; notional is contracts at the mark price.
    fn notional(&self, mark_price: f64) -> Option<f64> {
        self.open_interest.map(|contracts| contracts * mark_price)
    }
}

/// ```json
/// {"symbol":"BTCUSDT","volume":"8913.30000000","quoteVolume":"15.30000000"}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    quote_volume: Option<f64>,
}

/// ```json
/// {"lastUpdateId":1027024,"bids":[["4.00000000","431.00000000"]],"asks":[["4.00000200","12.00000000"]]}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
struct Depth {
    bids: Vec<DepthLevel>,
    asks: Vec<DepthLevel>,
}

#[derive(Clone, Copy, PartialEq, Debug, Deserialize)]
struct DepthLevel {
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    amount: Decimal,
}

impl DepthLevel {
    fn notional(&self) -> Decimal {
        self.price * self.amount
    }
}

impl Depth {
    fn snapshot(&self) -> Option<OrderBookSnapshot> {
        let best_bid = self.bids.first()?.price.to_f64()?;
        let best_ask = self.asks.first()?.price.to_f64()?;

        Some(OrderBookSnapshot {
            best_bid,
            best_ask,
            bid_depth: side_notional(&self.bids)?,
            ask_depth: side_notional(&self.asks)?,
        })
    }

    fn mid(&self) -> Option<Decimal> {
        let bid = self.bids.first()?.price;
        let ask = self.asks.first()?.price;
        (bid > Decimal::ZERO && ask >= bid).then(|| (bid + ask) / Decimal::TWO)
    }

    /// Round-trip impact of trading `notional` through both sides, as a percentage of mid.
    ///
    /// `None` when either side cannot absorb the notional.
    fn impact_cost(&self, notional: Decimal) -> Option<f64> {
        let mid = self.mid()?;
        let buy = average_fill(&self.asks, notional)?;
        let sell = average_fill(&self.bids, notional)?;

        let buy_impact = (buy - mid) / mid;
        let sell_impact = (mid - sell) / mid;
        ((buy_impact + sell_impact) / Decimal::TWO * Decimal::ONE_HUNDRED).to_f64()
    }
}

fn side_notional(levels: &[DepthLevel]) -> Option<f64> {
    levels
        .iter()
        .map(DepthLevel::notional)
        .sum::<Decimal>()
        .to_f64()
}

/// Volume-weighted price of filling `notional` by walking `levels` from the top.
fn average_fill(levels: &[DepthLevel], notional: Decimal) -> Option<Decimal> {
    if notional <= Decimal::ZERO {
        return None;
    }

    let mut remaining = notional;
    let mut quantity = Decimal::ZERO;
    for level in levels.iter().filter(|level| level.price > Decimal::ZERO) {
        let take = remaining.min(level.notional());
        quantity += take / level.price;
        remaining -= take;
        if remaining.is_zero() {
            return Some(notional / quantity);
        }
    }

    None
}

/// ```json
/// {"symbol":"BTCUSDT","fundingRate":"-0.03750000","fundingTime":1570608000000}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRateEntry {
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    funding_rate: Option<f64>,
    funding_time: i64,
}

impl FundingRateEntry {
    fn into_point(self) -> Option<FundingPoint> {
        Some(FundingPoint {
            time: DateTime::from_timestamp_millis(self.funding_time)?,
            rate: self.funding_rate.filter(|rate| rate.is_finite())?,
        })
    }
}

/// Deserialize an optional string as an optional f64.
fn de_opt_str_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    match value {
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
