use crate::trace::DebugTrace;
use chrono::{DateTime, Utc};
use derive_more::Display;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Published risk records keyed by [`Instrument`], in tracked-instrument order.
pub type RiskMap = IndexMap<Instrument, RiskPerInstrument>;

/// Exchange symbol of a traded instrument (eg/ "BTCUSDT"), normalised to upper case.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Instrument(SmolStr);

impl Instrument {
    pub fn new<S: AsRef<str>>(symbol: S) -> Self {
        Self(SmolStr::new(symbol.as_ref().trim().to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Instrument {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

impl From<String> for Instrument {
    fn from(symbol: String) -> Self {
        Self::new(symbol)
    }
}

/// Top of book and aggregated depth snapshot.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct OrderBookSnapshot {
    pub best_bid: f64,
    pub best_ask: f64,
    /// Quote notional resting on the bid side of the snapshot.
    pub bid_depth: f64,
    /// Quote notional resting on the ask side of the snapshot.
    pub ask_depth: f64,
}

impl OrderBookSnapshot {
    pub fn mid_price(&self) -> Option<f64> {
        if self.is_valid() {
            Some((self.best_bid + self.best_ask) / 2.0)
        } else {
            None
        }
    }

    /// Spread as a percentage of the mid price.
    pub fn spread_pct(&self) -> Option<f64> {
        let mid = self.mid_price()?;
        Some((self.best_ask - self.best_bid) / mid * 100.0)
    }

    /// Combined quote notional of both sides.
    pub fn depth(&self) -> Option<f64> {
        let depth = self.bid_depth + self.ask_depth;
        (depth.is_finite() && depth > 0.0).then_some(depth)
    }

    fn is_valid(&self) -> bool {
        self.best_bid.is_finite()
            && self.best_ask.is_finite()
            && self.best_bid > 0.0
            && self.best_ask >= self.best_bid
    }
}

/// One observation of an instrument's market microstructure metrics.
///
/// Every metric is optional: a missing or malformed value is `None` and propagates through the
/// evaluators as "cannot evaluate", never as zero.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct MetricSample {
    pub instrument: Instrument,
    pub time: DateTime<Utc>,
    pub mark_price: Option<f64>,
    pub funding_rate: Option<f64>,
    /// Open interest in quote notional.
    pub open_interest: Option<f64>,
    /// Rolling 24h traded quote notional.
    pub day_notional_volume: Option<f64>,
    /// Execution / impact cost as a percentage of mid.
    pub execution_cost: Option<f64>,
    pub book: Option<OrderBookSnapshot>,
}

impl MetricSample {
    /// Sample with every metric absent.
    pub fn empty(instrument: Instrument, time: DateTime<Utc>) -> Self {
        Self {
            instrument,
            time,
            mark_price: None,
            funding_rate: None,
            open_interest: None,
            day_notional_volume: None,
            execution_cost: None,
            book: None,
        }
    }

    /// Drop non-finite values and values that cannot be negative (or zero, for prices).
    pub fn sanitised(self) -> Self {
        fn finite(value: Option<f64>) -> Option<f64> {
            value.filter(|v| v.is_finite())
        }
        fn non_negative(value: Option<f64>) -> Option<f64> {
            finite(value).filter(|v| *v >= 0.0)
        }

        Self {
            mark_price: finite(self.mark_price).filter(|price| *price > 0.0),
            funding_rate: finite(self.funding_rate),
            open_interest: non_negative(self.open_interest),
            day_notional_volume: non_negative(self.day_notional_volume),
            execution_cost: non_negative(self.execution_cost),
            book: self.book.filter(OrderBookSnapshot::is_valid),
            ..self
        }
    }
}

/// Discrete risk signal published per instrument.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskState {
    #[display("UNSUPPORTED")]
    Unsupported,
    #[display("GREEN")]
    Green,
    #[display("ORANGE")]
    Orange,
    #[display("RED")]
    Red,
}

impl RiskState {
    /// Severity rank used by the hysteresis controller.
    pub fn rank(&self) -> u8 {
        match self {
            RiskState::Unsupported => 0,
            RiskState::Green => 1,
            RiskState::Orange => 2,
            RiskState::Red => 3,
        }
    }
}

/// Side of one-sided positioning implied by crowding.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[display("LONG")]
    Long,
    #[display("SHORT")]
    Short,
}

/// Short-horizon price-return classification, conditioned on crowding [`Direction`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Structure {
    #[display("INTACT")]
    Intact,
    #[display("WEAKENING")]
    Weakening,
    #[display("BROKEN")]
    Broken,
}

/// Published risk record for one instrument, superseded wholesale on the next tick.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct RiskPerInstrument {
    pub instrument: Instrument,
    pub state: RiskState,
    pub message: String,
    pub metrics: MetricSample,
    pub trace: DebugTrace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_normalised() {
        assert_eq!(Instrument::new(" btcusdt "), Instrument::from("BTCUSDT"));
        assert_eq!(Instrument::new("ethusdt").to_string(), "ETHUSDT");
    }

    #[test]
    fn test_risk_state_rank_ordering() {
        assert!(RiskState::Red.rank() > RiskState::Orange.rank());
        assert!(RiskState::Orange.rank() > RiskState::Green.rank());
        assert!(RiskState::Green.rank() > RiskState::Unsupported.rank());
        assert_eq!(RiskState::Orange.to_string(), "ORANGE");
        assert_eq!(
            serde_json::to_string(&RiskState::Unsupported).unwrap(),
            r#""UNSUPPORTED""#
        );
    }

    #[test]
    fn test_order_book_snapshot_calculations() {
        let book = OrderBookSnapshot {
            best_bid: 100.0,
            best_ask: 100.5,
            bid_depth: 250_000.0,
            ask_depth: 150_000.0,
        };

        assert_eq!(book.mid_price(), Some(100.25));
        assert!((book.spread_pct().unwrap() - 0.4987).abs() < 0.001);
        assert_eq!(book.depth(), Some(400_000.0));

        let crossed = OrderBookSnapshot {
            best_bid: 101.0,
            ..book
        };
        assert_eq!(crossed.spread_pct(), None);
    }

    #[test]
    fn test_metric_sample_sanitised() {
        struct TestCase {
            input: MetricSample,
            expected: MetricSample,
        }

        let time = DateTime::<Utc>::MIN_UTC;
        let base = MetricSample::empty(Instrument::new("BTCUSDT"), time);

        let tests = vec![
            // TC0: non-finite values are dropped
            TestCase {
                input: MetricSample {
                    mark_price: Some(f64::NAN),
                    funding_rate: Some(f64::INFINITY),
                    open_interest: Some(5.0),
                    ..base.clone()
                },
                expected: MetricSample {
                    open_interest: Some(5.0),
                    ..base.clone()
                },
            },
            // TC1: negative funding survives, negative volume and zero price do not
            TestCase {
                input: MetricSample {
                    mark_price: Some(0.0),
                    funding_rate: Some(-0.0001),
                    day_notional_volume: Some(-1.0),
                    ..base.clone()
                },
                expected: MetricSample {
                    funding_rate: Some(-0.0001),
                    ..base.clone()
                },
            },
            // TC2: crossed book is dropped
            TestCase {
                input: MetricSample {
                    book: Some(OrderBookSnapshot {
                        best_bid: 10.0,
                        best_ask: 9.0,
                        bid_depth: 1.0,
                        ask_depth: 1.0,
                    }),
                    ..base.clone()
                },
                expected: base.clone(),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.sanitised();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
