use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use risk_state::{
    EngineConfig, Instrument, JsonFileStore, MemoryStore, RiskMap, RiskPerInstrument,
    RiskService, StateStore,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, watch},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::feed::{BinanceFuturesFeed, DEFAULT_BASE_URL};

/// Binance USDⓈ-M futures REST feed.
mod feed;

const DEFAULT_INSTRUMENTS: &str = "BTCUSDT,ETHUSDT,SOLUSDT";
const DEFAULT_WS_ADDR: &str = "0.0.0.0:9002";
const DEFAULT_IMPACT_NOTIONAL: &str = "100000";

/// Published maps are small and infrequent; a short buffer is plenty.
const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Error)]
enum ServerError {
    #[error(transparent)]
    Config(#[from] risk_state::ConfigError),

    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },

    #[error("failed to bind WebSocket server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Frames pushed to WebSocket clients, tagged by `type`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Welcome {
        timestamp: DateTime<Utc>,
        instruments: Vec<&'a Instrument>,
    },
    RiskState {
        timestamp: DateTime<Utc>,
        states: Vec<&'a RiskPerInstrument>,
    },
}

impl<'a> ServerMessage<'a> {
    fn welcome(map: &'a RiskMap) -> Self {
        Self::Welcome {
            timestamp: Utc::now(),
            instruments: map.keys().collect(),
        }
    }

    fn risk_state(map: &'a RiskMap) -> Self {
        Self::RiskState {
            timestamp: Utc::now(),
            states: map.values().collect(),
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(error) = run().await {
        error!(%error, "risk-state server exited");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    let config = EngineConfig::from_env()?;

    let instruments = parse_instruments(&env_or("RISK_INSTRUMENTS", DEFAULT_INSTRUMENTS));
    if instruments.is_empty() {
        return Err(ServerError::Env {
            key: "RISK_INSTRUMENTS",
            value: env_or("RISK_INSTRUMENTS", ""),
        });
    }

    let addr = parse_env::<SocketAddr>("RISK_WS_ADDR", DEFAULT_WS_ADDR)?;
    let base = parse_env::<Url>("RISK_FEED_URL", DEFAULT_BASE_URL)?;
    let impact_notional = parse_env::<Decimal>("RISK_IMPACT_NOTIONAL", DEFAULT_IMPACT_NOTIONAL)?;

    let store: Arc<dyn StateStore> = match std::env::var("RISK_STATE_DIR") {
        Ok(dir) => {
            info!(%dir, "persisting engine state to JSON files");
            Arc::new(JsonFileStore::new(dir))
        }
        Err(_) => {
            info!("RISK_STATE_DIR not set, engine state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    info!(
        instruments = %instruments.iter().map(Instrument::as_str).collect::<Vec<_>>().join(","),
        %base,
        %impact_notional,
        "Starting risk-state server"
    );

    let feed = BinanceFuturesFeed::new(base, impact_notional);
    let handle = RiskService::new(config, instruments, feed, store)
        .start()
        .await?;

    // Fan published maps out to every connected client
    let (tx, _rx) = broadcast::channel::<Arc<RiskMap>>(BROADCAST_CAPACITY);
    let tx = Arc::new(tx);
    let forwarder = {
        let tx = Arc::clone(&tx);
        handle.on_update(move |map| {
            if tx.send(map).is_err() {
                debug!("No WebSocket clients connected");
            }
        })
    };

    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket server bound to {}", addr);

    tokio::select! {
        _ = serve(listener, tx, handle.subscribe()) => {
            warn!("WebSocket listener stopped accepting connections");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                error!(%error, "failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
    }

    forwarder.unsubscribe();
    handle.stop().await;
    Ok(())
}

/// Accept WebSocket connections until the listener fails.
async fn serve(
    listener: TcpListener,
    tx: Arc<broadcast::Sender<Arc<RiskMap>>>,
    latest: watch::Receiver<Arc<RiskMap>>,
) {
    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        tokio::spawn(handle_client(
            stream,
            peer_addr,
            tx.subscribe(),
            latest.borrow().clone(),
        ));
    }
}

/// Serve one client: greet it, replay the current map, then stream every published map until
/// either side goes away.
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    mut updates: broadcast::Receiver<Arc<RiskMap>>,
    current: Arc<RiskMap>,
) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(error) => {
            warn!(%peer_addr, %error, "WebSocket handshake rejected");
            return;
        }
    };
    debug!(%peer_addr, "WebSocket client ready");

    let (mut sink, mut incoming) = socket.split();

    let mut greeting = vec![ServerMessage::welcome(&current)];
    if !current.is_empty() {
        greeting.push(ServerMessage::risk_state(&current));
    }
    for message in greeting {
        if !send_json(&mut sink, &message).await {
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(map) => {
                    if !send_json(&mut sink, &ServerMessage::risk_state(&map)).await {
                        break;
                    }
                }
                // Every map is complete, so missing a few costs nothing.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%peer_addr, skipped, "client fell behind published maps");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = incoming.next() => match frame {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(frame)) => debug!(%peer_addr, ?frame, "ignoring client frame"),
                Some(Err(error)) => {
                    warn!(%peer_addr, %error, "WebSocket read failed");
                    break;
                }
            },
        }
    }

    info!(%peer_addr, "WebSocket client disconnected");
}

/// Serialise `message` and push it as a text frame. Returns `false` once the client is gone.
async fn send_json<S>(sink: &mut S, message: &ServerMessage<'_>) -> bool
where
    S: futures::Sink<Message> + Unpin,
{
    match serde_json::to_string(message) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(error) => {
            error!(%error, "failed to serialise server message");
            true
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &'static str, default: &str) -> Result<T, ServerError> {
    let value = env_or(key, default);
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ServerError::Env { key, value })
}

/// Comma separated symbols, upper-cased, duplicates and blanks dropped.
fn parse_instruments(raw: &str) -> Vec<Instrument> {
    let mut instruments = Vec::<Instrument>::new();
    for symbol in raw.split(',').map(str::trim).filter(|symbol| !symbol.is_empty()) {
        let instrument = Instrument::new(symbol.to_uppercase());
        if !instruments.contains(&instrument) {
            instruments.push(instrument);
        }
    }
    instruments
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_state::{DebugTrace, MetricSample, RiskState};

    #[test]
    fn test_parse_instruments() {
        struct TestCase {
            input: &'static str,
            expected: Vec<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: default list
                input: DEFAULT_INSTRUMENTS,
                expected: vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"],
            },
            TestCase {
                // TC1: whitespace, casing and duplicates
                input: " btcusdt, ETHUSDT ,BTCUSDT",
                expected: vec!["BTCUSDT", "ETHUSDT"],
            },
            TestCase {
                // TC2: blanks only
                input: " , ,",
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_instruments(test.input)
                .iter()
                .map(|instrument| instrument.as_str().to_string())
                .collect::<Vec<_>>();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_server_message_preserves_order() {
        let mut map = RiskMap::default();
        for symbol in ["ETHUSDT", "BTCUSDT"] {
            let instrument = Instrument::new(symbol);
            map.insert(
                instrument.clone(),
                RiskPerInstrument {
                    instrument: instrument.clone(),
                    state: RiskState::Unsupported,
                    message: "feed stale".to_string(),
                    metrics: MetricSample::empty(instrument, Utc::now()),
                    trace: DebugTrace::new(Utc::now()),
                },
            );
        }

        let value = serde_json::to_value(ServerMessage::welcome(&map)).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["instruments"], serde_json::json!(["ETHUSDT", "BTCUSDT"]));

        let value = serde_json::to_value(ServerMessage::risk_state(&map)).unwrap();
        assert_eq!(value["type"], "risk_state");
        assert_eq!(value["states"][0]["instrument"], "ETHUSDT");
        assert_eq!(value["states"][1]["instrument"], "BTCUSDT");
        assert_eq!(value["states"][0]["state"], "UNSUPPORTED");
    }
}
