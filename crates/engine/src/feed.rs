use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{Candle, CandleState, Error, Result};

/// Replays a JSON-lines file of Binance kline events as candles.
///
/// Every kline line is sent on a bounded channel, in-progress ones included;
/// consumers decide what to do with unfinished bars. A full channel makes
/// the replay wait, so no candle is ever dropped.
pub struct ReplayFeed {
    path: PathBuf,
    candle_tx: mpsc::Sender<Candle>,
}

impl ReplayFeed {
    pub fn new(path: impl Into<PathBuf>, candle_tx: mpsc::Sender<Candle>) -> Self {
        Self {
            path: path.into(),
            candle_tx,
        }
    }

    /// Read the whole file and publish its candles in order. Returns the
    /// number of candles published. Call this inside a `tokio::spawn`.
    pub async fn run(self) -> Result<usize> {
        let file = File::open(&self.path).await?;
        info!(path = %self.path.display(), "Replaying candle file");

        let mut lines = BufReader::new(file).lines();
        let mut published = 0usize;
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match parse_kline_event(&line) {
                Ok(Some(candle)) => {
                    if self.candle_tx.send(candle).await.is_err() {
                        warn!(line = line_no, "Candle receiver dropped, stopping replay");
                        break;
                    }
                    published += 1;
                }
                Ok(None) => debug!(line = line_no, "Skipping non-kline line"),
                Err(e) => warn!(line = line_no, error = %e, "Failed to parse kline event"),
            }
        }

        info!(path = %self.path.display(), candles = published, "Replay finished");
        Ok(published)
    }
}

// ─── Binance kline JSON parsing ──────────────────────────────────────────────

#[derive(Deserialize)]
struct KlineWrapper {
    #[serde(rename = "s")]
    symbol: String,
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "T")]
    close_time_ms: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Parse one kline event. `Ok(None)` for well-formed JSON that is not a kline.
pub fn parse_kline_event(text: &str) -> Result<Option<Candle>> {
    let wrapper: serde_json::Value = serde_json::from_str(text)?;
    if wrapper.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }

    let kline: KlineWrapper = serde_json::from_value(wrapper)?;
    let k = kline.k;

    let candle = Candle {
        pair: kline.symbol,
        open_time: millis(k.open_time_ms)?,
        close_time: millis(k.close_time_ms)?,
        open: price("o", &k.open)?,
        high: price("h", &k.high)?,
        low: price("l", &k.low)?,
        close: price("c", &k.close)?,
        volume: price("v", &k.volume)?,
        state: if k.is_closed {
            CandleState::Finished
        } else {
            CandleState::InProgress
        },
    };
    if candle.low > candle.high {
        return Err(Error::Other(format!(
            "kline low {} above high {}",
            candle.low, candle.high
        )));
    }
    Ok(Some(candle))
}

fn millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Other(format!("kline timestamp out of range: {ms}")))
}

fn price(field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::Other(format!("kline field '{field}' is not a number: '{raw}'")))
}
