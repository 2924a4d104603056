use crate::{Error, Result};

/// Process configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-lines file of kline events to replay.
    pub candles_path: String,

    // Strategy config file path
    pub strategy_config_path: String,

    // Paper executor
    pub paper_slippage_bps: f64,
    pub paper_initial_balance: f64,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` if present.
    /// A missing required variable or an unparsable number is a startup error.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let paper_slippage_bps = parse_optional("PAPER_SLIPPAGE_BPS", 10.0)?;
        if !(0.0..10_000.0).contains(&paper_slippage_bps) {
            return Err(Error::Config(format!(
                "PAPER_SLIPPAGE_BPS must be within [0, 10000), got {paper_slippage_bps}"
            )));
        }

        Ok(Config {
            candles_path: required_env("CANDLES_PATH")?,
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            paper_slippage_bps,
            paper_initial_balance: parse_optional("PAPER_INITIAL_BALANCE", 10_000.0)?,
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_optional(key: &str, default: f64) -> Result<f64> {
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} is not a number: '{raw}'"))),
        None => Ok(default),
    }
}
