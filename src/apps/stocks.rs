//! Stock ticker app.
//!
//! Cycles through the configured symbols; quotes are pushed in by an
//! external fetcher.

use super::{
    setting_i64, setting_str, AppError, ConfigField, ConfigSchema, DisplayApp, ValidationError,
};
use crate::config::AppSettings;
use crate::display::frame::{Canvas, Frame, Rgb, GLYPH_HEIGHT};
use std::collections::HashMap;
use std::time::Duration;

/// Last-known quote for one symbol
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub price: f64,
    pub change_percent: f64,
}

pub struct StocksApp {
    settings: AppSettings,
    tickers: Vec<String>,
    cycle_secs: i64,
    quotes: HashMap<String, Quote>,
}

impl StocksApp {
    pub fn new(settings: AppSettings) -> Self {
        let mut app = Self {
            settings: AppSettings::new(),
            tickers: vec!["AAPL".to_string(), "GOOGL".to_string()],
            cycle_secs: 10,
            quotes: HashMap::new(),
        };
        if app.apply_config(settings).is_err() {
            tracing::warn!("Stored stocks settings invalid, using defaults");
        }
        app
    }

    /// Push a fresh quote from the external fetcher
    pub fn set_quote(&mut self, symbol: &str, quote: Quote) {
        self.quotes.insert(symbol.to_uppercase(), quote);
    }

    fn current_ticker(&self, elapsed: Duration) -> Option<&str> {
        if self.tickers.is_empty() {
            return None;
        }
        let idx = (elapsed.as_secs() / self.cycle_secs.max(1) as u64) as usize % self.tickers.len();
        Some(&self.tickers[idx])
    }
}

impl DisplayApp for StocksApp {
    fn name(&self) -> &'static str {
        "stocks"
    }

    fn display_name(&self) -> &'static str {
        "Stocks"
    }

    fn description(&self) -> &'static str {
        "Rotating stock quotes"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField::string("tickers", "Tickers (comma-separated)", "AAPL,GOOGL").required(),
            ConfigField::int("cycle_secs", "Seconds per ticker", 10, 3, 300),
        ])
    }

    fn current_config(&self) -> AppSettings {
        self.settings.clone()
    }

    fn render(&mut self, mut canvas: Canvas, elapsed: Duration) -> Result<Option<Frame>, AppError> {
        let Some(ticker) = self.current_ticker(elapsed) else {
            return Ok(None);
        };
        let ticker = ticker.to_string();

        let mid = canvas.height() as i32 / 2;
        canvas.draw_text_centered(mid - GLYPH_HEIGHT as i32 - 1, &ticker, Rgb::WHITE);

        match self.quotes.get(&ticker) {
            Some(quote) => {
                let up = quote.change_percent >= 0.0;
                let color = if up {
                    Rgb::new(0, 200, 0)
                } else {
                    Rgb::new(220, 0, 0)
                };
                let line = format!(
                    "{:.2} {}{:.1}%",
                    quote.price,
                    if up { "+" } else { "-" },
                    quote.change_percent.abs()
                );
                canvas.draw_text_centered(mid + 2, &line, color);
            }
            None => canvas.draw_text_centered(mid + 2, "--", Rgb::new(128, 128, 128)),
        }

        Ok(Some(canvas.into_frame()))
    }

    fn apply_config(&mut self, settings: AppSettings) -> Result<(), ValidationError> {
        self.config_schema().validate(&settings)?;

        let tickers: Vec<String> = setting_str(&settings, "tickers", "AAPL,GOOGL")
            .split(',')
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        if tickers.is_empty() {
            return Err(ValidationError::new("tickers", "no valid symbols"));
        }

        self.tickers = tickers;
        self.cycle_secs = setting_i64(&settings, "cycle_secs", 10);
        self.settings = settings;
        Ok(())
    }
}
