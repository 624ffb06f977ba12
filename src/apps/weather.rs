//! Weather app.
//!
//! Renders the configured city and the last observation pushed by an
//! external fetcher. Until data arrives it shows a placeholder.

use super::{setting_str, AppError, ConfigField, ConfigSchema, DisplayApp, ValidationError};
use crate::config::AppSettings;
use crate::display::frame::{Canvas, Frame, Rgb, GLYPH_HEIGHT};
use std::time::Duration;

/// Last-known weather observation
#[derive(Debug, Clone)]
pub struct Observation {
    pub temperature: f32,
    pub condition: String,
}

pub struct WeatherApp {
    settings: AppSettings,
    city: String,
    units: String,
    observation: Option<Observation>,
}

impl WeatherApp {
    pub fn new(settings: AppSettings) -> Self {
        let mut app = Self {
            settings: AppSettings::new(),
            city: "Berlin".to_string(),
            units: "metric".to_string(),
            observation: None,
        };
        if app.apply_config(settings).is_err() {
            tracing::warn!("Stored weather settings invalid, using defaults");
        }
        app
    }

    /// Push a fresh observation from the external fetcher
    pub fn set_observation(&mut self, observation: Observation) {
        self.observation = Some(observation);
    }
}

impl DisplayApp for WeatherApp {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn display_name(&self) -> &'static str {
        "Weather"
    }

    fn description(&self) -> &'static str {
        "Current conditions for a city"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField::string("city", "City", "Berlin").required(),
            ConfigField::select("units", "Units", "metric", &["metric", "imperial"]),
        ])
    }

    fn current_config(&self) -> AppSettings {
        self.settings.clone()
    }

    fn render(&mut self, mut canvas: Canvas, _elapsed: Duration) -> Result<Option<Frame>, AppError> {
        let mid = canvas.height() as i32 / 2;
        canvas.draw_text_centered(mid - GLYPH_HEIGHT as i32 - 1, &self.city, Rgb::WHITE);

        let line = match &self.observation {
            Some(obs) => {
                let unit = if self.units == "imperial" { "F" } else { "C" };
                format!("{:.0}{unit} {}", obs.temperature, obs.condition)
            }
            None => "--".to_string(),
        };
        canvas.draw_text_centered(mid + 2, &line, Rgb::new(0x00, 0xD4, 0xFF));

        Ok(Some(canvas.into_frame()))
    }

    fn apply_config(&mut self, settings: AppSettings) -> Result<(), ValidationError> {
        self.config_schema().validate(&settings)?;
        self.city = setting_str(&settings, "city", "Berlin");
        self.units = setting_str(&settings, "units", "metric");
        self.settings = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholder_without_data() {
        let mut app = WeatherApp::new(AppSettings::new());
        let frame = app
            .render(Canvas::new(64, 32), Duration::ZERO)
            .unwrap()
            .unwrap();
        assert!(frame.pixels().iter().any(|p| *p != Rgb::BLACK));
    }

    #[test]
    fn observation_changes_output() {
        let mut app = WeatherApp::new(AppSettings::new());
        let before = app
            .render(Canvas::new(64, 32), Duration::ZERO)
            .unwrap()
            .unwrap();
        app.set_observation(Observation {
            temperature: 21.0,
            condition: "CLEAR".to_string(),
        });
        let after = app
            .render(Canvas::new(64, 32), Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_ne!(before, after);
    }
}
