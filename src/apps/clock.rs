//! Digital clock app.

use super::{
    setting_bool, setting_str, AppError, ConfigField, ConfigSchema, DisplayApp, ValidationError,
};
use crate::config::AppSettings;
use crate::display::frame::{Canvas, Frame, Rgb, GLYPH_HEIGHT};
use chrono::{Local, Timelike};
use std::time::Duration;

/// Digital clock with optional seconds and date line
pub struct ClockApp {
    settings: AppSettings,
    format_24h: bool,
    show_seconds: bool,
    show_date: bool,
    color: Rgb,
}

impl ClockApp {
    pub fn new(settings: AppSettings) -> Self {
        let mut app = Self {
            settings: AppSettings::new(),
            format_24h: true,
            show_seconds: false,
            show_date: true,
            color: Rgb::WHITE,
        };
        // Startup settings may predate a schema change; fall back to defaults
        if app.apply_config(settings).is_err() {
            tracing::warn!("Stored clock settings invalid, using defaults");
        }
        app
    }
}

impl DisplayApp for ClockApp {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn display_name(&self) -> &'static str {
        "Clock"
    }

    fn description(&self) -> &'static str {
        "Digital clock with date"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField::bool("format_24h", "24-hour format", true),
            ConfigField::bool("show_seconds", "Show seconds", false),
            ConfigField::bool("show_date", "Show date", true),
            ConfigField::color("color", "Text color", "#FFFFFF"),
        ])
    }

    fn current_config(&self) -> AppSettings {
        self.settings.clone()
    }

    fn render(&mut self, mut canvas: Canvas, _elapsed: Duration) -> Result<Option<Frame>, AppError> {
        let now = Local::now();

        let hour = if self.format_24h {
            now.hour()
        } else {
            now.hour12().1
        };

        let time = if self.show_seconds {
            format!("{:02}:{:02}:{:02}", hour, now.minute(), now.second())
        } else {
            format!("{:02}:{:02}", hour, now.minute())
        };

        let mid = canvas.height() as i32 / 2;
        if self.show_date {
            let date = now.format("%d.%m").to_string();
            canvas.draw_text_centered(mid - GLYPH_HEIGHT as i32 - 1, &time, self.color);
            canvas.draw_text_centered(mid + 2, &date, self.color.scaled(60));
        } else {
            canvas.draw_text_centered(mid - GLYPH_HEIGHT as i32 / 2, &time, self.color);
        }

        Ok(Some(canvas.into_frame()))
    }

    fn apply_config(&mut self, settings: AppSettings) -> Result<(), ValidationError> {
        self.config_schema().validate(&settings)?;
        self.format_24h = setting_bool(&settings, "format_24h", true);
        self.show_seconds = setting_bool(&settings, "show_seconds", false);
        self.show_date = setting_bool(&settings, "show_date", true);
        self.color = Rgb::from_hex(&setting_str(&settings, "color", "#FFFFFF"))
            .unwrap_or(Rgb::WHITE);
        self.settings = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_frame() {
        let mut app = ClockApp::new(AppSettings::new());
        let frame = app
            .render(Canvas::new(64, 64), Duration::ZERO)
            .unwrap()
            .unwrap();
        assert!(frame.pixels().iter().any(|p| *p != Rgb::BLACK));
    }

    #[test]
    fn rejects_bad_color_and_keeps_previous() {
        let mut app = ClockApp::new(AppSettings::new());
        let mut bad = AppSettings::new();
        bad.insert("color".to_string(), "blue".into());
        assert!(app.apply_config(bad).is_err());
        assert_eq!(app.color, Rgb::WHITE);
    }
}
