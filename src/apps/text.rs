//! Scrolling text ticker app.

use super::{
    setting_bool, setting_i64, setting_str, AppError, ConfigField, ConfigSchema, DisplayApp,
    ValidationError,
};
use crate::config::AppSettings;
use crate::display::frame::{text_width, Canvas, Frame, Rgb, GLYPH_HEIGHT};
use std::time::Duration;

/// Static or scrolling text message
pub struct TextApp {
    settings: AppSettings,
    message: String,
    scroll: bool,
    scroll_speed: i64,
    color: Rgb,
}

impl TextApp {
    pub fn new(settings: AppSettings) -> Self {
        let mut app = Self {
            settings: AppSettings::new(),
            message: "HELLO WORLD!".to_string(),
            scroll: true,
            scroll_speed: 30,
            color: Rgb::new(0x00, 0xD4, 0xFF),
        };
        if app.apply_config(settings).is_err() {
            tracing::warn!("Stored text settings invalid, using defaults");
        }
        app
    }
}

impl DisplayApp for TextApp {
    fn name(&self) -> &'static str {
        "text"
    }

    fn display_name(&self) -> &'static str {
        "Text"
    }

    fn description(&self) -> &'static str {
        "Static or scrolling message"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField::string("message", "Message", "HELLO WORLD!").required(),
            ConfigField::bool("scroll", "Scroll", true),
            ConfigField::int("scroll_speed", "Scroll speed (px/s)", 30, 1, 100),
            ConfigField::color("color", "Text color", "#00D4FF"),
        ])
    }

    fn current_config(&self) -> AppSettings {
        self.settings.clone()
    }

    fn render(&mut self, mut canvas: Canvas, elapsed: Duration) -> Result<Option<Frame>, AppError> {
        let y = (canvas.height() as i32 - GLYPH_HEIGHT as i32) / 2;
        let width = canvas.width() as i32;
        let message_width = text_width(&self.message) as i32;

        if self.scroll && message_width > width {
            // Scroll in from the right edge, wrap after the tail clears
            let span = (width + message_width) as i64;
            let offset = (elapsed.as_millis() as i64 * self.scroll_speed / 1000) % span;
            canvas.draw_text(width - offset as i32, y, &self.message, self.color);
        } else {
            canvas.draw_text_centered(y, &self.message, self.color);
        }

        Ok(Some(canvas.into_frame()))
    }

    fn apply_config(&mut self, settings: AppSettings) -> Result<(), ValidationError> {
        self.config_schema().validate(&settings)?;
        self.message = setting_str(&settings, "message", "HELLO WORLD!");
        self.scroll = setting_bool(&settings, "scroll", true);
        self.scroll_speed = setting_i64(&settings, "scroll_speed", 30);
        self.color = Rgb::from_hex(&setting_str(&settings, "color", "#00D4FF"))
            .unwrap_or(Rgb::new(0x00, 0xD4, 0xFF));
        self.settings = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_centered_and_static() {
        let mut app = TextApp::new(AppSettings::new());
        let mut s = AppSettings::new();
        s.insert("message".to_string(), "HI".into());
        app.apply_config(s).unwrap();

        let a = app
            .render(Canvas::new(64, 16), Duration::from_secs(0))
            .unwrap()
            .unwrap();
        let b = app
            .render(Canvas::new(64, 16), Duration::from_secs(3))
            .unwrap()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn long_message_scrolls() {
        let mut app = TextApp::new(AppSettings::new());
        let mut s = AppSettings::new();
        s.insert(
            "message".to_string(),
            "A MESSAGE WIDER THAN THE PANEL".into(),
        );
        app.apply_config(s).unwrap();

        let a = app
            .render(Canvas::new(32, 16), Duration::from_millis(0))
            .unwrap()
            .unwrap();
        let b = app
            .render(Canvas::new(32, 16), Duration::from_millis(1500))
            .unwrap()
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_message_rejected() {
        let mut app = TextApp::new(AppSettings::new());
        let mut s = AppSettings::new();
        s.insert("message".to_string(), "".into());
        assert!(app.apply_config(s).is_err());
        assert_eq!(app.message, "HELLO WORLD!");
    }
}
