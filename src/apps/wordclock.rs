//! Word clock app (QLOCKTWO-style phrases).

use super::{setting_str, AppError, ConfigField, ConfigSchema, DisplayApp, ValidationError};
use crate::config::AppSettings;
use crate::display::frame::{Canvas, Frame, Rgb, GLYPH_HEIGHT};
use chrono::{Local, Timelike};
use std::time::Duration;

const HOUR_WORDS: [&str; 12] = [
    "TWELVE", "ONE", "TWO", "THREE", "FOUR", "FIVE", "SIX", "SEVEN", "EIGHT", "NINE", "TEN",
    "ELEVEN",
];

/// Spells the time out in words at five-minute resolution
pub struct WordClockApp {
    settings: AppSettings,
    color: Rgb,
}

impl WordClockApp {
    pub fn new(settings: AppSettings) -> Self {
        let mut app = Self {
            settings: AppSettings::new(),
            color: Rgb::WHITE,
        };
        if app.apply_config(settings).is_err() {
            tracing::warn!("Stored wordclock settings invalid, using defaults");
        }
        app
    }

    /// Phrase lines for a given hour/minute, five-minute resolution
    fn phrase(hour: u32, minute: u32) -> Vec<String> {
        let rounded = (minute / 5) * 5;
        // Past the half hour the phrase references the next hour
        let hour_idx = if rounded > 30 { hour + 1 } else { hour } % 12;
        let hour_word = HOUR_WORDS[hour_idx as usize];

        let mut lines = vec!["IT IS".to_string()];
        match rounded {
            0 => {
                lines.push(hour_word.to_string());
                lines.push("O'CLOCK".to_string());
            }
            30 => {
                lines.push("HALF PAST".to_string());
                lines.push(hour_word.to_string());
            }
            15 => {
                lines.push("QUARTER".to_string());
                lines.push(format!("PAST {hour_word}"));
            }
            45 => {
                lines.push("QUARTER".to_string());
                lines.push(format!("TO {hour_word}"));
            }
            m if m < 30 => {
                lines.push(format!("{} PAST", minute_word(m)));
                lines.push(hour_word.to_string());
            }
            m => {
                lines.push(format!("{} TO", minute_word(60 - m)));
                lines.push(hour_word.to_string());
            }
        }
        lines
    }
}

fn minute_word(m: u32) -> &'static str {
    match m {
        5 => "FIVE",
        10 => "TEN",
        20 => "TWENTY",
        25 => "TWENTYFIVE",
        _ => "FIVE",
    }
}

impl DisplayApp for WordClockApp {
    fn name(&self) -> &'static str {
        "wordclock"
    }

    fn display_name(&self) -> &'static str {
        "Word Clock"
    }

    fn description(&self) -> &'static str {
        "Time spelled out in words"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![ConfigField::color("color", "Text color", "#FFFFFF")])
    }

    fn current_config(&self) -> AppSettings {
        self.settings.clone()
    }

    fn render(&mut self, mut canvas: Canvas, _elapsed: Duration) -> Result<Option<Frame>, AppError> {
        let now = Local::now();
        let lines = Self::phrase(now.hour(), now.minute());

        let line_height = GLYPH_HEIGHT as i32 + 2;
        let total = lines.len() as i32 * line_height - 2;
        let mut y = (canvas.height() as i32 - total) / 2;

        for line in &lines {
            canvas.draw_text_centered(y, line, self.color);
            y += line_height;
        }

        Ok(Some(canvas.into_frame()))
    }

    fn apply_config(&mut self, settings: AppSettings) -> Result<(), ValidationError> {
        self.config_schema().validate(&settings)?;
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
    fn phrase_on_the_hour() {
        let lines = WordClockApp::phrase(9, 2);
        assert_eq!(lines, vec!["IT IS", "NINE", "O'CLOCK"]);
    }

    #[test]
    fn phrase_past_and_to() {
        assert_eq!(
            WordClockApp::phrase(9, 20),
            vec!["IT IS", "TWENTY PAST", "NINE"]
        );
        assert_eq!(
            WordClockApp::phrase(9, 40),
            vec!["IT IS", "TWENTY TO", "TEN"]
        );
    }

    #[test]
    fn phrase_wraps_midnight() {
        assert_eq!(
            WordClockApp::phrase(11, 45),
            vec!["IT IS", "QUARTER", "TO TWELVE"]
        );
    }
}
