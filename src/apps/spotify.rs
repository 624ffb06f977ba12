//! Spotify now-playing app.
//!
//! Shows the track pushed in by an external poller. Without credentials
//! or playback it falls back to an idle screen instead of failing, so
//! rotation never gets stuck on this app.

use super::{setting_str, AppError, ConfigField, ConfigSchema, DisplayApp, ValidationError};
use crate::config::AppSettings;
use crate::display::frame::{Canvas, Frame, Rgb, GLYPH_HEIGHT};
use std::time::Duration;

/// Currently playing track
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub artist: String,
    pub title: String,
    pub playing: bool,
}

pub struct SpotifyApp {
    settings: AppSettings,
    now_playing: Option<NowPlaying>,
}

impl SpotifyApp {
    pub fn new(settings: AppSettings) -> Self {
        let mut app = Self {
            settings: AppSettings::new(),
            now_playing: None,
        };
        if app.apply_config(settings).is_err() {
            tracing::warn!("Stored spotify settings invalid, using defaults");
        }
        app
    }

    /// Push the latest playback state from the external poller
    pub fn set_now_playing(&mut self, state: Option<NowPlaying>) {
        self.now_playing = state;
    }

    fn has_credentials(&self) -> bool {
        !setting_str(&self.settings, "client_id", "").is_empty()
    }
}

impl DisplayApp for SpotifyApp {
    fn name(&self) -> &'static str {
        "spotify"
    }

    fn display_name(&self) -> &'static str {
        "Spotify"
    }

    fn description(&self) -> &'static str {
        "Now playing track"
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField::string("client_id", "Client ID", ""),
            ConfigField::password("client_secret", "Client secret"),
        ])
    }

    fn current_config(&self) -> AppSettings {
        self.settings.clone()
    }

    fn render(&mut self, mut canvas: Canvas, _elapsed: Duration) -> Result<Option<Frame>, AppError> {
        let mid = canvas.height() as i32 / 2;
        let green = Rgb::new(0x1D, 0xB9, 0x54);

        match &self.now_playing {
            Some(np) if np.playing => {
                canvas.draw_text_centered(mid - GLYPH_HEIGHT as i32 - 1, &np.title, Rgb::WHITE);
                canvas.draw_text_centered(mid + 2, &np.artist, green);
            }
            _ => {
                let label = if self.has_credentials() {
                    "PAUSED"
                } else {
                    "NOT SET UP"
                };
                canvas.draw_text_centered(mid - GLYPH_HEIGHT as i32 / 2, label, green.scaled(60));
            }
        }

        Ok(Some(canvas.into_frame()))
    }

    fn apply_config(&mut self, settings: AppSettings) -> Result<(), ValidationError> {
        self.config_schema().validate(&settings)?;
        self.settings = settings;
        Ok(())
    }
}
