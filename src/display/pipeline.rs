//! Display render pipeline.
//!
//! One task owns the panel and commits exactly one frame per tick at a
//! fixed cadence. During network setup it renders the setup screen from
//! the cached network snapshot instead of asking the scheduler. When the
//! active app has nothing to show, the previous frame is re-pushed rather
//! than blanking the panel.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;

use super::frame::{Canvas, Frame, Rgb, GLYPH_HEIGHT};
use super::panel::PanelDriver;
use crate::apps::scheduler::AppScheduler;
use crate::config::ConfigStore;
use crate::network::{NetworkPhase, NetworkState, NetworkStatus};

#[derive(Error, Debug)]
#[error("Brightness must be 0-100, got {0}")]
pub struct BrightnessOutOfRange(pub u8);

/// Pipeline status for the admin API
#[derive(Debug, Clone, Serialize)]
pub struct DisplayStatus {
    pub active_app: Option<&'static str>,
    pub brightness: u8,
    pub frame_rate: u32,
}

/// Admin-facing side of the pipeline; cheap to clone into HTTP handlers
#[derive(Clone)]
pub struct DisplayHandle {
    brightness: Arc<AtomicU8>,
    frame_rate: u32,
    scheduler: Arc<AppScheduler>,
    store: Arc<ConfigStore>,
}

impl DisplayHandle {
    /// Validate and apply a brightness change
    ///
    /// Takes effect on the next committed frame; no immediate re-render.
    pub fn set_brightness(&self, percent: u8) -> Result<(), BrightnessOutOfRange> {
        if percent > 100 {
            return Err(BrightnessOutOfRange(percent));
        }
        self.brightness.store(percent, Ordering::Relaxed);
        if let Err(e) = self.store.update(|c| c.display.brightness = percent) {
            tracing::warn!("Failed to persist brightness: {e}");
        }
        Ok(())
    }

    pub fn status(&self) -> DisplayStatus {
        DisplayStatus {
            active_app: self.scheduler.active_app(),
            brightness: self.brightness.load(Ordering::Relaxed),
            frame_rate: self.frame_rate,
        }
    }
}

pub struct RenderPipeline<D: PanelDriver> {
    panel: D,
    scheduler: Arc<AppScheduler>,
    network: NetworkState,
    brightness: Arc<AtomicU8>,
    applied_brightness: u8,
    width: u32,
    height: u32,
    frame_rate: u32,
    ap_ssid: String,
    last_frame: Option<Frame>,
    fault_streak: u32,
}

impl<D: PanelDriver> RenderPipeline<D> {
    pub fn new(
        panel: D,
        scheduler: Arc<AppScheduler>,
        network: NetworkState,
        store: Arc<ConfigStore>,
    ) -> (Self, DisplayHandle) {
        let config = store.get();
        let brightness = Arc::new(AtomicU8::new(config.display.brightness));
        let handle = DisplayHandle {
            brightness: Arc::clone(&brightness),
            frame_rate: config.display.frame_rate_hz,
            scheduler: Arc::clone(&scheduler),
            store,
        };
        let pipeline = Self {
            panel,
            scheduler,
            network,
            brightness,
            // Forces a driver brightness write on the first tick
            applied_brightness: u8::MAX,
            width: config.display.width,
            height: config.display.height,
            frame_rate: config.display.frame_rate_hz,
            ap_ssid: config.network.ap_ssid,
            last_frame: None,
            fault_streak: 0,
        };
        (pipeline, handle)
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        // `interval` schedules every deadline from the start instant, so
        // render jitter cannot accumulate into drift.
        let period = Duration::from_secs(1) / self.frame_rate.max(1);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Render pipeline: {}x{} at {} Hz",
            self.width,
            self.height,
            self.frame_rate
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => self.tick(Instant::now()),
            }
        }

        // Blank the panel so it does not hold the last image after exit
        let black = Canvas::new(self.width, self.height).into_frame();
        let _ = self.panel.write_frame(&black);
    }

    /// Produce and commit one frame
    fn tick(&mut self, now: Instant) {
        let target = self.brightness.load(Ordering::Relaxed);
        if target != self.applied_brightness {
            self.panel.set_brightness(target);
            self.applied_brightness = target;
        }

        let status = self.network.snapshot();
        let frame = if status.phase.is_setup() {
            Some(render_setup_screen(self.width, self.height, &self.ap_ssid, &status))
        } else {
            self.scheduler.tick_rotation(now);
            self.scheduler.get_active_frame(self.width, self.height)
        };

        if let Some(frame) = frame {
            self.last_frame = Some(frame);
        }

        // Hold the previous frame when the app produced nothing; a black
        // frame only before anything has ever rendered
        let frame = match &self.last_frame {
            Some(frame) => frame.clone(),
            None => Canvas::new(self.width, self.height).into_frame(),
        };

        match self.panel.write_frame(&frame) {
            Ok(()) => {
                if self.fault_streak > 0 {
                    tracing::info!("Panel recovered after {} failed writes", self.fault_streak);
                }
                self.fault_streak = 0;
            }
            Err(e) => {
                // One log line per fault streak, then retry next tick
                if self.fault_streak == 0 {
                    tracing::error!("Panel write failed: {e}");
                }
                self.fault_streak += 1;
            }
        }
    }
}

/// Status bitmap shown while the network setup flow is active
fn render_setup_screen(width: u32, height: u32, ap_ssid: &str, status: &NetworkStatus) -> Frame {
    let mut canvas = Canvas::new(width, height);
    canvas.draw_border(Rgb::new(0x00, 0x6E, 0xFF));

    let line_height = GLYPH_HEIGHT as i32 + 2;
    let mut y = 3;
    let mut line = |canvas: &mut Canvas, text: &str, color: Rgb| {
        canvas.draw_text_centered(y, text, color);
        y += line_height;
    };

    match status.phase {
        NetworkPhase::EnteringApMode => {
            line(&mut canvas, "WIFI SETUP", Rgb::WHITE);
            line(&mut canvas, "STARTING AP", Rgb::new(0xFF, 0xA5, 0x00));
        }
        NetworkPhase::PortalServing => {
            line(&mut canvas, "WIFI SETUP", Rgb::WHITE);
            line(&mut canvas, "JOIN:", Rgb::new(128, 128, 128));
            line(&mut canvas, ap_ssid, Rgb::new(0x00, 0xD4, 0xFF));
            if status.last_error.is_some() {
                line(&mut canvas, "FAILED, RETRY", Rgb::new(220, 0, 0));
            }
        }
        NetworkPhase::Connecting => {
            line(&mut canvas, "CONNECTING", Rgb::new(0, 200, 0));
        }
        NetworkPhase::Monitoring => {
            line(&mut canvas, "READY", Rgb::WHITE);
        }
    }

    canvas.into_frame()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::clock::ClockApp;
    use crate::apps::{AppError, ConfigSchema, DisplayApp, ValidationError};
    use crate::config::{AppSettings, Config};
    use crate::display::panel::{HardwareFault, MockPanel};
    use tokio::sync::mpsc;

    /// Renders one frame, then nothing forever
    struct OneShotApp {
        rendered: bool,
    }

    impl DisplayApp for OneShotApp {
        fn name(&self) -> &'static str {
            "oneshot"
        }

        fn display_name(&self) -> &'static str {
            "One Shot"
        }

        fn description(&self) -> &'static str {
            "Renders a single frame"
        }

        fn config_schema(&self) -> ConfigSchema {
            ConfigSchema::default()
        }

        fn current_config(&self) -> AppSettings {
            AppSettings::new()
        }

        fn render(
            &mut self,
            mut canvas: Canvas,
            _elapsed: Duration,
        ) -> Result<Option<Frame>, AppError> {
            if self.rendered {
                return Ok(None);
            }
            self.rendered = true;
            canvas.fill(Rgb::WHITE);
            Ok(Some(canvas.into_frame()))
        }

        fn apply_config(&mut self, _settings: AppSettings) -> Result<(), ValidationError> {
            Ok(())
        }
    }

    struct FlakyPanel {
        inner: MockPanel,
        fail: bool,
    }

    impl PanelDriver for FlakyPanel {
        fn write_frame(&mut self, frame: &Frame) -> Result<(), HardwareFault> {
            if self.fail {
                Err(HardwareFault("bus error".to_string()))
            } else {
                self.inner.write_frame(frame)
            }
        }

        fn set_brightness(&mut self, percent: u8) {
            self.inner.set_brightness(percent);
        }
    }

    fn test_store(tag: &str) -> Arc<ConfigStore> {
        let dir = std::env::temp_dir().join(format!("led-matrix-pipe-{tag}"));
        std::fs::create_dir_all(&dir).unwrap();
        Arc::new(ConfigStore::new(dir.join("config.json"), Config::default()))
    }

    fn build<D: PanelDriver>(
        tag: &str,
        panel: D,
        apps: Vec<Box<dyn DisplayApp>>,
    ) -> (RenderPipeline<D>, DisplayHandle, Arc<AppScheduler>) {
        let store = test_store(tag);
        let (tx, _rx) = mpsc::channel(4);
        let scheduler = Arc::new(AppScheduler::new(apps, Arc::clone(&store), tx));
        let (pipeline, handle) = RenderPipeline::new(
            panel,
            Arc::clone(&scheduler),
            NetworkState::new(),
            store,
        );
        (pipeline, handle, scheduler)
    }

    #[test]
    fn holds_previous_frame_when_app_has_nothing() {
        let (mut pipeline, _handle, scheduler) = build(
            "hold",
            MockPanel::new(),
            vec![Box::new(OneShotApp { rendered: false })],
        );
        scheduler.activate("oneshot").unwrap();

        pipeline.tick(Instant::now());
        let first = pipeline.panel.last_frame().unwrap().clone();

        // App returns None from here on; the panel keeps getting the
        // same frame instead of a blank
        pipeline.tick(Instant::now());
        pipeline.tick(Instant::now());
        assert_eq!(pipeline.panel.writes(), 3);
        assert_eq!(pipeline.panel.last_frame().unwrap(), &first);
    }

    #[test]
    fn panel_fault_does_not_stop_ticking() {
        let panel = FlakyPanel {
            inner: MockPanel::new(),
            fail: true,
        };
        let (mut pipeline, _handle, scheduler) = build(
            "fault",
            panel,
            vec![Box::new(ClockApp::new(AppSettings::new()))],
        );
        scheduler.activate("clock").unwrap();

        for _ in 0..5 {
            pipeline.tick(Instant::now());
        }
        assert_eq!(pipeline.fault_streak, 5);

        pipeline.panel.fail = false;
        pipeline.tick(Instant::now());
        assert_eq!(pipeline.fault_streak, 0);
        assert_eq!(pipeline.panel.inner.writes(), 1);
    }

    #[test]
    fn brightness_validation_and_status() {
        let (mut pipeline, handle, _scheduler) = build(
            "brightness",
            MockPanel::new(),
            vec![Box::new(ClockApp::new(AppSettings::new()))],
        );

        assert!(handle.set_brightness(150).is_err());
        handle.set_brightness(0).unwrap();
        assert_eq!(handle.status().brightness, 0);
        handle.set_brightness(100).unwrap();
        assert_eq!(handle.status().brightness, 100);

        pipeline.tick(Instant::now());
        assert_eq!(pipeline.panel.brightness(), 100);
    }

    #[test]
    fn setup_phase_overrides_app_output() {
        let (mut pipeline, _handle, scheduler) = build(
            "setup",
            MockPanel::new(),
            vec![Box::new(ClockApp::new(AppSettings::new()))],
        );
        scheduler.activate("clock").unwrap();

        pipeline.tick(Instant::now());
        let app_frame = pipeline.panel.last_frame().unwrap().clone();

        pipeline.network.set_phase(NetworkPhase::PortalServing);
        pipeline.tick(Instant::now());
        let setup_frame = pipeline.panel.last_frame().unwrap().clone();
        assert_ne!(app_frame, setup_frame);
    }

    #[test]
    fn setup_screen_shows_ap_name() {
        let status = NetworkStatus {
            phase: NetworkPhase::PortalServing,
            connected_ssid: None,
            last_error: None,
        };
        let frame = render_setup_screen(64, 64, "LED-Display-Setup", &status);
        assert!(frame.pixels().iter().any(|p| *p != Rgb::BLACK));
    }
}
