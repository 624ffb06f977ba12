//! App scheduler.
//!
//! Owns the registered apps, which one is active, and rotation timing.
//! All switches happen under a single state lock; rendering snapshots the
//! active app under the lock and runs outside it, so a slow render never
//! blocks status reads or switches.

use super::{AppError, ConfigSchema, DisplayApp, ValidationError};
use crate::button::{ButtonEvent, PressKind};
use crate::config::{AppSettings, ConfigStore};
use crate::display::frame::{Canvas, Frame};
use crate::network::NetworkCommand;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Unknown app: {0}")]
    UnknownApp(String),

    #[error("Failed to activate '{app}': {source}")]
    Activation {
        app: String,
        #[source]
        source: AppError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// App inventory entry for the admin API
#[derive(Debug, Serialize)]
pub struct AppInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub active: bool,
    pub config_schema: ConfigSchema,
    pub current_config: AppSettings,
}

type SharedApp = Arc<Mutex<Box<dyn DisplayApp>>>;

struct SchedulerState {
    /// Index into `apps`; `None` only before the first successful activation
    active: Option<usize>,
    rotation_enabled: bool,
    rotation_interval: Duration,
    last_switch: Instant,
    activated_at: Instant,
}

pub struct AppScheduler {
    apps: Vec<SharedApp>,
    /// Registration-order names, cached so lookups skip the app locks
    names: Vec<&'static str>,
    state: Mutex<SchedulerState>,
    render_fail_streak: AtomicU32,
    store: Arc<ConfigStore>,
    network_tx: mpsc::Sender<NetworkCommand>,
}

impl AppScheduler {
    /// Register apps in rotation order. No app is active until the first
    /// `activate` call.
    pub fn new(
        apps: Vec<Box<dyn DisplayApp>>,
        store: Arc<ConfigStore>,
        network_tx: mpsc::Sender<NetworkCommand>,
    ) -> Self {
        let names: Vec<&'static str> = apps.iter().map(|a| a.name()).collect();
        let config = store.get();
        Self {
            apps: apps.into_iter().map(|a| Arc::new(Mutex::new(a))).collect(),
            names,
            state: Mutex::new(SchedulerState {
                active: None,
                rotation_enabled: config.apps.rotation_enabled,
                rotation_interval: Duration::from_secs(config.apps.rotation_interval_secs),
                last_switch: Instant::now(),
                activated_at: Instant::now(),
            }),
            render_fail_streak: AtomicU32::new(0),
            store,
            network_tx,
        }
    }

    /// Activate the named app, deactivating the current one first
    pub fn activate(&self, name: &str) -> Result<(), SchedulerError> {
        let idx = self
            .names
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| SchedulerError::UnknownApp(name.to_string()))?;

        {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            self.switch_locked(&mut state, idx)?;
        }
        self.persist_active(name);
        Ok(())
    }

    /// Switch to the next app in registration order, wrapping
    pub fn next(&self) -> Result<(), SchedulerError> {
        self.step(1)
    }

    /// Switch to the previous app in registration order, wrapping
    pub fn previous(&self) -> Result<(), SchedulerError> {
        self.step(-1)
    }

    /// Route a button event
    ///
    /// Short presses switch apps; long presses toggle network setup mode.
    /// The setup command goes through a bounded channel so this never
    /// blocks on the network loop.
    pub fn on_button(&self, event: ButtonEvent) {
        match event.kind {
            PressKind::Short => {
                if let Err(e) = self.next() {
                    tracing::warn!("Button switch failed: {e}");
                }
            }
            PressKind::Long => {
                if self.network_tx.try_send(NetworkCommand::ToggleSetup).is_err() {
                    tracing::warn!("Network command channel full, setup request dropped");
                }
            }
        }
    }

    /// Rotate to the next app when the interval has elapsed
    ///
    /// The due check and the switch both happen under the lock, so a button
    /// press racing this cannot cause a double switch off a stale deadline.
    pub fn tick_rotation(&self, now: Instant) {
        let target = {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            if !state.rotation_enabled
                || state.active.is_none()
                || now.duration_since(state.last_switch) < state.rotation_interval
            {
                return;
            }
            let idx = self.wrapped(&state, 1);
            match self.switch_locked(&mut state, idx) {
                Ok(()) => self.names[idx],
                Err(e) => {
                    tracing::warn!("Rotation switch failed: {e}");
                    return;
                }
            }
        };
        self.persist_active(target);
    }

    /// Render the active app, or `None` when idle or the app has nothing
    ///
    /// Render failures are soft: the pipeline holds the previous frame, and
    /// the fault is logged once per failure streak rather than every tick.
    pub fn get_active_frame(&self, width: u32, height: u32) -> Option<Frame> {
        let (app, elapsed) = {
            let state = self.state.lock().expect("scheduler lock poisoned");
            let idx = state.active?;
            (Arc::clone(&self.apps[idx]), state.activated_at.elapsed())
        };

        let result = app
            .lock()
            .expect("app lock poisoned")
            .render(Canvas::new(width, height), elapsed);

        match result {
            Ok(frame) => {
                self.render_fail_streak.store(0, Ordering::Relaxed);
                frame
            }
            Err(e) => {
                if self.render_fail_streak.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::error!("App render failed: {e}");
                }
                None
            }
        }
    }

    /// Name of the active app, if any
    pub fn active_app(&self) -> Option<&'static str> {
        let state = self.state.lock().expect("scheduler lock poisoned");
        state.active.map(|idx| self.names[idx])
    }

    /// Inventory of all registered apps for the admin API
    pub fn list_apps(&self) -> Vec<AppInfo> {
        let active = {
            let state = self.state.lock().expect("scheduler lock poisoned");
            state.active
        };
        self.apps
            .iter()
            .enumerate()
            .map(|(idx, app)| {
                let app = app.lock().expect("app lock poisoned");
                AppInfo {
                    name: app.name(),
                    display_name: app.display_name(),
                    description: app.description(),
                    active: active == Some(idx),
                    config_schema: app.config_schema(),
                    current_config: app.current_config(),
                }
            })
            .collect()
    }

    /// Apply and persist new settings for the named app
    pub fn set_config(&self, name: &str, settings: AppSettings) -> Result<(), SchedulerError> {
        let idx = self
            .names
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| SchedulerError::UnknownApp(name.to_string()))?;

        self.apps[idx]
            .lock()
            .expect("app lock poisoned")
            .apply_config(settings.clone())?;

        let name = name.to_string();
        if let Err(e) = self.store.update(|c| {
            c.apps.settings.insert(name.clone(), settings.clone());
        }) {
            tracing::warn!("Failed to persist app settings: {e}");
        }
        Ok(())
    }

    fn step(&self, direction: isize) -> Result<(), SchedulerError> {
        let target = {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            if self.apps.len() <= 1 {
                // Nothing to switch to, but the rotation clock still resets
                state.last_switch = Instant::now();
                return Ok(());
            }
            let idx = self.wrapped(&state, direction);
            self.switch_locked(&mut state, idx)?;
            self.names[idx]
        };
        self.persist_active(target);
        Ok(())
    }

    fn wrapped(&self, state: &SchedulerState, direction: isize) -> usize {
        let len = self.apps.len() as isize;
        let current = state.active.unwrap_or(0) as isize;
        ((current + direction).rem_euclid(len)) as usize
    }

    /// Deactivate the current app and activate `idx`, atomically with
    /// respect to the state lock. On activation failure the scheduler
    /// reverts to idle rather than leaving a half-activated app live.
    fn switch_locked(
        &self,
        state: &mut SchedulerState,
        idx: usize,
    ) -> Result<(), SchedulerError> {
        if let Some(old) = state.active.take() {
            self.apps[old].lock().expect("app lock poisoned").deactivate();
        }

        let result = self.apps[idx].lock().expect("app lock poisoned").activate();
        if let Err(source) = result {
            return Err(SchedulerError::Activation {
                app: self.names[idx].to_string(),
                source,
            });
        }

        let now = Instant::now();
        state.active = Some(idx);
        state.last_switch = now;
        state.activated_at = now;
        self.render_fail_streak.store(0, Ordering::Relaxed);
        tracing::info!("Switched to app '{}'", self.names[idx]);
        Ok(())
    }

    fn persist_active(&self, name: &str) {
        let name = name.to_string();
        if let Err(e) = self.store.update(|c| c.apps.active_app = name.clone()) {
            tracing::warn!("Failed to persist active app: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::clock::ClockApp;
    use crate::apps::text::TextApp;
    use crate::config::Config;

    struct BrokenApp;

    impl DisplayApp for BrokenApp {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn display_name(&self) -> &'static str {
            "Broken"
        }

        fn description(&self) -> &'static str {
            "Always fails to start"
        }

        fn config_schema(&self) -> ConfigSchema {
            ConfigSchema::default()
        }

        fn current_config(&self) -> AppSettings {
            AppSettings::new()
        }

        fn activate(&mut self) -> Result<(), AppError> {
            Err(AppError::Activation("hardware missing".to_string()))
        }

        fn render(
            &mut self,
            _canvas: Canvas,
            _elapsed: Duration,
        ) -> Result<Option<Frame>, AppError> {
            Err(AppError::Render("never activated".to_string()))
        }

        fn apply_config(&mut self, _settings: AppSettings) -> Result<(), ValidationError> {
            Ok(())
        }
    }

    fn test_store(tag: &str) -> Arc<ConfigStore> {
        let dir = std::env::temp_dir().join(format!("led-matrix-sched-{tag}"));
        std::fs::create_dir_all(&dir).unwrap();
        Arc::new(ConfigStore::new(dir.join("config.json"), Config::default()))
    }

    fn scheduler(tag: &str, apps: Vec<Box<dyn DisplayApp>>) -> AppScheduler {
        let (tx, _rx) = mpsc::channel(4);
        AppScheduler::new(apps, test_store(tag), tx)
    }

    fn two_apps(tag: &str) -> AppScheduler {
        scheduler(
            tag,
            vec![
                Box::new(ClockApp::new(AppSettings::new())),
                Box::new(TextApp::new(AppSettings::new())),
            ],
        )
    }

    #[test]
    fn activate_next_previous_scenario() {
        let sched = two_apps("scenario");
        sched.activate("text").unwrap();
        assert_eq!(sched.active_app(), Some("text"));

        sched.next().unwrap();
        assert_eq!(sched.active_app(), Some("clock"));

        sched.previous().unwrap();
        assert_eq!(sched.active_app(), Some("text"));
    }

    #[test]
    fn next_is_cyclic() {
        let sched = two_apps("cyclic");
        sched.activate("clock").unwrap();
        for _ in 0..2 {
            sched.next().unwrap();
        }
        assert_eq!(sched.active_app(), Some("clock"));
    }

    #[test]
    fn at_most_one_app_reports_active() {
        let sched = two_apps("single-active");
        sched.activate("clock").unwrap();
        sched.next().unwrap();
        sched.previous().unwrap();
        let active: Vec<_> = sched.list_apps().into_iter().filter(|a| a.active).collect();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn unknown_app_leaves_state_unchanged() {
        let sched = two_apps("unknown");
        sched.activate("clock").unwrap();
        let err = sched.activate("nope").unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownApp(_)));
        assert_eq!(sched.active_app(), Some("clock"));
    }

    #[test]
    fn activation_failure_reverts_to_idle() {
        let sched = scheduler(
            "broken",
            vec![
                Box::new(ClockApp::new(AppSettings::new())),
                Box::new(BrokenApp),
            ],
        );
        sched.activate("clock").unwrap();

        let err = sched.activate("broken").unwrap_err();
        assert!(matches!(err, SchedulerError::Activation { .. }));
        assert_eq!(sched.active_app(), None);
        assert!(sched.get_active_frame(64, 64).is_none());
    }

    #[test]
    fn single_app_next_is_noop() {
        let sched = scheduler(
            "solo",
            vec![Box::new(ClockApp::new(AppSettings::new()))],
        );
        sched.activate("clock").unwrap();
        sched.next().unwrap();
        assert_eq!(sched.active_app(), Some("clock"));
    }

    #[test]
    fn rotation_switches_after_interval() {
        let sched = two_apps("rotation");
        sched
            .store
            .update(|c| c.apps.rotation_enabled = true)
            .unwrap();
        {
            let mut state = sched.state.lock().unwrap();
            state.rotation_enabled = true;
            state.rotation_interval = Duration::from_secs(30);
        }
        sched.activate("clock").unwrap();

        sched.tick_rotation(Instant::now());
        assert_eq!(sched.active_app(), Some("clock"));

        sched.tick_rotation(Instant::now() + Duration::from_secs(31));
        assert_eq!(sched.active_app(), Some("text"));
    }

    struct FlakyRenderApp {
        calls: u32,
    }

    impl DisplayApp for FlakyRenderApp {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn display_name(&self) -> &'static str {
            "Flaky"
        }

        fn description(&self) -> &'static str {
            "Renders once, then fails"
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
            self.calls += 1;
            if self.calls == 1 {
                canvas.set_pixel(0, 0, crate::display::Rgb::WHITE);
                Ok(Some(canvas.into_frame()))
            } else {
                Err(AppError::Render("sensor gone".to_string()))
            }
        }

        fn apply_config(&mut self, _settings: AppSettings) -> Result<(), ValidationError> {
            Ok(())
        }
    }

    #[test]
    fn render_failure_is_soft_and_counted_once_per_streak() {
        let sched = scheduler("flaky", vec![Box::new(FlakyRenderApp { calls: 0 })]);
        sched.activate("flaky").unwrap();

        assert!(sched.get_active_frame(8, 8).is_some());
        for _ in 0..5 {
            assert!(sched.get_active_frame(8, 8).is_none());
        }
        // The streak keeps counting without resetting, so only its first
        // failure produced a log line
        assert_eq!(sched.render_fail_streak.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn renders_active_app_frame() {
        let sched = two_apps("render");
        sched.activate("clock").unwrap();
        assert!(sched.get_active_frame(64, 64).is_some());
    }

    #[test]
    fn set_config_rejects_invalid_and_keeps_previous() {
        let sched = two_apps("config");
        let mut bad = AppSettings::new();
        bad.insert("message".to_string(), "".into());
        assert!(sched.set_config("text", bad).is_err());

        let apps = sched.list_apps();
        let text = apps.iter().find(|a| a.name == "text").unwrap();
        assert!(text.current_config.is_empty());
    }
}
