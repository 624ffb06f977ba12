//! Button event source.
//!
//! Polls a debounced digital input at ~100 Hz and classifies presses.
//! A press held past the long-press threshold fires LongPress immediately,
//! without waiting for release; anything shorter fires ShortPress on
//! release. Each physical press produces at most one event.
//!
//! Events are delivered through a `watch` channel, so the newest event
//! replaces an unconsumed one instead of blocking the poll loop.

use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::config::ButtonConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
#[error("GPIO button init failed: {0}")]
pub struct ButtonError(#[from] rppal::gpio::Error);

/// Press classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressKind {
    Short,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub kind: PressKind,
    pub at: Instant,
}

/// Raw digital input line, active when pressed
pub trait ButtonInput: Send {
    fn is_pressed(&mut self) -> bool;
}

/// GPIO input with internal pull-up; the button shorts the pin to ground
pub struct GpioButton {
    pin: rppal::gpio::InputPin,
}

impl GpioButton {
    pub fn new(bcm_pin: u8) -> Result<Self, ButtonError> {
        let gpio = rppal::gpio::Gpio::new()?;
        let pin = gpio.get(bcm_pin)?.into_input_pullup();
        Ok(Self { pin })
    }
}

impl ButtonInput for GpioButton {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low()
    }
}

/// Input that is never pressed, for running without hardware
pub struct NullButton;

impl ButtonInput for NullButton {
    fn is_pressed(&mut self) -> bool {
        false
    }
}

/// Debounce and classification state, advanced one sample at a time
struct PressTracker {
    debounce: Duration,
    long_press: Duration,
    stable_pressed: bool,
    candidate_pressed: bool,
    candidate_since: Instant,
    pressed_at: Option<Instant>,
    long_fired: bool,
}

impl PressTracker {
    fn new(config: &ButtonConfig, now: Instant) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            long_press: Duration::from_millis(config.long_press_ms),
            stable_pressed: false,
            candidate_pressed: false,
            candidate_since: now,
            pressed_at: None,
            long_fired: false,
        }
    }

    /// Feed one raw sample; returns an event when one is due
    fn sample(&mut self, pressed: bool, now: Instant) -> Option<ButtonEvent> {
        if pressed != self.candidate_pressed {
            self.candidate_pressed = pressed;
            self.candidate_since = now;
        }

        // A level change counts only after it has been stable for the
        // debounce window, which also enforces the inter-event gap.
        if self.candidate_pressed != self.stable_pressed
            && now.duration_since(self.candidate_since) >= self.debounce
        {
            self.stable_pressed = self.candidate_pressed;
            if self.stable_pressed {
                self.pressed_at = Some(self.candidate_since);
                self.long_fired = false;
            } else {
                let held_short = self.pressed_at.take().is_some() && !self.long_fired;
                if held_short {
                    return Some(ButtonEvent {
                        kind: PressKind::Short,
                        at: now,
                    });
                }
            }
        }

        if self.stable_pressed && !self.long_fired {
            if let Some(start) = self.pressed_at {
                if now.duration_since(start) >= self.long_press {
                    self.long_fired = true;
                    return Some(ButtonEvent {
                        kind: PressKind::Long,
                        at: now,
                    });
                }
            }
        }

        None
    }
}

/// Polls the input and publishes classified events
pub struct ButtonMonitor<I: ButtonInput> {
    input: I,
    tracker: PressTracker,
    tx: watch::Sender<Option<ButtonEvent>>,
}

impl<I: ButtonInput> ButtonMonitor<I> {
    pub fn new(input: I, config: &ButtonConfig) -> (Self, watch::Receiver<Option<ButtonEvent>>) {
        let (tx, rx) = watch::channel(None);
        let monitor = Self {
            input,
            tracker: PressTracker::new(config, Instant::now()),
            tx,
        };
        (monitor, rx)
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    let pressed = self.input.is_pressed();
                    if let Some(event) = self.tracker.sample(pressed, Instant::now()) {
                        tracing::debug!("Button event: {:?}", event.kind);
                        // Receiver gone means shutdown is in progress
                        if self.tx.send(Some(event)).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
