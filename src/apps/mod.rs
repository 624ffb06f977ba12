//! Display applications.
//!
//! Every app implements the same four-operation contract: activate,
//! deactivate, render, apply_config. Apps are registered once at startup;
//! registration order is rotation order. Content fetching (weather APIs,
//! market data, playback state) happens outside this crate - apps render
//! from configured values and whatever data was last pushed to them.

pub mod clock;
pub mod scheduler;
pub mod spotify;
pub mod stocks;
pub mod text;
pub mod weather;
pub mod wordclock;

use crate::config::AppSettings;
use crate::display::frame::{Canvas, Frame};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// App-side failures (activation or rendering)
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Activation failed: {0}")]
    Activation(String),

    #[error("Render failed: {0}")]
    Render(String),
}

/// A rejected configuration value; the previous settings stay in effect
#[derive(Error, Debug)]
#[error("Invalid value for '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Config field types understood by the admin UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Bool,
    Password,
    Select,
    Color,
}

/// Schema for one configuration field
#[derive(Debug, Clone, Serialize)]
pub struct ConfigField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    pub default: Value,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl ConfigField {
    pub fn string(name: &str, label: &str, default: &str) -> Self {
        Self::new(name, FieldType::String, label, Value::from(default))
    }

    pub fn int(name: &str, label: &str, default: i64, min: i64, max: i64) -> Self {
        let mut f = Self::new(name, FieldType::Int, label, Value::from(default));
        f.min = Some(min);
        f.max = Some(max);
        f
    }

    pub fn bool(name: &str, label: &str, default: bool) -> Self {
        Self::new(name, FieldType::Bool, label, Value::from(default))
    }

    pub fn password(name: &str, label: &str) -> Self {
        Self::new(name, FieldType::Password, label, Value::from(""))
    }

    pub fn select(name: &str, label: &str, default: &str, options: &[&str]) -> Self {
        let mut f = Self::new(name, FieldType::Select, label, Value::from(default));
        f.options = Some(options.iter().map(|s| s.to_string()).collect());
        f
    }

    pub fn color(name: &str, label: &str, default: &str) -> Self {
        Self::new(name, FieldType::Color, label, Value::from(default))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn new(name: &str, field_type: FieldType, label: &str, default: Value) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            label: label.to_string(),
            default,
            required: false,
            min: None,
            max: None,
            options: None,
        }
    }
}

/// Ordered configuration schema for one app
#[derive(Debug, Clone, Serialize, Default)]
#[serde(transparent)]
pub struct ConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ConfigSchema {
    pub fn new(fields: Vec<ConfigField>) -> Self {
        Self { fields }
    }

    /// Validate settings against this schema
    ///
    /// Checks required fields, value types, integer ranges, and select
    /// options. Unknown keys are rejected so typos surface instead of
    /// silently doing nothing.
    pub fn validate(&self, settings: &AppSettings) -> Result<(), ValidationError> {
        for (key, _) in settings.iter() {
            if !self.fields.iter().any(|f| f.name == *key) {
                return Err(ValidationError::new(key, "unknown field"));
            }
        }

        for field in &self.fields {
            let value = settings.get(&field.name);

            if field.required
                && value.map_or(true, |v| v.is_null() || v.as_str() == Some(""))
            {
                return Err(ValidationError::new(&field.name, "required"));
            }

            let Some(value) = value else { continue };
            if value.is_null() {
                continue;
            }

            match field.field_type {
                FieldType::Int => {
                    let Some(n) = value.as_i64() else {
                        return Err(ValidationError::new(&field.name, "must be an integer"));
                    };
                    if let Some(min) = field.min {
                        if n < min {
                            return Err(ValidationError::new(
                                &field.name,
                                format!("must be >= {min}"),
                            ));
                        }
                    }
                    if let Some(max) = field.max {
                        if n > max {
                            return Err(ValidationError::new(
                                &field.name,
                                format!("must be <= {max}"),
                            ));
                        }
                    }
                }
                FieldType::Bool => {
                    if !value.is_boolean() {
                        return Err(ValidationError::new(&field.name, "must be a boolean"));
                    }
                }
                FieldType::Select => {
                    let Some(s) = value.as_str() else {
                        return Err(ValidationError::new(&field.name, "must be a string"));
                    };
                    if let Some(options) = &field.options {
                        if !options.iter().any(|o| o == s) {
                            return Err(ValidationError::new(
                                &field.name,
                                format!("must be one of: {}", options.join(", ")),
                            ));
                        }
                    }
                }
                FieldType::Color => {
                    let ok = value
                        .as_str()
                        .and_then(crate::display::frame::Rgb::from_hex)
                        .is_some();
                    if !ok {
                        return Err(ValidationError::new(
                            &field.name,
                            "must be a #RRGGBB color",
                        ));
                    }
                }
                FieldType::String | FieldType::Password => {
                    if !value.is_string() {
                        return Err(ValidationError::new(&field.name, "must be a string"));
                    }
                }
            }
        }

        Ok(())
    }
}

/// The four-operation contract every display app implements
pub trait DisplayApp: Send {
    /// Internal identifier (lowercase, unique)
    fn name(&self) -> &'static str;

    /// Human-readable name for the admin UI
    fn display_name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn config_schema(&self) -> ConfigSchema;

    /// Current settings values
    fn current_config(&self) -> AppSettings;

    /// Called when the app becomes active
    fn activate(&mut self) -> Result<(), AppError> {
        Ok(())
    }

    /// Called when switching away; must not fail
    fn deactivate(&mut self) {}

    /// Produce one frame, or `None` when there is nothing to show yet
    ///
    /// `elapsed` is the time since activation. Render must be fast and
    /// non-blocking; a misbehaving app degrades the frame rate, it does
    /// not get preempted.
    fn render(&mut self, canvas: Canvas, elapsed: Duration) -> Result<Option<Frame>, AppError>;

    /// Validate and apply new settings; prior settings stay untouched on error
    fn apply_config(&mut self, settings: AppSettings) -> Result<(), ValidationError>;
}

/// Read a string setting with a fallback
pub(crate) fn setting_str(settings: &AppSettings, key: &str, default: &str) -> String {
    settings
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Read a boolean setting with a fallback
pub(crate) fn setting_bool(settings: &AppSettings, key: &str, default: bool) -> bool {
    settings.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Read an integer setting with a fallback
pub(crate) fn setting_i64(settings: &AppSettings, key: &str, default: i64) -> i64 {
    settings.get(key).and_then(Value::as_i64).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField::string("city", "City", "Berlin").required(),
            ConfigField::int("interval", "Interval", 30, 5, 3600),
            ConfigField::bool("enabled", "Enabled", true),
            ConfigField::select("units", "Units", "metric", &["metric", "imperial"]),
            ConfigField::color("color", "Color", "#FFFFFF"),
        ])
    }

    fn settings(pairs: &[(&str, Value)]) -> AppSettings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn accepts_valid_settings() {
        let s = settings(&[
            ("city", Value::from("Hamburg")),
            ("interval", Value::from(60)),
            ("units", Value::from("imperial")),
            ("color", Value::from("#00FF00")),
        ]);
        schema().validate(&s).unwrap();
    }

    #[test]
    fn rejects_missing_required_field() {
        let s = settings(&[("city", Value::from(""))]);
        let err = schema().validate(&s).unwrap_err();
        assert_eq!(err.field, "city");
    }

    #[test]
    fn rejects_out_of_range_int() {
        let s = settings(&[("city", Value::from("X")), ("interval", Value::from(2))]);
        assert!(schema().validate(&s).is_err());
    }

    #[test]
    fn rejects_unknown_select_option() {
        let s = settings(&[("city", Value::from("X")), ("units", Value::from("kelvin"))]);
        assert!(schema().validate(&s).is_err());
    }

    #[test]
    fn rejects_unknown_field() {
        let s = settings(&[("city", Value::from("X")), ("bogus", Value::from(1))]);
        assert!(schema().validate(&s).is_err());
    }

    #[test]
    fn rejects_bad_color() {
        let s = settings(&[("city", Value::from("X")), ("color", Value::from("red"))]);
        assert!(schema().validate(&s).is_err());
    }
}
