use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::{OverlayError, OverlayResult};

pub const DEFAULT_FONT_SIZE: f64 = 24.0;
pub const DEFAULT_COLOR: &str = "#ffffff";

/// Text drawn over the player, addressed by its unique name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub name: String,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
    pub color: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Overlay {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: String::new(),
            x: 0.0,
            y: 0.0,
            font_size: DEFAULT_FONT_SIZE,
            color: DEFAULT_COLOR.to_string(),
            enabled: true,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn validate(&self) -> OverlayResult<()> {
        if self.name.trim().is_empty() {
            return Err(OverlayError::Invalid("Name is required".into()));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(OverlayError::Invalid("Coordinates must be numbers".into()));
        }
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(OverlayError::Invalid(
                "Font size must be a positive number".into(),
            ));
        }
        if !is_hex_color(&self.color) {
            return Err(OverlayError::Invalid(format!(
                "Color {} must be a hex value like #ffffff",
                self.color
            )));
        }
        Ok(())
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get("name")?,
            text: row.get("text")?,
            x: row.get("x")?,
            y: row.get("y")?,
            font_size: row.get("font_size")?,
            color: row.get("color")?,
            enabled: row.get("enabled")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Create payload; everything but the name falls back to a default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOverlay {
    pub name: Option<String>,
    pub text: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub font_size: Option<f64>,
    pub color: Option<String>,
    pub enabled: Option<bool>,
}

impl NewOverlay {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn into_overlay(self) -> OverlayResult<Overlay> {
        let name = self
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| OverlayError::Invalid("Name is required".into()))?;
        let mut overlay = Overlay::new(name);
        OverlayPatch {
            text: self.text,
            x: self.x,
            y: self.y,
            font_size: self.font_size,
            color: self.color,
            enabled: self.enabled,
        }
        .apply(&mut overlay);
        overlay.validate()?;
        Ok(overlay)
    }
}

/// Partial update. The name is immutable, so a `name` key is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayPatch {
    pub text: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub font_size: Option<f64>,
    pub color: Option<String>,
    pub enabled: Option<bool>,
}

impl OverlayPatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.x.is_none()
            && self.y.is_none()
            && self.font_size.is_none()
            && self.color.is_none()
            && self.enabled.is_none()
    }

    pub fn apply(self, overlay: &mut Overlay) {
        if let Some(text) = self.text {
            overlay.text = text;
        }
        if let Some(x) = self.x {
            overlay.x = x;
        }
        if let Some(y) = self.y {
            overlay.y = y;
        }
        if let Some(font_size) = self.font_size {
            overlay.font_size = font_size;
        }
        if let Some(color) = self.color {
            overlay.color = color;
        }
        if let Some(enabled) = self.enabled {
            overlay.enabled = enabled;
        }
    }
}

fn is_hex_color(value: &str) -> bool {
    match value.strip_prefix('#') {
        Some(hex) if hex.len() == 3 || hex.len() == 6 => {
            hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        _ => false,
    }
}
