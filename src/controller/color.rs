use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ColorError {
    #[error("A color needs exactly 3 components, got {0}")]
    Arity(usize),
}

/// LED color, either in bytes (0-255) or normalized floats (0.0-1.0).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Color {
    Byte(u8, u8, u8),
    Float(f32, f32, f32),
}

impl Color {
    pub const OFF: Color = Color::Byte(0, 0, 0);

    /// Byte triple as sent to the device. Floats are scaled by 255 and clamped.
    pub fn to_bytes(self) -> (u8, u8, u8) {
        fn channel(v: f32) -> u8 {
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }

        match self {
            Color::Byte(r, g, b) => (r, g, b),
            Color::Float(r, g, b) => (channel(r), channel(g), channel(b)),
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::OFF
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Color::Byte(r, g, b)
    }
}

impl From<(f32, f32, f32)> for Color {
    fn from((r, g, b): (f32, f32, f32)) -> Self {
        Color::Float(r, g, b)
    }
}

impl TryFrom<&[u8]> for Color {
    type Error = ColorError;

    fn try_from(components: &[u8]) -> Result<Self, Self::Error> {
        match components {
            [r, g, b] => Ok(Color::Byte(*r, *g, *b)),
            other => Err(ColorError::Arity(other.len())),
        }
    }
}

impl TryFrom<&[f32]> for Color {
    type Error = ColorError;

    fn try_from(components: &[f32]) -> Result<Self, Self::Error> {
        match components {
            [r, g, b] => Ok(Color::Float(*r, *g, *b)),
            other => Err(ColorError::Arity(other.len())),
        }
    }
}
