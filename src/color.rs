use std::fmt;
use std::str::FromStr;

use palette::Srgb;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An 8-bit sRGB color, written externally as `#rrggbb`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    red: u8,
    green: u8,
    blue: u8,
}

/// Returned when a string is not a valid `#rrggbb` color.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseColorError {
    #[error("hex color must be 6 characters, got {0}")]
    Length(usize),
    #[error("invalid hex digit in {0:?}")]
    Digit(String),
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub const fn red(&self) -> u8 {
        self.red
    }

    pub const fn green(&self) -> u8 {
        self.green
    }

    pub const fn blue(&self) -> u8 {
        self.blue
    }

    /// Build a color from floating point channel values.
    ///
    /// Each channel is rounded to the nearest integer and clamped to `0..=255`.
    /// This is the only place centroid coordinates lose precision.
    pub fn from_channels(channels: [f64; 3]) -> Self {
        let [r, g, b] = channels.map(|c| c.round().clamp(0.0, 255.0) as u8);
        Self::new(r, g, b)
    }

    /// Lowercase `#rrggbb` form.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 {
            return Err(ParseColorError::Length(hex.len()));
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseColorError::Digit(s.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| ParseColorError::Digit(s.to_string()))
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl From<Srgb<u8>> for Color {
    fn from(value: Srgb<u8>) -> Self {
        Self::new(value.red, value.green, value.blue)
    }
}

impl From<Color> for Srgb<u8> {
    fn from(value: Color) -> Self {
        Srgb::new(value.red, value.green, value.blue)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_lowercase_zero_padded() {
        assert_eq!(Color::new(255, 0, 0).to_hex(), "#ff0000");
        assert_eq!(Color::new(1, 10, 171).to_hex(), "#010aab");
    }

    #[test]
    fn hex_round_trips_for_sampled_colors() {
        for (r, g, b) in [(0, 0, 0), (255, 255, 255), (18, 52, 86), (171, 205, 239), (7, 128, 200)] {
            let color = Color::new(r, g, b);
            let parsed: Color = color.to_hex().parse().unwrap();
            assert_eq!(parsed, color);
        }
    }

    #[test]
    fn parses_without_hash_and_in_uppercase() {
        assert_eq!("ABCDEF".parse::<Color>().unwrap(), Color::new(0xab, 0xcd, 0xef));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert_eq!("#fff".parse::<Color>(), Err(ParseColorError::Length(3)));
        assert!(matches!("#gg0000".parse::<Color>(), Err(ParseColorError::Digit(_))));
    }

    #[test]
    fn channels_are_rounded_and_clamped() {
        assert_eq!(Color::from_channels([127.5, -3.0, 300.2]), Color::new(128, 0, 255));
        assert_eq!(Color::from_channels([10.49, 10.5, 0.0]), Color::new(10, 11, 0));
    }

    #[test]
    fn serializes_as_hex_string() {
        let json = serde_json::to_string(&Color::new(0, 128, 255)).unwrap();
        assert_eq!(json, "\"#0080ff\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Color::new(0, 128, 255));
    }
}
