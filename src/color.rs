// src/color.rs

//! Defines the pixel type (`Rgba`), the evaluated color identifier (`ColorKey`)
//! and the posterization quantizer used by mask extraction.

use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 4-channel 8-bit pixel: `[r, g, b, a]`.
pub type Rgba = [u8; 4];

/// Fully transparent pixel. Blank drawing canvases are filled with it.
pub const TRANSPARENT: Rgba = [0, 0, 0, 0];
/// Opaque white.
pub const WHITE: Rgba = [255, 255, 255, 255];
/// Opaque black.
pub const BLACK: Rgba = [0, 0, 0, 255];

/// Largest bucket count accepted by [`quantize_channel`].
pub const MAX_POSTERIZATION: u32 = 256;

/// Identifies one evaluated color layer.
///
/// `Ink` matches any pixel that is not background. `Rgb` matches pixels whose
/// posterized color equals the posterized key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColorKey {
    Ink,
    Rgb(u8, u8, u8),
}

impl Default for ColorKey {
    fn default() -> Self {
        ColorKey::Ink
    }
}

impl ColorKey {
    /// Builds a key from a packed `0xRRGGBB` integer. The top byte is ignored.
    pub fn from_packed(packed: u32) -> Self {
        ColorKey::Rgb(
            ((packed >> 16) & 0xff) as u8,
            ((packed >> 8) & 0xff) as u8,
            (packed & 0xff) as u8,
        )
    }

    /// Returns the packed `0xRRGGBB` form, or `None` for `Ink`.
    pub fn packed(&self) -> Option<u32> {
        match *self {
            ColorKey::Ink => None,
            ColorKey::Rgb(r, g, b) => Some(((r as u32) << 16) | ((g as u32) << 8) | b as u32),
        }
    }

    /// An opaque pixel of this key's color; `Ink` renders as black.
    pub fn to_rgba(&self) -> Rgba {
        match *self {
            ColorKey::Ink => BLACK,
            ColorKey::Rgb(r, g, b) => [r, g, b, 255],
        }
    }
}

fn parse_hex_rgb(digits: &str) -> Option<u32> {
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

impl FromStr for ColorKey {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("ink") {
            return Ok(ColorKey::Ink);
        }
        let packed = if let Some(hex) = trimmed.strip_prefix('#') {
            parse_hex_rgb(hex)
        } else if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            u32::from_str_radix(hex, 16).ok().filter(|v| *v <= 0xff_ffff)
        } else {
            parse_hex_rgb(trimmed)
        };
        packed
            .map(ColorKey::from_packed)
            .ok_or_else(|| EvalError::UnknownColorKey(s.to_string()))
    }
}

impl TryFrom<String> for ColorKey {
    type Error = EvalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColorKey> for String {
    fn from(key: ColorKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for ColorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorKey::Ink => write!(f, "ink"),
            ColorKey::Rgb(r, g, b) => write!(f, "#{:02x}{:02x}{:02x}", r, g, b),
        }
    }
}

/// Maps a channel value into one of `buckets` equal-width buckets.
///
/// `buckets` must be in `1..=256`; callers validate it through the config.
#[inline]
pub fn quantize_channel(value: u8, buckets: u32) -> u8 {
    ((value as u32 * buckets) / MAX_POSTERIZATION) as u8
}

/// Quantizes the RGB channels of a pixel. Alpha is not part of the color identity.
#[inline]
pub fn quantize_rgb(r: u8, g: u8, b: u8, buckets: u32) -> [u8; 3] {
    [
        quantize_channel(r, buckets),
        quantize_channel(g, buckets),
        quantize_channel(b, buckets),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_supported_form() {
        assert_eq!("ink".parse::<ColorKey>().unwrap(), ColorKey::Ink);
        assert_eq!("INK".parse::<ColorKey>().unwrap(), ColorKey::Ink);
        assert_eq!("#ff0000".parse::<ColorKey>().unwrap(), ColorKey::Rgb(255, 0, 0));
        assert_eq!("00ff00".parse::<ColorKey>().unwrap(), ColorKey::Rgb(0, 255, 0));
        assert_eq!("0x0000FF".parse::<ColorKey>().unwrap(), ColorKey::Rgb(0, 0, 255));
    }

    #[test]
    fn rejects_unrecognized_keys() {
        for bad in ["", "red", "#ff00", "#ff00zz", "0x1000000", "#ff000000"] {
            let err = bad.parse::<ColorKey>().unwrap_err();
            assert_eq!(err, EvalError::UnknownColorKey(bad.to_string()));
        }
    }

    #[test]
    fn display_round_trips_through_serde() {
        let key = ColorKey::Rgb(18, 52, 86);
        assert_eq!(key.to_string(), "#123456");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"#123456\"");
        let back: ColorKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<ColorKey>("\"mauve\"").is_err());
    }

    #[test]
    fn packed_form_matches_channels() {
        let key = ColorKey::from_packed(0xab_cd_ef);
        assert_eq!(key, ColorKey::Rgb(0xab, 0xcd, 0xef));
        assert_eq!(key.packed(), Some(0xab_cd_ef));
        assert_eq!(ColorKey::Ink.packed(), None);
    }

    #[test]
    fn quantization_buckets() {
        assert_eq!(quantize_channel(0, 10), 0);
        assert_eq!(quantize_channel(255, 10), 9);
        assert_eq!(quantize_channel(25, 10), 0);
        assert_eq!(quantize_channel(26, 10), 1);
        // A single bucket collapses everything.
        assert_eq!(quantize_rgb(255, 3, 128, 1), [0, 0, 0]);
        // 256 buckets is the identity.
        assert_eq!(quantize_rgb(255, 3, 128, 256), [255, 3, 128]);
    }
}
