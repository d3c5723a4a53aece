//! Mood palettes and contrast rules for composed infographics.

use std::fmt;

use crate::domain::blueprint::Mood;

/// Minimum contrast ratio between body text and the background.
const MIN_TEXT_CONTRAST: f64 = 4.5;
const NEAR_BLACK: Rgb = Rgb::from_u32(0x111111);
const WHITE: Rgb = Rgb::from_u32(0xffffff);
const BLACK: Rgb = Rgb::from_u32(0x000000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    r: u8,
    g: u8,
    b: u8,
}

impl Rgb {
    pub const fn from_u32(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xff) as u8,
            g: ((value >> 8) & 0xff) as u8,
            b: (value & 0xff) as u8,
        }
    }

    /// Accepts `#rgb` and `#rrggbb`, with or without the leading `#`.
    pub fn parse(raw: &str) -> Option<Self> {
        let hex = raw.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        let expanded = match hex.len() {
            3 => hex.chars().flat_map(|ch| [ch, ch]).collect::<String>(),
            6 => hex.to_string(),
            _ => return None,
        };
        u32::from_str_radix(&expanded, 16).ok().map(Self::from_u32)
    }

    /// WCAG relative luminance.
    pub fn luminance(self) -> f64 {
        fn channel(value: u8) -> f64 {
            let c = f64::from(value) / 255.0;
            if c <= 0.03928 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        0.2126 * channel(self.r) + 0.7152 * channel(self.g) + 0.0722 * channel(self.b)
    }

    pub fn contrast(self, other: Rgb) -> f64 {
        let (a, b) = (self.luminance(), other.luminance());
        let (light, dark) = if a >= b { (a, b) } else { (b, a) };
        (light + 0.05) / (dark + 0.05)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub primary: Rgb,
    pub secondary: Rgb,
    pub accent: Rgb,
    pub background: Rgb,
    pub text: Rgb,
    pub stroke: Rgb,
}

impl Palette {
    const fn hex(values: [u32; 6]) -> Self {
        Self {
            primary: Rgb::from_u32(values[0]),
            secondary: Rgb::from_u32(values[1]),
            accent: Rgb::from_u32(values[2]),
            background: Rgb::from_u32(values[3]),
            text: Rgb::from_u32(values[4]),
            stroke: Rgb::from_u32(values[5]),
        }
    }

    pub fn for_mood(mood: Mood) -> Self {
        match mood {
            Mood::Professional => {
                Self::hex([0x2c3e50, 0xecf0f1, 0x3498db, 0xffffff, 0x34495e, 0x2c3e50])
            }
            Mood::Playful => Self::hex([0xe67e22, 0xf1c40f, 0xe74c3c, 0xfdfbf7, 0x2c3e50, 0xd35400]),
            Mood::Urgent => Self::hex([0xc0392b, 0xe74c3c, 0xf39c12, 0xfff5f5, 0x2c3e50, 0xc0392b]),
            Mood::Calm => Self::hex([0x16a085, 0xa3e4d7, 0x2ecc71, 0xf0fdf4, 0x2c3e50, 0x16a085]),
            Mood::Neutral => Self::hex([0x333333, 0xeeeeee, 0x007bff, 0xffffff, 0x222222, 0x333333]),
        }
    }

    /// Mood palette with the blueprint's color overrides applied. Invalid overrides are
    /// ignored, and text that would be unreadable on the background is replaced.
    pub fn resolve(mood: Mood, accent: Option<&str>, text: Option<&str>) -> Self {
        let mut palette = Self::for_mood(mood);
        if let Some(accent) = accent.and_then(Rgb::parse) {
            palette.accent = accent;
        }
        if let Some(text) = text.and_then(Rgb::parse) {
            palette.text = text;
        }
        if palette.text.contrast(palette.background) < MIN_TEXT_CONTRAST {
            palette.text = if NEAR_BLACK.contrast(palette.background)
                >= WHITE.contrast(palette.background)
            {
                NEAR_BLACK
            } else {
                WHITE
            };
        }
        palette
    }

    /// Text color for numbered badges drawn on the accent.
    pub fn badge_text(&self) -> Rgb {
        if self.accent.luminance() > 0.179 {
            BLACK
        } else {
            WHITE
        }
    }
}
