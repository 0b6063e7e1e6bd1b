//! Named colour themes, mirroring the dashboard's theme switcher.
//! The selected name is persisted in the config file.

use ratatui::style::Color;

/// Themes in the order `T` cycles through them
pub const THEME_NAMES: [&str; 4] = ["default", "data-able", "teal-minimalist", "dark-enterprise"];

/// Theme colors for the UI
#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub name: &'static str,
    pub label: &'static str,
    pub is_dark: bool,
    pub accent: Color,       // Active borders, highlights, key hints
    pub danger: Color,       // Errors, failed links
    pub success: Color,      // Connected sessions and the linked overlay
    pub warning: Color,      // Expiring countdown, confirmations
    pub text: Color,
    pub text_dim: Color,
    pub bg: Color,
    pub bg_selected: Color,
    pub inactive: Color,     // Inactive borders
    pub header: Color,       // Table headers
}

impl Default for Theme {
    fn default() -> Self {
        Self::named("default", None)
    }
}

impl Theme {
    /// Build a theme by name; unknown names fall back to `default`.
    /// `accent` overrides the primary colour when it parses as a hex colour.
    pub fn named(name: &str, accent: Option<&str>) -> Self {
        let mut theme = match name {
            "data-able" => Self::light("data-able", "Data Able", Color::Rgb(0x40, 0x99, 0xff)),
            "teal-minimalist" => Self::light("teal-minimalist", "Teal Minimalist", Color::Rgb(0x00, 0xbc, 0xd4)),
            "dark-enterprise" => Self::dark("dark-enterprise", "Dark Enterprise", Color::Rgb(0x73, 0x67, 0xf0)),
            _ => Self::light("default", "Default", Color::Rgb(0x3b, 0x7d, 0xdd)),
        };

        if let Some(color) = accent.and_then(Self::parse_hex_color) {
            theme.accent = color;
        }
        theme
    }

    fn light(name: &'static str, label: &'static str, primary: Color) -> Self {
        Self {
            name,
            label,
            is_dark: false,
            accent: primary,
            danger: Color::Rgb(0xdc, 0x35, 0x45),
            success: Color::Rgb(0x28, 0xa7, 0x45),
            warning: Color::Rgb(0xe6, 0x8e, 0x0d),
            text: Color::Rgb(0x21, 0x25, 0x29),
            text_dim: Color::Rgb(0x6c, 0x75, 0x7d),
            bg: Color::Rgb(0xf5, 0xf7, 0xfb),
            bg_selected: Color::Rgb(0xdd, 0xe3, 0xee),
            inactive: Color::Rgb(0xad, 0xb5, 0xbd),
            header: primary,
        }
    }

    fn dark(name: &'static str, label: &'static str, primary: Color) -> Self {
        Self {
            name,
            label,
            is_dark: true,
            accent: primary,
            danger: Color::Rgb(0xea, 0x54, 0x55),
            success: Color::Rgb(0x28, 0xc7, 0x6f),
            warning: Color::Rgb(0xff, 0x9f, 0x43),
            text: Color::Rgb(0xd0, 0xd2, 0xd6),
            text_dim: Color::Rgb(0x8a, 0x8d, 0x93),
            bg: Color::Rgb(0x28, 0x30, 0x46),
            bg_selected: Color::Rgb(0x3b, 0x42, 0x53),
            inactive: Color::Rgb(0x59, 0x5d, 0x6b),
            header: primary,
        }
    }

    /// Name of the theme after `current` in cycling order
    pub fn next_name(current: &str) -> &'static str {
        let idx = THEME_NAMES.iter().position(|n| *n == current).unwrap_or(0);
        THEME_NAMES[(idx + 1) % THEME_NAMES.len()]
    }

    /// Parse a hex color string (#RRGGBB or #RGB)
    pub fn parse_hex_color(s: &str) -> Option<Color> {
        let s = s.trim().trim_start_matches('#');

        if !s.is_ascii() {
            return None;
        }
        if s.len() == 6 {
            let r = u8::from_str_radix(&s[0..2], 16).ok()?;
            let g = u8::from_str_radix(&s[2..4], 16).ok()?;
            let b = u8::from_str_radix(&s[4..6], 16).ok()?;
            Some(Color::Rgb(r, g, b))
        } else if s.len() == 3 {
            let r = u8::from_str_radix(&s[0..1], 16).ok()? * 17;
            let g = u8::from_str_radix(&s[1..2], 16).ok()? * 17;
            let b = u8::from_str_radix(&s[2..3], 16).ok()? * 17;
            Some(Color::Rgb(r, g, b))
        } else {
            None
        }
    }
}
