//! Color resolution
//!
//! The emulator describes every cell color as an RGB triple plus an optional
//! palette origin. The display underneath may only support a small indexed
//! palette, so each color is resolved to a display slot here.
//!
//! Display slots are 1-based: slot `0` means "use the display default",
//! slot `n` selects palette entry `n - 1`.
//!
//! ```text
//!   TermColor { r, g, b, index }
//!        |
//!        +-- index in 1..=16 and colors >= 16  -> slot = index
//!        +-- index in 1..=16 and colors < 16   -> 8-color slot, bright -> BOLD
//!        +-- colors >= 256, r == g == b        -> grey ramp (233..=256, 17, 232)
//!        +-- colors >= 256                     -> 6x6x6 cube (17 + 36r + 6g + b)
//!        +-- otherwise                         -> 0 (display default)
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Palette origin of a color that came from the default fg/bg
pub const INDEX_DEFAULT: u8 = 0;
/// Palette origin of a true RGB color
pub const INDEX_NONE: u8 = 255;

/// A color as the emulator reports it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TermColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// 1-based ANSI index (1..=16), `INDEX_DEFAULT` or `INDEX_NONE`
    pub index: u8,
}

impl TermColor {
    pub const fn new(r: u8, g: u8, b: u8, index: u8) -> Self {
        Self { r, g, b, index }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, INDEX_NONE)
    }

    /// Exact channel equality, ignoring the palette origin
    pub fn same_rgb(&self, other: &TermColor) -> bool {
        self.r == other.r && self.g == other.g && self.b == other.b
    }

    /// Channel and palette origin equality
    pub fn same_color(&self, other: &TermColor) -> bool {
        self.same_rgb(other) && self.index == other.index
    }

    /// `#rrggbb`
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn is_default(&self) -> bool {
        self.index == INDEX_DEFAULT
    }
}

bitflags! {
    /// Style flags, numbered like host highlight attributes so the value can
    /// be written to dumps directly.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StyleFlags: u8 {
        const INVERSE       = 0x01;
        const BOLD          = 0x02;
        const ITALIC        = 0x04;
        const UNDERLINE     = 0x08;
        const STRIKETHROUGH = 0x80;
    }
}

impl StyleFlags {
    /// Parse a highlight attribute number, dropping bits the emulator has no
    /// counterpart for.
    pub fn from_hl(value: u32) -> Self {
        Self::from_bits_truncate((value & 0xff) as u8)
    }

    pub fn to_hl(self) -> u32 {
        self.bits() as u32
    }

    /// Look up a flag by the name the host API uses.
    pub fn from_attr_name(name: &str) -> Option<Self> {
        match name {
            "bold" => Some(Self::BOLD),
            "italic" => Some(Self::ITALIC),
            "underline" => Some(Self::UNDERLINE),
            "strike" => Some(Self::STRIKETHROUGH),
            "reverse" => Some(Self::INVERSE),
            _ => None,
        }
    }
}

/// The 16 ANSI colors
const ANSI_TABLE: [TermColor; 16] = [
    TermColor::new(0, 0, 0, 1),       // black
    TermColor::new(224, 0, 0, 2),     // dark red
    TermColor::new(0, 224, 0, 3),     // dark green
    TermColor::new(224, 224, 0, 4),   // dark yellow
    TermColor::new(0, 0, 224, 5),     // dark blue
    TermColor::new(224, 0, 224, 6),   // dark magenta
    TermColor::new(0, 224, 224, 7),   // dark cyan
    TermColor::new(224, 224, 224, 8), // light grey
    TermColor::new(128, 128, 128, 9), // dark grey
    TermColor::new(255, 64, 64, 10),  // light red
    TermColor::new(64, 255, 64, 11),  // light green
    TermColor::new(255, 255, 64, 12), // yellow
    TermColor::new(64, 64, 255, 13),  // light blue
    TermColor::new(255, 64, 255, 14), // light magenta
    TermColor::new(64, 255, 255, 15), // light cyan
    TermColor::new(255, 255, 255, 16), // white
];

const CUBE_VALUE: [u8; 6] = [0x00, 0x5F, 0x87, 0xAF, 0xD7, 0xFF];

const GREY_RAMP: [u8; 24] = [
    0x08, 0x12, 0x1C, 0x26, 0x30, 0x3A, 0x44, 0x4E, 0x58, 0x62, 0x6C, 0x76, 0x80, 0x8A, 0x94,
    0x9E, 0xA8, 0xB2, 0xBC, 0xC6, 0xD0, 0xDA, 0xE4, 0xEE,
];

const GREY_CUTOFF: [u8; 23] = [
    0x0D, 0x17, 0x21, 0x2B, 0x35, 0x3F, 0x49, 0x53, 0x5D, 0x67, 0x71, 0x7B, 0x85, 0x8F, 0x99,
    0xA3, 0xAD, 0xB7, 0xC1, 0xCB, 0xD5, 0xDF, 0xE9,
];

const CUBE_CUTOFF: [u8; 5] = [0x2F, 0x73, 0x9B, 0xC3, 0xEB];

/// Convert a palette number (0..=255) to RGB, xterm compatible.
///
/// The first 16 entries keep their ANSI origin so that a redefined palette
/// still applies when the color is resolved again.
pub fn index_to_rgb(nr: u8) -> TermColor {
    match nr {
        0..=15 => ANSI_TABLE[nr as usize],
        16..=231 => {
            let idx = (nr - 16) as usize;
            TermColor::rgb(
                CUBE_VALUE[idx / 36 % 6],
                CUBE_VALUE[idx / 6 % 6],
                CUBE_VALUE[idx % 6],
            )
        }
        _ => {
            let v = GREY_RAMP[(nr - 232) as usize];
            TermColor::rgb(v, v, v)
        }
    }
}

/// Resolve a color to a 1-based display slot.
///
/// Returns the slot and whether bold must be added to emulate a bright
/// foreground on an 8-color display.
pub fn color_to_index(color: &TermColor, foreground: bool, colors: u16) -> (u16, bool) {
    if color.index != INDEX_NONE {
        if colors >= 16 {
            return (color.index as u16, false);
        }
        if color.index == INDEX_DEFAULT {
            return (0, false);
        }
        if color.index <= 16 {
            let n = color.index - 1;
            let bold = foreground && n >= 8;
            return ((n & 7) as u16 + 1, bold);
        }
    }

    if colors >= 256 {
        let (r, g, b) = (color.r, color.g, color.b);
        if r == g && r == b {
            if r < 5 {
                return (17, false);
            }
            if r > 245 {
                return (232, false);
            }
            let slot = GREY_CUTOFF
                .iter()
                .position(|&cut| r < cut)
                .map(|i| i as u16 + 233)
                .unwrap_or(256);
            return (slot, false);
        }
        let quantize = |v: u8| CUBE_CUTOFF.iter().position(|&cut| v < cut).unwrap_or(5) as u16;
        return (17 + quantize(r) * 36 + quantize(g) * 6 + quantize(b), false);
    }
    (0, false)
}

/// Resolved display attribute for one cell
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplayAttr {
    pub flags: StyleFlags,
    /// 1-based foreground slot, 0 = display default
    pub fg: u16,
    /// 1-based background slot, 0 = display default
    pub bg: u16,
}

impl DisplayAttr {
    fn slot_to_crossterm(slot: u16) -> crossterm::style::Color {
        match slot {
            0 => crossterm::style::Color::Reset,
            n => crossterm::style::Color::AnsiValue((n - 1).min(255) as u8),
        }
    }

    pub fn fg_crossterm(&self) -> crossterm::style::Color {
        Self::slot_to_crossterm(self.fg)
    }

    pub fn bg_crossterm(&self) -> crossterm::style::Color {
        Self::slot_to_crossterm(self.bg)
    }
}

/// Dark or light display background
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    #[default]
    Dark,
    Light,
}

/// Everything the resolver needs to know about the display palette
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColorContext {
    /// Number of palette entries the display supports
    pub colors: u16,
    pub background: Background,
    /// "Terminal" group colors, palette numbers
    pub terminal_fg: Option<u8>,
    pub terminal_bg: Option<u8>,
    /// Display normal colors, palette numbers
    pub normal_fg: Option<u8>,
    pub normal_bg: Option<u8>,
}

impl Default for ColorContext {
    fn default() -> Self {
        Self {
            colors: 256,
            background: Background::Dark,
            terminal_fg: None,
            terminal_bg: None,
            normal_fg: None,
            normal_bg: None,
        }
    }
}

impl ColorContext {
    /// Resolve a cell's style and colors to a display attribute.
    pub fn cell_to_attr(&self, flags: StyleFlags, fg: &TermColor, bg: &TermColor) -> DisplayAttr {
        let (mut fg_slot, bold_fg) = color_to_index(fg, true, self.colors);
        let (mut bg_slot, _) = color_to_index(bg, false, self.colors);

        if self.colors >= 16 {
            if fg_slot == 0 {
                if let Some(n) = self.terminal_fg {
                    fg_slot = n as u16 + 1;
                }
            }
            if bg_slot == 0 {
                if let Some(n) = self.terminal_bg {
                    bg_slot = n as u16 + 1;
                }
            }
        }

        let mut flags = flags;
        if bold_fg {
            flags |= StyleFlags::BOLD;
        }
        DisplayAttr {
            flags,
            fg: fg_slot,
            bg: bg_slot,
        }
    }

    /// Default foreground and background for a new session.
    pub fn default_colors(&self) -> (TermColor, TermColor) {
        let (fgval, bgval) = match self.background {
            Background::Light => (0, 255),
            Background::Dark => (255, 0),
        };
        let mut fg = TermColor::new(fgval, fgval, fgval, INDEX_DEFAULT);
        let mut bg = TermColor::new(bgval, bgval, bgval, INDEX_DEFAULT);

        let terminal_group = self.terminal_fg.is_some() || self.terminal_bg.is_some();
        if terminal_group && self.colors >= 16 {
            if let Some(n) = self.terminal_fg {
                fg = index_to_rgb(n);
            }
            if let Some(n) = self.terminal_bg {
                bg = index_to_rgb(n);
            }
        } else {
            if let Some(n) = self.normal_fg {
                fg = index_to_rgb(n);
            }
            if let Some(n) = self.normal_bg {
                bg = index_to_rgb(n);
            }
        }
        (fg, bg)
    }
}

/// Color as written in a dump: `rrggbb` followed by the decimal index.
pub fn dump_color(color: &TermColor) -> String {
    format!("{:02x}{:02x}{:02x}{}", color.r, color.g, color.b, color.index)
}
