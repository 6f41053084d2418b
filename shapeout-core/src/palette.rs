//! Qualitative colour palette for per-dataset contour colours.

/// RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Creates a colour from its components.
    #[must_use]
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `#rrggbb` representation stored in `plotting.contour color`.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Parses `#rrggbb`.
    #[must_use]
    pub fn from_hex(text: &str) -> Option<Self> {
        let hex = text.strip_prefix('#')?;
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        Some(Self::from_rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

/// Colour used when an analysis holds a single dataset.
pub const DEFAULT_COLOR: Color = Color::from_rgb(0x00, 0x00, 0x00);

const QUALITATIVE: [Color; 10] = [
    Color::from_rgb(0x1f, 0x77, 0xb4),
    Color::from_rgb(0xff, 0x7f, 0x0e),
    Color::from_rgb(0x2c, 0xa0, 0x2c),
    Color::from_rgb(0xd6, 0x27, 0x28),
    Color::from_rgb(0x94, 0x67, 0xbd),
    Color::from_rgb(0x8c, 0x56, 0x4b),
    Color::from_rgb(0xe3, 0x77, 0xc2),
    Color::from_rgb(0x7f, 0x7f, 0x7f),
    Color::from_rgb(0xbc, 0xbd, 0x22),
    Color::from_rgb(0x17, 0xbe, 0xcf),
];

/// Samples the qualitative palette with `steps` colours.
///
/// Up to ten steps are distinct palette entries, after that it repeats.
#[must_use]
pub fn qualitative(steps: usize) -> Vec<Color> {
    (0..steps)
        .map(|i| QUALITATIVE[i % QUALITATIVE.len()])
        .collect()
}
