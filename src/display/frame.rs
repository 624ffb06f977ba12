//! Frame buffer and drawing primitives.
//!
//! A `Frame` is one immutable pixel grid handed from the active app to the
//! render pipeline and on to the panel driver. `Canvas` is the mutable
//! staging surface apps draw into. A compact built-in 3x5 glyph set covers
//! digits, uppercase letters, and a few symbols so apps and the setup
//! screen can show text on small panels without a font stack.

/// One RGB pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale the pixel by a brightness percentage (0-100)
    pub fn scaled(self, percent: u8) -> Rgb {
        let p = percent.min(100) as u16;
        Rgb::new(
            (self.r as u16 * p / 100) as u8,
            (self.g as u16 * p / 100) as u8,
            (self.b as u16 * p / 100) as u8,
        )
    }

    /// Parse a "#RRGGBB" hex color string
    pub fn from_hex(s: &str) -> Option<Rgb> {
        let s = s.strip_prefix('#')?;
        if s.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&s[0..2], 16).ok()?;
        let g = u8::from_str_radix(&s[2..4], 16).ok()?;
        let b = u8::from_str_radix(&s[4..6], 16).ok()?;
        Some(Rgb::new(r, g, b))
    }
}

/// One rendered frame: an immutable width x height RGB grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<Rgb>,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgb {
        self.pixels[(y * self.width + x) as usize]
    }
}

/// Mutable drawing surface for one frame
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<Rgb>,
}

impl Canvas {
    /// Create a black canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgb::BLACK; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Set a single pixel; out-of-bounds coordinates are ignored
    pub fn set_pixel(&mut self, x: i32, y: i32, color: Rgb) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        self.pixels[(y as u32 * self.width + x as u32) as usize] = color;
    }

    /// Fill the whole canvas with one color
    pub fn fill(&mut self, color: Rgb) {
        self.pixels.fill(color);
    }

    /// Draw a one-pixel border around the canvas edge
    pub fn draw_border(&mut self, color: Rgb) {
        let (w, h) = (self.width as i32, self.height as i32);
        for x in 0..w {
            self.set_pixel(x, 0, color);
            self.set_pixel(x, h - 1, color);
        }
        for y in 0..h {
            self.set_pixel(0, y, color);
            self.set_pixel(w - 1, y, color);
        }
    }

    /// Draw text with the built-in 3x5 glyphs at the given origin
    ///
    /// Lowercase input is drawn with the uppercase glyphs; characters
    /// without a glyph render as a blank cell.
    pub fn draw_text(&mut self, x: i32, y: i32, text: &str, color: Rgb) {
        let mut cursor = x;
        for ch in text.chars() {
            let glyph = glyph_for(ch);
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (0b100 >> col) != 0 {
                        self.set_pixel(cursor + col as i32, y + row as i32, color);
                    }
                }
            }
            cursor += GLYPH_WIDTH as i32 + 1;
        }
    }

    /// Draw text horizontally centered at the given row
    pub fn draw_text_centered(&mut self, y: i32, text: &str, color: Rgb) {
        let w = text_width(text) as i32;
        self.draw_text((self.width as i32 - w) / 2, y, text, color);
    }

    /// Freeze the canvas into an immutable frame
    pub fn into_frame(self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            pixels: self.pixels,
        }
    }
}

/// Glyph cell width in pixels
pub const GLYPH_WIDTH: u32 = 3;
/// Glyph cell height in pixels
pub const GLYPH_HEIGHT: u32 = 5;

/// Pixel width of a string drawn with the built-in glyphs
pub fn text_width(text: &str) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        n * (GLYPH_WIDTH + 1) - 1
    }
}

/// 3x5 glyphs, one row per byte, bit 2 = leftmost column
fn glyph_for(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b011, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b110, 0b100, 0b110, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b101, 0b111, 0b111, 0b111, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b110, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ',' => [0b000, 0b000, 0b000, 0b010, 0b100],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '+' => [0b000, 0b010, 0b111, 0b010, 0b000],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        '%' => [0b101, 0b001, 0b010, 0b100, 0b101],
        '!' => [0b010, 0b010, 0b010, 0b000, 0b010],
        '?' => [0b110, 0b001, 0b010, 0b000, 0b010],
        '\'' => [0b010, 0b010, 0b000, 0b000, 0b000],
        _ => [0b000; 5],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_scaling() {
        let p = Rgb::new(200, 100, 50);
        assert_eq!(p.scaled(100), p);
        assert_eq!(p.scaled(50), Rgb::new(100, 50, 25));
        assert_eq!(p.scaled(0), Rgb::BLACK);
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(Rgb::from_hex("#00D4FF"), Some(Rgb::new(0, 0xD4, 0xFF)));
        assert_eq!(Rgb::from_hex("00D4FF"), None);
        assert_eq!(Rgb::from_hex("#xyz"), None);
    }

    #[test]
    fn canvas_clips_out_of_bounds() {
        let mut canvas = Canvas::new(4, 4);
        canvas.set_pixel(-1, 0, Rgb::WHITE);
        canvas.set_pixel(4, 4, Rgb::WHITE);
        let frame = canvas.into_frame();
        assert!(frame.pixels().iter().all(|p| *p == Rgb::BLACK));
    }

    #[test]
    fn text_lights_pixels() {
        let mut canvas = Canvas::new(16, 8);
        canvas.draw_text(0, 0, "1", Rgb::WHITE);
        let frame = canvas.into_frame();
        assert!(frame.pixels().iter().any(|p| *p == Rgb::WHITE));
        // Top-center of the '1' glyph
        assert_eq!(frame.pixel(1, 0), Rgb::WHITE);
    }

    #[test]
    fn text_width_accounts_for_spacing() {
        assert_eq!(text_width(""), 0);
        assert_eq!(text_width("A"), 3);
        assert_eq!(text_width("AB"), 7);
    }
}
