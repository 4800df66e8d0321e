use thiserror::Error;

/// RGBA, straight alpha.
pub type Color = [u8; 4];

pub const TRANSPARENT: Color = [0x00, 0x00, 0x00, 0x00];

/// Integer rectangle in pixels. Position may be negative, size never is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn same_size(&self, other: &Rect) -> bool {
        self.w == other.w && self.h == other.h
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// Half-open containment, so adjacent displays never both claim a point.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    Screen,
    Texture(TextureId),
}

/// A rasterized glyph in premultiplied RGBA, sized to the font's line box
/// so glyphs of one font share a baseline when centred.
#[derive(Debug, Clone)]
pub struct GlyphSurface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("out of memory creating {width}x{height} texture")]
    OutOfMemory { width: u32, height: u32 },

    #[error("font not found: {path}")]
    FontNotFound { path: String },

    #[error("invalid font {path}: {reason}")]
    FontInvalid { path: String, reason: String },

    #[error("unknown font {0:?}")]
    UnknownFont(FontId),

    #[error("failed to present frame: {0}")]
    Present(String),
}

/// Everything the clock core needs from a rendering backend.
///
/// Drawing calls go to the current draw target, which starts out as the
/// screen. `copy_rect` scales when the source and destination sizes differ.
/// The window half of the trait (`size`, `resize`, `window_position`,
/// `set_fullscreen`) describes the single window this surface renders into.
pub trait RenderSurface {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, SurfaceError>;
    fn destroy_texture(&mut self, texture: TextureId);

    /// Open `path` at `pixel_size`. An empty path picks a system font.
    fn open_font(&mut self, path: &str, pixel_size: f32) -> Result<FontId, SurfaceError>;
    fn close_font(&mut self, font: FontId);

    fn set_draw_target(&mut self, target: DrawTarget);
    fn clear(&mut self, color: Color);
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), color: Color);
    fn copy_rect(&mut self, src: TextureId, src_rect: Rect, dst_rect: Rect);
    fn rasterize_glyph(&mut self, font: FontId, ch: char, color: Color) -> Result<GlyphSurface, SurfaceError>;
    fn draw_glyph(&mut self, glyph: &GlyphSurface, x: i32, y: i32);
    fn present(&mut self) -> Result<(), SurfaceError>;

    fn size(&self) -> (i32, i32);
    fn resize(&mut self, width: i32, height: i32);
    fn window_position(&self) -> (i32, i32);
    fn set_fullscreen(&mut self, display: usize, bounds: Rect, full: bool);

    /// Filled box with quarter-circle corners, drawn with horizontal spans
    /// (midpoint circle) and one rectangle for the straight middle band.
    fn fill_rounded_rect(&mut self, rect: Rect, radius: i32, color: Color) {
        let radius = radius.min(rect.w / 2).min(rect.h / 2);
        if radius <= 1 {
            self.fill_rect(rect, color);
            return;
        }

        let top = rect.y + radius;
        let bottom = rect.bottom() - radius;
        let left = rect.x + radius;
        let right = rect.right() - radius - 1;
        let mut x = 0;
        let mut y = radius;
        let mut d = 3 - 2 * radius;
        while x <= y {
            self.draw_line((left - x, top - y), (right + x, top - y), color);
            self.draw_line((left - x, bottom + y - 1), (right + x, bottom + y - 1), color);
            self.draw_line((left - y, top - x), (right + y, top - x), color);
            self.draw_line((left - y, bottom + x - 1), (right + y, bottom + x - 1), color);
            if d < 0 {
                d += 4 * x + 6;
            } else {
                d += 4 * (x - y) + 10;
                y -= 1;
            }
            x += 1;
        }
        self.fill_rect(Rect::new(rect.x, top, rect.w, rect.h - 2 * radius), color);
    }
}
