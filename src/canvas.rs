use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use tiny_skia::{FilterQuality, Paint, Pattern, Pixmap, PixmapPaint, PixmapRef, SpreadMode, Transform};

use crate::surface::{Color, DrawTarget, FontId, GlyphSurface, Rect, RenderSurface, SurfaceError, TextureId};

pub struct Canvas {
    pub pixmap: Pixmap,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        let pixmap = Pixmap::new(width, height).ok_or(SurfaceError::OutOfMemory { width, height })?;
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn clear(&mut self, color: Color) {
        self.pixmap.fill(tiny_skia::Color::from_rgba8(color[0], color[1], color[2], color[3]));
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        if let Some(rect) = to_skia_rect(rect) {
            let mut paint = Paint::default();
            paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
            paint.anti_alias = false;
            self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);
        }
    }

    /// Copy `src_rect` of `src` into `dst_rect`, scaling bilinearly.
    pub fn draw_scaled(&mut self, src: PixmapRef, src_rect: Rect, dst_rect: Rect) {
        if src_rect.is_empty() {
            return;
        }
        let Some(dst) = to_skia_rect(dst_rect) else { return };
        let sx = dst_rect.w as f32 / src_rect.w as f32;
        let sy = dst_rect.h as f32 / src_rect.h as f32;
        let transform = Transform::from_row(
            sx,
            0.0,
            0.0,
            sy,
            dst_rect.x as f32 - src_rect.x as f32 * sx,
            dst_rect.y as f32 - src_rect.y as f32 * sy,
        );
        let mut paint = Paint::default();
        paint.shader = Pattern::new(src, SpreadMode::Pad, FilterQuality::Bilinear, 1.0, transform);
        self.pixmap.fill_rect(dst, &paint, Transform::identity(), None);
    }

    pub fn draw_image(&mut self, img: PixmapRef, x: i32, y: i32) {
        self.pixmap.draw_pixmap(x, y, img, &PixmapPaint::default(), Transform::identity(), None);
    }

    /// Convert RGBA pixels to BGRA (ARGB8888 in little-endian) for wl_shm
    pub fn pixels_argb8888(&self) -> Vec<u8> {
        let data = self.pixmap.data();
        let mut out = vec![0u8; data.len()];
        for i in (0..data.len()).step_by(4) {
            out[i] = data[i + 2];
            out[i + 1] = data[i + 1];
            out[i + 2] = data[i];
            out[i + 3] = data[i + 3];
        }
        out
    }
}

fn to_skia_rect(rect: Rect) -> Option<tiny_skia::Rect> {
    if rect.is_empty() {
        return None;
    }
    tiny_skia::Rect::from_xywh(rect.x as f32, rect.y as f32, rect.w as f32, rect.h as f32)
}

/// The window side of a software surface: where finished frames go.
pub trait Presenter {
    fn present(&mut self, canvas: &Canvas) -> Result<(), SurfaceError>;
    fn window_position(&self) -> (i32, i32);
    /// Returns the new drawable size when it is known right away.
    fn set_fullscreen(&mut self, display: usize, bounds: Rect, full: bool) -> Option<(u32, u32)>;
}

struct SizedFont {
    font: Rc<fontdue::Font>,
    size: f32,
}

/// CPU renderer: textures are tiny-skia pixmaps, fonts are fontdue faces.
pub struct SoftwareSurface<P: Presenter> {
    presenter: P,
    screen: Canvas,
    textures: Vec<Option<Canvas>>,
    fonts: Vec<Option<SizedFont>>,
    font_cache: HashMap<String, Rc<fontdue::Font>>,
    target: DrawTarget,
}

impl<P: Presenter> SoftwareSurface<P> {
    pub fn new(presenter: P, width: u32, height: u32) -> Result<Self, SurfaceError> {
        Ok(Self {
            presenter,
            screen: Canvas::new(width.max(1), height.max(1))?,
            textures: Vec::new(),
            fonts: Vec::new(),
            font_cache: HashMap::new(),
            target: DrawTarget::Screen,
        })
    }

    fn target_canvas(&mut self) -> Option<&mut Canvas> {
        match self.target {
            DrawTarget::Screen => Some(&mut self.screen),
            DrawTarget::Texture(id) => self.textures.get_mut(id.0 as usize).and_then(Option::as_mut),
        }
    }

    fn load_font(&mut self, path: &str) -> Result<Rc<fontdue::Font>, SurfaceError> {
        if let Some(font) = self.font_cache.get(path) {
            return Ok(font.clone());
        }
        let font = if path.is_empty() {
            discover_font().ok_or_else(|| SurfaceError::FontNotFound { path: "<system monospace>".into() })?
        } else {
            load_font_file(Path::new(path))?
        };
        let font = Rc::new(font);
        self.font_cache.insert(path.to_string(), font.clone());
        Ok(font)
    }
}

impl<P: Presenter> RenderSurface for SoftwareSurface<P> {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, SurfaceError> {
        log::debug!("Creating {}x{} texture", width, height);
        let canvas = Canvas::new(width, height)?;
        let slot = self.textures.iter().position(Option::is_none).unwrap_or_else(|| {
            self.textures.push(None);
            self.textures.len() - 1
        });
        self.textures[slot] = Some(canvas);
        Ok(TextureId(slot as u32))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(slot) = self.textures.get_mut(texture.0 as usize) {
            *slot = None;
        }
        if self.target == DrawTarget::Texture(texture) {
            self.target = DrawTarget::Screen;
        }
    }

    fn open_font(&mut self, path: &str, pixel_size: f32) -> Result<FontId, SurfaceError> {
        log::debug!("Opening font `{}` at {}px", path, pixel_size);
        let font = self.load_font(path)?;
        let sized = SizedFont { font, size: pixel_size.max(1.0) };
        let slot = self.fonts.iter().position(Option::is_none).unwrap_or_else(|| {
            self.fonts.push(None);
            self.fonts.len() - 1
        });
        self.fonts[slot] = Some(sized);
        Ok(FontId(slot as u32))
    }

    fn close_font(&mut self, font: FontId) {
        if let Some(slot) = self.fonts.get_mut(font.0 as usize) {
            *slot = None;
        }
    }

    fn set_draw_target(&mut self, target: DrawTarget) {
        self.target = target;
    }

    fn clear(&mut self, color: Color) {
        if let Some(canvas) = self.target_canvas() {
            canvas.clear(color);
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        if let Some(canvas) = self.target_canvas() {
            canvas.fill_rect(rect, color);
        }
    }

    fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), color: Color) {
        let Some(canvas) = self.target_canvas() else { return };
        if from.1 == to.1 {
            let x = from.0.min(to.0);
            canvas.fill_rect(Rect::new(x, from.1, (to.0 - from.0).abs() + 1, 1), color);
            return;
        }
        let mut pb = tiny_skia::PathBuilder::new();
        pb.move_to(from.0 as f32 + 0.5, from.1 as f32 + 0.5);
        pb.line_to(to.0 as f32 + 0.5, to.1 as f32 + 0.5);
        if let Some(path) = pb.finish() {
            let mut paint = Paint::default();
            paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
            paint.anti_alias = true;
            let stroke = tiny_skia::Stroke { width: 1.0, ..tiny_skia::Stroke::default() };
            canvas.pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
    }

    fn copy_rect(&mut self, src: TextureId, src_rect: Rect, dst_rect: Rect) {
        // Take the source out so the target may borrow the texture table.
        let index = src.0 as usize;
        let Some(source) = self.textures.get_mut(index).and_then(Option::take) else {
            log::warn!("Copy from unknown texture {:?}", src);
            return;
        };
        if let Some(canvas) = self.target_canvas() {
            canvas.draw_scaled(source.pixmap.as_ref(), src_rect, dst_rect);
        }
        self.textures[index] = Some(source);
    }

    fn rasterize_glyph(&mut self, font: FontId, ch: char, color: Color) -> Result<GlyphSurface, SurfaceError> {
        let sized = self
            .fonts
            .get(font.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(SurfaceError::UnknownFont(font))?;
        Ok(rasterize(&sized.font, sized.size, ch, color))
    }

    fn draw_glyph(&mut self, glyph: &GlyphSurface, x: i32, y: i32) {
        let Some(img) = PixmapRef::from_bytes(&glyph.pixels, glyph.width, glyph.height) else { return };
        if let Some(canvas) = self.target_canvas() {
            canvas.draw_image(img, x, y);
        }
    }

    fn present(&mut self) -> Result<(), SurfaceError> {
        self.presenter.present(&self.screen)
    }

    fn size(&self) -> (i32, i32) {
        (self.screen.width() as i32, self.screen.height() as i32)
    }

    fn resize(&mut self, width: i32, height: i32) {
        let (w, h) = (width.max(1) as u32, height.max(1) as u32);
        if w == self.screen.width() && h == self.screen.height() {
            return;
        }
        match Canvas::new(w, h) {
            Ok(canvas) => self.screen = canvas,
            Err(e) => log::error!("Keeping old screen buffer: {}", e),
        }
    }

    fn window_position(&self) -> (i32, i32) {
        self.presenter.window_position()
    }

    fn set_fullscreen(&mut self, display: usize, bounds: Rect, full: bool) {
        if let Some((w, h)) = self.presenter.set_fullscreen(display, bounds, full) {
            self.resize(w as i32, h as i32);
        }
    }
}

/// Rasterize `ch` into a box one advance wide and one line tall, with the
/// glyph sitting on the font's baseline.
fn rasterize(font: &fontdue::Font, size: f32, ch: char, color: Color) -> GlyphSurface {
    let (metrics, coverage) = font.rasterize(ch, size);
    let (ascent, descent) = font
        .horizontal_line_metrics(size)
        .map(|m| (m.ascent, m.descent))
        .unwrap_or((size, 0.0));

    let width = (metrics.advance_width.ceil() as i32).max(metrics.width as i32).max(1) as u32;
    let height = ((ascent - descent).ceil() as i32).max(metrics.height as i32).max(1) as u32;
    let mut pixels = vec![0u8; (width * height * 4) as usize];

    let gx = metrics.xmin.max(0);
    let gy = ascent.round() as i32 - metrics.height as i32 - metrics.ymin;
    for row in 0..metrics.height {
        for col in 0..metrics.width {
            let px = gx + col as i32;
            let py = gy + row as i32;
            if px < 0 || py < 0 || px as u32 >= width || py as u32 >= height {
                continue;
            }
            let alpha = coverage[row * metrics.width + col] as u32 * color[3] as u32 / 255;
            let idx = ((py as u32 * width + px as u32) * 4) as usize;
            pixels[idx] = (color[0] as u32 * alpha / 255) as u8;
            pixels[idx + 1] = (color[1] as u32 * alpha / 255) as u8;
            pixels[idx + 2] = (color[2] as u32 * alpha / 255) as u8;
            pixels[idx + 3] = alpha as u8;
        }
    }
    GlyphSurface { width, height, pixels }
}

pub fn load_font_file(path: &Path) -> Result<fontdue::Font, SurfaceError> {
    let data = std::fs::read(path).map_err(|_| SurfaceError::FontNotFound { path: path.display().to_string() })?;
    fontdue::Font::from_bytes(data, fontdue::FontSettings::default()).map_err(|reason| SurfaceError::FontInvalid {
        path: path.display().to_string(),
        reason: reason.to_string(),
    })
}

/// Find a usable system font, preferring monospace faces.
pub fn discover_font() -> Option<fontdue::Font> {
    let fallback_fonts = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
        "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
        "/usr/share/fonts/dejavu-sans-mono-fonts/DejaVuSansMono.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    ];
    for path in &fallback_fonts {
        if let Ok(font) = load_font_file(Path::new(path)) {
            log::info!("Using font: {}", path);
            return Some(font);
        }
    }

    let search_paths = ["/usr/share/fonts", "/usr/local/share/fonts", "/nix/var/nix/profiles/system/sw/share/X11/fonts"];
    for base in &search_paths {
        if let Some(font) = walk_for_font(Path::new(base), true) {
            return Some(font);
        }
    }
    for base in &search_paths {
        if let Some(font) = walk_for_font(Path::new(base), false) {
            return Some(font);
        }
    }
    log::warn!("No system fonts found");
    None
}

fn walk_for_font(dir: &Path, mono_only: bool) -> Option<fontdue::Font> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(f) = walk_for_font(&path, mono_only) {
                return Some(f);
            }
        } else if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if (ext == "ttf" || ext == "otf") && (!mono_only || path.to_string_lossy().contains("Mono")) {
                if let Ok(font) = load_font_file(&path) {
                    log::info!("Found font: {}", path.display());
                    return Some(font);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullPresenter {
        frames: usize,
    }

    impl Presenter for NullPresenter {
        fn present(&mut self, _canvas: &Canvas) -> Result<(), SurfaceError> {
            self.frames += 1;
            Ok(())
        }

        fn window_position(&self) -> (i32, i32) {
            (0, 0)
        }

        fn set_fullscreen(&mut self, _display: usize, bounds: Rect, full: bool) -> Option<(u32, u32)> {
            if full {
                Some((bounds.w as u32, bounds.h as u32))
            } else {
                Some((800, 600))
            }
        }
    }

    fn pixel(canvas: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let p = canvas.pixmap.pixel(x, y).unwrap();
        [p.red(), p.green(), p.blue(), p.alpha()]
    }

    #[test]
    fn zero_sized_texture_is_out_of_memory() {
        let mut surface = SoftwareSurface::new(NullPresenter { frames: 0 }, 10, 10).unwrap();
        assert!(matches!(surface.create_texture(0, 10), Err(SurfaceError::OutOfMemory { .. })));
    }

    #[test]
    fn texture_slots_are_reused() {
        let mut surface = SoftwareSurface::new(NullPresenter { frames: 0 }, 10, 10).unwrap();
        let a = surface.create_texture(4, 4).unwrap();
        let b = surface.create_texture(4, 4).unwrap();
        surface.destroy_texture(a);
        let c = surface.create_texture(8, 8).unwrap();
        assert_eq!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn copy_rect_scales_into_destination() {
        let mut surface = SoftwareSurface::new(NullPresenter { frames: 0 }, 20, 20).unwrap();
        let tex = surface.create_texture(4, 4).unwrap();
        surface.set_draw_target(DrawTarget::Texture(tex));
        surface.clear([255, 0, 0, 255]);
        surface.set_draw_target(DrawTarget::Screen);
        surface.clear([0, 0, 0, 255]);
        surface.copy_rect(tex, Rect::new(0, 0, 4, 4), Rect::new(0, 0, 20, 10));

        assert_eq!(pixel(&surface.screen, 10, 5), [255, 0, 0, 255]);
        assert_eq!(pixel(&surface.screen, 10, 15), [0, 0, 0, 255]);
        surface.present().unwrap();
        assert_eq!(surface.presenter.frames, 1);
    }

    #[test]
    fn fill_rect_stays_inside_texture() {
        let mut surface = SoftwareSurface::new(NullPresenter { frames: 0 }, 10, 10).unwrap();
        let tex = surface.create_texture(10, 10).unwrap();
        surface.set_draw_target(DrawTarget::Texture(tex));
        surface.fill_rect(Rect::new(0, 4, 10, 2), [0, 0, 255, 255]);
        let canvas = surface.textures[tex.0 as usize].as_ref().unwrap();
        assert_eq!(pixel(canvas, 5, 4), [0, 0, 255, 255]);
        assert_eq!(pixel(canvas, 5, 3), [0, 0, 0, 0]);
        assert_eq!(pixel(canvas, 5, 6), [0, 0, 0, 0]);
    }

    #[test]
    fn windowed_resizes_screen_buffer() {
        let mut surface = SoftwareSurface::new(NullPresenter { frames: 0 }, 1920, 1080).unwrap();
        surface.set_fullscreen(0, Rect::new(0, 0, 1920, 1080), false);
        assert_eq!(surface.size(), (800, 600));
    }

    #[test]
    fn missing_font_file_is_reported() {
        let mut surface = SoftwareSurface::new(NullPresenter { frames: 0 }, 10, 10).unwrap();
        let err = surface.open_font("/nonexistent/flipclock-font.ttf", 12.0).unwrap_err();
        assert!(matches!(err, SurfaceError::FontNotFound { .. }));
    }

    #[test]
    fn argb_swizzle() {
        let mut canvas = Canvas::new(1, 1).unwrap();
        canvas.clear([0x11, 0x22, 0x33, 0xFF]);
        assert_eq!(canvas.pixels_argb8888(), vec![0x33, 0x22, 0x11, 0xFF]);
    }
}
