//! A single split-flap card.
//!
//! A card keeps two snapshots of its face. Every redraw swaps them first, so
//! `previous` always holds what was on screen before the latest change and
//! `current` receives the new face. A flip animates from one to the other:
//! the new upper half and the old lower half stay put while a flap folds
//! down over the middle line.
//!
//! Redrawing and flipping are separate requests. Changing text only marks
//! the face stale; only [`Card::flip`] starts an animation.

use std::f64::consts::FRAC_PI_2;

use crate::config::FlipClockConfig;
use crate::layout;
use crate::surface::{Color, DrawTarget, FontId, Rect, RenderSurface, SurfaceError, TextureId, TRANSPARENT};

/// Byte capacity of card text, terminator included.
pub const MAX_TEXT_LENGTH: usize = 8;
/// Flip duration in milliseconds.
pub const MAX_PROGRESS: u64 = 300;
pub const HALF_PROGRESS: u64 = MAX_PROGRESS / 2;

#[derive(Debug, Clone)]
pub struct CardStyle {
    pub font_path: String,
    pub text_scale: f32,
    pub text_color: Color,
    pub box_color: Color,
    pub background_color: Color,
}

impl CardStyle {
    pub fn from_config(config: &FlipClockConfig) -> Self {
        Self {
            font_path: config.clock.font.clone(),
            text_scale: config.clock.text_scale,
            text_color: config.theme.text_color,
            box_color: config.theme.box_color,
            background_color: config.theme.background_color,
        }
    }
}

/// Which face snapshot a blit reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    Current,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blit {
    pub face: Face,
    pub src: Rect,
    pub dst: Rect,
}

/// What to put on screen for a card at a given point of its flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipFrame {
    AtRest,
    Flipping { upper: Blit, lower: Blit, flap: Blit },
}

/// Vertical scale of the moving flap: 1 at both ends, 0 at the midpoint.
///
/// Equivalent to `cos` of a half rotation swept over the whole flip, folded
/// so the second half unfolds instead of turning inside out.
pub fn flip_scale(progress: u64) -> f64 {
    let progress = progress.min(MAX_PROGRESS) as f64;
    let half = HALF_PROGRESS as f64;
    ((progress - half).abs() / half * FRAC_PI_2).sin()
}

impl FlipFrame {
    /// `progress` is `None` when no flip was ever started.
    pub fn at(rect: Rect, progress: Option<u64>) -> Self {
        let progress = match progress {
            Some(p) if p < MAX_PROGRESS => p,
            _ => return FlipFrame::AtRest,
        };

        // An odd row goes to the lower half.
        let half_h = rect.h / 2;
        let lower_h = rect.h - half_h;
        let top_src = Rect::new(0, 0, rect.w, half_h);
        let bottom_src = Rect::new(0, half_h, rect.w, lower_h);
        let upper = Blit { face: Face::Current, src: top_src, dst: Rect::new(rect.x, rect.y, rect.w, half_h) };
        let lower = Blit { face: Face::Previous, src: bottom_src, dst: Rect::new(rect.x, rect.y + half_h, rect.w, lower_h) };

        let scale = flip_scale(progress);
        let flap = if progress <= HALF_PROGRESS {
            // Old top folds down toward the middle line.
            let flap_h = (half_h as f64 * scale) as i32;
            let y = rect.y + half_h - flap_h;
            Blit { face: Face::Previous, src: top_src, dst: Rect::new(rect.x, y, rect.w, flap_h) }
        } else {
            // New bottom unfolds from the middle line.
            let flap_h = (lower_h as f64 * scale) as i32;
            Blit { face: Face::Current, src: bottom_src, dst: Rect::new(rect.x, rect.y + half_h, rect.w, flap_h) }
        };

        FlipFrame::Flipping { upper, lower, flap }
    }
}

/// The two face snapshots. Swapping exchanges handles, never pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Faces {
    current: TextureId,
    previous: TextureId,
}

impl Faces {
    fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.previous);
    }

    fn get(&self, face: Face) -> TextureId {
        match face {
            Face::Current => self.current,
            Face::Previous => self.previous,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Fonts {
    text: FontId,
    sub: FontId,
}

pub struct Card {
    style: CardStyle,
    rect: Rect,
    faces: Option<Faces>,
    fonts: Option<Fonts>,
    text: String,
    sub_text: Option<String>,
    sub_rect: Rect,
    should_redraw: bool,
    start_tick: Option<u64>,
    radius: i32,
    divider_height: i32,
}

impl Card {
    pub fn new(style: CardStyle) -> Self {
        Self {
            style,
            rect: Rect::default(),
            faces: None,
            fonts: None,
            text: String::new(),
            sub_text: None,
            sub_rect: Rect::default(),
            should_redraw: false,
            start_tick: None,
            radius: 0,
            divider_height: 0,
        }
    }

    #[cfg(test)]
    pub fn rect(&self) -> Rect {
        self.rect
    }

    #[cfg(test)]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[cfg(test)]
    pub fn sub_text(&self) -> Option<&str> {
        self.sub_text.as_deref()
    }

    /// Move or resize the card. A size change reopens both fonts and
    /// recreates both faces; any change requests a redraw.
    pub fn set_rect(&mut self, surface: &mut impl RenderSurface, rect: Rect) -> Result<(), SurfaceError> {
        self.divider_height = rect.h / 100;
        self.radius = rect.h / 10;
        self.sub_rect = layout::sub_label_rect(rect, self.sub_len());

        let old = self.rect;
        self.rect = rect;
        if !rect.same_size(&old) {
            self.close_fonts(surface);
            self.destroy_textures(surface);
            if !rect.is_empty() {
                self.open_fonts(surface)?;
                self.create_textures(surface)?;
            }
        }
        if rect != old {
            self.should_redraw = true;
        }
        Ok(())
    }

    /// Replace the digits. Never flips by itself.
    pub fn set_text(&mut self, text: Option<&str>) {
        let text = text.unwrap_or("");
        assert!(text.len() < MAX_TEXT_LENGTH, "card text `{}` exceeds {} bytes", text, MAX_TEXT_LENGTH - 1);
        self.text.clear();
        self.text.push_str(text);
        self.should_redraw = true;
    }

    /// Replace the corner label (`None` hides it). Never flips by itself.
    pub fn set_sub_text(&mut self, sub_text: Option<&str>) {
        if let Some(text) = sub_text {
            assert!(text.len() < MAX_TEXT_LENGTH, "card label `{}` exceeds {} bytes", text, MAX_TEXT_LENGTH - 1);
        }
        self.sub_text = sub_text.map(str::to_string);
        self.sub_rect.w = self.sub_rect.h * self.sub_len() as i32;
        self.should_redraw = true;
    }

    pub fn flip(&mut self, now: u64) {
        self.start_tick = Some(now);
    }

    #[cfg(test)]
    pub fn is_flipping(&self, now: u64) -> bool {
        self.start_tick.is_some_and(|start| now.saturating_sub(start) < MAX_PROGRESS)
    }

    /// Redraw the face if stale, then composite the card onto the screen.
    pub fn animate(&mut self, surface: &mut impl RenderSurface, now: u64) -> Result<(), SurfaceError> {
        if self.should_redraw {
            self.draw(surface)?;
            self.should_redraw = false;
        }
        let Some(faces) = self.faces else { return Ok(()) };

        let progress = self.start_tick.map(|start| now.saturating_sub(start));
        match FlipFrame::at(self.rect, progress) {
            FlipFrame::AtRest => {
                let local = Rect::new(0, 0, self.rect.w, self.rect.h);
                surface.copy_rect(faces.current, local, self.rect);
            }
            FlipFrame::Flipping { upper, lower, flap } => {
                for blit in [upper, lower, flap] {
                    if !blit.dst.is_empty() {
                        surface.copy_rect(faces.get(blit.face), blit.src, blit.dst);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn destroy(mut self, surface: &mut impl RenderSurface) {
        self.close_fonts(surface);
        self.destroy_textures(surface);
    }

    fn sub_len(&self) -> usize {
        self.sub_text.as_ref().map_or(0, String::len)
    }

    fn open_fonts(&mut self, surface: &mut impl RenderSurface) -> Result<(), SurfaceError> {
        let scale = self.style.text_scale;
        let text = surface.open_font(&self.style.font_path, self.rect.h as f32 * scale)?;
        let sub = surface.open_font(&self.style.font_path, (self.sub_rect.h as f32 * scale).max(1.0))?;
        self.fonts = Some(Fonts { text, sub });
        Ok(())
    }

    fn close_fonts(&mut self, surface: &mut impl RenderSurface) {
        if let Some(fonts) = self.fonts.take() {
            surface.close_font(fonts.text);
            surface.close_font(fonts.sub);
        }
    }

    fn create_textures(&mut self, surface: &mut impl RenderSurface) -> Result<(), SurfaceError> {
        log::debug!("Creating card textures {}x{}", self.rect.w, self.rect.h);
        let (w, h) = (self.rect.w as u32, self.rect.h as u32);
        let current = surface.create_texture(w, h)?;
        let previous = match surface.create_texture(w, h) {
            Ok(previous) => previous,
            Err(e) => {
                surface.destroy_texture(current);
                return Err(e);
            }
        };
        self.faces = Some(Faces { current, previous });
        Ok(())
    }

    fn destroy_textures(&mut self, surface: &mut impl RenderSurface) {
        if let Some(faces) = self.faces.take() {
            surface.destroy_texture(faces.current);
            surface.destroy_texture(faces.previous);
        }
    }

    fn draw(&mut self, surface: &mut impl RenderSurface) -> Result<(), SurfaceError> {
        let (Some(faces), Some(fonts)) = (self.faces.as_mut(), self.fonts) else { return Ok(()) };
        faces.swap();
        let target = faces.current;

        surface.set_draw_target(DrawTarget::Texture(target));
        // Transparent first so the rounded corners show the background.
        surface.clear(TRANSPARENT);
        let local = Rect::new(0, 0, self.rect.w, self.rect.h);
        surface.fill_rounded_rect(local, self.radius, self.style.box_color);
        draw_text(surface, fonts.text, local, &self.text, self.style.text_color)?;
        if let Some(sub_text) = &self.sub_text {
            draw_text(surface, fonts.sub, self.sub_rect, sub_text, self.style.text_color)?;
        }
        let divider = Rect::new(0, (self.rect.h - self.divider_height) / 2, self.rect.w, self.divider_height);
        surface.fill_rect(divider, self.style.background_color);
        surface.set_draw_target(DrawTarget::Screen);
        Ok(())
    }
}

/// Lay `text` out as equal-width slots across `area`, one glyph centred in
/// each, so proportional fonts still read as a fixed-width display.
fn draw_text(
    surface: &mut impl RenderSurface,
    font: FontId,
    area: Rect,
    text: &str,
    color: Color,
) -> Result<(), SurfaceError> {
    let len = text.chars().count() as i32;
    if len == 0 {
        return Ok(());
    }
    let slot = area.w / len;
    for (i, ch) in text.chars().enumerate() {
        let glyph = surface.rasterize_glyph(font, ch, color)?;
        let x = area.x + slot * i as i32 + (slot - glyph.width as i32) / 2;
        let y = area.y + (area.h - glyph.height as i32) / 2;
        surface.draw_glyph(&glyph, x, y);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::fake::{FakeSurface, Op};

    fn style() -> CardStyle {
        CardStyle::from_config(&FlipClockConfig::default())
    }

    fn placed(surface: &mut FakeSurface) -> Card {
        let mut card = Card::new(style());
        card.set_rect(surface, Rect::new(10, 20, 200, 200)).unwrap();
        card.set_text(Some("42"));
        card
    }

    #[test]
    fn scale_boundaries() {
        assert_eq!(flip_scale(0), 1.0);
        assert_eq!(flip_scale(HALF_PROGRESS), 0.0);
        assert_eq!(flip_scale(MAX_PROGRESS), 1.0);
        for p in 0..=MAX_PROGRESS {
            let s = flip_scale(p);
            assert!((0.0..=1.0).contains(&s), "scale({}) = {}", p, s);
        }
    }

    #[test]
    fn scale_is_monotonic_per_half() {
        for p in 1..=HALF_PROGRESS {
            assert!(flip_scale(p) <= flip_scale(p - 1));
        }
        for p in HALF_PROGRESS + 1..=MAX_PROGRESS {
            assert!(flip_scale(p) >= flip_scale(p - 1));
        }
    }

    #[test]
    fn scale_matches_cosine_sweep() {
        for p in [0u64, 40, 100, 149, 151, 220, 299] {
            let angle = if p <= HALF_PROGRESS {
                std::f64::consts::PI * p as f64 / MAX_PROGRESS as f64
            } else {
                std::f64::consts::PI * (1.0 - p as f64 / MAX_PROGRESS as f64)
            };
            assert!((flip_scale(p) - angle.cos()).abs() < 1e-9);
        }
    }

    #[test]
    fn finished_or_unstarted_flip_is_at_rest() {
        let rect = Rect::new(0, 0, 100, 100);
        assert_eq!(FlipFrame::at(rect, None), FlipFrame::AtRest);
        assert_eq!(FlipFrame::at(rect, Some(MAX_PROGRESS)), FlipFrame::AtRest);
        assert_eq!(FlipFrame::at(rect, Some(10_000)), FlipFrame::AtRest);
    }

    #[test]
    fn flap_collapses_then_unfolds() {
        let rect = Rect::new(50, 60, 100, 100);
        let FlipFrame::Flipping { upper, lower, flap } = FlipFrame::at(rect, Some(0)) else { panic!() };
        assert_eq!(upper.face, Face::Current);
        assert_eq!(upper.dst, Rect::new(50, 60, 100, 50));
        assert_eq!(lower.face, Face::Previous);
        assert_eq!(lower.dst, Rect::new(50, 110, 100, 50));
        assert_eq!(flap.face, Face::Previous);
        assert_eq!(flap.dst, Rect::new(50, 60, 100, 50));

        let FlipFrame::Flipping { flap, .. } = FlipFrame::at(rect, Some(HALF_PROGRESS)) else { panic!() };
        assert_eq!(flap.dst.h, 0);
        assert_eq!(flap.dst.y, 110);

        let FlipFrame::Flipping { flap, .. } = FlipFrame::at(rect, Some(250)) else { panic!() };
        assert_eq!(flap.face, Face::Current);
        assert_eq!(flap.src, Rect::new(0, 50, 100, 50));
        assert_eq!(flap.dst.y, 110);
        assert!(flap.dst.h > 0 && flap.dst.h < 50);
    }

    #[test]
    fn odd_height_covers_every_row() {
        let rect = Rect::new(0, 10, 80, 101);
        for progress in [0, 100, 200, 299] {
            let FlipFrame::Flipping { upper, lower, flap } = FlipFrame::at(rect, Some(progress)) else { panic!() };
            assert_eq!(upper.dst.y, 10);
            assert_eq!(lower.dst.y, upper.dst.y + upper.dst.h);
            assert_eq!(upper.dst.h + lower.dst.h, 101);
            assert_eq!(lower.src.h, lower.dst.h);
            assert!(flap.dst.y >= rect.y && flap.dst.y + flap.dst.h <= rect.y + rect.h);
        }
        let FlipFrame::Flipping { flap, .. } = FlipFrame::at(rect, Some(0)) else { panic!() };
        assert_eq!(flap.dst, Rect::new(0, 10, 80, 50));
        let FlipFrame::Flipping { flap, .. } = FlipFrame::at(rect, Some(299)) else { panic!() };
        assert_eq!(flap.src, Rect::new(0, 50, 80, 51));
        assert_eq!(flap.dst.y, 60);
    }

    #[test]
    fn set_rect_sizes_both_faces() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = Card::new(style());
        card.set_rect(&mut surface, Rect::new(0, 0, 120, 90)).unwrap();
        let faces = card.faces.unwrap();
        assert_eq!(surface.textures[&faces.current], (120, 90));
        assert_eq!(surface.textures[&faces.previous], (120, 90));
        assert_eq!(surface.fonts_opened, 2);

        card.set_rect(&mut surface, Rect::new(0, 0, 300, 200)).unwrap();
        let faces = card.faces.unwrap();
        assert_eq!(surface.textures.len(), 2);
        assert_eq!(surface.textures[&faces.current], (300, 200));
        assert_eq!(surface.textures[&faces.previous], (300, 200));
        assert_eq!(surface.fonts_opened, 4);
        assert_eq!(surface.fonts_closed, 2);
    }

    #[test]
    fn moving_redraws_without_new_resources() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = placed(&mut surface);
        card.animate(&mut surface, 0).unwrap();
        assert!(!card.should_redraw);

        card.set_rect(&mut surface, Rect::new(99, 20, 200, 200)).unwrap();
        assert!(card.should_redraw);
        assert_eq!(surface.textures_created, 2);

        card.animate(&mut surface, 0).unwrap();
        card.set_rect(&mut surface, Rect::new(99, 20, 200, 200)).unwrap();
        assert!(!card.should_redraw);
    }

    #[test]
    fn font_sizes_follow_text_scale() {
        let mut surface = FakeSurface::new(800, 600);
        let mut style = style();
        style.text_scale = 0.5;
        let mut card = Card::new(style);
        card.set_rect(&mut surface, Rect::new(0, 0, 200, 200)).unwrap();
        let mut sizes: Vec<f32> = surface.fonts.values().copied().collect();
        sizes.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sizes, vec![10.0, 100.0]);
    }

    #[test]
    fn texture_failure_propagates() {
        let mut surface = FakeSurface::new(800, 600);
        surface.fail_textures = true;
        let mut card = Card::new(style());
        let err = card.set_rect(&mut surface, Rect::new(0, 0, 10, 10)).unwrap_err();
        assert!(matches!(err, SurfaceError::OutOfMemory { .. }));
    }

    #[test]
    fn set_text_never_flips() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = placed(&mut surface);
        card.set_text(Some("43"));
        card.set_sub_text(Some("PM"));
        assert!(card.start_tick.is_none());
        assert!(!card.is_flipping(5));
    }

    #[test]
    fn redraw_swaps_faces() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = placed(&mut surface);
        let before = card.faces.unwrap();
        card.animate(&mut surface, 0).unwrap();
        let after = card.faces.unwrap();
        assert_eq!(after.current, before.previous);
        assert_eq!(after.previous, before.current);
        assert_eq!(surface.glyphs_on(after.current), "42");

        // No pending change: faces stay where they are.
        card.animate(&mut surface, 1).unwrap();
        assert_eq!(card.faces.unwrap(), after);
    }

    #[test]
    fn face_is_drawn_in_order() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = placed(&mut surface);
        card.set_sub_text(Some("AM"));
        card.animate(&mut surface, 0).unwrap();
        let current = card.faces.unwrap().current;
        let target = DrawTarget::Texture(current);

        assert_eq!(surface.ops[0], Op::Clear { target, color: TRANSPARENT });
        assert_eq!(surface.glyphs_on(current), "42AM");
        let divider = Rect::new(0, 99, 200, 2);
        let divider_at = surface.ops.iter().position(|op| *op == Op::Fill { target, rect: divider }).unwrap();
        let last_glyph = surface.ops.iter().rposition(|op| matches!(op, Op::Glyph { .. })).unwrap();
        assert!(divider_at > last_glyph);
    }

    #[test]
    fn at_rest_blits_current_whole() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = placed(&mut surface);
        card.animate(&mut surface, 0).unwrap();
        let current = card.faces.unwrap().current;
        assert_eq!(surface.copies(), vec![(current, Rect::new(0, 0, 200, 200), Rect::new(10, 20, 200, 200))]);
    }

    #[test]
    fn mid_flip_composites_three_layers() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = placed(&mut surface);
        card.flip(1_000);
        card.animate(&mut surface, 1_050).unwrap();
        let faces = card.faces.unwrap();
        let copies = surface.copies();
        assert_eq!(copies.len(), 3);
        assert_eq!(copies[0].0, faces.current);
        assert_eq!(copies[1].0, faces.previous);
        assert_eq!(copies[2].0, faces.previous);

        surface.ops.clear();
        card.animate(&mut surface, 1_000 + MAX_PROGRESS).unwrap();
        assert_eq!(surface.copies().len(), 1);
        assert!(!card.is_flipping(1_000 + MAX_PROGRESS));
    }

    #[test]
    fn sub_label_width_tracks_length() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = placed(&mut surface);
        card.set_sub_text(Some("AM"));
        assert_eq!(card.sub_rect.w, 40);
        card.set_sub_text(None);
        assert_eq!(card.sub_rect.w, 0);
        assert_eq!(card.sub_text(), None);
    }

    #[test]
    #[should_panic]
    fn oversized_text_fails_fast() {
        let mut card = Card::new(style());
        card.set_text(Some("12345678"));
    }

    #[test]
    fn destroy_releases_everything() {
        let mut surface = FakeSurface::new(800, 600);
        let card = placed(&mut surface);
        card.destroy(&mut surface);
        assert!(surface.textures.is_empty());
        assert!(surface.fonts.is_empty());
    }

    #[test]
    fn empty_rect_holds_no_resources() {
        let mut surface = FakeSurface::new(800, 600);
        let mut card = Card::new(style());
        card.set_rect(&mut surface, Rect::new(5, 5, 0, 0)).unwrap();
        card.set_text(Some("00"));
        card.animate(&mut surface, 0).unwrap();
        assert!(surface.textures.is_empty());
        assert!(surface.copies().is_empty());
    }
}
