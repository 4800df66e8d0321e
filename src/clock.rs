use crate::card::{Card, CardStyle};
use crate::config::FlipClockConfig;
use crate::layout::{self, Layout};
use crate::surface::{DrawTarget, Rect, RenderSurface, SurfaceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Resized { width: i32, height: i32 },
    Minimized,
    Restored,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Hour,
    Minute,
    Second,
}

/// One window of cards on one display.
pub struct Clock<S: RenderSurface> {
    surface: S,
    style: CardStyle,
    card_scale: f32,
    hour: Card,
    minute: Card,
    second: Option<Card>,
    width: i32,
    height: i32,
    display: usize,
    full: bool,
    waiting: bool,
}

impl<S: RenderSurface> Clock<S> {
    pub fn new(surface: S, display: usize, full: bool, config: &FlipClockConfig) -> Result<Self, SurfaceError> {
        let style = CardStyle::from_config(config);
        let (width, height) = surface.size();
        let mut clock = Self {
            surface,
            hour: Card::new(style.clone()),
            minute: Card::new(style.clone()),
            second: config.clock.show_second.then(|| Card::new(style.clone())),
            style,
            card_scale: config.clock.card_scale,
            width,
            height,
            display,
            full,
            waiting: false,
        };
        clock.update_layout()?;
        Ok(clock)
    }

    #[cfg(test)]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[cfg(test)]
    pub fn display(&self) -> usize {
        self.display
    }

    #[cfg(test)]
    pub fn is_full(&self) -> bool {
        self.full
    }

    #[cfg(test)]
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    #[cfg(test)]
    pub fn card(&self, field: Field) -> Option<&Card> {
        match field {
            Field::Hour => Some(&self.hour),
            Field::Minute => Some(&self.minute),
            Field::Second => self.second.as_ref(),
        }
    }

    fn card_mut(&mut self, field: Field) -> Option<&mut Card> {
        match field {
            Field::Hour => Some(&mut self.hour),
            Field::Minute => Some(&mut self.minute),
            Field::Second => self.second.as_mut(),
        }
    }

    /// Re-place every card for the current surface size.
    pub fn update_layout(&mut self) -> Result<(), SurfaceError> {
        let Layout { hour, minute, second, space } =
            layout::compute_layout(self.width, self.height, self.second.is_some(), self.card_scale);
        log::debug!("Layout {}x{}: card {}x{}, gap {}", self.width, self.height, hour.w, hour.h, space);

        self.hour.set_rect(&mut self.surface, hour)?;
        self.minute.set_rect(&mut self.surface, minute)?;
        if let (Some(card), Some(rect)) = (self.second.as_mut(), second) {
            card.set_rect(&mut self.surface, rect)?;
        }
        Ok(())
    }

    /// Add or drop the seconds card. A new card starts blank; the caller
    /// fills in its text.
    pub fn set_show_second(&mut self, show: bool) -> Result<(), SurfaceError> {
        match (show, self.second.is_some()) {
            (true, false) => self.second = Some(Card::new(self.style.clone())),
            (false, true) => {
                if let Some(card) = self.second.take() {
                    card.destroy(&mut self.surface);
                }
            }
            _ => return Ok(()),
        }
        self.update_layout()
    }

    /// Go fullscreen on the bound display or back to a window. The bound
    /// display is re-picked from the window centre when it no longer holds it.
    pub fn set_fullscreen(&mut self, full: bool, displays: &[Rect]) -> Result<(), SurfaceError> {
        let (x, y) = self.surface.window_position();
        let center = Rect::new(x, y, self.width, self.height).center();
        let still_there = displays.get(self.display).is_some_and(|d| d.contains(center.0, center.1));
        if !still_there {
            if let Some(index) = layout::display_containing(displays, center) {
                log::debug!("Clock moved from display {} to {}", self.display, index);
                self.display = index;
            }
        }

        let bounds = displays.get(self.display).copied().unwrap_or_default();
        self.surface.set_fullscreen(self.display, bounds, full);
        self.full = full;
        let (width, height) = self.surface.size();
        self.width = width;
        self.height = height;
        self.update_layout()
    }

    pub fn handle_window_event(&mut self, event: WindowEvent) -> Result<(), SurfaceError> {
        match event {
            WindowEvent::Resized { width, height } => {
                if (width, height) == (self.width, self.height) {
                    log::debug!("Ignoring resize to unchanged {}x{}", width, height);
                    return Ok(());
                }
                self.surface.resize(width, height);
                self.width = width;
                self.height = height;
                self.update_layout()?;
            }
            WindowEvent::Minimized => self.waiting = true,
            WindowEvent::Restored => self.waiting = false,
            // Teardown belongs to whoever owns the clock.
            WindowEvent::Close => {}
        }
        Ok(())
    }

    /// Set a field's text. Does nothing for a hidden seconds card.
    pub fn set_field(&mut self, field: Field, text: &str) {
        if let Some(card) = self.card_mut(field) {
            card.set_text(Some(text));
        }
    }

    pub fn flip_field(&mut self, field: Field, now: u64) {
        if let Some(card) = self.card_mut(field) {
            card.flip(now);
        }
    }

    /// AM/PM label on the hour card; `None` removes it.
    pub fn set_ampm(&mut self, label: Option<&str>) {
        self.hour.set_sub_text(label);
    }

    /// Switching between 12 and 24 hours changes both the hour digits and
    /// the label, so they are always set together. Neither flips.
    pub fn set_ampm_and_hour(&mut self, hour: &str, label: Option<&str>) {
        self.hour.set_text(Some(hour));
        self.hour.set_sub_text(label);
    }

    pub fn animate(&mut self, now: u64) -> Result<(), SurfaceError> {
        if self.waiting {
            return Ok(());
        }
        self.surface.set_draw_target(DrawTarget::Screen);
        self.surface.clear(self.style.background_color);
        self.hour.animate(&mut self.surface, now)?;
        self.minute.animate(&mut self.surface, now)?;
        if let Some(card) = self.second.as_mut() {
            card.animate(&mut self.surface, now)?;
        }
        self.surface.present()
    }

    pub fn destroy(self) {
        let Self { mut surface, hour, minute, second, .. } = self;
        hour.destroy(&mut surface);
        minute.destroy(&mut surface);
        if let Some(card) = second {
            card.destroy(&mut surface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::fake::{FakeSurface, Op};

    fn clock(show_second: bool) -> Clock<FakeSurface> {
        let mut config = FlipClockConfig::default();
        config.clock.show_second = show_second;
        Clock::new(FakeSurface::new(800, 600), 0, false, &config).unwrap()
    }

    #[test]
    fn cards_follow_layout() {
        let clock = clock(false);
        assert_eq!(clock.card(Field::Hour).unwrap().rect(), Rect::new(43, 132, 336, 336));
        assert_eq!(clock.card(Field::Minute).unwrap().rect(), Rect::new(421, 132, 336, 336));
        assert!(clock.card(Field::Second).is_none());
        assert_eq!(clock.surface().textures.len(), 4);
    }

    #[test]
    fn toggling_seconds_relays_out() {
        let mut clock = clock(false);
        let wide = clock.card(Field::Hour).unwrap().rect();
        clock.set_show_second(true).unwrap();
        let second = clock.card(Field::Second).unwrap();
        assert!(!second.rect().is_empty());
        assert_eq!(second.text(), "");
        assert!(clock.card(Field::Hour).unwrap().rect().w < wide.w);
        assert_eq!(clock.surface().textures.len(), 6);

        clock.set_show_second(false).unwrap();
        assert!(clock.card(Field::Second).is_none());
        assert_eq!(clock.surface().textures.len(), 4);
        assert_eq!(clock.card(Field::Hour).unwrap().rect(), wide);
    }

    #[test]
    fn unchanged_resize_is_ignored() {
        let mut clock = clock(false);
        let created = clock.surface().textures_created;
        clock.handle_window_event(WindowEvent::Resized { width: 800, height: 600 }).unwrap();
        assert_eq!(clock.surface().textures_created, created);
    }

    #[test]
    fn resize_recreates_card_textures() {
        let mut clock = clock(false);
        clock.handle_window_event(WindowEvent::Resized { width: 1920, height: 1080 }).unwrap();
        assert_eq!(clock.surface().size(), (1920, 1080));
        let hour = clock.card(Field::Hour).unwrap().rect();
        assert!(clock.surface().textures.values().all(|&size| size == (hour.w as u32, hour.h as u32)));
        assert_eq!(clock.surface().textures.len(), 4);
    }

    #[test]
    fn minimized_clock_draws_nothing() {
        let mut clock = clock(false);
        clock.handle_window_event(WindowEvent::Minimized).unwrap();
        assert!(clock.is_waiting());
        clock.animate(0).unwrap();
        assert!(clock.surface().ops.is_empty());

        clock.handle_window_event(WindowEvent::Restored).unwrap();
        clock.animate(0).unwrap();
        assert_eq!(clock.surface().presents(), 1);
    }

    #[test]
    fn frame_clears_then_presents() {
        let mut clock = clock(true);
        clock.set_field(Field::Hour, "09");
        clock.set_field(Field::Minute, "30");
        clock.set_field(Field::Second, "15");
        clock.animate(0).unwrap();
        let ops = &clock.surface().ops;
        assert_eq!(ops[0], Op::Clear { target: DrawTarget::Screen, color: [0, 0, 0, 0xFF] });
        assert_eq!(ops.last(), Some(&Op::Present));
        assert_eq!(clock.surface().copies().len(), 3);
    }

    #[test]
    fn ampm_sets_hour_and_label_together() {
        let mut clock = clock(false);
        clock.set_field(Field::Hour, "13");
        clock.set_ampm_and_hour("01", Some("PM"));
        let hour = clock.card(Field::Hour).unwrap();
        assert_eq!(hour.text(), "01");
        assert_eq!(hour.sub_text(), Some("PM"));
        assert!(!hour.is_flipping(0));
    }

    #[test]
    fn hidden_second_ignores_updates() {
        let mut clock = clock(false);
        clock.set_field(Field::Second, "12");
        clock.flip_field(Field::Second, 0);
        assert!(clock.card(Field::Second).is_none());
    }

    #[test]
    fn fullscreen_fills_display() {
        let mut clock = clock(false);
        let displays = [Rect::new(0, 0, 1920, 1080)];
        clock.set_fullscreen(true, &displays).unwrap();
        assert!(clock.is_full());
        assert_eq!(clock.surface().size(), (1920, 1080));
        assert_eq!(clock.card(Field::Hour).unwrap().rect().h, 808);

        clock.set_fullscreen(false, &displays).unwrap();
        assert_eq!(clock.surface().size(), (800, 600));
    }

    #[test]
    fn lost_display_falls_back_to_last() {
        let mut config = FlipClockConfig::default();
        config.clock.full = true;
        let mut clock = Clock::new(FakeSurface::new(1280, 1024), 2, true, &config).unwrap();
        let displays = [Rect::new(0, 0, 1920, 1080), Rect::new(-1280, 0, 1280, 1024)];
        clock.set_fullscreen(true, &displays).unwrap();
        // Centre (640, 512) sits on display 0.
        assert_eq!(clock.display(), 0);

        let mut clock = Clock::new(FakeSurface::new(100, 100), 5, true, &config).unwrap();
        let displays = [Rect::new(500, 500, 10, 10), Rect::new(900, 900, 10, 10)];
        clock.set_fullscreen(true, &displays).unwrap();
        assert_eq!(clock.display(), 1);
    }
}
