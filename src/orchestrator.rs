//! Drives every clock from one time snapshot per frame.
//!
//! Each iteration waits (bounded by the frame budget) for input, dispatches
//! it, samples the wall clock, flips the cards whose field changed since the
//! previous sample and renders every visible clock. Nothing else blocks.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::clock::{Clock, Field, WindowEvent};
use crate::config::FlipClockConfig;
use crate::surface::{Rect, RenderSurface};
use crate::time_utils::{format_field, TimeSource, WallTime};

pub const FPS: u64 = 60;
/// Two taps closer than this toggle fullscreen.
pub const DOUBLE_TAP_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    ToggleAmpm,
    ToggleFullscreen,
    ToggleSecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Window { clock: usize, event: WindowEvent },
    Action(Action),
    /// Pointer click or touch down, stamped with the backend's tick.
    Tap { time_ms: u64 },
}

/// Windowing side of the loop: displays, one surface per clock, and input.
pub trait Backend {
    type Surface: RenderSurface;

    fn displays(&self) -> Vec<Rect>;
    fn create_surface(&mut self, clock: usize, display: usize, full: bool) -> Result<Self::Surface>;
    /// Next pending event, waiting at most `timeout` for one.
    fn wait_event(&mut self, timeout: Duration) -> Result<Option<Event>>;
    /// The clock's window is gone; drop whatever the backend kept for it.
    fn forget(&mut self, clock: usize);
}

#[derive(Debug, Default)]
struct TapTracker {
    last: Option<u64>,
}

impl TapTracker {
    /// True when this tap completes a double tap.
    fn register(&mut self, time_ms: u64) -> bool {
        match self.last.take() {
            Some(last) if time_ms.saturating_sub(last) <= DOUBLE_TAP_MS => true,
            _ => {
                self.last = Some(time_ms);
                false
            }
        }
    }
}

pub struct Orchestrator<S: RenderSurface> {
    config: FlipClockConfig,
    clocks: Vec<Option<Clock<S>>>,
    past: WallTime,
    running: bool,
    taps: TapTracker,
}

impl<S: RenderSurface> Orchestrator<S> {
    /// One clock per display when fullscreen, a single window otherwise.
    /// Every card starts at rest showing the current time.
    pub fn new<B>(backend: &mut B, config: FlipClockConfig, time: &impl TimeSource) -> Result<Self>
    where
        B: Backend<Surface = S>,
    {
        let count = if config.clock.full { backend.displays().len().max(1) } else { 1 };
        let mut clocks = Vec::with_capacity(count);
        for index in 0..count {
            let surface = backend
                .create_surface(index, index, config.clock.full)
                .with_context(|| format!("Failed to create window for clock {}", index))?;
            let clock = Clock::new(surface, index, config.clock.full, &config)
                .with_context(|| format!("Failed to create clock {}", index))?;
            clocks.push(Some(clock));
        }
        log::info!("Started {} clock(s), fullscreen: {}", count, config.clock.full);

        let now = time.wall_clock();
        let mut orchestrator = Self { config, clocks, past: now, running: true, taps: TapTracker::default() };
        orchestrator.fill_all();
        Ok(orchestrator)
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[cfg(test)]
    pub fn config(&self) -> &FlipClockConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn clock(&self, index: usize) -> Option<&Clock<S>> {
        self.clocks.get(index).and_then(Option::as_ref)
    }

    fn clocks_mut(&mut self) -> impl Iterator<Item = &mut Clock<S>> {
        self.clocks.iter_mut().flatten()
    }

    fn ampm_label(&self, time: &WallTime) -> Option<&'static str> {
        self.config.clock.ampm.then(|| time.ampm_label())
    }

    /// Set every card's text from `past` without flipping anything.
    fn fill_all(&mut self) {
        let past = self.past;
        let hour = past.hour_text(self.config.clock.ampm);
        let label = self.ampm_label(&past);
        let minute = format_field(past.minute);
        let second = format_field(past.second);
        for clock in self.clocks_mut() {
            clock.set_ampm_and_hour(&hour, label);
            clock.set_field(Field::Minute, &minute);
            clock.set_field(Field::Second, &second);
        }
    }

    pub fn handle_event(&mut self, event: Event, displays: &[Rect]) -> Result<()> {
        match event {
            Event::Window { clock: index, event: WindowEvent::Close } => {
                if let Some(clock) = self.clocks.get_mut(index).and_then(Option::take) {
                    log::info!("Closing clock {}", index);
                    clock.destroy();
                }
                if self.clocks.iter().all(Option::is_none) {
                    log::info!("All clocks closed");
                    self.running = false;
                }
            }
            Event::Window { clock: index, event } => {
                if let Some(clock) = self.clocks.get_mut(index).and_then(Option::as_mut) {
                    clock.handle_window_event(event)?;
                }
            }
            Event::Tap { time_ms } => {
                if self.taps.register(time_ms) {
                    self.toggle_fullscreen(displays)?;
                }
            }
            Event::Action(Action::Quit) => self.running = false,
            Event::Action(Action::ToggleAmpm) => {
                self.config.clock.ampm = !self.config.clock.ampm;
                log::info!("12-hour clock: {}", self.config.clock.ampm);
                let past = self.past;
                let hour = past.hour_text(self.config.clock.ampm);
                let label = self.ampm_label(&past);
                for clock in self.clocks_mut() {
                    clock.set_ampm_and_hour(&hour, label);
                }
            }
            Event::Action(Action::ToggleFullscreen) => self.toggle_fullscreen(displays)?,
            Event::Action(Action::ToggleSecond) => {
                let show = !self.config.clock.show_second;
                self.config.clock.show_second = show;
                log::info!("Seconds card: {}", show);
                let second = format_field(self.past.second);
                for clock in self.clocks_mut() {
                    clock.set_show_second(show)?;
                    clock.set_field(Field::Second, &second);
                }
            }
        }
        Ok(())
    }

    fn toggle_fullscreen(&mut self, displays: &[Rect]) -> Result<()> {
        let full = !self.config.clock.full;
        self.config.clock.full = full;
        log::info!("Fullscreen: {}", full);
        for clock in self.clocks_mut() {
            clock.set_fullscreen(full, displays)?;
        }
        Ok(())
    }

    /// One frame: diff the wall clock against the last frame, flip what
    /// changed, then draw every clock that is not minimized.
    pub fn tick(&mut self, time: &impl TimeSource) -> Result<()> {
        let now = time.wall_clock();
        let ticks = time.ticks();
        let past = self.past;

        let mut changed = Vec::with_capacity(3);
        if now.hour != past.hour {
            changed.push((Field::Hour, now.hour_text(self.config.clock.ampm)));
        }
        if now.minute != past.minute {
            changed.push((Field::Minute, format_field(now.minute)));
        }
        if self.config.clock.show_second && now.second != past.second {
            changed.push((Field::Second, format_field(now.second)));
        }
        let label = (now.is_pm() != past.is_pm()).then(|| self.ampm_label(&now)).flatten();

        for clock in self.clocks_mut() {
            for (field, text) in &changed {
                clock.set_field(*field, text);
                clock.flip_field(*field, ticks);
            }
            if label.is_some() {
                clock.set_ampm(label);
            }
            clock.animate(ticks)?;
        }

        self.past = now;
        Ok(())
    }

    /// Run until quit or until every window is closed, then release all
    /// clocks.
    pub fn run<B>(&mut self, backend: &mut B, time: &impl TimeSource) -> Result<()>
    where
        B: Backend<Surface = S>,
    {
        let frame = Duration::from_millis(1000 / FPS);
        while self.running {
            let mut timeout = frame;
            // Drain everything already queued, but only block once.
            while let Some(event) = backend.wait_event(timeout)? {
                timeout = Duration::ZERO;
                self.handle_event(event, &backend.displays())?;
                if let Event::Window { clock, event: WindowEvent::Close } = event {
                    backend.forget(clock);
                }
                if !self.running {
                    break;
                }
            }
            if !self.running {
                break;
            }
            self.tick(time)?;
        }

        for clock in self.clocks.drain(..).flatten() {
            clock.destroy();
        }
        Ok(())
    }
}
