use anyhow::{Context, Result};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_keyboard, delegate_output, delegate_pointer, delegate_registry,
    delegate_seat, delegate_shm, delegate_touch, delegate_xdg_shell, delegate_xdg_window,
    output::{OutputHandler, OutputState},
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    seat::{
        keyboard::{KeyEvent, KeyboardHandler, Keysym, Modifiers},
        pointer::{CursorIcon, PointerEvent, PointerEventKind, PointerHandler, ThemeSpec, ThemedPointer},
        touch::TouchHandler,
        Capability as SeatCapability, SeatHandler, SeatState,
    },
    shell::{
        xdg::{
            window::{Window, WindowConfigure, WindowDecorations, WindowHandler},
            XdgShell,
        },
        WaylandSurface,
    },
    reexports::csd_frame::WindowState,
    shm::{slot::SlotPool, Shm, ShmHandler},
};
use wayland_client::{
    delegate_noop,
    globals::registry_queue_init,
    protocol::{wl_keyboard, wl_output, wl_pointer, wl_seat, wl_shm, wl_surface, wl_touch},
    Connection, EventQueue, QueueHandle,
};
use wayland_protocols::wp::idle_inhibit::zv1::client::{
    zwp_idle_inhibit_manager_v1::ZwpIdleInhibitManagerV1, zwp_idle_inhibitor_v1::ZwpIdleInhibitorV1,
};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::canvas::{Canvas, Presenter, SoftwareSurface};
use crate::clock::WindowEvent;
use crate::config::FlipClockConfig;
use crate::orchestrator::{Action, Backend, Event, Orchestrator};
use crate::surface::{Rect, SurfaceError};
use crate::time_utils::SystemClock;

const WINDOWED_WIDTH: u32 = 800;
const WINDOWED_HEIGHT: u32 = 600;
const BTN_LEFT: u32 = 0x110;

pub fn run(config: FlipClockConfig) -> Result<()> {
    let mut backend = WaylandBackend::connect()?;
    let time = SystemClock::new();
    let mut orchestrator = Orchestrator::new(&mut backend, config, &time)?;
    orchestrator.run(&mut backend, &time)
}

/// Per-window state the dispatch handlers write and the presenter reads.
#[derive(Default)]
struct WindowShared {
    configured: Cell<bool>,
    suspended: Cell<bool>,
    fullscreen: Cell<bool>,
    position: Cell<(i32, i32)>,
}

impl WindowShared {
    /// The cursor is hidden over fullscreen clocks only.
    fn cursor_hidden(&self) -> bool {
        self.fullscreen.get()
    }
}

/// Record a configure and return the window events it implies.
fn configure_events(
    shared: &WindowShared,
    state: WindowState,
    new_size: (Option<NonZeroU32>, Option<NonZeroU32>),
) -> Vec<WindowEvent> {
    let mut events = Vec::with_capacity(2);
    shared.configured.set(true);
    shared.fullscreen.set(state.contains(WindowState::FULLSCREEN));

    let suspended = state.contains(WindowState::SUSPENDED);
    if suspended != shared.suspended.replace(suspended) {
        events.push(if suspended { WindowEvent::Minimized } else { WindowEvent::Restored });
    }

    // No suggested size means the client picks
    let width = new_size.0.map_or(WINDOWED_WIDTH, NonZeroU32::get);
    let height = new_size.1.map_or(WINDOWED_HEIGHT, NonZeroU32::get);
    events.push(WindowEvent::Resized { width: width as i32, height: height as i32 });
    events
}

struct WindowSlot {
    window: Window,
    shared: Rc<WindowShared>,
    /// Keeps the screen awake while this window is visible.
    inhibitor: Option<ZwpIdleInhibitorV1>,
}

pub struct FlipState {
    registry_state: RegistryState,
    seat_state: SeatState,
    output_state: OutputState,
    compositor_state: CompositorState,
    xdg_shell: XdgShell,
    shm: Shm,

    idle_inhibit: Option<ZwpIdleInhibitManagerV1>,

    keyboard: Option<wl_keyboard::WlKeyboard>,
    pointer: Option<ThemedPointer>,
    /// Clock window under the pointer.
    pointer_focus: Option<usize>,
    touch: Option<wl_touch::WlTouch>,

    /// Indexed by clock.
    windows: Vec<Option<WindowSlot>>,
    outputs: Rc<RefCell<Vec<wl_output::WlOutput>>>,
    events: VecDeque<Event>,
}

impl FlipState {
    fn window_index(&self, surface: &wl_surface::WlSurface) -> Option<usize> {
        self.windows
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.window.wl_surface() == surface))
    }

    fn refresh_outputs(&mut self) {
        *self.outputs.borrow_mut() = self.output_state.outputs().collect();
    }

    fn push_action(&mut self, action: Action) {
        self.events.push_back(Event::Action(action));
    }

    fn update_cursor(&self, conn: &Connection) {
        let (Some(pointer), Some(clock)) = (&self.pointer, self.pointer_focus) else { return };
        let Some(slot) = self.windows.get(clock).and_then(Option::as_ref) else { return };
        let result = if slot.shared.cursor_hidden() {
            pointer.hide_cursor()
        } else {
            pointer.set_cursor(conn, CursorIcon::Default)
        };
        if let Err(e) = result {
            log::debug!("Failed to update cursor: {}", e);
        }
    }
}

pub struct WaylandBackend {
    event_queue: EventQueue<FlipState>,
    state: FlipState,
    running: Arc<AtomicBool>,
}

impl WaylandBackend {
    pub fn connect() -> Result<Self> {
        let conn = Connection::connect_to_env()
            .context("Failed to connect to Wayland. Ensure a Wayland compositor is running.")?;

        let (globals, mut event_queue) = registry_queue_init(&conn)
            .context("Failed to initialize Wayland registry")?;
        let qh = event_queue.handle();

        let compositor_state = CompositorState::bind(&globals, &qh)
            .context("wl_compositor not available")?;
        let xdg_shell = XdgShell::bind(&globals, &qh)
            .context("xdg_wm_base not available")?;
        let shm = Shm::bind(&globals, &qh)
            .context("wl_shm not available")?;
        let idle_inhibit = globals
            .bind::<ZwpIdleInhibitManagerV1, _, _>(&qh, 1..=1, ())
            .map_err(|e| log::warn!("Idle inhibit not available, the screen may blank: {}", e))
            .ok();

        let mut state = FlipState {
            registry_state: RegistryState::new(&globals),
            seat_state: SeatState::new(&globals, &qh),
            output_state: OutputState::new(&globals, &qh),
            compositor_state,
            xdg_shell,
            shm,
            idle_inhibit,
            keyboard: None,
            pointer: None,
            pointer_focus: None,
            touch: None,
            windows: Vec::new(),
            outputs: Rc::new(RefCell::new(Vec::new())),
            events: VecDeque::new(),
        };

        // Roundtrip so outputs are known before any window is placed
        event_queue.roundtrip(&mut state)?;
        state.refresh_outputs();
        log::info!("Found {} output(s)", state.outputs.borrow().len());

        let running = Arc::new(AtomicBool::new(true));
        {
            let r = running.clone();
            ctrlc::set_handler(move || {
                r.store(false, Ordering::SeqCst);
            })
            .context("Failed to set signal handler")?;
        }

        Ok(Self { event_queue, state, running })
    }
}

impl Backend for WaylandBackend {
    type Surface = SoftwareSurface<WaylandPresenter>;

    fn displays(&self) -> Vec<Rect> {
        self.state
            .outputs
            .borrow()
            .iter()
            .map(|output| {
                let Some(info) = self.state.output_state.info(output) else { return Rect::default() };
                let (x, y) = info.logical_position.unwrap_or((0, 0));
                let (w, h) = info.logical_size.unwrap_or_else(|| {
                    info.modes.iter().find(|m| m.current).map_or((0, 0), |m| m.dimensions)
                });
                Rect::new(x, y, w, h)
            })
            .collect()
    }

    fn create_surface(&mut self, clock: usize, display: usize, full: bool) -> Result<Self::Surface> {
        let qh = self.event_queue.handle();
        let surface = self.state.compositor_state.create_surface(&qh);
        let window = self.state.xdg_shell.create_window(surface, WindowDecorations::RequestServer, &qh);
        window.set_title("flipclock");
        window.set_app_id("flipclock");

        let (width, height) = match self.displays().get(display) {
            Some(bounds) if full && !bounds.is_empty() => (bounds.w as u32, bounds.h as u32),
            _ => (WINDOWED_WIDTH, WINDOWED_HEIGHT),
        };
        if full {
            window.set_fullscreen(self.state.outputs.borrow().get(display));
        }
        window.commit();

        let shared = Rc::new(WindowShared::default());
        shared.fullscreen.set(full);
        let inhibitor = self
            .state
            .idle_inhibit
            .as_ref()
            .map(|manager| manager.create_inhibitor(window.wl_surface(), &qh, ()));
        if self.state.windows.len() <= clock {
            self.state.windows.resize_with(clock + 1, || None);
        }
        self.state.windows[clock] = Some(WindowSlot { window: window.clone(), shared: shared.clone(), inhibitor });

        let pool = SlotPool::new((width * height * 4) as usize, &self.state.shm)
            .context("Failed to create SHM pool")?;
        let presenter = WaylandPresenter { window, pool, shared, outputs: self.state.outputs.clone() };
        log::debug!("Created window for clock {} on display {} ({}x{})", clock, display, width, height);
        SoftwareSurface::new(presenter, width, height).context("Failed to create screen buffer")
    }

    fn wait_event(&mut self, timeout: Duration) -> Result<Option<Event>> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(Some(Event::Action(Action::Quit)));
        }
        if let Some(event) = self.state.events.pop_front() {
            return Ok(Some(event));
        }

        self.event_queue.flush()?;
        if let Some(guard) = self.event_queue.prepare_read() {
            let fd = guard.connection_fd();
            let mut fds = [nix::poll::PollFd::new(fd, nix::poll::PollFlags::POLLIN)];
            let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
            let _ = nix::poll::poll(&mut fds, nix::poll::PollTimeout::from(millis));
            if fds[0].revents().map_or(false, |r| r.contains(nix::poll::PollFlags::POLLIN)) {
                guard.read()?;
            } else {
                drop(guard);
            }
        }
        self.event_queue.dispatch_pending(&mut self.state)?;
        Ok(self.state.events.pop_front())
    }

    fn forget(&mut self, clock: usize) {
        if let Some(slot) = self.state.windows.get_mut(clock).and_then(Option::take) {
            if let Some(inhibitor) = slot.inhibitor {
                inhibitor.destroy();
            }
        }
        if self.state.pointer_focus == Some(clock) {
            self.state.pointer_focus = None;
        }
    }
}

/// Delivers finished frames to one xdg toplevel through wl_shm.
pub struct WaylandPresenter {
    window: Window,
    pool: SlotPool,
    shared: Rc<WindowShared>,
    outputs: Rc<RefCell<Vec<wl_output::WlOutput>>>,
}

impl Presenter for WaylandPresenter {
    fn present(&mut self, canvas: &Canvas) -> Result<(), SurfaceError> {
        // Nothing may be attached before the first configure
        if !self.shared.configured.get() {
            return Ok(());
        }
        let (width, height) = (canvas.width() as i32, canvas.height() as i32);
        let stride = width * 4;
        let buf_size = (stride * height) as usize;

        if self.pool.len() < buf_size {
            self.pool.resize(buf_size).map_err(|e| SurfaceError::Present(e.to_string()))?;
        }
        let (buffer, data) = self
            .pool
            .create_buffer(width, height, stride, wl_shm::Format::Argb8888)
            .map_err(|e| SurfaceError::Present(e.to_string()))?;

        // Copy pixels with RGBA→BGRA swizzle
        let pixels = canvas.pixels_argb8888();
        data[..pixels.len()].copy_from_slice(&pixels);

        let surface = self.window.wl_surface();
        buffer.attach_to(surface).map_err(|e| SurfaceError::Present(e.to_string()))?;
        surface.damage_buffer(0, 0, width, height);
        surface.commit();
        Ok(())
    }

    fn window_position(&self) -> (i32, i32) {
        self.shared.position.get()
    }

    fn set_fullscreen(&mut self, display: usize, _bounds: Rect, full: bool) -> Option<(u32, u32)> {
        if full {
            self.window.set_fullscreen(self.outputs.borrow().get(display));
            self.window.commit();
            // The compositor tells us the size in the next configure
            None
        } else {
            self.window.unset_fullscreen();
            self.window.commit();
            Some((WINDOWED_WIDTH, WINDOWED_HEIGHT))
        }
    }
}

// SCTK handler implementations

impl CompositorHandler for FlipState {
    fn scale_factor_changed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, _new_factor: i32) {}

    fn transform_changed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, _new_transform: wl_output::Transform) {}

    fn frame(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, _time: u32) {}

    fn surface_enter(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, surface: &wl_surface::WlSurface, output: &wl_output::WlOutput) {
        let Some(index) = self.window_index(surface) else { return };
        let Some(info) = self.output_state.info(output) else { return };
        log::debug!("Clock {} entered output {:?}", index, info.name);
        if let Some(slot) = &self.windows[index] {
            slot.shared.position.set(info.logical_position.unwrap_or((0, 0)));
        }
    }

    fn surface_leave(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _surface: &wl_surface::WlSurface, _output: &wl_output::WlOutput) {}
}

impl WindowHandler for FlipState {
    fn request_close(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, window: &Window) {
        if let Some(clock) = self.window_index(window.wl_surface()) {
            self.events.push_back(Event::Window { clock, event: WindowEvent::Close });
        }
    }

    fn configure(&mut self, conn: &Connection, _qh: &QueueHandle<Self>, window: &Window, configure: WindowConfigure, _serial: u32) {
        let Some(clock) = self.window_index(window.wl_surface()) else { return };
        let Some(slot) = &self.windows[clock] else { return };

        let was_full = slot.shared.fullscreen.get();
        let events = configure_events(&slot.shared, configure.state, configure.new_size);
        let refresh_cursor = was_full != slot.shared.fullscreen.get() && self.pointer_focus == Some(clock);

        self.events.extend(events.into_iter().map(|event| Event::Window { clock, event }));
        if refresh_cursor {
            self.update_cursor(conn);
        }
    }
}

impl OutputHandler for FlipState {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _output: wl_output::WlOutput) {
        self.refresh_outputs();
    }
    fn update_output(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _output: wl_output::WlOutput) {
        self.refresh_outputs();
    }
    fn output_destroyed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _output: wl_output::WlOutput) {
        self.refresh_outputs();
    }
}

impl SeatHandler for FlipState {
    fn seat_state(&mut self) -> &mut SeatState {
        &mut self.seat_state
    }

    fn new_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {}
    fn new_capability(&mut self, _conn: &Connection, qh: &QueueHandle<Self>, seat: wl_seat::WlSeat, capability: SeatCapability) {
        if capability == SeatCapability::Keyboard && self.keyboard.is_none() {
            match self.seat_state.get_keyboard(qh, &seat, None) {
                Ok(keyboard) => self.keyboard = Some(keyboard),
                Err(e) => log::warn!("Failed to get keyboard: {}", e),
            }
        }
        if capability == SeatCapability::Pointer && self.pointer.is_none() {
            let cursor_surface = self.compositor_state.create_surface(qh);
            match self.seat_state.get_pointer_with_theme(qh, &seat, self.shm.wl_shm(), cursor_surface, ThemeSpec::default()) {
                Ok(pointer) => self.pointer = Some(pointer),
                Err(e) => log::warn!("Failed to get pointer: {}", e),
            }
        }
        if capability == SeatCapability::Touch && self.touch.is_none() {
            match self.seat_state.get_touch(qh, &seat) {
                Ok(touch) => self.touch = Some(touch),
                Err(e) => log::warn!("Failed to get touch: {}", e),
            }
        }
    }
    fn remove_capability(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat, capability: SeatCapability) {
        match capability {
            SeatCapability::Keyboard => {
                if let Some(keyboard) = self.keyboard.take() {
                    keyboard.release();
                }
            }
            SeatCapability::Pointer => {
                if let Some(pointer) = self.pointer.take() {
                    pointer.pointer().release();
                }
                self.pointer_focus = None;
            }
            SeatCapability::Touch => {
                if let Some(touch) = self.touch.take() {
                    touch.release();
                }
            }
            _ => {}
        }
    }
    fn remove_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {}
}

impl KeyboardHandler for FlipState {
    fn enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _surface: &wl_surface::WlSurface,
        _serial: u32,
        _raw: &[u32],
        _keysyms: &[Keysym],
    ) {
    }

    fn leave(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _keyboard: &wl_keyboard::WlKeyboard, _surface: &wl_surface::WlSurface, _serial: u32) {}

    fn press_key(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _keyboard: &wl_keyboard::WlKeyboard, _serial: u32, event: KeyEvent) {
        let action = match event.keysym {
            Keysym::Escape | Keysym::q => Action::Quit,
            Keysym::t => Action::ToggleAmpm,
            Keysym::f => Action::ToggleFullscreen,
            Keysym::s => Action::ToggleSecond,
            _ => return,
        };
        self.push_action(action);
    }

    fn release_key(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _keyboard: &wl_keyboard::WlKeyboard, _serial: u32, _event: KeyEvent) {}

    fn update_modifiers(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        _modifiers: Modifiers,
        _layout: u32,
    ) {
    }
}

impl PointerHandler for FlipState {
    fn pointer_frame(
        &mut self,
        conn: &Connection,
        _qh: &QueueHandle<Self>,
        _pointer: &wl_pointer::WlPointer,
        events: &[PointerEvent],
    ) {
        for event in events {
            match event.kind {
                PointerEventKind::Enter { .. } => {
                    self.pointer_focus = self.window_index(&event.surface);
                    self.update_cursor(conn);
                }
                PointerEventKind::Leave { .. } => self.pointer_focus = None,
                PointerEventKind::Press { button: BTN_LEFT, time, .. } => {
                    self.events.push_back(Event::Tap { time_ms: time as u64 });
                }
                _ => {}
            }
        }
    }
}

impl TouchHandler for FlipState {
    fn down(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _touch: &wl_touch::WlTouch,
        _serial: u32,
        time: u32,
        _surface: wl_surface::WlSurface,
        _id: i32,
        _position: (f64, f64),
    ) {
        self.events.push_back(Event::Tap { time_ms: time as u64 });
    }

    fn up(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _touch: &wl_touch::WlTouch, _serial: u32, _time: u32, _id: i32) {}

    fn motion(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _touch: &wl_touch::WlTouch, _time: u32, _id: i32, _position: (f64, f64)) {}

    fn shape(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _touch: &wl_touch::WlTouch, _id: i32, _major: f64, _minor: f64) {}

    fn orientation(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _touch: &wl_touch::WlTouch, _id: i32, _orientation: f64) {}

    fn cancel(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _touch: &wl_touch::WlTouch) {}
}

impl ShmHandler for FlipState {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm
    }
}

impl ProvidesRegistryState for FlipState {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState, SeatState];
}

delegate_compositor!(FlipState);
delegate_output!(FlipState);
delegate_keyboard!(FlipState);
delegate_pointer!(FlipState);
delegate_touch!(FlipState);
delegate_registry!(FlipState);
delegate_seat!(FlipState);
delegate_shm!(FlipState);
delegate_xdg_shell!(FlipState);
delegate_xdg_window!(FlipState);

delegate_noop!(FlipState: ignore ZwpIdleInhibitManagerV1);
delegate_noop!(FlipState: ignore ZwpIdleInhibitorV1);

#[cfg(test)]
mod tests {
    use super::*;

    fn size(width: u32, height: u32) -> (Option<NonZeroU32>, Option<NonZeroU32>) {
        (NonZeroU32::new(width), NonZeroU32::new(height))
    }

    #[test]
    fn cursor_hides_only_while_fullscreen() {
        let shared = WindowShared::default();
        assert!(!shared.cursor_hidden());

        let events = configure_events(&shared, WindowState::FULLSCREEN, size(1920, 1080));
        assert!(shared.configured.get());
        assert!(shared.cursor_hidden());
        assert_eq!(events, vec![WindowEvent::Resized { width: 1920, height: 1080 }]);

        configure_events(&shared, WindowState::ACTIVATED, size(800, 600));
        assert!(!shared.cursor_hidden());
    }

    #[test]
    fn unsized_configure_uses_windowed_default() {
        let shared = WindowShared::default();
        let events = configure_events(&shared, WindowState::empty(), (None, None));
        assert_eq!(events, vec![WindowEvent::Resized { width: 800, height: 600 }]);
    }

    #[test]
    fn suspension_maps_to_minimize_and_restore() {
        let shared = WindowShared::default();
        let events = configure_events(&shared, WindowState::SUSPENDED | WindowState::FULLSCREEN, size(1920, 1080));
        assert_eq!(events[0], WindowEvent::Minimized);

        let events = configure_events(&shared, WindowState::FULLSCREEN, size(1920, 1080));
        assert_eq!(events[0], WindowEvent::Restored);

        let events = configure_events(&shared, WindowState::FULLSCREEN, size(1920, 1080));
        assert_eq!(events.len(), 1);
    }
}
