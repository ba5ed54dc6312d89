//! Input translation
//!
//! Turns compositor seat events into legacy device events. Every seat gets
//! a legacy pointer and/or keyboard device depending on its capabilities.
//! Focus is tracked by window id only: the bridge never holds on to a
//! surface through input state, and [`InputBridge::forget_window`] must be
//! called before a focused window's surface goes away.

mod keys;

pub use keys::{
    legacy_keycode, map_button, modifier_for_key, Modifiers, BTN_LEFT, BTN_MIDDLE, BTN_RIGHT,
    BTN_SIDE, KEYCODE_OFFSET,
};

use crate::config::InputConfig;
use crate::protocol::{Axis, SeatCapabilities, SeatId};
use crate::server::{DeviceId, DeviceKind, InputSink, WindowId};
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on wheel clicks injected for a single axis event
pub const MAX_CLICKS_PER_EVENT: u32 = 32;

/// Resolves a focused window to its screen origin
pub trait WindowOrigins {
    fn origin(&self, window: WindowId) -> Option<(i32, i32)>;
}

#[derive(Debug)]
pub struct PointerState {
    pub device: DeviceId,
    pub focus: Option<WindowId>,
    /// Legacy button indices this bridge pressed
    pub buttons: BTreeSet<u32>,
    /// Serial of the last enter, needed for cursor updates
    pub enter_serial: u32,
    pub last_time: u32,
    /// Last posted global position
    pub position: (i32, i32),
    /// Continuous scroll not yet turned into wheel clicks, per axis
    scroll: [f64; 2],
}

impl PointerState {
    fn new(device: DeviceId) -> Self {
        Self {
            device,
            focus: None,
            buttons: BTreeSet::new(),
            enter_serial: 0,
            last_time: 0,
            position: (0, 0),
            scroll: [0.0; 2],
        }
    }
}

/// Raw modifier state as reported by the compositor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XkbState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

#[derive(Debug)]
pub struct KeyboardState {
    pub device: DeviceId,
    pub focus: Option<WindowId>,
    /// Evdev codes currently held
    pub keys: BTreeSet<u32>,
    pub modifiers: Modifiers,
    pub xkb: XkbState,
    pub last_time: u32,
}

impl KeyboardState {
    fn new(device: DeviceId) -> Self {
        Self {
            device,
            focus: None,
            keys: BTreeSet::new(),
            modifiers: Modifiers::empty(),
            xkb: XkbState::default(),
            last_time: 0,
        }
    }

    fn recompute_modifiers(&mut self) {
        self.modifiers = self
            .keys
            .iter()
            .fold(Modifiers::empty(), |acc, key| acc | modifier_for_key(*key));
    }
}

#[derive(Debug, Default)]
pub struct Seat {
    pub capabilities: SeatCapabilities,
    pub pointer: Option<PointerState>,
    pub keyboard: Option<KeyboardState>,
}

/// Per-seat device state and the translation state machine
#[derive(Debug)]
pub struct InputBridge {
    config: InputConfig,
    seats: BTreeMap<SeatId, Seat>,
}

impl InputBridge {
    pub fn new(config: InputConfig) -> Self {
        Self {
            config,
            seats: BTreeMap::new(),
        }
    }

    pub fn seat(&self, seat: SeatId) -> Option<&Seat> {
        self.seats.get(&seat)
    }

    pub fn seats(&self) -> impl Iterator<Item = (SeatId, &Seat)> {
        self.seats.iter().map(|(id, seat)| (*id, seat))
    }

    pub fn pointer_focus(&self, seat: SeatId) -> Option<WindowId> {
        self.seats.get(&seat)?.pointer.as_ref()?.focus
    }

    pub fn keyboard_focus(&self, seat: SeatId) -> Option<WindowId> {
        self.seats.get(&seat)?.keyboard.as_ref()?.focus
    }

    /// First seat with a pointer, and the serial of its last enter
    pub fn first_pointer(&self) -> Option<(SeatId, u32)> {
        self.seats
            .iter()
            .find_map(|(id, seat)| seat.pointer.as_ref().map(|p| (*id, p.enter_serial)))
    }

    /// Create or drop legacy devices to match a seat's capabilities
    pub fn set_capabilities<S: InputSink>(
        &mut self,
        server: &mut S,
        seat_id: SeatId,
        capabilities: SeatCapabilities,
    ) {
        let buttons = self.config.pointer_buttons;
        let seat = self.seats.entry(seat_id).or_default();
        seat.capabilities = capabilities;

        if capabilities.contains(SeatCapabilities::POINTER) {
            if seat.pointer.is_none() {
                let name = format!("bridge-pointer-{}", seat_id.0);
                match server.add_input_device(DeviceKind::Pointer, &name, buttons) {
                    Some(device) => {
                        info!("Added pointer {:?} for seat {:?}", device, seat_id);
                        seat.pointer = Some(PointerState::new(device));
                    }
                    None => warn!("Server refused pointer device for seat {:?}", seat_id),
                }
            }
        } else if let Some(pointer) = seat.pointer.take() {
            server.remove_input_device(pointer.device);
        }

        if capabilities.contains(SeatCapabilities::KEYBOARD) {
            if seat.keyboard.is_none() {
                let name = format!("bridge-keyboard-{}", seat_id.0);
                match server.add_input_device(DeviceKind::Keyboard, &name, 0) {
                    Some(device) => {
                        info!("Added keyboard {:?} for seat {:?}", device, seat_id);
                        seat.keyboard = Some(KeyboardState::new(device));
                    }
                    None => warn!("Server refused keyboard device for seat {:?}", seat_id),
                }
            }
        } else if let Some(keyboard) = seat.keyboard.take() {
            server.remove_input_device(keyboard.device);
        }
    }

    pub fn remove_seat<S: InputSink>(&mut self, server: &mut S, seat_id: SeatId) {
        if let Some(seat) = self.seats.remove(&seat_id) {
            if let Some(pointer) = seat.pointer {
                server.remove_input_device(pointer.device);
            }
            if let Some(keyboard) = seat.keyboard {
                server.remove_input_device(keyboard.device);
            }
            info!("Removed seat {:?}", seat_id);
        }
    }

    /// Clear every focus reference to a window that is about to go away
    ///
    /// Returns the number of devices that lost focus.
    pub fn forget_window<S: InputSink>(&mut self, server: &mut S, window: WindowId) -> usize {
        let mut cleared = 0;
        for seat in self.seats.values_mut() {
            if let Some(pointer) = seat.pointer.as_mut() {
                if pointer.focus == Some(window) {
                    pointer.focus = None;
                    server.set_redirect_window(pointer.device, None);
                    cleared += 1;
                }
            }
            if let Some(keyboard) = seat.keyboard.as_mut() {
                if keyboard.focus == Some(window) {
                    keyboard.focus = None;
                    cleared += 1;
                }
            }
        }
        if cleared > 0 {
            debug!("Cleared {} focus references to {:?}", cleared, window);
        }
        cleared
    }

    pub fn pointer_enter<S: InputSink, O: WindowOrigins>(
        &mut self,
        server: &mut S,
        origins: &O,
        seat: SeatId,
        serial: u32,
        window: WindowId,
        x: f64,
        y: f64,
    ) {
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };
        pointer.enter_serial = serial;

        // The compositor delivers no button state with enter: anything still
        // held on the legacy side was released while we were not looking.
        let mut stale: BTreeSet<u32> = std::mem::take(&mut pointer.buttons);
        stale.extend(server.buttons_down(pointer.device));
        for button in &stale {
            server.post_button(pointer.device, *button, false);
        }
        if !stale.is_empty() {
            debug!("Released stale buttons {:?} on enter", stale);
        }

        pointer.focus = Some(window);
        server.set_redirect_window(pointer.device, Some(window));

        if let Some((ox, oy)) = origins.origin(window) {
            pointer.position = (ox + x as i32, oy + y as i32);
            server.post_motion(pointer.device, pointer.position.0, pointer.position.1);
        }
    }

    pub fn pointer_leave<S: InputSink>(&mut self, server: &mut S, seat: SeatId) {
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };
        pointer.focus = None;
        server.set_redirect_window(pointer.device, None);
    }

    pub fn pointer_motion<S: InputSink, O: WindowOrigins>(
        &mut self,
        server: &mut S,
        origins: &O,
        seat: SeatId,
        time: u32,
        x: f64,
        y: f64,
    ) {
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };
        let Some(focus) = pointer.focus else {
            trace!("Motion without focus on seat {:?}", seat);
            return;
        };
        let Some((ox, oy)) = origins.origin(focus) else {
            return;
        };
        pointer.last_time = time;
        pointer.position = (ox + x as i32, oy + y as i32);
        server.post_motion(pointer.device, pointer.position.0, pointer.position.1);
    }

    pub fn pointer_button<S: InputSink>(
        &mut self,
        server: &mut S,
        seat: SeatId,
        time: u32,
        code: u32,
        pressed: bool,
    ) {
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };
        let Some(button) = map_button(code, server.num_buttons(pointer.device)) else {
            debug!("Ignoring unmapped button {:#x}", code);
            return;
        };
        pointer.last_time = time;
        if pressed {
            pointer.buttons.insert(button);
        } else {
            pointer.buttons.remove(&button);
        }
        server.post_button(pointer.device, button, pressed);
    }

    /// Turn scrolling into wheel clicks
    ///
    /// Discrete steps map one-to-one onto clicks; continuous scrolling
    /// accumulates and clicks every `scroll_step` units. Each click is a
    /// press immediately followed by a release.
    pub fn pointer_axis<S: InputSink>(
        &mut self,
        server: &mut S,
        seat: SeatId,
        time: u32,
        axis: Axis,
        value: f64,
        discrete: Option<i32>,
    ) {
        let step = self.config.scroll_step;
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };
        pointer.last_time = time;

        let (negative_button, positive_button, slot) = match axis {
            Axis::Vertical => (4, 5, 0),
            Axis::Horizontal => (6, 7, 1),
        };

        let clicks: i32 = match discrete {
            Some(steps) => {
                pointer.scroll[slot] = 0.0;
                steps
            }
            None => {
                pointer.scroll[slot] += value;
                let whole = (pointer.scroll[slot] / step).trunc();
                pointer.scroll[slot] -= whole * step;
                whole as i32
            }
        };

        let button = if clicks < 0 {
            negative_button
        } else {
            positive_button
        };
        if button > server.num_buttons(pointer.device) {
            return;
        }
        for _ in 0..clicks.unsigned_abs().min(MAX_CLICKS_PER_EVENT) {
            server.post_button(pointer.device, button, true);
            server.post_button(pointer.device, button, false);
        }
    }

    pub fn keyboard_enter<S: InputSink>(
        &mut self,
        server: &mut S,
        seat: SeatId,
        window: WindowId,
        keys: &[u32],
    ) {
        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };
        keyboard.focus = Some(window);
        keyboard.keys = keys
            .iter()
            .copied()
            .filter(|key| legacy_keycode(*key).is_some())
            .collect();
        keyboard.recompute_modifiers();
        for keycode in keyboard.keys.iter().filter_map(|key| legacy_keycode(*key)) {
            server.post_key(keyboard.device, keycode, true);
        }
    }

    pub fn keyboard_leave<S: InputSink>(&mut self, server: &mut S, seat: SeatId) {
        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };
        for keycode in std::mem::take(&mut keyboard.keys)
            .into_iter()
            .filter_map(legacy_keycode)
        {
            server.post_key(keyboard.device, keycode, false);
        }
        keyboard.modifiers = Modifiers::empty();
        keyboard.focus = None;
    }

    pub fn keyboard_key<S: InputSink>(
        &mut self,
        server: &mut S,
        seat: SeatId,
        time: u32,
        key: u32,
        pressed: bool,
    ) {
        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };
        let Some(keycode) = legacy_keycode(key) else {
            debug!("Ignoring out-of-range key {}", key);
            return;
        };
        keyboard.last_time = time;
        if pressed {
            keyboard.keys.insert(key);
        } else {
            keyboard.keys.remove(&key);
        }
        keyboard.recompute_modifiers();
        server.post_key(keyboard.device, keycode, pressed);
    }

    pub fn keyboard_modifiers(&mut self, seat: SeatId, xkb: XkbState) {
        if let Some(keyboard) = self.keyboard_mut(seat) {
            trace!("Modifiers on seat {:?}: {:?}", seat, xkb);
            keyboard.xkb = xkb;
        }
    }

    /// Remove every legacy device
    pub fn close<S: InputSink>(&mut self, server: &mut S) {
        let seats: Vec<SeatId> = self.seats.keys().copied().collect();
        for seat in seats {
            self.remove_seat(server, seat);
        }
    }

    fn pointer_mut(&mut self, seat: SeatId) -> Option<&mut PointerState> {
        self.seats.get_mut(&seat)?.pointer.as_mut()
    }

    fn keyboard_mut(&mut self, seat: SeatId) -> Option<&mut KeyboardState> {
        self.seats.get_mut(&seat)?.keyboard.as_mut()
    }
}

#[cfg(test)]
mod tests;
