//! Fixed code tables

use bitflags::bitflags;

pub const BTN_LEFT: u32 = 0x110;
pub const BTN_RIGHT: u32 = 0x111;
pub const BTN_MIDDLE: u32 = 0x112;
pub const BTN_SIDE: u32 = 0x113;

/// Legacy keycodes are evdev codes shifted by this much
pub const KEYCODE_OFFSET: u32 = 8;

/// Legacy keycode for an evdev key, if it fits the 8-bit keycode range
pub fn legacy_keycode(key: u32) -> Option<u32> {
    key.checked_add(KEYCODE_OFFSET).filter(|k| *k <= 255)
}

/// First legacy button after the wheel buttons
const FIRST_EXTRA_BUTTON: u32 = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 2;
        const ALT = 1 << 3;
        const META = 1 << 6;
    }
}

/// Map an evdev button code to a legacy button index
///
/// Returns `None` for codes below the button range and for extra buttons
/// the legacy device does not have.
pub fn map_button(code: u32, num_buttons: u32) -> Option<u32> {
    let button = match code {
        BTN_LEFT => 1,
        BTN_MIDDLE => 2,
        BTN_RIGHT => 3,
        c if c >= BTN_SIDE => (c - BTN_SIDE).checked_add(FIRST_EXTRA_BUTTON)?,
        _ => return None,
    };
    (button <= num_buttons).then_some(button)
}

/// Modifier produced by an evdev key code, if any
pub fn modifier_for_key(key: u32) -> Modifiers {
    match key {
        42 | 54 => Modifiers::SHIFT,
        29 | 97 => Modifiers::CONTROL,
        56 | 100 => Modifiers::ALT,
        125 | 126 => Modifiers::META,
        _ => Modifiers::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_keycode_range() {
        assert_eq!(legacy_keycode(0), Some(8));
        assert_eq!(legacy_keycode(247), Some(255));
        assert_eq!(legacy_keycode(248), None);
        assert_eq!(legacy_keycode(u32::MAX), None);
    }

    #[test]
    fn test_primary_buttons() {
        assert_eq!(map_button(BTN_LEFT, 3), Some(1));
        assert_eq!(map_button(BTN_MIDDLE, 3), Some(2));
        assert_eq!(map_button(BTN_RIGHT, 3), Some(3));
    }

    #[test]
    fn test_extra_buttons_skip_wheel() {
        assert_eq!(map_button(BTN_SIDE, 10), Some(8));
        assert_eq!(map_button(BTN_SIDE + 2, 10), Some(10));
        assert_eq!(map_button(BTN_SIDE + 3, 10), None);
        assert_eq!(map_button(BTN_SIDE, 3), None);
        assert_eq!(map_button(0x100, 10), None);
        assert_eq!(map_button(u32::MAX, 32), None);
    }

    #[test]
    fn test_modifier_keys() {
        assert_eq!(modifier_for_key(125), Modifiers::META);
        assert_eq!(modifier_for_key(126), Modifiers::META);
        assert_eq!(modifier_for_key(42), Modifiers::SHIFT);
        assert_eq!(modifier_for_key(30), Modifiers::empty());
    }
}
