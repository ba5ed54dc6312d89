//! Tests for the input state machine

use super::*;
use crate::testing::{FakeServer, Posted};
use proptest::prelude::*;
use std::collections::HashMap;

const SEAT: SeatId = SeatId(7);

struct Origins(HashMap<WindowId, (i32, i32)>);

impl WindowOrigins for Origins {
    fn origin(&self, window: WindowId) -> Option<(i32, i32)> {
        self.0.get(&window).copied()
    }
}

fn origins() -> Origins {
    Origins(HashMap::from([
        (WindowId(1), (100, 200)),
        (WindowId(2), (500, 0)),
    ]))
}

fn setup() -> (InputBridge, FakeServer, DeviceId, DeviceId) {
    let mut input = InputBridge::new(InputConfig::default());
    let mut server = FakeServer::new();
    input.set_capabilities(
        &mut server,
        SEAT,
        SeatCapabilities::POINTER | SeatCapabilities::KEYBOARD,
    );
    let seat = input.seat(SEAT).unwrap();
    let pointer = seat.pointer.as_ref().unwrap().device;
    let keyboard = seat.keyboard.as_ref().unwrap().device;
    server.clear_posted();
    (input, server, pointer, keyboard)
}

#[test]
fn test_capabilities_add_and_remove_devices() {
    let (mut input, mut server, pointer, keyboard) = setup();
    assert_eq!(server.device_count(), 2);

    input.set_capabilities(&mut server, SEAT, SeatCapabilities::KEYBOARD);
    assert!(input.seat(SEAT).unwrap().pointer.is_none());
    assert!(!server.has_device(pointer));
    assert!(server.has_device(keyboard));

    input.remove_seat(&mut server, SEAT);
    assert_eq!(server.device_count(), 0);
    assert!(input.seat(SEAT).is_none());
}

#[test]
fn test_enter_translates_to_global_motion() {
    let (mut input, mut server, pointer, _) = setup();

    input.pointer_enter(&mut server, &origins(), SEAT, 42, WindowId(1), 10.5, 20.9);

    assert_eq!(input.pointer_focus(SEAT), Some(WindowId(1)));
    assert_eq!(input.first_pointer(), Some((SEAT, 42)));
    assert_eq!(
        server.posted(),
        &[
            Posted::Redirect {
                device: pointer,
                window: Some(WindowId(1))
            },
            Posted::Motion {
                device: pointer,
                x: 110,
                y: 220
            },
        ]
    );
}

#[test]
fn test_enter_releases_held_buttons_before_motion() {
    let (mut input, mut server, pointer, _) = setup();
    input.pointer_enter(&mut server, &origins(), SEAT, 1, WindowId(1), 0.0, 0.0);
    input.pointer_button(&mut server, SEAT, 5, BTN_LEFT, true);
    input.pointer_button(&mut server, SEAT, 6, BTN_RIGHT, true);
    input.pointer_leave(&mut server, SEAT);
    server.clear_posted();

    input.pointer_enter(&mut server, &origins(), SEAT, 2, WindowId(2), 1.0, 1.0);

    assert_eq!(
        server.posted(),
        &[
            Posted::Button {
                device: pointer,
                button: 1,
                pressed: false
            },
            Posted::Button {
                device: pointer,
                button: 3,
                pressed: false
            },
            Posted::Redirect {
                device: pointer,
                window: Some(WindowId(2))
            },
            Posted::Motion {
                device: pointer,
                x: 501,
                y: 1
            },
        ]
    );
    assert!(input.seat(SEAT).unwrap().pointer.as_ref().unwrap().buttons.is_empty());
}

#[test]
fn test_enter_releases_buttons_only_the_server_holds() {
    let (mut input, mut server, pointer, _) = setup();
    server.set_buttons_down(pointer, vec![2]);

    input.pointer_enter(&mut server, &origins(), SEAT, 1, WindowId(1), 0.0, 0.0);

    assert_eq!(
        server.posted()[0],
        Posted::Button {
            device: pointer,
            button: 2,
            pressed: false
        }
    );
}

#[test]
fn test_leave_does_not_release_buttons() {
    let (mut input, mut server, _, _) = setup();
    input.pointer_enter(&mut server, &origins(), SEAT, 1, WindowId(1), 0.0, 0.0);
    input.pointer_button(&mut server, SEAT, 5, BTN_LEFT, true);
    server.clear_posted();

    input.pointer_leave(&mut server, SEAT);

    assert_eq!(input.pointer_focus(SEAT), None);
    assert!(server
        .posted()
        .iter()
        .all(|p| !matches!(p, Posted::Button { .. })));
}

#[test]
fn test_motion_without_focus_dropped() {
    let (mut input, mut server, _, _) = setup();
    input.pointer_motion(&mut server, &origins(), SEAT, 1, 5.0, 5.0);
    assert!(server.posted().is_empty());
}

#[test]
fn test_motion_follows_window_origin() {
    let (mut input, mut server, pointer, _) = setup();
    input.pointer_enter(&mut server, &origins(), SEAT, 1, WindowId(1), 0.0, 0.0);
    server.clear_posted();

    let mut moved = origins();
    moved.0.insert(WindowId(1), (0, 0));
    input.pointer_motion(&mut server, &moved, SEAT, 9, 3.0, 4.0);

    assert_eq!(
        server.posted(),
        &[Posted::Motion {
            device: pointer,
            x: 3,
            y: 4
        }]
    );
}

#[test]
fn test_discrete_axis_emits_click_pairs() {
    let (mut input, mut server, pointer, _) = setup();

    input.pointer_axis(&mut server, SEAT, 1, Axis::Vertical, 30.0, Some(2));
    assert_eq!(server.clicks(pointer), vec![5, 5]);

    server.clear_posted();
    input.pointer_axis(&mut server, SEAT, 2, Axis::Horizontal, -10.0, Some(-1));
    assert_eq!(server.clicks(pointer), vec![6]);
}

#[test]
fn test_discrete_axis_clicks_are_capped() {
    let (mut input, mut server, pointer, _) = setup();

    input.pointer_axis(&mut server, SEAT, 1, Axis::Vertical, -1.0, Some(i32::MIN));
    let clicks = server.clicks(pointer);
    assert_eq!(clicks.len(), MAX_CLICKS_PER_EVENT as usize);
    assert!(clicks.iter().all(|b| *b == 4));
}

#[test]
fn test_continuous_axis_accumulates() {
    let (mut input, mut server, pointer, _) = setup();

    input.pointer_axis(&mut server, SEAT, 1, Axis::Vertical, -4.0, None);
    input.pointer_axis(&mut server, SEAT, 2, Axis::Vertical, -4.0, None);
    assert!(server.clicks(pointer).is_empty());

    input.pointer_axis(&mut server, SEAT, 3, Axis::Vertical, -4.0, None);
    assert_eq!(server.clicks(pointer), vec![4]);
}

#[test]
fn test_unmapped_buttons_ignored() {
    let (mut input, mut server, _, _) = setup();
    input.pointer_button(&mut server, SEAT, 1, 0x2ff, true);
    input.pointer_button(&mut server, SEAT, 1, 0x50, true);
    assert!(server.posted().is_empty());
}

#[test]
fn test_keys_offset_and_meta_modifier() {
    let (mut input, mut server, _, keyboard) = setup();

    input.keyboard_key(&mut server, SEAT, 1, 125, true);
    input.keyboard_key(&mut server, SEAT, 2, 30, true);

    let state = input.seat(SEAT).unwrap().keyboard.as_ref().unwrap();
    assert_eq!(state.modifiers, Modifiers::META);
    assert_eq!(
        server.posted(),
        &[
            Posted::Key {
                device: keyboard,
                keycode: 133,
                pressed: true
            },
            Posted::Key {
                device: keyboard,
                keycode: 38,
                pressed: true
            },
        ]
    );

    input.keyboard_key(&mut server, SEAT, 3, 125, false);
    let state = input.seat(SEAT).unwrap().keyboard.as_ref().unwrap();
    assert_eq!(state.modifiers, Modifiers::empty());
}

#[test]
fn test_out_of_range_key_ignored() {
    let (mut input, mut server, _, _) = setup();
    input.keyboard_key(&mut server, SEAT, 1, 400, true);
    input.keyboard_key(&mut server, SEAT, 1, u32::MAX, true);
    assert!(server.posted().is_empty());
}

#[test]
fn test_keyboard_enter_skips_out_of_range_keys() {
    let (mut input, mut server, _, keyboard) = setup();

    input.keyboard_enter(&mut server, SEAT, WindowId(2), &[30, 300, u32::MAX]);
    let state = input.seat(SEAT).unwrap().keyboard.as_ref().unwrap();
    assert_eq!(state.keys, BTreeSet::from([30]));
    assert_eq!(server.keys(keyboard), vec![(38, true)]);

    server.clear_posted();
    input.keyboard_leave(&mut server, SEAT);
    assert_eq!(server.keys(keyboard), vec![(38, false)]);
}

#[test]
fn test_keyboard_enter_and_leave_replay_keys() {
    let (mut input, mut server, _, keyboard) = setup();
    input.keyboard_key(&mut server, SEAT, 1, 30, true);
    server.clear_posted();

    input.keyboard_enter(&mut server, SEAT, WindowId(2), &[42, 31]);
    let state = input.seat(SEAT).unwrap().keyboard.as_ref().unwrap();
    assert_eq!(state.keys, BTreeSet::from([31, 42]));
    assert_eq!(state.modifiers, Modifiers::SHIFT);
    assert_eq!(input.keyboard_focus(SEAT), Some(WindowId(2)));
    assert_eq!(server.keys(keyboard), vec![(39, true), (50, true)]);

    server.clear_posted();
    input.keyboard_leave(&mut server, SEAT);
    assert_eq!(server.keys(keyboard), vec![(39, false), (50, false)]);
    assert_eq!(input.keyboard_focus(SEAT), None);
}

#[test]
fn test_forget_window_clears_both_devices() {
    let (mut input, mut server, pointer, _) = setup();
    input.pointer_enter(&mut server, &origins(), SEAT, 1, WindowId(1), 0.0, 0.0);
    input.keyboard_enter(&mut server, SEAT, WindowId(1), &[]);
    server.clear_posted();

    assert_eq!(input.forget_window(&mut server, WindowId(2)), 0);
    assert_eq!(input.forget_window(&mut server, WindowId(1)), 2);

    assert_eq!(input.pointer_focus(SEAT), None);
    assert_eq!(input.keyboard_focus(SEAT), None);
    assert_eq!(
        server.posted(),
        &[Posted::Redirect {
            device: pointer,
            window: None
        }]
    );
}

#[test]
fn test_modifiers_recorded() {
    let (mut input, _, _, _) = setup();
    let xkb = XkbState {
        depressed: 1,
        latched: 0,
        locked: 2,
        group: 1,
    };
    input.keyboard_modifiers(SEAT, xkb);
    assert_eq!(input.seat(SEAT).unwrap().keyboard.as_ref().unwrap().xkb, xkb);
}

proptest! {
    #[test]
    fn prop_enter_releases_exactly_held_buttons(
        presses in proptest::collection::vec((0usize..5, any::<bool>()), 0..40),
        server_held in proptest::collection::btree_set(1u32..=10, 0..4),
    ) {
        let codes = [BTN_LEFT, BTN_MIDDLE, BTN_RIGHT, BTN_SIDE, BTN_SIDE + 1];
        let (mut input, mut server, pointer, _) = setup();
        input.pointer_enter(&mut server, &origins(), SEAT, 1, WindowId(1), 0.0, 0.0);

        let mut expected = BTreeSet::new();
        for (idx, pressed) in presses {
            input.pointer_button(&mut server, SEAT, 1, codes[idx], pressed);
            let button = map_button(codes[idx], 10).unwrap();
            if pressed {
                expected.insert(button);
            } else {
                expected.remove(&button);
            }
        }
        input.pointer_leave(&mut server, SEAT);
        server.set_buttons_down(pointer, server_held.iter().copied().collect());
        expected.extend(server_held);
        server.clear_posted();

        input.pointer_enter(&mut server, &origins(), SEAT, 2, WindowId(2), 0.0, 0.0);

        let released: BTreeSet<u32> = server
            .posted()
            .iter()
            .filter_map(|p| match p {
                Posted::Button { button, pressed: false, .. } => Some(*button),
                _ => None,
            })
            .collect();
        prop_assert_eq!(released, expected);

        // every release precedes the motion into the new window
        let motion = server
            .posted()
            .iter()
            .position(|p| matches!(p, Posted::Motion { .. }))
            .unwrap();
        prop_assert!(server.posted()[motion..]
            .iter()
            .all(|p| !matches!(p, Posted::Button { .. })),
            "button posted after motion");
    }

    #[test]
    fn prop_continuous_scroll_conserves_units(
        deltas in proptest::collection::vec(-25.0f64..25.0, 1..30),
    ) {
        let (mut input, mut server, pointer, _) = setup();
        let step = InputConfig::default().scroll_step;

        for (t, delta) in deltas.iter().enumerate() {
            input.pointer_axis(&mut server, SEAT, t as u32, Axis::Vertical, *delta, None);
        }

        let clicks = server.clicks(pointer);
        let net: i32 = clicks.iter().map(|b| if *b == 5 { 1 } else { -1 }).sum();
        let total: f64 = deltas.iter().sum();
        prop_assert!(((net as f64) * step - total).abs() < step + 1e-6);
    }
}
