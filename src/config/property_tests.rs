//! Property-based tests for configuration module
//!
//! These tests use proptest to generate random configurations and verify
//! validation invariants and serialization round-trips.

use super::*;
use proptest::prelude::*;

fn window_mode() -> impl Strategy<Value = WindowMode> {
    prop_oneof![Just(WindowMode::Rootless), Just(WindowMode::Fullscreen)]
}

fn buffer_backend() -> impl Strategy<Value = BufferBackend> {
    prop_oneof![Just(BufferBackend::Drm), Just(BufferBackend::Shm)]
}

fn damage_mode() -> impl Strategy<Value = DamageMode> {
    prop_oneof![Just(DamageMode::PerRect), Just(DamageMode::Bounding)]
}

prop_compose! {
    fn valid_output_config()(
        min_width in 1u32..2000,
        min_height in 1u32..2000,
        extra_w in 0u32..6000,
        extra_h in 0u32..6000,
        pick_w in 0.0f64..=1.0,
        pick_h in 0.0f64..=1.0,
    ) -> OutputConfig {
        let max_width = min_width + extra_w;
        let max_height = min_height + extra_h;
        OutputConfig {
            min_width,
            min_height,
            max_width,
            max_height,
            default_width: min_width + (extra_w as f64 * pick_w) as u32,
            default_height: min_height + (extra_h as f64 * pick_h) as u32,
        }
    }
}

prop_compose! {
    fn valid_config()(
        mode in window_mode(),
        buffer_backend in buffer_backend(),
        shm_fallback in any::<bool>(),
        damage in damage_mode(),
        scroll_step in 0.5f64..100.0,
        pointer_buttons in 3u32..=32,
        output in valid_output_config(),
        level in prop_oneof![
            Just("error".to_string()),
            Just("warn".to_string()),
            Just("info".to_string()),
            Just("debug".to_string()),
            Just("trace".to_string()),
        ],
    ) -> BridgeConfig {
        BridgeConfig {
            bridge: BridgeSection {
                mode,
                buffer_backend,
                shm_fallback,
                display: None,
            },
            damage: DamageConfig { mode: damage },
            input: InputConfig { scroll_step, pointer_buttons },
            output,
            logging: LoggingConfig { level, filters: Vec::new() },
        }
    }
}

proptest! {
    #[test]
    fn prop_valid_configs_validate(config in valid_config()) {
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn prop_toml_roundtrip_preserves_config(config in valid_config()) {
        let text = toml::to_string(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&text).unwrap();
        prop_assert_eq!(parsed.bridge, config.bridge);
        prop_assert_eq!(parsed.output, config.output);
        prop_assert_eq!(parsed.input.pointer_buttons, config.input.pointer_buttons);
        prop_assert!((parsed.input.scroll_step - config.input.scroll_step).abs() < 1e-9);
    }

    #[test]
    fn prop_button_count_bounds(buttons in 0u32..64) {
        let mut config = BridgeConfig::default();
        config.input.pointer_buttons = buttons;
        prop_assert_eq!(config.validate().is_ok(), (3..=32).contains(&buttons));
    }

    #[test]
    fn prop_inverted_ranges_rejected(min in 2u32..5000) {
        let mut config = BridgeConfig::default();
        config.output.min_width = min;
        config.output.max_width = min - 1;
        config.output.default_width = min;
        prop_assert!(config.validate().is_err());
    }
}
