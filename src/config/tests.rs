//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization and file loading.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = BridgeConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.bridge.mode, WindowMode::Rootless);
    assert_eq!(config.bridge.buffer_backend, BufferBackend::Shm);
    assert!(config.bridge.shm_fallback);
    assert_eq!(config.damage.mode, DamageMode::PerRect);
    assert_eq!(config.input.pointer_buttons, 10);
    assert_eq!(config.output.default_width, 800);
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let mut original = BridgeConfig::default();
    original.bridge.mode = WindowMode::Fullscreen;
    original.bridge.buffer_backend = BufferBackend::Drm;
    original.logging.filters.push("xwl_bridge::input=trace".into());

    let toml_string = toml::to_string(&original)?;
    let deserialized: BridgeConfig = toml::from_str(&toml_string)?;

    assert_eq!(original, deserialized);
    Ok(())
}

#[test]
fn test_enum_spellings() -> Result<()> {
    let config: BridgeConfig = toml::from_str(
        r#"
        [bridge]
        mode = "fullscreen"
        buffer_backend = "drm"

        [damage]
        mode = "bounding"
        "#,
    )?;

    assert_eq!(config.bridge.mode, WindowMode::Fullscreen);
    assert_eq!(config.bridge.buffer_backend, BufferBackend::Drm);
    assert!(config.bridge.shm_fallback, "fallback defaults on when omitted");
    assert_eq!(config.damage.mode, DamageMode::Bounding);
    // untouched sections keep their defaults
    assert_eq!(config.input, InputConfig::default());
    Ok(())
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bridge.toml");

    fs::write(
        &path,
        r#"
        [bridge]
        mode = "rootless"
        buffer_backend = "shm"
        display = "wayland-1"

        [input]
        scroll_step = 15.0
        pointer_buttons = 12

        [logging]
        level = "debug"
        "#,
    )?;

    let config = BridgeConfig::load(&path)?;
    assert_eq!(config.bridge.display.as_deref(), Some("wayland-1"));
    assert_eq!(config.input.scroll_step, 15.0);
    assert_eq!(config.input.pointer_buttons, 12);
    assert_eq!(config.logging.level, "debug");
    Ok(())
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("saved.toml");

    let mut config = BridgeConfig::default();
    config.output.default_width = 1920;
    config.output.default_height = 1080;
    config.save(&path)?;

    let reloaded = BridgeConfig::load(&path)?;
    assert_eq!(reloaded, config);
    Ok(())
}

#[test]
fn test_load_or_default_missing_file() -> Result<()> {
    let dir = tempdir()?;
    let config = BridgeConfig::load_or_default(dir.path().join("absent.toml"))?;
    assert_eq!(config, BridgeConfig::default());
    Ok(())
}

#[test]
fn test_invalid_values_rejected() {
    let mut config = BridgeConfig::default();
    config.input.scroll_step = 0.0;
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.input.pointer_buttons = 2;
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.output.min_width = 9000;
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.output.default_height = 100;
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.logging.level = "loud".into();
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_file_reports_path() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[bridge\nmode = ")?;

    let err = BridgeConfig::load(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.toml"));
    Ok(())
}
