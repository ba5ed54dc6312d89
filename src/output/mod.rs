//! Virtual outputs
//!
//! One virtual output/CRTC pair per compositor output. Geometry and mode
//! events update it; the legacy screen size follows the union of the
//! current modes, clamped to the configured range. The CRTC side does no
//! hardware work: DPMS, cursor and shadow requests are accepted and ignored.

use crate::config::OutputConfig;
use crate::protocol::{CompositorEvent, OutputId, Subpixel};
use crate::server::OutputSink;
use log::{debug, info, trace};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VirtualOutput {
    pub id: OutputId,
    pub x: i32,
    pub y: i32,
    /// Millimetres
    pub physical_width: i32,
    pub physical_height: i32,
    pub subpixel: Subpixel,
    pub make: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    /// mHz
    pub refresh: i32,
    /// A current mode has been reported
    pub has_mode: bool,
}

impl VirtualOutput {
    fn new(id: OutputId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Output name as presented to RandR clients
    pub fn name(&self) -> String {
        format!("BRIDGE{}", self.id.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpmsMode {
    On,
    Standby,
    Suspend,
    Off,
}

/// CRTC operations the legacy server may invoke
///
/// The compositor owns the real hardware, so every operation is accepted
/// and does nothing.
pub trait CrtcFunctions {
    fn dpms(&mut self, _mode: DpmsMode) {}
    fn set_cursor_position(&mut self, _x: i32, _y: i32) {}
    fn show_cursor(&mut self) {}
    fn hide_cursor(&mut self) {}

    /// Rotation shadow buffers are never provided
    fn shadow_allocate(&mut self, _width: u32, _height: u32) -> Option<Vec<u8>> {
        None
    }
}

impl CrtcFunctions for VirtualOutput {
    fn dpms(&mut self, mode: DpmsMode) {
        trace!("Ignoring DPMS {:?} on {}", mode, self.name());
    }
}

#[derive(Debug)]
pub struct OutputManager {
    config: OutputConfig,
    outputs: BTreeMap<OutputId, VirtualOutput>,
    screen: (u32, u32),
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        let screen = (config.default_width, config.default_height);
        Self {
            config,
            outputs: BTreeMap::new(),
            screen,
        }
    }

    pub fn get(&self, id: OutputId) -> Option<&VirtualOutput> {
        self.outputs.get(&id)
    }

    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut VirtualOutput> {
        self.outputs.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    pub fn add<S: OutputSink>(&mut self, server: &mut S, id: OutputId) {
        if self.outputs.contains_key(&id) {
            return;
        }
        let output = VirtualOutput::new(id);
        info!("Added output {}", output.name());
        server.output_changed(&output);
        self.outputs.insert(id, output);
    }

    pub fn remove<S: OutputSink>(&mut self, server: &mut S, id: OutputId) -> bool {
        if self.outputs.remove(&id).is_none() {
            return false;
        }
        info!("Removed output {:?}", id);
        server.output_removed(id);
        self.update_screen(server);
        true
    }

    /// Apply a geometry or mode event; other events are ignored
    pub fn apply<S: OutputSink>(&mut self, server: &mut S, event: &CompositorEvent) -> bool {
        let changed = match event {
            CompositorEvent::OutputGeometry {
                output,
                x,
                y,
                physical_width,
                physical_height,
                subpixel,
                make,
                model,
            } => {
                let Some(out) = self.outputs.get_mut(output) else {
                    return false;
                };
                out.x = *x;
                out.y = *y;
                out.physical_width = *physical_width;
                out.physical_height = *physical_height;
                out.subpixel = *subpixel;
                out.make = make.clone();
                out.model = model.clone();
                Some(*output)
            }
            CompositorEvent::OutputMode {
                output,
                width,
                height,
                refresh,
                current,
            } => {
                if !current {
                    return false;
                }
                let Some(out) = self.outputs.get_mut(output) else {
                    return false;
                };
                out.width = (*width).max(0) as u32;
                out.height = (*height).max(0) as u32;
                out.refresh = *refresh;
                out.has_mode = true;
                Some(*output)
            }
            _ => None,
        };

        let Some(id) = changed else {
            return false;
        };
        if let Some(out) = self.outputs.get(&id) {
            debug!(
                "Output {} now {}x{}+{}+{} @{}mHz",
                out.name(),
                out.width,
                out.height,
                out.x,
                out.y,
                out.refresh
            );
            server.output_changed(out);
        }
        self.update_screen(server);
        true
    }

    /// Whether the legacy server may resize its screen to this size
    ///
    /// The size is dictated by the compositor; only that size is accepted,
    /// and only when it lies within the configured range.
    pub fn resize_allowed(&self, width: u32, height: u32) -> bool {
        (width, height) == self.screen && self.in_range(width, height)
    }

    fn in_range(&self, width: u32, height: u32) -> bool {
        (self.config.min_width..=self.config.max_width).contains(&width)
            && (self.config.min_height..=self.config.max_height).contains(&height)
    }

    fn update_screen<S: OutputSink>(&mut self, server: &mut S) {
        let extent = self
            .outputs
            .values()
            .filter(|o| o.has_mode)
            .map(|o| {
                (
                    (o.x.max(0) as u32).saturating_add(o.width),
                    (o.y.max(0) as u32).saturating_add(o.height),
                )
            })
            .reduce(|a, b| (a.0.max(b.0), a.1.max(b.1)));

        let (width, height) = extent.unwrap_or((self.config.default_width, self.config.default_height));
        let size = (
            width.clamp(self.config.min_width, self.config.max_width),
            height.clamp(self.config.min_height, self.config.max_height),
        );
        if size != self.screen {
            info!("Screen size {}x{}", size.0, size.1);
            self.screen = size;
            server.screen_resized(size.0, size.1);
        }
    }

    /// Remove every output
    pub fn close<S: OutputSink>(&mut self, server: &mut S) {
        for id in std::mem::take(&mut self.outputs).into_keys() {
            server.output_removed(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;

    fn mode(output: u32, width: i32, height: i32) -> CompositorEvent {
        CompositorEvent::OutputMode {
            output: OutputId(output),
            width,
            height,
            refresh: 60_000,
            current: true,
        }
    }

    fn geometry(output: u32, x: i32, y: i32) -> CompositorEvent {
        CompositorEvent::OutputGeometry {
            output: OutputId(output),
            x,
            y,
            physical_width: 300,
            physical_height: 200,
            subpixel: Subpixel::HorizontalRgb,
            make: "ACME".into(),
            model: "Panel".into(),
        }
    }

    #[test]
    fn test_screen_follows_mode() {
        let mut server = FakeServer::new();
        let mut outputs = OutputManager::new(OutputConfig::default());
        assert_eq!(outputs.screen_size(), (800, 600));

        outputs.add(&mut server, OutputId(3));
        assert!(outputs.apply(&mut server, &geometry(3, 0, 0)));
        assert!(outputs.apply(&mut server, &mode(3, 1920, 1080)));

        assert_eq!(outputs.screen_size(), (1920, 1080));
        assert_eq!(server.screen_size(), Some((1920, 1080)));
        let out = outputs.get(OutputId(3)).unwrap();
        assert_eq!(out.make, "ACME");
        assert_eq!(out.refresh, 60_000);
        assert_eq!(server.output(OutputId(3)).unwrap().width, 1920);
    }

    #[test]
    fn test_non_current_mode_ignored() {
        let mut server = FakeServer::new();
        let mut outputs = OutputManager::new(OutputConfig::default());
        outputs.add(&mut server, OutputId(1));

        let event = CompositorEvent::OutputMode {
            output: OutputId(1),
            width: 640,
            height: 480,
            refresh: 75_000,
            current: false,
        };
        assert!(!outputs.apply(&mut server, &event));
        assert!(!outputs.apply(&mut server, &mode(9, 640, 480)), "unknown output");
    }

    #[test]
    fn test_two_outputs_side_by_side() {
        let mut server = FakeServer::new();
        let mut outputs = OutputManager::new(OutputConfig::default());
        outputs.add(&mut server, OutputId(1));
        outputs.add(&mut server, OutputId(2));
        outputs.apply(&mut server, &mode(1, 1280, 1024));
        outputs.apply(&mut server, &geometry(2, 1280, 0));
        outputs.apply(&mut server, &mode(2, 1024, 768));

        assert_eq!(outputs.screen_size(), (2304, 1024));

        assert!(outputs.remove(&mut server, OutputId(2)));
        assert_eq!(outputs.screen_size(), (1280, 1024));
        assert!(server.output(OutputId(2)).is_none());
    }

    #[test]
    fn test_screen_clamped_to_range() {
        let mut server = FakeServer::new();
        let mut outputs = OutputManager::new(OutputConfig::default());
        outputs.add(&mut server, OutputId(1));
        outputs.apply(&mut server, &mode(1, 100, 50));
        assert_eq!(outputs.screen_size(), (320, 200));
    }

    #[test]
    fn test_resize_only_to_compositor_size() {
        let mut server = FakeServer::new();
        let mut outputs = OutputManager::new(OutputConfig::default());
        outputs.add(&mut server, OutputId(1));
        outputs.apply(&mut server, &mode(1, 1024, 768));

        assert!(outputs.resize_allowed(1024, 768));
        assert!(!outputs.resize_allowed(800, 600));
    }

    #[test]
    fn test_crtc_functions_are_noops() {
        let mut out = VirtualOutput::new(OutputId(1));
        let before = out.clone();
        out.dpms(DpmsMode::Off);
        out.set_cursor_position(10, 10);
        out.show_cursor();
        out.hide_cursor();
        assert_eq!(out.shadow_allocate(64, 64), None);
        assert_eq!(out, before);
        assert_eq!(out.name(), "BRIDGE1");
    }
}
