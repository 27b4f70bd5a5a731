//! Immediate-mode overlay: widgets emit solid rectangles into a [`DrawList`].
//!
//! The widget stack is rebuilt from the scene once per frame, before any
//! recording. [`OverlayStage`](crate::overlay_stage::OverlayStage) only
//! consumes the resulting draw list, however many widgets produced it.

use ash::vk;

use raytracer_scene::Scene;

/// Sample count at which the accumulation meter is full.
pub const METER_FULL_SAMPLES: u32 = 1024;

const MARGIN: i32 = 16;
const SWATCH_SIZE: u32 = 16;
const SWATCH_SPACING: i32 = 20;
const OUTLINE_WIDTH: u32 = 2;

const PANEL_COLOR: [f32; 4] = [0.08, 0.08, 0.1, 1.0];
const METER_COLOR: [f32; 4] = [0.2, 0.75, 0.35, 1.0];
const SELECTION_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Axis-aligned rectangle in target pixels, already clipped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub color: [f32; 4],
}

/// Rectangles for one frame, in painter's order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawList {
    extent: vk::Extent2D,
    rects: Vec<OverlayRect>,
}

impl DrawList {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            rects: Vec::new(),
        }
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn rects(&self) -> &[OverlayRect] {
        &self.rects
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Adds a filled rectangle, clipped to the extent. Rectangles with no
    /// visible area are dropped.
    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: [f32; 4]) {
        self.push_clipped(i64::from(x), i64::from(y), width, height, color);
    }

    /// Adds a hollow rectangle `thickness` pixels wide.
    pub fn outline_rect(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        thickness: u32,
        color: [f32; 4],
    ) {
        let t = thickness.min(width / 2).min(height / 2);
        let inner_height = height - 2 * t;
        let (x, y) = (i64::from(x), i64::from(y));
        let right = x + i64::from(width - t);
        let bottom = y + i64::from(height - t);
        let inner_top = y + i64::from(t);

        self.push_clipped(x, y, width, t, color);
        self.push_clipped(x, bottom, width, t, color);
        self.push_clipped(x, inner_top, t, inner_height, color);
        self.push_clipped(right, inner_top, t, inner_height, color);
    }

    /// Origins are `i64` so edges computed from any `i32` origin and `u32`
    /// size cannot overflow.
    fn push_clipped(&mut self, x: i64, y: i64, width: u32, height: u32, color: [f32; 4]) {
        let clip = |start: i64, len: u32, limit: u32| -> Option<(u32, u32)> {
            let begin = start.max(0);
            let end = (start + i64::from(len)).min(i64::from(limit));
            (end > begin).then(|| (begin as u32, (end - begin) as u32))
        };

        let Some((x, width)) = clip(x, width, self.extent.width) else {
            return;
        };
        let Some((y, height)) = clip(y, height, self.extent.height) else {
            return;
        };

        self.rects.push(OverlayRect {
            x,
            y,
            width,
            height,
            color,
        });
    }
}

/// One element of the overlay.
pub trait OverlayWidget {
    fn name(&self) -> &str;

    /// Refreshes widget state from the scene.
    fn update(&mut self, scene: &Scene);

    /// Emits this widget's rectangles.
    fn render(&self, draw_list: &mut DrawList);
}

/// Bar along the bottom edge that fills logarithmically with the number of
/// accumulated samples.
#[derive(Debug, Default)]
pub struct AccumulationMeter {
    fill: f32,
}

impl AccumulationMeter {
    /// Fraction of the bar filled for `samples` accumulated frames.
    pub fn fill_for(samples: u32) -> f32 {
        let full = (f64::from(METER_FULL_SAMPLES) + 1.0).log2();
        ((f64::from(samples) + 1.0).log2() / full).min(1.0) as f32
    }

    pub fn fill(&self) -> f32 {
        self.fill
    }
}

impl OverlayWidget for AccumulationMeter {
    fn name(&self) -> &str {
        "accumulation"
    }

    fn update(&mut self, scene: &Scene) {
        self.fill = Self::fill_for(scene.frame_count());
    }

    fn render(&self, draw_list: &mut DrawList) {
        let extent = draw_list.extent();
        let width = extent.width.saturating_sub(2 * MARGIN as u32).min(256);
        let height = 10;
        let y = extent.height as i32 - MARGIN - height as i32;

        draw_list.fill_rect(MARGIN, y, width, height, PANEL_COLOR);
        let filled = (width as f32 * self.fill).round() as u32;
        draw_list.fill_rect(MARGIN, y, filled, height, METER_COLOR);
    }
}

/// Row of color swatches, one per object, with the selection outlined.
#[derive(Debug, Default)]
pub struct ObjectPalette {
    swatches: Vec<[f32; 4]>,
    selected: Option<usize>,
}

impl OverlayWidget for ObjectPalette {
    fn name(&self) -> &str {
        "objects"
    }

    fn update(&mut self, scene: &Scene) {
        self.swatches.clear();
        self.swatches.extend(
            scene
                .objects()
                .iter()
                .map(|o| [o.color.x, o.color.y, o.color.z, 1.0]),
        );
        self.selected = scene.selected();
    }

    fn render(&self, draw_list: &mut DrawList) {
        for (i, color) in self.swatches.iter().enumerate() {
            let x = MARGIN + i as i32 * SWATCH_SPACING;
            if self.selected == Some(i) {
                let pad = OUTLINE_WIDTH as i32;
                draw_list.outline_rect(
                    x - pad,
                    MARGIN - pad,
                    SWATCH_SIZE + 2 * OUTLINE_WIDTH,
                    SWATCH_SIZE + 2 * OUTLINE_WIDTH,
                    OUTLINE_WIDTH,
                    SELECTION_COLOR,
                );
            }
            draw_list.fill_rect(x, MARGIN, SWATCH_SIZE, SWATCH_SIZE, *color);
        }
    }
}

/// Ordered widget stack producing one [`DrawList`] per frame.
pub struct Overlay {
    widgets: Vec<Box<dyn OverlayWidget>>,
    visible: bool,
}

impl Default for Overlay {
    fn default() -> Self {
        let mut overlay = Self::empty();
        overlay.push(Box::new(AccumulationMeter::default()));
        overlay.push(Box::new(ObjectPalette::default()));
        overlay
    }
}

impl Overlay {
    /// The built-in widgets: accumulation meter and object palette.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            widgets: Vec::new(),
            visible: true,
        }
    }

    /// Adds a widget drawn after (on top of) the existing ones.
    pub fn push(&mut self, widget: Box<dyn OverlayWidget>) {
        tracing::debug!("Overlay widget added: {}", widget.name());
        self.widgets.push(widget);
    }

    pub fn widget_count(&self) -> usize {
        self.widgets.len()
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn toggle_visible(&mut self) -> bool {
        self.visible = !self.visible;
        self.visible
    }

    /// Updates every widget from `scene` and collects their draw data.
    /// A hidden overlay yields an empty list.
    pub fn build(&mut self, scene: &Scene, extent: vk::Extent2D) -> DrawList {
        let mut draw_list = DrawList::new(extent);
        if !self.visible {
            return draw_list;
        }
        for widget in &mut self.widgets {
            widget.update(scene);
            widget.render(&mut draw_list);
        }
        draw_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const WHITE: [f32; 4] = [1.0; 4];

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_fill_rect_inside() {
        let mut list = DrawList::new(extent(100, 100));
        list.fill_rect(10, 20, 30, 40, WHITE);
        assert_eq!(
            list.rects(),
            &[OverlayRect {
                x: 10,
                y: 20,
                width: 30,
                height: 40,
                color: WHITE
            }]
        );
    }

    #[test]
    fn test_fill_rect_clips_to_extent() {
        let mut list = DrawList::new(extent(100, 50));
        list.fill_rect(-5, 40, 20, 30, WHITE);
        list.fill_rect(90, -10, 50, 15, WHITE);

        let rects = list.rects();
        assert_eq!((rects[0].x, rects[0].y, rects[0].width, rects[0].height), (0, 40, 15, 10));
        assert_eq!((rects[1].x, rects[1].y, rects[1].width, rects[1].height), (90, 0, 10, 5));
    }

    #[test]
    fn test_fill_rect_drops_invisible() {
        let mut list = DrawList::new(extent(100, 50));
        list.fill_rect(100, 0, 10, 10, WHITE);
        list.fill_rect(-20, 0, 20, 10, WHITE);
        list.fill_rect(0, 0, 0, 10, WHITE);
        list.fill_rect(0, 60, 10, 10, WHITE);
        assert!(list.is_empty());

        let mut empty = DrawList::new(extent(0, 0));
        empty.fill_rect(0, 0, 10, 10, WHITE);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_outline_rect() {
        let mut list = DrawList::new(extent(100, 100));
        list.outline_rect(10, 10, 20, 20, 2, WHITE);
        assert_eq!(list.rects().len(), 4);
        let area: u32 = list.rects().iter().map(|r| r.width * r.height).sum();
        assert_eq!(area, 20 * 20 - 16 * 16);
    }

    #[test]
    fn test_outline_rect_near_coordinate_limits() {
        let mut list = DrawList::new(extent(100, 100));
        list.outline_rect(i32::MAX - 5, i32::MAX - 5, u32::MAX, u32::MAX, 4, WHITE);
        assert!(list.is_empty());

        list.outline_rect(i32::MIN, i32::MIN, u32::MAX, u32::MAX, 4, WHITE);
        assert!(list.is_empty());
    }

    #[test]
    fn test_outline_rect_partly_offscreen() {
        let mut list = DrawList::new(extent(100, 100));
        list.outline_rect(-10, -10, 60, 60, 2, WHITE);

        let edges: Vec<(u32, u32, u32, u32)> = list
            .rects()
            .iter()
            .map(|r| (r.x, r.y, r.width, r.height))
            .collect();
        assert_eq!(edges, vec![(0, 48, 50, 2), (48, 0, 2, 48)]);
    }

    #[test]
    fn test_meter_fill_is_logarithmic() {
        assert_abs_diff_eq!(AccumulationMeter::fill_for(0), 0.0);
        assert_abs_diff_eq!(AccumulationMeter::fill_for(METER_FULL_SAMPLES), 1.0);
        assert_abs_diff_eq!(AccumulationMeter::fill_for(u32::MAX), 1.0);

        let early = AccumulationMeter::fill_for(31);
        assert_abs_diff_eq!(early, 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_overlay_builds_all_widgets() {
        let mut scene = Scene::random(3, Some(2));
        scene.select_next();
        let mut overlay = Overlay::new();
        assert_eq!(overlay.widget_count(), 2);

        let list = overlay.build(&scene, extent(800, 600));
        // Meter background, 3 swatches, 4 outline edges; empty meter fill dropped.
        assert_eq!(list.rects().len(), 1 + 3 + 4);
    }

    #[test]
    fn test_hidden_overlay_is_empty() {
        let scene = Scene::random(3, Some(2));
        let mut overlay = Overlay::new();
        assert!(!overlay.toggle_visible());
        assert!(overlay.build(&scene, extent(800, 600)).is_empty());
    }

    #[test]
    fn test_custom_widget_order() {
        struct Banner;
        impl OverlayWidget for Banner {
            fn name(&self) -> &str {
                "banner"
            }
            fn update(&mut self, _scene: &Scene) {}
            fn render(&self, draw_list: &mut DrawList) {
                draw_list.fill_rect(0, 0, 5, 5, WHITE);
            }
        }

        let mut overlay = Overlay::empty();
        overlay.push(Box::new(Banner));
        let list = overlay.build(&Scene::default(), extent(10, 10));
        assert_eq!(list.rects().len(), 1);
    }
}
