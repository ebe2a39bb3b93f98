//! Detection overlay: maps normalized boxes onto the displayed image.
//!
//! [`render_overlay`] is a pure function of the rendered image size and the
//! detections. Shells call it (through the view model) whenever the image
//! finishes loading or the viewport resizes, and always clear their drawing
//! surface before painting the returned frame. [`OverlayCanvas`] does the
//! same into an RGBA buffer for shells without a 2D canvas.

use std::io::Cursor;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::model::{Detection, NormalizedBox};
use crate::{ImageError, MAX_FRAME_DIMENSION, NORMALIZED_SCALE};

pub const STROKE_COLOR: &str = "#10b981";
pub const STROKE_RGBA: [u8; 4] = [0x10, 0xb9, 0x81, 0xff];
pub const LABEL_TEXT_RGBA: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
pub const LINE_WIDTH: f64 = 3.0;
pub const LABEL_FONT: &str = "bold 12px sans-serif";
pub const LABEL_CHIP_HEIGHT: f64 = 20.0;
pub const LABEL_TEXT_PADDING: f64 = 5.0;
/// Average advance of the 12px label font; shells with text metrics may
/// widen the chip to the measured text.
pub const LABEL_CHAR_WIDTH: f64 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderedSize {
    pub width: f64,
    pub height: f64,
}

impl RenderedSize {
    /// `None` unless both sides are finite and positive.
    #[must_use]
    pub fn new(width: f64, height: f64) -> Option<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        (valid(width) && valid(height)).then_some(Self { width, height })
    }
}

/// Pixel rectangle relative to the top-left corner of the rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    #[must_use]
    pub fn from_normalized(bounds: &NormalizedBox, size: RenderedSize) -> Self {
        let scale_y = |v: u16| f64::from(v) / NORMALIZED_SCALE * size.height;
        let scale_x = |v: u16| f64::from(v) / NORMALIZED_SCALE * size.width;
        Self {
            top: scale_y(bounds.ymin()),
            left: scale_x(bounds.xmin()),
            height: (f64::from(bounds.ymax()) - f64::from(bounds.ymin())) / NORMALIZED_SCALE
                * size.height,
            width: (f64::from(bounds.xmax()) - f64::from(bounds.xmin())) / NORMALIZED_SCALE
                * size.width,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelChip {
    pub text: String,
    pub rect: PixelRect,
    pub text_left: f64,
    pub text_baseline: f64,
}

impl LabelChip {
    fn above(rect: &PixelRect, text: &str) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let text_width = text.chars().count() as f64 * LABEL_CHAR_WIDTH;
        let top = (rect.top - LABEL_CHIP_HEIGHT).max(0.0);
        Self {
            text: text.to_string(),
            rect: PixelRect {
                top,
                left: rect.left,
                width: text_width + 2.0 * LABEL_TEXT_PADDING,
                height: LABEL_CHIP_HEIGHT,
            },
            text_left: rect.left + LABEL_TEXT_PADDING,
            text_baseline: top + LABEL_CHIP_HEIGHT - LABEL_TEXT_PADDING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayBox {
    pub rect: PixelRect,
    pub label: LabelChip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayStyle {
    pub stroke_color: String,
    pub line_width: f64,
    pub font: String,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_color: STROKE_COLOR.to_string(),
            line_width: LINE_WIDTH,
            font: LABEL_FONT.to_string(),
        }
    }
}

/// Everything to paint on a freshly cleared surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayFrame {
    pub width: f64,
    pub height: f64,
    pub boxes: Vec<OverlayBox>,
    pub style: OverlayStyle,
}

impl OverlayFrame {
    #[must_use]
    pub fn cleared() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            boxes: Vec::new(),
            style: OverlayStyle::default(),
        }
    }
}

#[must_use]
pub fn render_overlay(size: Option<RenderedSize>, detections: &[Detection]) -> OverlayFrame {
    let Some(size) = size else {
        return OverlayFrame::cleared();
    };

    let boxes = detections
        .iter()
        .map(|detection| {
            let rect = PixelRect::from_normalized(&detection.bounds, size);
            OverlayBox {
                label: LabelChip::above(&rect, &detection.species),
                rect,
            }
        })
        .collect();

    OverlayFrame {
        width: size.width,
        height: size.height,
        boxes,
        style: OverlayStyle::default(),
    }
}

// ============================================================================
// Raster canvas
// ============================================================================

/// Transparent RGBA overlay buffer, redrawn from scratch on every call.
#[derive(Debug, Clone)]
pub struct OverlayCanvas {
    buffer: RgbaImage,
}

impl Default for OverlayCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayCanvas {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: RgbaImage::new(0, 0),
        }
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.buffer
    }

    /// Clears the whole buffer, resizes it to `size` and paints `detections`.
    pub fn redraw(&mut self, size: Option<RenderedSize>, detections: &[Detection]) -> &RgbaImage {
        let frame = render_overlay(size, detections);
        let (width, height) = pixel_dimensions(frame.width, frame.height);
        if self.buffer.dimensions() == (width, height) {
            for pixel in self.buffer.pixels_mut() {
                *pixel = Rgba([0, 0, 0, 0]);
            }
        } else {
            self.buffer = RgbaImage::new(width, height);
        }
        paint_frame(&mut self.buffer, &frame);
        &self.buffer
    }
}

/// Decodes `source`, paints the overlay at its native size and returns a PNG.
#[instrument(skip(source, detections), fields(len = source.len(), detections = detections.len()))]
pub fn annotate_png(source: &[u8], detections: &[Detection]) -> Result<Vec<u8>, ImageError> {
    let decoded =
        image::load_from_memory(source).map_err(|e| ImageError::DecodeFailed(e.to_string()))?;
    let mut canvas = decoded.into_rgba8();
    let (width, height) = canvas.dimensions();
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(ImageError::DimensionsTooLarge {
            width,
            height,
            max: MAX_FRAME_DIMENSION,
        });
    }

    let frame = render_overlay(
        RenderedSize::new(f64::from(width), f64::from(height)),
        detections,
    );
    paint_frame(&mut canvas, &frame);

    let mut out = Cursor::new(Vec::new());
    PngEncoder::new(&mut out)
        .write_image(canvas.as_raw(), width, height, ExtendedColorType::Rgba8)
        .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
    Ok(out.into_inner())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pixel_dimensions(width: f64, height: f64) -> (u32, u32) {
    let max = f64::from(MAX_FRAME_DIMENSION);
    (
        width.round().clamp(0.0, max) as u32,
        height.round().clamp(0.0, max) as u32,
    )
}

fn paint_frame(canvas: &mut RgbaImage, frame: &OverlayFrame) {
    let stroke = Rgba(STROKE_RGBA);
    let half = LINE_WIDTH / 2.0;
    for overlay in &frame.boxes {
        let PixelRect {
            top,
            left,
            width,
            height,
        } = overlay.rect;
        let (x0, x1) = ordered(left, left + width);
        let (y0, y1) = ordered(top, top + height);

        fill_rect(canvas, x0 - half, y0 - half, x1 + half, y0 + half, stroke);
        fill_rect(canvas, x0 - half, y1 - half, x1 + half, y1 + half, stroke);
        fill_rect(canvas, x0 - half, y0 - half, x0 + half, y1 + half, stroke);
        fill_rect(canvas, x1 - half, y0 - half, x1 + half, y1 + half, stroke);

        let chip = overlay.label.rect;
        fill_rect(
            canvas,
            chip.left,
            chip.top,
            chip.left + chip.width,
            chip.top + chip.height,
            stroke,
        );
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Fills `[x0, x1) x [y0, y1)` clipped to the canvas.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fill_rect(canvas: &mut RgbaImage, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgba<u8>) {
    let (width, height) = canvas.dimensions();
    let clip = |v: f64, max: u32| v.round().clamp(0.0, f64::from(max)) as u32;
    let (cx0, cx1) = (clip(x0, width), clip(x1, width));
    let (cy0, cy1) = (clip(y0, height), clip(y1, height));
    for y in cy0..cy1 {
        for x in cx0..cx1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::test_images::create_test_png;
    use proptest::prelude::*;

    fn detection(bounds: [u16; 4], species: &str) -> Detection {
        Detection {
            bounds: NormalizedBox::from(bounds),
            label: format!("{species} head"),
            species: species.to_string(),
            confidence: 0.9,
        }
    }

    fn size(width: f64, height: f64) -> Option<RenderedSize> {
        RenderedSize::new(width, height)
    }

    #[test]
    fn maps_normalized_box_to_pixels() {
        let frame = render_overlay(size(800.0, 600.0), &[detection([100, 250, 500, 750], "Cow")]);
        let rect = frame.boxes[0].rect;
        assert!((rect.top - 60.0).abs() < 1e-9);
        assert!((rect.left - 200.0).abs() < 1e-9);
        assert!((rect.height - 240.0).abs() < 1e-9);
        assert!((rect.width - 400.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_size_renders_nothing() {
        let frame = render_overlay(None, &[detection([0, 0, 10, 10], "Cow")]);
        assert!(frame.boxes.is_empty());
        assert!(RenderedSize::new(0.0, 100.0).is_none());
        assert!(RenderedSize::new(f64::NAN, 100.0).is_none());
    }

    #[test]
    fn one_box_per_detection_in_order() {
        let detections = [
            detection([0, 0, 100, 100], "Sheep"),
            detection([200, 200, 300, 300], "Goat"),
        ];
        let frame = render_overlay(size(100.0, 100.0), &detections);
        let labels: Vec<_> = frame.boxes.iter().map(|b| b.label.text.as_str()).collect();
        assert_eq!(labels, vec!["Sheep", "Goat"]);
    }

    #[test]
    fn label_chip_sits_above_box_and_clamps_at_top() {
        let frame = render_overlay(
            size(1000.0, 1000.0),
            &[detection([500, 100, 600, 200], "Cow"), detection([5, 0, 50, 50], "Pig")],
        );
        let first = &frame.boxes[0].label;
        assert!((first.rect.top - 480.0).abs() < 1e-9);
        assert!((first.rect.height - LABEL_CHIP_HEIGHT).abs() < f64::EPSILON);
        assert!((first.rect.width - (3.0 * LABEL_CHAR_WIDTH + 10.0)).abs() < 1e-9);
        assert!((first.text_left - 105.0).abs() < 1e-9);

        let second = &frame.boxes[1].label;
        assert!(second.rect.top.abs() < f64::EPSILON);
    }

    #[test]
    fn resize_recomputes_from_scratch() {
        let detections = [detection([0, 0, 500, 500], "Cow")];
        let small = render_overlay(size(100.0, 100.0), &detections);
        let large = render_overlay(size(400.0, 200.0), &detections);
        assert!((small.boxes[0].rect.width - 50.0).abs() < 1e-9);
        assert!((large.boxes[0].rect.width - 200.0).abs() < 1e-9);
        assert!((large.boxes[0].rect.height - 100.0).abs() < 1e-9);
    }

    #[test]
    fn canvas_redraw_clears_previous_boxes() {
        let mut canvas = OverlayCanvas::new();
        canvas.redraw(size(100.0, 100.0), &[detection([400, 400, 600, 600], "Cow")]);
        assert_eq!(canvas.image().get_pixel(40, 50).0, STROKE_RGBA);

        canvas.redraw(size(100.0, 100.0), &[]);
        assert!(canvas.image().pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn canvas_strokes_edges_and_leaves_interior_clear() {
        let mut canvas = OverlayCanvas::new();
        let image = canvas.redraw(size(200.0, 100.0), &[detection([200, 100, 800, 900], "Cow")]);
        assert_eq!(image.dimensions(), (200, 100));
        assert_eq!(image.get_pixel(20, 50).0, STROKE_RGBA);
        assert_eq!(image.get_pixel(100, 20).0, STROKE_RGBA);
        assert_eq!(image.get_pixel(100, 50).0[3], 0);
    }

    #[test]
    fn annotate_png_paints_at_native_size() {
        let png = create_test_png(50, 40);
        let annotated =
            annotate_png(&png, &[detection([250, 200, 750, 800], "Cow")]).expect("annotates");
        let decoded = image::load_from_memory(&annotated).expect("png").into_rgba8();
        assert_eq!(decoded.dimensions(), (50, 40));
        assert_eq!(decoded.get_pixel(10, 20).0, STROKE_RGBA);
    }

    #[test]
    fn annotate_rejects_garbage() {
        assert!(matches!(
            annotate_png(b"nope", &[]),
            Err(ImageError::DecodeFailed(_))
        ));
    }

    proptest! {
        #[test]
        fn pixel_bounds_follow_normalized_scaling(
            ymin in 0u16..=1000,
            xmin in 0u16..=1000,
            dy in 0u16..=1000,
            dx in 0u16..=1000,
            width in 1.0f64..4000.0,
            height in 1.0f64..4000.0,
        ) {
            let ymax = ymin.saturating_add(dy).min(1000);
            let xmax = xmin.saturating_add(dx).min(1000);
            let frame = render_overlay(
                RenderedSize::new(width, height),
                &[detection([ymin, xmin, ymax, xmax], "Cow")],
            );
            let rect = frame.boxes[0].rect;
            let eps = 1e-9 * width.max(height);
            prop_assert!((rect.top - f64::from(ymin) / 1000.0 * height).abs() <= eps);
            prop_assert!((rect.left - f64::from(xmin) / 1000.0 * width).abs() <= eps);
            prop_assert!((rect.height - f64::from(ymax - ymin) / 1000.0 * height).abs() <= eps);
            prop_assert!((rect.width - f64::from(xmax - xmin) / 1000.0 * width).abs() <= eps);
            prop_assert!(rect.left + rect.width <= width + eps);
            prop_assert!(rect.top + rect.height <= height + eps);
        }
    }
}
