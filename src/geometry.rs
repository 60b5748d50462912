//! Mapping between recognizer pixel space and overlay render space.

use serde::{Deserialize, Serialize};

use crate::recognition::BBox;

pub const MIN_PADDING_PX: f32 = 6.0;
pub const PADDING_RATIO: f32 = 0.08;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_positive(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// True once both sides reach `min_px`; a zero-sized layout box is trivial.
    pub fn is_non_trivial(&self, min_px: f32) -> bool {
        self.is_positive() && self.width >= min_px && self.height >= min_px
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

pub fn padding_for(bbox: &BBox) -> f32 {
    (PADDING_RATIO * bbox.width().min(bbox.height())).max(MIN_PADDING_PX)
}

/// Grows the box by the uniform padding, never past the source bounds.
pub fn inflate(bbox: &BBox, source: Size) -> BBox {
    let pad = padding_for(bbox);
    BBox {
        x0: (bbox.x0 - pad).clamp(0.0, source.width),
        y0: (bbox.y0 - pad).clamp(0.0, source.height),
        x1: (bbox.x1 + pad).clamp(0.0, source.width),
        y1: (bbox.y1 + pad).clamp(0.0, source.height),
    }
}

/// Picks the source pixel size in order: recognizer, natural image, overlay, 1x1.
pub fn resolve_source_size(
    recognized: Option<Size>,
    natural: Option<Size>,
    overlay: Option<Size>,
) -> Size {
    [recognized, natural, overlay]
        .into_iter()
        .flatten()
        .find(Size::is_positive)
        .unwrap_or(Size::new(1.0, 1.0))
}

pub fn map_to_render(bbox: &BBox, source: Size, render: Size) -> Rect {
    let scale_x = render.width / source.width.max(1.0);
    let scale_y = render.height / source.height.max(1.0);
    Rect::new(
        bbox.x0 * scale_x,
        bbox.y0 * scale_y,
        bbox.width() * scale_x,
        bbox.height() * scale_y,
    )
}

/// Keeps a rect inside the container, trimming whatever overflows.
pub fn clamp_to_container(rect: Rect, container: Size) -> Rect {
    let max_w = container.width.max(0.0);
    let max_h = container.height.max(0.0);
    let x = rect.x.clamp(0.0, max_w);
    let y = rect.y.clamp(0.0, max_h);
    let right = (rect.x + rect.width).clamp(x, max_w);
    let bottom = (rect.y + rect.height).clamp(y, max_h);
    Rect::new(x, y, right - x, bottom - y)
}

/// Full path for one region: inflate, scale, clamp into the live container.
pub fn place_region(bbox: &BBox, source: Size, render: Size) -> Rect {
    let inflated = inflate(bbox, source);
    clamp_to_container(map_to_render(&inflated, source, render), render)
}
