use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::geometry::Rect;
use crate::page::ImageId;

mod anchor;
mod layout;
mod render;

pub use anchor::OverlayAnchor;
pub use render::{render_svg, render_svg_bytes};

/// Inner padding of a box as a share of its shorter side.
const BOX_PADDING_RATIO: f32 = 0.12;

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    pub fill_color: String,
    pub text_color: String,
    pub stroke_color: String,
    pub failure_color: String,
    /// Upper bound for the font size; derived from the box when unset.
    pub font_size: Option<f32>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            fill_color: "#ffffff".to_string(),
            text_color: "#111111".to_string(),
            stroke_color: "#c40000".to_string(),
            failure_color: "#ff9800".to_string(),
            font_size: None,
        }
    }
}

/// One translated text box in overlay coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayBox {
    pub rect: Rect,
    pub text: String,
    pub font_size: f32,
    pub lines: Vec<String>,
}

impl OverlayBox {
    /// Lays `text` out inside `rect`, wrapping and shrinking as needed.
    pub fn fit(rect: Rect, text: &str, style: &OverlayStyle) -> Self {
        let padding = rect.width.min(rect.height) * BOX_PADDING_RATIO;
        let inner_w = (rect.width - padding * 2.0).max(1.0);
        let inner_h = (rect.height - padding * 2.0).max(1.0);
        let base = style
            .font_size
            .filter(|size| *size > 0.0)
            .unwrap_or(inner_h);
        let fitted = layout::fit_text(text, base, inner_w, inner_h);
        Self {
            rect,
            text: text.to_string(),
            font_size: fitted.font_size,
            lines: fitted.lines,
        }
    }

    pub fn with_rect(&self, rect: Rect) -> Self {
        Self {
            rect,
            ..self.clone()
        }
    }
}

/// Host-side drawing layer positioned over one image.
pub trait Surface: Send {
    fn set_rect(&mut self, rect: Rect);
    fn rect(&self) -> Rect;
    fn add_box(&mut self, overlay: OverlayBox);
    fn box_count(&self) -> usize;
    fn set_border_color(&mut self, color: &str);
    fn remove(&mut self);
}

pub trait OverlayHost: Send + Sync {
    fn create_surface(&self, image: &ImageId) -> Box<dyn Surface>;
}

pub type FrameFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Source of display refresh ticks.
pub trait FrameClock: Send + Sync {
    fn next_frame(&self) -> FrameFuture<'_>;
}

#[derive(Debug, Clone, Copy)]
pub struct IntervalFrameClock {
    period: Duration,
}

impl IntervalFrameClock {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
        }
    }
}

impl Default for IntervalFrameClock {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}

impl FrameClock for IntervalFrameClock {
    fn next_frame(&self) -> FrameFuture<'_> {
        Box::pin(tokio::time::sleep(self.period))
    }
}
