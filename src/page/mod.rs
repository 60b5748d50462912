use anyhow::Result;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

use crate::geometry::{Rect, Size};

pub mod headless;
mod processor;
mod state;

pub use processor::{ImageOutcome, PageProcessor, PageReport, ProcessorConfig, SkipReason, Stage};
pub use state::{ImageProcessingState, ImageStateTable, ProcessingGuard};

/// Stable identity of one image element on a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derives an id from the image URL and its position in the document, so
    /// the same picture shown twice gets two ids.
    pub fn for_source(url: &str, index: usize) -> Self {
        let digest = md5::compute(format!("{}#{}", url, index).as_bytes());
        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..8).unwrap_or(&self.0);
        f.write_str(short)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
    Failed,
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// An image element as the host page exposes it.
pub trait PageImage: Send + Sync {
    fn id(&self) -> &ImageId;
    fn source_url(&self) -> &str;
    fn load_state(&self) -> LoadState;
    /// Intrinsic pixel size once decoded.
    fn natural_size(&self) -> Option<Size>;
    /// Rendered rect relative to the viewport.
    fn bounding_rect(&self) -> Rect;
    fn scroll_offset(&self) -> (f32, f32);
    /// Size-change notifications, when the host can observe them.
    fn watch_resize(&self) -> Option<watch::Receiver<Size>>;
    /// Reads the image bytes through the host (which may hit its cache).
    fn fetch_bytes(&self) -> FetchFuture<'_>;
}

pub trait Page: Send + Sync {
    /// Image elements in document order.
    fn images(&self) -> Vec<Arc<dyn PageImage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_depend_on_position() {
        let first = ImageId::for_source("https://example.com/a.png", 0);
        let again = ImageId::for_source("https://example.com/a.png", 0);
        let second = ImageId::for_source("https://example.com/a.png", 1);
        assert_eq!(first, again);
        assert_ne!(first, second);
        assert_eq!(first.as_str().len(), 32);
        assert_eq!(first.to_string().len(), 8);
    }
}
