//! In-memory page used by the command line and tests.

use anyhow::{Context, Result, anyhow};
use image::ImageReader;
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::watch;

use crate::geometry::{Rect, Size};
use crate::overlay::{OverlayBox, OverlayHost, Surface};

use super::{FetchFuture, ImageId, LoadState, Page, PageImage};

#[derive(Debug)]
struct Layout {
    load_state: LoadState,
    rect: Rect,
    scroll: (f32, f32),
}

/// An image element whose layout is driven by the caller.
#[derive(Debug)]
pub struct StaticImage {
    id: ImageId,
    url: String,
    bytes: Option<Vec<u8>>,
    natural: Option<Size>,
    layout: Mutex<Layout>,
    resize: watch::Sender<Size>,
}

impl StaticImage {
    /// Image shown at its natural size, with no bytes to fetch.
    pub fn new(url: impl Into<String>, index: usize, natural: Size) -> Self {
        let url = url.into();
        let natural = Some(natural).filter(Size::is_positive);
        let rect = natural
            .map(|size| Rect::new(0.0, 0.0, size.width, size.height))
            .unwrap_or_default();
        let (resize, _) = watch::channel(rect.size());
        Self {
            id: ImageId::for_source(&url, index),
            url,
            bytes: None,
            natural,
            layout: Mutex::new(Layout {
                load_state: LoadState::Loaded,
                rect,
                scroll: (0.0, 0.0),
            }),
            resize,
        }
    }

    /// Decodes the dimensions from `bytes` and serves them on fetch.
    pub fn from_bytes(url: impl Into<String>, index: usize, bytes: Vec<u8>) -> Result<Self> {
        let (width, height) = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .with_context(|| "failed to read image header")?
            .into_dimensions()
            .with_context(|| "failed to decode image dimensions")?;
        let mut image = Self::new(url, index, Size::new(width as f32, height as f32));
        image.bytes = Some(bytes);
        Ok(image)
    }

    /// Marks the image as still downloading, with no rendered size yet.
    pub fn loading(self) -> Self {
        {
            let mut layout = self.layout.lock();
            layout.load_state = LoadState::Loading;
            layout.rect = Rect::default();
        }
        self
    }

    pub fn set_load_state(&self, state: LoadState) {
        self.layout.lock().load_state = state;
    }

    pub fn set_rect(&self, rect: Rect) {
        let changed = {
            let mut layout = self.layout.lock();
            let changed = layout.rect.size() != rect.size();
            layout.rect = rect;
            changed
        };
        if changed {
            self.resize.send_replace(rect.size());
        }
    }

    pub fn scroll_to(&self, x: f32, y: f32) {
        self.layout.lock().scroll = (x, y);
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }
}

impl PageImage for StaticImage {
    fn id(&self) -> &ImageId {
        &self.id
    }

    fn source_url(&self) -> &str {
        &self.url
    }

    fn load_state(&self) -> LoadState {
        self.layout.lock().load_state
    }

    fn natural_size(&self) -> Option<Size> {
        self.natural
    }

    fn bounding_rect(&self) -> Rect {
        self.layout.lock().rect
    }

    fn scroll_offset(&self) -> (f32, f32) {
        self.layout.lock().scroll
    }

    fn watch_resize(&self) -> Option<watch::Receiver<Size>> {
        Some(self.resize.subscribe())
    }

    fn fetch_bytes(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            self.bytes
                .clone()
                .ok_or_else(|| anyhow!("{} is not cached", self.url))
        })
    }
}

#[derive(Default)]
pub struct StaticPage {
    images: Vec<Arc<StaticImage>>,
}

impl StaticPage {
    pub fn new(images: Vec<Arc<StaticImage>>) -> Self {
        Self { images }
    }
}

impl Page for StaticPage {
    fn images(&self) -> Vec<Arc<dyn PageImage>> {
        self.images
            .iter()
            .map(|image| image.clone() as Arc<dyn PageImage>)
            .collect()
    }
}

/// What a surface looked like when it was last touched.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSnapshot {
    pub image: ImageId,
    pub rect: Rect,
    pub boxes: Vec<OverlayBox>,
    pub border_color: Option<String>,
    pub removals: usize,
}

impl SurfaceSnapshot {
    pub fn is_live(&self) -> bool {
        self.removals == 0
    }
}

/// Overlay host that records every surface it hands out.
#[derive(Default, Clone)]
pub struct RecordingHost {
    surfaces: Arc<Mutex<Vec<Arc<Mutex<SurfaceSnapshot>>>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<SurfaceSnapshot> {
        self.surfaces
            .lock()
            .iter()
            .map(|surface| surface.lock().clone())
            .collect()
    }

    pub fn live_surfaces(&self) -> usize {
        self.snapshots().iter().filter(|s| s.is_live()).count()
    }

    /// The surface currently shown over `image`, if any.
    pub fn live_surface_for(&self, image: &ImageId) -> Option<SurfaceSnapshot> {
        self.snapshots()
            .into_iter()
            .rev()
            .find(|snapshot| &snapshot.image == image && snapshot.is_live())
    }
}

impl OverlayHost for RecordingHost {
    fn create_surface(&self, image: &ImageId) -> Box<dyn Surface> {
        let record = Arc::new(Mutex::new(SurfaceSnapshot {
            image: image.clone(),
            rect: Rect::default(),
            boxes: Vec::new(),
            border_color: None,
            removals: 0,
        }));
        self.surfaces.lock().push(record.clone());
        Box::new(RecordingSurface { record })
    }
}

struct RecordingSurface {
    record: Arc<Mutex<SurfaceSnapshot>>,
}

impl Surface for RecordingSurface {
    fn set_rect(&mut self, rect: Rect) {
        self.record.lock().rect = rect;
    }

    fn rect(&self) -> Rect {
        self.record.lock().rect
    }

    fn add_box(&mut self, overlay: OverlayBox) {
        self.record.lock().boxes.push(overlay);
    }

    fn box_count(&self) -> usize {
        self.record.lock().boxes.len()
    }

    fn set_border_color(&mut self, color: &str) {
        self.record.lock().border_color = Some(color.to_string());
    }

    fn remove(&mut self) {
        self.record.lock().removals += 1;
    }
}
