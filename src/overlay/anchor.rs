use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::geometry::{Rect, Size, clamp_to_container};
use crate::page::PageImage;

use super::{FrameClock, OverlayBox, OverlayHost, Surface};

struct AnchorInner {
    image: Arc<dyn PageImage>,
    surface: Mutex<Option<Box<dyn Surface>>>,
}

impl AnchorInner {
    /// Moves the surface onto the image's current document rect. Returns
    /// false once the surface is gone.
    fn sync(&self) -> bool {
        let (scroll_x, scroll_y) = self.image.scroll_offset();
        let rect = self.image.bounding_rect().translate(scroll_x, scroll_y);
        let mut surface = self.surface.lock();
        match surface.as_mut() {
            Some(surface) => {
                if surface.rect() != rect {
                    surface.set_rect(rect);
                }
                true
            }
            None => false,
        }
    }
}

/// Overlay surface kept aligned with one image until disposed.
///
/// A background task resyncs the surface every frame and whenever the image
/// reports a size change, so scrolling or relayout never leaves the boxes
/// behind.
pub struct OverlayAnchor {
    inner: Arc<AnchorInner>,
    failure_color: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OverlayAnchor {
    pub fn attach(
        image: Arc<dyn PageImage>,
        host: &dyn OverlayHost,
        clock: Arc<dyn FrameClock>,
        failure_color: impl Into<String>,
    ) -> Self {
        let surface = host.create_surface(image.id());
        let inner = Arc::new(AnchorInner {
            image,
            surface: Mutex::new(Some(surface)),
        });
        inner.sync();

        let task_inner = inner.clone();
        let task = tokio::spawn(async move {
            let mut resize = task_inner.image.watch_resize();
            loop {
                let watching = match resize.as_mut() {
                    Some(receiver) => tokio::select! {
                        _ = clock.next_frame() => true,
                        changed = receiver.changed() => changed.is_ok(),
                    },
                    None => {
                        clock.next_frame().await;
                        true
                    }
                };
                if !watching {
                    resize = None;
                }
                if !task_inner.sync() {
                    break;
                }
            }
        });

        Self {
            inner,
            failure_color: failure_color.into(),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn rect(&self) -> Rect {
        self.inner
            .surface
            .lock()
            .as_ref()
            .map(|surface| surface.rect())
            .unwrap_or_default()
    }

    pub fn size(&self) -> Size {
        self.rect().size()
    }

    /// Adds a box clamped to the anchor's current size. Returns false when
    /// the anchor is already disposed.
    pub fn add_box(&self, overlay: OverlayBox) -> bool {
        let mut surface = self.inner.surface.lock();
        let Some(surface) = surface.as_mut() else {
            return false;
        };
        let container = surface.rect().size();
        let rect = clamp_to_container(overlay.rect, container);
        surface.add_box(overlay.with_rect(rect));
        true
    }

    pub fn box_count(&self) -> usize {
        self.inner
            .surface
            .lock()
            .as_ref()
            .map(|surface| surface.box_count())
            .unwrap_or(0)
    }

    pub fn mark_failed(&self) {
        if let Some(surface) = self.inner.surface.lock().as_mut() {
            surface.set_border_color(&self.failure_color);
        }
    }

    pub fn dispose(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if let Some(mut surface) = self.inner.surface.lock().take() {
            debug!("removing overlay for {}", self.inner.image.id());
            surface.remove();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.surface.lock().is_none()
    }
}

impl Drop for OverlayAnchor {
    fn drop(&mut self) {
        self.dispose();
    }
}
