use anyhow::Result;
use futures_util::{FutureExt, StreamExt, stream};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::debug_log::DebugLog;
use crate::extract::{ExtractConfig, QualifiedRegion, extract_regions, whole_image_region};
use crate::geometry::{Size, place_region, resolve_source_size};
use crate::overlay::{FrameClock, OverlayAnchor, OverlayBox, OverlayHost, OverlayStyle};
use crate::recognition::{ImageSource, Recognizer};
use crate::translate::{Orchestrator, TranslationOutcome};

use super::{ImageId, ImageProcessingState, ImageStateTable, LoadState, Page, PageImage};

/// Rendered sizes below this are treated as not laid out yet.
const MIN_LAYOUT_PX: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    AwaitingLoad,
    AwaitingLayout,
    Anchoring,
    FetchingImage,
    Recognizing,
    Extracting,
    Translating,
    Rendering,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub extract: ExtractConfig,
    pub style: OverlayStyle,
    pub load_timeout: Duration,
    pub layout_timeout: Duration,
    pub max_concurrent_translations: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            extract: ExtractConfig::default(),
            style: OverlayStyle::default(),
            load_timeout: Duration::from_secs(10),
            layout_timeout: Duration::from_secs(3),
            max_concurrent_translations: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyHandled,
    LoadFailed,
    LoadTimeout,
    LayoutTimeout,
    RecognitionFailed,
    TranslationFailed,
    OverlayRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Rendered { boxes: usize },
    NoText,
    Skipped(SkipReason),
    Failed(String),
}

impl ImageOutcome {
    /// Outcomes after which the image is never processed again.
    fn is_final(&self) -> bool {
        matches!(self, ImageOutcome::Rendered { .. } | ImageOutcome::NoText)
    }
}

#[derive(Debug, Default, Clone)]
pub struct PageReport {
    pub outcomes: Vec<(ImageId, ImageOutcome)>,
}

impl PageReport {
    pub fn rendered_images(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ImageOutcome::Rendered { .. }))
            .count()
    }

    pub fn total_boxes(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, outcome)| match outcome {
                ImageOutcome::Rendered { boxes } => *boxes,
                _ => 0,
            })
            .sum()
    }
}

struct RegionTally {
    rendered: usize,
    failed: usize,
    detached: bool,
}

/// Runs the per-image pipeline over a page: wait for layout, anchor an
/// overlay, recognize, extract, translate and render.
pub struct PageProcessor {
    recognizer: Arc<dyn Recognizer>,
    orchestrator: Arc<Orchestrator>,
    host: Arc<dyn OverlayHost>,
    clock: Arc<dyn FrameClock>,
    config: ProcessorConfig,
    log: DebugLog,
    states: ImageStateTable,
    anchors: Mutex<HashMap<ImageId, OverlayAnchor>>,
}

impl PageProcessor {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        orchestrator: Arc<Orchestrator>,
        host: Arc<dyn OverlayHost>,
        clock: Arc<dyn FrameClock>,
        config: ProcessorConfig,
        log: DebugLog,
    ) -> Self {
        Self {
            recognizer,
            orchestrator,
            host,
            clock,
            config,
            log,
            states: ImageStateTable::new(),
            anchors: Mutex::new(HashMap::new()),
        }
    }

    pub fn log(&self) -> &DebugLog {
        &self.log
    }

    pub fn state(&self, id: &ImageId) -> ImageProcessingState {
        self.states.state(id)
    }

    pub fn live_anchor_count(&self) -> usize {
        self.anchors.lock().len()
    }

    /// Removes every overlay and forgets which images were translated.
    pub fn clear_overlays(&self) {
        let anchors = std::mem::take(&mut *self.anchors.lock());
        for anchor in anchors.values() {
            anchor.dispose();
        }
        self.states.reset();
        self.log.info(format!("cleared {} overlay(s)", anchors.len()));
    }

    /// Processes every image on the page, one at a time.
    pub async fn process_page(&self, page: &dyn Page, source: &str, target: &str) -> PageReport {
        let images = page.images();
        self.log.info(format!(
            "processing {} image(s), {} -> {}",
            images.len(),
            source,
            target
        ));
        let mut report = PageReport::default();
        for image in images {
            let id = image.id().clone();
            let outcome = self.process_image(image, source, target).await;
            report.outcomes.push((id, outcome));
        }
        self.log.success(format!(
            "page done: {} box(es) on {} image(s)",
            report.total_boxes(),
            report.rendered_images()
        ));
        report
    }

    pub async fn process_image(
        &self,
        image: Arc<dyn PageImage>,
        source: &str,
        target: &str,
    ) -> ImageOutcome {
        let id = image.id().clone();
        let Some(guard) = self.states.try_begin(&id) else {
            debug!("image {} already handled, skipping", id);
            return ImageOutcome::Skipped(SkipReason::AlreadyHandled);
        };

        let run = AssertUnwindSafe(self.run_image(&image, source, target))
            .catch_unwind()
            .await;
        let outcome = match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => self.fail_image(&id, format!("{:#}", err)),
            Err(panic) => self.fail_image(&id, panic_message(panic.as_ref())),
        };
        if outcome.is_final() {
            guard.succeed();
        }
        outcome
    }

    async fn run_image(
        &self,
        image: &Arc<dyn PageImage>,
        source: &str,
        target: &str,
    ) -> Result<ImageOutcome> {
        let id = image.id().clone();
        let mut stage = Stage::Pending;

        self.advance(&id, &mut stage, Stage::AwaitingLoad);
        let loaded = self
            .wait_until(self.config.load_timeout, || {
                image.load_state() != LoadState::Loading
            })
            .await;
        if !loaded {
            self.log.warn(format!("image {} did not finish loading", id));
            return Ok(ImageOutcome::Skipped(SkipReason::LoadTimeout));
        }
        if image.load_state() == LoadState::Failed {
            self.log.warn(format!("image {} failed to load", id));
            return Ok(ImageOutcome::Skipped(SkipReason::LoadFailed));
        }

        self.advance(&id, &mut stage, Stage::AwaitingLayout);
        let laid_out = self
            .wait_until(self.config.layout_timeout, || {
                image.bounding_rect().size().is_non_trivial(MIN_LAYOUT_PX)
            })
            .await;
        if !laid_out {
            self.log
                .warn(format!("image {} has no rendered size, skipping", id));
            return Ok(ImageOutcome::Skipped(SkipReason::LayoutTimeout));
        }

        self.advance(&id, &mut stage, Stage::Anchoring);
        self.attach_anchor(image);
        let anchored = self
            .wait_until(self.config.layout_timeout, || {
                self.anchor_size(&id).is_non_trivial(MIN_LAYOUT_PX)
            })
            .await;
        if !anchored {
            self.log
                .warn(format!("overlay for image {} never got a size, skipping", id));
            self.dispose_anchor(&id);
            return Ok(ImageOutcome::Skipped(SkipReason::LayoutTimeout));
        }

        self.advance(&id, &mut stage, Stage::FetchingImage);
        let image_source = match image.fetch_bytes().await {
            Ok(bytes) => ImageSource::Bytes(bytes),
            Err(err) => {
                debug!("fetch failed for {} ({:#}), using the URL", id, err);
                ImageSource::Url(image.source_url().to_string())
            }
        };

        self.advance(&id, &mut stage, Stage::Recognizing);
        let recognized = self.recognizer.recognize(&image_source, source).await;
        drop(image_source);
        let result = match recognized {
            Ok(result) => result,
            Err(err) => {
                self.log
                    .error(format!("text recognition failed for image {}: {:#}", id, err));
                self.dispose_anchor(&id);
                return Ok(ImageOutcome::Skipped(SkipReason::RecognitionFailed));
            }
        };
        if result.is_empty() {
            debug!("no text found in image {}", id);
            self.dispose_anchor(&id);
            return Ok(ImageOutcome::NoText);
        }

        self.advance(&id, &mut stage, Stage::Extracting);
        let source_size = resolve_source_size(
            result.image_size,
            image.natural_size(),
            Some(self.anchor_size(&id)),
        );
        let mut regions = extract_regions(&result, source_size, &self.config.extract);
        if regions.is_empty() {
            regions.extend(whole_image_region(
                &result,
                source_size,
                &self.config.extract,
            ));
        }
        if regions.is_empty() {
            debug!("no qualifying regions in image {}", id);
            self.dispose_anchor(&id);
            return Ok(ImageOutcome::NoText);
        }

        self.advance(&id, &mut stage, Stage::Translating);
        let tally = self
            .translate_regions(&id, &regions, source_size, source, target)
            .await;

        self.advance(&id, &mut stage, Stage::Rendering);
        if tally.detached || !self.anchors.lock().contains_key(&id) {
            self.log
                .warn(format!("overlay for image {} was removed mid-run", id));
            return Ok(ImageOutcome::Skipped(SkipReason::OverlayRemoved));
        }
        let boxes = self.box_count(&id);
        if boxes == 0 {
            self.dispose_anchor(&id);
            if tally.failed > 0 {
                return Ok(ImageOutcome::Skipped(SkipReason::TranslationFailed));
            }
            return Ok(ImageOutcome::NoText);
        }

        self.advance(&id, &mut stage, Stage::Done);
        self.log.success(format!(
            "image {}: {} of {} region(s) translated",
            id,
            tally.rendered,
            regions.len()
        ));
        Ok(ImageOutcome::Rendered { boxes })
    }

    /// Translates all regions with bounded concurrency, rendering each box as
    /// soon as its translation resolves.
    async fn translate_regions(
        &self,
        id: &ImageId,
        regions: &[QualifiedRegion],
        source_size: Size,
        source: &str,
        target: &str,
    ) -> RegionTally {
        let limit = self.config.max_concurrent_translations.max(1);
        let mut results = stream::iter(regions.iter().cloned().enumerate())
            .map(move |(idx, region)| async move {
                let outcome = self
                    .orchestrator
                    .translate(region.text(), source, target)
                    .await;
                (idx, region, outcome)
            })
            .buffer_unordered(limit);

        let mut tally = RegionTally {
            rendered: 0,
            failed: 0,
            detached: false,
        };
        while let Some((idx, region, outcome)) = results.next().await {
            match outcome {
                Ok(TranslationOutcome::Translated(text)) => {
                    if self.render_region(id, &region, source_size, &text) {
                        tally.rendered += 1;
                    } else {
                        tally.detached = true;
                    }
                }
                Ok(TranslationOutcome::Rejected) => {
                    debug!("region {} of image {} rejected", idx + 1, id);
                }
                Err(err) => {
                    tally.failed += 1;
                    self.log.error(format!(
                        "translation failed for region {} of image {}: {:#}",
                        idx + 1,
                        id,
                        err
                    ));
                }
            }
        }
        tally
    }

    fn render_region(
        &self,
        id: &ImageId,
        region: &QualifiedRegion,
        source_size: Size,
        text: &str,
    ) -> bool {
        let anchors = self.anchors.lock();
        let Some(anchor) = anchors.get(id) else {
            return false;
        };
        let rect = place_region(region.bbox(), source_size, anchor.size());
        anchor.add_box(OverlayBox::fit(rect, text, &self.config.style))
    }

    fn attach_anchor(&self, image: &Arc<dyn PageImage>) {
        let anchor = OverlayAnchor::attach(
            image.clone(),
            self.host.as_ref(),
            self.clock.clone(),
            self.config.style.failure_color.clone(),
        );
        let previous = self.anchors.lock().insert(image.id().clone(), anchor);
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    fn anchor_size(&self, id: &ImageId) -> Size {
        self.anchors
            .lock()
            .get(id)
            .map(OverlayAnchor::size)
            .unwrap_or(Size::new(0.0, 0.0))
    }

    fn box_count(&self, id: &ImageId) -> usize {
        self.anchors
            .lock()
            .get(id)
            .map(OverlayAnchor::box_count)
            .unwrap_or(0)
    }

    fn dispose_anchor(&self, id: &ImageId) {
        let anchor = self.anchors.lock().remove(id);
        if let Some(anchor) = anchor {
            anchor.dispose();
        }
    }

    /// Flags the overlay as failed and keeps whatever boxes already rendered.
    fn fail_image(&self, id: &ImageId, reason: String) -> ImageOutcome {
        debug!("image {} -> {:?}", id, Stage::Failed);
        self.log
            .error(format!("processing image {} failed: {}", id, reason));
        let empty = {
            let anchors = self.anchors.lock();
            match anchors.get(id) {
                Some(anchor) => {
                    anchor.mark_failed();
                    anchor.box_count() == 0
                }
                None => false,
            }
        };
        if empty {
            self.dispose_anchor(id);
        }
        ImageOutcome::Failed(reason)
    }

    fn advance(&self, id: &ImageId, stage: &mut Stage, next: Stage) {
        debug!("image {}: {} -> {}", id, stage, next);
        *stage = next;
    }

    /// Polls `ready` once per frame until it holds or `limit` elapses.
    async fn wait_until(&self, limit: Duration, ready: impl Fn() -> bool) -> bool {
        if ready() {
            return true;
        }
        let poll = async {
            loop {
                self.clock.next_frame().await;
                if ready() {
                    break;
                }
            }
        };
        tokio::time::timeout(limit, poll).await.is_ok()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected panic".to_string()
    }
}
