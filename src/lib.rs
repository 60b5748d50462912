use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod debug_log;
pub mod delivery;
pub mod extract;
pub mod filter;
pub mod geometry;
pub mod logging;
pub mod overlay;
pub mod page;
pub mod recognition;
pub mod settings;
pub mod translate;

#[cfg(test)]
mod test_util;

pub use debug_log::{DebugLog, LogEntry, LogLevel};
pub use delivery::{Ack, Deliverer, DeliveryConfig, DeliveryError, TabBus, TabId, TranslateRequest};
pub use overlay::{OverlayAnchor, OverlayBox, OverlayStyle};
pub use page::{ImageOutcome, PageProcessor, PageReport, ProcessorConfig};
pub use translate::{Orchestrator, TranslationOutcome};

use delivery::{PageAgent, RequestHandler};
use overlay::{IntervalFrameClock, render_svg, render_svg_bytes};
use page::PageImage;
use page::headless::{RecordingHost, StaticImage, StaticPage};
use recognition::TesseractRecognizer;
use translate::{LocalModelCache, NoLocalModel, RemoteTranslator, TextTranslator};

#[derive(Debug, Clone)]
pub struct Config {
    pub image_path: String,
    pub lang: String,
    pub source_lang: String,
    pub out: Option<String>,
    pub settings_path: Option<String>,
    pub show_log: bool,
}

/// Translates the text in one image file and writes the overlaid result.
///
/// The image is served from a headless page and the request travels through
/// the same tab delivery protocol a browser trigger would use.
pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;

    let image_path = Path::new(&config.image_path);
    let bytes = std::fs::read(image_path)
        .with_context(|| format!("failed to read image: {}", image_path.display()))?;
    let mime = infer::get(&bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| mime.starts_with("image/"))
        .ok_or_else(|| anyhow!("not an image: {}", image_path.display()))?;
    let url = format!("file://{}", image_path.display());
    let image = Arc::new(StaticImage::from_bytes(url, 0, bytes.clone())?);
    let natural = image
        .natural_size()
        .ok_or_else(|| anyhow!("image has no size: {}", image_path.display()))?;
    let page = Arc::new(StaticPage::new(vec![image.clone()]));

    let log = DebugLog::new();
    let host = RecordingHost::new();
    let mut remote = RemoteTranslator::new().with_timeout(settings.remote_timeout);
    if let Some(url) = settings.remote_url.as_deref() {
        remote = remote.with_base_url(url);
    }
    let orchestrator = Orchestrator::new(
        Some(Arc::new(remote) as Arc<dyn TextTranslator>),
        LocalModelCache::new(Arc::new(NoLocalModel)),
        log.clone(),
    );
    let recognizer = TesseractRecognizer::new()
        .with_languages(settings.ocr_languages.clone())
        .with_psm(settings.ocr_psm);
    let processor = Arc::new(PageProcessor::new(
        Arc::new(recognizer),
        Arc::new(orchestrator),
        Arc::new(host.clone()),
        Arc::new(IntervalFrameClock::default()),
        settings.processor_config(),
        log.clone(),
    ));

    let agent = Arc::new(PageAgent::new(processor, page));
    let bus = {
        let agent = agent.clone();
        Arc::new(TabBus::new(move |_tab| agent.clone() as Arc<dyn RequestHandler>))
    };
    let tab = TabId(1);
    bus.open_tab(tab.clone(), true);
    let deliverer = Deliverer::new(bus, settings.delivery.clone(), log.clone());
    let request = TranslateRequest::translate_page(&config.source_lang, &config.lang);
    deliverer
        .deliver(&tab, &request)
        .await
        .with_context(|| "failed to deliver the translate request")?;
    let reports = agent.wait_idle().await;

    let surface = host.live_surface_for(image.id());
    let (overlay_size, boxes) = match surface {
        Some(surface) => (surface.rect.size(), surface.boxes),
        None => (natural, Vec::new()),
    };
    let svg = render_svg(&bytes, mime, natural, overlay_size, &boxes, &settings.style);

    let out_path = config
        .out
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output_path(image_path));
    write_output(&out_path, &svg)?;

    let mut output = format!(
        "wrote {} ({} box(es) across {} run(s))",
        out_path.display(),
        boxes.len(),
        reports.len()
    );
    if config.show_log {
        output.push('\n');
        output.push_str(&debug_log::format_entries(&log.entries()));
    }
    Ok(output)
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    input.with_file_name(format!("{}.translated.png", stem))
}

fn write_output(path: &Path, svg: &str) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "png".to_string());
    let bytes = if extension == "svg" {
        svg.as_bytes().to_vec()
    } else {
        let mime = match extension.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            "bmp" => "image/bmp",
            "gif" => "image/gif",
            "tif" | "tiff" => "image/tiff",
            _ => "image/png",
        };
        render_svg_bytes(svg, mime)?
    };
    std::fs::write(path, bytes)
        .with_context(|| format!("failed to write output: {}", path.display()))
}
