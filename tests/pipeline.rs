use anyhow::anyhow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use overlay_translator_rust::delivery::{
    Ack, Deliverer, DeliveryConfig, PageAgent, RequestHandler, TabBus, TabId, TranslateRequest,
};
use overlay_translator_rust::geometry::{Rect, Size};
use overlay_translator_rust::overlay::IntervalFrameClock;
use overlay_translator_rust::page::headless::{RecordingHost, StaticImage, StaticPage};
use overlay_translator_rust::page::{ImageOutcome, PageImage, PageProcessor, ProcessorConfig};
use overlay_translator_rust::recognition::{
    BBox, ImageSource, RawRegion, RecognitionResult, RecognizeFuture, Recognizer, Tier,
};
use overlay_translator_rust::translate::{
    LanguagePair, LoadFuture, LocalModelCache, LocalModelLoader, ModelKey, NoLocalModel,
    Orchestrator, TextTranslator, TranslateFuture, TranslationOutcome,
};
use overlay_translator_rust::{DebugLog, LogLevel};

struct OneBlock;

impl Recognizer for OneBlock {
    fn recognize<'a>(&'a self, _source: &'a ImageSource, _hint: &'a str) -> RecognizeFuture<'a> {
        Box::pin(async move {
            Ok(
                RecognitionResult::new("こんにちは", 92.0, Some(Size::new(500.0, 500.0)))
                    .with_tier(
                        Tier::Block,
                        vec![RawRegion {
                            bbox: Some(BBox {
                                x0: 10.0,
                                y0: 10.0,
                                x1: 110.0,
                                y1: 60.0,
                            }),
                            text: "こんにちは".to_string(),
                            confidence: 92.0,
                            tier: Tier::Block,
                        }],
                    ),
            )
        })
    }
}

struct Fixed(Result<String, String>);

impl TextTranslator for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    fn translate<'a>(&'a self, _text: &'a str, _pair: &'a LanguagePair) -> TranslateFuture<'a> {
        Box::pin(async move {
            match &self.0 {
                Ok(text) => Ok(TranslationOutcome::Translated(text.clone())),
                Err(message) => Err(anyhow!("{}", message)),
            }
        })
    }
}

struct HelloModel {
    loads: AtomicUsize,
}

impl LocalModelLoader for HelloModel {
    fn load<'a>(&'a self, _key: &'a ModelKey, _fresh: bool) -> LoadFuture<'a> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Fixed(Ok("Hello".to_string()))) as Arc<dyn TextTranslator>)
        })
    }
}

struct Setup {
    bus: Arc<TabBus>,
    agent: Arc<PageAgent>,
    host: RecordingHost,
    image: Arc<StaticImage>,
    log: DebugLog,
}

fn setup(remote: Fixed, loader: Arc<dyn LocalModelLoader>) -> Setup {
    let log = DebugLog::new();
    let host = RecordingHost::new();
    let image = Arc::new(StaticImage::new(
        "https://example.com/comic.png",
        0,
        Size::new(500.0, 500.0),
    ));
    image.set_rect(Rect::new(40.0, 80.0, 250.0, 250.0));
    let page = Arc::new(StaticPage::new(vec![image.clone()]));

    let orchestrator = Orchestrator::new(
        Some(Arc::new(remote) as Arc<dyn TextTranslator>),
        LocalModelCache::new(loader),
        log.clone(),
    );
    let processor = Arc::new(PageProcessor::new(
        Arc::new(OneBlock),
        Arc::new(orchestrator),
        Arc::new(host.clone()),
        Arc::new(IntervalFrameClock::new(Duration::from_millis(1))),
        ProcessorConfig::default(),
        log.clone(),
    ));
    let agent = Arc::new(PageAgent::new(processor, page));
    let bus = {
        let agent = agent.clone();
        Arc::new(TabBus::new(move |_tab| agent.clone() as Arc<dyn RequestHandler>))
    };
    bus.open_tab(TabId(3), true);
    Setup {
        bus,
        agent,
        host,
        image,
        log,
    }
}

async fn deliver(setup: &Setup) -> Ack {
    let deliverer = Deliverer::new(
        setup.bus.clone(),
        DeliveryConfig {
            max_attempts: 3,
            inject_delay: Duration::from_millis(5),
        },
        setup.log.clone(),
    );
    deliverer
        .deliver(&TabId(3), &TranslateRequest::translate_page("ja", "en"))
        .await
        .unwrap()
}

#[tokio::test]
async fn request_reaches_a_fresh_tab_and_renders_the_translation() {
    let setup = setup(Fixed(Ok("Hello".to_string())), Arc::new(NoLocalModel));
    let ack = deliver(&setup).await;
    assert_eq!(ack, Ack::started());
    assert_eq!(setup.bus.injections(), 1);

    let sends = setup
        .log
        .entries()
        .into_iter()
        .filter(|entry| entry.message.starts_with("sending"))
        .count();
    assert_eq!(sends, 2);

    let reports = setup.agent.wait_idle().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].outcomes[0].1,
        ImageOutcome::Rendered { boxes: 1 }
    );

    let surface = setup.host.live_surface_for(setup.image.id()).unwrap();
    assert_eq!(surface.rect, Rect::new(40.0, 80.0, 250.0, 250.0));
    assert_eq!(surface.boxes.len(), 1);
    assert_eq!(surface.boxes[0].text, "Hello");
    assert_eq!(surface.boxes[0].rect, Rect::new(2.0, 2.0, 56.0, 31.0));
}

#[tokio::test]
async fn offline_remote_falls_back_to_the_local_model() {
    let loader = Arc::new(HelloModel {
        loads: AtomicUsize::new(0),
    });
    let setup = setup(Fixed(Err("network is unreachable".to_string())), loader.clone());
    deliver(&setup).await;
    setup.agent.wait_idle().await;

    let surface = setup.host.live_surface_for(setup.image.id()).unwrap();
    assert_eq!(surface.boxes[0].text, "Hello");
    assert_eq!(surface.boxes[0].rect, Rect::new(2.0, 2.0, 56.0, 31.0));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    let warnings = setup.log.entries_at(LogLevel::Warn);
    assert!(
        warnings
            .iter()
            .any(|entry| entry.message.contains("network is unreachable"))
    );
}

#[tokio::test]
async fn a_second_request_does_not_duplicate_boxes() {
    let setup = setup(Fixed(Ok("Hello".to_string())), Arc::new(NoLocalModel));
    deliver(&setup).await;
    deliver(&setup).await;
    setup.agent.wait_idle().await;
    assert_eq!(setup.bus.injections(), 1);
    assert_eq!(setup.host.snapshots().len(), 1);
    assert_eq!(setup.host.snapshots()[0].boxes.len(), 1);
}

#[test]
fn wire_messages_snapshot() {
    insta::assert_json_snapshot!(TranslateRequest::translate_page("ja", "en"), @r#"
    {
      "action": "TRANSLATE_PAGE",
      "source": "ja",
      "target": "en"
    }
    "#);
    insta::assert_json_snapshot!(Ack::started(), @r#"
    {
      "status": "started"
    }
    "#);
}
