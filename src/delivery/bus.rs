use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::page::{Page, PageProcessor, PageReport};

use super::{Ack, DeliveryError, DeliveryFuture, MessageChannel, TabId, TranslateRequest};

/// Receiving end living inside a tab.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: TranslateRequest) -> Ack;
}

type AgentFactory = Box<dyn Fn(&TabId) -> Arc<dyn RequestHandler> + Send + Sync>;

struct Tab {
    injectable: bool,
    receiver: Option<Arc<dyn RequestHandler>>,
}

/// In-process message bus. A tab has no receiver until one is injected.
pub struct TabBus {
    tabs: Mutex<HashMap<TabId, Tab>>,
    factory: AgentFactory,
    injections: AtomicUsize,
}

impl TabBus {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&TabId) -> Arc<dyn RequestHandler> + Send + Sync + 'static,
    {
        Self {
            tabs: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
            injections: AtomicUsize::new(0),
        }
    }

    /// Registers a tab. Restricted pages are not `injectable`.
    pub fn open_tab(&self, tab: TabId, injectable: bool) {
        self.tabs.lock().insert(
            tab,
            Tab {
                injectable,
                receiver: None,
            },
        );
    }

    pub fn has_receiver(&self, tab: &TabId) -> bool {
        self.tabs
            .lock()
            .get(tab)
            .map(|tab| tab.receiver.is_some())
            .unwrap_or(false)
    }

    pub fn injections(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }
}

impl MessageChannel for TabBus {
    fn send<'a>(&'a self, tab: &'a TabId, request: &'a TranslateRequest) -> DeliveryFuture<'a, Ack> {
        Box::pin(async move {
            let receiver = {
                let tabs = self.tabs.lock();
                let entry = tabs
                    .get(tab)
                    .ok_or_else(|| DeliveryError::Other(format!("tab {} does not exist", tab)))?;
                entry.receiver.clone().ok_or(DeliveryError::NoReceiver)?
            };
            Ok(receiver.handle(request.clone()))
        })
    }

    fn inject<'a>(&'a self, tab: &'a TabId) -> DeliveryFuture<'a, ()> {
        Box::pin(async move {
            let mut tabs = self.tabs.lock();
            let entry = tabs
                .get_mut(tab)
                .ok_or_else(|| DeliveryError::InjectionDenied(format!("tab {} does not exist", tab)))?;
            if !entry.injectable {
                return Err(DeliveryError::InjectionDenied(format!(
                    "tab {} does not allow scripts",
                    tab
                )));
            }
            if entry.receiver.is_none() {
                debug!("installing page agent in tab {}", tab);
                entry.receiver = Some((self.factory)(tab));
                self.injections.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }
}

/// Page-side receiver: acknowledges at once and processes the page in the
/// background.
pub struct PageAgent {
    processor: Arc<PageProcessor>,
    page: Arc<dyn Page>,
    tasks: Mutex<Vec<JoinHandle<PageReport>>>,
}

impl PageAgent {
    pub fn new(processor: Arc<PageProcessor>, page: Arc<dyn Page>) -> Self {
        Self {
            processor,
            page,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn processor(&self) -> &Arc<PageProcessor> {
        &self.processor
    }

    /// Page runs still tracked; finished ones are pruned on the next request.
    pub fn pending_runs(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Waits for every page run still tracked and returns their reports.
    pub async fn wait_idle(&self) -> Vec<PageReport> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut reports = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(err) => warn!("page run ended abnormally: {}", err),
            }
        }
        reports
    }
}

impl RequestHandler for PageAgent {
    fn handle(&self, request: TranslateRequest) -> Ack {
        let processor = self.processor.clone();
        let page = self.page.clone();
        let task = tokio::spawn(async move {
            processor
                .process_page(page.as_ref(), &request.source, &request.target)
                .await
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        Ack::started()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryConfig, Deliverer};
    use crate::debug_log::DebugLog;
    use crate::overlay::IntervalFrameClock;
    use crate::page::ProcessorConfig;
    use crate::page::headless::{RecordingHost, StaticPage};
    use crate::recognition::RecognitionResult;
    use crate::test_util::{FakeLoader, FakeRecognizer, FakeTranslator};
    use crate::translate::{LocalModelCache, Orchestrator, TextTranslator};
    use std::time::Duration;

    struct Echo;

    impl RequestHandler for Echo {
        fn handle(&self, _request: TranslateRequest) -> Ack {
            Ack::started()
        }
    }

    fn bus() -> TabBus {
        TabBus::new(|_tab| Arc::new(Echo) as Arc<dyn RequestHandler>)
    }

    #[tokio::test]
    async fn tabs_start_without_a_receiver() {
        let bus = bus();
        bus.open_tab(TabId(1), true);
        let request = TranslateRequest::translate_page("ja", "en");
        assert_eq!(
            bus.send(&TabId(1), &request).await,
            Err(DeliveryError::NoReceiver)
        );
        bus.inject(&TabId(1)).await.unwrap();
        bus.inject(&TabId(1)).await.unwrap();
        assert_eq!(bus.injections(), 1);
        assert_eq!(bus.send(&TabId(1), &request).await, Ok(Ack::started()));
    }

    #[tokio::test]
    async fn restricted_and_unknown_tabs_refuse_injection() {
        let bus = bus();
        bus.open_tab(TabId(1), false);
        assert!(matches!(
            bus.inject(&TabId(1)).await,
            Err(DeliveryError::InjectionDenied(_))
        ));
        assert!(matches!(
            bus.inject(&TabId(9)).await,
            Err(DeliveryError::InjectionDenied(_))
        ));
        let request = TranslateRequest::translate_page("ja", "en");
        assert!(matches!(
            bus.send(&TabId(9), &request).await,
            Err(DeliveryError::Other(_))
        ));
    }

    #[tokio::test]
    async fn deliverer_recovers_a_fresh_tab() {
        let bus = Arc::new(bus());
        bus.open_tab(TabId(5), true);
        let log = DebugLog::new();
        let deliverer = Deliverer::new(
            bus.clone(),
            DeliveryConfig {
                max_attempts: 3,
                inject_delay: Duration::from_millis(1),
            },
            log.clone(),
        );
        let ack = deliverer
            .deliver(&TabId(5), &TranslateRequest::translate_page("ja", "en"))
            .await
            .unwrap();
        assert_eq!(ack, Ack::started());
        assert_eq!(bus.injections(), 1);
        assert!(bus.has_receiver(&TabId(5)));
    }

    fn empty_page_agent() -> PageAgent {
        let log = DebugLog::new();
        let orchestrator = Orchestrator::new(
            Some(Arc::new(FakeTranslator::replying("Hello")) as Arc<dyn TextTranslator>),
            LocalModelCache::new(Arc::new(FakeLoader::replying("local"))),
            log.clone(),
        );
        let processor = PageProcessor::new(
            Arc::new(FakeRecognizer::returning(RecognitionResult::new("", 0.0, None))),
            Arc::new(orchestrator),
            Arc::new(RecordingHost::new()),
            Arc::new(IntervalFrameClock::new(Duration::from_millis(1))),
            ProcessorConfig::default(),
            log,
        );
        PageAgent::new(Arc::new(processor), Arc::new(StaticPage::new(Vec::new())))
    }

    #[tokio::test]
    async fn finished_runs_are_pruned_on_the_next_request() {
        let agent = empty_page_agent();
        let request = TranslateRequest::translate_page("ja", "en");
        for _ in 0..3 {
            assert_eq!(agent.handle(request.clone()), Ack::started());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(agent.pending_runs(), 1);
        assert_eq!(agent.wait_idle().await.len(), 1);
        assert_eq!(agent.pending_runs(), 0);
    }
}
