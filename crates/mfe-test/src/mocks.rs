//! Mock fetchers, modules and services for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use mfe_core::RegistryDocument;
use mfe_registry::{RegistryError, RegistryFetcher, RegistryResult};
use mfe_runtime::{
    ModuleBundle, ModuleError, ModuleResult, MountConvention, MountOutcome, MountServices,
    MountSurface, RemoteModule, SurfaceContent,
};
use mfe_services::{FnProvider, ServiceInstance, instance};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Registry fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Route {
    Serve(RegistryDocument),
    Fail(String),
}

/// A [`RegistryFetcher`] with per-URL scripted answers.
///
/// Unscripted URLs fail. Every call is recorded, so tests can assert on
/// network traffic.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    /// Create a fetcher with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` at `url` from now on.
    pub fn serve(&self, url: impl Into<String>, document: RegistryDocument) {
        locked(&self.routes).insert(url.into(), Route::Serve(document));
    }

    /// Fail every fetch of `url` from now on.
    pub fn fail(&self, url: impl Into<String>, message: impl Into<String>) {
        locked(&self.routes).insert(url.into(), Route::Fail(message.into()));
    }

    /// Every URL fetched, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    /// Total number of fetches.
    #[must_use]
    pub fn call_count(&self) -> usize {
        locked(&self.calls).len()
    }

    /// Number of fetches of `url`.
    #[must_use]
    pub fn calls_to(&self, url: &str) -> usize {
        locked(&self.calls).iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl RegistryFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> RegistryResult<RegistryDocument> {
        locked(&self.calls).push(url.to_string());
        let route = locked(&self.routes).get(url).cloned();
        match route {
            Some(Route::Serve(doc)) => Ok(doc),
            Some(Route::Fail(message)) => Err(RegistryError::Fetch {
                url: url.to_string(),
                message,
            }),
            None => Err(RegistryError::Fetch {
                url: url.to_string(),
                message: "no route scripted".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// A `logger` service that keeps every line.
#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingLogger {
    /// Create an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a line.
    pub fn log(&self, line: impl Into<String>) {
        locked(&self.lines).push(line.into());
    }

    /// Lines logged so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        locked(&self.lines).clone()
    }
}

/// A `notification` service that logs through the `logger` service.
#[derive(Debug)]
pub struct RecordingNotifier {
    logger: Arc<RecordingLogger>,
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    /// Provider named `notification`, depending on `logger`.
    #[must_use]
    pub fn provider() -> FnProvider {
        FnProvider::new("notification", |container| async move {
            let logger = container.require_as::<RecordingLogger>("logger").await?;
            Ok(instance(Self {
                logger,
                sent: Mutex::new(Vec::new()),
            }))
        })
        .with_dependencies(["logger"])
    }

    /// Send a notification.
    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        self.logger.log(format!("notify: {message}"));
        locked(&self.sent).push(message);
    }

    /// Notifications sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        locked(&self.sent).clone()
    }
}

/// Event published on a [`RecordingEventBus`].
pub type BusEvent = (String, Value);

/// An `eventBus` service: broadcast plus a log of everything published.
#[derive(Debug, Clone)]
pub struct RecordingEventBus {
    sender: broadcast::Sender<BusEvent>,
    published: Arc<Mutex<Vec<BusEvent>>>,
}

impl Default for RecordingEventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            sender,
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl RecordingEventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event.
    pub fn publish(&self, topic: impl Into<String>, payload: Value) {
        let event = (topic.into(), payload);
        locked(&self.published).push(event.clone());
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Everything published so far.
    #[must_use]
    pub fn published(&self) -> Vec<BusEvent> {
        locked(&self.published).clone()
    }
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

/// Counters shared between a test module and the test.
#[derive(Debug, Default)]
pub struct ModuleCounters {
    mounts: AtomicU32,
    unmounts: AtomicU32,
    services_seen: Mutex<Vec<String>>,
}

impl ModuleCounters {
    /// Successful mounts.
    #[must_use]
    pub fn mounts(&self) -> u32 {
        self.mounts.load(Ordering::SeqCst)
    }

    /// Teardowns run.
    #[must_use]
    pub fn unmounts(&self) -> u32 {
        self.unmounts.load(Ordering::SeqCst)
    }

    /// Service names visible at the last mount.
    #[must_use]
    pub fn services_seen(&self) -> Vec<String> {
        locked(&self.services_seen).clone()
    }
}

/// A well-behaved module that renders a body and can talk to services.
#[derive(Debug, Clone)]
pub struct TestModule {
    name: String,
    convention: MountConvention,
    cleanup: bool,
    log_to: Option<String>,
    notify_via: Option<String>,
    publish_to: Option<String>,
    counters: Arc<ModuleCounters>,
}

impl TestModule {
    /// A container-convention module named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            convention: MountConvention::Container,
            cleanup: false,
            log_to: None,
            notify_via: None,
            publish_to: None,
            counters: Arc::new(ModuleCounters::default()),
        }
    }

    /// Expect a flat service map instead of a container.
    #[must_use]
    pub fn flat(mut self) -> Self {
        self.convention = MountConvention::FlatServices;
        self
    }

    /// Return a cleanup closure from mount.
    #[must_use]
    pub fn with_cleanup(mut self) -> Self {
        self.cleanup = true;
        self
    }

    /// Log `mounted <name>` to the [`RecordingLogger`] at `service`.
    #[must_use]
    pub fn logging_to(mut self, service: impl Into<String>) -> Self {
        self.log_to = Some(service.into());
        self
    }

    /// Send a notification through the [`RecordingNotifier`] at `service`.
    #[must_use]
    pub fn notifying_via(mut self, service: impl Into<String>) -> Self {
        self.notify_via = Some(service.into());
        self
    }

    /// Publish `module:mounted` on the [`RecordingEventBus`] at `service`.
    #[must_use]
    pub fn publishing_to(mut self, service: impl Into<String>) -> Self {
        self.publish_to = Some(service.into());
        self
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> Arc<ModuleCounters> {
        Arc::clone(&self.counters)
    }

    /// Wrap into a bundle declaring this module's convention.
    #[must_use]
    pub fn bundle(self) -> ModuleBundle {
        let convention = self.convention;
        let name = self.name.clone();
        ModuleBundle::new(Arc::new(self), convention).named(name)
    }

    async fn lookup<T: std::any::Any + Send + Sync>(
        services: &MountServices,
        name: &str,
    ) -> ModuleResult<Arc<T>> {
        let found: ServiceInstance = match services {
            MountServices::Container(container) => container.require(name).await?,
            MountServices::Flat(map) => map.get(name).cloned().ok_or_else(|| {
                ModuleError::load_failed(name, "service missing from flat map")
            })?,
        };
        found
            .downcast::<T>()
            .map_err(|_| ModuleError::load_failed(name, "service has an unexpected type"))
    }
}

#[async_trait]
impl RemoteModule for TestModule {
    async fn mount(
        &self,
        surface: Arc<dyn MountSurface>,
        services: MountServices,
    ) -> ModuleResult<MountOutcome> {
        let visible = match &services {
            MountServices::Container(container) => container.names(),
            MountServices::Flat(map) => map.keys().cloned().collect(),
        };
        *locked(&self.counters.services_seen) = visible;

        if let Some(service) = &self.log_to {
            Self::lookup::<RecordingLogger>(&services, service)
                .await?
                .log(format!("mounted {}", self.name));
        }
        if let Some(service) = &self.notify_via {
            Self::lookup::<RecordingNotifier>(&services, service)
                .await?
                .notify(format!("{} is ready", self.name));
        }
        if let Some(service) = &self.publish_to {
            Self::lookup::<RecordingEventBus>(&services, service)
                .await?
                .publish("module:mounted", serde_json::json!({ "module": self.name }));
        }

        surface.render(SurfaceContent::Module {
            module: self.name.clone(),
            body: format!("<{}/>", self.name),
        });
        self.counters.mounts.fetch_add(1, Ordering::SeqCst);

        if self.cleanup {
            let counters = Arc::clone(&self.counters);
            Ok(MountOutcome::cleanup(move || async move {
                counters.unmounts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        } else {
            Ok(MountOutcome::Mounted)
        }
    }

    async fn unmount(&self, _surface: Arc<dyn MountSurface>) -> ModuleResult<()> {
        self.counters.unmounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A module whose mount fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FailingModule {
    name: String,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FailingModule {
    /// Fail the first `failures` mounts.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: u32) -> Self {
        Self {
            name: name.into(),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Fail every mount.
    #[must_use]
    pub fn always(name: impl Into<String>) -> Self {
        Self::new(name, u32::MAX)
    }

    /// Mount attempts so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteModule for FailingModule {
    async fn mount(
        &self,
        surface: Arc<dyn MountSurface>,
        _services: MountServices,
    ) -> ModuleResult<MountOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ModuleError::load_failed(&self.name, "mount failed"));
        }
        surface.render(SurfaceContent::Module {
            module: self.name.clone(),
            body: format!("<{}/>", self.name),
        });
        Ok(MountOutcome::Mounted)
    }
}

/// A module whose mount panics.
#[derive(Debug, Clone)]
pub struct PanickingModule {
    message: String,
}

impl PanickingModule {
    /// Panic with `message` on mount.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl RemoteModule for PanickingModule {
    async fn mount(
        &self,
        _surface: Arc<dyn MountSurface>,
        _services: MountServices,
    ) -> ModuleResult<MountOutcome> {
        panic!("{}", self.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_fetcher_records_calls() {
        let fetcher = ScriptedFetcher::new();
        fetcher.serve("https://a.test/r.json", RegistryDocument::default());
        fetcher.fail("https://b.test/r.json", "down");

        assert!(fetcher.fetch("https://a.test/r.json").await.is_ok());
        assert!(fetcher.fetch("https://b.test/r.json").await.is_err());
        assert!(fetcher.fetch("https://c.test/r.json").await.is_err());

        assert_eq!(fetcher.call_count(), 3);
        assert_eq!(fetcher.calls_to("https://a.test/r.json"), 1);
    }

    #[test]
    fn test_event_bus_without_subscribers() {
        let bus = RecordingEventBus::new();
        bus.publish("x", Value::Null);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = RecordingEventBus::new();
        let mut rx = bus.subscribe();
        bus.publish("topic", serde_json::json!(1));
        let (topic, payload) = rx.recv().await.unwrap();
        assert_eq!(topic, "topic");
        assert_eq!(payload, serde_json::json!(1));
    }
}
