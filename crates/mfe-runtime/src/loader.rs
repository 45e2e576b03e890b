//! Dynamic loader and lifecycle manager.
//!
//! The loader drives one module instance through
//! `Idle -> Loading -> Mounted -> Unmounting -> Unmounted`, retrying failed
//! attempts up to [`LoaderConfig::max_retries`] and leaving terminal failures
//! in the error boundary's fallback.
//!
//! Loads are serialized per surface. Each load bumps the surface's
//! generation counter before queueing on the surface lock; a load whose
//! generation is no longer current when its mount completes is discarded
//! (its teardown runs immediately) instead of being applied.
//!
//! Each attempt has a single deadline of [`LoaderConfig::load_timeout`]
//! covering import, service resolution and mount together.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mfe_core::Manifest;
use mfe_services::ServiceContainer;

use crate::boundary::{BoundaryReport, ErrorBoundary};
use crate::error::{ModuleError, ModuleResult};
use crate::events::{LifecycleBus, LifecycleEvent, LifecycleReceiver};
use crate::module::{
    Cleanup, ModuleImporter, MountConvention, MountOutcome, MountServices, RemoteModule,
};
use crate::record::{ModuleHandle, ModuleRecord, ModuleState};
use crate::surface::{MountSurface, SurfaceContent, SurfaceId};

/// Default number of automatic retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default deadline for one load attempt.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry and timeout policy for a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Automatic retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Deadline for one attempt: import, service resolution and mount.
    pub load_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }
}

/// How a mounted module is torn down.
enum Teardown {
    Cleanup(Cleanup),
    Module(Arc<dyn RemoteModule>),
}

/// Live state for one handle.
struct Entry {
    record: ModuleRecord,
    surface: Arc<dyn MountSurface>,
    container: ServiceContainer,
    config: LoaderConfig,
    teardown: Mutex<Option<Teardown>>,
}

/// Per-surface serialization and cancellation state.
struct SurfaceSlot {
    lock: tokio::sync::Mutex<()>,
    generation: watch::Sender<u64>,
    occupant: Mutex<Option<ModuleHandle>>,
}

impl SurfaceSlot {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            lock: tokio::sync::Mutex::new(()),
            generation,
            occupant: Mutex::new(None),
        }
    }

    /// Invalidate every load started before now and return the new generation.
    fn advance(&self) -> u64 {
        let mut next = 0;
        self.generation.send_modify(|g| {
            *g = g.wrapping_add(1);
            next = *g;
        });
        next
    }

    fn current(&self) -> u64 {
        *self.generation.borrow()
    }

    fn occupy(&self, handle: ModuleHandle) {
        *self.occupant.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn occupant(&self) -> Option<ModuleHandle> {
        *self.occupant.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_occupant(&self) -> Option<ModuleHandle> {
        self.occupant
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn release(&self, handle: ModuleHandle) {
        let mut occupant = self.occupant.lock().unwrap_or_else(PoisonError::into_inner);
        if *occupant == Some(handle) {
            *occupant = None;
        }
    }
}

/// Resolves once `generation` is no longer the surface's current one.
async fn superseded(rx: &mut watch::Receiver<u64>, generation: u64) {
    if rx.wait_for(|g| *g != generation).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

/// Bound module work by whatever is left of `budget` since `started`.
async fn bounded<T>(
    module: &str,
    budget: Duration,
    started: Instant,
    fut: impl Future<Output = ModuleResult<T>>,
) -> ModuleResult<T> {
    let window = budget.saturating_sub(started.elapsed());
    tokio::time::timeout(window, fut)
        .await
        .unwrap_or_else(|_| {
            Err(ModuleError::Timeout {
                module: module.to_string(),
                timeout_ms: millis(budget),
            })
        })
}

/// Loads, mounts and unmounts modules.
pub struct ModuleLoader {
    importer: Arc<dyn ModuleImporter>,
    boundary: Arc<ErrorBoundary>,
    events: LifecycleBus,
    config: LoaderConfig,
    entries: DashMap<ModuleHandle, Entry>,
    surfaces: DashMap<SurfaceId, Arc<SurfaceSlot>>,
}

impl ModuleLoader {
    /// Create a loader with the default policy and a fresh boundary.
    pub fn new(importer: Arc<dyn ModuleImporter>) -> Self {
        Self {
            importer,
            boundary: Arc::new(ErrorBoundary::new()),
            events: LifecycleBus::new(),
            config: LoaderConfig::default(),
            entries: DashMap::new(),
            surfaces: DashMap::new(),
        }
    }

    /// Set the default policy.
    #[must_use]
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a shared error boundary.
    #[must_use]
    pub fn with_boundary(mut self, boundary: Arc<ErrorBoundary>) -> Self {
        self.boundary = boundary;
        self
    }

    /// Publish lifecycle events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: LifecycleBus) -> Self {
        self.events = events;
        self
    }

    /// Default policy.
    #[must_use]
    pub fn config(&self) -> LoaderConfig {
        self.config
    }

    /// The error boundary.
    #[must_use]
    pub fn boundary(&self) -> &Arc<ErrorBoundary> {
        &self.boundary
    }

    /// The lifecycle bus.
    #[must_use]
    pub fn events(&self) -> &LifecycleBus {
        &self.events
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> LifecycleReceiver {
        self.events.subscribe()
    }

    /// Load with the default policy. See [`ModuleLoader::load_with`].
    ///
    /// # Errors
    ///
    /// See [`ModuleLoader::load_with`].
    pub async fn load(
        &self,
        manifest: Arc<Manifest>,
        container: ServiceContainer,
        surface: Arc<dyn MountSurface>,
    ) -> ModuleResult<ModuleHandle> {
        self.load_with(manifest, container, surface, self.config).await
    }

    /// Import `manifest.url` and mount it into `surface`.
    ///
    /// Any module currently on the surface is unloaded first. Failures are
    /// contained: once retries are exhausted the record settles in
    /// [`ModuleState::Failed`], the surface shows the boundary fallback and
    /// the handle is still returned so the caller can [`retry`](Self::retry).
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Cancelled`] if a newer load on the same surface
    /// or a [`detach`](Self::detach) superseded this one.
    pub async fn load_with(
        &self,
        manifest: Arc<Manifest>,
        container: ServiceContainer,
        surface: Arc<dyn MountSurface>,
        config: LoaderConfig,
    ) -> ModuleResult<ModuleHandle> {
        let surface_id = surface.id().clone();
        let slot = self.slot(&surface_id);
        let result = self
            .load_on(&slot, manifest, container, surface, config)
            .await;
        drop(slot);
        self.prune(&surface_id);
        result
    }

    async fn load_on(
        &self,
        slot: &Arc<SurfaceSlot>,
        manifest: Arc<Manifest>,
        container: ServiceContainer,
        surface: Arc<dyn MountSurface>,
        config: LoaderConfig,
    ) -> ModuleResult<ModuleHandle> {
        let module = manifest.name.as_str().to_string();
        let surface_id = surface.id().clone();
        let generation = slot.advance();

        let _serialized = slot.lock.lock().await;
        if slot.current() != generation {
            debug!(module = %module, surface = %surface_id, "Load superseded while queued");
            return Err(ModuleError::Cancelled {
                module,
                surface: surface_id.to_string(),
            });
        }

        if let Some(previous) = slot.take_occupant() {
            debug!(surface = %surface_id, previous = %previous, "Preempting current occupant");
            self.unload(previous).await;
        }

        let mut record = ModuleRecord::new(Arc::clone(&manifest), surface_id.clone());
        record.state = ModuleState::Loading;
        let handle = record.handle;
        self.entries.insert(
            handle,
            Entry {
                record,
                surface: Arc::clone(&surface),
                container: container.clone(),
                config,
                teardown: Mutex::new(None),
            },
        );
        slot.occupy(handle);

        let mut rx = slot.generation.subscribe();
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            self.update(handle, |r| r.state = ModuleState::Loading);
            surface.render(SurfaceContent::Loading {
                module: module.clone(),
            });
            self.events.publish(LifecycleEvent::LoadStarted {
                handle,
                module: module.clone(),
                surface: surface_id.to_string(),
                attempt,
            });
            debug!(module = %module, surface = %surface_id, attempt, url = %manifest.url, "Loading module");

            let started = Instant::now();
            let prepared = tokio::select! {
                biased;
                () = superseded(&mut rx, generation) => None,
                result = self.prepare(&module, &manifest.url, &container, config.load_timeout, started) => Some(result),
            };
            let Some(prepared) = prepared else {
                return Err(self.abandon(handle, slot, surface.as_ref(), &module));
            };

            let mounted = match prepared {
                Ok((remote, services)) => {
                    self.mount(
                        &module,
                        remote,
                        services,
                        Arc::clone(&surface),
                        config.load_timeout,
                        started,
                    )
                    .await
                },
                Err(e) => Err(e),
            };

            let err = match mounted {
                Ok(teardown) => {
                    if let Some(teardown) = self.commit(handle, slot, generation, teardown) {
                        info!(module = %module, surface = %surface_id, "Mount completed after load was superseded; discarding");
                        self.run_teardown(&module, teardown, Arc::clone(&surface))
                            .await;
                        return Err(self.abandon(handle, slot, surface.as_ref(), &module));
                    }
                    info!(module = %module, surface = %surface_id, handle = %handle, attempts = attempt, "Module mounted");
                    self.events.publish(LifecycleEvent::Mounted {
                        handle,
                        module,
                        surface: surface_id.to_string(),
                    });
                    return Ok(handle);
                },
                Err(e) => e,
            };

            let Some(retry_count) = self.record_failure(handle, &err) else {
                return Err(self.abandon(handle, slot, surface.as_ref(), &module));
            };
            let retrying = err.is_retryable() && retry_count <= config.max_retries;
            self.events.publish(LifecycleEvent::LoadFailed {
                handle,
                module: module.clone(),
                error: err.to_string(),
                retrying,
            });

            if retrying {
                warn!(
                    module = %module,
                    attempt,
                    error = %err,
                    delay_ms = millis(config.retry_delay),
                    "Module load failed; retrying"
                );
                let cancelled = tokio::select! {
                    biased;
                    () = superseded(&mut rx, generation) => true,
                    () = tokio::time::sleep(config.retry_delay) => false,
                };
                if cancelled {
                    return Err(self.abandon(handle, slot, surface.as_ref(), &module));
                }
                continue;
            }

            if slot.current() != generation {
                return Err(self.abandon(handle, slot, surface.as_ref(), &module));
            }
            self.settle(&module, &surface_id, surface.as_ref(), &err, attempt);
            return Ok(handle);
        }
    }

    /// Unmount and forget `handle`, reclaiming its surface.
    ///
    /// Teardown errors and panics are logged and swallowed. An in-flight
    /// load is cancelled. Returns the final record, or `None` if the handle
    /// was already unloaded.
    pub async fn unload(&self, handle: ModuleHandle) -> Option<ModuleRecord> {
        let Some((_, entry)) = self.entries.remove(&handle) else {
            debug!(handle = %handle, "Unload of unknown or already unloaded module ignored");
            return None;
        };
        let Entry {
            mut record,
            surface,
            teardown,
            ..
        } = entry;
        let module = record.module().to_string();

        if let Some(slot) = self.surfaces.get(&record.surface).map(|s| Arc::clone(s.value())) {
            if record.state == ModuleState::Loading {
                slot.advance();
            }
            slot.release(handle);
        }

        record.state = ModuleState::Unmounting;
        if let Some(teardown) = teardown.into_inner().unwrap_or_else(PoisonError::into_inner) {
            self.run_teardown(&module, teardown, Arc::clone(&surface))
                .await;
        }
        surface.clear();
        record.state = ModuleState::Unmounted;
        self.prune(&record.surface);

        info!(module = %module, surface = %record.surface, handle = %handle, "Module unmounted");
        self.events.publish(LifecycleEvent::Unmounted {
            handle,
            module,
            surface: record.surface.to_string(),
        });
        Some(record)
    }

    /// Manually retry a failed load; the fallback's retry action.
    ///
    /// The failed record is replaced and a new handle is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownHandle`] or
    /// [`ModuleError::InvalidState`] if the record is not `Failed`, plus
    /// anything [`load_with`](Self::load_with) returns.
    pub async fn retry(&self, handle: ModuleHandle) -> ModuleResult<ModuleHandle> {
        let (manifest, container, surface, config) = {
            let entry = self
                .entries
                .get(&handle)
                .ok_or(ModuleError::UnknownHandle(handle))?;
            if entry.record.state != ModuleState::Failed {
                return Err(ModuleError::InvalidState {
                    module: entry.record.module().to_string(),
                    state: entry.record.state.to_string(),
                    operation: "retry",
                });
            }
            (
                Arc::clone(&entry.record.manifest),
                entry.container.clone(),
                Arc::clone(&entry.surface),
                entry.config,
            )
        };
        info!(module = %manifest.name.as_str(), handle = %handle, "Retrying failed module");
        self.load_with(manifest, container, surface, config).await
    }

    /// Move a mounted module to `Failed` after a fault outside mount.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnknownHandle`] or
    /// [`ModuleError::InvalidState`] if the module is not mounted.
    pub fn fail(&self, handle: ModuleHandle, error: impl std::fmt::Display) -> ModuleResult<()> {
        let (module, surface_id, surface, attempts) = {
            let mut entry = self
                .entries
                .get_mut(&handle)
                .ok_or(ModuleError::UnknownHandle(handle))?;
            if entry.record.state != ModuleState::Mounted {
                return Err(ModuleError::InvalidState {
                    module: entry.record.module().to_string(),
                    state: entry.record.state.to_string(),
                    operation: "fail",
                });
            }
            entry.record.state = ModuleState::Failed;
            entry.record.last_error = Some(error.to_string());
            (
                entry.record.module().to_string(),
                entry.record.surface.clone(),
                Arc::clone(&entry.surface),
                entry.record.retry_count.saturating_add(1),
            )
        };

        let err = ModuleError::load_failed(&module, error);
        self.events.publish(LifecycleEvent::LoadFailed {
            handle,
            module: module.clone(),
            error: err.to_string(),
            retrying: false,
        });
        self.settle(&module, &surface_id, surface.as_ref(), &err, attempts);
        Ok(())
    }

    /// Navigate away from `surface`: cancel its in-flight load and unload its
    /// occupant.
    pub async fn detach(&self, surface: &SurfaceId) -> Option<ModuleRecord> {
        let slot = self.surfaces.get(surface).map(|s| Arc::clone(s.value()))?;
        slot.advance();
        let occupant = slot.take_occupant();
        drop(slot);
        let record = match occupant {
            Some(handle) => {
                debug!(surface = %surface, handle = %handle, "Detaching surface");
                self.unload(handle).await
            },
            None => None,
        };
        self.prune(surface);
        record
    }

    /// Unload every module. Returns how many were unloaded.
    pub async fn unload_all(&self) -> usize {
        let handles: Vec<ModuleHandle> = self.entries.iter().map(|e| *e.key()).collect();
        let mut count: usize = 0;
        for handle in handles {
            if self.unload(handle).await.is_some() {
                count = count.saturating_add(1);
            }
        }
        count
    }

    /// Snapshot of a record.
    #[must_use]
    pub fn record(&self, handle: ModuleHandle) -> Option<ModuleRecord> {
        self.entries.get(&handle).map(|e| e.record.clone())
    }

    /// Current state of a record.
    #[must_use]
    pub fn state(&self, handle: ModuleHandle) -> Option<ModuleState> {
        self.entries.get(&handle).map(|e| e.record.state)
    }

    /// Snapshot of every live record.
    #[must_use]
    pub fn records(&self) -> Vec<ModuleRecord> {
        self.entries.iter().map(|e| e.record.clone()).collect()
    }

    /// Handle currently owning `surface`.
    #[must_use]
    pub fn occupant(&self, surface: &SurfaceId) -> Option<ModuleHandle> {
        self.surfaces.get(surface).and_then(|s| s.occupant())
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no records are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&self, surface: &SurfaceId) -> Arc<SurfaceSlot> {
        Arc::clone(
            self.surfaces
                .entry(surface.clone())
                .or_insert_with(|| Arc::new(SurfaceSlot::new()))
                .value(),
        )
    }

    /// Forget `surface`'s slot once nothing occupies it or waits on it.
    fn prune(&self, surface: &SurfaceId) {
        let removed = self.surfaces.remove_if(surface, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.occupant().is_none()
        });
        if removed.is_some() {
            debug!(surface = %surface, "Surface slot released");
        }
    }

    fn update(&self, handle: ModuleHandle, f: impl FnOnce(&mut ModuleRecord)) -> bool {
        self.entries
            .get_mut(&handle)
            .map(|mut e| f(&mut e.record))
            .is_some()
    }

    /// Import and validate the bundle, then build the services it is handed.
    async fn prepare(
        &self,
        module: &str,
        url: &str,
        container: &ServiceContainer,
        budget: Duration,
        started: Instant,
    ) -> ModuleResult<(Arc<dyn RemoteModule>, MountServices)> {
        bounded(module, budget, started, async {
            let bundle = self
                .boundary
                .guard(module, self.importer.import(url))
                .await?;
            let (remote, convention) = bundle.validate(module)?;
            let services = match convention {
                MountConvention::Container => MountServices::Container(container.clone()),
                MountConvention::FlatServices => {
                    MountServices::Flat(container.get_all_services().await?)
                },
            };
            Ok::<_, ModuleError>((remote, services))
        })
        .await
    }

    async fn mount(
        &self,
        module: &str,
        remote: Arc<dyn RemoteModule>,
        services: MountServices,
        surface: Arc<dyn MountSurface>,
        budget: Duration,
        started: Instant,
    ) -> ModuleResult<Teardown> {
        let outcome = bounded(
            module,
            budget,
            started,
            self.boundary.guard(module, remote.mount(surface, services)),
        )
        .await?;
        Ok(match outcome {
            MountOutcome::Mounted => Teardown::Module(remote),
            MountOutcome::WithCleanup(cleanup) => Teardown::Cleanup(cleanup),
        })
    }

    /// Apply a completed mount unless the load was superseded, in which case
    /// the teardown is handed back.
    fn commit(
        &self,
        handle: ModuleHandle,
        slot: &SurfaceSlot,
        generation: u64,
        teardown: Teardown,
    ) -> Option<Teardown> {
        let Some(mut entry) = self.entries.get_mut(&handle) else {
            return Some(teardown);
        };
        if slot.current() != generation {
            return Some(teardown);
        }
        entry.record.state = ModuleState::Mounted;
        entry.record.mounted_at = Some(Utc::now());
        entry.record.last_error = None;
        *entry
            .teardown
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = Some(teardown);
        None
    }

    fn record_failure(&self, handle: ModuleHandle, err: &ModuleError) -> Option<u32> {
        self.entries.get_mut(&handle).map(|mut e| {
            e.record.state = ModuleState::Failed;
            e.record.retry_count = e.record.retry_count.saturating_add(1);
            e.record.last_error = Some(err.to_string());
            e.record.retry_count
        })
    }

    /// Drop a superseded load's record and reclaim its surface.
    fn abandon(
        &self,
        handle: ModuleHandle,
        slot: &SurfaceSlot,
        surface: &dyn MountSurface,
        module: &str,
    ) -> ModuleError {
        if self.entries.remove(&handle).is_some() {
            surface.clear();
        }
        slot.release(handle);
        debug!(module, surface = %surface.id(), handle = %handle, "Load abandoned");
        self.events.publish(LifecycleEvent::Discarded {
            handle,
            module: module.to_string(),
        });
        ModuleError::Cancelled {
            module: module.to_string(),
            surface: surface.id().to_string(),
        }
    }

    async fn run_teardown(&self, module: &str, teardown: Teardown, surface: Arc<dyn MountSurface>) {
        let result = match teardown {
            Teardown::Cleanup(cleanup) => self.boundary.guard(module, cleanup()).await,
            Teardown::Module(remote) => self.boundary.guard(module, remote.unmount(surface)).await,
        };
        if let Err(e) = result {
            warn!(module, error = %e, "Module teardown failed; reclaiming surface anyway");
        }
    }

    /// Hand a terminal failure to the error boundary.
    fn settle(
        &self,
        module: &str,
        surface_id: &SurfaceId,
        surface: &dyn MountSurface,
        err: &ModuleError,
        attempts: u32,
    ) {
        let report = BoundaryReport {
            module: module.to_string(),
            surface: surface_id.to_string(),
            error: err.to_string(),
            retryable: !matches!(err, ModuleError::InvalidModule { .. }),
            attempts,
            timestamp: Utc::now(),
        };
        self.boundary.render_fallback(surface, &report);
        self.boundary.report(report);
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("config", &self.config)
            .field("records", &self.entries.len())
            .field("surfaces", &self.surfaces.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mfe_core::ModuleName;
    use mfe_services::{FnProvider, ServiceRegistry};
    use tokio::sync::Notify;

    use super::*;
    use crate::module::{ModuleBundle, StaticImporter};
    use crate::surface::MemorySurface;

    /// Renders its name and counts cleanups.
    struct Rendering {
        name: &'static str,
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteModule for Rendering {
        async fn mount(
            &self,
            surface: Arc<dyn MountSurface>,
            services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            let body = match services {
                MountServices::Container(c) => format!("container:{}", c.names().len()),
                MountServices::Flat(map) => format!("flat:{}", map.len()),
            };
            surface.render(SurfaceContent::Module {
                module: self.name.to_string(),
                body,
            });
            let cleanups = Arc::clone(&self.cleanups);
            Ok(MountOutcome::cleanup(move || async move {
                cleanups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        }
    }

    /// Fails `failures` times, then mounts.
    struct Flaky {
        failures: AtomicU32,
        attempts: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteModule for Flaky {
        async fn mount(
            &self,
            _surface: Arc<dyn MountSurface>,
            _services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining.saturating_sub(1), Ordering::SeqCst);
                return Err(ModuleError::load_failed("flaky", "backend unavailable"));
            }
            Ok(MountOutcome::Mounted)
        }
    }

    struct Panicking;

    #[async_trait]
    impl RemoteModule for Panicking {
        async fn mount(
            &self,
            _surface: Arc<dyn MountSurface>,
            _services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            panic!("render exploded");
        }
    }

    struct Hanging;

    #[async_trait]
    impl RemoteModule for Hanging {
        async fn mount(
            &self,
            _surface: Arc<dyn MountSurface>,
            _services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(MountOutcome::Mounted)
        }
    }

    /// Mounts after the given delay.
    struct Slow(Duration);

    #[async_trait]
    impl RemoteModule for Slow {
        async fn mount(
            &self,
            _surface: Arc<dyn MountSurface>,
            _services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            tokio::time::sleep(self.0).await;
            Ok(MountOutcome::Mounted)
        }
    }

    /// Hands back its bundle after `delay`.
    struct SlowImporter {
        delay: Duration,
        bundle: ModuleBundle,
    }

    #[async_trait]
    impl ModuleImporter for SlowImporter {
        async fn import(&self, _url: &str) -> ModuleResult<ModuleBundle> {
            tokio::time::sleep(self.delay).await;
            Ok(self.bundle.clone())
        }
    }

    /// Mounts only once the test opens the gate.
    struct Gated {
        entered: Arc<Notify>,
        gate: Arc<Notify>,
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteModule for Gated {
        async fn mount(
            &self,
            _surface: Arc<dyn MountSurface>,
            _services: MountServices,
        ) -> ModuleResult<MountOutcome> {
            self.entered.notify_one();
            self.gate.notified().await;
            let cleanups = Arc::clone(&self.cleanups);
            Ok(MountOutcome::cleanup(move || async move {
                cleanups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        }
    }

    fn manifest(name: &str) -> Arc<Manifest> {
        Arc::new(Manifest::new(
            ModuleName::new(name).unwrap(),
            "1.0.0",
            format!("/{name}.js"),
        ))
    }

    fn fast() -> LoaderConfig {
        LoaderConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(100),
            load_timeout: Duration::from_secs(5),
        }
    }

    fn setup(bundles: Vec<(&str, ModuleBundle)>) -> (ModuleLoader, ServiceContainer) {
        let importer = StaticImporter::new();
        for (name, bundle) in bundles {
            importer.insert(format!("/{name}.js"), bundle);
        }
        let services = ServiceRegistry::new();
        services.register_instance("logger", "log").unwrap();
        let loader = ModuleLoader::new(Arc::new(importer)).with_config(fast());
        (loader, services.create_container())
    }

    /// Container whose `metrics` provider never finishes building.
    fn stalled_services(entered: &Arc<Notify>) -> ServiceContainer {
        let services = ServiceRegistry::new();
        services.register_instance("logger", "log").unwrap();
        let entered = Arc::clone(entered);
        services
            .register_provider(FnProvider::new("metrics", move |_| {
                let entered = Arc::clone(&entered);
                async move {
                    entered.notify_one();
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(mfe_services::instance("metrics"))
                }
            }))
            .unwrap();
        services.create_container()
    }

    fn rendering(name: &'static str, cleanups: &Arc<AtomicUsize>) -> ModuleBundle {
        ModuleBundle::new(
            Arc::new(Rendering {
                name,
                cleanups: Arc::clone(cleanups),
            }),
            MountConvention::Container,
        )
    }

    #[tokio::test]
    async fn test_load_mounts_and_records_lifecycle() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (loader, container) = setup(vec![("cart", rendering("cart", &cleanups))]);
        let mut events = loader.subscribe();
        let surface = Arc::new(MemorySurface::new("main"));

        let handle = loader
            .load(manifest("cart"), container, surface.clone())
            .await
            .unwrap();

        let record = loader.record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Mounted);
        assert_eq!(record.retry_count, 0);
        assert!(record.mounted_at.is_some());
        assert_eq!(loader.occupant(&SurfaceId::new("main")), Some(handle));
        assert_eq!(
            surface.content(),
            SurfaceContent::Module {
                module: "cart".into(),
                body: "container:1".into(),
            }
        );

        let kinds: Vec<&str> = events.drain().iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["load_started", "mounted"]);
    }

    #[tokio::test]
    async fn test_flat_convention_receives_built_services() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let bundle = ModuleBundle::new(
            Arc::new(Rendering {
                name: "flat",
                cleanups: Arc::clone(&cleanups),
            }),
            MountConvention::FlatServices,
        );
        let (loader, container) = setup(vec![("flat", bundle)]);
        let surface = Arc::new(MemorySurface::new("main"));

        loader
            .load(manifest("flat"), container, surface.clone())
            .await
            .unwrap();
        assert!(matches!(
            surface.content(),
            SurfaceContent::Module { body, .. } if body == "flat:1"
        ));
    }

    #[tokio::test]
    async fn test_unload_is_idempotent() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (loader, container) = setup(vec![("cart", rendering("cart", &cleanups))]);
        let surface = Arc::new(MemorySurface::new("main"));
        let handle = loader
            .load(manifest("cart"), container, surface.clone())
            .await
            .unwrap();

        let record = loader.unload(handle).await.unwrap();
        assert_eq!(record.state, ModuleState::Unmounted);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(surface.content(), SurfaceContent::Empty);

        assert!(loader.unload(handle).await.is_none());
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(loader.is_empty());
        assert!(loader.occupant(&SurfaceId::new("main")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_mounts() {
        let flaky = Arc::new(Flaky::new(2));
        let bundle = ModuleBundle::new(flaky.clone(), MountConvention::Container);
        let (loader, container) = setup(vec![("flaky", bundle)]);
        let surface = Arc::new(MemorySurface::new("main"));

        let handle = loader
            .load(manifest("flaky"), container, surface)
            .await
            .unwrap();

        let record = loader.record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Mounted);
        assert_eq!(record.retry_count, 2);
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
        assert!(record.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_settle_in_boundary() {
        let flaky = Arc::new(Flaky::new(u32::MAX));
        let bundle = ModuleBundle::new(flaky.clone(), MountConvention::Container);
        let (loader, container) = setup(vec![("flaky", bundle)]);
        let mut events = loader.subscribe();
        let surface = Arc::new(MemorySurface::new("main"));

        let handle = loader
            .load(manifest("flaky"), container, surface.clone())
            .await
            .unwrap();

        let record = loader.record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Failed);
        assert_eq!(record.retry_count, 3);
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);

        let report = loader.boundary().last_report().unwrap();
        assert_eq!(report.module, "flaky");
        assert_eq!(report.attempts, 3);
        assert!(matches!(
            surface.content(),
            SurfaceContent::Failed { retryable: true, .. }
        ));

        let retrying: Vec<bool> = events
            .drain()
            .iter()
            .filter_map(|e| match e.as_ref() {
                LifecycleEvent::LoadFailed { retrying, .. } => Some(*retrying),
                _ => None,
            })
            .collect();
        assert_eq!(retrying, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_invalid_module_is_not_retried() {
        let mut bundle = rendering("broken", &Arc::new(AtomicUsize::new(0)));
        bundle.metadata.convention = None;
        let (loader, container) = setup(vec![("broken", bundle)]);
        let mut events = loader.subscribe();
        let surface = Arc::new(MemorySurface::new("main"));

        let handle = loader
            .load(manifest("broken"), container, surface.clone())
            .await
            .unwrap();

        let record = loader.record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Failed);
        assert_eq!(record.retry_count, 1);
        assert!(record.last_error.unwrap().contains("mount convention"));
        let started = events
            .drain()
            .iter()
            .filter(|e| e.event_type() == "load_started")
            .count();
        assert_eq!(started, 1);
        assert!(matches!(
            surface.content(),
            SurfaceContent::Failed { retryable: false, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bundle_fails_after_retries() {
        let (loader, container) = setup(vec![]);
        let surface = Arc::new(MemorySurface::new("main"));
        let handle = loader
            .load(manifest("ghost"), container, surface)
            .await
            .unwrap();
        let record = loader.record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Failed);
        assert_eq!(record.retry_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained_and_sibling_survives() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (loader, container) = setup(vec![
            ("cart", rendering("cart", &cleanups)),
            ("boom", ModuleBundle::new(Arc::new(Panicking), MountConvention::Container)),
        ]);
        let main = Arc::new(MemorySurface::new("main"));
        let side = Arc::new(MemorySurface::new("side"));

        let good = loader
            .load(manifest("cart"), container.clone(), main.clone())
            .await
            .unwrap();
        let bad = loader
            .load(manifest("boom"), container, side.clone())
            .await
            .unwrap();

        assert_eq!(loader.state(good), Some(ModuleState::Mounted));
        assert_eq!(loader.state(bad), Some(ModuleState::Failed));
        assert!(matches!(main.content(), SurfaceContent::Module { .. }));
        assert!(matches!(
            side.content(),
            SurfaceContent::Failed { error, .. } if error.contains("render exploded")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_mount_times_out() {
        let (loader, container) = setup(vec![(
            "slow",
            ModuleBundle::new(Arc::new(Hanging), MountConvention::Container),
        )]);
        let surface = Arc::new(MemorySurface::new("main"));
        let config = LoaderConfig {
            max_retries: 0,
            ..fast()
        };

        let handle = loader
            .load_with(manifest("slow"), container, surface, config)
            .await
            .unwrap();
        let record = loader.record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Failed);
        assert!(record.last_error.unwrap().contains("did not load within 5000 ms"));
    }

    #[tokio::test]
    async fn test_second_load_preempts_occupant() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (loader, container) = setup(vec![
            ("cart", rendering("cart", &cleanups)),
            ("shop", rendering("shop", &cleanups)),
        ]);
        let surface = Arc::new(MemorySurface::new("main"));

        let first = loader
            .load(manifest("cart"), container.clone(), surface.clone())
            .await
            .unwrap();
        let second = loader
            .load(manifest("shop"), container, surface.clone())
            .await
            .unwrap();

        assert!(loader.record(first).is_none());
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(loader.state(second), Some(ModuleState::Mounted));
        assert_eq!(loader.len(), 1);
        assert!(matches!(
            surface.content(),
            SurfaceContent::Module { module, .. } if module == "shop"
        ));
    }

    #[tokio::test]
    async fn test_detach_discards_in_flight_mount() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let cleanups = Arc::new(AtomicUsize::new(0));
        let bundle = ModuleBundle::new(
            Arc::new(Gated {
                entered: Arc::clone(&entered),
                gate: Arc::clone(&gate),
                cleanups: Arc::clone(&cleanups),
            }),
            MountConvention::Container,
        );
        let (loader, container) = setup(vec![("gated", bundle)]);
        let loader = Arc::new(loader);
        let mut events = loader.subscribe();
        let surface = Arc::new(MemorySurface::new("main"));

        let task = {
            let loader = Arc::clone(&loader);
            let surface = surface.clone();
            tokio::spawn(async move { loader.load(manifest("gated"), container, surface).await })
        };

        entered.notified().await;
        let detached = loader.detach(&SurfaceId::new("main")).await.unwrap();
        assert_eq!(detached.state, ModuleState::Unmounted);
        gate.notify_one();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ModuleError::Cancelled { .. })));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(loader.is_empty());
        assert!(loader.surfaces.is_empty());
        assert_eq!(surface.content(), SurfaceContent::Empty);
        assert!(events.drain().iter().any(|e| e.event_type() == "discarded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_flat_services_time_out() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let bundle = ModuleBundle::new(
            Arc::new(Rendering {
                name: "flat",
                cleanups: Arc::clone(&cleanups),
            }),
            MountConvention::FlatServices,
        );
        let (loader, _) = setup(vec![("flat", bundle)]);
        let container = stalled_services(&Arc::new(Notify::new()));
        let surface = Arc::new(MemorySurface::new("main"));
        let config = LoaderConfig {
            max_retries: 0,
            load_timeout: Duration::from_millis(50),
            ..fast()
        };

        let handle = loader
            .load_with(manifest("flat"), container, surface.clone(), config)
            .await
            .unwrap();

        let record = loader.record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Failed);
        assert!(record.last_error.unwrap().contains("did not load within 50 ms"));
        assert!(matches!(
            surface.content(),
            SurfaceContent::Failed { retryable: true, .. }
        ));
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_detach_cancels_pending_service_resolution() {
        let entered = Arc::new(Notify::new());
        let cleanups = Arc::new(AtomicUsize::new(0));
        let bundle = ModuleBundle::new(
            Arc::new(Rendering {
                name: "flat",
                cleanups: Arc::clone(&cleanups),
            }),
            MountConvention::FlatServices,
        );
        let (loader, _) = setup(vec![("flat", bundle)]);
        let loader = Arc::new(loader);
        let container = stalled_services(&entered);
        let surface = Arc::new(MemorySurface::new("main"));

        let task = {
            let loader = Arc::clone(&loader);
            let surface = surface.clone();
            tokio::spawn(async move { loader.load(manifest("flat"), container, surface).await })
        };

        entered.notified().await;
        let detached = loader.detach(&SurfaceId::new("main")).await.unwrap();
        assert_eq!(detached.state, ModuleState::Unmounted);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ModuleError::Cancelled { .. })));
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        assert!(loader.is_empty());
        assert!(loader.surfaces.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_and_mount_share_one_deadline() {
        let config = LoaderConfig {
            max_retries: 0,
            ..fast()
        };
        let loader_with = |phase: Duration| {
            ModuleLoader::new(Arc::new(SlowImporter {
                delay: phase,
                bundle: ModuleBundle::new(Arc::new(Slow(phase)), MountConvention::Container),
            }))
        };
        let container = ServiceRegistry::new().create_container();

        // 3 s + 3 s overruns a 5 s attempt even though each phase fits.
        let over = loader_with(Duration::from_secs(3));
        let handle = over
            .load_with(
                manifest("slow"),
                container.clone(),
                Arc::new(MemorySurface::new("main")),
                config,
            )
            .await
            .unwrap();
        let record = over.record(handle).unwrap();
        assert_eq!(record.state, ModuleState::Failed);
        assert!(record.last_error.unwrap().contains("did not load within 5000 ms"));

        let within = loader_with(Duration::from_secs(2));
        let handle = within
            .load_with(
                manifest("slow"),
                container,
                Arc::new(MemorySurface::new("main")),
                config,
            )
            .await
            .unwrap();
        assert_eq!(within.state(handle), Some(ModuleState::Mounted));
    }

    #[tokio::test]
    async fn test_surface_slots_are_released() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (loader, container) = setup(vec![("cart", rendering("cart", &cleanups))]);
        let a = loader
            .load(manifest("cart"), container.clone(), Arc::new(MemorySurface::new("a")))
            .await
            .unwrap();
        loader
            .load(manifest("cart"), container, Arc::new(MemorySurface::new("b")))
            .await
            .unwrap();
        assert_eq!(loader.surfaces.len(), 2);

        loader.unload(a).await.unwrap();
        assert_eq!(loader.surfaces.len(), 1);
        loader.detach(&SurfaceId::new("b")).await.unwrap();
        assert!(loader.surfaces.is_empty());
        assert!(loader.detach(&SurfaceId::new("b")).await.is_none());
        assert!(loader.surfaces.is_empty());
    }

    #[tokio::test]
    async fn test_manual_retry_replaces_failed_record() {
        let flaky = Arc::new(Flaky::new(1));
        let bundle = ModuleBundle::new(flaky, MountConvention::Container);
        let (loader, container) = setup(vec![("flaky", bundle)]);
        let surface = Arc::new(MemorySurface::new("main"));
        let config = LoaderConfig {
            max_retries: 0,
            ..fast()
        };

        let failed = loader
            .load_with(manifest("flaky"), container, surface, config)
            .await
            .unwrap();
        assert_eq!(loader.state(failed), Some(ModuleState::Failed));

        let retried = loader.retry(failed).await.unwrap();
        assert_ne!(retried, failed);
        assert!(loader.record(failed).is_none());
        assert_eq!(loader.state(retried), Some(ModuleState::Mounted));
    }

    #[tokio::test]
    async fn test_retry_requires_failed_state() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (loader, container) = setup(vec![("cart", rendering("cart", &cleanups))]);
        let handle = loader
            .load(manifest("cart"), container, Arc::new(MemorySurface::new("main")))
            .await
            .unwrap();

        assert!(matches!(
            loader.retry(handle).await,
            Err(ModuleError::InvalidState { operation: "retry", .. })
        ));
        assert!(matches!(
            loader.retry(ModuleHandle::new()).await,
            Err(ModuleError::UnknownHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_moves_mounted_module_to_fallback() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (loader, container) = setup(vec![("cart", rendering("cart", &cleanups))]);
        let surface = Arc::new(MemorySurface::new("main"));
        let handle = loader
            .load(manifest("cart"), container, surface.clone())
            .await
            .unwrap();

        loader.fail(handle, "render error").unwrap();
        assert_eq!(loader.state(handle), Some(ModuleState::Failed));
        assert!(matches!(surface.content(), SurfaceContent::Failed { .. }));
        assert!(loader.fail(handle, "again").is_err());

        // A failed-after-mount module is still torn down on unload.
        loader.unload(handle).await.unwrap();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unload_all() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (loader, container) = setup(vec![("cart", rendering("cart", &cleanups))]);
        for id in ["a", "b", "c"] {
            loader
                .load(manifest("cart"), container.clone(), Arc::new(MemorySurface::new(id)))
                .await
                .unwrap();
        }
        assert_eq!(loader.unload_all().await, 3);
        assert_eq!(cleanups.load(Ordering::SeqCst), 3);
        assert!(loader.is_empty());
    }
}
