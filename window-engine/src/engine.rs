// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use core_types::{Document, Mutation, MutationEvent, WindowConfig};
use data_client::{DocumentStore, StoreError};
use doc_query::{pivot_query, QuerySpec, Side};
use engine_api::{Engine, EngineError, EngineHealth, EngineResult, HealthStatus};
use futures::StreamExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{
        broadcast::{self, error::RecvError, error::TryRecvError},
        watch,
    },
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::{Deficits, FillPlan, Regions, WindowState},
    error::{TransportError, WindowError},
    events::WindowEvent,
    metrics::{WindowMetrics, WindowMetricsSnapshot},
};

/// Connection lifecycle as seen by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Subscribed, waiting for the welcome event.
    Connecting,
    Connected,
}

/// Live, sorted window over a [`DocumentStore`] collection.
///
/// Dropping the engine stops it.
pub struct WindowEngine {
    inner: Arc<EngineInner>,
}

impl WindowEngine {
    /// Validates `config` and appends the identifier tie-breaker to the query order.
    pub fn new(
        config: WindowConfig,
        query: QuerySpec,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, WindowError> {
        config.validate()?;
        let query = query.with_tie_breaker(&config.id_field);
        let window = WindowState::new(
            query.order().to_vec(),
            config.from,
            config.to,
            config.buffer_factor,
        )?;
        Ok(Self {
            inner: EngineInner::new(config, query, store, window),
        })
    }

    /// Registers an observer.
    ///
    /// With `connect_on_subscribe` the first live subscription starts the
    /// engine and dropping the last one stops it.
    pub fn subscribe(&self) -> WindowSubscription {
        let receiver = self.inner.events.subscribe();
        let observer = self
            .inner
            .config
            .connect_on_subscribe
            .then(|| ObserverGuard::attach(Arc::clone(&self.inner)));
        WindowSubscription {
            receiver,
            _observer: observer,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.inner.config
    }

    /// Base query with the tie-breaker applied.
    pub fn query(&self) -> &QuerySpec {
        &self.inner.query
    }

    pub fn from(&self) -> usize {
        self.inner.shared.lock().window.from()
    }

    pub fn to(&self) -> usize {
        self.inner.shared.lock().window.to()
    }

    pub fn set_from(&self, from: usize) -> Result<(), WindowError> {
        self.inner.update_range(|_, to| (from, to))
    }

    pub fn set_to(&self, to: usize) -> Result<(), WindowError> {
        self.inner.update_range(|from, _| (from, to))
    }

    pub fn set_range(&self, from: usize, to: usize) -> Result<(), WindowError> {
        self.inner.update_range(|_, _| (from, to))
    }

    pub fn current_window(&self) -> Vec<Document> {
        self.inner.shared.lock().window.window()
    }

    pub fn regions(&self) -> Regions {
        self.inner.shared.lock().window.regions()
    }

    pub fn buffer(&self) -> Arc<Vec<Document>> {
        self.inner.shared.lock().window.buffer()
    }

    pub fn origin(&self) -> usize {
        self.inner.shared.lock().window.origin()
    }

    pub fn deficits(&self) -> Deficits {
        self.inner.shared.lock().window.deficits()
    }

    pub fn has_snapshot(&self) -> bool {
        self.inner.shared.lock().window.has_snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.inner.shared.lock().phase
    }

    /// Outstanding connect, fetch and timer operations.
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    pub fn metrics(&self) -> WindowMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Resolves once nothing is outstanding.
    pub async fn settled(&self) {
        let mut pending = self.inner.pending.subscribe();
        let _ = pending.wait_for(|count| *count == 0).await;
    }

    /// Whether the margins will be extended by a pivot fetch before the engine settles.
    pub async fn will_backfill(&self) -> bool {
        let mut events = self.inner.events.subscribe();
        {
            let shared = self.inner.shared.lock();
            if shared.request.in_flight.is_some() && shared.request.fill {
                return true;
            }
            if shared.pending == 0 {
                return false;
            }
        }
        loop {
            match events.recv().await {
                Ok(WindowEvent::Backfill { .. }) => return true,
                Ok(WindowEvent::Settle) | Err(RecvError::Closed) => return false,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
            }
        }
    }
}

impl Engine for WindowEngine {
    fn start(&self) -> EngineResult<()> {
        self.inner.start()
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn health(&self) -> EngineHealth {
        self.inner.shared.lock().health.clone()
    }
}

impl Drop for WindowEngine {
    fn drop(&mut self) {
        let _ = self.inner.stop();
    }
}

/// Event feed for one observer.
pub struct WindowSubscription {
    receiver: broadcast::Receiver<WindowEvent>,
    _observer: Option<ObserverGuard>,
}

impl WindowSubscription {
    /// Next event, or `None` once the engine is gone. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<WindowEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("window subscriber lagged; skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<WindowEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("window subscriber lagged; skipped {} event(s)", skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

struct ObserverGuard {
    inner: Arc<EngineInner>,
}

impl ObserverGuard {
    fn attach(inner: Arc<EngineInner>) -> Self {
        let first = {
            let mut shared = inner.shared.lock();
            shared.observers += 1;
            shared.observers == 1
        };
        if first {
            match inner.start() {
                Ok(()) | Err(EngineError::AlreadyRunning) => {}
                Err(err) => warn!("[{}] lazy connect failed: {}", inner.config.label, err),
            }
        }
        Self { inner }
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        let last = {
            let mut shared = self.inner.shared.lock();
            shared.observers = shared.observers.saturating_sub(1);
            shared.observers == 0
        };
        if last {
            debug!("[{}] last observer left", self.inner.config.label);
            let _ = self.inner.stop();
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum FetchKind {
    Snapshot { origin: usize },
    Fill { side: Side },
}

struct Session {
    token: CancellationToken,
    runtime: Handle,
}

/// At most one fetch in flight; a newer one supersedes it.
#[derive(Default)]
struct RequestSlot {
    generation: u64,
    in_flight: Option<CancellationToken>,
    fill: bool,
}

/// Debounce timer; re-arming replaces the pending deadline.
#[derive(Default)]
struct TimerSlot {
    generation: u64,
    armed: Option<CancellationToken>,
}

struct Shared {
    window: WindowState,
    phase: Phase,
    connects: u64,
    session: Option<Session>,
    request: RequestSlot,
    timer: TimerSlot,
    pending: usize,
    observers: usize,
    health: EngineHealth,
}

struct EngineInner {
    config: WindowConfig,
    query: QuerySpec,
    store: Arc<dyn DocumentStore>,
    shared: Mutex<Shared>,
    events: broadcast::Sender<WindowEvent>,
    pending: watch::Sender<usize>,
    metrics: WindowMetrics,
}

impl EngineInner {
    fn new(
        config: WindowConfig,
        query: QuerySpec,
        store: Arc<dyn DocumentStore>,
        window: WindowState,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        let (pending, _) = watch::channel(0);
        Arc::new(Self {
            config,
            query,
            store,
            shared: Mutex::new(Shared {
                window,
                phase: Phase::Idle,
                connects: 0,
                session: None,
                request: RequestSlot::default(),
                timer: TimerSlot::default(),
                pending: 0,
                observers: 0,
                health: EngineHealth::new(HealthStatus::Stopped, Some("engine not started".into())),
            }),
            events,
            pending,
            metrics: WindowMetrics::new(),
        })
    }

    fn start(self: &Arc<Self>) -> EngineResult<()> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let mut shared = self.shared.lock();
        if shared.session.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        let listener_token = token.child_token();
        shared.session = Some(Session {
            token,
            runtime: runtime.clone(),
        });
        shared.phase = Phase::Connecting;
        shared.connects = 0;
        shared.health = EngineHealth::new(HealthStatus::Starting, None);
        self.adjust_pending(&mut shared, 1);
        let listener = Arc::clone(self);
        runtime.spawn(async move {
            listener.listen(listener_token).await;
        });
        info!(
            "[{}] window engine starting for {}",
            self.config.label,
            self.query.filter()
        );
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        let mut shared = self.shared.lock();
        let Some(session) = shared.session.take() else {
            return Err(EngineError::NotRunning);
        };
        session.token.cancel();
        shared.request.generation += 1;
        shared.request.in_flight = None;
        shared.timer.generation += 1;
        shared.timer.armed = None;
        shared.phase = Phase::Idle;
        shared.connects = 0;
        shared.pending = 0;
        self.pending.send_replace(0);
        shared.health = EngineHealth::new(HealthStatus::Stopped, None);
        info!("[{}] window engine stopped", self.config.label);
        Ok(())
    }

    fn emit(&self, event: WindowEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Settles when the count returns to zero; callers increment before decrementing.
    fn adjust_pending(&self, shared: &mut Shared, delta: isize) {
        let next = shared.pending.saturating_add_signed(delta);
        if next == shared.pending {
            return;
        }
        shared.pending = next;
        self.pending.send_replace(next);
        if next == 0 {
            debug!("[{}] settled", self.config.label);
            self.emit(WindowEvent::Settle);
        }
    }

    fn report_transport(&self, shared: &mut Shared, err: TransportError) {
        warn!("[{}] {}", self.config.label, err);
        self.metrics.record_transport_error();
        shared.health = EngineHealth::degraded(err.to_string());
        self.emit(WindowEvent::Error(err));
    }

    async fn listen(self: Arc<Self>, token: CancellationToken) {
        let filter = self.query.filter();
        let subscribed = tokio::select! {
            _ = token.cancelled() => return,
            result = self.store.subscribe(&filter) => result,
        };
        let mut stream = match subscribed {
            Ok(stream) => stream,
            Err(err) => {
                let mut shared = self.shared.lock();
                if token.is_cancelled() {
                    return;
                }
                self.report_transport(&mut shared, TransportError::Subscribe(err));
                self.abandon_connect(&mut shared);
                return;
            }
        };
        debug!("[{}] change stream open", self.config.label);
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => next,
            };
            let mut shared = self.shared.lock();
            if token.is_cancelled() {
                break;
            }
            match next {
                Some(Ok(MutationEvent::Welcome)) => self.on_welcome(&mut shared),
                Some(Ok(MutationEvent::Mutation(mutation))) => {
                    self.on_mutation(&mut shared, mutation)
                }
                Some(Err(StoreError::Closed)) | None => {
                    self.report_transport(&mut shared, TransportError::StreamEnded);
                    self.abandon_connect(&mut shared);
                    break;
                }
                Some(Err(err)) => {
                    self.report_transport(&mut shared, TransportError::Stream(err));
                }
            }
        }
        debug!("[{}] change stream listener exiting", self.config.label);
    }

    /// Releases the connect operation when the welcome never arrived.
    fn abandon_connect(&self, shared: &mut Shared) {
        if shared.phase == Phase::Connecting {
            self.adjust_pending(shared, -1);
        }
    }

    fn on_welcome(self: &Arc<Self>, shared: &mut Shared) {
        let reconnected = shared.connects > 0;
        shared.connects += 1;
        let was_connecting = shared.phase == Phase::Connecting;
        shared.phase = Phase::Connected;
        shared.health = EngineHealth::new(HealthStatus::Ready, None);
        info!(
            "[{}] change stream connected (reconnected: {})",
            self.config.label, reconnected
        );
        self.emit(WindowEvent::Connect { reconnected });
        let (from, to) = shared.window.snapshot_range();
        self.issue_range_fetch(shared, from, to);
        if was_connecting {
            self.adjust_pending(shared, -1);
        }
    }

    fn on_mutation(self: &Arc<Self>, shared: &mut Shared, mutation: Mutation) {
        self.emit(WindowEvent::Mutation(mutation.clone()));
        if !shared.window.has_snapshot() {
            debug!(
                "[{}] mutation for {} arrived before snapshot; skipping",
                self.config.label, mutation.document_id
            );
            self.metrics.record_mutation(None);
            return;
        }
        let outcome = shared.window.apply_mutation(&mutation);
        debug!(
            "[{}] mutation for {}: {:?}",
            self.config.label, mutation.document_id, outcome
        );
        self.metrics.record_mutation(Some(outcome));
        self.schedule_if_needed(shared);
        self.emit_window(shared);
    }

    fn update_range<F>(self: &Arc<Self>, next: F) -> Result<(), WindowError>
    where
        F: FnOnce(usize, usize) -> (usize, usize),
    {
        let mut shared = self.shared.lock();
        let (from, to) = next(shared.window.from(), shared.window.to());
        shared.window.set_range(from, to)?;
        debug!("[{}] window moved to {}..{}", self.config.label, from, to);
        if !shared.window.has_snapshot() {
            return Ok(());
        }
        if shared.window.deficits().any() {
            self.schedule_backfill(&mut shared);
        } else {
            self.emit_window(&shared);
        }
        Ok(())
    }

    fn emit_window(&self, shared: &Shared) {
        let regions = shared.window.regions();
        self.emit(WindowEvent::Data {
            documents: regions.window.clone(),
        });
        self.emit(WindowEvent::Debug(regions));
    }

    fn schedule_if_needed(self: &Arc<Self>, shared: &mut Shared) {
        if shared.window.deficits().any() {
            self.schedule_backfill(shared);
        }
    }

    /// Arms (or re-arms) the debounce timer. Only runs while connected.
    fn schedule_backfill(self: &Arc<Self>, shared: &mut Shared) {
        if shared.phase != Phase::Connected {
            debug!(
                "[{}] not connected; deferring backfill",
                self.config.label
            );
            return;
        }
        let Some(session) = shared.session.as_ref() else {
            return;
        };
        let token = session.token.child_token();
        let runtime = session.runtime.clone();
        match shared.timer.armed.replace(token.clone()) {
            Some(previous) => previous.cancel(),
            None => self.adjust_pending(shared, 1),
        }
        shared.timer.generation += 1;
        let generation = shared.timer.generation;
        let delay = self.config.backfill_debounce();
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(delay) => inner.fire_backfill(generation),
            }
        });
    }

    fn fire_backfill(self: &Arc<Self>, generation: u64) {
        let mut shared = self.shared.lock();
        if shared.timer.generation != generation || shared.timer.armed.take().is_none() {
            return;
        }
        match shared.window.plan_backfill() {
            None => debug!("[{}] margins satisfied; no backfill", self.config.label),
            Some(FillPlan::Range { from, to }) => {
                debug!(
                    "[{}] window left the buffer; refetching {}..{}",
                    self.config.label, from, to
                );
                self.issue_range_fetch(&mut shared, from, to);
            }
            Some(FillPlan::Pivot { side, pivot, count }) => {
                debug!(
                    "[{}] backfill needed at {}, {} missing",
                    self.config.label,
                    side.as_str(),
                    count
                );
                match pivot_query(&self.query, &pivot, side, count) {
                    Ok(query) => {
                        self.metrics.record_backfill(side, count);
                        self.emit(WindowEvent::Backfill { side, count });
                        self.issue_fetch(&mut shared, FetchKind::Fill { side }, query);
                    }
                    Err(err) => error!(
                        "[{}] could not build {} backfill query: {}",
                        self.config.label,
                        side.as_str(),
                        err
                    ),
                }
            }
        }
        self.adjust_pending(&mut shared, -1);
    }

    fn issue_range_fetch(self: &Arc<Self>, shared: &mut Shared, from: usize, to: usize) {
        match self.query.clone().with_range(from, to) {
            Ok(query) => self.issue_fetch(shared, FetchKind::Snapshot { origin: from }, query),
            Err(err) => error!(
                "[{}] could not build snapshot query: {}",
                self.config.label, err
            ),
        }
    }

    /// Starts a fetch, cancelling whichever one is still in flight.
    fn issue_fetch(self: &Arc<Self>, shared: &mut Shared, kind: FetchKind, query: QuerySpec) {
        let Some(session) = shared.session.as_ref() else {
            return;
        };
        let token = session.token.child_token();
        let runtime = session.runtime.clone();
        match shared.request.in_flight.replace(token.clone()) {
            Some(previous) => {
                previous.cancel();
                self.metrics.record_superseded();
                debug!("[{}] superseding in-flight fetch", self.config.label);
            }
            None => self.adjust_pending(shared, 1),
        }
        shared.request.generation += 1;
        shared.request.fill = matches!(kind, FetchKind::Fill { .. });
        let generation = shared.request.generation;
        let requested = query.to() - query.from();
        debug!("[{}] fetching {}", self.config.label, query);
        self.metrics.record_fetch_attempt();
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            let started = Instant::now();
            let result = tokio::select! {
                _ = token.cancelled() => {
                    inner.metrics.record_fetch_cancelled();
                    return;
                }
                result = inner.store.fetch(&query) => result,
            };
            inner.complete_fetch(generation, kind, requested, started.elapsed(), result);
        });
    }

    fn complete_fetch(
        self: &Arc<Self>,
        generation: u64,
        kind: FetchKind,
        requested: usize,
        elapsed: Duration,
        result: Result<Vec<Document>, StoreError>,
    ) {
        let mut shared = self.shared.lock();
        if shared.request.generation != generation || shared.request.in_flight.take().is_none() {
            debug!("[{}] dropping stale fetch result", self.config.label);
            self.metrics.record_fetch_cancelled();
            return;
        }
        match result {
            Ok(documents) => {
                self.metrics.record_fetch_success(elapsed);
                match kind {
                    FetchKind::Snapshot { origin } => {
                        self.apply_snapshot(&mut shared, origin, documents, requested)
                    }
                    FetchKind::Fill { side } => {
                        self.apply_fill(&mut shared, side, documents, requested)
                    }
                }
            }
            Err(err) => {
                self.metrics.record_fetch_failure(elapsed);
                let err = match kind {
                    FetchKind::Snapshot { .. } => TransportError::Snapshot(err),
                    FetchKind::Fill { side } => TransportError::Backfill { side, source: err },
                };
                self.report_transport(&mut shared, err);
            }
        }
        self.adjust_pending(&mut shared, -1);
    }

    fn apply_snapshot(
        self: &Arc<Self>,
        shared: &mut Shared,
        origin: usize,
        documents: Vec<Document>,
        requested: usize,
    ) {
        self.metrics.record_snapshot(documents.len());
        shared.window.apply_snapshot(origin, documents, requested);
        info!(
            "[{}] snapshot loaded {} document(s) at offset {}",
            self.config.label,
            shared.window.len(),
            origin
        );
        self.emit(WindowEvent::Snapshot {
            documents: shared.window.buffer().to_vec(),
        });
        self.emit_window(shared);
        self.schedule_if_needed(shared);
    }

    fn apply_fill(
        self: &Arc<Self>,
        shared: &mut Shared,
        side: Side,
        documents: Vec<Document>,
        requested: usize,
    ) {
        let outcome = shared.window.apply_fill(side, documents, requested);
        self.metrics.record_backfill_documents(outcome.added);
        debug!(
            "[{}] {} backfill added {} trimmed {}",
            self.config.label,
            side.as_str(),
            outcome.added,
            outcome.trimmed
        );
        self.emit_window(shared);
        self.schedule_if_needed(shared);
    }
}
