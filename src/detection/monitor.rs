//! The per-vehicle monitor actor.
//!
//! All sensor callbacks are serialized into one mpsc queue feeding the
//! debounce layer and the state machine, so neither needs internal locking.
//! Concurrency exists only in the restriction evaluation fan-out, and every
//! in-flight evaluation is guarded by a per-session cancellation token: a
//! confirmed Driving transition cancels it so a stale verdict for a session
//! the owner already left is never delivered.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::db::Database;
use crate::detection::{ParkingState, ParkingStateMachine, StateChange};
use crate::geo::{GeoSampler, LocationFix, LocationProvider, SamplingRate};
use crate::models::{ParkingSession, SessionStatus};
use crate::notify::NotificationPolicy;
use crate::rules::{RestrictionEvaluator, RestrictionVerdict};
use crate::signal::{DebounceLayer, DebouncedTransition, RawSignal, SignalAdapter};
use crate::store::{DeliverySink, ProfileStore, RestrictionStore};

const EVENT_QUEUE_DEPTH: usize = 64;

/// External collaborators wired in by the host at startup.
pub struct MonitorDeps {
    pub db: Database,
    pub store: Arc<dyn RestrictionStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub delivery: Arc<dyn DeliverySink>,
    pub location: Arc<dyn LocationProvider>,
}

/// Cloneable handle for pushing platform signals in and observing state.
#[derive(Clone)]
pub struct MonitorHandle {
    events: mpsc::Sender<RawSignal>,
    state: watch::Receiver<ParkingState>,
}

impl MonitorHandle {
    pub async fn submit(&self, raw: RawSignal) -> Result<()> {
        self.events
            .send(raw)
            .await
            .context("monitor loop is no longer accepting events")
    }

    pub fn current_state(&self) -> ParkingState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ParkingState> {
        self.state.clone()
    }
}

/// Owns the monitor task lifecycle, one instance per monitored vehicle.
pub struct ParkingMonitor {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl ParkingMonitor {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub async fn start(&mut self, config: MonitorConfig, deps: MonitorDeps) -> Result<MonitorHandle> {
        if self.handle.is_some() {
            bail!("monitor already active");
        }

        // Sessions left open by a previous process can never still be
        // trusted; close them before producing new history.
        deps.db
            .mark_stale_sessions_interrupted(Utc::now())
            .await
            .context("startup session recovery failed")?;

        let cancel_token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(ParkingState::Unknown);

        let worker = MonitorLoop::new(config, deps, state_tx);
        let handle = tokio::spawn(worker.run(events_rx, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);

        Ok(MonitorHandle {
            events: events_tx,
            state: state_rx,
        })
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("monitor loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for ParkingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Open-session bookkeeping held by the loop while Parked.
struct OpenSession {
    id: String,
    /// Parked anchor for the displacement check; absent when the session
    /// opened without a fix.
    anchor: Option<LocationFix>,
    eval_cancel: CancellationToken,
}

struct MonitorLoop {
    config: MonitorConfig,
    adapter: SignalAdapter,
    debounce: DebounceLayer,
    machine: ParkingStateMachine,
    sampler: GeoSampler,
    evaluator: Arc<RestrictionEvaluator>,
    policy: NotificationPolicy,
    db: Database,
    delivery: Arc<dyn DeliverySink>,
    state_tx: watch::Sender<ParkingState>,
    pending_deadline: Option<Instant>,
    session: Option<OpenSession>,
    /// Last verdict actually delivered for the current session; shared with
    /// the evaluation task for duplicate suppression across re-evaluations.
    last_delivered: Arc<Mutex<Option<RestrictionVerdict>>>,
}

impl MonitorLoop {
    fn new(config: MonitorConfig, deps: MonitorDeps, state_tx: watch::Sender<ParkingState>) -> Self {
        let adapter = SignalAdapter::new(&config);
        let debounce = DebounceLayer::new(&config);
        let sampler = GeoSampler::new(deps.location, &config);
        let evaluator = Arc::new(RestrictionEvaluator::new(
            deps.store,
            deps.profiles,
            &config,
        ));
        let policy = NotificationPolicy::new(&config);

        Self {
            config,
            adapter,
            debounce,
            machine: ParkingStateMachine::new(),
            sampler,
            evaluator,
            policy,
            db: deps.db,
            delivery: deps.delivery,
            state_tx,
            pending_deadline: None,
            session: None,
            last_delivered: Arc::new(Mutex::new(None)),
        }
    }

    async fn run(mut self, mut events_rx: mpsc::Receiver<RawSignal>, cancel: CancellationToken) {
        let mut rate = SamplingRate::for_state(&self.machine.state());
        let mut ticker = new_ticker(rate.interval(&self.config));

        loop {
            // Disabled select arms still construct their futures; park them
            // far in the future instead of panicking on a missing deadline.
            let far = Instant::now() + Duration::from_secs(86_400);
            let debounce_at = self.debounce.next_deadline();
            let pending_at = self.pending_deadline;

            tokio::select! {
                maybe = events_rx.recv() => {
                    match maybe {
                        Some(raw) => self.on_raw_signal(raw).await,
                        None => {
                            info!("event channel closed, monitor loop exiting");
                            break;
                        }
                    }
                }
                _ = sleep_until(debounce_at.unwrap_or(far)), if debounce_at.is_some() => {
                    self.on_debounce_deadline().await;
                }
                _ = sleep_until(pending_at.unwrap_or(far)), if pending_at.is_some() => {
                    self.on_confirmation_elapsed().await;
                }
                _ = ticker.tick() => {
                    self.on_sampling_tick().await;
                }
                _ = cancel.cancelled() => {
                    info!("monitor loop shutting down");
                    break;
                }
            }

            let wanted = SamplingRate::for_state(&self.machine.state());
            if wanted != rate {
                rate = wanted;
                ticker = new_ticker(rate.interval(&self.config));
            }
        }

        // Leave any open session Active: the vehicle is still parked, and
        // the next start will recover it if the process never returns.
        if let Some(open) = self.session.take() {
            open.eval_cancel.cancel();
        }
    }

    async fn on_raw_signal(&mut self, raw: RawSignal) {
        let Some(event) = self.adapter.normalize(raw, Utc::now()) else {
            return;
        };

        if let Some(transition) = self.debounce.observe(&event, Instant::now()) {
            self.apply_transition(transition).await;
        }
    }

    async fn on_debounce_deadline(&mut self) {
        // Released in source-priority order, so simultaneous contradictory
        // confirmations resolve deterministically.
        for transition in self.debounce.poll(Instant::now(), Utc::now()) {
            self.apply_transition(transition).await;
        }
    }

    async fn apply_transition(&mut self, transition: DebouncedTransition) {
        if let Some(change) = self.machine.apply(&transition) {
            self.on_state_change(change).await;
        }
    }

    async fn on_confirmation_elapsed(&mut self) {
        self.pending_deadline = None;
        if let Some(change) = self.machine.confirm_parked(Utc::now()) {
            self.on_state_change(change).await;
        }
    }

    async fn on_state_change(&mut self, change: StateChange) {
        info!("parking state {:?} -> {:?}", change.from, change.to);
        let _ = self.state_tx.send(change.to);

        match change.to {
            ParkingState::ParkingPending => {
                self.pending_deadline = Some(Instant::now() + self.config.pending_confirmation);
            }
            ParkingState::Driving => {
                self.pending_deadline = None;
                self.close_session(change).await;
            }
            ParkingState::Parked => {
                self.open_session().await;
            }
            ParkingState::Unknown => {}
        }
    }

    /// Parked transition: one high-accuracy fix, open the session, then kick
    /// off the restriction evaluation under a fresh cancellation token.
    async fn open_session(&mut self) {
        let started_at = Utc::now();
        let fix = self.sampler.current_fix(true).await;
        if fix.is_none() {
            warn!("parked without a usable location fix; evaluating degraded");
        }

        let id = Uuid::new_v4().to_string();
        let session = ParkingSession::open(id.clone(), started_at, fix);
        if let Err(err) = self.db.insert_session(&session).await {
            error!("failed to persist parking session {id}: {err:?}");
        }

        if let Ok(mut guard) = self.last_delivered.lock() {
            *guard = None;
        }

        let eval_cancel = CancellationToken::new();
        self.session = Some(OpenSession {
            id: id.clone(),
            anchor: fix,
            eval_cancel: eval_cancel.clone(),
        });

        self.spawn_evaluation(id, fix, eval_cancel);
    }

    fn spawn_evaluation(
        &self,
        session_id: String,
        fix: Option<LocationFix>,
        cancel: CancellationToken,
    ) {
        let evaluator = Arc::clone(&self.evaluator);
        let policy = self.policy.clone();
        let db = self.db.clone();
        let delivery = Arc::clone(&self.delivery);
        let last_delivered = Arc::clone(&self.last_delivered);
        let observed_at = Utc::now();

        tokio::spawn(async move {
            let verdict = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("evaluation cancelled for session {session_id}");
                    return;
                }
                verdict = evaluator.evaluate(fix, observed_at) => verdict,
            };

            let previous = match last_delivered.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            let decision = policy.decide(&verdict, previous.as_ref());

            if decision.notify {
                // The session may have closed while the verdict was being
                // assembled; a stale alert is worse than none.
                if cancel.is_cancelled() {
                    info!("dropping verdict for departed session {session_id}");
                    return;
                }

                let sink = Arc::clone(&delivery);
                let payload = decision.clone();
                let sent = tokio::task::spawn_blocking(move || sink.deliver(&payload)).await;
                match sent {
                    Ok(Ok(())) => {
                        if let Ok(mut guard) = last_delivered.lock() {
                            *guard = Some(verdict.clone());
                        }
                    }
                    Ok(Err(err)) => error!("delivery failed for session {session_id}: {err:?}"),
                    Err(err) => error!("delivery worker join failed: {err}"),
                }
            }

            if let Err(err) = db.attach_verdict(&session_id, &verdict, Utc::now()).await {
                error!("failed to attach verdict to session {session_id}: {err:?}");
            }
        });
    }

    async fn close_session(&mut self, change: StateChange) {
        let Some(open) = self.session.take() else {
            return;
        };

        // Stale evaluations for a session the owner already left must never
        // surface.
        open.eval_cancel.cancel();

        if let Err(err) = self
            .db
            .close_session(&open.id, SessionStatus::Departed, change.at)
            .await
        {
            error!("failed to close parking session {}: {err:?}", open.id);
        }

        if let Ok(mut guard) = self.last_delivered.lock() {
            *guard = None;
        }
    }

    async fn on_sampling_tick(&mut self) {
        match self.machine.state() {
            ParkingState::Parked => self.keepalive_check().await,
            // High-rate path: keep the fix cache warm so a parked transition
            // has a recent last-known fallback.
            _ => {
                let _ = self.sampler.current_fix(false).await;
            }
        }
    }

    /// Keepalive: never fully off while parked. Detects silent resumption of
    /// driving (missed signals) through displacement, and upgrades a
    /// location-less session once a fix finally arrives.
    async fn keepalive_check(&mut self) {
        let Some(fix) = self.sampler.current_fix(false).await else {
            return;
        };

        let Some(open) = self.session.as_mut() else {
            return;
        };

        match open.anchor {
            Some(anchor) => {
                if self.sampler.displaced(&anchor, &fix) {
                    warn!("displacement beyond radius while parked; treating as departure");
                    if let Some(change) = self.machine.displacement_exit(Utc::now()) {
                        self.on_state_change(change).await;
                    }
                }
            }
            None => {
                // First usable fix for a degraded session: anchor it and
                // re-evaluate with real location. Duplicate suppression in
                // the policy keeps this from double-alerting.
                open.anchor = Some(fix);
                let id = open.id.clone();
                let cancel = open.eval_cancel.clone();
                info!("late fix for session {id}; re-evaluating");
                self.spawn_evaluation(id, Some(fix), cancel);
            }
        }
    }
}

fn new_ticker(period: Duration) -> tokio::time::Interval {
    // interval() ticks immediately; the first sample belongs one period out.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
