use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::admission::AdmissionController;
use crate::config::DriverConfig;
use crate::error::CoreError;
use crate::model::{DurationClass, Heat, Reservation};
use crate::pool::ResourcePool;
use crate::scheduler::ReservationScheduler;
use crate::signal::{ScenarioCounter, ScoreTag};

pub const TAG_LOGIN: ScoreTag = "login";
pub const TAG_LOGIN_FAIL: ScoreTag = "login-fail";
pub const TAG_RESERVE: ScoreTag = "reserve";
pub const TAG_RESERVE_FAIL: ScoreTag = "reserve-fail";
pub const TAG_EXHAUSTED: ScoreTag = "reserve-exhausted";
pub const TAG_VIEW: ScoreTag = "view";
pub const TAG_VIEW_FAIL: ScoreTag = "view-fail";

/// Pause before a streamer retries after every heat and class came up empty.
const IDLE_BACKOFF: Duration = Duration::from_millis(20);

/// A logged-in user of the service under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Ulid,
    pub user_id: u64,
}

/// The service under test refused or failed a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingError(pub String);

impl fmt::Display for BookingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "booking failed: {}", self.0)
    }
}

impl std::error::Error for BookingError {}

/// Requests a load unit makes against the service under test.
#[async_trait]
pub trait SlotBooker: Send + Sync + 'static {
    async fn login(&self) -> Result<Session, BookingError>;
    async fn reserve(&self, session: &Session, slot: &Reservation) -> Result<(), BookingError>;
    async fn view(&self, session: &Session, slot: &Reservation) -> Result<(), BookingError>;
}

/// In-process booker: accepts everything except every `fail_every`th
/// reservation, optionally sleeping `latency` per request.
pub struct SimulatedBooker {
    fail_every: u64,
    latency: Duration,
    reserves: AtomicU64,
    next_user: AtomicU64,
}

impl SimulatedBooker {
    pub fn new(fail_every: u64, latency: Duration) -> Self {
        Self {
            fail_every,
            latency,
            reserves: AtomicU64::new(0),
            next_user: AtomicU64::new(1),
        }
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl SlotBooker for SimulatedBooker {
    async fn login(&self) -> Result<Session, BookingError> {
        self.pause().await;
        Ok(Session {
            id: Ulid::new(),
            user_id: self.next_user.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn reserve(&self, _session: &Session, slot: &Reservation) -> Result<(), BookingError> {
        self.pause().await;
        let n = self.reserves.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(BookingError(format!("slot {} rejected", slot.id)));
        }
        Ok(())
    }

    async fn view(&self, _session: &Session, _slot: &Reservation) -> Result<(), BookingError> {
        self.pause().await;
        Ok(())
    }
}

struct Shared<B> {
    booker: B,
    scheduler: Arc<ReservationScheduler>,
    sessions: ResourcePool<Session>,
    slots: ResourcePool<Arc<Reservation>>,
    counter: ScenarioCounter,
    turn: AtomicU64,
    /// First error that means the calendar can no longer be trusted.
    fatal: Mutex<Option<CoreError>>,
}

impl<B> Shared<B> {
    /// Record `err` as the run's outcome (first one wins) and stop the run.
    async fn fail(&self, err: CoreError, run: &CancellationToken) {
        error!("driver stopping: {err}");
        let mut fatal = self.fatal.lock().await;
        if fatal.is_none() {
            *fatal = Some(err);
        }
        run.cancel();
    }
}

/// Runs streamer and viewer units against a `SlotBooker` until canceled.
pub struct Driver<B> {
    shared: Arc<Shared<B>>,
    streamers: AdmissionController,
    viewers: AdmissionController,
    session_target: usize,
}

impl<B: SlotBooker> Driver<B> {
    /// Build the pools and role gates. Pool dispatchers stop with `ctx`.
    pub fn new(
        booker: B,
        scheduler: Arc<ReservationScheduler>,
        cfg: &DriverConfig,
        ctx: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let (streamers, viewers) = match cfg.weight_exponent {
            Some(exponent) => (
                AdmissionController::from_weight_exponent("streamer", exponent)?,
                AdmissionController::from_weight_exponent("viewer", exponent)?,
            ),
            None => (
                AdmissionController::new("streamer", cfg.parallelism)?,
                AdmissionController::new("viewer", cfg.parallelism)?,
            ),
        };
        let sessions = ResourcePool::start("sessions", cfg.session_pool_capacity, ctx.clone())?;
        let slots = ResourcePool::start("slots", cfg.slot_pool_capacity, ctx.clone())?;
        // One session per unit across both gates, never more than the pool holds.
        let session_target = (streamers.capacity() as usize * 2).min(cfg.session_pool_capacity);
        Ok(Self {
            shared: Arc::new(Shared {
                booker,
                scheduler,
                sessions,
                slots,
                counter: ScenarioCounter::new(),
                turn: AtomicU64::new(0),
                fatal: Mutex::new(None),
            }),
            streamers,
            viewers,
            session_target,
        })
    }

    /// Units each role gate admits at once.
    pub fn parallelism(&self) -> u32 {
        self.streamers.capacity()
    }

    pub fn counter(&self) -> &ScenarioCounter {
        &self.shared.counter
    }

    pub fn scheduler(&self) -> &Arc<ReservationScheduler> {
        &self.shared.scheduler
    }

    /// Log sessions in, then keep both gates full until `ctx` is canceled.
    /// Returns once every spawned unit has finished. A commit or abort that
    /// fails stops the run early and is returned as the error.
    pub async fn run(&self, ctx: CancellationToken) -> Result<(), CoreError> {
        self.open_sessions(&ctx).await?;
        info!(
            sessions = self.session_target,
            parallelism = self.streamers.capacity(),
            "driver running"
        );

        let run = ctx.child_token();
        let (streamers, viewers) = tokio::join!(
            self.role_loop(&self.streamers, &run, |shared, ctx| {
                streamer_unit(shared, ctx).boxed()
            }),
            self.role_loop(&self.viewers, &run, |shared, ctx| {
                viewer_unit(shared, ctx).boxed()
            }),
        );
        streamers.and(viewers)?;

        // Holding the whole capacity means every unit has returned its permit.
        let drain = CancellationToken::new();
        let _streamers = self.streamers.acquire(self.streamers.capacity(), &drain).await?;
        let _viewers = self.viewers.acquire(self.viewers.capacity(), &drain).await?;
        debug!("driver drained");
        match self.shared.fatal.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn open_sessions(&self, ctx: &CancellationToken) -> Result<(), CoreError> {
        let mut opened = 0;
        for _ in 0..self.session_target {
            let session = self.shared.counter.record(
                TAG_LOGIN,
                TAG_LOGIN_FAIL,
                self.shared.booker.login().await,
            );
            if let Ok(session) = session {
                self.shared.sessions.publish(ctx, session).await?;
                opened += 1;
            }
        }
        if opened == 0 {
            return Err(CoreError::InvalidConfiguration(
                "no session could be opened".into(),
            ));
        }
        Ok(())
    }

    async fn role_loop(
        &self,
        gate: &AdmissionController,
        ctx: &CancellationToken,
        unit: impl Fn(Arc<Shared<B>>, CancellationToken) -> BoxFuture<'static, ()>,
    ) -> Result<(), CoreError> {
        loop {
            match gate.spawn(ctx, unit(self.shared.clone(), ctx.clone())).await {
                Ok(_detached) => {}
                Err(CoreError::Canceled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reserve one slot: cold first, alternating short and long, hot as fallback.
async fn streamer_unit<B: SlotBooker>(shared: Arc<Shared<B>>, ctx: CancellationToken) {
    let Ok(session) = shared.sessions.subscribe(&ctx).await else {
        return;
    };

    let first = if shared.turn.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
        DurationClass::Short
    } else {
        DurationClass::Long
    };
    let second = match first {
        DurationClass::Short => DurationClass::Long,
        DurationClass::Long => DurationClass::Short,
    };

    let mut claimed = None;
    for (heat, class) in [
        (Heat::Cold, first),
        (Heat::Cold, second),
        (Heat::Hot, first),
        (Heat::Hot, second),
    ] {
        if let Ok(slot) = shared.scheduler.claim(heat, class).await {
            claimed = Some(slot);
            break;
        }
    }

    match claimed {
        Some(slot) => {
            let reserved = shared.counter.record(
                TAG_RESERVE,
                TAG_RESERVE_FAIL,
                shared.booker.reserve(&session, &slot).await,
            );
            let settled = match reserved {
                Ok(()) => shared.scheduler.commit_reservation(&slot).await,
                Err(_) => shared.scheduler.abort_reservation(&slot).await,
            };
            if let Err(e) = settled {
                shared.fail(e, &ctx).await;
            } else if reserved.is_ok() {
                // Canceled here only means the run is over.
                let _ = shared.slots.publish(&ctx, slot).await;
            }
        }
        None => {
            shared.counter.add(TAG_EXHAUSTED);
            tokio::select! {
                _ = ctx.cancelled() => {}
                _ = tokio::time::sleep(IDLE_BACKOFF) => {}
            }
        }
    }

    let _ = shared.sessions.publish(&ctx, session).await;
}

/// View one committed slot, then hand the slot and session back.
async fn viewer_unit<B: SlotBooker>(shared: Arc<Shared<B>>, ctx: CancellationToken) {
    let Ok(slot) = shared.slots.subscribe(&ctx).await else {
        return;
    };
    let Ok(session) = shared.sessions.subscribe(&ctx).await else {
        let _ = shared.slots.try_publish(slot);
        return;
    };

    let _ = shared.counter.record(
        TAG_VIEW,
        TAG_VIEW_FAIL,
        shared.booker.view(&session, &slot).await,
    );

    // A full slot pool already has plenty for other viewers.
    let _ = shared.slots.try_publish(slot);
    let _ = shared.sessions.publish(&ctx, session).await;
}
