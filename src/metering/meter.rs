//! Background task that accrues simulated usage for every active session.
//!
//! Each cycle snapshots the session registry, draws a random amount per
//! identity that still has quota left, and appends all draws in one ledger
//! batch. Identities without a plan or with an exhausted plan leave the
//! registry. A failed cycle commits nothing and the next one starts fresh.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{
    quota::{decide, load_window, QuotaDecision},
    ActiveSessions,
};
use crate::{
    clock::Clock,
    ledger::{Ledger, LedgerError, NewUsageRecord},
};

const DEFAULT_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_STEP_MAX: f64 = 100.0;
const DEFAULT_MIN_STEP: f64 = 1.0;

#[derive(Clone, Copy, Debug)]
pub struct MeterConfig {
    interval: Duration,
    step_max: f64,
    min_step: f64,
}

impl MeterConfig {
    /// Default: one cycle every 30s, at most 100 units per identity per cycle,
    /// and a remaining quota under 1 unit is drawn whole.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECONDS),
            step_max: DEFAULT_STEP_MAX,
            min_step: DEFAULT_MIN_STEP,
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_step_max(mut self, step_max: f64) -> Self {
        self.step_max = step_max;
        self
    }

    /// A draw that would leave less than `min_step` of a window takes the
    /// whole remainder instead.
    #[must_use]
    pub fn with_min_step(mut self, min_step: f64) -> Self {
        self.min_step = min_step;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let interval = if self.interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.interval
        };
        let step_max = if self.step_max.is_finite() && self.step_max > 0.0 {
            self.step_max
        } else {
            DEFAULT_STEP_MAX
        };
        let min_step = if self.min_step.is_finite() && self.min_step >= 0.0 {
            self.min_step.min(step_max)
        } else {
            DEFAULT_MIN_STEP.min(step_max)
        };
        Self {
            interval,
            step_max,
            min_step,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn step_max(&self) -> f64 {
        self.step_max
    }

    #[must_use]
    pub fn min_step(&self) -> f64 {
        self.min_step
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub considered: usize,
    pub accrued: usize,
    pub exhausted: usize,
    pub without_plan: usize,
}

pub struct QuotaMeter {
    ledger: Arc<dyn Ledger>,
    sessions: Arc<ActiveSessions>,
    clock: Arc<dyn Clock>,
    config: MeterConfig,
    rng: Mutex<StdRng>,
}

impl QuotaMeter {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        sessions: Arc<ActiveSessions>,
        clock: Arc<dyn Clock>,
        config: MeterConfig,
    ) -> Self {
        Self {
            ledger,
            sessions,
            clock,
            config: config.normalize(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic draws.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    #[must_use]
    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    /// Uniform draw from `(0, min(step_max, remaining)]`. Once the rest of
    /// the window fits in one step, a draw leaving less than `min_step`
    /// becomes the whole remainder.
    fn draw(&self, remaining: f64) -> f64 {
        if remaining <= self.config.min_step {
            return remaining;
        }
        let bound = self.config.step_max.min(remaining);
        let unit: f64 = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen();
        let amount = bound * (1.0 - unit);
        if remaining <= self.config.step_max && remaining - amount < self.config.min_step {
            remaining
        } else {
            amount
        }
    }

    /// Run one metering pass.
    ///
    /// # Errors
    /// Any ledger failure aborts the pass; no usage is recorded and no
    /// session is dropped.
    pub async fn run_cycle(&self) -> Result<CycleReport, LedgerError> {
        let members = self.sessions.snapshot().await;
        let now = self.clock.now();
        let mut report = CycleReport {
            considered: members.len(),
            ..CycleReport::default()
        };
        let mut batch = Vec::with_capacity(members.len());
        let mut departing = Vec::new();

        for identity in members {
            let Some(window) = load_window(self.ledger.as_ref(), identity).await? else {
                report.without_plan += 1;
                departing.push(identity);
                continue;
            };
            if window.is_exhausted() {
                report.exhausted += 1;
                departing.push(identity);
                continue;
            }

            let amount = self.draw(window.remaining());
            if amount <= 0.0 {
                continue;
            }
            if let QuotaDecision::Exceeded { .. } = decide(&window, amount) {
                // only a final top-up can trip on rounding; the window is spent
                report.exhausted += 1;
                departing.push(identity);
                continue;
            }
            batch.push(NewUsageRecord {
                identity_id: identity,
                amount,
                recorded_at: now,
            });
        }

        if !batch.is_empty() {
            self.ledger.append_usage_batch(&batch).await?;
        }
        report.accrued = batch.len();

        for identity in departing {
            self.sessions.remove(identity).await;
        }

        Ok(report)
    }

    /// Start the recurring task. The first cycle runs one interval after start.
    /// A shutdown signal interrupts a cycle in flight.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_seconds = period.as_secs(), "quota meter started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        warn!("quota meter stopped during a cycle");
                        break;
                    }
                    result = self.run_cycle() => match result {
                        Ok(report) => debug!(
                            considered = report.considered,
                            accrued = report.accrued,
                            exhausted = report.exhausted,
                            without_plan = report.without_plan,
                            "meter cycle finished"
                        ),
                        Err(err) => error!("meter cycle failed: {err}"),
                    }
                }
            }

            info!("quota meter stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        ledger::{MemoryLedger, MockLedger, NewPurchase, PlanPurchase},
        metering::quota::load_window,
    };
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
    }

    async fn purchase(ledger: &MemoryLedger, identity: Uuid, capacity: f64, at: DateTime<Utc>) {
        ledger
            .create_purchase(NewPurchase {
                identity_id: identity,
                plan_id: Uuid::new_v4(),
                capacity,
                price: 1.0,
                purchased_at: at,
            })
            .await
            .unwrap();
    }

    #[test]
    fn config_defaults_and_normalize() {
        let config = MeterConfig::new();
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert!((config.step_max() - 100.0).abs() < f64::EPSILON);

        let config = MeterConfig::new()
            .with_interval_seconds(0)
            .with_step_max(-3.0)
            .normalize();
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert!((config.step_max() - 100.0).abs() < f64::EPSILON);

        let config = MeterConfig::new().with_step_max(25.0).normalize();
        assert!((config.step_max() - 25.0).abs() < f64::EPSILON);
        assert!((config.min_step() - 1.0).abs() < f64::EPSILON);

        let config = MeterConfig::new()
            .with_step_max(0.5)
            .with_min_step(f64::NAN)
            .normalize();
        assert!((config.min_step() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn never_exceeds_capacity_and_drops_exhausted() {
        let ledger = Arc::new(MemoryLedger::new());
        let sessions = Arc::new(ActiveSessions::new());
        let clock = Arc::new(ManualClock::new(start()));
        let identity = Uuid::new_v4();
        purchase(&ledger, identity, 250.0, start()).await;
        sessions.insert(identity).await;

        let meter = QuotaMeter::new(
            ledger.clone(),
            sessions.clone(),
            clock.clone(),
            MeterConfig::new().with_step_max(100.0),
        )
        .with_seed(7);

        for _ in 0..200 {
            if !sessions.contains(identity).await {
                break;
            }
            clock.advance(TimeDelta::seconds(30));
            meter.run_cycle().await.unwrap();
            let used = load_window(ledger.as_ref(), identity)
                .await
                .unwrap()
                .unwrap()
                .used;
            assert!(used <= 250.0, "used {used} past capacity");
        }
        assert!(!sessions.contains(identity).await);

        let history = ledger.usage_history(identity).await.unwrap();
        assert!(!history.is_empty());
        assert!(history.len() < 50, "{} records", history.len());
        assert!(history.iter().all(|r| r.amount > 1e-6 && r.amount <= 100.0));
        let used: f64 = history.iter().map(|r| r.amount).sum();
        assert!((used - 250.0).abs() < 1e-6, "used {used}");
    }

    #[tokio::test]
    async fn small_remainder_is_drawn_whole() {
        let ledger = Arc::new(MemoryLedger::new());
        let sessions = Arc::new(ActiveSessions::new());
        let clock = Arc::new(ManualClock::new(start()));
        let identity = Uuid::new_v4();
        purchase(&ledger, identity, 100.5, start()).await;
        ledger
            .append_usage(NewUsageRecord {
                identity_id: identity,
                amount: 100.0,
                recorded_at: start(),
            })
            .await
            .unwrap();
        sessions.insert(identity).await;

        let meter = QuotaMeter::new(
            ledger.clone(),
            sessions.clone(),
            clock.clone(),
            MeterConfig::new(),
        )
        .with_seed(3);

        clock.advance(TimeDelta::seconds(30));
        let report = meter.run_cycle().await.unwrap();
        assert_eq!(report.accrued, 1);
        let history = ledger.usage_history(identity).await.unwrap();
        assert!((history[1].amount - 0.5).abs() < f64::EPSILON);

        let report = meter.run_cycle().await.unwrap();
        assert_eq!(report.accrued, 0);
        assert_eq!(report.exhausted, 1);
        assert!(!sessions.contains(identity).await);
        assert_eq!(ledger.usage_history(identity).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn identities_without_plan_leave_registry() {
        let ledger = Arc::new(MemoryLedger::new());
        let sessions = Arc::new(ActiveSessions::new());
        let clock = Arc::new(ManualClock::new(start()));
        let planless = Uuid::new_v4();
        let exhausted = Uuid::new_v4();
        let active = Uuid::new_v4();
        purchase(&ledger, exhausted, 10.0, start()).await;
        ledger
            .append_usage(NewUsageRecord {
                identity_id: exhausted,
                amount: 10.0,
                recorded_at: start(),
            })
            .await
            .unwrap();
        purchase(&ledger, active, 1000.0, start()).await;
        for id in [planless, exhausted, active] {
            sessions.insert(id).await;
        }

        let meter = QuotaMeter::new(ledger.clone(), sessions.clone(), clock, MeterConfig::new())
            .with_seed(1);
        let report = meter.run_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport {
                considered: 3,
                accrued: 1,
                exhausted: 1,
                without_plan: 1,
            }
        );
        assert_eq!(sessions.snapshot().await, vec![active]);
        assert_eq!(ledger.usage_history(active).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ledger_failure_aborts_cycle_without_side_effects() {
        let identity = Uuid::new_v4();
        let mut ledger = MockLedger::new();
        ledger.expect_latest_purchase().returning(move |_| {
            Ok(Some(PlanPurchase {
                id: Uuid::new_v4(),
                identity_id: identity,
                plan_id: Uuid::new_v4(),
                capacity: 1000.0,
                price: 1.0,
                purchased_at: start(),
            }))
        });
        ledger.expect_sum_usage_since().returning(|_, _| Ok(0.0));
        ledger
            .expect_append_usage_batch()
            .times(1)
            .returning(|_| Err(LedgerError::Unavailable("connection reset".to_string())));

        let sessions = Arc::new(ActiveSessions::new());
        sessions.insert(identity).await;
        let meter = QuotaMeter::new(
            Arc::new(ledger),
            sessions.clone(),
            Arc::new(ManualClock::new(start())),
            MeterConfig::new(),
        );

        let err = meter.run_cycle().await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
        assert!(sessions.contains(identity).await);
    }

    #[tokio::test]
    async fn lookup_failure_keeps_planless_identity() {
        let planless = Uuid::new_v4();
        let failing = Uuid::new_v4();
        let mut ledger = MockLedger::new();
        ledger.expect_latest_purchase().returning(move |id| {
            if id == failing {
                Err(LedgerError::Unavailable("timeout".to_string()))
            } else {
                Ok(None)
            }
        });
        ledger.expect_append_usage_batch().never();

        let sessions = Arc::new(ActiveSessions::new());
        sessions.insert(planless).await;
        sessions.insert(failing).await;
        let meter = QuotaMeter::new(
            Arc::new(ledger),
            sessions.clone(),
            Arc::new(ManualClock::new(start())),
            MeterConfig::new(),
        );

        assert!(meter.run_cycle().await.is_err());
        assert_eq!(sessions.len().await, 2);
    }

    #[tokio::test]
    async fn spawned_meter_stops_on_shutdown() {
        let meter = Arc::new(QuotaMeter::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(ActiveSessions::new()),
            Arc::new(ManualClock::new(start())),
            MeterConfig::new().with_interval_seconds(3600),
        ));
        let (tx, rx) = broadcast::channel(1);
        let handle = meter.spawn(rx);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
