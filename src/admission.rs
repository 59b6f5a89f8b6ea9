use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::observability::ADMISSION_IN_FLIGHT;

/// Weighted gate bounding how many load units run at once.
pub struct AdmissionController {
    gate: &'static str,
    capacity: u32,
    semaphore: Arc<Semaphore>,
}

/// Capacity held by one running unit. Dropping it is the release, so a unit
/// that errors or panics still gives its capacity back.
#[derive(Debug)]
#[must_use = "capacity is released as soon as the permit is dropped"]
pub struct AdmissionPermit {
    gate: &'static str,
    units: u32,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    pub fn units(&self) -> u32 {
        self.units
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        metrics::gauge!(ADMISSION_IN_FLIGHT, "gate" => self.gate).decrement(self.units as f64);
    }
}

impl AdmissionController {
    pub fn new(gate: &'static str, capacity: u32) -> Result<Self, CoreError> {
        if capacity == 0 {
            return Err(CoreError::InvalidConfiguration(format!(
                "admission gate {gate}: capacity must be positive"
            )));
        }
        Ok(Self {
            gate,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
        })
    }

    /// Capacity of `2^exponent`, for targets that advertise a load level
    /// rather than a unit count.
    pub fn from_weight_exponent(gate: &'static str, exponent: u32) -> Result<Self, CoreError> {
        let capacity = 1u32.checked_shl(exponent).ok_or_else(|| {
            CoreError::InvalidConfiguration(format!("weight exponent {exponent} too large"))
        })?;
        Self::new(gate, capacity)
    }

    pub fn gate(&self) -> &'static str {
        self.gate
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn available(&self) -> u32 {
        self.semaphore.available_permits() as u32
    }

    pub fn in_flight(&self) -> u32 {
        self.capacity - self.available()
    }

    /// Take `units` if they are free right now.
    pub fn try_acquire(&self, units: u32) -> Option<AdmissionPermit> {
        let permit = self.semaphore.clone().try_acquire_many_owned(units).ok()?;
        Some(self.admit(units, permit))
    }

    /// Wait for `units`, giving up when `ctx` is canceled.
    pub async fn acquire(&self, units: u32, ctx: &CancellationToken) -> Result<AdmissionPermit, CoreError> {
        if units > self.capacity {
            return Err(CoreError::InvariantViolation(format!(
                "admission gate {}: {units} units requested, capacity is {}",
                self.gate, self.capacity
            )));
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(CoreError::Canceled),
            permit = self.semaphore.clone().acquire_many_owned(units) => {
                let permit = permit.map_err(|_| CoreError::Closed)?;
                Ok(self.admit(units, permit))
            }
        }
    }

    /// Run `unit` on its own task if one unit of capacity is free now.
    pub fn try_spawn<F>(&self, unit: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.try_acquire(1)?;
        Some(spawn_holding(permit, unit))
    }

    /// Wait for one unit of capacity, then run `unit` on its own task.
    pub async fn spawn<F>(&self, ctx: &CancellationToken, unit: F) -> Result<JoinHandle<F::Output>, CoreError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.acquire(1, ctx).await?;
        Ok(spawn_holding(permit, unit))
    }

    fn admit(&self, units: u32, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        metrics::gauge!(ADMISSION_IN_FLIGHT, "gate" => self.gate).increment(units as f64);
        AdmissionPermit {
            gate: self.gate,
            units,
            _permit: permit,
        }
    }
}

fn spawn_holding<F>(permit: AdmissionPermit, unit: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(async move {
        let _permit = permit;
        unit.await
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            AdmissionController::new("zero", 0),
            Err(CoreError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn weight_exponent_capacity() {
        assert_eq!(AdmissionController::from_weight_exponent("w", 0).unwrap().capacity(), 1);
        assert_eq!(AdmissionController::from_weight_exponent("w", 3).unwrap().capacity(), 8);
        assert!(AdmissionController::from_weight_exponent("w", 40).is_err());
    }

    #[test]
    fn try_acquire_respects_capacity() {
        let gate = AdmissionController::new("try", 3).unwrap();
        let a = gate.try_acquire(1).unwrap();
        let _b = gate.try_acquire(1).unwrap();
        let _c = gate.try_acquire(1).unwrap();
        assert!(gate.try_acquire(1).is_none());
        assert_eq!(gate.in_flight(), 3);

        a.release();
        assert_eq!(gate.available(), 1);
        assert!(gate.try_acquire(1).is_some());
    }

    #[test]
    fn weighted_acquire() {
        let gate = AdmissionController::new("weighted", 4).unwrap();
        let big = gate.try_acquire(3).unwrap();
        assert_eq!(big.units(), 3);
        assert!(gate.try_acquire(2).is_none());
        assert!(gate.try_acquire(1).is_some());
    }

    #[test]
    fn acquire_waits_for_release() {
        let ctx = CancellationToken::new();
        let gate = AdmissionController::new("wait", 1).unwrap();
        let held = gate.try_acquire(1).unwrap();

        let mut waiting = task::spawn(gate.acquire(1, &ctx));
        assert_pending!(waiting.poll());

        drop(held);
        assert!(waiting.is_woken());
        let permit = assert_ready!(waiting.poll()).unwrap();
        assert_eq!(permit.units(), 1);
    }

    #[test]
    fn acquire_canceled_while_waiting() {
        let ctx = CancellationToken::new();
        let gate = AdmissionController::new("cancel", 1).unwrap();
        let _held = gate.try_acquire(1).unwrap();

        let mut waiting = task::spawn(gate.acquire(1, &ctx));
        assert_pending!(waiting.poll());

        ctx.cancel();
        assert!(waiting.is_woken());
        assert!(matches!(assert_ready!(waiting.poll()), Err(CoreError::Canceled)));
    }

    #[tokio::test]
    async fn acquire_more_than_capacity_is_rejected() {
        let gate = AdmissionController::new("over", 2).unwrap();
        let ctx = CancellationToken::new();
        assert!(matches!(
            gate.acquire(3, &ctx).await,
            Err(CoreError::InvariantViolation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrency_never_exceeds_capacity() {
        let gate = AdmissionController::new("bound", 4).unwrap();
        let ctx = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let running = running.clone();
            let peak = peak.clone();
            let handle = gate
                .spawn(&ctx, async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            handles.push(handle);
        }
        for h in handles {
            h.await.unwrap();
        }

        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=4).contains(&peak), "peak concurrency {peak}");
        assert_eq!(gate.available(), 4);
    }

    #[tokio::test]
    async fn capacity_released_after_panic() {
        let gate = AdmissionController::new("panic", 1).unwrap();
        let handle = gate.try_spawn(async { None::<u32>.expect("unit failed") }).unwrap();
        assert!(handle.await.is_err());
        assert_eq!(gate.available(), 1);
        assert!(gate.try_acquire(1).is_some());
    }

    #[tokio::test]
    async fn try_spawn_refuses_when_full() {
        let gate = AdmissionController::new("full", 1).unwrap();
        let _held = gate.try_acquire(1).unwrap();
        assert!(gate.try_spawn(async {}).is_none());
    }
}
