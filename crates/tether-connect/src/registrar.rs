//! One-shot callback registration bookkeeping.
//!
//! The registrar tracks at most one armed sink and enforces the lock
//! discipline the notifier path depends on: the slot lock is only ever held
//! to read or swap the slot, never across a remote call. The peer may invoke
//! the sink (and the sink may call back into this registrar) while an arm or
//! disarm request is still in flight.

use std::sync::Arc;

use tokio::sync::Mutex;

use tether_interface::{CallError, ClockSink, WallClock};

use crate::error::{ArmError, DisarmError};

/// Tracks the single armed callback for one wallclock link.
#[derive(Default)]
pub struct CallbackRegistrar {
    armed: Mutex<Option<Arc<dyn ClockSink>>>,
}

impl CallbackRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_armed(&self) -> bool {
        self.armed.lock().await.is_some()
    }

    /// Arm a one-shot callback. The slot is reserved before the remote call
    /// starts, so a concurrent second arm fails fast with `AlreadyArmed`
    /// instead of racing the peer.
    pub async fn arm(
        &self,
        clock: &Arc<dyn WallClock>,
        seconds: u16,
        sink: Arc<dyn ClockSink>,
    ) -> Result<(), ArmError> {
        {
            let mut armed = self.armed.lock().await;
            if armed.is_some() {
                return Err(ArmError::AlreadyArmed);
            }
            *armed = Some(Arc::clone(&sink));
        }

        match clock.arm(seconds, sink).await {
            Ok(()) => Ok(()),
            Err(error) => {
                // Roll back the reservation; the peer holds nothing.
                self.armed.lock().await.take();
                Err(match error {
                    CallError::Unavailable => ArmError::Unavailable,
                    CallError::Rejected(reason) => ArmError::Rejected(reason),
                })
            }
        }
    }

    /// Disarm the registered callback. `NotRegistered` covers every benign
    /// case: never armed, already fired, or the peer no longer knows the
    /// sink.
    pub async fn disarm(&self, clock: &Arc<dyn WallClock>) -> Result<(), DisarmError> {
        let sink = self.armed.lock().await.take();
        let Some(sink) = sink else {
            return Err(DisarmError::NotRegistered);
        };

        match clock.disarm(sink).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DisarmError::NotRegistered),
            Err(CallError::Unavailable) => {
                Err(DisarmError::Rejected("remote interface unavailable".into()))
            }
            Err(CallError::Rejected(reason)) => Err(DisarmError::Rejected(reason)),
        }
    }

    /// Forget the registration without a remote call: the one-shot has fired
    /// on the peer side, so there is nothing left to disarm.
    pub async fn mark_fired(&self) {
        self.armed.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    struct SilentSink;

    #[async_trait]
    impl ClockSink for SilentSink {
        async fn elapsed(&self, _seconds: u16) -> u16 {
            0
        }
    }

    /// Accepts or rejects arm requests on a switch; counts calls.
    #[derive(Default)]
    struct ScriptedClock {
        reject: AtomicBool,
        arms: AtomicU32,
        disarms: AtomicU32,
    }

    #[async_trait]
    impl WallClock for ScriptedClock {
        async fn now(&self) -> Result<u64, CallError> {
            Ok(1_700_000_000)
        }

        async fn arm(&self, _seconds: u16, _sink: Arc<dyn ClockSink>) -> Result<(), CallError> {
            self.arms.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                Err(CallError::Rejected("scripted rejection".into()))
            } else {
                Ok(())
            }
        }

        async fn disarm(&self, _sink: Arc<dyn ClockSink>) -> Result<bool, CallError> {
            Ok(self.disarms.fetch_add(1, Ordering::SeqCst) == 0)
        }
    }

    fn clock() -> (Arc<ScriptedClock>, Arc<dyn WallClock>) {
        let scripted = Arc::new(ScriptedClock::default());
        let erased: Arc<dyn WallClock> = scripted.clone();
        (scripted, erased)
    }

    #[tokio::test]
    async fn second_arm_is_refused_without_touching_the_peer() {
        let (scripted, clock) = clock();
        let registrar = CallbackRegistrar::new();

        registrar.arm(&clock, 5, Arc::new(SilentSink)).await.unwrap();
        let second = registrar.arm(&clock, 5, Arc::new(SilentSink)).await;
        assert!(matches!(second, Err(ArmError::AlreadyArmed)));
        assert_eq!(scripted.arms.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_arm_rolls_back_the_reservation() {
        let (scripted, clock) = clock();
        scripted.reject.store(true, Ordering::SeqCst);
        let registrar = CallbackRegistrar::new();

        let outcome = registrar.arm(&clock, 5, Arc::new(SilentSink)).await;
        assert!(matches!(outcome, Err(ArmError::Rejected(_))));
        assert!(!registrar.is_armed().await);

        // The slot is free again after the rollback.
        scripted.reject.store(false, Ordering::SeqCst);
        registrar.arm(&clock, 5, Arc::new(SilentSink)).await.unwrap();
        assert!(registrar.is_armed().await);
    }

    #[tokio::test]
    async fn disarm_without_registration_is_not_registered() {
        let (scripted, clock) = clock();
        let registrar = CallbackRegistrar::new();

        let outcome = registrar.disarm(&clock).await;
        assert!(matches!(outcome, Err(DisarmError::NotRegistered)));
        assert_eq!(scripted.disarms.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disarm_after_fire_reports_not_registered() {
        let (_, clock) = clock();
        let registrar = CallbackRegistrar::new();

        registrar.arm(&clock, 5, Arc::new(SilentSink)).await.unwrap();
        registrar.mark_fired().await;

        let outcome = registrar.disarm(&clock).await;
        assert!(matches!(outcome, Err(DisarmError::NotRegistered)));
    }

    #[tokio::test]
    async fn arm_disarm_cycle_round_trips() {
        let (scripted, clock) = clock();
        let registrar = CallbackRegistrar::new();

        registrar.arm(&clock, 5, Arc::new(SilentSink)).await.unwrap();
        registrar.disarm(&clock).await.unwrap();
        assert!(!registrar.is_armed().await);
        assert_eq!(scripted.arms.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.disarms.load(Ordering::SeqCst), 1);
    }
}
