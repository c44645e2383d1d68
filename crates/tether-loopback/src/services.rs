//! Reference implementations of the capability contracts
//!
//! These back the loopback peer. They are deliberately small — the point
//! of the crate is exercising the connector's lifecycle handling, not the
//! services themselves.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tether_interface::{
    Arithmetic, CallError, ClockSink, Controller, Dictionary, Result, WallClock,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

pub(crate) struct MathService;

#[async_trait]
impl Arithmetic for MathService {
    async fn add(&self, a: u16, b: u16) -> Result<u16> {
        Ok(a.wrapping_add(b))
    }

    async fn sub(&self, a: u16, b: u16) -> Result<u16> {
        Ok(a.wrapping_sub(b))
    }
}

/// Namespaced key/value store, namespace -> key -> value.
#[derive(Default)]
pub(crate) struct DictService {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

#[async_trait]
impl Dictionary for DictService {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(namespace)
            .and_then(|space| space.get(key))
            .cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        entries
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

struct TimerEntry {
    sink: Arc<dyn ClockSink>,
    handle: JoinHandle<()>,
}

struct ClockInner {
    timers: Mutex<Vec<TimerEntry>>,
}

/// Wallclock with real timer-driven callbacks.
///
/// Armed countdowns run on their own tasks and invoke the sink from
/// there, so the callback genuinely races client code the way a
/// remote-originated notification would. Arming a sink that is already
/// armed replaces its timer (peer policy; the client-side registrar
/// rejects before the call gets here).
#[derive(Clone)]
pub(crate) struct WallClockService {
    inner: Arc<ClockInner>,
}

impl WallClockService {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                timers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) async fn armed_count(&self) -> usize {
        self.inner.timers.lock().await.len()
    }
}

async fn run_countdown(inner: Weak<ClockInner>, sink: Arc<dyn ClockSink>, seconds: u16) {
    let mut seconds = seconds;
    loop {
        tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
        let hint = sink.elapsed(seconds).await;
        if hint == 0 {
            break;
        }
        // Nonzero return is a re-arm request for that many seconds.
        seconds = hint;
    }

    // One-shot spent: drop our registration so a later disarm reports
    // "not registered" instead of touching a dead timer.
    if let Some(inner) = inner.upgrade() {
        let mut timers = inner.timers.lock().await;
        timers.retain(|entry| !Arc::ptr_eq(&entry.sink, &sink));
    }
}

#[async_trait]
impl WallClock for WallClockService {
    async fn now(&self) -> Result<u64> {
        Ok(SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0))
    }

    async fn arm(&self, seconds: u16, sink: Arc<dyn ClockSink>) -> Result<()> {
        if seconds == 0 {
            return Err(CallError::Rejected("cannot arm a zero countdown".to_string()));
        }

        let handle = tokio::spawn(run_countdown(
            Arc::downgrade(&self.inner),
            Arc::clone(&sink),
            seconds,
        ));

        let mut timers = self.inner.timers.lock().await;
        if let Some(previous) = timers
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.sink, &sink))
        {
            debug!("re-arming an armed sink; replacing its timer");
            timers.swap_remove(previous).handle.abort();
        }
        timers.push(TimerEntry { sink, handle });
        Ok(())
    }

    async fn disarm(&self, sink: Arc<dyn ClockSink>) -> Result<bool> {
        let mut timers = self.inner.timers.lock().await;
        match timers
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.sink, &sink))
        {
            Some(index) => {
                timers.swap_remove(index).handle.abort();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
struct ControllerState {
    config: String,
    applied: Option<String>,
    reject_substitute: bool,
    fetches: u32,
}

/// Configuration surface with test/demo knobs.
#[derive(Default)]
pub(crate) struct ControllerService {
    state: Mutex<ControllerState>,
}

impl ControllerService {
    pub(crate) async fn set_config_line(&self, config: impl Into<String>) {
        self.state.lock().await.config = config.into();
    }

    pub(crate) async fn applied_config(&self) -> Option<String> {
        self.state.lock().await.applied.clone()
    }

    pub(crate) async fn reject_substitute(&self, reject: bool) {
        self.state.lock().await.reject_substitute = reject;
    }

    pub(crate) async fn fetch_count(&self) -> u32 {
        self.state.lock().await.fetches
    }
}

#[async_trait]
impl Controller for ControllerService {
    async fn config_line(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        state.fetches += 1;
        Ok(state.config.clone())
    }

    async fn substitute(&self, config: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.reject_substitute {
            return Err(CallError::Rejected("substitution disabled".to_string()));
        }
        state.config = config.to_string();
        state.applied = Some(config.to_string());
        Ok(())
    }
}
