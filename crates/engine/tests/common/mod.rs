//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use trade_guard_core::{
    EngineConfig, FeedError, GatewayError, OrderGateway, PositionRef, PositionState, PriceFeed,
    TriggerEvent, TriggerStore,
};
use trade_guard_engine::{TriggerRegistry, WatcherContext};
use trade_guard_paper::PaperVenue;
use trade_guard_store::MemoryStore;

/// Short intervals so real-time tests finish quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 10,
        feed_timeout_ms: 500,
        gateway_timeout_ms: 500,
        max_gateway_retries: 3,
        unavailable_warn_cycles: 3,
        restart_backoff_ms: 20,
        event_buffer: 64,
    }
}

pub struct Rig {
    pub venue: Arc<PaperVenue>,
    pub store: Arc<MemoryStore>,
    pub registry: Arc<TriggerRegistry>,
    pub events: broadcast::Sender<TriggerEvent>,
}

impl Rig {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(TriggerRegistry::new(store.clone()));
        let (events, _) = broadcast::channel(64);
        Self {
            venue: Arc::new(PaperVenue::default()),
            store,
            registry,
            events,
        }
    }

    pub fn context(&self) -> WatcherContext {
        self.context_with(self.venue.clone(), self.venue.clone())
    }

    pub fn context_with(&self, feed: Arc<dyn PriceFeed>, gateway: Arc<dyn OrderGateway>) -> WatcherContext {
        WatcherContext {
            registry: self.registry.clone(),
            feed,
            gateway,
            config: fast_config(),
            events: self.events.clone(),
        }
    }

    pub fn store_dyn(&self) -> Arc<dyn TriggerStore> {
        self.store.clone()
    }
}

/// Drains whatever events are buffered right now.
pub fn drain(rx: &mut broadcast::Receiver<TriggerEvent>) -> Vec<TriggerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Waits for the first event matching `pred`, failing the test after two seconds.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<TriggerEvent>,
    pred: impl Fn(&TriggerEvent) -> bool,
) -> TriggerEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Gateway that parks every order until the test releases it.
pub struct GatedGateway {
    inner: Arc<PaperVenue>,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedGateway {
    pub fn new(inner: Arc<PaperVenue>) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl OrderGateway for GatedGateway {
    async fn set_stop_loss(&self, position: &PositionRef, price: Decimal) -> Result<(), GatewayError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.set_stop_loss(position, price).await
    }

    async fn close_fraction(&self, position: &PositionRef, fraction: Decimal) -> Result<(), GatewayError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.close_fraction(position, fraction).await
    }
}

/// Gateway that never answers in time.
pub struct StalledGateway;

#[async_trait]
impl OrderGateway for StalledGateway {
    async fn set_stop_loss(&self, _position: &PositionRef, _price: Decimal) -> Result<(), GatewayError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn close_fraction(&self, _position: &PositionRef, _fraction: Decimal) -> Result<(), GatewayError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Feed that never answers in time.
pub struct StalledFeed;

#[async_trait]
impl PriceFeed for StalledFeed {
    async fn current_state(&self, _position: &PositionRef) -> Result<PositionState, FeedError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(FeedError::Unavailable("stalled".to_string()))
    }
}

/// Feed that panics on its first `panics` calls, then delegates.
pub struct FlakyFeed {
    inner: Arc<PaperVenue>,
    panics: usize,
    calls: AtomicUsize,
}

impl FlakyFeed {
    pub fn new(inner: Arc<PaperVenue>, panics: usize) -> Self {
        Self {
            inner,
            panics,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PriceFeed for FlakyFeed {
    async fn current_state(&self, position: &PositionRef) -> Result<PositionState, FeedError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(call >= self.panics, "feed connection dropped");
        self.inner.current_state(position).await
    }
}
