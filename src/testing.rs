//! Scripted collaborators shared by the unit tests.

use crate::engine::{
    AudioEngine, EngineError, EngineEvent, EngineEvents, EngineFactory, VisualizationHost,
    WaveformOptions,
};
use crate::remote::{RemoteCartStore, StoreError};
use crate::types::{CartItem, LicenseType};
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub(crate) fn item(beat_id: &str, license_type: LicenseType, price: f64) -> CartItem {
    CartItem {
        beat_id: beat_id.to_string(),
        beat_name: format!("Beat {}", beat_id),
        cover_image: format!("https://cdn.test/{}.png", beat_id),
        license_type,
        price,
    }
}

/// Polls `check` until it holds, yielding to spawned tasks in between.
pub(crate) async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    carts: Mutex<HashMap<String, Vec<CartItem>>>,
    calls: Mutex<Vec<String>>,
    pub fail_fetch: AtomicBool,
    pub fail_writes: AtomicBool,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeRemote {
    pub fn with_cart(email: &str, items: Vec<CartItem>) -> Self {
        let remote = FakeRemote::default();
        remote.carts.lock().unwrap().insert(email.to_string(), items);
        remote
    }

    pub fn cart(&self, email: &str) -> Option<Vec<CartItem>> {
        self.carts.lock().unwrap().get(email).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Makes every fetch wait until the returned notify is signalled.
    pub fn gate_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn write_result(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("scripted write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl RemoteCartStore for FakeRemote {
    fn fetch<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Vec<CartItem>, StoreError>> {
        async move {
            self.record(format!("fetch:{}", email));
            let gate = self.fetch_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("scripted fetch failure".to_string()));
            }
            Ok(self.cart(email).unwrap_or_default())
        }
        .boxed()
    }

    fn save<'a>(
        &'a self,
        email: &'a str,
        items: &'a [CartItem],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.record(format!("save:{}:{}", email, items.len()));
            self.write_result()?;
            self.carts
                .lock()
                .unwrap()
                .insert(email.to_string(), items.to_vec());
            Ok(())
        }
        .boxed()
    }

    fn delete_item<'a>(
        &'a self,
        email: &'a str,
        beat_id: &'a str,
        license_type: LicenseType,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.record(format!("delete:{}:{}:{}", email, beat_id, license_type));
            self.write_result()?;
            if let Some(items) = self.carts.lock().unwrap().get_mut(email) {
                items.retain(|i| !i.matches(beat_id, license_type));
            }
            Ok(())
        }
        .boxed()
    }

    fn clear<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.record(format!("clear:{}", email));
            self.write_result()?;
            self.carts.lock().unwrap().remove(email);
            Ok(())
        }
        .boxed()
    }
}

pub(crate) struct EngineRecord {
    pub id: Uuid,
    pub host: VisualizationHost,
    pub alive: bool,
    pub calls: Vec<String>,
    pub events: EngineEvents,
}

/// Shared view over every engine the fake factory created.
#[derive(Default)]
pub(crate) struct EngineWorld {
    pub engines: Vec<EngineRecord>,
    pub failing_urls: HashSet<String>,
    pub fail_create: bool,
    /// When true, loads resolve without emitting `Ready`.
    pub manual_ready: bool,
    /// When set, loads stay pending until the notify is signalled.
    pub load_gate: Option<Arc<Notify>>,
    pub duration: f64,
}

#[derive(Clone, Default)]
pub(crate) struct FakeEngineFactory {
    pub world: Arc<Mutex<EngineWorld>>,
}

impl FakeEngineFactory {
    pub fn new(duration: f64) -> Self {
        let factory = FakeEngineFactory::default();
        factory.world.lock().unwrap().duration = duration;
        factory
    }

    pub fn alive_count(&self) -> usize {
        self.world
            .lock()
            .unwrap()
            .engines
            .iter()
            .filter(|e| e.alive)
            .count()
    }

    pub fn created_count(&self) -> usize {
        self.world.lock().unwrap().engines.len()
    }

    pub fn calls(&self, index: usize) -> Vec<String> {
        self.world.lock().unwrap().engines[index].calls.clone()
    }

    pub fn events(&self, index: usize) -> EngineEvents {
        self.world.lock().unwrap().engines[index].events.clone()
    }

    pub fn fail_url(&self, url: &str) {
        self.world
            .lock()
            .unwrap()
            .failing_urls
            .insert(url.to_string());
    }
}

struct FakeEngine {
    index: usize,
    world: Arc<Mutex<EngineWorld>>,
    events: EngineEvents,
    position: f64,
    loaded: bool,
}

impl FakeEngine {
    fn record(&self, call: impl Into<String>) {
        self.world.lock().unwrap().engines[self.index]
            .calls
            .push(call.into());
    }
}

impl AudioEngine for FakeEngine {
    fn load(&mut self, url: &str) -> BoxFuture<'static, Result<(), EngineError>> {
        self.record(format!("load:{}", url));
        self.position = 0.0;
        let (fails, manual_ready, gate) = {
            let world = self.world.lock().unwrap();
            (
                world.failing_urls.contains(url),
                world.manual_ready,
                world.load_gate.clone(),
            )
        };
        if fails {
            self.loaded = false;
            self.events.emit(EngineEvent::Error("decode failed".to_string()));
            return future::ready(Err(EngineError::Load {
                url: url.to_string(),
                reason: "decode failed".to_string(),
            }))
            .boxed();
        }
        self.loaded = true;
        if !manual_ready {
            self.events.emit(EngineEvent::Ready);
        }
        match gate {
            Some(gate) => async move {
                gate.notified().await;
                Ok(())
            }
            .boxed(),
            None => future::ready(Ok(())).boxed(),
        }
    }

    fn play(&mut self) {
        self.record("play");
        self.events.emit(EngineEvent::Play);
    }

    fn pause(&mut self) {
        self.record("pause");
        self.events.emit(EngineEvent::Pause);
    }

    fn stop(&mut self) {
        self.record("stop");
        self.position = 0.0;
    }

    fn empty(&mut self) {
        self.record("empty");
        self.loaded = false;
    }

    fn seek_to(&mut self, seconds: f64) {
        self.record(format!("seek:{}", seconds));
        self.position = seconds;
        self.events.emit(EngineEvent::Position(seconds));
    }

    fn set_volume(&mut self, volume: f64) {
        self.record(format!("volume:{}", volume));
    }

    fn duration(&self) -> f64 {
        if self.loaded {
            self.world.lock().unwrap().duration
        } else {
            0.0
        }
    }

    fn current_time(&self) -> f64 {
        self.position
    }

    fn destroy(&mut self) {
        self.record("destroy");
        self.world.lock().unwrap().engines[self.index].alive = false;
    }
}

impl EngineFactory for FakeEngineFactory {
    fn create(
        &self,
        host: &VisualizationHost,
        _options: &WaveformOptions,
        events: EngineEvents,
    ) -> Result<Box<dyn AudioEngine>, EngineError> {
        let mut world = self.world.lock().unwrap();
        if world.fail_create {
            return Err(EngineError::Create("no audio device".to_string()));
        }
        let index = world.engines.len();
        world.engines.push(EngineRecord {
            id: events.engine_id(),
            host: host.clone(),
            alive: true,
            calls: Vec::new(),
            events: events.clone(),
        });
        Ok(Box::new(FakeEngine {
            index,
            world: self.world.clone(),
            events,
            position: 0.0,
            loaded: false,
        }))
    }
}
