//! Single audio-preview session shared by every UI surface.
//!
//! One engine at most is alive. Binding a new visualization host destroys the
//! old engine before creating the next one, and requesting a different beat
//! discards whatever the engine had loaded. Load and engine failures are
//! logged and leave the session idle; nothing is retried.

use crate::engine::{
    AudioEngine, EngineError, EngineEvent, EngineEvents, EngineFactory, EngineSignal,
    VisualizationHost, WaveformOptions,
};
use crate::types::{PlaybackBeat, TransportState};
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub active_beat: Option<PlaybackBeat>,
    pub transport: TransportState,
    pub is_playing: bool,
    pub is_ready: bool,
    pub is_loading: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub last_error: Option<String>,
}

struct BoundEngine {
    id: Uuid,
    host: VisualizationHost,
    engine: Box<dyn AudioEngine>,
}

struct LoadJob {
    token: Uuid,
    load: BoxFuture<'static, Result<(), EngineError>>,
}

struct PlaybackState {
    active_beat: Option<PlaybackBeat>,
    active_source: Option<String>,
    transport: TransportState,
    position: f64,
    duration: f64,
    volume: f64,
    engine: Option<BoundEngine>,
    // active source is waiting for an engine to be bound
    pending: bool,
    autoplay: bool,
    load_token: Option<Uuid>,
    last_error: Option<String>,
}

impl PlaybackState {
    fn new(volume: f64) -> Self {
        Self {
            active_beat: None,
            active_source: None,
            transport: TransportState::Empty,
            position: 0.0,
            duration: 0.0,
            volume,
            engine: None,
            pending: false,
            autoplay: false,
            load_token: None,
            last_error: None,
        }
    }

    fn reset_session(&mut self) {
        self.active_beat = None;
        self.active_source = None;
        self.transport = TransportState::Empty;
        self.position = 0.0;
        self.duration = 0.0;
        self.pending = false;
        self.autoplay = false;
        self.load_token = None;
    }

    fn is_active(&self, beat_id: &str) -> bool {
        self.active_beat
            .as_ref()
            .map(|b| b.beat_id == beat_id)
            .unwrap_or(false)
    }

    fn toggle(&mut self) {
        match self.transport {
            TransportState::ReadyPlaying => {
                if let Some(bound) = self.engine.as_mut() {
                    bound.engine.pause();
                }
                self.transport = TransportState::ReadyPaused;
            }
            TransportState::ReadyPaused => {
                if let Some(bound) = self.engine.as_mut() {
                    bound.engine.play();
                }
                self.transport = TransportState::ReadyPlaying;
            }
            TransportState::Loading => {
                self.autoplay = !self.autoplay;
                debug!("Autoplay after load set to {}", self.autoplay);
            }
            TransportState::Empty => {}
        }
    }

    /// Metadata is known: capture duration, apply volume, start if asked to.
    fn on_ready(&mut self) {
        let Some(bound) = self.engine.as_mut() else {
            return;
        };
        let duration = bound.engine.duration();
        self.duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        if self.transport == TransportState::Loading {
            self.transport = TransportState::ReadyPaused;
            bound.engine.set_volume(self.volume);
            info!("Beat ready ({:.1}s)", self.duration);
        }
        if self.autoplay && self.transport.is_ready() {
            self.autoplay = false;
            bound.engine.play();
            self.transport = TransportState::ReadyPlaying;
        }
    }

    fn fail(&mut self, reason: String) {
        self.transport = TransportState::Empty;
        self.position = 0.0;
        self.duration = 0.0;
        self.autoplay = false;
        self.load_token = None;
        self.last_error = Some(reason);
    }
}

struct PlaybackInner {
    state: Mutex<PlaybackState>,
    factory: Arc<dyn EngineFactory>,
    options: WaveformOptions,
    signals: mpsc::UnboundedSender<EngineSignal>,
}

impl PlaybackInner {
    fn state(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts loading the active source on the bound engine, or marks it
    /// pending until one is bound.
    fn begin_load(&self, state: &mut PlaybackState) -> Option<LoadJob> {
        let source = state.active_source.clone()?;
        let Some(bound) = state.engine.as_mut() else {
            debug!("No engine bound yet, queueing {}", source);
            state.pending = true;
            return None;
        };
        let token = Uuid::new_v4();
        state.load_token = Some(token);
        let _ = self.signals.send(EngineSignal::LoadStarted(token));
        debug!("Engine {} loading {}", bound.id, source);
        let load = bound.engine.load(&source);
        Some(LoadJob { token, load })
    }

    fn finish_load(&self, token: Uuid, result: Result<(), EngineError>) {
        let mut state = self.state();
        if state.load_token != Some(token) {
            debug!("Ignoring result of a superseded load");
            return;
        }
        match result {
            Ok(()) => state.on_ready(),
            Err(e) => {
                error!("Error loading audio: {}", e);
                state.fail(e.to_string());
            }
        }
    }

    fn handle_event(&self, engine_id: Uuid, fence: Option<Uuid>, event: EngineEvent) {
        let mut guard = self.state();
        let state = &mut *guard;

        let current = state.engine.as_ref().map(|b| b.id);
        if current != Some(engine_id) {
            debug!("Dropping {:?} from detached engine {}", event, engine_id);
            return;
        }
        if state.load_token != fence {
            debug!("Dropping {:?} queued before the latest load", event);
            return;
        }

        match event {
            EngineEvent::Ready => state.on_ready(),
            EngineEvent::Position(seconds) => {
                if state.active_beat.is_some() && seconds.is_finite() {
                    let upper = if state.duration > 0.0 {
                        state.duration
                    } else {
                        seconds.max(0.0)
                    };
                    state.position = seconds.clamp(0.0, upper);
                }
            }
            EngineEvent::Finished => {
                if state.transport.is_ready() {
                    debug!("Playback finished");
                    state.transport = TransportState::ReadyPaused;
                }
            }
            EngineEvent::Play => {
                if state.transport == TransportState::ReadyPaused {
                    state.transport = TransportState::ReadyPlaying;
                }
            }
            EngineEvent::Pause => {
                if state.transport == TransportState::ReadyPlaying {
                    state.transport = TransportState::ReadyPaused;
                }
            }
            EngineEvent::Error(reason) => {
                error!("Audio engine error: {}", reason);
                match state.transport {
                    TransportState::Loading => state.fail(reason),
                    TransportState::ReadyPlaying => {
                        state.transport = TransportState::ReadyPaused;
                        state.last_error = Some(reason);
                    }
                    _ => state.last_error = Some(reason),
                }
            }
        }
    }

    fn release_engine(&self, engine_id: Uuid) {
        let mut state = self.state();
        let is_current = state.engine.as_ref().map(|b| b.id) == Some(engine_id);
        if !is_current {
            return;
        }
        if let Some(mut bound) = state.engine.take() {
            info!("Releasing engine {} on {:?}", bound.id, bound.host);
            bound.engine.destroy();
        }
        state.reset_session();
    }
}

impl Drop for PlaybackInner {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(mut bound) = state.engine.take() {
            bound.engine.destroy();
        }
    }
}

async fn pump_events(inner: Weak<PlaybackInner>, mut rx: mpsc::UnboundedReceiver<EngineSignal>) {
    let mut fence = None;
    while let Some(signal) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match signal {
            EngineSignal::LoadStarted(token) => fence = Some(token),
            EngineSignal::Event { engine_id, event } => inner.handle_event(engine_id, fence, event),
        }
    }
    debug!("Engine event pump stopped");
}

/// Scoped ownership of a bound engine. Dropping it destroys the engine if it
/// is still the bound one and empties the session.
#[must_use = "dropping the binding destroys the engine"]
pub struct EngineBinding {
    inner: Weak<PlaybackInner>,
    engine_id: Uuid,
}

impl EngineBinding {
    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    pub fn release(self) {}
}

impl Drop for EngineBinding {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.release_engine(self.engine_id);
        }
    }
}

#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<PlaybackInner>,
}

impl PlaybackController {
    /// Must be called inside a tokio runtime: engine events are pumped by a
    /// spawned task.
    pub fn new(factory: Arc<dyn EngineFactory>, volume: f64) -> Self {
        let (signals, rx) = mpsc::unbounded_channel();
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            crate::config::DEFAULT_VOLUME
        };
        let inner = Arc::new(PlaybackInner {
            state: Mutex::new(PlaybackState::new(volume)),
            factory,
            options: WaveformOptions::default(),
            signals,
        });
        tokio::spawn(pump_events(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Attaches a rendering target, replacing (and destroying) any engine
    /// already bound. A queued request, or the active beat that lost its
    /// engine, is loaded on the new one.
    pub fn bind_visualization_host(
        &self,
        host: VisualizationHost,
    ) -> Result<EngineBinding, PlaybackError> {
        let (engine_id, job) = {
            let mut guard = self.inner.state();
            let state = &mut *guard;

            // Tear down the old engine before anything else is created
            if let Some(mut old) = state.engine.take() {
                info!("Destroying engine {} before binding {:?}", old.id, host);
                old.engine.destroy();
                // Active content has to be loaded again on the new engine
                if state.active_beat.is_some() && state.transport != TransportState::Empty {
                    state.autoplay =
                        state.autoplay || state.transport == TransportState::ReadyPlaying;
                    state.transport = TransportState::Loading;
                    state.position = 0.0;
                    state.duration = 0.0;
                    state.load_token = None;
                    state.pending = true;
                }
            }

            let engine_id = Uuid::new_v4();
            let events = EngineEvents::new(engine_id, self.inner.signals.clone());
            let mut engine = self.inner.factory.create(&host, &self.inner.options, events)?;
            engine.set_volume(state.volume);
            info!("Engine {} bound to {:?}", engine_id, host);
            state.engine = Some(BoundEngine {
                id: engine_id,
                host,
                engine,
            });

            // Load whatever was waiting for an engine
            let job = if state.pending {
                state.pending = false;
                self.inner.begin_load(state)
            } else {
                None
            };
            (engine_id, job)
        };

        if let Some(job) = job {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let result = job.load.await;
                inner.finish_load(job.token, result);
            });
        }

        Ok(EngineBinding {
            inner: Arc::downgrade(&self.inner),
            engine_id,
        })
    }

    /// Plays `beat` from `source`. Asking again for the beat that is already
    /// loaded toggles play/pause instead of reloading.
    pub async fn request_playback(&self, beat: PlaybackBeat, source: &str) {
        let job = {
            let mut guard = self.inner.state();
            let state = &mut *guard;

            if state.is_active(&beat.beat_id)
                && state.engine.is_some()
                && state.transport != TransportState::Empty
            {
                state.toggle();
                return;
            }

            if let Some(bound) = state.engine.as_mut() {
                if state.transport != TransportState::Empty {
                    bound.engine.stop();
                }
            }

            info!("Playing '{}' ({})", beat.display_name, beat.beat_id);
            state.active_beat = Some(beat);
            state.active_source = Some(source.to_string());
            state.transport = TransportState::Loading;
            state.position = 0.0;
            state.duration = 0.0;
            state.autoplay = true;
            state.load_token = None;
            state.last_error = None;
            state.pending = false;
            self.inner.begin_load(state)
        };

        if let Some(job) = job {
            let result = job.load.await;
            self.inner.finish_load(job.token, result);
        }
    }

    pub fn toggle_play_pause(&self) {
        let mut state = self.inner.state();
        if state.engine.is_some() && state.transport.is_ready() {
            state.toggle();
        }
    }

    pub fn seek(&self, seconds: f64) {
        let mut guard = self.inner.state();
        let state = &mut *guard;
        if !seconds.is_finite() || !state.transport.is_ready() {
            return;
        }
        let target = seconds.clamp(0.0, state.duration.max(0.0));
        if let Some(bound) = state.engine.as_mut() {
            bound.engine.seek_to(target);
            state.position = target;
        }
    }

    pub fn set_volume(&self, volume: f64) {
        if !volume.is_finite() {
            warn!("Ignoring non-finite volume {}", volume);
            return;
        }
        let mut guard = self.inner.state();
        let state = &mut *guard;
        state.volume = volume.clamp(0.0, 1.0);
        if let Some(bound) = state.engine.as_mut() {
            bound.engine.set_volume(state.volume);
        }
    }

    pub fn stop(&self) {
        let mut guard = self.inner.state();
        let state = &mut *guard;
        if let Some(bound) = state.engine.as_mut() {
            bound.engine.stop();
            bound.engine.empty();
        }
        state.reset_session();
        state.last_error = None;
        info!("Playback stopped");
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.inner.state();
        PlaybackSnapshot {
            active_beat: state.active_beat.clone(),
            transport: state.transport,
            is_playing: state.transport == TransportState::ReadyPlaying,
            is_ready: state.transport.is_ready(),
            is_loading: state.transport == TransportState::Loading,
            current_time: state.position,
            duration: state.duration,
            volume: state.volume,
            last_error: state.last_error.clone(),
        }
    }

    pub fn active_beat(&self) -> Option<PlaybackBeat> {
        self.inner.state().active_beat.clone()
    }

    pub fn transport(&self) -> TransportState {
        self.inner.state().transport
    }

    pub fn is_playing(&self) -> bool {
        self.transport() == TransportState::ReadyPlaying
    }

    pub fn is_ready(&self) -> bool {
        self.transport().is_ready()
    }

    pub fn is_loading(&self) -> bool {
        self.transport() == TransportState::Loading
    }

    pub fn current_time(&self) -> f64 {
        self.inner.state().position
    }

    pub fn duration(&self) -> f64 {
        self.inner.state().duration
    }

    pub fn volume(&self) -> f64 {
        self.inner.state().volume
    }
}

/// `m:ss`, or `0:00` when the time is unknown.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
