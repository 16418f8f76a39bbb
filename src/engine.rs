//! Audio engine contract.
//!
//! The engine is whatever renders the waveform and plays the preview. The
//! controller drives it through `AudioEngine` and hears back through
//! `EngineEvents`, a channel sender tagged with the engine instance so events
//! from a destroyed engine can be told apart.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to create engine: {0}")]
    Create(String),

    #[error("Failed to load '{url}': {reason}")]
    Load { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Metadata known; `duration()` is now meaningful.
    Ready,
    /// Playback position moved (periodic tick, seek or waveform interaction).
    Position(f64),
    Finished,
    Play,
    Pause,
    Error(String),
}

/// Opaque handle to the UI surface the waveform renders into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisualizationHost(pub String);

impl VisualizationHost {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveformOptions {
    pub wave_color: String,
    pub progress_color: String,
    pub cursor_color: String,
    pub cursor_width: u32,
    pub bar_width: u32,
    pub bar_gap: u32,
    pub bar_radius: u32,
    pub height: u32,
    pub normalize: bool,
    pub interact: bool,
}

impl Default for WaveformOptions {
    fn default() -> Self {
        Self {
            wave_color: "#525252".to_string(),
            progress_color: "#ffffff".to_string(),
            cursor_color: "#ffffff".to_string(),
            cursor_width: 2,
            bar_width: 3,
            bar_gap: 2,
            bar_radius: 2,
            height: 60,
            normalize: true,
            interact: true,
        }
    }
}

/// What travels on the controller's event channel.
#[derive(Debug)]
pub(crate) enum EngineSignal {
    Event { engine_id: Uuid, event: EngineEvent },
    /// Sent by the controller right before it starts a load; engine events
    /// queued ahead of it belong to an older source.
    LoadStarted(Uuid),
}

#[derive(Clone)]
pub struct EngineEvents {
    engine_id: Uuid,
    tx: mpsc::UnboundedSender<EngineSignal>,
}

impl EngineEvents {
    pub(crate) fn new(engine_id: Uuid, tx: mpsc::UnboundedSender<EngineSignal>) -> Self {
        Self { engine_id, tx }
    }

    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    /// Sends are dropped silently once the controller is gone.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(EngineSignal::Event {
            engine_id: self.engine_id,
            event,
        });
    }
}

pub trait AudioEngine: Send {
    /// Starts loading `url`. The returned future resolves once the source is
    /// playable; it must not borrow the engine so the controller can await it
    /// without holding its lock. A newer `load` supersedes a pending one.
    fn load(&mut self, url: &str) -> BoxFuture<'static, Result<(), EngineError>>;
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Unloads the current source.
    fn empty(&mut self);
    fn seek_to(&mut self, seconds: f64);
    fn set_volume(&mut self, volume: f64);
    fn duration(&self) -> f64;
    fn current_time(&self) -> f64;
    fn destroy(&mut self);
}

pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        host: &VisualizationHost,
        options: &WaveformOptions,
        events: EngineEvents,
    ) -> Result<Box<dyn AudioEngine>, EngineError>;
}
