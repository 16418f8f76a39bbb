use log::{debug, LevelFilter};

// Module declarations
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod playback;
pub mod remote;
pub mod session;
pub mod storage;
pub mod storefront;
pub mod types;

#[cfg(test)]
mod testing;

pub use auth::{AuthNotifier, SessionListener};
pub use cart::{merge_carts, AddOutcome, CartNotice, CartSnapshot, CartSync, CART_STORAGE_KEY};
pub use catalog::{Beat, CatalogClient};
pub use config::StoreConfig;
pub use engine::{
    AudioEngine, EngineError, EngineEvent, EngineEvents, EngineFactory, VisualizationHost,
    WaveformOptions,
};
pub use playback::{format_time, EngineBinding, PlaybackController, PlaybackError, PlaybackSnapshot};
pub use remote::{HttpCartStore, RemoteCartStore, StoreError};
pub use session::{AuthSession, SessionError, UserProfile, TOKEN_STORAGE_KEY};
pub use storage::{FileStore, LocalStore, MemoryStore, StorageError};
pub use storefront::Storefront;
pub use types::{CartItem, LicenseType, PlaybackBeat, TransportState};

/// Installs the env_logger backend at `info` unless `RUST_LOG` says otherwise.
/// Safe to call more than once.
pub fn init_logging() {
    let result = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init();
    if result.is_err() {
        debug!("Logger already initialized");
    }
}
