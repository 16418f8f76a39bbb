//! Composition root: one cart, one player and the auth wiring between them.

use crate::auth::AuthNotifier;
use crate::cart::{AddOutcome, CartSync};
use crate::catalog::{Beat, CatalogClient};
use crate::config::StoreConfig;
use crate::engine::EngineFactory;
use crate::playback::PlaybackController;
use crate::remote::{HttpCartStore, RemoteCartStore};
use crate::session::AuthSession;
use crate::storage::{FileStore, LocalStore};
use crate::types::{CartItem, LicenseType};
use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

pub struct Storefront {
    notifier: AuthNotifier,
    cart: CartSync,
    playback: PlaybackController,
    catalog: CatalogClient,
    session: Option<AuthSession>,
}

impl Storefront {
    pub async fn new(
        remote: Arc<dyn RemoteCartStore>,
        local: Arc<dyn LocalStore>,
        engines: Arc<dyn EngineFactory>,
        catalog: CatalogClient,
        volume: f64,
    ) -> Self {
        let notifier = AuthNotifier::new();
        let cart = CartSync::new(remote, local);
        notifier.register(Arc::new(cart.clone()));
        cart.load_initial().await;

        Self {
            notifier,
            cart,
            playback: PlaybackController::new(engines, volume),
            catalog,
            session: None,
        }
    }

    /// Builds the HTTP-backed storefront described by `config`. The stored
    /// session is not restored here; call `session().restore()` when ready.
    pub async fn connect(config: &StoreConfig, engines: Arc<dyn EngineFactory>) -> Result<Self> {
        let api_base = config.api_base();
        info!("Connecting storefront to {}", api_base);

        let remote = HttpCartStore::new(&api_base, config.http_timeout)
            .context("Failed to build cart client")?;
        let local: Arc<dyn LocalStore> = Arc::new(
            FileStore::open(&config.data_dir).with_context(|| {
                format!("Failed to open data dir {}", config.data_dir.display())
            })?,
        );
        let catalog = CatalogClient::new(&api_base, config.http_timeout)
            .context("Failed to build catalog client")?;

        let mut storefront = Self::new(
            Arc::new(remote),
            local.clone(),
            engines,
            catalog,
            config.default_volume,
        )
        .await;

        let session = AuthSession::new(
            &api_base,
            config.http_timeout,
            local,
            storefront.notifier.clone(),
        )
        .context("Failed to build session client")?;
        storefront.session = Some(session);
        Ok(storefront)
    }

    pub fn cart(&self) -> &CartSync {
        &self.cart
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    pub fn notifier(&self) -> &AuthNotifier {
        &self.notifier
    }

    pub fn session(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    pub async fn add_to_cart(&self, beat: &Beat, license_type: LicenseType) -> AddOutcome {
        let cover = self.catalog.cover_url(beat).unwrap_or_default();
        self.cart
            .add(CartItem::from_beat(beat, license_type, cover))
            .await
    }

    /// Plays `beat`, or toggles it when it is already the active one. Only a
    /// newly started beat counts as a play.
    pub async fn play_beat(&self, beat: &Beat) {
        let already_active = self
            .playback
            .active_beat()
            .map(|active| active.beat_id == beat.beat_id)
            .unwrap_or(false);
        if !already_active {
            self.catalog.register_play(&beat.beat_id);
        }
        let source = self.catalog.audio_url(beat);
        self.playback
            .request_playback(beat.playback_beat(), &source)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_beat;
    use crate::engine::VisualizationHost;
    use crate::storage::MemoryStore;
    use crate::testing::{FakeEngineFactory, FakeRemote};
    use crate::types::TransportState;

    async fn storefront(remote: Arc<FakeRemote>, engines: &FakeEngineFactory) -> Storefront {
        let catalog = CatalogClient::with_client(reqwest::Client::new(), "http://127.0.0.1:9/api");
        Storefront::new(
            remote,
            Arc::new(MemoryStore::new()),
            Arc::new(engines.clone()),
            catalog,
            0.5,
        )
        .await
    }

    #[tokio::test]
    async fn cart_items_carry_the_catalog_cover() {
        let store = storefront(Arc::new(FakeRemote::default()), &FakeEngineFactory::new(60.0)).await;
        let beat = sample_beat("7", "Night Drive");

        assert_eq!(store.add_to_cart(&beat, LicenseType::Premium).await, AddOutcome::Added);

        let items = store.cart().items().await;
        assert_eq!(
            items[0].cover_image,
            "http://127.0.0.1:9/api/beats/cover/7.png?t=2025-01-15"
        );
        assert_eq!(items[0].price, 20.0);
    }

    #[tokio::test]
    async fn login_notifications_reach_the_cart() {
        let remote = Arc::new(FakeRemote::default());
        let store = storefront(remote.clone(), &FakeEngineFactory::new(60.0)).await;
        store
            .add_to_cart(&sample_beat("1", "One"), LicenseType::Basic)
            .await;

        store.notifier().notify_login("a@x.com").await;
        store.cart().flush().await;

        assert_eq!(store.cart().owner_email().await.as_deref(), Some("a@x.com"));
        assert_eq!(remote.cart("a@x.com").map(|c| c.len()), Some(1));
    }

    #[tokio::test]
    async fn playing_the_same_beat_twice_pauses_it() {
        let engines = FakeEngineFactory::new(95.0);
        let store = storefront(Arc::new(FakeRemote::default()), &engines).await;
        let _binding = store
            .playback()
            .bind_visualization_host(VisualizationHost::new("bar"))
            .unwrap();
        let beat = sample_beat("3", "Three");

        store.play_beat(&beat).await;
        assert!(store.playback().is_playing());
        assert!(engines
            .calls(0)
            .contains(&"load:http://127.0.0.1:9/api/beats/audio/3.mp3".to_string()));

        store.play_beat(&beat).await;
        assert_eq!(store.playback().transport(), TransportState::ReadyPaused);
    }

    /// Backend that only records `POST /api/beats/{id}/play`.
    async fn play_counter() -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        use axum::extract::{Path, State};
        use axum::routing::post;

        let plays = Arc::new(std::sync::Mutex::new(Vec::new()));
        let app = axum::Router::new()
            .route(
                "/api/beats/{beat_id}/play",
                post(
                    |State(plays): State<Arc<std::sync::Mutex<Vec<String>>>>,
                     Path(beat_id): Path<String>| async move {
                        plays.lock().unwrap().push(beat_id);
                    },
                ),
            )
            .with_state(plays.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/api", addr), plays)
    }

    #[tokio::test]
    async fn only_newly_started_beats_count_as_plays() {
        let (api, plays) = play_counter().await;
        let engines = FakeEngineFactory::new(95.0);
        let store = Storefront::new(
            Arc::new(FakeRemote::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(engines.clone()),
            CatalogClient::with_client(reqwest::Client::new(), api),
            0.5,
        )
        .await;
        let _binding = store
            .playback()
            .bind_visualization_host(VisualizationHost::new("bar"))
            .unwrap();
        let first = sample_beat("3", "Three");
        let second = sample_beat("4", "Four");

        store.play_beat(&first).await;
        store.play_beat(&first).await;
        store.play_beat(&first).await;
        store.play_beat(&second).await;

        crate::testing::eventually(|| plays.lock().unwrap().len() >= 2).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let mut seen = plays.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["3".to_string(), "4".to_string()]);
    }
}
