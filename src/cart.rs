//! Shopping cart state and its synchronisation between the guest copy kept in
//! local device storage and the shopper's cart on the backend.
//!
//! While nobody is logged in every mutation is written to local storage under
//! [`CART_STORAGE_KEY`]. On login the guest cart is merged into the remote one
//! (remote entries win), the result becomes canonical and the local copy is
//! dropped. Remote calls are best effort: failures are logged and the
//! in-memory cart stays authoritative for the session.

use crate::auth::SessionListener;
use crate::catalog::Beat;
use crate::remote::RemoteCartStore;
use crate::storage::LocalStore;
use crate::types::{CartItem, LicenseType};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

pub const CART_STORAGE_KEY: &str = "home_cart";

const NOTICE_CAPACITY: usize = 32;

/// User-facing informational messages about cart changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CartNotice {
    Added {
        beat_name: String,
        license_type: LicenseType,
        price: f64,
    },
    AlreadyInCart {
        beat_name: String,
        license_type: LicenseType,
    },
    Removed {
        beat_id: String,
        license_type: LicenseType,
    },
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyInCart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub items: Vec<CartItem>,
    pub count: usize,
    pub total: f64,
    pub owner_email: Option<String>,
}

impl CartItem {
    /// Snapshots the beat's current name and price for `license_type`.
    pub fn from_beat(beat: &Beat, license_type: LicenseType, cover_image: impl Into<String>) -> Self {
        CartItem {
            beat_id: beat.beat_id.clone(),
            beat_name: beat.name.clone(),
            cover_image: cover_image.into(),
            license_type,
            price: beat.price_for(license_type),
        }
    }
}

/// Login-time merge: all of `remote` in order, then each `local` item whose
/// `(beat_id, license_type)` is not already present.
pub fn merge_carts(remote: Vec<CartItem>, local: Vec<CartItem>) -> Vec<CartItem> {
    let mut merged = remote;
    for item in local {
        let exists = merged.iter().any(|m| m.key() == item.key());
        if !exists {
            merged.push(item);
        }
    }
    merged
}

#[derive(Default)]
struct CartState {
    items: Vec<CartItem>,
    owner_email: Option<String>,
    initial_load_done: bool,
    // bumped on logout so a login sync finishing afterwards is dropped
    session_epoch: u64,
}

impl CartState {
    fn contains(&self, beat_id: &str, license_type: LicenseType) -> bool {
        self.items.iter().any(|i| i.matches(beat_id, license_type))
    }

    fn total(&self) -> f64 {
        self.items.iter().map(|i| i.price).sum()
    }
}

type SyncTask = Shared<BoxFuture<'static, ()>>;

enum SyncSlot {
    Idle,
    Busy {
        token: Uuid,
        email: String,
        task: SyncTask,
    },
}

struct CartInner {
    state: Mutex<CartState>,
    remote: Arc<dyn RemoteCartStore>,
    local: Arc<dyn LocalStore>,
    notices: broadcast::Sender<CartNotice>,
    sync_slot: std::sync::Mutex<SyncSlot>,
    // serialises remote saves so the last one to run carries the latest cart
    save_lock: Mutex<()>,
    background: TaskTracker,
}

#[derive(Clone)]
pub struct CartSync {
    inner: Arc<CartInner>,
}

impl CartSync {
    pub fn new(remote: Arc<dyn RemoteCartStore>, local: Arc<dyn LocalStore>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(CartInner {
                state: Mutex::new(CartState::default()),
                remote,
                local,
                notices,
                sync_slot: std::sync::Mutex::new(SyncSlot::Idle),
                save_lock: Mutex::new(()),
                background: TaskTracker::new(),
            }),
        }
    }

    /// Loads the guest cart from local storage. Runs once; persistence stays
    /// disabled until it has, so an empty not-yet-loaded cart never overwrites
    /// stored state.
    pub async fn load_initial(&self) {
        let mut state = self.inner.state.lock().await;
        if state.initial_load_done {
            return;
        }
        let saved = self.inner.read_local();
        if !saved.is_empty() {
            debug!("Restored {} cart items from local storage", saved.len());
            let early = std::mem::take(&mut state.items);
            state.items = merge_carts(saved, early);
        }
        state.initial_load_done = true;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartNotice> {
        self.inner.notices.subscribe()
    }

    pub async fn add_item(&self, beat: &Beat, license_type: LicenseType) -> AddOutcome {
        let cover = beat.cover_url.clone().unwrap_or_default();
        self.add(CartItem::from_beat(beat, license_type, cover)).await
    }

    pub async fn add(&self, item: CartItem) -> AddOutcome {
        let mut state = self.inner.state.lock().await;

        if state.contains(&item.beat_id, item.license_type) {
            debug!("'{}' ({}) already in cart", item.beat_name, item.license_type);
            self.inner.notify(CartNotice::AlreadyInCart {
                beat_name: item.beat_name,
                license_type: item.license_type,
            });
            return AddOutcome::AlreadyInCart;
        }

        info!(
            "Added '{}' ({}) to cart at {:.2}",
            item.beat_name, item.license_type, item.price
        );
        self.inner.notify(CartNotice::Added {
            beat_name: item.beat_name.clone(),
            license_type: item.license_type,
            price: item.price,
        });
        state.items.push(item);
        self.inner.persist(&state);
        AddOutcome::Added
    }

    /// Removes the item locally right away; the remote delete is best effort
    /// and never rolls the local removal back.
    pub async fn remove_item(&self, beat_id: &str, license_type: LicenseType) {
        let owner = {
            let mut state = self.inner.state.lock().await;
            let before = state.items.len();
            state.items.retain(|i| !i.matches(beat_id, license_type));
            if state.items.len() == before {
                debug!("Remove of {} ({}) ignored, not in cart", beat_id, license_type);
                return;
            }
            self.inner.persist(&state);
            state.owner_email.clone()
        };

        self.inner.notify(CartNotice::Removed {
            beat_id: beat_id.to_string(),
            license_type,
        });

        if let Some(email) = owner {
            if let Err(e) = self
                .inner
                .remote
                .delete_item(&email, beat_id, license_type)
                .await
            {
                warn!("Error deleting cart item from backend: {}", e);
            }
        }
    }

    pub async fn clear(&self) {
        let owner = {
            let mut state = self.inner.state.lock().await;
            state.items.clear();
            if state.owner_email.is_some() {
                self.inner.persist(&state);
            }
            state.owner_email.clone()
        };
        self.inner.remove_local();
        self.inner.notify(CartNotice::Cleared);

        if let Some(email) = owner {
            if let Err(e) = self.inner.remote.clear(&email).await {
                warn!("Error clearing backend cart: {}", e);
            }
        }
    }

    pub async fn is_in_cart(&self, beat_id: &str, license_type: LicenseType) -> bool {
        self.inner.state.lock().await.contains(beat_id, license_type)
    }

    pub async fn items(&self) -> Vec<CartItem> {
        self.inner.state.lock().await.items.clone()
    }

    pub async fn count(&self) -> usize {
        self.inner.state.lock().await.items.len()
    }

    pub async fn total(&self) -> f64 {
        self.inner.state.lock().await.total()
    }

    pub async fn owner_email(&self) -> Option<String> {
        self.inner.state.lock().await.owner_email.clone()
    }

    pub async fn snapshot(&self) -> CartSnapshot {
        let state = self.inner.state.lock().await;
        CartSnapshot {
            items: state.items.clone(),
            count: state.items.len(),
            total: state.total(),
            owner_email: state.owner_email.clone(),
        }
    }

    /// Merges the guest cart into `email`'s remote cart.
    ///
    /// Only one sync runs at a time: a call made while one is in flight awaits
    /// that sync instead of starting another.
    pub async fn on_authenticated(&self, email: &str) {
        let email = email.trim();
        if email.is_empty() {
            warn!("Ignoring login notification without an email");
            return;
        }

        let task = {
            let mut slot = self
                .inner
                .sync_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match &*slot {
                SyncSlot::Busy {
                    email: running,
                    task,
                    ..
                } => {
                    if running != email {
                        warn!(
                            "Cart sync for {} already running, {} joins it",
                            running, email
                        );
                    } else {
                        debug!("Joining in-flight cart sync for {}", email);
                    }
                    task.clone()
                }
                SyncSlot::Idle => {
                    let token = Uuid::new_v4();
                    let inner = Arc::clone(&self.inner);
                    let owned_email = email.to_string();
                    let task = async move {
                        Arc::clone(&inner).sync_on_login(owned_email).await;
                        inner.finish_sync(token);
                    }
                    .boxed()
                    .shared();
                    *slot = SyncSlot::Busy {
                        token,
                        email: email.to_string(),
                        task: task.clone(),
                    };
                    task
                }
            }
        };

        task.await;
    }

    pub async fn on_logged_out(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.owner_email = None;
            state.items.clear();
            state.session_epoch += 1;
        }
        self.inner.remove_local();
        info!("Cart cleared after logout");
    }

    /// Waits for background remote saves spawned so far.
    pub async fn flush(&self) {
        self.inner.background.close();
        self.inner.background.wait().await;
        self.inner.background.reopen();
    }
}

impl CartInner {
    fn notify(&self, notice: CartNotice) {
        // no subscribers is fine
        let _ = self.notices.send(notice);
    }

    fn read_local(&self) -> Vec<CartItem> {
        let raw = match self.local.read(CART_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Error reading local cart: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!("Error parsing local cart: {}", e);
                Vec::new()
            }
        }
    }

    fn write_local(&self, items: &[CartItem]) {
        let raw = match serde_json::to_string(items) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Error serializing cart: {}", e);
                return;
            }
        };
        if let Err(e) = self.local.write(CART_STORAGE_KEY, &raw) {
            warn!("Error writing local cart: {}", e);
        }
    }

    fn remove_local(&self) {
        if let Err(e) = self.local.remove(CART_STORAGE_KEY) {
            warn!("Error removing local cart: {}", e);
        }
    }

    /// Guest carts are written to local storage synchronously; attributed
    /// carts are saved remotely in the background.
    fn persist(self: &Arc<Self>, state: &CartState) {
        if !state.initial_load_done {
            debug!("Skipping cart persistence before initial load");
            return;
        }
        match &state.owner_email {
            None => self.write_local(&state.items),
            Some(email) => {
                let inner = Arc::clone(self);
                let email = email.clone();
                self.background.spawn(async move {
                    inner.save_latest(&email).await;
                });
            }
        }
    }

    async fn save_latest(&self, email: &str) {
        let _guard = self.save_lock.lock().await;
        let items = {
            let state = self.state.lock().await;
            if state.owner_email.as_deref() != Some(email) {
                debug!("Cart no longer attributed to {}, skipping save", email);
                return;
            }
            state.items.clone()
        };
        if let Err(e) = self.remote.save(email, &items).await {
            warn!("Error saving cart to backend: {}", e);
        }
    }

    async fn sync_on_login(self: Arc<Self>, email: String) {
        let epoch = self.state.lock().await.session_epoch;

        // Guest cart first, then the backend copy (empty when unreachable)
        let local_items = self.read_local();
        let remote_items = match self.remote.fetch(&email).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Error loading backend cart for {}: {}", email, e);
                Vec::new()
            }
        };
        let mut merged = merge_carts(remote_items, local_items);

        // Adopt the merge unless the user logged out meanwhile
        {
            let mut state = self.state.lock().await;
            if state.session_epoch != epoch {
                warn!("Logout during cart sync for {}, discarding merge", email);
                return;
            }
            if state.owner_email.is_none() {
                // guest adds that landed while the fetch was in flight
                merged = merge_carts(merged, state.items.clone());
            }
            state.items = merged.clone();
            state.owner_email = Some(email.clone());
            state.initial_load_done = true;
        }

        if !merged.is_empty() {
            self.save_latest(&email).await;
        }

        // Drop the guest copy so a later login does not merge it again
        self.remove_local();
        info!("Cart synced for {}: {} items", email, merged.len());
    }

    fn finish_sync(&self, token: Uuid) {
        let mut slot = self
            .sync_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(&*slot, SyncSlot::Busy { token: running, .. } if *running == token) {
            *slot = SyncSlot::Idle;
        }
    }
}

impl SessionListener for CartSync {
    fn on_login<'a>(&'a self, email: &'a str) -> BoxFuture<'a, ()> {
        self.on_authenticated(email).boxed()
    }

    fn on_logout(&self) -> BoxFuture<'_, ()> {
        self.on_logged_out().boxed()
    }
}
