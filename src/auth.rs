use futures_util::future::BoxFuture;
use log::{debug, info};
use std::sync::{Arc, RwLock};

/// Receives session transitions from the auth subsystem.
pub trait SessionListener: Send + Sync {
    fn on_login<'a>(&'a self, email: &'a str) -> BoxFuture<'a, ()>;
    fn on_logout(&self) -> BoxFuture<'_, ()>;
}

/// Registration point the auth side notifies on login/logout.
///
/// Listeners are wired at composition time and called in registration order.
#[derive(Default, Clone)]
pub struct AuthNotifier {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionListener>>>>,
}

impl AuthNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn SessionListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.push(listener);
        debug!("Session listener registered ({} total)", listeners.len());
    }

    fn snapshot(&self) -> Vec<Arc<dyn SessionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn notify_login(&self, email: &str) {
        info!("Session started for {}", email);
        for listener in self.snapshot() {
            listener.on_login(email).await;
        }
    }

    pub async fn notify_logout(&self) {
        info!("Session ended");
        for listener in self.snapshot() {
            listener.on_logout().await;
        }
    }
}
