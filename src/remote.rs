use crate::types::{CartItem, LicenseType};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const USER_AGENT: &str = "beatstore/0.1.0";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(StatusCode),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Server-side cart storage, keyed by the shopper's email.
pub trait RemoteCartStore: Send + Sync {
    fn fetch<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Vec<CartItem>, StoreError>>;

    fn save<'a>(
        &'a self,
        email: &'a str,
        items: &'a [CartItem],
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn delete_item<'a>(
        &'a self,
        email: &'a str,
        beat_id: &'a str,
        license_type: LicenseType,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn clear<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

#[derive(Debug, Deserialize)]
struct CartResponse {
    #[serde(default)]
    items: Vec<CartItem>,
}

#[derive(Debug, Serialize)]
struct SaveCartRequest<'a> {
    user_email: &'a str,
    items: &'a [CartItem],
}

/// `RemoteCartStore` backed by the storefront's `/api/cart` routes.
#[derive(Clone)]
pub struct HttpCartStore {
    client: reqwest::Client,
    api_base: String,
}

impl HttpCartStore {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, api_base))
    }

    pub fn with_client(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn cart_url(&self, email: &str) -> String {
        format!("{}/cart/{}", self.api_base, urlencoding::encode(email))
    }

    fn item_url(&self, email: &str, beat_id: &str, license_type: LicenseType) -> String {
        format!(
            "{}/item/{}/{}",
            self.cart_url(email),
            urlencoding::encode(beat_id),
            license_type.as_str()
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        Ok(response)
    }
}

impl RemoteCartStore for HttpCartStore {
    fn fetch<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Vec<CartItem>, StoreError>> {
        async move {
            let url = self.cart_url(email);
            debug!("Request URL: {}", url);
            let response = self.send(self.client.get(&url)).await?;
            let body: CartResponse = response.json().await?;
            debug!("Backend returned {} cart items", body.items.len());
            Ok(body.items)
        }
        .boxed()
    }

    fn save<'a>(
        &'a self,
        email: &'a str,
        items: &'a [CartItem],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let url = format!("{}/cart/save", self.api_base);
            let body = SaveCartRequest {
                user_email: email,
                items,
            };
            self.send(self.client.post(&url).json(&body)).await?;
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
            let url = self.item_url(email, beat_id, license_type);
            self.send(self.client.delete(&url)).await?;
            Ok(())
        }
        .boxed()
    }

    fn clear<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let url = self.cart_url(email);
            self.send(self.client.delete(&url)).await?;
            Ok(())
        }
        .boxed()
    }
}
