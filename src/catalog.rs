use crate::remote::USER_AGENT;
use crate::types::{LicenseType, PlaybackBeat};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A beat as listed by the catalog endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Beat {
    pub beat_id: String,
    pub name: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub bpm: Option<u32>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    pub audio_url: String,
    pub price_basica: f64,
    pub price_premium: f64,
    pub price_exclusiva: f64,
    #[serde(default)]
    pub discount_percentage: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Beat {
    pub fn list_price(&self, license: LicenseType) -> f64 {
        match license {
            LicenseType::Basic => self.price_basica,
            LicenseType::Premium => self.price_premium,
            LicenseType::Exclusive => self.price_exclusiva,
        }
    }

    /// Price the shopper pays right now, discount applied and rounded to cents.
    pub fn price_for(&self, license: LicenseType) -> f64 {
        let price = self.list_price(license);
        match self.discount_percentage {
            Some(pct) if pct > 0.0 => round_cents(price * (100.0 - pct) / 100.0),
            _ => price,
        }
    }

    pub fn playback_beat(&self) -> PlaybackBeat {
        PlaybackBeat {
            beat_id: self.beat_id.clone(),
            display_name: self.name.clone(),
            genre: self.genre.clone(),
            bpm: self.bpm,
            key: self.key.clone(),
        }
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Media URLs and play counting against the catalog API.
#[derive(Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    api_base: String,
}

impl CatalogClient {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
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

    pub fn audio_url(&self, beat: &Beat) -> String {
        format!(
            "{}/beats/audio/{}",
            self.api_base,
            urlencoding::encode(file_name(&beat.audio_url))
        )
    }

    /// Cover URL with a cache-busting timestamp, or `None` when the beat has no cover.
    pub fn cover_url(&self, beat: &Beat) -> Option<String> {
        let cover = beat.cover_url.as_deref()?;
        let mut url = format!(
            "{}/beats/cover/{}",
            self.api_base,
            urlencoding::encode(file_name(cover))
        );
        if let Some(stamp) = beat.updated_at.as_deref().or(beat.created_at.as_deref()) {
            url.push_str(&format!("?t={}", urlencoding::encode(stamp)));
        }
        Some(url)
    }

    /// Fire-and-forget play counter; failures are only logged. Runs on the
    /// current tokio runtime and is skipped when there is none.
    pub fn register_play(&self, beat_id: &str) {
        let url = format!(
            "{}/beats/{}/play",
            self.api_base,
            urlencoding::encode(beat_id)
        );
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, play not registered: {}", url);
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move {
            match client.post(&url).send().await {
                Ok(resp) if resp.status().is_success() => debug!("Play registered: {}", url),
                Ok(resp) => warn!("Play registration rejected ({}): {}", resp.status(), url),
                Err(e) => warn!("Play registration failed: {}", e),
            }
        });
    }
}

#[cfg(test)]
pub(crate) fn sample_beat(beat_id: &str, name: &str) -> Beat {
    Beat {
        beat_id: beat_id.to_string(),
        name: name.to_string(),
        genre: Some("Trap".to_string()),
        bpm: Some(140),
        key: Some("C Minor".to_string()),
        cover_url: Some(format!("/uploads/covers/{}.png", beat_id)),
        audio_url: format!("/uploads/audio/{}.mp3", beat_id),
        price_basica: 10.0,
        price_premium: 20.0,
        price_exclusiva: 300.0,
        discount_percentage: None,
        created_at: Some("2025-01-15".to_string()),
        updated_at: None,
    }
}
