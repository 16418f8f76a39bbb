use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// License tiers a beat can be sold under.
///
/// Serialized with the storefront's own identifiers (`basica`, `premium`,
/// `exclusiva`) since that is what the backend stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseType {
    #[serde(rename = "basica")]
    Basic,
    #[serde(rename = "premium")]
    Premium,
    #[serde(rename = "exclusiva")]
    Exclusive,
}

impl LicenseType {
    pub const ALL: [LicenseType; 3] = [
        LicenseType::Basic,
        LicenseType::Premium,
        LicenseType::Exclusive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseType::Basic => "basica",
            LicenseType::Premium => "premium",
            LicenseType::Exclusive => "exclusiva",
        }
    }
}

impl fmt::Display for LicenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basica" | "basic" => Ok(LicenseType::Basic),
            "premium" => Ok(LicenseType::Premium),
            "exclusiva" | "exclusive" => Ok(LicenseType::Exclusive),
            other => Err(format!("Unknown license type: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CartItem {
    pub beat_id: String,
    pub beat_name: String,
    pub cover_image: String,
    pub license_type: LicenseType,
    pub price: f64, // snapshot at add time, never re-validated
}

impl CartItem {
    pub fn key(&self) -> (&str, LicenseType) {
        (self.beat_id.as_str(), self.license_type)
    }

    pub fn matches(&self, beat_id: &str, license_type: LicenseType) -> bool {
        self.beat_id == beat_id && self.license_type == license_type
    }
}

/// What the player knows about the beat it is previewing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackBeat {
    pub beat_id: String,
    pub display_name: String,
    pub genre: Option<String>,
    pub bpm: Option<u32>,
    pub key: Option<String>,
}

impl PlaybackBeat {
    pub fn new(beat_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            beat_id: beat_id.into(),
            display_name: display_name.into(),
            genre: None,
            bpm: None,
            key: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportState {
    #[default]
    Empty,
    Loading,
    ReadyPaused,
    ReadyPlaying,
}

impl TransportState {
    pub fn is_ready(&self) -> bool {
        matches!(self, TransportState::ReadyPaused | TransportState::ReadyPlaying)
    }
}
