use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One accepted search. `tag` is already normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    pub id: u64,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub title: String,
    pub image_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    NetworkError,
    Timeout,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::NetworkError => "network error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Terminal result of a search, produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    Succeeded { results: Vec<ImageResult> },
    Failed { reason: ErrorKind },
    Cancelled,
}

impl SearchOutcome {
    pub fn from_fetch(result: Result<Vec<ImageResult>, FetchError>) -> Self {
        match result {
            Ok(results) => SearchOutcome::Succeeded { results },
            Err(e) => match e.kind() {
                ErrorKind::Cancelled => SearchOutcome::Cancelled,
                reason => SearchOutcome::Failed { reason },
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("service error {code}: {message}")]
    Api { code: u32, message: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Transport(_)
            | FetchError::Status(_)
            | FetchError::Malformed(_)
            | FetchError::Api { .. } => ErrorKind::NetworkError,
            FetchError::Timeout(_) => ErrorKind::Timeout,
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Lifecycle notifications published by the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started(SearchRequest),
    Finished {
        request: SearchRequest,
        outcome: SearchOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Confirming { active: SearchRequest },
    InFlight { request: SearchRequest },
}

impl SessionPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionPhase::Idle)
    }
}

// Flickr REST payload types

#[derive(Debug, Deserialize)]
pub struct XmlRsp {
    #[serde(rename = "@stat")]
    pub stat: String,
    #[serde(default)]
    pub photos: Option<XmlPhotos>,
    #[serde(default)]
    pub err: Option<XmlErr>,
}

#[derive(Debug, Deserialize)]
pub struct XmlPhotos {
    #[serde(rename = "photo", default)]
    pub photo: Vec<XmlPhoto>,
}

#[derive(Debug, Deserialize)]
pub struct XmlPhoto {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@secret")]
    pub secret: String,
    #[serde(rename = "@server")]
    pub server: String,
    #[serde(rename = "@farm")]
    pub farm: String,
    #[serde(rename = "@title", default)]
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct XmlErr {
    #[serde(rename = "@code")]
    pub code: u32,
    #[serde(rename = "@msg", default)]
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct JsonRsp {
    pub stat: String,
    #[serde(default)]
    pub photos: Option<JsonPhotos>,
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JsonPhotos {
    #[serde(default)]
    pub photo: Vec<JsonPhoto>,
}

#[derive(Debug, Deserialize)]
pub struct JsonPhoto {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub secret: String,
    #[serde(deserialize_with = "string_or_number")]
    pub server: String,
    #[serde(deserialize_with = "string_or_number")]
    pub farm: String,
    #[serde(default)]
    pub title: String,
}

// The JSON flavour sends farm as a number and server as a string; accept both everywhere.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}
