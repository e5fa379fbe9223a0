use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Wire format requested from the photo service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Xml,
    Json,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("api key must not be empty")]
    MissingApiKey,
    #[error("tag separator must not be empty")]
    EmptySeparator,
    #[error("per_page must be greater than zero")]
    ZeroPageSize,
    #[error("request_timeout must be greater than zero")]
    ZeroTimeout,
    #[error("image scheme must be http or https, got '{0}'")]
    InvalidImageScheme(String),
    #[error("image host must not be empty")]
    EmptyImageHost,
}

/// Constants of the search and image URL templates plus transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub method: String,
    pub api_key: String,
    pub tag_separator: String,
    pub tag_mode: String,
    pub per_page: u32,
    pub privacy_filter: u8,
    pub response_format: ResponseFormat,
    pub image_scheme: String,
    pub image_host: String,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.flickr.com/services/rest/".to_string(),
            method: "flickr.photos.search".to_string(),
            api_key: String::new(),
            tag_separator: ",".to_string(),
            tag_mode: "all".to_string(),
            per_page: 500,
            privacy_filter: 1,
            response_format: ResponseFormat::Xml,
            image_scheme: "http".to_string(),
            image_host: "staticflickr.com".to_string(),
            request_timeout: Duration::from_secs(30),
            user_agent: "photo-search/0.1".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: "endpoint must use HTTP or HTTPS".to_string(),
            });
        }
        if endpoint.query().is_some() {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: "endpoint must not carry a query string".to_string(),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.tag_separator.is_empty() {
            return Err(ConfigError::EmptySeparator);
        }
        if self.per_page == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.image_scheme != "http" && self.image_scheme != "https" {
            return Err(ConfigError::InvalidImageScheme(self.image_scheme.clone()));
        }
        if self.image_host.is_empty() {
            return Err(ConfigError::EmptyImageHost);
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| serde::de::Error::custom(format!("invalid request_timeout {}: {}", secs, e)))
    }
}
