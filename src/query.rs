use crate::config::{ConfigError, ResponseFormat, SearchConfig};
use crate::photos::parse_photos;
use crate::types::*;
use futures::future::BoxFuture;
use futures::FutureExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Unreserved characters stay literal, everything else in a tag is escaped.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Outbound GET used for both the search call and thumbnail downloads.
pub trait Transport: Send + Sync + 'static {
    fn get(&self, url: String) -> BoxFuture<'static, Result<Vec<u8>, FetchError>>;
}

/// `reqwest`-backed transport. Clones share one connection pool.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &SearchConfig) -> Self {
        Self {
            client,
            user_agent: config.user_agent.clone(),
            timeout: config.request_timeout,
        }
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: String) -> BoxFuture<'static, Result<Vec<u8>, FetchError>> {
        let client = self.client.clone();
        let user_agent = self.user_agent.clone();
        let timeout = self.timeout;
        async move {
            let classify = |e: reqwest::Error| {
                if e.is_timeout() {
                    FetchError::Timeout(timeout)
                } else {
                    FetchError::Transport(e.to_string())
                }
            };
            let resp = client
                .get(&url)
                .header("User-Agent", user_agent)
                .send()
                .await
                .map_err(classify)?;
            if !resp.status().is_success() {
                return Err(FetchError::Status(resp.status().as_u16()));
            }
            let body = resp.bytes().await.map_err(classify)?;
            Ok(body.to_vec())
        }
        .boxed()
    }
}

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

/// Names one in-flight fetch. Whichever of cancel and completion claims the
/// handle first decides whether the outcome is `Cancelled`.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    id: u64,
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl CancellationHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` when the cancellation was acknowledged, `false` when the
    /// fetch had already completed.
    pub fn cancel(&self) -> bool {
        let acknowledged = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if acknowledged {
            self.token.cancel();
        }
        acknowledged
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    fn settle(&self) -> bool {
        self.state
            .compare_exchange(PENDING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Resolves once with the parsed results of a [`QueryClient::fetch`] call.
#[derive(Debug)]
pub struct PendingFetch {
    task: JoinHandle<Result<Vec<ImageResult>, FetchError>>,
}

impl Future for PendingFetch {
    type Output = Result<Vec<ImageResult>, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(FetchError::Cancelled)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(FetchError::Transport(format!("fetch task failed: {}", e)))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Split user input on whitespace and join the pieces with `separator`.
/// Returns `None` when nothing is left.
pub fn normalize_tags(input: &str, separator: &str) -> Option<String> {
    let tags: Vec<&str> = input.split_whitespace().collect();
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(separator))
    }
}

#[derive(Clone)]
pub struct QueryClient {
    config: Arc<SearchConfig>,
    transport: Arc<dyn Transport>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("endpoint", &self.config.endpoint)
            .field("response_format", &self.config.response_format)
            .finish_non_exhaustive()
    }
}

impl QueryClient {
    pub fn new(config: SearchConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport))?)
    }

    pub fn with_transport(config: SearchConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            transport,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Build the search URL for an already normalized tag list.
    pub fn search_url(&self, tags: &str) -> String {
        let config = &self.config;
        let encoded_tags = tags
            .split(config.tag_separator.as_str())
            .map(|t| utf8_percent_encode(t, QUERY_VALUE).to_string())
            .collect::<Vec<_>>()
            .join(&config.tag_separator);
        let mut url = format!(
            "{}?method={}&api_key={}&tags={}&tag_mode={}&per_page={}&privacy_filter={}",
            config.endpoint,
            utf8_percent_encode(&config.method, QUERY_VALUE),
            utf8_percent_encode(&config.api_key, QUERY_VALUE),
            encoded_tags,
            utf8_percent_encode(&config.tag_mode, QUERY_VALUE),
            config.per_page,
            config.privacy_filter,
        );
        if config.response_format == ResponseFormat::Json {
            url.push_str("&format=json&nojsoncallback=1");
        }
        url
    }

    /// Start one search in the background. The returned future resolves
    /// exactly once; an acknowledged cancel always yields `Cancelled`.
    pub fn fetch(&self, tags: &str) -> (CancellationHandle, PendingFetch) {
        let handle = CancellationHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let url = self.search_url(tags);
        info!("Searching photos tagged: {}", tags);
        debug!("Search {} against {}", handle.id, self.config.endpoint);

        let config = Arc::clone(&self.config);
        let transport = Arc::clone(&self.transport);
        let task_handle = handle.clone();
        let timeout = config.request_timeout;
        let task = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = task_handle.token.cancelled() => Err(FetchError::Cancelled),
                r = tokio::time::timeout(timeout, async {
                    let body = transport.get(url).await?;
                    parse_photos(&config, &body)
                }) => r.unwrap_or(Err(FetchError::Timeout(timeout))),
            };
            if !task_handle.settle() {
                debug!("Search {} cancelled", task_handle.id);
                return Err(FetchError::Cancelled);
            }
            match &result {
                Ok(results) => info!("Search {} returned {} photos", task_handle.id, results.len()),
                Err(e) => warn!("Search {} failed: {}", task_handle.id, e),
            }
            result
        });
        (handle, PendingFetch { task })
    }

    pub fn cancel(&self, handle: &CancellationHandle) -> bool {
        let acknowledged = handle.cancel();
        if acknowledged {
            info!("Cancelling search {}", handle.id);
        } else {
            debug!("Search {} already finished, cancel ignored", handle.id);
        }
        acknowledged
    }

    /// Download a selected image's bytes. Single shot, no session tracking.
    pub async fn fetch_image(&self, image_url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = url::Url::parse(image_url)
            .map_err(|e| FetchError::Transport(format!("invalid image URL '{}': {}", image_url, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::Transport("image URL must use HTTP or HTTPS".to_string()));
        }
        debug!("Fetching image {}", image_url);
        let timeout = self.config.request_timeout;
        let bytes = tokio::time::timeout(timeout, self.transport.get(image_url.to_string()))
            .await
            .unwrap_or(Err(FetchError::Timeout(timeout)))?;
        debug!("Fetched {} image bytes", bytes.len());
        Ok(bytes)
    }
}
