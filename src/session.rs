//! Search session controller.
//!
//! One owner task handles every `start_search` command and every fetch
//! completion in turn, so consumer callbacks never overlap each other or a
//! start. At most one search is in flight. Replacing it always goes through
//! [`SessionConsumer::confirm_cancel`] first.

use crate::query::{normalize_tags, CancellationHandle, PendingFetch, QueryClient};
use crate::types::*;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Callbacks implemented by the view layer. Invoked only from the owner task.
pub trait SessionConsumer: Send + Sync + 'static {
    /// Ask whether the active search should be cancelled. `Err` means no.
    fn confirm_cancel<'a>(&'a self, active: &'a SearchRequest) -> BoxFuture<'a, anyhow::Result<bool>>;

    fn on_started(&self, _request: &SearchRequest) {}

    /// Called exactly once per accepted request.
    fn on_outcome(&self, request: &SearchRequest, outcome: SearchOutcome);
}

type ConfirmFn = dyn Fn(&SearchRequest) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync;

/// Consumer that forwards lifecycle events to a channel, for UIs that drain
/// them on their own loop.
pub struct ChannelConsumer {
    events: mpsc::UnboundedSender<SessionEvent>,
    confirm: Box<ConfirmFn>,
}

impl ChannelConsumer {
    pub fn new<F>(confirm: F) -> (Self, mpsc::UnboundedReceiver<SessionEvent>)
    where
        F: Fn(&SearchRequest) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync + 'static,
    {
        let (events, rx) = mpsc::unbounded_channel();
        let consumer = Self {
            events,
            confirm: Box::new(confirm),
        };
        (consumer, rx)
    }

    pub fn always(answer: bool) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::new(move |_| futures::future::ready(Ok(answer)).boxed())
    }
}

impl SessionConsumer for ChannelConsumer {
    fn confirm_cancel<'a>(&'a self, active: &'a SearchRequest) -> BoxFuture<'a, anyhow::Result<bool>> {
        (self.confirm)(active)
    }

    fn on_started(&self, request: &SearchRequest) {
        let _ = self.events.send(SessionEvent::Started(request.clone()));
    }

    fn on_outcome(&self, request: &SearchRequest, outcome: SearchOutcome) {
        let _ = self.events.send(SessionEvent::Finished {
            request: request.clone(),
            outcome,
        });
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("search session has shut down")]
pub struct SessionClosed;

#[derive(Debug)]
enum Command {
    Start(String),
    Shutdown,
}

/// Cheap handle for driving a running controller.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<SessionPhase>,
}

impl SessionHandle {
    /// Queue a search for `input`. Outcomes arrive through the consumer.
    pub fn start_search(&self, input: impl Into<String>) -> Result<(), SessionClosed> {
        self.commands
            .send(Command::Start(input.into()))
            .map_err(|_| SessionClosed)
    }

    /// Cancel any in-flight search and stop the controller.
    pub fn shutdown(&self) -> Result<(), SessionClosed> {
        self.commands.send(Command::Shutdown).map_err(|_| SessionClosed)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }
}

struct ActiveSearch {
    request: SearchRequest,
    handle: CancellationHandle,
    pending: PendingFetch,
}

enum Confirmation {
    Accepted,
    Declined,
    Shutdown,
}

pub struct SearchSessionController {
    client: QueryClient,
    consumer: Arc<dyn SessionConsumer>,
    commands: mpsc::UnboundedReceiver<Command>,
    phase: watch::Sender<SessionPhase>,
    active: Option<ActiveSearch>,
    next_request_id: u64,
}

impl SearchSessionController {
    pub fn new(client: QueryClient, consumer: Arc<dyn SessionConsumer>) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (phase, phase_rx) = watch::channel(SessionPhase::Idle);
        let controller = Self {
            client,
            consumer,
            commands,
            phase,
            active: None,
            next_request_id: 1,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            phase: phase_rx,
        };
        (controller, handle)
    }

    /// Run the controller on its own tokio task.
    pub fn spawn(client: QueryClient, consumer: Arc<dyn SessionConsumer>) -> SessionHandle {
        let (controller, handle) = Self::new(client, consumer);
        tokio::spawn(controller.run());
        handle
    }

    /// Drive the session until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("Search session started");
        loop {
            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Start(input)) => self.start_search(input).await,
                    Some(Command::Shutdown) | None => ControlFlow::Break(()),
                },
                result = next_completion(&mut self.active) => {
                    self.finish(result);
                    ControlFlow::Continue(())
                }
            };
            if flow.is_break() {
                break;
            }
        }
        self.cancel_active().await;
        info!("Search session stopped");
    }

    async fn start_search(&mut self, input: String) -> ControlFlow<()> {
        let Some(tag) = normalize_tags(&input, &self.client.config().tag_separator) else {
            let request = self.next_request(String::new());
            warn!("Rejected search {}: empty tag input", request.id);
            self.consumer.on_outcome(
                &request,
                SearchOutcome::Failed {
                    reason: ErrorKind::InvalidInput,
                },
            );
            return ControlFlow::Continue(());
        };

        if let Some(active) = &self.active {
            let active_request = active.request.clone();
            self.phase.send_replace(SessionPhase::Confirming {
                active: active_request.clone(),
            });
            match self.confirm_cancel(&active_request).await {
                Confirmation::Accepted => self.cancel_active().await,
                Confirmation::Declined => {
                    info!("Keeping search {}; dropped '{}'", active_request.id, tag);
                    self.phase.send_replace(SessionPhase::InFlight {
                        request: active_request,
                    });
                    return ControlFlow::Continue(());
                }
                Confirmation::Shutdown => return ControlFlow::Break(()),
            }
        }

        self.issue(tag);
        ControlFlow::Continue(())
    }

    // The active fetch is not observed while the prompt is open; a start
    // arriving meanwhile is dropped.
    async fn confirm_cancel(&mut self, active: &SearchRequest) -> Confirmation {
        let consumer = Arc::clone(&self.consumer);
        let mut prompt = AssertUnwindSafe(consumer.confirm_cancel(active)).catch_unwind();
        loop {
            tokio::select! {
                answer = &mut prompt => {
                    return match answer {
                        Ok(Ok(true)) => Confirmation::Accepted,
                        Ok(Ok(false)) => Confirmation::Declined,
                        Ok(Err(e)) => {
                            warn!("Cancel confirmation failed, keeping search {}: {:#}", active.id, e);
                            Confirmation::Declined
                        }
                        Err(_) => {
                            error!("Cancel confirmation panicked, keeping search {}", active.id);
                            Confirmation::Declined
                        }
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Start(input)) => {
                        warn!("Ignoring search '{}' while a cancel confirmation is pending", input.trim());
                    }
                    Some(Command::Shutdown) | None => return Confirmation::Shutdown,
                },
            }
        }
    }

    fn next_request(&mut self, tag: String) -> SearchRequest {
        let id = self.next_request_id;
        self.next_request_id += 1;
        SearchRequest { id, tag }
    }

    fn issue(&mut self, tag: String) {
        let request = self.next_request(tag);
        let (handle, pending) = self.client.fetch(&request.tag);
        debug!("Search {} issued as fetch {}", request.id, handle.id());
        self.active = Some(ActiveSearch {
            request: request.clone(),
            handle,
            pending,
        });
        self.phase.send_replace(SessionPhase::InFlight {
            request: request.clone(),
        });
        self.consumer.on_started(&request);
    }

    fn finish(&mut self, result: Result<Vec<ImageResult>, FetchError>) {
        let Some(active) = self.active.take() else {
            return;
        };
        let outcome = if active.handle.is_cancelled() {
            SearchOutcome::Cancelled
        } else {
            SearchOutcome::from_fetch(result)
        };
        match &outcome {
            SearchOutcome::Succeeded { results } => {
                info!("Search {} succeeded with {} results", active.request.id, results.len())
            }
            SearchOutcome::Failed { reason } => error!("Search {} failed: {}", active.request.id, reason),
            SearchOutcome::Cancelled => info!("Search {} cancelled", active.request.id),
        }
        self.publish(&active.request, outcome);
    }

    /// Cancel the active search and publish `Cancelled` for it, whatever its
    /// fetch produced.
    async fn cancel_active(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        self.client.cancel(&active.handle);
        match (&mut active.pending).await {
            Err(FetchError::Cancelled) => {}
            other => debug!(
                "Discarding late result of search {} (ok: {})",
                active.request.id,
                other.is_ok()
            ),
        }
        info!("Search {} cancelled", active.request.id);
        self.publish(&active.request, SearchOutcome::Cancelled);
    }

    fn publish(&mut self, request: &SearchRequest, outcome: SearchOutcome) {
        self.phase.send_replace(SessionPhase::Idle);
        self.consumer.on_outcome(request, outcome);
    }
}

async fn next_completion(active: &mut Option<ActiveSearch>) -> Result<Vec<ImageResult>, FetchError> {
    match active {
        Some(active) => (&mut active.pending).await,
        None => std::future::pending().await,
    }
}
