use crate::query::Transport;
use crate::types::FetchError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub const OK_XML: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<rsp stat="ok">
<photos page="1" pages="1" perpage="500" total="1">
	<photo id="123" owner="1@N01" secret="abc" server="4" farm="5" title="cat" ispublic="1" isfriend="0" isfamily="0" />
</photos>
</rsp>"#;

pub const EMPTY_XML: &str = r#"<rsp stat="ok"><photos page="1" pages="0" perpage="500" total="0"/></rsp>"#;

enum Reply {
    Ready(Result<Vec<u8>, FetchError>),
    Gated(oneshot::Receiver<Result<Vec<u8>, FetchError>>),
    Hang,
}

struct Scripted {
    url_contains: Option<String>,
    reply: Reply,
}

/// In-memory transport answering calls from a script, in order, optionally
/// matched on a URL fragment.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, url_contains: Option<&str>, reply: Reply) {
        self.script.lock().unwrap().push_back(Scripted {
            url_contains: url_contains.map(str::to_string),
            reply,
        });
    }

    pub fn reply_ok(&self, body: &str) {
        self.push(None, Reply::Ready(Ok(body.as_bytes().to_vec())));
    }

    pub fn reply_ok_for(&self, url_contains: &str, body: &str) {
        self.push(Some(url_contains), Reply::Ready(Ok(body.as_bytes().to_vec())));
    }

    pub fn reply_err(&self, err: FetchError) {
        self.push(None, Reply::Ready(Err(err)));
    }

    pub fn reply_gated(&self) -> oneshot::Sender<Result<Vec<u8>, FetchError>> {
        let (tx, rx) = oneshot::channel();
        self.push(None, Reply::Gated(rx));
        tx
    }

    pub fn reply_gated_for(&self, url_contains: &str) -> oneshot::Sender<Result<Vec<u8>, FetchError>> {
        let (tx, rx) = oneshot::channel();
        self.push(Some(url_contains), Reply::Gated(rx));
        tx
    }

    pub fn reply_hang(&self) {
        self.push(None, Reply::Hang);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: String) -> BoxFuture<'static, Result<Vec<u8>, FetchError>> {
        self.calls.lock().unwrap().push(url.clone());
        let next = {
            let mut script = self.script.lock().unwrap();
            let pos = script.iter().position(|s| match &s.url_contains {
                Some(fragment) => url.contains(fragment.as_str()),
                None => true,
            });
            pos.and_then(|i| script.remove(i))
        };
        match next.map(|s| s.reply) {
            Some(Reply::Ready(result)) => futures::future::ready(result).boxed(),
            Some(Reply::Gated(rx)) => async move {
                rx.await
                    .unwrap_or_else(|_| Err(FetchError::Transport("gate dropped".to_string())))
            }
            .boxed(),
            Some(Reply::Hang) => futures::future::pending().boxed(),
            None => futures::future::ready(Err(FetchError::Transport(format!("unscripted call: {}", url)))).boxed(),
        }
    }
}
