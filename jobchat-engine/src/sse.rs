//! Server-sent events transport.
//!
//! Pushed events arrive on a long-lived `GET` stream; client actions are
//! `POST`ed as `{event, payload}` envelopes and the response body is the
//! acknowledgement. A background task follows the stream, resuming with
//! `Last-Event-ID` after a drop.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use shared::config::Config;
use shared::models::{ClientEvent, ErrorResponse};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::connection::{SessionIdentity, SignalSender, Transport, TransportSignal};
use crate::error::{TransportError, TransportResult};
use crate::retry::RetryConfig;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines and even
/// UTF-8 sequences anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let event = self.event.take();
            let id = self.id.take();
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseFrame { event, data, id });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line
            .split_once(':')
            .map_or((line, ""), |(field, value)| {
                (field, value.strip_prefix(' ').unwrap_or(value))
            });
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }
}

#[derive(Debug)]
struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
pub struct SseTransport {
    client: Client,
    stream_url: Url,
    events_url: Url,
    reconnect: RetryConfig,
    token: Mutex<Option<String>>,
    worker: Mutex<Option<Worker>>,
}

impl SseTransport {
    /// # Errors
    /// Returns an error when the configured paths do not form valid URLs.
    pub fn new(client: Client, config: &Config) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            stream_url: config.endpoint(&config.server.stream_path)?,
            events_url: config.endpoint(&config.server.events_path)?,
            reconnect: RetryConfig::for_reconnects(&config.connection),
            token: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    fn current_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = token;
        }
    }

    fn take_worker(&self) -> Option<Worker> {
        self.worker.lock().ok().and_then(|mut guard| guard.take())
    }

    fn is_open(&self) -> bool {
        self.worker.lock().is_ok_and(|guard| guard.is_some())
    }

    async fn post(&self, event: &ClientEvent) -> TransportResult<String> {
        if !self.is_open() {
            return Err(TransportError::closed("event stream is not open"));
        }
        let request = authorize(
            self.client.post(self.events_url.clone()).json(event),
            self.current_token().as_deref(),
        );
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::rejected(
                event.name(),
                ErrorResponse::from_body(&body),
            ));
        }
        Ok(body)
    }
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn open_stream(
    client: &Client,
    url: &Url,
    token: Option<&str>,
    last_event_id: Option<&str>,
) -> TransportResult<Response> {
    let mut request = authorize(client.get(url.clone()), token)
        .header(reqwest::header::ACCEPT, "text/event-stream");
    if let Some(id) = last_event_id {
        request = request.header("Last-Event-ID", id);
    }
    Ok(request.send().await?.error_for_status()?)
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&self, identity: &SessionIdentity, signals: SignalSender) -> TransportResult<()> {
        self.close().await;

        let mut url = self.stream_url.clone();
        url.query_pairs_mut()
            .append_pair("userId", &identity.user_id.to_string());
        let response = open_stream(&self.client, &url, identity.token.as_deref(), None).await?;
        self.set_token(identity.token.clone());
        info!(%url, "event stream opened");

        let cancel = CancellationToken::new();
        let follower = StreamFollower {
            client: self.client.clone(),
            url,
            token: identity.token.clone(),
            reconnect: self.reconnect.clone(),
            signals,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(follower.run(response));
        if let Ok(mut guard) = self.worker.lock() {
            *guard = Some(Worker { cancel, handle });
        }
        Ok(())
    }

    async fn emit(&self, event: &ClientEvent) -> TransportResult<()> {
        self.post(event).await.map(|_| ())
    }

    async fn emit_with_ack(&self, event: &ClientEvent) -> TransportResult<Value> {
        let body = self.post(event).await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn close(&self) {
        if let Some(worker) = self.take_worker() {
            worker.cancel.cancel();
            if let Err(error) = worker.handle.await {
                warn!(%error, "event stream task ended abnormally");
            }
        }
        self.set_token(None);
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(worker) = self.take_worker() {
            worker.cancel.cancel();
        }
    }
}

struct StreamFollower {
    client: Client,
    url: Url,
    token: Option<String>,
    reconnect: RetryConfig,
    signals: SignalSender,
    cancel: CancellationToken,
}

impl StreamFollower {
    async fn run(self, first: Response) {
        let mut last_event_id: Option<String> = None;
        let mut response = Some(first);
        let mut attempt = 0u32;

        loop {
            let current = match response.take() {
                Some(current) => current,
                None => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.reconnect.delay_for(attempt);
                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                    match open_stream(
                        &self.client,
                        &self.url,
                        self.token.as_deref(),
                        last_event_id.as_deref(),
                    )
                    .await
                    {
                        Ok(current) => {
                            attempt = 0;
                            if self.signals.send(TransportSignal::Restored).is_err() {
                                return;
                            }
                            current
                        }
                        Err(error) => {
                            warn!(attempt, %error, "event stream reconnect failed");
                            continue;
                        }
                    }
                }
            };

            let Some(reason) = self.pump(current, &mut last_event_id).await else {
                return;
            };
            if self
                .signals
                .send(TransportSignal::Dropped { reason })
                .is_err()
            {
                return;
            }
        }
    }

    /// Forwards frames until the stream ends. Returns the drop reason, or
    /// `None` when following should stop altogether.
    async fn pump(&self, response: Response, last_event_id: &mut Option<String>) -> Option<String> {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();

        loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => return None,
                chunk = stream.next() => chunk,
            };
            let bytes = match chunk {
                None => return Some("stream ended".to_string()),
                Some(Err(error)) => return Some(error.to_string()),
                Some(Ok(bytes)) => bytes,
            };

            for frame in parser.push(&bytes) {
                if let Some(id) = frame.id {
                    *last_event_id = Some(id);
                }
                let event = frame.event.unwrap_or_else(|| "message".to_string());
                match serde_json::from_str::<Value>(&frame.data) {
                    Ok(payload) => {
                        debug!(%event, "event received");
                        if self
                            .signals
                            .send(TransportSignal::Frame { event, payload })
                            .is_err()
                        {
                            return None;
                        }
                    }
                    Err(error) => warn!(%event, %error, "non-JSON event data skipped"),
                }
            }
        }
    }
}
