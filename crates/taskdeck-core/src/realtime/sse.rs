use async_trait::async_trait;
use reqwest::{header, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ChangeFeed, FeedChannel};
use crate::api::http::{endpoint, rejection};
use crate::constants::FEED_CHANNEL_CAPACITY;
use crate::error::{TaskError, TaskResult};
use crate::models::ChangeRecord;

/// Event names on the `/tasks/changes` stream.
pub const READY_EVENT: &str = "ready";
pub const CHANGE_EVENT: &str = "change";

/// Payload of the `ready` event that opens every stream.
#[derive(Debug, Deserialize)]
struct ReadyPayload {
    user_id: String,
}

/// Change feed served by the REST backend as server-sent events.
///
/// The server scopes the stream to the identity behind the token, then
/// announces it in a `ready` event. `open` fails if that identity is not the
/// one asked for.
pub struct SseFeed {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl SseFeed {
    /// No request timeout: the stream stays open for as long as the
    /// subscription does.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChangeFeed for SseFeed {
    async fn open(&self, user_id: &str) -> TaskResult<FeedChannel> {
        let url = endpoint(&self.base_url, &["tasks", "changes"])?;
        let mut builder = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let mut response = builder.send().await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let mut decoder = SseDecoder::default();
        let ready = loop {
            match decoder.next_frame() {
                Some(frame) if frame.event == READY_EVENT => break frame,
                Some(_) => continue,
                None => match response.chunk().await? {
                    Some(chunk) => decoder.push(&chunk),
                    None => return Err(TaskError::transport("change stream closed before it was ready")),
                },
            }
        };
        let ready: ReadyPayload = serde_json::from_str(&ready.data)?;
        if ready.user_id != user_id {
            return Err(TaskError::Auth(format!(
                "change stream belongs to {}, not {}",
                ready.user_id, user_id
            )));
        }
        info!(user_id, "change stream ready");

        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(forward_changes(response, decoder, tx));
        Ok(FeedChannel::new(rx, Some(forwarder)))
    }
}

async fn forward_changes(mut response: Response, mut decoder: SseDecoder, tx: mpsc::Sender<ChangeRecord>) {
    loop {
        while let Some(frame) = decoder.next_frame() {
            if frame.event != CHANGE_EVENT {
                continue;
            }
            match serde_json::from_str::<ChangeRecord>(&frame.data) {
                Ok(record) => {
                    if tx.send(record).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "skipping unreadable change event"),
            }
        }

        match response.chunk().await {
            Ok(Some(chunk)) => decoder.push(&chunk),
            Ok(None) => {
                debug!("change stream ended");
                return;
            }
            Err(e) => {
                warn!(error = %e, "change stream dropped");
                return;
            }
        }
    }
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `message` when the frame names no event
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Bytes go in as they arrive,
/// complete frames come out.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));
    }

    /// Next complete frame, if the buffer holds one. Comment-only frames
    /// (keep-alives) come out with empty data.
    pub fn next_frame(&mut self) -> Option<SseFrame> {
        let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
        let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
        let text = String::from_utf8_lossy(&raw);

        let mut event = String::from("message");
        let mut data = Vec::new();
        for line in text.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event = value.to_string(),
                "data" => data.push(value),
                _ => {}
            }
        }

        Some(SseFrame {
            event,
            data: data.join("\n"),
        })
    }
}
