//! Realtime channel over the Phoenix-channel websocket protocol
//! (`/realtime/v1/websocket`), subscribing to `postgres_changes`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::auth::{normalize_base_url, AccessTokenProvider};
use crate::logger::Logger;
use crate::platform::runtime::sleep;
use crate::realtime::channel::{ChannelHandle, RealtimeChannel};
use crate::realtime::error::{
    channel_closed, invalid_argument, join_rejected, protocol_error, unavailable, RealtimeResult,
};
use crate::realtime::event::{ChangeEvent, ChangeKind, ChannelTopic};
use crate::store::BookmarkId;
use crate::util::PartialObserver;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/realtime"));

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const PROTOCOL_VERSION: &str = "1.0.0";

type TcpWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WebSocketSink = SplitSink<TcpWebSocket, Message>;
type WebSocketReader = SplitStream<TcpWebSocket>;

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, rename = "ref")]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl Frame {
    fn new(topic: &str, event: &str, payload: Value, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference),
            join_ref: None,
        }
    }

    fn to_message(&self) -> RealtimeResult<Message> {
        serde_json::to_string(self)
            .map(Message::Text)
            .map_err(|err| protocol_error(format!("failed to encode frame: {err}")))
    }
}

struct ActiveChannel {
    topic_name: String,
    sink: Arc<AsyncMutex<WebSocketSink>>,
    closing: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// One websocket connection per subscription; the sync loop holds at most one.
pub struct WebSocketChannel {
    socket_url: Url,
    anon_key: String,
    tokens: Arc<dyn AccessTokenProvider>,
    heartbeat_interval: Duration,
    join_timeout: Duration,
    next_ref: Arc<AtomicU64>,
    next_handle: AtomicU64,
    active: Mutex<HashMap<u64, ActiveChannel>>,
}

impl WebSocketChannel {
    pub fn new(
        project_url: &str,
        anon_key: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> RealtimeResult<Self> {
        let base = normalize_base_url(project_url)
            .map_err(|err| invalid_argument(format!("Invalid project URL: {err}")))?;
        let mut socket_url = base
            .join("realtime/v1/websocket")
            .map_err(|err| invalid_argument(format!("Invalid realtime URL: {err}")))?;
        let scheme = if socket_url.scheme() == "https" { "wss" } else { "ws" };
        socket_url
            .set_scheme(scheme)
            .map_err(|_| invalid_argument("Project URL cannot carry a websocket scheme"))?;
        Ok(Self::from_socket_url(socket_url, anon_key, tokens))
    }

    /// Uses `socket_url` as is, adding the `apikey` and `vsn` parameters.
    pub fn from_socket_url(
        mut socket_url: Url,
        anon_key: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        let anon_key = anon_key.into();
        socket_url
            .query_pairs_mut()
            .append_pair("apikey", &anon_key)
            .append_pair("vsn", PROTOCOL_VERSION);
        Self {
            socket_url,
            anon_key,
            tokens,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            next_ref: Arc::new(AtomicU64::new(0)),
            next_handle: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn socket_url(&self) -> &Url {
        &self.socket_url
    }

    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ActiveChannel>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next_ref(&self) -> String {
        next_ref(&self.next_ref)
    }

    async fn join(
        &self,
        sink: &mut WebSocketSink,
        reader: &mut WebSocketReader,
        topic: &ChannelTopic,
    ) -> RealtimeResult<()> {
        let access_token = self
            .tokens
            .get_token()
            .await
            .map_err(|err| unavailable(format!("failed to obtain access token: {err}")))?
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| self.anon_key.clone());

        let topic_name = topic.name();
        let join_ref = self.next_ref();
        let mut frame = Frame::new(
            &topic_name,
            "phx_join",
            join_payload(topic, &access_token),
            join_ref.clone(),
        );
        frame.join_ref = Some(join_ref.clone());
        sink.send(frame.to_message()?)
            .await
            .map_err(|err| unavailable(format!("failed to send join: {err}")))?;

        match tokio::time::timeout(
            self.join_timeout,
            await_join_reply(reader, &topic_name, &join_ref),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(join_rejected(format!(
                "no reply to join of {topic_name} within {:?}",
                self.join_timeout
            ))),
        }
    }
}

#[async_trait]
impl RealtimeChannel for WebSocketChannel {
    async fn subscribe(
        &self,
        topic: &ChannelTopic,
        observer: PartialObserver<ChangeEvent>,
    ) -> RealtimeResult<ChannelHandle> {
        let (stream, _response) = connect_async(self.socket_url.as_str())
            .await
            .map_err(|err| unavailable(format!("failed to connect websocket: {err}")))?;
        let (mut sink, mut reader) = stream.split();

        if let Err(err) = self.join(&mut sink, &mut reader, topic).await {
            let _ = sink.close().await;
            return Err(err);
        }

        let topic_name = topic.name();
        let sink = Arc::new(AsyncMutex::new(sink));
        let closing = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_changes(
            reader,
            topic.clone(),
            observer,
            closing.clone(),
        ));
        let heartbeat = tokio::spawn(send_heartbeats(
            sink.clone(),
            self.next_ref.clone(),
            self.heartbeat_interval,
        ));

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock_active().insert(
            id,
            ActiveChannel {
                topic_name: topic_name.clone(),
                sink,
                closing,
                reader,
                heartbeat,
            },
        );
        LOGGER.info(format!("joined {topic_name}"));
        Ok(ChannelHandle::new(id))
    }

    async fn unsubscribe(&self, handle: ChannelHandle) -> RealtimeResult<()> {
        let removed = self.lock_active().remove(&handle.id());
        let Some(channel) = removed else {
            LOGGER.debug(format!("{handle} already released"));
            return Ok(());
        };
        channel.closing.store(true, Ordering::SeqCst);
        channel.heartbeat.abort();

        let leave = Frame::new(&channel.topic_name, "phx_leave", json!({}), self.next_ref());
        {
            let mut sink = channel.sink.lock().await;
            if let Err(err) = sink.send(leave.to_message()?).await {
                LOGGER.debug(format!("leave for {} not sent: {err}", channel.topic_name));
            }
            let _ = sink.close().await;
        }
        channel.reader.abort();
        LOGGER.info(format!("left {}", channel.topic_name));
        Ok(())
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        for (_, channel) in self.lock_active().drain() {
            channel.closing.store(true, Ordering::SeqCst);
            channel.heartbeat.abort();
            channel.reader.abort();
        }
    }
}

fn next_ref(counter: &AtomicU64) -> String {
    (counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
}

fn join_payload(topic: &ChannelTopic, access_token: &str) -> Value {
    let mut change = json!({
        "event": topic.events.as_str(),
        "schema": topic.schema,
        "table": topic.collection,
    });
    if let (Some(filter), Some(object)) = (topic.row_filter(), change.as_object_mut()) {
        object.insert("filter".to_string(), Value::String(filter));
    }
    json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
        },
        "access_token": access_token,
    })
}

fn decode_frame(message: Message) -> Option<Frame> {
    let text = match message {
        Message::Text(text) => text,
        Message::Binary(bytes) => String::from_utf8(bytes).ok()?,
        _ => return None,
    };
    match serde_json::from_str(&text) {
        Ok(frame) => Some(frame),
        Err(err) => {
            LOGGER.warn(format!("dropping undecodable realtime frame: {err}"));
            None
        }
    }
}

async fn await_join_reply(
    reader: &mut WebSocketReader,
    topic_name: &str,
    join_ref: &str,
) -> RealtimeResult<()> {
    while let Some(message) = reader.next().await {
        let message =
            message.map_err(|err| unavailable(format!("websocket failed during join: {err}")))?;
        if let Message::Close(_) = message {
            break;
        }
        let Some(frame) = decode_frame(message) else {
            continue;
        };
        if frame.event != "phx_reply"
            || frame.topic != topic_name
            || frame.reference.as_deref() != Some(join_ref)
        {
            continue;
        }
        let status = frame.payload.get("status").and_then(Value::as_str);
        if status == Some("ok") {
            return Ok(());
        }
        let reason = frame
            .payload
            .pointer("/response/reason")
            .and_then(Value::as_str)
            .unwrap_or("join refused");
        return Err(join_rejected(format!("{topic_name}: {reason}")));
    }
    Err(unavailable(format!("socket closed before {topic_name} was joined")))
}

async fn read_changes(
    mut reader: WebSocketReader,
    topic: ChannelTopic,
    observer: PartialObserver<ChangeEvent>,
    closing: Arc<AtomicBool>,
) {
    let topic_name = topic.name();
    let mut reason = String::from("socket closed");
    while let Some(message) = reader.next().await {
        let message = match message {
            Ok(Message::Close(_)) => break,
            Ok(message) => message,
            Err(err) => {
                reason = format!("socket error: {err}");
                break;
            }
        };
        let Some(frame) = decode_frame(message) else {
            continue;
        };
        if frame.topic != topic_name {
            continue;
        }
        match frame.event.as_str() {
            "postgres_changes" => match parse_change(&frame.payload) {
                Ok(event) if topic.matches(&event) => observer.notify_next(&event),
                Ok(_) => {}
                Err(err) => LOGGER.warn(format!("ignoring change frame: {err}")),
            },
            "phx_error" | "phx_close" => {
                reason = format!("server sent {}", frame.event);
                break;
            }
            // Binding failures arrive here after the join was acknowledged.
            "system" if frame.payload.get("status").and_then(Value::as_str) == Some("error") => {
                let message = frame
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified");
                reason = format!("system error: {message}");
                break;
            }
            _ => {}
        }
    }

    if !closing.load(Ordering::SeqCst) {
        LOGGER.warn(format!("{topic_name} dropped: {reason}"));
        observer.notify_error(&channel_closed(format!("{topic_name}: {reason}")));
    }
}

async fn send_heartbeats(
    sink: Arc<AsyncMutex<WebSocketSink>>,
    counter: Arc<AtomicU64>,
    interval: Duration,
) {
    loop {
        sleep(interval).await;
        let frame = Frame::new("phoenix", "heartbeat", json!({}), next_ref(&counter));
        let Ok(message) = frame.to_message() else {
            return;
        };
        if let Err(err) = sink.lock().await.send(message).await {
            LOGGER.debug(format!("heartbeat stopped: {err}"));
            return;
        }
    }
}

fn parse_change(payload: &Value) -> RealtimeResult<ChangeEvent> {
    let data = payload
        .get("data")
        .ok_or_else(|| protocol_error("change frame without data"))?;
    let kind: ChangeKind = data
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| protocol_error("change frame without type"))?
        .parse()?;
    let table = data
        .get("table")
        .and_then(Value::as_str)
        .ok_or_else(|| protocol_error("change frame without table"))?;

    let mut event = ChangeEvent::new(kind, table);
    if let Some(schema) = data.get("schema").and_then(Value::as_str) {
        event.schema = schema.to_string();
    }
    event.commit_timestamp = data
        .get("commit_timestamp")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|timestamp| timestamp.with_timezone(&Utc));

    let rows = [data.get("record"), data.get("old_record")];
    event.record_id = rows
        .iter()
        .flatten()
        .filter_map(|row| row.get("id"))
        .find_map(|id| BookmarkId::deserialize(id).ok());
    event.owner_id = rows
        .iter()
        .flatten()
        .filter_map(|row| row.get("user_id"))
        .find_map(|owner| owner.as_str().map(str::to_string));
    Ok(event)
}
