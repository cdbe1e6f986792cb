//! Push channel to the Miniserver.
//!
//! One WebSocket connection carries two kinds of traffic: acknowledgements
//! for commands this client sent, and unsolicited state-update frames. A
//! single background reader splits them: acknowledgements go to whichever
//! command is waiting, updates go to an [`UpdateSink`].
//!
//! Commands are serialised. The writer lock is held from send until the
//! acknowledgement arrives, so at most one command is outstanding. An
//! acknowledgement is handed over only when its `control` echoes the
//! outstanding command; a late answer to a cancelled command is dropped.
//!
//! ```rust,ignore
//! let cancel = CancellationToken::new();
//! let channel = PushChannel::connect(&ws_url, sink, &cancel).await?;
//! session.authenticate_channel(channel.as_ref(), &cancel).await?;
//! channel.keepalive(&cancel).await?;
//! channel.close().await;
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::envelope::Envelope;
use crate::error::Error;
use crate::transport::{ChannelTransport, TlsMode};

/// WebSocket subprotocol the Miniserver requires on the upgrade request.
pub const SUBPROTOCOL: &str = "remotecontrol";

/// Command that keeps the connection from being idled out.
pub const KEEPALIVE_COMMAND: &str = "keepalive";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;
type PendingAck = Arc<Mutex<Option<PendingCommand>>>;

/// The command waiting for its acknowledgement.
struct PendingCommand {
    command: String,
    tx: oneshot::Sender<Envelope>,
}

// ── Update frames ────────────────────────────────────────────────────

/// One state update pushed by the Miniserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    /// Opaque state id, matched against the device graph's index.
    pub id: String,
    /// The new value as text. JSON strings arrive unquoted, everything
    /// else as its JSON rendering.
    pub value: String,
    pub message: Option<String>,
}

/// Receiver of unsolicited update frames. Called on the reader task, so
/// implementations must not block.
pub trait UpdateSink: Send + Sync {
    fn on_update(&self, update: StateUpdate);
}

#[derive(Debug, Deserialize)]
struct UpdateFrame {
    #[serde(alias = "uuid")]
    id: String,
    value: Value,
    #[serde(default)]
    message: Option<String>,
}

impl From<UpdateFrame> for StateUpdate {
    fn from(frame: UpdateFrame) -> Self {
        Self {
            id: frame.id,
            value: value_text(&frame.value),
            message: frame.message,
        }
    }
}

/// Render a JSON value as state text: strings verbatim, anything else as
/// JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── PushChannel ──────────────────────────────────────────────────────

/// An open push channel with its reader task.
pub struct PushChannel {
    writer: Mutex<WsWriter>,
    pending: PendingAck,
    closed: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl PushChannel {
    /// Open the WebSocket and spawn the reader.
    ///
    /// The reader stops when `cancel` fires, when [`close`](Self::close) is
    /// called, or when the server ends the stream.
    pub async fn connect(
        url: &Url,
        sink: Arc<dyn UpdateSink>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Self>, Error> {
        tracing::info!(url = %url, "Connecting push channel");

        let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
            |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
        )?;
        let request = ClientRequestBuilder::new(uri).with_sub_protocol(SUBPROTOCOL);

        let (ws_stream, _response) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio_tungstenite::connect_async(request) => {
                result.map_err(|e| Error::WebSocketConnect(e.to_string()))?
            }
        };

        tracing::info!("Push channel connected");

        let (write, read) = ws_stream.split();
        let closed = cancel.child_token();
        let pending: PendingAck = Arc::new(Mutex::new(None));

        let handle = tokio::spawn(read_loop(
            read,
            Arc::clone(&pending),
            sink,
            closed.clone(),
        ));

        Ok(Arc::new(Self {
            writer: Mutex::new(write),
            pending,
            closed,
            reader: Mutex::new(Some(handle)),
        }))
    }

    /// Whether the reader has stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the reader has stopped.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Send the keep-alive command and wait for its acknowledgement.
    pub async fn keepalive(&self, cancel: &CancellationToken) -> Result<Envelope, Error> {
        self.command(KEEPALIVE_COMMAND, cancel).await?.into_success()
    }

    /// Stop the reader, send a close frame, and wait for the reader task.
    pub async fn close(&self) {
        self.closed.cancel();

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::Close(None)).await {
                tracing::debug!(error = %e, "Close frame not delivered");
            }
        }

        if let Some(handle) = self.reader.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Push channel reader panicked");
            }
        }
        tracing::info!("Push channel closed");
    }

    async fn send_and_wait(
        &self,
        writer: &mut WsWriter,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<Envelope, Error> {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(PendingCommand {
            command: command.to_owned(),
            tx,
        });

        tracing::debug!(command = %redact(command), "Sending command");
        writer
            .send(Message::text(command.to_owned()))
            .await
            .map_err(|e| Error::WebSocketClosed {
                reason: e.to_string(),
            })?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            () = self.closed.cancelled() => Err(closed_error()),
            ack = rx => ack.map_err(|_| closed_error()),
        }
    }
}

#[async_trait]
impl ChannelTransport for PushChannel {
    /// Send `command` and return its acknowledgement. The code is not
    /// checked; callers choose between `into_success` and
    /// `into_auth_success`.
    async fn command(&self, command: &str, cancel: &CancellationToken) -> Result<Envelope, Error> {
        let mut writer = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            writer = self.writer.lock() => writer,
        };

        if self.is_closed() {
            return Err(closed_error());
        }

        let result = self.send_and_wait(&mut writer, command, cancel).await;
        if result.is_err() {
            self.pending.lock().await.take();
        }
        result
    }
}

fn closed_error() -> Error {
    Error::WebSocketClosed {
        reason: "push channel closed before the command was acknowledged".into(),
    }
}

/// Commands carry hashes and user names in their path; log only the verb.
fn redact(command: &str) -> &str {
    command.split('/').next().unwrap_or(command)
}

/// Check that the push channel at `url` can honour `tls`.
///
/// `wss` connections verify against the bundled webpki roots only, so a
/// custom CA or accept-invalid mode cannot be applied to them.
pub fn check_tls(url: &Url, tls: &TlsMode) -> Result<(), Error> {
    if url.scheme() != "wss" {
        return Ok(());
    }
    match tls {
        TlsMode::System => Ok(()),
        TlsMode::CustomCa(_) | TlsMode::DangerAcceptInvalid => Err(Error::Tls(format!(
            "push channel {url} only verifies against the public webpki roots; \
             use a ws:// push URL or system TLS verification"
        ))),
    }
}

/// Whether an acknowledgement whose `control` is `control` answers
/// `command`. The Miniserver echoes the command path, sometimes shortened
/// to its leading segments, without the `j` of `jdev`, or percent-decoded.
fn acknowledges(command: &str, control: &str) -> bool {
    let command = normalize_path(command);
    let control = normalize_path(control);
    let (command, control) = (&*command, &*control);
    let extends = |long: &str, short: &str| {
        long.strip_prefix(short)
            .is_some_and(|rest| rest.starts_with('/'))
    };
    command == control || extends(command, control) || extends(control, command)
}

fn normalize_path(path: &str) -> Cow<'_, str> {
    let path = path.trim_start_matches('/');
    let path = path
        .strip_prefix('j')
        .filter(|rest| rest.starts_with("dev/"))
        .unwrap_or(path);
    urlencoding::decode(path).unwrap_or(Cow::Borrowed(path))
}

// ── Reader ───────────────────────────────────────────────────────────

async fn read_loop(
    mut read: WsReader,
    pending: PendingAck,
    sink: Arc<dyn UpdateSink>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => break,
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(&text, &pending, sink.as_ref()).await;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        tracing::trace!("Push channel ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "Push channel close frame received"
                            );
                        } else {
                            tracing::info!("Push channel close frame received (no payload)");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Push channel read error");
                        break;
                    }
                    None => {
                        tracing::info!("Push channel stream ended");
                        break;
                    }
                    Some(Ok(_)) => {
                        tracing::trace!("Ignoring non-text push channel frame");
                    }
                }
            }
        }
    }

    // Wakes any waiting command with WebSocketClosed.
    closed.cancel();
    pending.lock().await.take();
    tracing::debug!("Push channel reader exiting");
}

/// Route one text frame: `LL` envelopes answer the pending command,
/// everything else is treated as update frames.
async fn dispatch_text(text: &str, pending: &PendingAck, sink: &dyn UpdateSink) {
    let root: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse push channel frame");
            return;
        }
    };

    if root.get("LL").is_some() {
        match Envelope::from_value(root) {
            Ok(ack) => deliver_ack(ack, pending).await,
            Err(e) => tracing::debug!(error = %e, "Malformed acknowledgement"),
        }
        return;
    }

    let frames = match root {
        Value::Array(items) => items,
        single => vec![single],
    };

    for frame in frames {
        match serde_json::from_value::<UpdateFrame>(frame) {
            Ok(frame) => sink.on_update(frame.into()),
            Err(e) => tracing::trace!(error = %e, "Skipping frame without id and value"),
        }
    }
}

/// Hand `ack` to the outstanding command if it answers it. An ack without
/// a `control` cannot be correlated and goes to whichever command waits.
async fn deliver_ack(ack: Envelope, pending: &PendingAck) {
    let mut slot = pending.lock().await;
    let answers = match (slot.as_ref(), ack.control.as_deref()) {
        (None, _) => {
            tracing::debug!(control = ?ack.control, "Unsolicited acknowledgement dropped");
            return;
        }
        (Some(waiting), Some(control)) => acknowledges(&waiting.command, control),
        (Some(_), None) => true,
    };

    if !answers {
        tracing::debug!(
            control = %redact(ack.control.as_deref().unwrap_or_default()),
            "Acknowledgement for another command dropped"
        );
        return;
    }
    if let Some(waiting) = slot.take() {
        if waiting.tx.send(ack).is_err() {
            tracing::debug!("Acknowledgement arrived after its command gave up");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(std::sync::Mutex<Vec<StateUpdate>>);

    impl UpdateSink for Collect {
        fn on_update(&self, update: StateUpdate) {
            self.0.lock().unwrap().push(update);
        }
    }

    #[test]
    fn value_text_unquotes_strings_only() {
        assert_eq!(value_text(&serde_json::json!("on")), "on");
        assert_eq!(value_text(&serde_json::json!(1.5)), "1.5");
        assert_eq!(value_text(&serde_json::json!(true)), "true");
        assert_eq!(value_text(&serde_json::json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn redact_keeps_only_the_verb() {
        assert_eq!(redact("authwithtoken/abc/admin"), "authwithtoken");
        assert_eq!(redact("keepalive"), "keepalive");
    }

    async fn waiting_for(command: &str) -> (PendingAck, oneshot::Receiver<Envelope>) {
        let pending: PendingAck = Arc::new(Mutex::new(None));
        let (tx, rx) = oneshot::channel();
        *pending.lock().await = Some(PendingCommand {
            command: command.to_owned(),
            tx,
        });
        (pending, rx)
    }

    #[test]
    fn acknowledges_echoed_paths() {
        assert!(acknowledges("keepalive", "keepalive"));
        assert!(acknowledges("authwithtoken/abc/admin", "authwithtoken"));
        assert!(acknowledges("jdev/sps/io/act-B/on", "dev/sps/io/act-B/on"));
        assert!(acknowledges("refreshjwt/abc/j%C3%B6rg", "refreshjwt/abc/jörg"));
        assert!(acknowledges("jdev/sps/io/A", "jdev/sps/io/A/on"));

        assert!(!acknowledges("authwithtoken/abc/admin", "keepalive"));
        assert!(!acknowledges("jdev/sps/io/A/on", "jdev/sps/io/A/off"));
        assert!(!acknowledges("jdev/sps/io/A/on", "jdev/sps/io/AB/on"));
    }

    #[test]
    fn check_tls_rejects_unverifiable_wss() {
        let wss = Url::parse("wss://ms.local/ws/rfc6455").unwrap();
        let ws = Url::parse("ws://ms.local/ws/rfc6455").unwrap();

        assert!(check_tls(&wss, &TlsMode::System).is_ok());
        assert!(matches!(
            check_tls(&wss, &TlsMode::DangerAcceptInvalid),
            Err(Error::Tls(_))
        ));
        assert!(matches!(
            check_tls(&wss, &TlsMode::CustomCa("ca.pem".into())),
            Err(Error::Tls(_))
        ));
        assert!(check_tls(&ws, &TlsMode::DangerAcceptInvalid).is_ok());
    }

    #[tokio::test]
    async fn ack_goes_to_pending_command() {
        let (pending, rx) = waiting_for("keepalive").await;
        let sink = Collect::default();

        dispatch_text(
            r#"{"LL":{"control":"keepalive","Code":"200"}}"#,
            &pending,
            &sink,
        )
        .await;

        let ack = rx.await.unwrap();
        assert_eq!(ack.control.as_deref(), Some("keepalive"));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_ack_leaves_pending_command_waiting() {
        let (pending, mut rx) = waiting_for("authwithtoken/abc/admin").await;
        let sink = Collect::default();

        dispatch_text(
            r#"{"LL":{"control":"keepalive","Code":"200"}}"#,
            &pending,
            &sink,
        )
        .await;
        assert!(rx.try_recv().is_err());
        assert!(pending.lock().await.is_some());

        dispatch_text(
            r#"{"LL":{"control":"authwithtoken/abc/admin","Code":"401"}}"#,
            &pending,
            &sink,
        )
        .await;
        assert_eq!(rx.await.unwrap().code, 401);
    }

    #[tokio::test]
    async fn update_frames_go_to_sink() {
        let pending: PendingAck = Arc::new(Mutex::new(None));
        let sink = Collect::default();

        dispatch_text(r#"{"uuid":"S1","value":1}"#, &pending, &sink).await;
        dispatch_text(
            r#"[{"id":"S2","value":"on"},{"id":"S3"},{"id":"S4","value":null}]"#,
            &pending,
            &sink,
        )
        .await;
        dispatch_text("garbage", &pending, &sink).await;

        let got = sink.0.lock().unwrap();
        let ids: Vec<_> = got.iter().map(|u| (u.id.as_str(), u.value.as_str())).collect();
        assert_eq!(ids, vec![("S1", "1"), ("S2", "on"), ("S4", "null")]);
    }
}
