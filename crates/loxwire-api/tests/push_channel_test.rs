// Push channel tests against an in-process WebSocket server.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use url::Url;

use loxwire_api::transport::ChannelTransport;
use loxwire_api::websocket::SUBPROTOCOL;
use loxwire_api::{Error, PushChannel, StateUpdate, UpdateSink};

// ── Helpers ─────────────────────────────────────────────────────────

struct ForwardSink(mpsc::UnboundedSender<StateUpdate>);

impl UpdateSink for ForwardSink {
    fn on_update(&self, update: StateUpdate) {
        let _ = self.0.send(update);
    }
}

/// Accept one connection and answer each text frame with the frames the
/// handler returns. A `None` reply closes the connection. Replies to
/// `slow` are held back and sent ahead of the next command's replies.
async fn spawn_server(handler: fn(&str) -> Option<Vec<String>>) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            assert_eq!(req.uri().path(), "/ws/rfc6455");
            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok());
            assert_eq!(offered, Some(SUBPROTOCOL));
            resp.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static(SUBPROTOCOL),
            );
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        let mut held = Vec::new();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            match handler(text.as_str()) {
                Some(replies) if text.as_str() == "slow" => held = replies,
                Some(replies) => {
                    for reply in held.drain(..).chain(replies) {
                        ws.send(Message::text(reply)).await.unwrap();
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    break;
                }
            }
        }
    });

    Url::parse(&format!("ws://{addr}/ws/rfc6455")).unwrap()
}

fn miniserver(command: &str) -> Option<Vec<String>> {
    match command {
        "keepalive" => Some(vec![
            r#"{"uuid":"0f1e-state","value":1}"#.into(),
            r#"{"LL":{"control":"keepalive","Code":"200"}}"#.into(),
        ]),
        "jdev/sps/io/missing/on" => Some(vec![
            r#"{"LL":{"control":"jdev/sps/io/missing/on","Code":"404","value":"no such control"}}"#
                .into(),
        ]),
        "hang" => Some(vec![]),
        "authwithtoken/hash/admin" => Some(vec![
            r#"{"LL":{"control":"authwithtoken/hash/admin","Code":"401"}}"#.into(),
        ]),
        "bye" => None,
        other => Some(vec![format!(
            r#"{{"LL":{{"control":"{other}","Code":"200","value":"1"}}}}"#
        )]),
    }
}

async fn connect(url: &Url) -> (Arc<PushChannel>, mpsc::UnboundedReceiver<StateUpdate>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let channel = PushChannel::connect(url, Arc::new(ForwardSink(tx)), &CancellationToken::new())
        .await
        .unwrap();
    (channel, rx)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_keepalive_and_interleaved_update() {
    let url = spawn_server(miniserver).await;
    let (channel, mut updates) = connect(&url).await;

    let ack = channel.keepalive(&CancellationToken::new()).await.unwrap();
    assert_eq!(ack.control.as_deref(), Some("keepalive"));

    let update = updates.recv().await.unwrap();
    assert_eq!(update.id, "0f1e-state");
    assert_eq!(update.value, "1");

    channel.close().await;
    assert!(channel.is_closed());
}

#[tokio::test]
async fn test_failing_code_is_returned_unchecked() {
    let url = spawn_server(miniserver).await;
    let (channel, _updates) = connect(&url).await;
    let cancel = CancellationToken::new();

    let ack = channel.command("jdev/sps/io/missing/on", &cancel).await.unwrap();
    assert_eq!(ack.code, 404);
    assert!(matches!(
        ack.into_success(),
        Err(Error::Rejected { code: 404, ref message }) if message == "no such control"
    ));

    let ok = channel.command("jdev/sps/io/abc/on", &cancel).await.unwrap();
    assert_eq!(ok.control.as_deref(), Some("jdev/sps/io/abc/on"));
}

#[tokio::test]
async fn test_cancelled_command_frees_the_channel() {
    let url = spawn_server(miniserver).await;
    let (channel, _updates) = connect(&url).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = channel.command("hang", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let ack = channel.keepalive(&CancellationToken::new()).await.unwrap();
    assert!(ack.is_success());
}

#[tokio::test]
async fn test_late_ack_of_cancelled_command_is_not_misrouted() {
    let url = spawn_server(miniserver).await;
    let (channel, _updates) = connect(&url).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = channel.command("slow", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    // The server now answers `slow` with 200 just before the 401 below.
    let ack = channel
        .command("authwithtoken/hash/admin", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(ack.code, 401);
    assert_eq!(ack.control.as_deref(), Some("authwithtoken/hash/admin"));
    assert!(matches!(
        ack.into_auth_success(),
        Err(Error::Authentication { code: 401, .. })
    ));
}

#[tokio::test]
async fn test_server_close_fails_outstanding_and_later_commands() {
    let url = spawn_server(miniserver).await;
    let (channel, _updates) = connect(&url).await;
    let cancel = CancellationToken::new();

    let err = channel.command("bye", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::WebSocketClosed { .. }));

    tokio::time::timeout(Duration::from_secs(1), channel.closed())
        .await
        .unwrap();
    assert!(matches!(
        channel.command("keepalive", &cancel).await,
        Err(Error::WebSocketClosed { .. })
    ));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("ws://{addr}/ws/rfc6455")).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let result =
        PushChannel::connect(&url, Arc::new(ForwardSink(tx)), &CancellationToken::new()).await;
    assert!(matches!(result, Err(Error::WebSocketConnect(_))));
}
