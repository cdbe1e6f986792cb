// ── Controller abstraction ──
//
// Full lifecycle management for a Miniserver connection. Handles login,
// the push channel, structure loading, token refresh ahead of every
// dependent call, command dispatch and the keep-alive ticker.

use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use loxwire_api::http::STRUCTURE_FILE_PATH;
use loxwire_api::transport::{ChannelTransport, HttpTransport};
use loxwire_api::websocket::{self, UpdateSink};
use loxwire_api::{AuthSession, Clock, Envelope, MiniserverClient, PushChannel, SessionToken};

use crate::command::{CommandDispatcher, CommandResult};
use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::graph::{BuildOptions, DeviceGraph, GraphBuilder};
use crate::sync::{StateSynchronizer, Subscription};

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The push channel dropped. Commands over HTTP may still work until
    /// the token needs a refresh.
    ChannelLost,
    Failed,
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. A controller connects
/// once; after [`disconnect`](Self::disconnect) build a new one. Dropping
/// the last clone cancels the background tasks and closes the channel.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ClientConfig,
    ws_url: Url,
    http: Arc<dyn HttpTransport>,
    session: AuthSession,
    graph: Arc<ArcSwap<DeviceGraph>>,
    sync: Arc<StateSynchronizer>,
    dispatcher: CommandDispatcher,
    builder: GraphBuilder,
    channel: ArcSwapOption<PushChannel>,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Controller {
    /// Create a controller talking HTTP through `reqwest`. Does NOT
    /// connect; call [`connect()`](Self::connect).
    ///
    /// Fails with a TLS error when the push channel is `wss` and the TLS
    /// mode is anything but system verification.
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        let transport = config.transport();
        let client = MiniserverClient::new(config.url.clone(), &transport)?;
        let ws_url = match &config.ws_url {
            Some(url) => url.clone(),
            None => client.websocket_url()?,
        };
        websocket::check_tls(&ws_url, &transport.tls)?;
        let http: Arc<dyn HttpTransport> = Arc::new(client);
        let session = AuthSession::new(Arc::clone(&http));
        Ok(Self::assemble(config, ws_url, http, session))
    }

    /// Create a controller over a caller-supplied HTTP transport and clock.
    pub fn with_transport(
        config: ClientConfig,
        ws_url: Url,
        http: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = AuthSession::with_clock(Arc::clone(&http), clock);
        Self::assemble(config, ws_url, http, session)
    }

    fn assemble(
        config: ClientConfig,
        ws_url: Url,
        http: Arc<dyn HttpTransport>,
        session: AuthSession,
    ) -> Self {
        let graph = Arc::new(ArcSwap::from_pointee(DeviceGraph::default()));
        let sync = Arc::new(StateSynchronizer::new(Arc::clone(&graph)));
        let builder = GraphBuilder::new(BuildOptions {
            reduced_detail: config.reduced_detail,
        });
        let connection_state = watch::Sender::new(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(ControllerInner {
                dispatcher: CommandDispatcher::new(Arc::clone(&http)),
                config,
                ws_url,
                http,
                session,
                graph,
                sync,
                builder,
                channel: ArcSwapOption::empty(),
                connection_state,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Access the controller configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The authentication session.
    pub fn session(&self) -> &AuthSession {
        &self.inner.session
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Log in, open and authenticate the push channel, load the structure
    /// document, and start the background tasks.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.set_state(ConnectionState::Connecting);

        match self.establish().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!(url = %self.inner.config.url, "connected to Miniserver");
                Ok(())
            }
            Err(e) => {
                if let Some(channel) = self.inner.channel.swap(None) {
                    channel.close().await;
                }
                self.set_state(ConnectionState::Failed);
                warn!(error = %e, "connect failed");
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let cancel = &self.inner.cancel;

        self.inner
            .session
            .login(
                &config.username,
                &config.password,
                config.permission,
                &config.client_info,
                cancel,
            )
            .await?;

        let sink: Arc<dyn UpdateSink> = self.inner.sync.clone();
        let channel = PushChannel::connect(&self.inner.ws_url, sink, cancel).await?;
        self.inner.channel.store(Some(Arc::clone(&channel)));

        self.inner
            .session
            .authenticate_channel(channel.as_ref(), cancel)
            .await?;

        self.fetch_structure(cancel).await?;

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(channel_monitor_task(
            Arc::downgrade(&self.inner),
            channel,
            cancel.clone(),
        )));

        let interval = config.keepalive_interval;
        if !interval.is_zero() {
            handles.push(tokio::spawn(keepalive_task(
                Arc::downgrade(&self.inner),
                interval,
                cancel.clone(),
            )));
        }
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_replace(state);
    }

    /// Disconnect from the Miniserver.
    ///
    /// Cancels background tasks and in-flight operations, closes the push
    /// channel, drops the token, and resets the connection state to
    /// [`Disconnected`](ConnectionState::Disconnected).
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task panicked");
            }
        }

        if let Some(channel) = self.inner.channel.swap(None) {
            channel.close().await;
        }
        self.inner.session.close();

        self.set_state(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    // ── Structure ────────────────────────────────────────────────

    /// Fetch the structure document and publish a freshly built graph.
    ///
    /// On any failure, cancellation included, the previously published
    /// graph stays in place.
    pub async fn load_structure(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<DeviceGraph>, CoreError> {
        let op = self.inner.cancel.child_token();
        until_cancelled(cancel, &op, self.fetch_structure(&op)).await
    }

    async fn fetch_structure(&self, op: &CancellationToken) -> Result<Arc<DeviceGraph>, CoreError> {
        self.ensure_valid(op).await?;

        let body = self.inner.http.get_text(STRUCTURE_FILE_PATH, op).await?;
        let graph = Arc::new(self.inner.builder.build_from_str(&body)?);

        self.inner.graph.store(Arc::clone(&graph));
        info!(
            devices = graph.len(),
            indexed = graph.index_len(),
            "structure loaded"
        );
        Ok(graph)
    }

    /// The currently published device graph.
    pub fn graph(&self) -> Arc<DeviceGraph> {
        self.inner.graph.load_full()
    }

    // ── Authenticated operations ─────────────────────────────────
    //
    // Each operation runs under a child of the controller token, cancelled
    // early when the caller's token fires.

    /// Send `suffix` to the device registered under `device_id`.
    pub async fn execute(
        &self,
        device_id: &str,
        suffix: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, CoreError> {
        let target = self
            .graph()
            .device(device_id)
            .map(|d| d.command_target_id.clone())
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: device_id.to_owned(),
            })?;

        let op = self.inner.cancel.child_token();
        until_cancelled(cancel, &op, async {
            self.ensure_valid(&op).await?;
            self.inner.dispatcher.dispatch_to(&target, suffix, &op).await
        })
        .await
    }

    /// Authenticated GET of an arbitrary Miniserver path.
    pub async fn request(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Envelope, CoreError> {
        let op = self.inner.cancel.child_token();
        until_cancelled(cancel, &op, async {
            self.ensure_valid(&op).await?;
            let envelope = self.inner.http.get_envelope(path, &op).await?;
            Ok::<_, CoreError>(envelope.into_success()?)
        })
        .await
    }

    /// Authenticated command over the push channel.
    pub async fn command(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<Envelope, CoreError> {
        let op = self.inner.cancel.child_token();
        until_cancelled(cancel, &op, async {
            let channel = self.ensure_valid(&op).await?;
            let ack = channel.command(command, &op).await?;
            Ok::<_, CoreError>(ack.into_success()?)
        })
        .await
    }

    /// Send the keep-alive command.
    pub async fn keepalive(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        let op = self.inner.cancel.child_token();
        until_cancelled(cancel, &op, async {
            let channel = self.ensure_valid(&op).await?;
            channel.keepalive(&op).await?;
            Ok::<_, CoreError>(())
        })
        .await
    }

    /// Refresh the token if it is inside the refresh window. Returns the
    /// push channel the refresh went over.
    async fn ensure_valid(&self, op: &CancellationToken) -> Result<Arc<PushChannel>, CoreError> {
        let channel = self
            .inner
            .channel
            .load_full()
            .ok_or(CoreError::ControllerDisconnected)?;
        let transport: &dyn ChannelTransport = channel.as_ref();
        self.inner
            .session
            .ensure_valid(self.inner.config.refresh_window, transport, op)
            .await?;
        Ok(channel)
    }

    // ── One-shot convenience ─────────────────────────────────────

    /// One-shot: connect, run closure, disconnect.
    ///
    /// Disables the keep-alive ticker since only a single exchange is
    /// expected.
    pub async fn oneshot<F, Fut, T>(config: ClientConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.keepalive_interval = Duration::ZERO;

        let controller = Controller::new(cfg)?;
        controller.connect().await?;
        let result = f(controller.clone()).await;
        controller.disconnect().await;
        result
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Subscribe to device state changes.
    pub fn subscribe_states(&self) -> Subscription {
        self.inner.sync.subscribe()
    }

    pub fn unsubscribe_states(&self, id: u64) -> bool {
        self.inner.sync.unsubscribe(id)
    }

    /// The current session token.
    pub fn token(&self) -> Option<Arc<SessionToken>> {
        self.inner.session.token()
    }
}

// ── Cancellation ─────────────────────────────────────────────────

/// Drive `fut`, which observes `op`. When `cancel` fires first, `op` is
/// cancelled and `fut` is left to wind down so the channel stays usable.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    op: &CancellationToken,
    fut: impl Future<Output = Result<T, CoreError>>,
) -> Result<T, CoreError> {
    let mut fut = std::pin::pin!(fut);
    tokio::select! {
        biased;
        result = &mut fut => result,
        () = cancel.cancelled() => {
            op.cancel();
            fut.await
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────
//
// Tasks hold a weak reference so that dropping the last controller clone
// runs `ControllerInner::drop` and stops them.

/// Periodically send the keep-alive command.
async fn keepalive_task(
    inner: Weak<ControllerInner>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let controller = Controller { inner };
                if let Err(e) = controller.keepalive(&cancel).await {
                    warn!(error = %e, "keep-alive failed");
                }
            }
        }
    }
}

/// Flag the connection when the push channel drops on its own.
async fn channel_monitor_task(
    inner: Weak<ControllerInner>,
    channel: Arc<PushChannel>,
    cancel: CancellationToken,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        () = channel.closed() => {
            if cancel.is_cancelled() {
                return;
            }
            warn!("push channel closed by the Miniserver");
            if let Some(inner) = inner.upgrade() {
                inner.connection_state.send_replace(ConnectionState::ChannelLost);
            }
        }
    }
}
