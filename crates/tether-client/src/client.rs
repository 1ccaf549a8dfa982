//! Reconnecting client: a thin tokio driver around [`Machine`].
//!
//! One spawned task owns the socket, the reconnect timer and the idle
//! watchdog; callers talk to it through a command channel. Because a single
//! task performs every open, reopen attempts are strictly sequential.
//!
//! Inbound envelopes are published twice: as [`ClientEvent::Message`] on the
//! event broadcast, and through the client's [`EventRouter`] keyed by type.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use tether_core::error::{Result, TetherError};
use tether_core::protocol::{self, Envelope, EventKind, Frame};
use tether_core::router::{EventHandler, EventRouter, HandlerId};

use crate::config::ClientConfig;
use crate::machine::{Action, ClientEvent, ConnState, Input, Machine, CLOSE_ABNORMAL};
use crate::transport::{self, WsStream};

/// Max time spent on a close handshake before the socket is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 256;

type OpenFuture = Pin<Box<dyn Future<Output = Result<WsStream>> + Send>>;

enum Command {
    Connect,
    Send(Envelope),
    SendText(String),
    Close {
        code: Option<u16>,
        reason: Option<String>,
        done: oneshot::Sender<()>,
    },
}

/// Sending half handed to router handlers.
#[derive(Clone)]
pub struct ClientSender {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnState>,
}

impl ClientSender {
    pub fn state(&self) -> ConnState {
        *self.state.borrow()
    }

    /// Queue an envelope; fails with `NotOpen` unless the connection is open.
    pub fn send(&self, env: Envelope) -> Result<()> {
        self.ensure_open()?;
        self.cmd_tx
            .send(Command::Send(env))
            .map_err(|_| TetherError::NotOpen)
    }

    /// Queue a pre-encoded text frame.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.cmd_tx
            .send(Command::SendText(text.into()))
            .map_err(|_| TetherError::NotOpen)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() != ConnState::Open {
            return Err(TetherError::NotOpen);
        }
        Ok(())
    }
}

/// Handle to one logical connection. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    sender: ClientSender,
    events: broadcast::Sender<ClientEvent>,
    router: Arc<EventRouter<ClientSender>>,
}

impl Client {
    /// Validate `cfg` and spawn the connection task (idle until `connect`).
    /// Must be called within a tokio runtime.
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        cfg.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let router = Arc::new(EventRouter::new());

        let sender = ClientSender {
            cmd_tx,
            state: state_rx.clone(),
        };

        let driver = Driver {
            machine: Machine::new(cfg.backoff(), cfg.auto_reconnect, cfg.idle_timeout()),
            cfg,
            cmd_rx,
            weak_cmd_tx: sender.cmd_tx.downgrade(),
            state_tx,
            state_rx,
            events: events.clone(),
            router: Arc::clone(&router),
            socket: None,
            opening: None,
            reconnect_at: None,
            watchdog: None,
            last_activity: Instant::now(),
            out_seq: 0,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            sender,
            events,
            router,
        })
    }

    pub fn connect(&self) {
        let _ = self.sender.cmd_tx.send(Command::Connect);
    }

    pub fn send(&self, env: Envelope) -> Result<()> {
        self.sender.send(env)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.sender.send_text(text)
    }

    /// Close and stop reconnecting. When this returns, the reconnect timer
    /// and idle watchdog are already cancelled.
    pub async fn close(&self, code: Option<u16>, reason: Option<&str>) {
        let (done, wait) = oneshot::channel();
        let cmd = Command::Close {
            code,
            reason: reason.map(str::to_string),
            done,
        };
        if self.sender.cmd_tx.send(cmd).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn state(&self) -> ConnState {
        self.sender.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnState> {
        self.sender.state.clone()
    }

    /// Subscribe to lifecycle and message notifications. Slow receivers lag
    /// (and miss events) rather than stall the connection.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> ClientSender {
        self.sender.clone()
    }

    pub fn router(&self) -> &EventRouter<ClientSender> {
        &self.router
    }

    pub fn on(
        &self,
        kind: impl Into<EventKind>,
        handler: Arc<dyn EventHandler<ClientSender>>,
    ) -> HandlerId {
        self.router.on(kind, handler)
    }

    pub fn off(&self, kind: &EventKind, id: HandlerId) -> bool {
        self.router.off(kind, id)
    }
}

struct Driver {
    cfg: ClientConfig,
    machine: Machine,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    // Weak so dropping every `Client` handle ends the task.
    weak_cmd_tx: mpsc::WeakUnboundedSender<Command>,
    state_tx: watch::Sender<ConnState>,
    state_rx: watch::Receiver<ConnState>,
    events: broadcast::Sender<ClientEvent>,
    router: Arc<EventRouter<ClientSender>>,
    socket: Option<WsStream>,
    opening: Option<OpenFuture>,
    reconnect_at: Option<Instant>,
    watchdog: Option<Interval>,
    last_activity: Instant,
    out_seq: u64,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect) => self.apply(Input::Connect).await,
                    Some(Command::Send(env)) => self.write_envelope(env).await,
                    Some(Command::SendText(text)) => self.write(Message::Text(text)).await,
                    Some(Command::Close { code, reason, done }) => {
                        self.apply(Input::Close { code, reason }).await;
                        let _ = done.send(());
                    }
                    None => {
                        self.apply(Input::Close { code: None, reason: Some("client dropped".into()) }).await;
                        break;
                    }
                },

                res = poll_open(&mut self.opening) => {
                    self.opening = None;
                    match res {
                        Ok(ws) => {
                            self.socket = Some(ws);
                            self.out_seq = 0;
                            self.last_activity = Instant::now();
                            tracing::info!(url = %self.cfg.url, "connection open");
                            self.apply(Input::SocketOpened).await;
                        }
                        Err(e) => {
                            tracing::warn!(url = %self.cfg.url, error = %e, "open failed");
                            self.apply(Input::OpenFailed(e.to_string())).await;
                        }
                    }
                }

                msg = next_message(&mut self.socket) => self.on_message(msg).await,

                _ = sleep_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.apply(Input::TimerFired).await;
                }

                _ = tick_opt(&mut self.watchdog) => {
                    let idle_for = self.last_activity.elapsed();
                    self.apply(Input::WatchdogTick { idle_for }).await;
                }
            }
        }
        tracing::debug!(url = %self.cfg.url, "connection task finished");
    }

    async fn on_message(&mut self, msg: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>) {
        let frame = match msg {
            Some(Ok(Message::Text(s))) => Frame::Text(s),
            Some(Ok(Message::Binary(b))) => Frame::Binary(b.into()),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                self.last_activity = Instant::now();
                return;
            }
            Some(Ok(Message::Frame(_))) => return,
            Some(Ok(Message::Close(cf))) => {
                self.socket = None;
                let (code, reason) = cf
                    .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                    .unwrap_or((None, String::new()));
                self.apply(Input::SocketClosed { code, reason }).await;
                return;
            }
            Some(Err(e)) => {
                self.socket = None;
                let reason = e.to_string();
                self.apply(Input::SocketError(reason.clone())).await;
                self.apply(Input::SocketClosed { code: Some(CLOSE_ABNORMAL), reason }).await;
                return;
            }
            None => {
                self.socket = None;
                self.apply(Input::SocketClosed { code: Some(CLOSE_ABNORMAL), reason: String::new() }).await;
                return;
            }
        };

        self.last_activity = Instant::now();
        let env = protocol::decode(frame);
        tracing::debug!(kind = %env.kind, "frame received");
        self.apply(Input::Frame(env)).await;
    }

    /// Feed one input, then run actions; actions may produce follow-up inputs.
    async fn apply(&mut self, input: Input) {
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            let actions = self.machine.handle(input);
            self.state_tx.send_replace(self.machine.state());
            for action in actions {
                if let Some(next) = self.execute(action).await {
                    pending.push_back(next);
                }
            }
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Input> {
        match action {
            Action::OpenSocket => {
                self.socket = None;
                let url = self.cfg.url.clone();
                let protocols = self.cfg.protocols.clone();
                self.opening = Some(Box::pin(async move { transport::dial(&url, &protocols).await }));
                None
            }
            Action::CloseSocket { code, reason } => {
                self.opening = None;
                if let Some(mut ws) = self.socket.take() {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if timeout(CLOSE_GRACE, ws.close(Some(frame))).await.is_err() {
                        tracing::debug!("close handshake timed out; dropping socket");
                    }
                }
                Some(Input::SocketClosed {
                    code: Some(code),
                    reason,
                })
            }
            Action::ScheduleReconnect(delay) => {
                tracing::info!(url = %self.cfg.url, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Action::StartWatchdog => {
                if let Some(period) = self.cfg.watchdog_period() {
                    let mut iv = interval_at(Instant::now() + period, period);
                    iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.watchdog = Some(iv);
                }
                None
            }
            Action::StopWatchdog => {
                self.watchdog = None;
                None
            }
            Action::Emit(event) => {
                self.emit(event).await;
                None
            }
        }
    }

    async fn emit(&mut self, event: ClientEvent) {
        match &event {
            ClientEvent::Error(e) => tracing::warn!(url = %self.cfg.url, error = %e, "connection error"),
            ClientEvent::ReconnectFailed { attempt, error } => {
                tracing::warn!(url = %self.cfg.url, attempt, error = %error, "reconnect failed")
            }
            ClientEvent::IdleTimeout { idle_for } => {
                tracing::warn!(url = %self.cfg.url, idle_ms = idle_for.as_millis() as u64, "peer idle; forcing close")
            }
            _ => {}
        }

        let routed = match &event {
            ClientEvent::Message(env) => Some(env.clone()),
            _ => None,
        };
        let _ = self.events.send(event);

        if let (Some(env), Some(cmd_tx)) = (routed, self.weak_cmd_tx.upgrade()) {
            let ctx = ClientSender {
                cmd_tx,
                state: self.state_rx.clone(),
            };
            self.router.route(ctx, env).await;
        }
    }

    async fn write_envelope(&mut self, mut env: Envelope) {
        if env.sequence.is_none() {
            self.out_seq += 1;
            env.sequence = Some(self.out_seq);
        }
        match protocol::encode(&env) {
            Ok(text) => self.write(Message::Text(text)).await,
            Err(e) => tracing::warn!(error = %e, "dropping unencodable envelope"),
        }
    }

    async fn write(&mut self, msg: Message) {
        let Some(ws) = self.socket.as_mut() else {
            tracing::debug!("send while not open; frame dropped");
            return;
        };
        if let Err(e) = ws.send(msg).await {
            self.socket = None;
            let reason = e.to_string();
            self.apply(Input::SocketError(reason.clone())).await;
            self.apply(Input::SocketClosed {
                code: Some(CLOSE_ABNORMAL),
                reason,
            })
            .await;
        }
    }
}

async fn poll_open(slot: &mut Option<OpenFuture>) -> Result<WsStream> {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    socket: &mut Option<WsStream>,
) -> Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(iv: &mut Option<Interval>) {
    match iv {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}
