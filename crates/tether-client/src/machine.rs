//! Connection state machine (no I/O, no clocks).
//!
//! `Machine::handle(input) -> Vec<Action>`: the driver feeds socket, timer and
//! user inputs in, then executes the returned actions in order. Keeping the
//! transition table pure lets the backoff schedule and every transition be
//! tested without sockets or real time.
//!
//! Lifecycle:
//! `Idle -> Connecting -> Open -> (Closing | socket closed) -> Reconnecting -> Connecting -> ...`
//! until `ClosedByUser`, reached only through [`Input::Close`].

use std::time::Duration;

pub use tether_core::protocol::control::CLOSE_NORMAL;
use tether_core::protocol::control::CLOSE_IDLE;
use tether_core::protocol::Envelope;

use crate::backoff::Backoff;

/// Abnormal closure (no close frame observed).
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Never connected.
    Idle,
    /// Socket open in flight.
    Connecting,
    Open,
    /// User close in progress.
    Closing,
    /// Waiting for the backoff timer.
    Reconnecting,
    /// Lost and auto-reconnect is disabled.
    Closed,
    /// Terminal until the owner calls `connect()` again.
    ClosedByUser,
}

/// Everything that can happen to a connection.
#[derive(Debug, Clone)]
pub enum Input {
    Connect,
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
    SocketOpened,
    OpenFailed(String),
    Frame(Envelope),
    SocketError(String),
    SocketClosed {
        code: Option<u16>,
        reason: String,
    },
    TimerFired,
    WatchdogTick {
        idle_for: Duration,
    },
}

/// Observable notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Open,
    Message(Envelope),
    Error(String),
    Close {
        code: Option<u16>,
        reason: String,
    },
    ReconnectAttempt {
        attempt: u32,
        delay: Duration,
    },
    Reconnected {
        attempt: u32,
    },
    ReconnectFailed {
        attempt: u32,
        error: String,
    },
    IdleTimeout {
        idle_for: Duration,
    },
}

/// Side effects for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenSocket,
    CloseSocket { code: u16, reason: String },
    ScheduleReconnect(Duration),
    CancelReconnect,
    StartWatchdog,
    StopWatchdog,
    Emit(ClientEvent),
}

#[derive(Debug, Clone)]
pub struct Machine {
    state: ConnState,
    backoff: Backoff,
    auto_reconnect: bool,
    idle_timeout: Option<Duration>,
    user_closed: bool,
    /// Reconnect attempts in the current outage (0 = first connect).
    attempt: u32,
}

impl Machine {
    pub fn new(backoff: Backoff, auto_reconnect: bool, idle_timeout: Option<Duration>) -> Self {
        Self {
            state: ConnState::Idle,
            backoff,
            auto_reconnect,
            idle_timeout,
            user_closed: false,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn user_closed(&self) -> bool {
        self.user_closed
    }

    /// Delay the next scheduled reopen waits for.
    pub fn current_delay(&self) -> Duration {
        self.backoff.current()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        use ConnState::*;

        match input {
            Input::Connect => match self.state {
                Connecting | Open => Vec::new(),
                Reconnecting => {
                    self.user_closed = false;
                    self.state = Connecting;
                    vec![Action::CancelReconnect, Action::OpenSocket]
                }
                Idle | Closed | ClosedByUser | Closing => {
                    self.user_closed = false;
                    self.attempt = 0;
                    self.backoff.reset();
                    self.state = Connecting;
                    vec![Action::CancelReconnect, Action::OpenSocket]
                }
            },

            Input::Close { code, reason } => {
                self.user_closed = true;
                let mut out = vec![Action::CancelReconnect, Action::StopWatchdog];
                match self.state {
                    Connecting | Open => {
                        self.state = Closing;
                        out.push(Action::CloseSocket {
                            code: code.unwrap_or(CLOSE_NORMAL),
                            reason: reason.unwrap_or_default(),
                        });
                    }
                    Reconnecting => {
                        self.state = ClosedByUser;
                        out.push(Action::Emit(ClientEvent::Close {
                            code,
                            reason: reason.unwrap_or_default(),
                        }));
                    }
                    Idle | Closed => self.state = ClosedByUser,
                    Closing | ClosedByUser => {}
                }
                out
            }

            Input::SocketOpened => match self.state {
                Connecting => {
                    self.state = Open;
                    let reconnected = self.attempt;
                    self.attempt = 0;
                    self.backoff.reset();
                    let mut out = Vec::new();
                    if self.idle_timeout.is_some() {
                        out.push(Action::StartWatchdog);
                    }
                    out.push(Action::Emit(ClientEvent::Open));
                    if reconnected > 0 {
                        out.push(Action::Emit(ClientEvent::Reconnected {
                            attempt: reconnected,
                        }));
                    }
                    out
                }
                Closing => vec![Action::CloseSocket {
                    code: CLOSE_NORMAL,
                    reason: String::new(),
                }],
                _ => Vec::new(),
            },

            Input::OpenFailed(error) => match self.state {
                Connecting => {
                    let mut out = vec![Action::Emit(ClientEvent::Error(error.clone()))];
                    if self.attempt > 0 {
                        self.backoff.grow();
                        out.push(Action::Emit(ClientEvent::ReconnectFailed {
                            attempt: self.attempt,
                            error,
                        }));
                    } else {
                        out.push(Action::Emit(ClientEvent::Close {
                            code: Some(CLOSE_ABNORMAL),
                            reason: error,
                        }));
                    }
                    out.extend(self.lost());
                    out
                }
                Closing => {
                    self.state = ClosedByUser;
                    vec![Action::Emit(ClientEvent::Close {
                        code: None,
                        reason: error,
                    })]
                }
                _ => Vec::new(),
            },

            Input::Frame(env) => match self.state {
                Open => vec![Action::Emit(ClientEvent::Message(env))],
                _ => Vec::new(),
            },

            Input::SocketError(e) => match self.state {
                Connecting | Open | Closing => vec![Action::Emit(ClientEvent::Error(e))],
                _ => Vec::new(),
            },

            Input::SocketClosed { code, reason } => match self.state {
                Open | Connecting => {
                    let mut out = vec![
                        Action::StopWatchdog,
                        Action::Emit(ClientEvent::Close { code, reason }),
                    ];
                    if self.user_closed {
                        self.state = ClosedByUser;
                    } else {
                        out.extend(self.lost());
                    }
                    out
                }
                Closing => {
                    self.state = ClosedByUser;
                    vec![
                        Action::StopWatchdog,
                        Action::Emit(ClientEvent::Close { code, reason }),
                    ]
                }
                _ => Vec::new(),
            },

            Input::TimerFired => match self.state {
                Reconnecting if !self.user_closed => {
                    self.state = Connecting;
                    vec![Action::OpenSocket]
                }
                _ => Vec::new(),
            },

            Input::WatchdogTick { idle_for } => match (self.state, self.idle_timeout) {
                (Open, Some(limit)) if idle_for >= limit => vec![
                    Action::StopWatchdog,
                    Action::Emit(ClientEvent::IdleTimeout { idle_for }),
                    Action::CloseSocket {
                        code: CLOSE_IDLE,
                        reason: "idle timeout".into(),
                    },
                ],
                _ => Vec::new(),
            },
        }
    }

    /// Connection gone without a user close: schedule the next attempt or stop.
    fn lost(&mut self) -> Vec<Action> {
        if !self.auto_reconnect {
            self.state = ConnState::Closed;
            return Vec::new();
        }
        self.state = ConnState::Reconnecting;
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.backoff.current();
        vec![
            Action::Emit(ClientEvent::ReconnectAttempt {
                attempt: self.attempt,
                delay,
            }),
            Action::ScheduleReconnect(delay),
        ]
    }
}
