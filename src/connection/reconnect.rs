//! Disconnect classification and the reconnect policy.
//!
//! Only read/write timeouts and abnormal closures (peer vanished without a
//! closing handshake) are retried. A negotiated close, a local close, or any
//! other failure ends the client for good.
//!
//! Retries re-run the full connect + authenticate sequence, up to
//! `max_retries` times with a fixed delay between attempts. No backoff, no
//! jitter.

use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{
    error::ProtocolError,
    protocol::{frame::coding::CloseCode, CloseFrame},
    Error as WsError,
};
use tracing::{error, info, warn};

use crate::config::ClientConfig;
use crate::error::Result;

/// Why a session's reader or writer stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// Close was requested locally
    Requested,
    /// Nothing arrived within the read deadline, or a write timed out
    TimedOut,
    /// The connection dropped without a closing handshake
    Abnormal(String),
    /// The peer sent a close frame
    Closed { code: u16, reason: String },
    /// Any other transport failure
    Failed(String),
}

impl Disconnect {
    pub fn from_ws_error(err: &WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Disconnect::Closed {
                code: CloseCode::Normal.into(),
                reason: err.to_string(),
            },
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                Disconnect::Abnormal(err.to_string())
            }
            WsError::Io(io) => match io.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => Disconnect::TimedOut,
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof
                | ErrorKind::BrokenPipe => Disconnect::Abnormal(io.to_string()),
                _ => Disconnect::Failed(io.to_string()),
            },
            other => Disconnect::Failed(other.to_string()),
        }
    }

    pub fn from_close_frame(frame: Option<&CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) if frame.code == CloseCode::Abnormal => {
                Disconnect::Abnormal(frame.reason.to_string())
            }
            Some(frame) => Disconnect::Closed {
                code: frame.code.into(),
                reason: frame.reason.to_string(),
            },
            None => Disconnect::Closed {
                code: CloseCode::Status.into(),
                reason: String::new(),
            },
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Disconnect::TimedOut | Disconnect::Abnormal(_))
    }
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Requested => write!(f, "closed locally"),
            Disconnect::TimedOut => write!(f, "timed out"),
            Disconnect::Abnormal(reason) => write!(f, "abnormal closure: {}", reason),
            Disconnect::Closed { code, reason } => write!(f, "closed by peer ({}) {}", code, reason),
            Disconnect::Failed(reason) => write!(f, "transport failure: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            enabled: config.auto_reconnect,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }

    pub fn should_retry(&self, reason: &Disconnect) -> bool {
        self.enabled && reason.is_recoverable()
    }

    /// Run `attempt` until it succeeds or the retries are exhausted.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for n in 1..=self.max_retries {
            warn!(attempt = n, max = self.max_retries, "Attempting reconnect");

            match attempt(n).await {
                Ok(value) => {
                    info!(attempt = n, "Reconnect successful");
                    return Some(value);
                }
                Err(e) => {
                    warn!(error = %e, attempt = n, "Reconnect failed");
                    if n < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        error!(max = self.max_retries, "Reconnect attempts exhausted");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_retries,
            retry_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_timeouts_and_resets_are_recoverable() {
        let timeout = WsError::Io(io::Error::new(ErrorKind::TimedOut, "read timeout"));
        assert_eq!(Disconnect::from_ws_error(&timeout), Disconnect::TimedOut);

        let reset = WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake);
        assert!(Disconnect::from_ws_error(&reset).is_recoverable());

        let eof = WsError::Io(io::Error::new(ErrorKind::UnexpectedEof, "eof"));
        assert!(Disconnect::from_ws_error(&eof).is_recoverable());
    }

    #[test]
    fn test_normal_close_is_final() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        let reason = Disconnect::from_close_frame(Some(&frame));
        assert_eq!(
            reason,
            Disconnect::Closed {
                code: 1000,
                reason: "bye".into()
            }
        );
        assert!(!reason.is_recoverable());
        assert!(!Disconnect::from_ws_error(&WsError::ConnectionClosed).is_recoverable());
        assert!(!Disconnect::Requested.is_recoverable());
    }

    #[test]
    fn test_abnormal_close_code_is_recoverable() {
        let frame = CloseFrame {
            code: CloseCode::Abnormal,
            reason: "".into(),
        };
        assert!(Disconnect::from_close_frame(Some(&frame)).is_recoverable());
    }

    #[test]
    fn test_disabled_policy_never_retries() {
        let policy = ReconnectPolicy {
            enabled: false,
            ..policy(3)
        };
        assert!(!policy.should_retry(&Disconnect::TimedOut));
        assert!(self::policy(3).should_retry(&Disconnect::TimedOut));
        assert!(!self::policy(3).should_retry(&Disconnect::Failed("tls".into())));
    }

    #[tokio::test]
    async fn test_run_stops_at_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy(5)
            .run(|n| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        Err(ClientError::Transport("refused".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Option<()> = policy(4)
            .run(|_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Transport("refused".into()))
                }
            })
            .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
