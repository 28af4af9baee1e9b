use std::fmt;

/// Structured classification of a failed request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    InvalidUrl,
    Connect,
    Timeout,
    Io,
    /// Allocation or socket-buffer exhaustion. GET requests are retried once
    /// over the raw socket path when the session reports this.
    ResourceExhausted,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn wants_raw_fallback(&self) -> bool {
        self.kind == TransportErrorKind::ResourceExhausted
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            ErrorKind::OutOfMemory => TransportErrorKind::ResourceExhausted,
            _ => TransportErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            TransportErrorKind::InvalidUrl => "invalid url",
            TransportErrorKind::Connect => "connect failed",
            TransportErrorKind::Timeout => "timed out",
            TransportErrorKind::Io => "i/o error",
            TransportErrorKind::ResourceExhausted => "out of memory",
            TransportErrorKind::Protocol => "protocol error",
        };
        write!(f, "{}: {}", label, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Failure recorded in a data source's last-error slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Missing or rejected configuration. Retrying will not help; `lines` is
    /// what the display shows.
    Config { message: String, lines: Vec<String> },
    Transport(TransportError),
    Status(u16),
    /// The provider answered with an error body.
    Api(String),
    Parse(String),
}

impl SourceError {
    pub fn config(message: impl Into<String>, lines: &[&str]) -> Self {
        Self::Config {
            message: message.into(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Short text for the panel, at most two rows.
    pub fn display_lines(&self) -> Vec<String> {
        match self {
            Self::Config { lines, .. } => lines.clone(),
            Self::Transport(e) if e.kind == TransportErrorKind::Timeout => {
                vec!["Timed out".into(), "Retrying".into()]
            }
            Self::Transport(_) => vec!["Network error".into(), "Retrying".into()],
            Self::Status(code) => vec!["Server error".into(), format!("HTTP {}", code)],
            Self::Api(msg) => crate::layout::wrap_message(msg, 16, 2),
            Self::Parse(_) => vec!["Bad response".into(), "Retrying".into()],
        }
    }
}

impl From<TransportError> for SourceError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, .. } => write!(f, "config: {}", message),
            Self::Transport(e) => write!(f, "transport: {}", e),
            Self::Status(code) => write!(f, "HTTP status {}", code),
            Self::Api(msg) => write!(f, "api: {}", msg),
            Self::Parse(msg) => write!(f, "parse: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Result of interpreting a response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Retryable(SourceError),
    Fatal(SourceError),
}

impl<T> Outcome<T> {
    pub fn into_result(self) -> Result<T, SourceError> {
        match self {
            Outcome::Ok(v) => Ok(v),
            Outcome::Retryable(e) | Outcome::Fatal(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resource_exhaustion_triggers_fallback() {
        assert!(TransportError::new(TransportErrorKind::ResourceExhausted, "ENOMEM").wants_raw_fallback());
        assert!(!TransportError::new(TransportErrorKind::Timeout, "slow").wants_raw_fallback());
    }

    #[test]
    fn io_errors_are_classified() {
        let err: TransportError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert_eq!(err.kind, TransportErrorKind::Timeout);
        let err: TransportError = std::io::Error::from(std::io::ErrorKind::OutOfMemory).into();
        assert_eq!(err.kind, TransportErrorKind::ResourceExhausted);
    }

    #[test]
    fn config_errors_are_fatal() {
        let err = SourceError::config("stop rejected", &["Bad stop code", "Update config"]);
        assert!(err.is_fatal());
        assert_eq!(err.display_lines(), vec!["Bad stop code", "Update config"]);
        assert!(!SourceError::Status(500).is_fatal());
    }
}
