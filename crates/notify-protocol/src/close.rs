//! WebSocket close codes sent by the gateway.

use std::fmt;

/// Standard normal-closure code (RFC 6455).
pub const CLOSE_NORMAL: u16 = 1000;

/// Application code for a rejected handshake.
pub const CLOSE_BAD_REQUEST: u16 = 4001;

/// Why the gateway closed a connection on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The `key` query parameter was absent or empty.
    EmptyKey,

    /// The key did not resolve in the key store (unknown, expired or used).
    InvalidKey,

    /// The process is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// The close code to put in the close frame.
    pub const fn code(self) -> u16 {
        match self {
            Self::EmptyKey | Self::InvalidKey => CLOSE_BAD_REQUEST,
            Self::ServerShutdown => CLOSE_NORMAL,
        }
    }

    /// The human-readable reason to put in the close frame.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::EmptyKey => "bad request: empty key",
            Self::InvalidKey => "bad request: invalid key",
            Self::ServerShutdown => "server shutting down",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_rejections_share_code() {
        assert_eq!(CloseReason::EmptyKey.code(), 4001);
        assert_eq!(CloseReason::InvalidKey.code(), 4001);
        assert_ne!(CloseReason::EmptyKey.reason(), CloseReason::InvalidKey.reason());
    }

    #[test]
    fn test_shutdown_is_normal_closure() {
        assert_eq!(CloseReason::ServerShutdown.code(), CLOSE_NORMAL);
        assert_eq!(CloseReason::ServerShutdown.reason(), "server shutting down");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            CloseReason::InvalidKey.to_string(),
            "bad request: invalid key (4001)"
        );
    }
}
