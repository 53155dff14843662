use std::fmt;

/// Classification of a finished fetch that did not succeed
///
/// These are ordinary values flowing through the dispatcher, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Request exceeded its wall-clock timeout
    Timeout,

    /// Connection refused, reset, DNS or TLS failure
    Connection,

    /// HTTP 5xx
    ServerError,

    /// HTTP 429 or equivalent explicit throttling
    RateLimited,

    /// HTTP 4xx other than 429
    ClientError,

    /// Disallowed by the host's robots.txt
    RobotsDisallowed,

    /// Unparseable URL or unsupported scheme
    InvalidUrl,

    /// The fetch task panicked, usually inside the content handler
    Panicked,
}

impl FailureKind {
    /// Returns true if the task may be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection | Self::ServerError | Self::RateLimited
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::ServerError => "server_error",
            Self::RateLimited => "rate_limited",
            Self::ClientError => "client_error",
            Self::RobotsDisallowed => "robots_disallowed",
            Self::InvalidUrl => "invalid_url",
            Self::Panicked => "panicked",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "connection" => Some(Self::Connection),
            "server_error" => Some(Self::ServerError),
            "rate_limited" => Some(Self::RateLimited),
            "client_error" => Some(Self::ClientError),
            "robots_disallowed" => Some(Self::RobotsDisallowed),
            "invalid_url" => Some(Self::InvalidUrl),
            "panicked" => Some(Self::Panicked),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
