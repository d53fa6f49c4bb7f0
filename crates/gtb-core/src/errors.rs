/// Core error type shared by every crate in the workspace.
///
/// Adapters map their failures into this taxonomy so the dialogue layer can
/// treat them uniformly: log the stage, bump the right counter, degrade or
/// apologize as the situation calls for.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Credential issuance or refresh failed, or the chat endpoint rejected
    /// a freshly issued token.
    #[error("auth error: {0}")]
    Auth(String),

    /// The upstream request ran out of time.
    #[error("upstream timeout: {0}")]
    Timeout(String),

    /// The upstream throttled us past the retry budget.
    #[error("upstream rate limited: {0}")]
    RateLimited(String),

    /// The upstream kept failing with 5xx, or was unreachable.
    #[error("upstream server error: {0}")]
    Server(String),

    /// The upstream answered with something we cannot use: a malformed body
    /// or a non-retryable 4xx.
    #[error("upstream protocol error: {0}")]
    Protocol(String),

    #[error("store error: {0}")]
    Store(String),

    /// Messaging platform failure on the outbound side.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Stable label for logs and counters.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Auth(_) => "auth",
            Error::Timeout(_) => "timeout",
            Error::RateLimited(_) => "rate_limited",
            Error::Server(_) => "server",
            Error::Protocol(_) => "protocol",
            Error::Store(_) => "store",
            Error::Transport(_) => "transport",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_labels_are_stable() {
        assert_eq!(Error::Auth("x".into()).stage(), "auth");
        assert_eq!(Error::RateLimited("x".into()).stage(), "rate_limited");
        assert_eq!(Error::Store("x".into()).stage(), "store");
    }

    #[test]
    fn display_includes_detail() {
        let err = Error::Server("status 502: bad gateway".into());
        assert!(err.to_string().contains("502"), "got: {err}");
    }
}
