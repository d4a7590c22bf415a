/// Shared error type used across all linkbridge crates.
///
/// The first six variants are the failure classes the session core and
/// its adapters reason about; `Io` and `Json` wrap infrastructure errors
/// raised by the store backends.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Required external configuration is absent (e.g. no delivery token).
    #[error("configuration: {0}")]
    Configuration(String),

    /// Malformed external request. Never reaches the session state machine.
    #[error("validation: {0}")]
    Validation(String),

    /// An outbound send was attempted while the session is not active.
    #[error("session not ready: {0}")]
    NotReady(String),

    /// Recoverable network or protocol closure.
    #[error("transient connection failure: {0}")]
    TransientConnection(String),

    /// Explicit logout or invalidated credentials.
    #[error("session terminated: {0}")]
    TerminalSession(String),

    /// Credential store or transport I/O failure.
    #[error("dependency: {0}")]
    Dependency(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure came from a collaborator (store, transport,
    /// upstream API) rather than from the caller or the configuration.
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            Error::Dependency(_)
                | Error::Timeout(_)
                | Error::TransientConnection(_)
                | Error::Io(_)
                | Error::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_classification() {
        assert!(Error::Timeout("store put".into()).is_dependency());
        assert!(Error::Dependency("mongo".into()).is_dependency());
        assert!(!Error::Validation("missing 'to'".into()).is_dependency());
        assert!(!Error::NotReady("awaiting link".into()).is_dependency());
        assert!(!Error::Configuration("no token".into()).is_dependency());
    }

    #[test]
    fn display_includes_class() {
        let e = Error::NotReady("state is AwaitingLink".into());
        assert_eq!(e.to_string(), "session not ready: state is AwaitingLink");
    }
}
