use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced to callers as values.
///
/// The service layer converts infrastructure failures into one of these;
/// the REST bridge turns expected domain failures into `{"error": ...}`
/// payloads and protocol violations into HTTP statuses.
#[derive(Debug, Error)]
pub enum Error {
    /// Local pool config is absent or corrupt. The user needs to (re)join.
    #[error("pool config missing or corrupt: {0}")]
    ConfigMissing(String),

    /// Join token failed to decode or validate. Never retried.
    #[error("invalid join token: {0}")]
    TokenInvalid(String),

    /// Watcher could not be reached after the in-client retry.
    #[error("watcher unreachable: {0}")]
    WatcherUnreachable(String),

    /// Watcher answered with a 4xx/5xx; the body is forwarded verbatim.
    #[error("watcher returned {status}: {detail}")]
    WatcherDomain { status: u16, detail: String },

    /// Container runtime command failed (stderr captured in the message).
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Operation is not valid in the pool's current state.
    #[error("invalid state: {0}")]
    State(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// API key mismatch at the bridge.
    #[error("unauthorised")]
    Unauthorised,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),

    /// `id_field` points at a key the caller did not supply.
    #[error("missing value for id_field source key '{key}'")]
    MissingIdSource { key: String },

    /// A `{{placeholder}}` survived rendering.
    #[error("unresolved template placeholder '{key}'")]
    Unresolved { key: String },

    #[error("invalid template bundle: {0}")]
    Invalid(String),
}

impl Error {
    /// Whether this failure is expected domain behaviour (rendered as an
    /// `{"error": ...}` payload) rather than a protocol violation.
    pub fn is_domain(&self) -> bool {
        !matches!(self, Error::Unauthorised)
    }
}
