use thiserror::Error;

/// Unified error type for the modflow library.
///
/// The taxonomy mirrors how failures surface to callers: usage errors are
/// fatal and never retried, discovery and remote-call failures carry the
/// underlying transport detail, and invocation failures wrap whatever a
/// module's own computation raised together with enough context to diagnose
/// the call without re-running it.
#[derive(Debug, Error)]
pub enum ModError {
    /// Invalid API usage: unknown phase name, conflicting construction
    /// options, attaching a tunable where none is accepted.
    #[error("Usage error: {message}")]
    Usage { message: String },

    /// Coordination-store access failed while resolving an endpoint.
    #[error("Endpoint discovery failed for module {module_id}: {message}")]
    Discovery {
        module_id: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Remote call returned a non-success HTTP status; `body` holds the
    /// drained response text.
    #[error("Remote call to {url} failed with status {status}: {body}")]
    RemoteCall {
        url: String,
        status: u16,
        body: String,
    },

    /// Transport-level failure before a status line was obtained.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A module's own computation raised. Carries the invoking module's
    /// kind and name, the original arguments and the nested error text so
    /// cross-process failures stay diagnosable.
    #[error(
        "An error occurred in {kind} with name {name:?}.\n\
         Args:\n{args}\nKwargs:\n{kwargs}\nError message:\n{message}\n\
         Original trace:\n{trace}"
    )]
    Invocation {
        kind: String,
        name: Option<String>,
        args: String,
        kwargs: String,
        message: String,
        trace: String,
    },

    /// External launcher failed to start, stop or report on a process.
    #[error("Launcher error during {operation}: {message}")]
    Launcher { operation: String, message: String },

    /// Wire encode/decode failure.
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic internal errors.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModError {
    pub fn usage<S: Into<String>>(message: S) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn discovery<S: Into<String>, M: Into<String>>(module_id: S, message: M) -> Self {
        Self::Discovery {
            module_id: module_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn discovery_with_source<S, M, E>(module_id: S, message: M, source: E) -> Self
    where
        S: Into<String>,
        M: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Discovery {
            module_id: module_id.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn remote_call<U: Into<String>, B: Into<String>>(url: U, status: u16, body: B) -> Self {
        Self::RemoteCall {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    pub fn launcher<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Launcher {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn serialization<S, E>(format: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Usage { .. } => "usage",
            Self::Discovery { .. } => "discovery",
            Self::RemoteCall { .. } => "remote_call",
            Self::Transport(_) => "transport",
            Self::Invocation { .. } => "invocation",
            Self::Launcher { .. } => "launcher",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ModError>;

impl From<serde_json::Error> for ModError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<anyhow::Error> for ModError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }
}
