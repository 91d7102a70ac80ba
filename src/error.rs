//! Error types for the reflection engine
//!
//! The taxonomy mirrors how failures are handled, not where they arise:
//! configuration errors fail the call immediately, not-found is terminal
//! (success for deletes, failure for gets), remote errors are retried
//! through the queue, and malformed payloads are dropped on the spot.

use thiserror::Error;

/// Main error type for reflection operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A registry or manager was used before it was constructed.
    ///
    /// This is a setup defect, never a transient condition: callers must
    /// not retry it.
    #[error("configuration error: {0}")]
    Config(String),

    /// Object not present in a cache or on the remote cluster
    #[error("{kind} {key} not found")]
    NotFound {
        /// Resource kind that was looked up
        kind: String,
        /// The `namespace/name` key that missed
        key: String,
    },

    /// Object already exists on the target cluster
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Resource kind that was written
        kind: String,
        /// The `namespace/name` key that collided
        key: String,
    },

    /// Kubernetes API error from either side's client
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Watch stream error
    #[error("watch error: {0}")]
    Watch(String),

    /// Resync requested while the namespace's watch is not running
    #[error("watch for {kind} in namespace {namespace} is not established")]
    WatchNotEstablished {
        /// Namespace whose watch is down
        namespace: String,
        /// Resource kind of the cache
        kind: String,
    },

    /// Identity translation failed for a single key (missing NAT mapping,
    /// missing transform input). Aborts that key only.
    #[error("translation error for {key}: {message}")]
    Translation {
        /// The `namespace/name` key being translated
        key: String,
        /// What went wrong
        message: String,
    },

    /// An object came off a watch in an unexpected shape. Logged and
    /// dropped; retrying cannot change already-delivered data.
    #[error("malformed payload: {context}")]
    MalformedPayload {
        /// Where the bad payload was seen
        context: String,
    },

    /// The retry queue exhausted its attempt cap for a key
    #[error("forgetting {key} due to maximum retries reached: {last_error}")]
    MaxRetries {
        /// The key that was given up on
        key: String,
        /// The final handler error
        last_error: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-found error for a kind and key
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a translation error for a key
    pub fn translation(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Translation {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed-payload error with context
    pub fn malformed(context: impl Into<String>) -> Self {
        Self::MalformedPayload {
            context: context.into(),
        }
    }

    /// Whether this error means "the object is already gone".
    ///
    /// Delete-class operations treat this as terminal success: the
    /// desired end state is reached.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Whether this error is worth retrying through the queue.
    ///
    /// Timeouts, conflicts, rate limits, and server-side failures may
    /// recover; configuration, translation, and malformed-payload errors
    /// never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => {
                matches!(resp.code, 409 | 429 | 500 | 502 | 503 | 504)
            }
            Error::Kube(_) | Error::Watch(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using the crate's error type
pub type Result<T> = std::result::Result<T, Error>;
