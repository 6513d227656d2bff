use thiserror::Error;

/// Integration mistakes surfaced by the provider and its context
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("{operation} must be called within an active analytics provider")]
    ProviderInactive { operation: &'static str },

    #[error("analytics provider is already active")]
    AlreadyActive,

    #[error("analytics provider must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("event type must not be empty")]
    EmptyEventType,
}
