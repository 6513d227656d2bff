//! beacon - buffers interaction events, batches them on a timer and hands
//! each batch to a single registered consumer.

pub mod analytics;
pub mod observability;

pub use analytics::{
    AnalyticsConfig, AnalyticsContext, AnalyticsError, BuildOptions, ConfigOverrides, Environment, Event,
    EventBuilder, Host, Listener, Metadata, Provider, SharedQueue,
};
