//! Event batching core
//!
//! Producers push [`Event`]s into a [`SharedQueue`]. While a [`Provider`] is
//! active it drains that queue on a fixed period and hands each non-empty batch
//! to the single registered [`Listener`], and separately emits a
//! `metadata_heartbeat` event on its own period.
//!
//! Delivery is best-effort and at-most-once: the queue lives in memory only.

pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod host;
pub mod listener;
pub mod queue;
pub mod scheduler;

pub use builder::{BuildOptions, EventBuilder};
pub use config::{AnalyticsConfig, ConfigOverrides, Environment, resolve};
pub use context::AnalyticsContext;
pub use error::AnalyticsError;
pub use event::{ElementRef, Event, EventElement, Metadata, UiElement};
pub use host::{
    AlwaysVisible, ElementPathResolver, EnvMeta, EnvironmentSnapshot, Host, HostEnvironment, SelectorPathResolver,
    TerminalVisibility, VisibilityFlag, VisibilityOracle,
};
pub use listener::{Listener, ListenerSlot};
pub use queue::{EventQueue, SharedQueue};
pub use scheduler::{HEARTBEAT_EVENT_TYPE, Provider};
