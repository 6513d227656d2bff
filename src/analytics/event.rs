//! Event envelope types
//!
//! An [`Event`] is the normalized record handed to the listener. Producers never
//! construct one by hand; they go through [`EventBuilder`](super::EventBuilder).

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Free-form key/value payload attached to an event
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A node in the host's UI tree
///
/// The core only ever holds a [`Weak`] reference to one of these. It reads the
/// node for identification and path computation and never controls its lifetime.
pub trait UiElement: Send + Sync {
    /// Tag or kind name, e.g. `button`
    fn tag(&self) -> &str;

    /// Host-assigned identifier, if any
    fn id(&self) -> Option<&str> {
        None
    }

    /// Parent node, `None` at the root
    fn parent(&self) -> Option<Arc<dyn UiElement>> {
        None
    }

    /// 1-based position among the parent's children
    fn position(&self) -> Option<usize> {
        None
    }
}

/// Non-owning handle to a UI element
pub type ElementRef = Weak<dyn UiElement>;

/// Element binding of an event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventElement {
    /// Handle to the element the event was raised on. Never serialized.
    #[serde(skip)]
    pub element_ref: Option<ElementRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    /// Hierarchical locator, only present when explicitly requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_path: Option<String>,
}

impl EventElement {
    /// True when nothing is bound
    pub fn is_empty(&self) -> bool {
        self.element_ref.is_none() && self.element_id.is_none() && self.element_path.is_none()
    }
}

/// A normalized interaction event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Producer-assigned category
    #[serde(rename = "type")]
    pub event_type: String,
    /// Producer payload
    pub metadata: Metadata,
    /// Environment snapshot resolved with the provider config
    pub default_metadata: Metadata,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "EventElement::is_empty")]
    pub element: EventElement,
}

impl Event {
    /// Upgrade the element handle, if the element is still alive
    pub fn live_element(&self) -> Option<Arc<dyn UiElement>> {
        self.element.element_ref.as_ref().and_then(Weak::upgrade)
    }
}
