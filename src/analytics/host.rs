//! Host collaborators
//!
//! The core never inspects its surroundings directly. Environment snapshots,
//! element locators and surface visibility all come from the embedding
//! application through the traits below.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::event::{Metadata, UiElement};

/// Environment snapshot reported with every event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvMeta {
    pub language: String,
    pub page_title: String,
    pub pathname: String,
    pub querystring: String,
    pub referrer: String,
    pub screen_height: u32,
    pub screen_width: u32,
    pub user_agent: String,
    pub timezone: String,
    pub url: String,
}

impl EnvMeta {
    /// Flatten into an event metadata map
    pub fn into_metadata(self) -> Metadata {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Metadata::new(),
        }
    }
}

/// Source of environment snapshots
pub trait EnvironmentSnapshot: Send + Sync {
    fn snapshot(&self) -> EnvMeta;
}

/// A fixed snapshot
impl EnvironmentSnapshot for EnvMeta {
    fn snapshot(&self) -> EnvMeta {
        self.clone()
    }
}

/// Snapshot of the process the library runs in
///
/// The working directory stands in for the page path, the terminal for the
/// screen.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    title: String,
}

impl HostEnvironment {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into() }
    }
}

impl EnvironmentSnapshot for HostEnvironment {
    fn snapshot(&self) -> EnvMeta {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let (screen_width, screen_height) = terminal_size::terminal_size()
            .map(|(w, h)| (u32::from(w.0), u32::from(h.0)))
            .unwrap_or((0, 0));

        let language = std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .map(|lang| lang.split('.').next().unwrap_or_default().replace('_', "-"))
            .unwrap_or_else(|_| "en-US".to_string());

        let timezone = std::env::var("TZ").unwrap_or_else(|_| Local::now().format("%:z").to_string());

        EnvMeta {
            language,
            page_title: self.title.clone(),
            pathname: cwd.display().to_string(),
            querystring: String::new(),
            referrer: std::env::var("BEACON_REFERRER").unwrap_or_default(),
            screen_height,
            screen_width,
            user_agent: format!(
                "beacon/{} ({}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            timezone,
            url: format!("file://{}", cwd.display()),
        }
    }
}

/// Computes a hierarchical locator for an element
pub trait ElementPathResolver: Send + Sync {
    fn resolve(&self, element: &dyn UiElement) -> String;
}

/// CSS-selector style locator: `main > div#signup > button:nth-child(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorPathResolver;

impl SelectorPathResolver {
    fn segment(element: &dyn UiElement) -> String {
        match (element.id(), element.position()) {
            (Some(id), _) => format!("{}#{}", element.tag(), id),
            (None, Some(position)) => format!("{}:nth-child({})", element.tag(), position),
            (None, None) => element.tag().to_string(),
        }
    }
}

impl ElementPathResolver for SelectorPathResolver {
    fn resolve(&self, element: &dyn UiElement) -> String {
        let mut segments = vec![Self::segment(element)];
        let mut current = element.parent();
        while let Some(node) = current {
            segments.push(Self::segment(node.as_ref()));
            current = node.parent();
        }
        segments.reverse();
        segments.join(" > ")
    }
}

/// Answers whether the host surface is currently visible
pub trait VisibilityOracle: Send + Sync {
    fn is_visible(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl VisibilityOracle for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }
}

/// Visible while stdout is attached to a terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalVisibility;

impl VisibilityOracle for TerminalVisibility {
    fn is_visible(&self) -> bool {
        std::io::stdout().is_terminal()
    }
}

/// Shared visibility toggle the host flips as its surface is shown or hidden
#[derive(Debug, Clone)]
pub struct VisibilityFlag(Arc<AtomicBool>);

impl VisibilityFlag {
    pub fn new(visible: bool) -> Self {
        Self(Arc::new(AtomicBool::new(visible)))
    }

    pub fn set_visible(&self, visible: bool) {
        self.0.store(visible, Ordering::SeqCst);
    }
}

impl VisibilityOracle for VisibilityFlag {
    fn is_visible(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bundle of collaborators a provider consults
#[derive(Clone)]
pub struct Host {
    pub environment: Arc<dyn EnvironmentSnapshot>,
    pub paths: Arc<dyn ElementPathResolver>,
    pub visibility: Arc<dyn VisibilityOracle>,
}

impl Host {
    /// Host with the selector path resolver and an always-visible surface
    pub fn new(environment: Arc<dyn EnvironmentSnapshot>) -> Self {
        Self {
            environment,
            paths: Arc::new(SelectorPathResolver),
            visibility: Arc::new(AlwaysVisible),
        }
    }

    pub fn with_visibility(mut self, visibility: Arc<dyn VisibilityOracle>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_path_resolver(mut self, paths: Arc<dyn ElementPathResolver>) -> Self {
        self.paths = paths;
        self
    }
}
