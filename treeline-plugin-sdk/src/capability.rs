//! UI contributions a plugin can register.

use std::fmt;
use std::sync::Arc;

/// Sidebar section that holds built-in views.
pub const CORE_SECTION: &str = "core";
/// Sidebar section that holds every externally installed plugin's entries.
pub const PLUGINS_SECTION: &str = "plugins";

/// Cleanup callback returned by [`ViewMount::mount`].
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Imperative view renderer: mounts into a host container and returns a
/// function that tears the mounted state down again.
pub trait ViewMount: Send + Sync {
    fn mount(&self, container: &str, props: &serde_json::Value) -> Cleanup;
}

/// How a view's content is produced.
#[derive(Clone)]
pub enum ViewContent {
    /// A named component the host shell knows how to render.
    Component(String),
    /// A mount function owned by the plugin.
    Mount(Arc<dyn ViewMount>),
}

impl fmt::Debug for ViewContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(name) => f.debug_tuple("Component").field(name).finish(),
            Self::Mount(_) => f.write_str("Mount(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct View {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub content: ViewContent,
    /// Whether more than one tab may show this view at a time.
    pub allow_multiple: bool,
}

impl View {
    pub fn component(id: impl Into<String>, name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            content: ViewContent::Component(component.into()),
            allow_multiple: false,
        }
    }

    pub fn mounted(id: impl Into<String>, name: impl Into<String>, mount: Arc<dyn ViewMount>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            content: ViewContent::Mount(mount),
            allow_multiple: false,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn allow_multiple(mut self) -> Self {
        self.allow_multiple = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarSection {
    pub id: String,
    pub title: String,
    pub order: u32,
}

impl SidebarSection {
    pub fn new(id: impl Into<String>, title: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarItem {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
    pub section_id: String,
    /// View opened when the entry is clicked.
    pub view_id: String,
    pub order: u32,
}

impl SidebarItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>, view_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            icon: None,
            section_id: CORE_SECTION.to_string(),
            view_id: view_id.into(),
            order: 1000,
        }
    }

    pub fn in_section(mut self, section_id: impl Into<String>) -> Self {
        self.section_id = section_id.into();
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }
}

/// What a command does when invoked from the palette.
#[derive(Clone)]
pub enum CommandAction {
    OpenView(String),
    Run(Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>),
}

impl fmt::Debug for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenView(view_id) => f.debug_tuple("OpenView").field(view_id).finish(),
            Self::Run(_) => f.write_str("Run(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Command {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub shortcut: Option<String>,
    pub action: CommandAction,
}

impl Command {
    pub fn open_view(id: impl Into<String>, name: impl Into<String>, view_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            shortcut: None,
            action: CommandAction::OpenView(view_id.into()),
        }
    }

    pub fn run<F>(id: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            shortcut: None,
            action: CommandAction::Run(Arc::new(f)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusBarAlignment {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct StatusBarItem {
    pub id: String,
    pub alignment: StatusBarAlignment,
    pub content: ViewContent,
    pub order: u32,
}

impl StatusBarItem {
    pub fn component(id: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alignment: StatusBarAlignment::Left,
            content: ViewContent::Component(component.into()),
            order: 1000,
        }
    }

    pub fn aligned(mut self, alignment: StatusBarAlignment) -> Self {
        self.alignment = alignment;
        self
    }
}
