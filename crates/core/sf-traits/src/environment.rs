//! Host environment bindings exposed to scripts.

use hashbrown::HashMap;

/// Property name resolving to the name of the user running the pipeline.
pub const USER_NAME_PROPERTY: &str = "user.name";

/// Host properties a script may observe.
///
/// Scripts never read process state directly; they go through the
/// environment injected when the engine is opened, so tests can substitute
/// a fixed one.
///
/// # Thread Safety
///
/// Environments are shared by every interpreter instance and must be
/// `Send + Sync`.
pub trait HostEnvironment: Send + Sync {
    /// Looks up a host property by name.
    fn property(&self, name: &str) -> Option<String>;

    /// Name of the user running the pipeline.
    fn user_name(&self) -> Option<String> {
        self.property(USER_NAME_PROPERTY)
    }
}

/// Environment backed by the current process.
///
/// `user.name` is read from `USER`, falling back to `USERNAME`; any other
/// property is read from the environment variable of the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

impl HostEnvironment for SystemEnvironment {
    fn property(&self, name: &str) -> Option<String> {
        if name == USER_NAME_PROPERTY {
            return std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .ok();
        }
        std::env::var(name).ok()
    }
}

/// Environment with a fixed set of properties.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    properties: HashMap<String, String>,
}

impl StaticEnvironment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Sets the `user.name` property.
    pub fn with_user_name(self, user: impl Into<String>) -> Self {
        self.with_property(USER_NAME_PROPERTY, user)
    }
}

impl HostEnvironment for StaticEnvironment {
    fn property(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned()
    }
}
