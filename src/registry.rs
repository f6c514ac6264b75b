//! Named components handed to automation scripts.
//!
//! Scripts receive their collaborators from a [`ComponentRegistry`] by name.
//! A registry may inherit from a parent; its own entries shadow the parent's.
//! Factories build a fresh component for each script, such as the per-script
//! logger from [`ScriptLoggerFactory`].

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::logging::{MarkedLogger, SCRIPT_MARKER};

/// Shared, type-erased component.
pub type Component = Arc<dyn Any + Send + Sync>;

/// Errors raised while registering components.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// The component name was empty.
    #[error("component name must not be empty")]
    EmptyName,
    /// The registry already holds a component with this name.
    #[error("component {name} is already registered")]
    Duplicate {
        /// Conflicting name.
        name: String,
    },
}

/// Identity of the script a component is built for.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ScriptInfo {
    /// Group the script belongs to.
    pub group: String,
    /// Script name within the group.
    pub name: String,
}

impl ScriptInfo {
    /// Creates script metadata.
    #[must_use]
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ScriptInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// Builds a component for each script that asks for it.
pub trait ComponentFactory: Send + Sync {
    /// Name the component is bound to in the script.
    fn property_name(&self) -> &str;

    /// Builds the component for `script`.
    fn create(&self, script: &ScriptInfo) -> Component;
}

/// Binds a [`MarkedLogger`] named `<group>:<name>` as `Log`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScriptLoggerFactory;

impl ScriptLoggerFactory {
    /// Property name of the logger.
    pub const PROPERTY: &'static str = "Log";
}

impl ComponentFactory for ScriptLoggerFactory {
    fn property_name(&self) -> &str {
        Self::PROPERTY
    }

    fn create(&self, script: &ScriptInfo) -> Component {
        Arc::new(MarkedLogger::new(script.to_string(), SCRIPT_MARKER))
    }
}

/// Registry of named components with an optional parent.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    parent: Option<Arc<ComponentRegistry>>,
    components: BTreeMap<String, Component>,
    factories: Vec<Arc<dyn ComponentFactory>>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("has_parent", &self.parent.is_some())
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl ComponentRegistry {
    /// Creates an empty root registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry inheriting from `parent`.
    #[must_use]
    pub fn with_parent(parent: Arc<Self>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Registers `component` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyName`] for an empty name and
    /// [`RegistryError::Duplicate`] when this registry already binds it.
    /// Shadowing a parent entry is allowed.
    pub fn register<T>(&mut self, name: &str, component: T) -> Result<(), RegistryError>
    where
        T: Any + Send + Sync,
    {
        self.register_shared(name, Arc::new(component))
    }

    /// Registers an already shared component under `name`.
    ///
    /// # Errors
    ///
    /// Same as [`ComponentRegistry::register`].
    pub fn register_shared(&mut self, name: &str, component: Component) -> Result<(), RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.components.contains_key(name) {
            return Err(RegistryError::Duplicate {
                name: name.to_owned(),
            });
        }
        self.components.insert(name.to_owned(), component);
        Ok(())
    }

    /// Adds a per-script factory.
    pub fn register_factory(&mut self, factory: impl ComponentFactory + 'static) {
        self.factories.push(Arc::new(factory));
    }

    /// Looks `name` up here, then in the parents.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Component> {
        self.components
            .get(name)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.get(name)))
    }

    /// Looks `name` up and downcasts it to `T`. Returns `None` when the name
    /// is unbound or bound to another type.
    #[must_use]
    pub fn resolve<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get(name)?.downcast::<T>().ok()
    }

    /// Returns `true` when `name` is bound here or in a parent.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
            || self.parent.as_ref().is_some_and(|parent| parent.contains(name))
    }

    /// Every component visible to `script`: inherited entries, own entries,
    /// then factory products for names not otherwise bound.
    #[must_use]
    pub fn bindings_for(&self, script: &ScriptInfo) -> BTreeMap<String, Component> {
        let mut bindings = self
            .parent
            .as_ref()
            .map(|parent| parent.bindings_for(script))
            .unwrap_or_default();
        bindings.extend(
            self.components
                .iter()
                .map(|(name, component)| (name.clone(), Arc::clone(component))),
        );
        for factory in &self.factories {
            bindings
                .entry(factory.property_name().to_owned())
                .or_insert_with(|| factory.create(script));
        }
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Eq, PartialEq)]
    struct Endpoint(&'static str);

    #[test]
    fn rejects_empty_and_duplicate_names() {
        let mut registry = ComponentRegistry::new();

        assert_eq!(registry.register("", 1_u32), Err(RegistryError::EmptyName));
        assert_eq!(registry.register("retries", 3_u32), Ok(()));
        assert_eq!(
            registry.register("retries", 4_u32),
            Err(RegistryError::Duplicate {
                name: String::from("retries"),
            })
        );
        assert_eq!(registry.resolve::<u32>("retries").as_deref(), Some(&3));
    }

    #[test]
    fn child_inherits_and_shadows_parent_entries() {
        let mut parent = ComponentRegistry::new();
        parent
            .register("endpoint", Endpoint("parent"))
            .unwrap_or_else(|err| panic!("register: {err}"));
        parent
            .register("region", Endpoint("eu"))
            .unwrap_or_else(|err| panic!("register: {err}"));
        let mut child = ComponentRegistry::with_parent(Arc::new(parent));
        child
            .register("endpoint", Endpoint("child"))
            .unwrap_or_else(|err| panic!("register: {err}"));

        assert_eq!(
            child.resolve::<Endpoint>("endpoint").as_deref(),
            Some(&Endpoint("child"))
        );
        assert_eq!(
            child.resolve::<Endpoint>("region").as_deref(),
            Some(&Endpoint("eu"))
        );
        assert!(child.contains("region"));
        assert!(child.resolve::<u32>("region").is_none());
    }

    #[test]
    fn script_logger_factory_binds_named_logger() {
        let mut registry = ComponentRegistry::new();
        registry.register_factory(ScriptLoggerFactory);
        let script = ScriptInfo::new("maintenance", "restart-web");

        let bindings = registry.bindings_for(&script);

        let Some(component) = bindings.get(ScriptLoggerFactory::PROPERTY) else {
            panic!("Log binding missing");
        };
        let Ok(logger) = Arc::clone(component).downcast::<MarkedLogger>() else {
            panic!("Log binding is not a MarkedLogger");
        };
        assert_eq!(logger.name(), "maintenance:restart-web");
        assert_eq!(logger.marker(), SCRIPT_MARKER);
    }

    #[test]
    fn explicit_components_win_over_factories() {
        let mut registry = ComponentRegistry::new();
        registry.register_factory(ScriptLoggerFactory);
        registry
            .register("Log", Endpoint("custom"))
            .unwrap_or_else(|err| panic!("register: {err}"));

        let bindings = registry.bindings_for(&ScriptInfo::new("g", "n"));

        let component = bindings
            .get("Log")
            .cloned()
            .unwrap_or_else(|| panic!("Log binding missing"));
        assert!(component.downcast::<Endpoint>().is_ok());
    }
}
