//! Function registry: name -> defining document.

use hashbrown::HashMap;
use sf_error::ScriptError;
use sf_types::FunctionRole;

/// A registered script function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionEntry {
    /// Name scripts define the function under.
    pub(crate) name: String,

    /// Name callers resolve (`namespace::name` for namespaced documents).
    pub(crate) qualified_name: String,

    /// Document that defines the function.
    pub(crate) document: String,

    /// Declared parameter counts, ascending.
    ///
    /// More than one only when a single document overloads by arity.
    pub(crate) arities: Vec<usize>,

    /// Index of the compiled program holding the function.
    pub(crate) program: usize,
}

impl FunctionEntry {
    /// Qualified function name.
    pub fn name(&self) -> &str {
        &self.qualified_name
    }

    /// Defining document.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Declared parameter counts.
    pub fn arities(&self) -> &[usize] {
        &self.arities
    }
}

/// Resolved reference to a script function, bound to one library generation.
///
/// Handles are cheap to clone and can be shared between threads. A handle
/// outlives a reload but calling it afterwards fails with
/// [`ScriptError::StaleHandle`].
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionHandle {
    name: String,
    role: FunctionRole,
    document: String,
    generation: u64,
}

impl FunctionHandle {
    /// Qualified function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role the handle was resolved for.
    pub fn role(&self) -> FunctionRole {
        self.role
    }

    /// Document that defined the function at resolve time.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Library generation the handle belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Mapping from function name to the entry that defines it.
///
/// Built once while a library loads and read-only afterwards. There is no
/// overloading across documents: a later document's definition replaces any
/// earlier one with the same name, whatever its arity.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, FunctionEntry>,
    generation: u64,
}

impl FunctionRegistry {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            entries: HashMap::new(),
            generation,
        }
    }

    /// Registers an entry, returning the one it replaces.
    pub(crate) fn register(&mut self, entry: FunctionEntry) -> Option<FunctionEntry> {
        self.entries.insert(entry.qualified_name.clone(), entry)
    }

    /// Resolves a function for use in `role`.
    ///
    /// Arity is not checked here; a mismatch surfaces when the handle is
    /// called.
    pub fn resolve(&self, name: &str, role: FunctionRole) -> Result<FunctionHandle, ScriptError> {
        let entry = self.entries.get(name).ok_or_else(|| ScriptError::NotFound {
            function: name.to_string(),
        })?;

        Ok(FunctionHandle {
            name: entry.qualified_name.clone(),
            role,
            document: entry.document.clone(),
            generation: self.generation,
        })
    }

    /// Looks up the entry behind a handle and checks it is callable.
    pub(crate) fn entry(&self, handle: &FunctionHandle) -> Result<&FunctionEntry, ScriptError> {
        if handle.generation != self.generation {
            return Err(ScriptError::StaleHandle {
                function: handle.name.clone(),
            });
        }

        let entry = self
            .entries
            .get(&handle.name)
            .ok_or_else(|| ScriptError::NotFound {
                function: handle.name.clone(),
            })?;

        let expected = handle.role.arity();
        if !entry.arities.contains(&expected) {
            return Err(ScriptError::Arity {
                function: handle.name.clone(),
                role: handle.role.to_string(),
                expected,
                found: entry.arities.last().copied().unwrap_or(0),
            });
        }

        Ok(entry)
    }

    /// Returns the entry registered under `name`.
    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.entries.get(name)
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Library generation this registry belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, document: &str, arity: usize) -> FunctionEntry {
        FunctionEntry {
            name: name.to_string(),
            qualified_name: name.to_string(),
            document: document.to_string(),
            arities: vec![arity],
            program: 0,
        }
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let registry = FunctionRegistry::new(1);
        let err = registry
            .resolve("nope", FunctionRole::ColumnTransform)
            .unwrap_err();
        assert_eq!(
            err,
            ScriptError::NotFound {
                function: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_later_registration_wins() {
        let mut registry = FunctionRegistry::new(1);
        assert!(registry.register(entry("lowercase", "first", 2)).is_none());

        let replaced = registry.register(entry("lowercase", "second", 2)).unwrap();
        assert_eq!(replaced.document(), "first");

        let handle = registry
            .resolve("lowercase", FunctionRole::ColumnTransform)
            .unwrap();
        assert_eq!(handle.document(), "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_arity_checked_on_entry() {
        let mut registry = FunctionRegistry::new(1);
        registry.register(entry("prop", "doc", 1));

        let handle = registry.resolve("prop", FunctionRole::RowMapper).unwrap();
        let err = registry.entry(&handle).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Arity {
                expected: 2,
                found: 1,
                ..
            }
        ));

        let handle = registry
            .resolve("prop", FunctionRole::ConnectionProperty)
            .unwrap();
        assert!(registry.entry(&handle).is_ok());
    }

    #[test]
    fn test_stale_generation() {
        let mut old = FunctionRegistry::new(1);
        old.register(entry("f", "doc", 1));
        let handle = old.resolve("f", FunctionRole::ConnectionProperty).unwrap();

        let mut new = FunctionRegistry::new(2);
        new.register(entry("f", "doc", 1));

        assert!(matches!(
            new.entry(&handle),
            Err(ScriptError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = FunctionRegistry::new(1);
        registry.register(entry("b", "doc", 1));
        registry.register(entry("a", "doc", 1));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
