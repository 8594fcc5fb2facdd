use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
}

/// Name-keyed set of shared entries. Written at startup, read everywhere after.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Registry<T> {
    /// `kind` labels errors, e.g. `"tool"` yields "duplicate tool 'x'".
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn register(&self, name: impl Into<String>, entry: Arc<T>) -> Result<(), RegistryError> {
        let name = name.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&name) {
            return Err(RegistryError::Duplicate {
                kind: self.kind,
                name,
            });
        }
        entries.insert(name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.read().get(name)
            .cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        self.get(name).ok_or_else(|| RegistryError::NotFound {
            kind: self.kind,
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .read()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Entries sorted by name.
    pub fn entries(&self) -> Vec<(String, Arc<T>)> {
        let mut out = self
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry: Registry<str> = Registry::new("tool");
        registry.register("read_file", Arc::from("a")).unwrap();
        let err = registry.register("read_file", Arc::from("b")).unwrap_err();
        assert_eq!(err.to_string(), "duplicate tool 'read_file'");
        assert_eq!(&*registry.get("read_file").unwrap(), "a");
    }

    #[test]
    fn require_reports_missing_entry() {
        let registry: Registry<str> = Registry::new("command");
        let err = registry.require("nope").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { kind: "command", .. }));
    }

    #[test]
    fn names_and_entries_are_sorted() {
        let registry: Registry<u32> = Registry::new("skill");
        registry.register("zeta", Arc::new(1)).unwrap();
        registry.register("alpha", Arc::new(2)).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        assert_eq!(*registry.entries()[0].1, 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn poisoned_lock_keeps_serving() {
        let registry: Arc<Registry<str>> = Arc::new(Registry::new("tool"));
        registry.register("git", Arc::from("g")).unwrap();
        let writer = Arc::clone(&registry);
        let _ = std::thread::spawn(move || {
            let _guard = writer.entries.write().unwrap();
            panic!("writer died");
        })
        .join();
        assert!(registry.entries.is_poisoned());

        assert!(registry.contains("git"));
        registry.register("shell", Arc::from("s")).unwrap();
        assert_eq!(registry.names(), vec!["git", "shell"]);
    }
}
