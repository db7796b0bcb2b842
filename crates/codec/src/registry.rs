use std::collections::BTreeSet;

pub(crate) const TIMESTAMP: &str = "timestamp";
pub(crate) const DURATION: &str = "duration";
pub(crate) const URI: &str = "uri";
pub(crate) const BIGINT: &str = "bigint";
pub(crate) const PATTERN: &str = "regex";

/// Registry of semantic type names the decoder accepts.
///
/// Passed explicitly to [`crate::decode_record`] rather than living in
/// a process global, so tests and recovery paths control exactly what
/// is registered.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    names: BTreeSet<String>,
}

impl TypeRegistry {
    /// Registry with no semantic types at all.
    pub fn empty() -> Self {
        TypeRegistry {
            names: BTreeSet::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }
}

impl Default for TypeRegistry {
    /// The five built-in semantic types.
    fn default() -> Self {
        let mut registry = TypeRegistry::empty();
        for name in [TIMESTAMP, DURATION, URI, BIGINT, PATTERN] {
            registry.register(name);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_five_builtins() {
        let registry = TypeRegistry::default();
        assert_eq!(registry.names().count(), 5);
        assert!(registry.is_registered("timestamp"));
        assert!(registry.is_registered("regex"));
        assert!(!registry.is_registered("geo_point"));
    }

    #[test]
    fn unregister_removes() {
        let mut registry = TypeRegistry::default();
        assert!(registry.unregister("uri"));
        assert!(!registry.is_registered("uri"));
        assert!(!registry.unregister("uri"));
    }
}
