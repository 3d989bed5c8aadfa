use crate::codegen::{Emitter, Fragment, Scope};
use crate::graph::BlockInstance;
use anyhow::Result;
use std::collections::BTreeMap;

/// A code-emission rule: a pure function from a block instance (plus the
/// traversal state and the enclosing scope) to an emitted fragment.
pub type EmitRule =
    Box<dyn Fn(&mut Emitter<'_>, &BlockInstance, Scope) -> Result<Fragment> + Send + Sync>;

pub struct RegisteredKind {
    pub rule: EmitRule,
    /// Whether blocks of this kind start a top-level script (event handlers
    /// and procedure definitions). Only top-level blocks of such kinds are
    /// roots; everything else is reachable only through sockets.
    pub top_level: bool,
}

/// Open dispatch table from kind name to emission rule. Populated with the
/// builtin rules at startup; a plugin loader may register further kinds at
/// runtime before compilation.
#[derive(Default)]
pub struct Registry {
    kinds: BTreeMap<String, RegisteredKind>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::codegen::register_builtins(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, kind: &str, top_level: bool, rule: F)
    where
        F: Fn(&mut Emitter<'_>, &BlockInstance, Scope) -> Result<Fragment>
            + Send
            + Sync
            + 'static,
    {
        self.kinds.insert(
            kind.to_string(),
            RegisteredKind {
                rule: Box::new(rule),
                top_level,
            },
        );
    }

    pub fn get(&self, kind: &str) -> Option<&RegisteredKind> {
        self.kinds.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{Fragment, Prec};

    #[test]
    fn plugins_can_register_new_kinds() {
        let mut registry = Registry::with_builtins();
        assert!(!registry.contains("plugin_lucky_number"));
        registry.register("plugin_lucky_number", false, |_cx, _block, _scope| {
            Ok(Fragment::value("7", Prec::Atom))
        });
        assert!(registry.contains("plugin_lucky_number"));
    }

    #[test]
    fn builtin_set_is_sorted_and_nonempty() {
        let registry = Registry::with_builtins();
        let kinds: Vec<&str> = registry.kinds().collect();
        assert!(kinds.len() > 40);
        let mut sorted = kinds.clone();
        sorted.sort_unstable();
        assert_eq!(kinds, sorted);
    }
}
