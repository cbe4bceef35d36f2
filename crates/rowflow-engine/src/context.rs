//! Hierarchical pipeline context.
//!
//! A [`Context`] carries cross-stage state that must not travel inside row
//! data: the expression compiler, probed values, named channels, and
//! free-form scoped variables. Each branch gets a [`Context::child`]: reads
//! fall back to the parent, writes land in the child and are invisible to
//! siblings. State meant for siblings must be registered on a common ancestor
//! before branching.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rowflow_types::Value;

use crate::channel::RowChannel;
use crate::expression::ExpressionCompiler;

#[derive(Default)]
struct Store {
    compiler: Option<Arc<dyn ExpressionCompiler>>,
    channel_buffer: Option<usize>,
    probes: HashMap<String, Vec<Value>>,
    channels: HashMap<String, RowChannel>,
    vars: HashMap<(String, String), Value>,
}

struct Node {
    scope: String,
    parent: Option<Arc<Node>>,
    store: Mutex<Store>,
}

impl Node {
    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Walk from this node to the root, returning the first hit.
    fn lookup<T>(&self, find: impl Fn(&Store) -> Option<T>) -> Option<T> {
        if let Some(found) = find(&self.lock()) {
            return Some(found);
        }
        let mut next = self.parent.as_deref();
        while let Some(node) = next {
            if let Some(found) = find(&node.lock()) {
                return Some(found);
            }
            next = node.parent.as_deref();
        }
        None
    }
}

/// Scope-keyed store with parent fallback. Clones share the same node.
#[derive(Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Default for Context {
    fn default() -> Self {
        Self::root()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("path", &self.path()).finish()
    }
}

impl Context {
    /// Create a root context with no parent.
    #[must_use]
    pub fn root() -> Self {
        Self {
            node: Arc::new(Node {
                scope: "root".to_string(),
                parent: None,
                store: Mutex::new(Store::default()),
            }),
        }
    }

    /// Derive a child context. Writes to the child shadow the parent.
    #[must_use]
    pub fn child(&self, scope: impl Into<String>) -> Self {
        Self {
            node: Arc::new(Node {
                scope: scope.into(),
                parent: Some(self.node.clone()),
                store: Mutex::new(Store::default()),
            }),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.node.scope
    }

    /// Slash-separated scope names from the root to this context.
    #[must_use]
    pub fn path(&self) -> String {
        let mut scopes = vec![self.node.scope.as_str()];
        let mut next = self.node.parent.as_deref();
        while let Some(node) = next {
            scopes.push(node.scope.as_str());
            next = node.parent.as_deref();
        }
        scopes.reverse();
        scopes.join("/")
    }

    // ------------------------------------------------------------------
    // Expression compiler
    // ------------------------------------------------------------------

    pub fn set_compiler(&self, compiler: Arc<dyn ExpressionCompiler>) {
        self.node.lock().compiler = Some(compiler);
    }

    #[must_use]
    pub fn compiler(&self) -> Option<Arc<dyn ExpressionCompiler>> {
        self.node.lookup(|store| store.compiler.clone())
    }

    // ------------------------------------------------------------------
    // Fork channels
    // ------------------------------------------------------------------

    /// Buffer length used by fork stages that were not given one. Zero
    /// (the default) means a direct handoff.
    pub fn set_channel_buffer(&self, buffer: usize) {
        self.node.lock().channel_buffer = Some(buffer);
    }

    #[must_use]
    pub fn channel_buffer(&self) -> usize {
        self.node
            .lookup(|store| store.channel_buffer)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Probes
    // ------------------------------------------------------------------

    /// Values captured under `name`, searching ancestors.
    #[must_use]
    pub fn probe(&self, name: &str) -> Option<Vec<Value>> {
        self.node.lookup(|store| store.probes.get(name).cloned())
    }

    /// Value at `index` of the probe `name`, searching ancestors.
    #[must_use]
    pub fn probe_value(&self, name: &str, index: usize) -> Option<Value> {
        self.node
            .lookup(|store| store.probes.get(name).map(|values| values.get(index).cloned()))
            .flatten()
    }

    /// Replace the probe `name` in this context.
    pub fn set_probe(&self, name: impl Into<String>, values: Vec<Value>) {
        self.node.lock().probes.insert(name.into(), values);
    }

    /// Append to the probe `name` in this context, starting from any
    /// inherited values the first time.
    pub fn extend_probe(&self, name: &str, values: impl IntoIterator<Item = Value>) {
        let owned = self.node.lock().probes.contains_key(name);
        let inherited = if owned {
            None
        } else {
            self.node
                .parent
                .as_ref()
                .and_then(|parent| parent.lookup(|store| store.probes.get(name).cloned()))
        };
        let mut store = self.node.lock();
        let entry = store
            .probes
            .entry(name.to_string())
            .or_insert_with(|| inherited.unwrap_or_default());
        entry.extend(values);
    }

    // ------------------------------------------------------------------
    // Named channels
    // ------------------------------------------------------------------

    /// Look up a named channel, searching ancestors; create an unbuffered one
    /// in this context on first use.
    #[must_use]
    pub fn named_channel(&self, name: &str) -> RowChannel {
        if let Some(found) = self.node.lookup(|store| store.channels.get(name).cloned()) {
            return found;
        }
        let mut store = self.node.lock();
        store
            .channels
            .entry(name.to_string())
            .or_insert_with(|| RowChannel::new(0))
            .clone()
    }

    /// Register a channel in this context so every descendant shares it.
    pub fn register_channel(&self, name: impl Into<String>, capacity: usize) -> RowChannel {
        let channel = RowChannel::new(capacity);
        self.node
            .lock()
            .channels
            .insert(name.into(), channel.clone());
        channel
    }

    // ------------------------------------------------------------------
    // Scoped variables
    // ------------------------------------------------------------------

    #[must_use]
    pub fn get(&self, scope: &str, key: &str) -> Option<Value> {
        let k = (scope.to_string(), key.to_string());
        self.node.lookup(|store| store.vars.get(&k).cloned())
    }

    pub fn set(&self, scope: impl Into<String>, key: impl Into<String>, value: Value) {
        self.node
            .lock()
            .vars
            .insert((scope.into(), key.into()), value);
    }
}
