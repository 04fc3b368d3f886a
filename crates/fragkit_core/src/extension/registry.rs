//! Named sub-component registries owned by one extension.
//!
//! Values are stored type-erased and cloned out on lookup, so registries
//! usually hold `Arc<T>` or `Arc<dyn Trait>`.

use std::any::Any;
use std::collections::BTreeMap;

type CloseHook = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

struct Component {
    instance: Box<dyn Any + Send + Sync>,
    close: Option<CloseHook>,
}

/// Name → instance map for models, repositories, or controllers.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: BTreeMap<String, Component>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T>(&mut self, name: impl Into<String>, instance: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            Component {
                instance: Box::new(instance),
                close: None,
            },
        );
    }

    /// Inserts `instance` together with the hook `close_all` will run for it.
    pub fn insert_closable<T, F>(&mut self, name: impl Into<String>, instance: T, close: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        let target = instance.clone();
        self.entries.insert(
            name.into(),
            Component {
                instance: Box::new(instance),
                close: Some(Box::new(move || close(&target))),
            },
        );
    }

    pub fn get<T>(&self, name: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries
            .get(name)
            .and_then(|component| component.instance.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every close hook once; entries without one are skipped.
    ///
    /// Returns `(name, error)` for each failed hook. One failure does not stop
    /// the others. Hooks are consumed, so a second call closes nothing.
    pub fn close_all(&mut self) -> Vec<(String, String)> {
        self.entries
            .iter_mut()
            .filter_map(|(name, component)| {
                let close = component.close.take()?;
                close().err().map(|err| (name.clone(), err))
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::ComponentRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn stores_and_clones_typed_values() {
        let mut registry = ComponentRegistry::new();
        registry.insert("counter", Arc::new(AtomicUsize::new(3)));

        let counter: Arc<AtomicUsize> = registry.get("counter").expect("registered");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(registry.get::<Arc<String>>("counter").is_none());
        assert_eq!(registry.names(), vec!["counter"]);
    }

    #[test]
    fn close_all_is_best_effort_and_tolerates_missing_hooks() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry = ComponentRegistry::new();
        registry.insert("plain", Arc::new(()));
        registry.insert_closable("broken", Arc::new(()), |_| Err("disk gone".to_string()));
        registry.insert_closable("store", Arc::clone(&closed), |count| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let failures = registry.close_all();
        assert_eq!(failures, vec![("broken".to_string(), "disk gone".to_string())]);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(registry.close_all().is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}
