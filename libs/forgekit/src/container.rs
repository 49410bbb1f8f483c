//! Service container: name → lazily-constructed singleton.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

type Service = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Container) -> Service + Send + Sync>;

/// Structured errors for container resolution.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("service '{0}' is not registered")]
    ServiceNotFound(String),
    #[error("service '{name}' is not a {expected}")]
    ServiceType { name: String, expected: &'static str },
}

/// Central registry mapping abstract service names to singletons.
///
/// Factories run at most once per name: the first `resolve` constructs the
/// instance under a per-name gate and caches it; later calls (and
/// concurrent callers on other names) never block on that construction.
#[derive(Default)]
pub struct Container {
    factories: RwLock<HashMap<String, Factory>>,
    instances: DashMap<String, Service>,
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<String> = self.factories.read().keys().cloned().collect();
        f.debug_struct("Container")
            .field("registered", &registered)
            .field("instantiated", &self.instances.len())
            .finish()
    }
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a constructor for `name` without invoking it. The factory
    /// receives the container so it can resolve its own collaborators.
    pub fn register<T, F>(&self, name: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> T + Send + Sync + 'static,
    {
        let wrapped: Factory = Arc::new(move |c| Arc::new(factory(c)) as Service);
        self.factories.write().insert(name.into(), wrapped);
    }

    /// Bind an already-built value as the singleton for `name`.
    pub fn bind_instance<T: Send + Sync + 'static>(&self, name: impl Into<String>, value: T) {
        self.instances.insert(name.into(), Arc::new(value) as Service);
    }

    /// Bind an existing shared instance without another layer of `Arc`.
    pub fn bind_arc<T: Send + Sync + 'static>(&self, name: impl Into<String>, value: Arc<T>) {
        self.instances.insert(name.into(), value as Service);
    }

    /// Return the cached singleton for `name`, constructing it on first use.
    pub fn resolve<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        let service = match self.instances.get(name) {
            Some(existing) => existing.clone(),
            None => self.construct(name)?,
        };
        service
            .downcast::<T>()
            .map_err(|_| ContainerError::ServiceType {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    fn construct(&self, name: &str) -> Result<Service, ContainerError> {
        // Per-name gate: concurrent first-resolution of the same name runs
        // the factory exactly once, without a container-wide lock.
        let gate = self
            .gates
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock();

        if let Some(existing) = self.instances.get(name) {
            return Ok(existing.clone());
        }

        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::ServiceNotFound(name.to_string()))?;

        // The factory may resolve other names recursively; only this
        // name's gate is held.
        let service = factory(self);
        self.instances.insert(name.to_string(), service.clone());
        Ok(service)
    }

    /// True if `name` has a factory or a bound instance.
    pub fn has(&self, name: &str) -> bool {
        self.instances.contains_key(name) || self.factories.read().contains_key(name)
    }

    /// Evict the cached singleton so the next `resolve` reconstructs it.
    pub fn forget(&self, name: &str) {
        self.instances.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolve_returns_same_instance() {
        let c = Container::new();
        c.register("counter", |_| AtomicUsize::new(7));

        let a = c.resolve::<AtomicUsize>("counter").unwrap();
        let b = c.resolve::<AtomicUsize>("counter").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn forget_forces_reconstruction() {
        let c = Container::new();
        let built = Arc::new(AtomicUsize::new(0));
        let built2 = built.clone();
        c.register("svc", move |_| built2.fetch_add(1, Ordering::SeqCst));

        let first = c.resolve::<usize>("svc").unwrap();
        assert_eq!(*first, 0);
        assert!(Arc::ptr_eq(
            &first,
            &c.resolve::<usize>("svc").unwrap()
        ));

        c.forget("svc");
        let second = c.resolve::<usize>("svc").unwrap();
        assert_eq!(*second, 1);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregistered_name_errors() {
        let c = Container::new();
        let err = c.resolve::<String>("missing").unwrap_err();
        assert!(matches!(err, ContainerError::ServiceNotFound(n) if n == "missing"));
    }

    #[test]
    fn wrong_type_errors() {
        let c = Container::new();
        c.bind_instance("config", String::from("hi"));
        let err = c.resolve::<usize>("config").unwrap_err();
        assert!(matches!(err, ContainerError::ServiceType { name, .. } if name == "config"));
    }

    #[test]
    fn bind_instance_wins_over_factory() {
        let c = Container::new();
        c.register("val", |_| 1usize);
        c.bind_instance("val", 2usize);
        assert_eq!(*c.resolve::<usize>("val").unwrap(), 2);
    }

    #[test]
    fn factories_may_resolve_other_services() {
        let c = Container::new();
        c.register("base", |_| 10usize);
        c.register("derived", |c: &Container| {
            *c.resolve::<usize>("base").unwrap() + 1
        });
        assert_eq!(*c.resolve::<usize>("derived").unwrap(), 11);
    }

    #[test]
    fn concurrent_resolution_constructs_once() {
        let c = Arc::new(Container::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        c.register("slow", move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            42usize
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || *c.resolve::<usize>("slow").unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
