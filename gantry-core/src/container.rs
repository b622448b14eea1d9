// Dependency injection container

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Type-indexed service registry.
///
/// Written during startup, read-mostly afterwards. Missing lookups return
/// `None`; [`Container::must_get`] is the panicking variant for wiring
/// that cannot proceed without its dependency.
#[derive(Clone, Default)]
pub struct Container {
    providers: std::sync::Arc<RwLock<HashMap<TypeId, std::sync::Arc<dyn Any + Send + Sync>>>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance under its concrete type.
    pub fn register<T: Send + Sync + 'static>(&self, instance: T) {
        self.register_arc(std::sync::Arc::new(instance));
    }

    /// Register an already-shared instance under its concrete type.
    pub fn register_arc<T: Send + Sync + 'static>(&self, instance: std::sync::Arc<T>) {
        let type_name = std::any::type_name::<T>();
        trace!(provider = type_name, "registering provider");
        self.providers.write().insert(TypeId::of::<T>(), instance);
        debug!(provider = type_name, "provider registered");
    }

    /// Look up an instance by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<std::sync::Arc<T>> {
        self.providers
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Look up an instance by type, panicking when absent.
    pub fn must_get<T: Send + Sync + 'static>(&self) -> std::sync::Arc<T> {
        match self.get::<T>() {
            Some(instance) => instance,
            None => panic!(
                "provider not registered: {}",
                std::any::type_name::<T>()
            ),
        }
    }

    pub fn has<T: Send + Sync + 'static>(&self) -> bool {
        self.providers.read().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}
