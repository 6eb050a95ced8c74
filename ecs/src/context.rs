use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

/// Dependency-injection bag handed to system executors.
///
/// Stores one value per type. The scheduler treats the contents as
/// opaque: systems pull what they need by type and declare how they touch
/// it through their [`AccessList`](crate::AccessList); shared mutation
/// goes through interior mutability chosen by the consumer (atomics,
/// locks), which is exactly what a `thread_safe` access asserts.
///
/// # Example
///
/// ```
/// use amaranth_ecs::Context;
///
/// struct FrameTime(f32);
///
/// let mut context = Context::new();
/// context.insert(FrameTime(0.016));
///
/// assert!(context.contains::<FrameTime>());
/// assert_eq!(context.get::<FrameTime>().unwrap().0, 0.016);
/// ```
#[derive(Default)]
pub struct Context {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value of type `T`.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Removes the value of type `T`, returning it if present.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        let entry = self.entries.remove(&TypeId::of::<T>())?;
        Some(*entry.downcast::<T>().expect("entry stored under wrong type"))
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Returns the value of type `T`, if present.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<T>())
    }

    /// Returns the value of type `T`, panicking when absent.
    ///
    /// The panic names the missing type, which is almost always a system
    /// registered before its dependencies were inserted.
    pub fn expect<T: 'static>(&self) -> &T {
        match self.get::<T>() {
            Some(value) => value,
            None => panic!("context is missing a value of type `{}`", type_name::<T>()),
        }
    }

    /// Returns the value of type `T` mutably, if present.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_mut::<T>())
    }
}
