//! Entity components
//!
//! A component is a unit of data or behavior attached to exactly one entity at
//! a time. Components are stored as trait objects and recovered with the
//! downcast helpers on [`EntityComponent`].

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::EntityId;

/// Stable identity of a component instance.
///
/// Two components with the same id are the same instance, even when one of
/// them is a clone living in another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub Uuid);

impl ComponentId {
    /// Create a fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Type tag of a component, used to index processors.
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    /// Tag of the component type `T`
    #[must_use]
    pub fn of<T: EntityComponent>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Underlying type id
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Identity and ownership shared by every component.
///
/// The owner GUID is set as soon as the component joins an entity, stored or
/// not; the entity handle only once that entity lives in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentCore {
    id: ComponentId,
    owner: Option<Uuid>,
    entity: Option<EntityId>,
}

impl ComponentCore {
    /// New detached core with a fresh id
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Core with a known id, as produced by a deserializer
    #[must_use]
    pub fn with_id(id: ComponentId) -> Self {
        Self {
            id,
            owner: None,
            entity: None,
        }
    }

    /// Component identity
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// GUID of the entity this component belongs to
    #[must_use]
    pub const fn owner(&self) -> Option<Uuid> {
        self.owner
    }

    /// Handle of the stored entity this component is attached to
    #[must_use]
    pub const fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    pub(crate) fn set_owner(&mut self, owner: Option<Uuid>, entity: Option<EntityId>) {
        self.owner = owner;
        self.entity = entity;
    }
}

/// A polymorphic unit of data attached to an entity.
///
/// Implement it with [`impl_entity_component!`](crate::impl_entity_component)
/// rather than by hand.
pub trait EntityComponent: Any + fmt::Debug {
    /// Identity and owner
    fn core(&self) -> &ComponentCore;

    /// Mutable identity and owner
    fn core_mut(&mut self) -> &mut ComponentCore;

    /// Type tag of the concrete component
    fn component_type(&self) -> ComponentType;

    /// Whether several instances of this type may live on one entity
    fn allow_multiple(&self) -> bool {
        false
    }

    /// Upcast for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Owned upcast for downcasting
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl dyn EntityComponent {
    /// Component identity
    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.core().id()
    }

    /// Owning entity, if attached
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        self.core().entity()
    }

    /// Whether the concrete type is `T`
    #[must_use]
    pub fn is<T: EntityComponent>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcast to `T`
    #[must_use]
    pub fn downcast_ref<T: EntityComponent>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast to `T`
    pub fn downcast_mut<T: EntityComponent>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Owned downcast to `T`
    ///
    /// # Errors
    ///
    /// Returns the component unchanged when it is not a `T`
    pub fn downcast<T: EntityComponent>(self: Box<Self>) -> Result<Box<T>, Box<Self>> {
        if self.is::<T>() {
            match self.into_any().downcast::<T>() {
                Ok(component) => Ok(component),
                Err(_) => unreachable!("type checked above"),
            }
        } else {
            Err(self)
        }
    }
}

/// Implements [`EntityComponent`] for a struct holding a `ComponentCore` field.
///
/// ```ignore
/// #[derive(Debug, Default)]
/// struct Health { core: ComponentCore, value: f32 }
/// impl_entity_component!(Health);
///
/// #[derive(Debug, Default)]
/// struct Tag { core: ComponentCore }
/// impl_entity_component!(Tag, allow_multiple);
/// ```
#[macro_export]
macro_rules! impl_entity_component {
    (@impl $ty:ty, $field:ident, $multiple:expr) => {
        impl $crate::ecs::EntityComponent for $ty {
            fn core(&self) -> &$crate::ecs::ComponentCore {
                &self.$field
            }

            fn core_mut(&mut self) -> &mut $crate::ecs::ComponentCore {
                &mut self.$field
            }

            fn component_type(&self) -> $crate::ecs::ComponentType {
                $crate::ecs::ComponentType::of::<$ty>()
            }

            fn allow_multiple(&self) -> bool {
                $multiple
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::std::any::Any> {
                self
            }
        }
    };
    ($ty:ty, allow_multiple) => {
        $crate::impl_entity_component!(@impl $ty, core, true);
    };
    ($ty:ty) => {
        $crate::impl_entity_component!(@impl $ty, core, false);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::testing::{Health, Marker};

    #[test]
    fn test_component_type_identity() {
        assert_eq!(ComponentType::of::<Health>(), ComponentType::of::<Health>());
        assert_ne!(ComponentType::of::<Health>(), ComponentType::of::<Marker>());
        assert_eq!(ComponentType::of::<Health>().short_name(), "Health");
    }

    #[test]
    fn test_downcast() {
        let boxed: Box<dyn EntityComponent> = Box::new(Health::new(5.0));
        assert!(boxed.is::<Health>());
        assert!(boxed.downcast_ref::<Marker>().is_none());
        assert_eq!(boxed.downcast_ref::<Health>().map(|h| h.value), Some(5.0));

        let health = boxed.downcast::<Health>().unwrap();
        assert_eq!(health.value, 5.0);
    }

    #[test]
    fn test_clone_keeps_identity() {
        let health = Health::new(1.0);
        let copy = health.clone();
        assert_eq!(health.core().id(), copy.core().id());
        assert_ne!(Health::new(1.0).core().id(), health.core().id());
    }

    #[test]
    fn test_allow_multiple_flag() {
        assert!(!Health::new(1.0).allow_multiple());
        assert!(Marker::default().allow_multiple());
    }
}
