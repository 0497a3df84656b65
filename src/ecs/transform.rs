//! Transform component
//!
//! Position, rotation and scale of an entity plus its place in the transform
//! hierarchy. Matrices follow glam's column-vector convention, so a child's
//! world matrix is `parent_world * local`.
//!
//! The world matrix comes from exactly one source, picked at update time:
//! a [`TransformLink`] when one is set, else the parent's world matrix, else
//! the owning scene's world matrix, else identity.

use std::fmt;

use glam::{EulerRot, Mat4, Quat, Vec3};
use smallvec::SmallVec;

use super::component::ComponentCore;
use super::entity::EntityId;
use super::store::EntityStore;

/// Child list of a transform.
pub type TransformChildren = SmallVec<[EntityId; 8]>;

/// Supplies the parent matrix of a transform in place of the hierarchy.
///
/// Used to attach an entity to something that is not a transform, such as a
/// bone or a model node.
pub trait TransformLink: 'static {
    /// Compute the matrix the local matrix is composed with.
    ///
    /// When `recursive` is set the link is expected to bring its own source
    /// up to date first.
    fn compute_matrix(&mut self, store: &mut EntityStore, recursive: bool) -> Mat4;
}

/// Operation run after a transform's world matrix has been recomputed.
pub trait TransformOperation: 'static {
    /// Called with the freshly updated transform.
    fn process(&mut self, entity: EntityId, transform: &mut TransformComponent);
}

impl<F> TransformOperation for F
where
    F: FnMut(EntityId, &mut TransformComponent) + 'static,
{
    fn process(&mut self, entity: EntityId, transform: &mut TransformComponent) {
        self(entity, transform);
    }
}

/// Position, rotation, scale and hierarchy links of an entity.
pub struct TransformComponent {
    core: ComponentCore,
    /// Local position
    pub position: Vec3,
    /// Local rotation
    pub rotation: Quat,
    /// Local scale
    pub scale: Vec3,
    /// When false the local matrix is written by another system
    pub use_trs: bool,
    /// Matrix relative to the parent
    pub local_matrix: Mat4,
    /// Matrix in world space
    pub world_matrix: Mat4,
    pub(crate) parent: Option<EntityId>,
    pub(crate) children: TransformChildren,
    link: Option<Box<dyn TransformLink>>,
    post_operations: Vec<Box<dyn TransformOperation>>,
}

crate::impl_entity_component!(TransformComponent);

impl TransformComponent {
    /// Identity transform
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform at the given position
    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Transform from position, rotation and scale
    #[must_use]
    pub fn from_parts(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
            ..Self::default()
        }
    }

    /// Parent entity in the transform hierarchy
    #[must_use]
    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// Children in insertion order
    #[must_use]
    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    /// Whether a link overrides the hierarchy
    #[must_use]
    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Set or clear the link
    pub fn set_link(&mut self, link: Option<Box<dyn TransformLink>>) {
        self.link = link;
    }

    pub(crate) fn take_link(&mut self) -> Option<Box<dyn TransformLink>> {
        self.link.take()
    }

    pub(crate) fn restore_link(&mut self, link: Box<dyn TransformLink>) {
        if self.link.is_none() {
            self.link = Some(link);
        }
    }

    /// Register an operation to run after each world matrix update
    pub fn push_post_operation(&mut self, operation: impl TransformOperation) {
        self.post_operations.push(Box::new(operation));
    }

    /// Number of registered post operations
    #[must_use]
    pub fn post_operation_count(&self) -> usize {
        self.post_operations.len()
    }

    /// Remove all post operations
    pub fn clear_post_operations(&mut self) {
        self.post_operations.clear();
    }

    /// Run the post operations in registration order.
    pub(crate) fn run_post_operations(&mut self, entity: EntityId) {
        if self.post_operations.is_empty() {
            return;
        }
        let mut operations = std::mem::take(&mut self.post_operations);
        for operation in &mut operations {
            operation.process(entity, self);
        }
        // Operations registered while running are kept after the existing ones
        operations.append(&mut self.post_operations);
        self.post_operations = operations;
    }

    /// Recompute the local matrix from position, rotation and scale.
    ///
    /// Does nothing when `use_trs` is off.
    pub fn update_local_matrix(&mut self) {
        if self.use_trs {
            self.local_matrix =
                Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position);
        }
    }

    /// Rotation as XYZ Euler angles in radians
    #[must_use]
    pub fn rotation_euler_xyz(&self) -> Vec3 {
        let (x, y, z) = self.rotation.to_euler(EulerRot::XYZ);
        Vec3::new(x, y, z)
    }

    /// Set the rotation from XYZ Euler angles in radians
    pub fn set_rotation_euler_xyz(&mut self, euler: Vec3) {
        self.rotation = Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z);
    }

    /// Forward direction (negative Z in local space)
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// Right direction (positive X in local space)
    #[must_use]
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Up direction (positive Y in local space)
    #[must_use]
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// World-space position taken from the world matrix
    #[must_use]
    pub fn world_position(&self) -> Vec3 {
        self.world_matrix.w_axis.truncate()
    }

    /// World-space scale, approximated from the basis vectors
    #[must_use]
    pub fn world_scale(&self) -> Vec3 {
        Vec3::new(
            self.world_matrix.x_axis.truncate().length(),
            self.world_matrix.y_axis.truncate().length(),
            self.world_matrix.z_axis.truncate().length(),
        )
    }

    /// Translate by a delta
    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
    }

    /// Rotate by a quaternion, applied after the current rotation
    pub fn rotate(&mut self, rotation: Quat) {
        self.rotation = rotation * self.rotation;
    }

    /// Transform a local point to world space using the last world matrix
    #[must_use]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.world_matrix.transform_point3(point)
    }

    /// Copy the hierarchy links from another transform.
    pub(crate) fn adopt_links(&mut self, other: &TransformComponent) {
        self.parent = other.parent;
        self.children = other.children.clone();
    }

    pub(crate) fn clear_links(&mut self) {
        self.parent = None;
        self.children.clear();
    }
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self {
            core: ComponentCore::new(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            use_trs: true,
            local_matrix: Mat4::IDENTITY,
            world_matrix: Mat4::IDENTITY,
            parent: None,
            children: SmallVec::new(),
            link: None,
            post_operations: Vec::new(),
        }
    }
}

impl fmt::Debug for TransformComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformComponent")
            .field("id", &self.core.id())
            .field("position", &self.position)
            .field("rotation", &self.rotation)
            .field("scale", &self.scale)
            .field("parent", &self.parent)
            .field("children", &self.children.len())
            .field("linked", &self.link.is_some())
            .field("post_operations", &self.post_operations.len())
            .finish()
    }
}

/// Link that follows another entity's world matrix with a fixed offset.
///
/// The linked transform's world matrix becomes
/// `target_world * offset * local`. When the target has no transform the
/// offset alone is used.
#[derive(Debug, Clone, Copy)]
pub struct EntityTransformLink {
    target: EntityId,
    /// Offset in the target's space, such as a node's model transform
    pub offset: Mat4,
}

impl EntityTransformLink {
    /// Follow `target` with no offset
    #[must_use]
    pub fn new(target: EntityId) -> Self {
        Self {
            target,
            offset: Mat4::IDENTITY,
        }
    }

    /// Follow `target` with an offset
    #[must_use]
    pub fn with_offset(target: EntityId, offset: Mat4) -> Self {
        Self { target, offset }
    }

    /// Entity being followed
    #[must_use]
    pub fn target(&self) -> EntityId {
        self.target
    }
}

impl TransformLink for EntityTransformLink {
    fn compute_matrix(&mut self, store: &mut EntityStore, recursive: bool) -> Mat4 {
        if recursive {
            store.update_world_matrix(self.target);
        }
        match store.transform(self.target) {
            Some(target) => target.world_matrix * self.offset,
            None => self.offset,
        }
    }
}
