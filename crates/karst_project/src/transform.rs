// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rigid transforms with uniform scale.

use std::ops::Mul;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position, rotation and uniform scale of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// World or parent-relative position.
    pub position: Vec3,
    /// Unit rotation quaternion.
    pub rotation: Quat,
    /// Uniform scale factor.
    pub scale: f32,
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: 1.0,
    };

    /// Build a transform from its parts.
    pub fn new(position: Vec3, rotation: Quat, scale: f32) -> Transform {
        Transform {
            position,
            rotation,
            scale,
        }
    }

    /// The inverse transform, such that `t * t.inverted()` is identity.
    pub fn inverted(&self) -> Transform {
        let inv_rotation = self.rotation.conjugate();
        let inv_scale = 1.0 / self.scale;
        Transform {
            position: inv_rotation * (-self.position * inv_scale),
            rotation: inv_rotation,
            scale: inv_scale,
        }
    }

    /// Transform a point from local into this transform's space.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * (point * self.scale) + self.position
    }

    /// The rigid (scale-less) part.
    pub fn rigid(&self) -> RigidTransform {
        RigidTransform {
            position: self.position,
            rotation: self.rotation,
        }
    }
}

impl Default for Transform {
    fn default() -> Transform {
        Transform::IDENTITY
    }
}

impl Mul for Transform {
    type Output = Transform;

    /// Composition: the result maps through `rhs`, then through `self`.
    fn mul(self, rhs: Transform) -> Transform {
        Transform {
            position: self.transform_point(rhs.position),
            rotation: self.rotation * rhs.rotation,
            scale: self.scale * rhs.scale,
        }
    }
}

/// Position and rotation without scale, as persisted in entity files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    /// Position.
    pub position: Vec3,
    /// Unit rotation quaternion.
    pub rotation: Quat,
}

impl RigidTransform {
    /// The identity rigid transform.
    pub const IDENTITY: RigidTransform = RigidTransform {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Attach a scale, producing a full [`Transform`].
    pub fn with_scale(self, scale: f32) -> Transform {
        Transform {
            position: self.position,
            rotation: self.rotation,
            scale,
        }
    }
}

impl Default for RigidTransform {
    fn default() -> RigidTransform {
        RigidTransform::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-4, "{a:?} != {b:?}");
    }

    #[test]
    fn compose_then_invert_is_identity() {
        let t = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.7),
            2.0,
        );
        let id = t * t.inverted();
        assert_close(id.position, Vec3::ZERO);
        assert!((id.scale - 1.0).abs() < 1e-5);
    }

    #[test]
    fn local_composition_matches_point_transform() {
        let parent = Transform::new(Vec3::new(5.0, 0.0, 0.0), Quat::from_rotation_z(0.5), 1.5);
        let local = Transform::new(Vec3::new(0.0, 1.0, 0.0), Quat::IDENTITY, 1.0);
        let global = parent * local;
        assert_close(global.position, parent.transform_point(local.position));
    }

    #[test]
    fn compute_local_round_trips() {
        let parent = Transform::new(Vec3::new(-2.0, 4.0, 1.0), Quat::from_rotation_x(1.1), 0.5);
        let child = Transform::new(Vec3::new(3.0, 3.0, 3.0), Quat::from_rotation_y(0.2), 2.0);
        let local = parent.inverted() * child;
        let rebuilt = parent * local;
        assert_close(rebuilt.position, child.position);
        assert!((rebuilt.scale - child.scale).abs() < 1e-5);
    }
}
