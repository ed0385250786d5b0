// SPDX-License-Identifier: MIT OR Apache-2.0
//! Render collaborator interface.
//!
//! The editor core never talks to a renderer directly; ray picking,
//! rectangle selection and screen-space queries go through this trait.
//! The headless editor and the test suite plug in stubs.

use glam::{Vec2, Vec3};
use karst_project::{GameObject, Project};

/// Result of a raycast against one picking source.
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    /// Whether anything was hit.
    pub is_hit: bool,
    /// Distance along the ray.
    pub t: f32,
    /// The hit entity, `INVALID` for terrain-only hits.
    pub entity: GameObject,
    /// World-space hit position.
    pub position: Vec3,
}

impl RayHit {
    /// A miss.
    pub const MISS: RayHit = RayHit {
        is_hit: false,
        t: f32::INFINITY,
        entity: GameObject::INVALID,
        position: Vec3::ZERO,
    };
}

/// Renderer-side services the editor core depends on.
pub trait RenderInterface {
    /// World-space ray under a viewport position of `camera`.
    fn screen_ray(&self, project: &Project, camera: GameObject, screen: Vec2) -> (Vec3, Vec3);

    /// Raycast against renderable meshes, ignoring `ignore`.
    fn raycast_meshes(
        &self,
        project: &Project,
        origin: Vec3,
        direction: Vec3,
        ignore: GameObject,
    ) -> RayHit;

    /// Raycast against editor icon billboards.
    fn raycast_icons(&self, project: &Project, origin: Vec3, direction: Vec3) -> RayHit;

    /// Raycast against terrain patches.
    fn raycast_terrain(&self, project: &Project, origin: Vec3, direction: Vec3) -> RayHit;

    /// Entities whose meshes intersect the frustum spanned by a
    /// screen rectangle of `camera`.
    fn frustum_select(
        &self,
        project: &Project,
        camera: GameObject,
        min: Vec2,
        max: Vec2,
    ) -> Vec<GameObject>;

    /// Viewport size of `camera` in pixels.
    fn camera_screen_size(&self, project: &Project, camera: GameObject) -> Vec2;
}

/// Renderer stub for headless runs: straight-down rays, no hits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderInterface;

impl RenderInterface for NullRenderInterface {
    fn screen_ray(&self, project: &Project, camera: GameObject, _screen: Vec2) -> (Vec3, Vec3) {
        let origin = if camera.is_valid() {
            project.position(camera)
        } else {
            Vec3::ZERO
        };
        (origin, Vec3::NEG_Z)
    }

    fn raycast_meshes(
        &self,
        _project: &Project,
        _origin: Vec3,
        _direction: Vec3,
        _ignore: GameObject,
    ) -> RayHit {
        RayHit::MISS
    }

    fn raycast_icons(&self, _project: &Project, _origin: Vec3, _direction: Vec3) -> RayHit {
        RayHit::MISS
    }

    fn raycast_terrain(&self, _project: &Project, _origin: Vec3, _direction: Vec3) -> RayHit {
        RayHit::MISS
    }

    fn frustum_select(
        &self,
        _project: &Project,
        _camera: GameObject,
        _min: Vec2,
        _max: Vec2,
    ) -> Vec<GameObject> {
        Vec::new()
    }

    fn camera_screen_size(&self, _project: &Project, _camera: GameObject) -> Vec2 {
        Vec2::new(800.0, 600.0)
    }
}
