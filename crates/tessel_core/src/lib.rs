//! Tessel Core - the scene collaborator of the render pipeline.
//!
//! This crate provides:
//!
//! - **Scene graph types**: `World`, `Instance`, `Group`, `GeometricModel`
//!   with arena-indexed handles (`InstanceId`, `GroupId`, `ModelId`)
//! - **Geometry**: the opaque `Geometry` intersection trait plus `Boxes`,
//!   `Spheres` and `Triangles`
//! - **Cameras and lights** consumed by the renderers
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessel_core::{Boxes, GeometricModel, World};
//!
//! let mut world = World::new();
//! world.add_models([GeometricModel::new(Arc::new(Boxes::unit()))])?;
//! ```

pub mod camera;
pub mod error;
pub mod geometry;
pub mod light;
pub mod material;
pub mod scene;

// Re-export commonly used types
pub use camera::{Camera, Projection};
pub use error::{SceneError, SceneResult};
pub use geometry::{AreaSample, Boxes, Geometry, GeometryHit, Spheres, Triangles};
pub use light::Light;
pub use material::Material;
pub use scene::{GeometricModel, Group, GroupId, Instance, InstanceId, ModelId, SurfaceHit, World};
