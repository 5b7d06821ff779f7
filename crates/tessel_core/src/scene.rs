//! Scene graph: world -> instances -> groups -> geometric models.
//!
//! Nodes live in arenas owned by the [`World`] and are referred to by
//! small copyable ids. A world is immutable while a frame renders; the
//! renderer crate shares it across worker threads behind an `Arc`.

use std::sync::Arc;

use tessel_math::{Aabb, Affine3A, Interval, Mat3A, Ray, Vec2, Vec3};

use crate::error::{SceneError, SceneResult};
use crate::geometry::{AreaSample, Geometry, GeometryHit};
use crate::light::Light;
use crate::material::Material;

/// Handle of a group inside a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub usize);

/// Handle of an instance inside a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub usize);

/// Handle of a geometric model: its group plus its slot in that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId {
    pub group: GroupId,
    pub index: usize,
}

/// A geometry paired with the appearance it is rendered with.
#[derive(Clone)]
pub struct GeometricModel {
    geometry: Arc<dyn Geometry>,
    material: Material,
}

impl GeometricModel {
    pub fn new(geometry: Arc<dyn Geometry>) -> Self {
        Self {
            geometry,
            material: Material::default(),
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn geometry(&self) -> &dyn Geometry {
        self.geometry.as_ref()
    }

    pub fn material(&self) -> &Material {
        &self.material
    }
}

/// A collection of models that is placed into the world by instances.
#[derive(Clone, Default)]
pub struct Group {
    models: Vec<GeometricModel>,
    bounds: Option<Aabb>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a group from a list of models.
    pub fn from_models(models: impl IntoIterator<Item = GeometricModel>) -> Self {
        let mut group = Self::new();
        for model in models {
            group.add_model(model);
        }
        group
    }

    /// Add a model and return its index in this group.
    pub fn add_model(&mut self, model: GeometricModel) -> usize {
        let b = model.geometry().bounds();
        self.bounds = Some(match self.bounds {
            Some(acc) => Aabb::surrounding(&acc, &b),
            None => b,
        });
        self.models.push(model);
        self.models.len() - 1
    }

    pub fn models(&self) -> &[GeometricModel] {
        &self.models
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds.unwrap_or(Aabb::EMPTY)
    }

    /// Closest hit over all models, returning the model index.
    fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<(usize, GeometryHit)> {
        let mut closest = None;
        let mut range = ray_t;
        for (i, model) in self.models.iter().enumerate() {
            if let Some(hit) = model.geometry().intersect(ray, range) {
                range = range.with_max(hit.t);
                closest = Some((i, hit));
            }
        }
        closest
    }

    fn occluded(&self, ray: &Ray, ray_t: Interval) -> bool {
        self.models.iter().any(|m| m.geometry().occluded(ray, ray_t))
    }
}

/// A group placed into the world with an affine transform.
#[derive(Debug, Clone, Copy)]
pub struct Instance {
    group: GroupId,
    xfm: Affine3A,
    inverse: Affine3A,
    /// Inverse-transpose of the linear part, for normals
    normal_xfm: Mat3A,
}

impl Instance {
    /// An instance with the identity transform.
    pub fn new(group: GroupId) -> Self {
        Self {
            group,
            xfm: Affine3A::IDENTITY,
            inverse: Affine3A::IDENTITY,
            normal_xfm: Mat3A::IDENTITY,
        }
    }

    pub fn with_transform(mut self, xfm: Affine3A) -> SceneResult<Self> {
        let det = xfm.matrix3.determinant();
        if det == 0.0 || !det.is_finite() || !xfm.is_finite() {
            return Err(SceneError::SingularTransform);
        }
        self.xfm = xfm;
        self.inverse = xfm.inverse();
        self.normal_xfm = self.inverse.matrix3.transpose();
        Ok(self)
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn transform(&self) -> &Affine3A {
        &self.xfm
    }
}

/// A world-space closest hit, as reported to renderers and pick queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Ray parameter of the hit
    pub t: f32,
    pub position: Vec3,
    /// World-space unit normal, facing against the incoming ray
    pub normal: Vec3,
    /// Whether the ray hit the outward side of the surface
    pub front_face: bool,
    pub instance: InstanceId,
    pub model: ModelId,
    pub prim_id: u32,
    pub uv: Vec2,
    pub material: Material,
}

/// The committed scene handed to a render call.
#[derive(Clone, Default)]
pub struct World {
    groups: Vec<Group>,
    instances: Vec<Instance>,
    /// World-space bounds per instance, parallel to `instances`
    instance_bounds: Vec<Aabb>,
    lights: Vec<Light>,
    bounds: Option<Aabb>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a group into the world's arena.
    pub fn add_group(&mut self, group: Group) -> GroupId {
        self.groups.push(group);
        GroupId(self.groups.len() - 1)
    }

    pub fn add_instance(&mut self, instance: Instance) -> SceneResult<InstanceId> {
        let group = self
            .groups
            .get(instance.group.0)
            .ok_or(SceneError::UnknownGroup(instance.group.0))?;

        let b = group.bounds().transformed(&instance.xfm);
        self.bounds = Some(match self.bounds {
            Some(acc) => Aabb::surrounding(&acc, &b),
            None => b,
        });
        self.instances.push(instance);
        self.instance_bounds.push(b);

        let id = InstanceId(self.instances.len() - 1);
        log::debug!(
            "Added instance {} of group {} ({} models)",
            id.0,
            instance.group.0,
            group.models().len()
        );
        Ok(id)
    }

    /// Convenience: add a group and a single identity instance of it.
    pub fn add_models(
        &mut self,
        models: impl IntoIterator<Item = GeometricModel>,
    ) -> SceneResult<InstanceId> {
        let group = self.add_group(Group::from_models(models));
        self.add_instance(Instance::new(group))
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn instances(&self) -> impl Iterator<Item = (InstanceId, &Instance)> {
        self.instances.iter().enumerate().map(|(i, inst)| (InstanceId(i), inst))
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.0)
    }

    pub fn model(&self, id: ModelId) -> Option<&GeometricModel> {
        self.groups.get(id.group.0)?.models().get(id.index)
    }

    /// World-space bounds of everything instanced.
    pub fn bounds(&self) -> Aabb {
        self.bounds.unwrap_or(Aabb::EMPTY)
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Closest hit along the ray within `ray_t`.
    pub fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<SurfaceHit> {
        let mut closest: Option<(usize, usize, GeometryHit)> = None;
        let mut range = ray_t;

        for (i, inst) in self.instances.iter().enumerate() {
            if self.instance_bounds[i].intersect(ray, range).is_none() {
                continue;
            }
            let local = ray.transformed(&inst.inverse);
            if let Some((model, hit)) = self.groups[inst.group.0].intersect(&local, range) {
                range = range.with_max(hit.t);
                closest = Some((i, model, hit));
            }
        }

        let (i, model_index, hit) = closest?;
        let inst = &self.instances[i];
        let model = ModelId {
            group: inst.group,
            index: model_index,
        };
        let outward = inst.normal_xfm.mul_vec3(hit.normal).normalize();
        let front_face = ray.direction.dot(outward) < 0.0;

        Some(SurfaceHit {
            t: hit.t,
            position: ray.at(hit.t),
            normal: if front_face { outward } else { -outward },
            front_face,
            instance: InstanceId(i),
            model,
            prim_id: hit.prim_id,
            uv: hit.uv,
            material: *self.groups[inst.group.0].models()[model_index].material(),
        })
    }

    /// Sample a world-space point on one instanced model, for lights.
    /// The density is per unit of world-space area.
    pub fn sample_area(
        &self,
        instance: InstanceId,
        model: ModelId,
        pick: f32,
        u: Vec2,
    ) -> Option<AreaSample> {
        let inst = self.instances.get(instance.0)?;
        let local = self.model(model)?.geometry().sample_area(pick, u)?;

        let n = inst.normal_xfm.mul_vec3(local.normal);
        // |det M| * |M^-T n| maps object-space area to world-space area
        let scale = inst.xfm.matrix3.determinant().abs() * n.length();
        if !(scale > 0.0) {
            return None;
        }
        Some(AreaSample {
            position: inst.xfm.transform_point3(local.position),
            normal: n.normalize(),
            pdf: local.pdf / scale,
        })
    }

    /// Any-hit query within `ray_t`.
    pub fn occluded(&self, ray: &Ray, ray_t: Interval) -> bool {
        self.instances.iter().enumerate().any(|(i, inst)| {
            self.instance_bounds[i].intersect(ray, ray_t).is_some()
                && self.groups[inst.group.0].occluded(&ray.transformed(&inst.inverse), ray_t)
        })
    }
}
