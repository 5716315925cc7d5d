use crate::error::GeometryError;
use crate::geometry::Geometry;
use crate::math::{Point3, add, is_finite, rotate_euler_xyz, triangle_normal};

/// Local placement of a scene node: scale, then XYZ Euler rotation, then
/// translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Point3,
    pub rotation: Point3,
    pub scale: Point3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl Transform {
    pub fn apply(&self, point: Point3) -> Point3 {
        let scaled = [
            point[0] * self.scale[0],
            point[1] * self.scale[1],
            point[2] * self.scale[2],
        ];
        add(rotate_euler_xyz(scaled, self.rotation), self.position)
    }

    pub fn is_mirroring(&self) -> bool {
        self.scale[0] * self.scale[1] * self.scale[2] < 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneMesh {
    pub geometry: Geometry,
    /// Material colour as `0xRRGGBB`; informational only, STL has no colour.
    pub color: Option<u32>,
    pub transform: Transform,
}

impl SceneMesh {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            color: None,
            transform: Transform::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneGroup {
    pub children: Vec<SceneObject>,
    pub transform: Transform,
}

/// Result of running a model script: one mesh or a group tree of meshes.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneObject {
    Mesh(SceneMesh),
    Group(SceneGroup),
}

/// World-space facet with a normal recomputed from its winding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub normal: Point3,
    pub vertices: [Point3; 3],
}

impl SceneObject {
    pub fn kind(&self) -> &'static str {
        match self {
            SceneObject::Mesh(_) => "mesh",
            SceneObject::Group(_) => "group",
        }
    }

    pub fn mesh_count(&self) -> usize {
        match self {
            SceneObject::Mesh(_) => 1,
            SceneObject::Group(group) => group.children.iter().map(SceneObject::mesh_count).sum(),
        }
    }

    /// Flattens the graph into world-space triangles.
    ///
    /// Every mesh is validated; the scene as a whole must yield at least one
    /// triangle.
    pub fn triangles(&self) -> Result<Vec<Triangle>, GeometryError> {
        let mut out = Vec::new();
        let mut pending: Vec<(&SceneObject, Vec<Transform>)> = vec![(self, Vec::new())];

        while let Some((object, ancestors)) = pending.pop() {
            match object {
                SceneObject::Group(group) => {
                    let mut chain = Vec::with_capacity(ancestors.len() + 1);
                    chain.push(group.transform);
                    chain.extend_from_slice(&ancestors);
                    for child in group.children.iter().rev() {
                        pending.push((child, chain.clone()));
                    }
                }
                SceneObject::Mesh(mesh) => {
                    let mut chain = Vec::with_capacity(ancestors.len() + 1);
                    chain.push(mesh.transform);
                    chain.extend_from_slice(&ancestors);
                    let mirrored = chain.iter().filter(|t| t.is_mirroring()).count() % 2 == 1;

                    for [a, b, c] in mesh.geometry.triangles()? {
                        let place = |p: Point3| chain.iter().fold(p, |p, t| t.apply(p));
                        let (a, b, c) = (place(a), place(b), place(c));
                        let vertices = if mirrored { [a, c, b] } else { [a, b, c] };
                        out.push(Triangle {
                            normal: triangle_normal(vertices[0], vertices[1], vertices[2]),
                            vertices,
                        });
                    }
                }
            }
        }

        if out.is_empty() {
            return Err(GeometryError::Empty);
        }
        if out.iter().any(|t| t.vertices.iter().any(|v| !is_finite(*v))) {
            return Err(GeometryError::NonFinite);
        }
        Ok(out)
    }

    /// World-space axis-aligned bounds of the whole scene.
    pub fn bounds(&self) -> Result<(Point3, Point3), GeometryError> {
        bounds_of(&self.triangles()?).ok_or(GeometryError::Empty)
    }
}

pub fn bounds_of(triangles: &[Triangle]) -> Option<(Point3, Point3)> {
    let mut vertices = triangles.iter().flat_map(|t| t.vertices.iter());
    let first = *vertices.next()?;
    Some(vertices.fold((first, first), |(mut min, mut max), v| {
        for axis in 0..3 {
            min[axis] = min[axis].min(v[axis]);
            max[axis] = max[axis].max(v[axis]);
        }
        (min, max)
    }))
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::{SceneGroup, SceneMesh, SceneObject, Transform};
    use crate::error::GeometryError;
    use crate::geometry::Geometry;
    use crate::primitives::box_geometry;

    fn assert_close(a: [f64; 3], b: [f64; 3]) {
        for axis in 0..3 {
            assert!((a[axis] - b[axis]).abs() < 1e-9, "{a:?} != {b:?}");
        }
    }

    fn triangle_mesh() -> SceneMesh {
        SceneMesh::new(Geometry::non_indexed(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        ]))
    }

    #[test]
    fn group_transforms_compose_parent_after_child() {
        let mut child = triangle_mesh();
        child.transform.position = [1.0, 0.0, 0.0];
        let group = SceneObject::Group(SceneGroup {
            children: vec![SceneObject::Mesh(child)],
            transform: Transform {
                rotation: [0.0, 0.0, FRAC_PI_2],
                ..Transform::default()
            },
        });

        let triangles = group.triangles().expect("one triangle");
        // Child moves the origin to (1,0,0); the group then turns it onto +y.
        assert_close(triangles[0].vertices[0], [0.0, 1.0, 0.0]);
        assert_close(triangles[0].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn mirroring_scale_flips_winding() {
        let mut mesh = triangle_mesh();
        mesh.transform.scale = [1.0, 1.0, -1.0];
        let triangles = SceneObject::Mesh(mesh).triangles().expect("one triangle");
        assert_close(triangles[0].normal, [0.0, 0.0, -1.0]);
        assert_close(triangles[0].vertices[1], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn empty_group_is_malformed() {
        let group = SceneObject::Group(SceneGroup::default());
        assert_eq!(group.triangles(), Err(GeometryError::Empty));
    }

    #[test]
    fn bounds_cover_all_children() {
        let mut left = SceneMesh::new(box_geometry(2.0, 2.0, 2.0));
        left.transform.position = [-5.0, 0.0, 0.0];
        let right = SceneMesh::new(box_geometry(2.0, 2.0, 2.0));
        let group = SceneObject::Group(SceneGroup {
            children: vec![SceneObject::Mesh(left), SceneObject::Mesh(right)],
            transform: Transform::default(),
        });

        let (min, max) = group.bounds().expect("non-empty scene");
        assert_close(min, [-6.0, -1.0, -1.0]);
        assert_close(max, [1.0, 1.0, 1.0]);
        assert_eq!(group.mesh_count(), 2);
        assert_eq!(group.kind(), "group");
        assert_eq!(SceneObject::Mesh(triangle_mesh()).kind(), "mesh");
    }
}
