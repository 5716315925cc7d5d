//! Boolean solids backed by `csgrs` meshes.
//!
//! Triangles cross into `csgrs` as one polygon each and come back out
//! through its polygon triangulation, so callers only ever see plain
//! [`Geometry`] buffers.

use csgrs::mesh::Mesh;
use csgrs::mesh::polygon::Polygon;
use csgrs::mesh::vertex::Vertex;
use csgrs::traits::CSG;

use crate::geometry::Geometry;
use crate::math::{Point3, add, cross, dot, normalize, sub, triangle_area};

type CsgMesh = Mesh<()>;

/// Closed triangle soup participating in boolean operations.
#[derive(Debug, Clone)]
pub struct Solid {
    mesh: CsgMesh,
}

impl Default for Solid {
    fn default() -> Self {
        Self {
            mesh: CsgMesh::from_polygons(&[], None),
        }
    }
}

impl Solid {
    /// Degenerate (zero-area) triangles carry no plane and are skipped.
    pub fn from_triangles(triangles: &[[Point3; 3]]) -> Self {
        let polygons: Vec<Polygon<()>> = triangles
            .iter()
            .filter(|[a, b, c]| triangle_area(*a, *b, *c) > 1e-12)
            .map(|[a, b, c]| {
                let normal = normalize(cross(sub(*b, *a), sub(*c, *a)));
                let vertices = [a, b, c]
                    .into_iter()
                    .map(|p| Vertex::new((*p).into(), normal.into()))
                    .collect();
                Polygon::new(vertices, None)
            })
            .collect();
        Self {
            mesh: CsgMesh::from_polygons(&polygons, None),
        }
    }

    pub fn polygon_count(&self) -> usize {
        self.mesh.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mesh.polygons.is_empty()
    }

    pub fn union(&self, other: &Solid) -> Solid {
        Solid {
            mesh: self.mesh.union(&other.mesh),
        }
    }

    pub fn subtract(&self, other: &Solid) -> Solid {
        Solid {
            mesh: self.mesh.difference(&other.mesh),
        }
    }

    pub fn intersect(&self, other: &Solid) -> Solid {
        Solid {
            mesh: self.mesh.intersection(&other.mesh),
        }
    }

    /// Triangulates the result polygons into a non-indexed buffer wound
    /// counter-clockwise around each polygon's outward normal.
    pub fn to_geometry(&self) -> Geometry {
        let mut positions = Vec::new();
        for polygon in &self.mesh.polygons {
            if polygon.vertices.len() < 3 {
                continue;
            }
            let points: Vec<Point3> = polygon.vertices.iter().map(point).collect();
            let facing = newell_normal(&points);
            if points.len() == 3 {
                positions.extend(oriented(points[0], points[1], points[2], facing));
                continue;
            }
            for [a, b, c] in polygon.triangulate() {
                positions.extend(oriented(point(&a), point(&b), point(&c), facing));
            }
        }
        Geometry::non_indexed(positions)
    }
}

fn point(vertex: &Vertex) -> Point3 {
    [vertex.pos.x, vertex.pos.y, vertex.pos.z]
}

/// Area-weighted normal of a planar ring; robust to collinear leading points.
fn newell_normal(points: &[Point3]) -> Point3 {
    let n = points.len();
    (0..n).fold([0.0; 3], |acc, i| {
        let (a, b) = (points[i], points[(i + 1) % n]);
        add(
            acc,
            [
                (a[1] - b[1]) * (a[2] + b[2]),
                (a[2] - b[2]) * (a[0] + b[0]),
                (a[0] - b[0]) * (a[1] + b[1]),
            ],
        )
    })
}

fn oriented(a: Point3, b: Point3, c: Point3, facing: Point3) -> [Point3; 3] {
    if dot(cross(sub(b, a), sub(c, a)), facing) < 0.0 {
        [a, c, b]
    } else {
        [a, b, c]
    }
}

#[cfg(test)]
mod tests {
    use super::Solid;
    use crate::geometry::Geometry;
    use crate::math::{cross, dot};
    use crate::primitives::box_geometry;

    fn solid_box(size: f64, offset: [f64; 3]) -> Solid {
        let mut geometry = box_geometry(size, size, size);
        geometry.translate(offset);
        Solid::from_triangles(&geometry.triangles().expect("box triangles"))
    }

    fn volume(geometry: &Geometry) -> f64 {
        geometry
            .triangles()
            .expect("valid geometry")
            .iter()
            .map(|[a, b, c]| dot(*a, cross(*b, *c)) / 6.0)
            .sum()
    }

    #[test]
    fn union_of_overlapping_boxes_counts_overlap_once() {
        let result = solid_box(2.0, [0.0; 3]).union(&solid_box(2.0, [1.0, 0.5, 0.5]));
        assert!((volume(&result.to_geometry()) - 13.75).abs() < 1e-6);
    }

    #[test]
    fn subtract_removes_overlap() {
        let result = solid_box(2.0, [0.0; 3]).subtract(&solid_box(2.0, [1.0, 0.5, 0.5]));
        assert!((volume(&result.to_geometry()) - 5.75).abs() < 1e-6);
    }

    #[test]
    fn intersect_keeps_only_overlap() {
        let result = solid_box(2.0, [0.0; 3]).intersect(&solid_box(2.0, [1.0, 0.5, 0.5]));
        assert!((volume(&result.to_geometry()) - 2.25).abs() < 1e-6);
    }

    #[test]
    fn disjoint_intersection_is_empty() {
        let result = solid_box(1.0, [0.0; 3]).intersect(&solid_box(1.0, [5.0, 0.0, 0.0]));
        assert!(result.to_geometry().is_empty());
    }

    #[test]
    fn degenerate_triangles_are_skipped() {
        let solid = Solid::from_triangles(&[[[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]]);
        assert_eq!(solid.polygon_count(), 0);
        assert!(Solid::default().is_empty());
    }

    #[test]
    fn hole_through_box_keeps_outer_volume_minus_core() {
        let outer = solid_box(4.0, [0.0; 3]);
        let core = box_geometry(2.0, 2.0, 6.0);
        let core = Solid::from_triangles(&core.triangles().expect("core triangles"));
        let result = outer.subtract(&core);
        assert!((volume(&result.to_geometry()) - (64.0 - 16.0)).abs() < 1e-6);
    }
}
