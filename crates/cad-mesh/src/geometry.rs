use crate::error::GeometryError;
use crate::math::{Point3, add, is_finite, mul_scalar, rotate_x, rotate_y, rotate_z};

/// Triangle buffer geometry: a flat position list, optionally indexed.
///
/// Without indices every consecutive run of three positions is one triangle,
/// mirroring how non-indexed buffer geometry is read by mesh viewers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<Point3>,
    pub indices: Option<Vec<u32>>,
}

impl Geometry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn indexed(positions: Vec<Point3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            positions,
            indices: Some(triangles.into_iter().flatten().collect()),
        }
    }

    pub fn non_indexed(positions: Vec<Point3>) -> Self {
        Self {
            positions,
            indices: None,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Resolves the buffer into explicit triangles, rejecting anything that
    /// would not serialise as a whole number of facets.
    pub fn triangles(&self) -> Result<Vec<[Point3; 3]>, GeometryError> {
        if self.positions.iter().any(|p| !is_finite(*p)) {
            return Err(GeometryError::NonFinite);
        }

        match &self.indices {
            Some(indices) => {
                if indices.len() % 3 != 0 {
                    return Err(GeometryError::IndexCount {
                        count: indices.len(),
                    });
                }
                let vertex_count = self.positions.len();
                indices
                    .chunks_exact(3)
                    .map(|tri| {
                        let mut out = [[0.0; 3]; 3];
                        for (slot, index) in out.iter_mut().zip(tri) {
                            *slot = *self.positions.get(*index as usize).ok_or(
                                GeometryError::IndexOutOfRange {
                                    index: *index,
                                    vertex_count,
                                },
                            )?;
                        }
                        Ok(out)
                    })
                    .collect()
            }
            None => {
                if self.positions.len() % 3 != 0 {
                    return Err(GeometryError::VertexCount {
                        count: self.positions.len(),
                    });
                }
                Ok(self
                    .positions
                    .chunks_exact(3)
                    .map(|tri| [tri[0], tri[1], tri[2]])
                    .collect())
            }
        }
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        }
    }

    pub fn translate(&mut self, offset: Point3) {
        self.map_positions(|p| add(p, offset));
    }

    pub fn rotate_x(&mut self, angle: f64) {
        self.map_positions(|p| rotate_x(p, angle));
    }

    pub fn rotate_y(&mut self, angle: f64) {
        self.map_positions(|p| rotate_y(p, angle));
    }

    pub fn rotate_z(&mut self, angle: f64) {
        self.map_positions(|p| rotate_z(p, angle));
    }

    /// Non-uniform scale. A mirroring scale (odd number of negative factors)
    /// also flips triangle winding so faces keep pointing outwards.
    pub fn scale(&mut self, factors: Point3) {
        self.map_positions(|p| [p[0] * factors[0], p[1] * factors[1], p[2] * factors[2]]);
        if factors[0] * factors[1] * factors[2] < 0.0 {
            self.flip_winding();
        }
    }

    /// Moves the bounding box centre to the origin.
    pub fn center(&mut self) {
        if let Some((min, max)) = self.bounds() {
            let middle = mul_scalar(add(min, max), 0.5);
            self.translate([-middle[0], -middle[1], -middle[2]]);
        }
    }

    pub fn bounds(&self) -> Option<(Point3, Point3)> {
        if self.positions.is_empty() {
            return None;
        }
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for p in &self.positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        Some((min, max))
    }

    pub fn flip_winding(&mut self) {
        match &mut self.indices {
            Some(indices) => {
                for tri in indices.chunks_exact_mut(3) {
                    tri.swap(1, 2);
                }
            }
            None => {
                for tri in self.positions.chunks_exact_mut(3) {
                    tri.swap(1, 2);
                }
            }
        }
    }

    /// Appends another geometry, converting both to the indexed layout.
    pub fn merge(&mut self, other: &Geometry) {
        self.ensure_indexed();
        let offset = self.positions.len() as u32;
        let other_indices: Vec<u32> = match &other.indices {
            Some(indices) => indices.iter().map(|i| i + offset).collect(),
            None => (0..other.positions.len() as u32).map(|i| i + offset).collect(),
        };
        self.positions.extend_from_slice(&other.positions);
        if let Some(indices) = &mut self.indices {
            indices.extend(other_indices);
        }
    }

    fn ensure_indexed(&mut self) {
        if self.indices.is_none() {
            self.indices = Some((0..self.positions.len() as u32).collect());
        }
    }

    fn map_positions(&mut self, f: impl Fn(Point3) -> Point3) {
        for p in &mut self.positions {
            *p = f(*p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Geometry;
    use crate::error::GeometryError;

    fn unit_triangle() -> Geometry {
        Geometry::indexed(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn indexed_geometry_resolves_triangles() {
        let triangles = unit_triangle().triangles().expect("valid triangle");
        assert_eq!(triangles.len(), 1);
        assert_eq!(triangles[0][1], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn non_indexed_vertex_count_must_be_multiple_of_three() {
        let geometry = Geometry::non_indexed(vec![[0.0; 3]; 4]);
        assert_eq!(
            geometry.triangles(),
            Err(GeometryError::VertexCount { count: 4 })
        );
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let geometry = Geometry::indexed(vec![[0.0; 3]; 3], vec![[0, 1, 7]]);
        assert!(matches!(
            geometry.triangles(),
            Err(GeometryError::IndexOutOfRange { index: 7, .. })
        ));
    }

    #[test]
    fn mirroring_scale_flips_winding() {
        let mut geometry = unit_triangle();
        geometry.scale([-1.0, 1.0, 1.0]);
        assert_eq!(geometry.indices, Some(vec![0, 2, 1]));
    }

    #[test]
    fn center_moves_bounds_to_origin() {
        let mut geometry = unit_triangle();
        geometry.translate([10.0, 10.0, 10.0]);
        geometry.center();
        let (min, max) = geometry.bounds().expect("non-empty");
        assert!((min[0] + 0.5).abs() < 1e-12 && (max[0] - 0.5).abs() < 1e-12);
        assert!(min[2].abs() < 1e-12 && max[2].abs() < 1e-12);
    }

    #[test]
    fn merge_offsets_indices() {
        let mut geometry = unit_triangle();
        geometry.merge(&unit_triangle());
        assert_eq!(geometry.positions.len(), 6);
        assert_eq!(geometry.indices, Some(vec![0, 1, 2, 3, 4, 5]));
    }
}
