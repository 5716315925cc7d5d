use std::f64::consts::{PI, TAU};

use crate::geometry::Geometry;
use crate::math::{Point2, Point3};
use crate::csg::Solid;
use crate::triangulate::{clean_ring, is_clockwise, triangulate_ring};

/// Axis-aligned box centred on the origin.
pub fn box_geometry(width: f64, height: f64, depth: f64) -> Geometry {
    let (x, y, z) = (width / 2.0, height / 2.0, depth / 2.0);
    let positions = vec![
        [-x, -y, -z],
        [x, -y, -z],
        [x, y, -z],
        [-x, y, -z],
        [-x, -y, z],
        [x, -y, z],
        [x, y, z],
        [-x, y, z],
    ];
    let triangles = vec![
        [4, 5, 6],
        [4, 6, 7],
        [1, 0, 3],
        [1, 3, 2],
        [5, 1, 2],
        [5, 2, 6],
        [0, 4, 7],
        [0, 7, 3],
        [7, 6, 2],
        [7, 2, 3],
        [0, 1, 5],
        [0, 5, 4],
    ];
    Geometry::indexed(positions, triangles)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CylinderParams {
    pub radius_top: f64,
    pub radius_bottom: f64,
    pub height: f64,
    pub radial_segments: usize,
    pub height_segments: usize,
    pub open_ended: bool,
    pub theta_start: f64,
    pub theta_length: f64,
}

impl Default for CylinderParams {
    fn default() -> Self {
        Self {
            radius_top: 1.0,
            radius_bottom: 1.0,
            height: 1.0,
            radial_segments: 32,
            height_segments: 1,
            open_ended: false,
            theta_start: 0.0,
            theta_length: TAU,
        }
    }
}

/// Y-axis cylinder (or frustum/cone) centred on the origin.
pub fn cylinder(params: &CylinderParams) -> Geometry {
    let radial = params.radial_segments.max(3);
    let rows = params.height_segments.max(1);
    let half = params.height / 2.0;
    let mut positions = Vec::new();
    let mut triangles = Vec::new();

    let mut grid = Vec::with_capacity(rows + 1);
    for y in 0..=rows {
        let v = y as f64 / rows as f64;
        let radius = v * (params.radius_bottom - params.radius_top) + params.radius_top;
        let mut row = Vec::with_capacity(radial + 1);
        for x in 0..=radial {
            let theta = params.theta_start + x as f64 / radial as f64 * params.theta_length;
            row.push(positions.len() as u32);
            positions.push([radius * theta.sin(), -v * params.height + half, radius * theta.cos()]);
        }
        grid.push(row);
    }

    for x in 0..radial {
        for y in 0..rows {
            let a = grid[y][x];
            let b = grid[y + 1][x];
            let c = grid[y + 1][x + 1];
            let d = grid[y][x + 1];
            if params.radius_top > 0.0 || y > 0 {
                triangles.push([a, b, d]);
            }
            if params.radius_bottom > 0.0 || y + 1 < rows {
                triangles.push([b, c, d]);
            }
        }
    }

    if !params.open_ended {
        if params.radius_top > 0.0 {
            cylinder_cap(params, radial, half, params.radius_top, true, &mut positions, &mut triangles);
        }
        if params.radius_bottom > 0.0 {
            cylinder_cap(params, radial, -half, params.radius_bottom, false, &mut positions, &mut triangles);
        }
    }

    Geometry::indexed(positions, triangles)
}

fn cylinder_cap(
    params: &CylinderParams,
    radial: usize,
    y: f64,
    radius: f64,
    top: bool,
    positions: &mut Vec<Point3>,
    triangles: &mut Vec<[u32; 3]>,
) {
    let center = positions.len() as u32;
    positions.push([0.0, y, 0.0]);
    let first = positions.len() as u32;
    for x in 0..=radial {
        let theta = params.theta_start + x as f64 / radial as f64 * params.theta_length;
        positions.push([radius * theta.sin(), y, radius * theta.cos()]);
    }
    for x in 0..radial as u32 {
        let (a, b) = (first + x, first + x + 1);
        if top {
            triangles.push([center, a, b]);
        } else {
            triangles.push([center, b, a]);
        }
    }
}

/// Cone with its apex on +Y.
pub fn cone(radius: f64, height: f64, radial_segments: usize, open_ended: bool) -> Geometry {
    cylinder(&CylinderParams {
        radius_top: 0.0,
        radius_bottom: radius,
        height,
        radial_segments,
        open_ended,
        ..CylinderParams::default()
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereParams {
    pub radius: f64,
    pub width_segments: usize,
    pub height_segments: usize,
    pub phi_start: f64,
    pub phi_length: f64,
    pub theta_start: f64,
    pub theta_length: f64,
}

impl Default for SphereParams {
    fn default() -> Self {
        Self {
            radius: 1.0,
            width_segments: 32,
            height_segments: 16,
            phi_start: 0.0,
            phi_length: TAU,
            theta_start: 0.0,
            theta_length: PI,
        }
    }
}

pub fn sphere(params: &SphereParams) -> Geometry {
    let width = params.width_segments.max(3);
    let height = params.height_segments.max(2);
    let theta_end = (params.theta_start + params.theta_length).min(PI);
    let mut positions = Vec::with_capacity((width + 1) * (height + 1));
    let mut grid = Vec::with_capacity(height + 1);

    for iy in 0..=height {
        let v = iy as f64 / height as f64;
        let theta = params.theta_start + v * params.theta_length;
        let mut row = Vec::with_capacity(width + 1);
        for ix in 0..=width {
            let u = ix as f64 / width as f64;
            let phi = params.phi_start + u * params.phi_length;
            row.push(positions.len() as u32);
            positions.push([
                -params.radius * phi.cos() * theta.sin(),
                params.radius * theta.cos(),
                params.radius * phi.sin() * theta.sin(),
            ]);
        }
        grid.push(row);
    }

    let mut triangles = Vec::new();
    for iy in 0..height {
        for ix in 0..width {
            let a = grid[iy][ix + 1];
            let b = grid[iy][ix];
            let c = grid[iy + 1][ix];
            let d = grid[iy + 1][ix + 1];
            if iy != 0 || params.theta_start > 0.0 {
                triangles.push([a, b, d]);
            }
            if iy != height - 1 || theta_end < PI {
                triangles.push([b, c, d]);
            }
        }
    }

    Geometry::indexed(positions, triangles)
}

/// Torus in the XY plane around the Z axis.
pub fn torus(
    radius: f64,
    tube: f64,
    radial_segments: usize,
    tubular_segments: usize,
    arc: f64,
) -> Geometry {
    let radial = radial_segments.max(3);
    let tubular = tubular_segments.max(3);
    let mut positions = Vec::with_capacity((radial + 1) * (tubular + 1));

    for j in 0..=radial {
        for i in 0..=tubular {
            let u = i as f64 / tubular as f64 * arc;
            let v = j as f64 / radial as f64 * TAU;
            let ring = radius + tube * v.cos();
            positions.push([ring * u.cos(), ring * u.sin(), tube * v.sin()]);
        }
    }

    let stride = (tubular + 1) as u32;
    let mut triangles = Vec::with_capacity(radial * tubular * 2);
    for j in 1..=radial as u32 {
        for i in 1..=tubular as u32 {
            let a = stride * j + i - 1;
            let b = stride * (j - 1) + i - 1;
            let c = stride * (j - 1) + i;
            let d = stride * j + i;
            triangles.push([a, b, d]);
            triangles.push([b, c, d]);
        }
    }

    Geometry::indexed(positions, triangles)
}

/// Revolves a profile of `(radius, y)` points around the Y axis.
pub fn lathe(points: &[Point2], segments: usize, phi_start: f64, phi_length: f64) -> Geometry {
    let segments = segments.max(1);
    let phi_length = phi_length.clamp(0.0, TAU);
    let count = points.len();
    let mut positions = Vec::with_capacity((segments + 1) * count);

    for i in 0..=segments {
        let phi = phi_start + i as f64 / segments as f64 * phi_length;
        let (sin, cos) = phi.sin_cos();
        for point in points {
            positions.push([point[0] * sin, point[1], point[0] * cos]);
        }
    }

    let mut triangles = Vec::new();
    if count >= 2 {
        for i in 0..segments {
            for j in 0..count - 1 {
                let base = (j + i * count) as u32;
                let a = base;
                let b = base + count as u32;
                let c = base + count as u32 + 1;
                let d = base + 1;
                triangles.push([a, b, d]);
                triangles.push([c, d, b]);
            }
        }
    }

    Geometry::indexed(positions, triangles)
}

/// Sampled planar outline with optional holes, as produced by a shape path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outline {
    pub contour: Vec<Point2>,
    pub holes: Vec<Vec<Point2>>,
}

/// Straight extrusion of one or more outlines along +Z from `z = 0` to
/// `z = depth`, with flat caps.
pub fn extrude(outlines: &[Outline], depth: f64, steps: usize) -> Geometry {
    let steps = steps.max(1);
    let mut geometry = Geometry::indexed(Vec::new(), Vec::new());
    for outline in outlines {
        geometry.merge(&extrude_outline(outline, depth, steps));
    }
    geometry
}

fn extrude_outline(outline: &Outline, depth: f64, steps: usize) -> Geometry {
    let mut contour = clean_ring(&outline.contour);
    if contour.len() < 3 {
        return Geometry::indexed(Vec::new(), Vec::new());
    }
    if is_clockwise(&contour) {
        contour.reverse();
    }
    let body = prism(&contour, 0.0, depth, steps);

    let cutters: Vec<Solid> = outline
        .holes
        .iter()
        .map(|hole| {
            let mut hole = clean_ring(hole);
            if is_clockwise(&hole) {
                hole.reverse();
            }
            hole
        })
        .filter(|hole| hole.len() >= 3)
        .filter_map(|hole| {
            // Overshoot both caps so the cut never leaves coplanar skins.
            let margin = depth.abs().max(1.0) * 0.01;
            prism(&hole, -margin, depth + margin, 1).triangles().ok()
        })
        .map(|triangles| Solid::from_triangles(&triangles))
        .collect();
    if cutters.is_empty() {
        return body;
    }

    let Ok(triangles) = body.triangles() else {
        return body;
    };
    cutters
        .iter()
        .fold(Solid::from_triangles(&triangles), |solid, cutter| {
            solid.subtract(cutter)
        })
        .to_geometry()
}

/// Closed straight prism over a counter-clockwise ring between two heights.
fn prism(ring: &[Point2], bottom: f64, top: f64, steps: usize) -> Geometry {
    let layer = ring.len() as u32;
    let mut positions = Vec::with_capacity(ring.len() * (steps + 1));
    for step in 0..=steps {
        let z = bottom + (top - bottom) * step as f64 / steps as f64;
        positions.extend(ring.iter().map(|p| [p[0], p[1], z]));
    }

    let mut triangles = Vec::new();
    for step in 0..steps as u32 {
        let base = step * layer;
        for i in 0..layer {
            let j = (i + 1) % layer;
            let a = base + i;
            let b = base + j;
            triangles.push([a, b, b + layer]);
            triangles.push([a, b + layer, a + layer]);
        }
    }

    for [a, b, c] in triangulate_ring(ring) {
        let next = positions.len() as u32;
        positions.extend([[c[0], c[1], bottom], [b[0], b[1], bottom], [a[0], a[1], bottom]]);
        positions.extend([[a[0], a[1], top], [b[0], b[1], top], [c[0], c[1], top]]);
        triangles.push([next, next + 1, next + 2]);
        triangles.push([next + 3, next + 4, next + 5]);
    }

    Geometry::indexed(positions, triangles)
}

#[cfg(test)]
mod tests {
    use std::f64::consts::TAU;

    use super::{
        CylinderParams, Outline, SphereParams, box_geometry, cone, cylinder, extrude, lathe,
        sphere, torus,
    };
    use crate::geometry::Geometry;
    use crate::math::{add, cross, dot, sub};

    /// Signed volume via the divergence theorem; positive for outward winding.
    fn volume(geometry: &Geometry) -> f64 {
        geometry
            .triangles()
            .expect("valid geometry")
            .iter()
            .map(|[a, b, c]| dot(*a, cross(*b, *c)) / 6.0)
            .sum()
    }

    fn centroid_offset_is_outward(geometry: &Geometry) -> bool {
        geometry
            .triangles()
            .expect("valid geometry")
            .iter()
            .all(|[a, b, c]| {
                let n = cross(sub(*b, *a), sub(*c, *a));
                let centroid = add(add(*a, *b), *c);
                dot(n, centroid) >= -1e-9
            })
    }

    #[test]
    fn box_volume_matches_dimensions() {
        let geometry = box_geometry(2.0, 3.0, 4.0);
        assert_eq!(geometry.triangle_count(), 12);
        assert!((volume(&geometry) - 24.0).abs() < 1e-9);
        assert!(centroid_offset_is_outward(&geometry));
    }

    #[test]
    fn cylinder_approaches_analytic_volume() {
        let geometry = cylinder(&CylinderParams {
            radius_top: 1.0,
            radius_bottom: 1.0,
            height: 2.0,
            radial_segments: 128,
            ..CylinderParams::default()
        });
        let expected = std::f64::consts::PI * 2.0;
        assert!((volume(&geometry) - expected).abs() / expected < 0.01);
    }

    #[test]
    fn cone_has_no_degenerate_apex_faces() {
        let geometry = cone(1.0, 1.0, 8, false);
        // 8 side faces plus 8 bottom cap faces.
        assert_eq!(geometry.triangle_count(), 16);
        assert!(volume(&geometry) > 0.0);
    }

    #[test]
    fn sphere_is_closed_and_outward() {
        let geometry = sphere(&SphereParams {
            radius: 2.0,
            width_segments: 64,
            height_segments: 32,
            ..SphereParams::default()
        });
        let expected = 4.0 / 3.0 * std::f64::consts::PI * 8.0;
        assert!((volume(&geometry) - expected).abs() / expected < 0.02);
    }

    #[test]
    fn torus_volume_is_positive() {
        let geometry = torus(3.0, 1.0, 32, 64, TAU);
        let expected = 2.0 * std::f64::consts::PI.powi(2) * 3.0;
        assert!((volume(&geometry) - expected).abs() / expected < 0.02);
    }

    #[test]
    fn lathe_builds_grid_of_quads() {
        let geometry = lathe(&[[1.0, 0.0], [1.0, 1.0], [0.5, 2.0]], 12, 0.0, TAU);
        assert_eq!(geometry.vertex_count(), 13 * 3);
        assert_eq!(geometry.triangle_count(), 12 * 2 * 2);
    }

    #[test]
    fn extruded_square_with_hole_has_expected_volume() {
        let outline = Outline {
            contour: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
            holes: vec![vec![[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0]]],
        };
        let geometry = extrude(&[outline], 3.0, 1);
        assert!((volume(&geometry) - 96.0 * 3.0).abs() < 1e-6);
    }

    #[test]
    fn every_hole_is_cut_from_a_stepped_extrusion() {
        let outline = Outline {
            contour: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
            holes: vec![
                vec![[1.0, 1.0], [1.0, 3.0], [3.0, 3.0], [3.0, 1.0]],
                vec![[6.0, 6.0], [8.0, 6.0], [8.0, 8.0], [6.0, 8.0]],
            ],
        };
        let geometry = extrude(&[outline], 2.0, 4);
        assert!((volume(&geometry) - 92.0 * 2.0).abs() < 1e-6);
    }

    #[test]
    fn concave_outline_extrudes_to_its_area() {
        let outline = Outline {
            contour: vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [2.0, 1.0], [0.0, 4.0]],
            holes: Vec::new(),
        };
        let geometry = extrude(&[outline], 2.0, 1);
        assert!((volume(&geometry) - 10.0 * 2.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_outline_extrudes_to_nothing() {
        let outline = Outline {
            contour: vec![[0.0, 0.0], [1.0, 0.0]],
            holes: Vec::new(),
        };
        assert!(extrude(&[outline], 1.0, 1).is_empty());
    }
}
