//! Planar rings: cleanup, orientation and cap triangulation.

use csgrs::mesh::polygon::Polygon;
use csgrs::mesh::vertex::Vertex;

use crate::math::Point2;

/// Twice the signed area of a closed ring; positive for counter-clockwise.
pub fn signed_area(ring: &[Point2]) -> f64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a[0] * b[1] - b[0] * a[1]
        })
        .sum::<f64>()
}

pub fn is_clockwise(ring: &[Point2]) -> bool {
    signed_area(ring) < 0.0
}

/// Drops a trailing point equal to the first one and consecutive duplicates.
pub fn clean_ring(ring: &[Point2]) -> Vec<Point2> {
    let mut out: Vec<Point2> = Vec::with_capacity(ring.len());
    for point in ring {
        if out.last().is_some_and(|last| same_point(*last, *point)) {
            continue;
        }
        out.push(*point);
    }
    while out.len() > 1 && same_point(out[0], out[out.len() - 1]) {
        out.pop();
    }
    out
}

/// Splits a simple ring (convex or not) into triangles wound
/// counter-clockwise, whatever the orientation of the input.
pub fn triangulate_ring(ring: &[Point2]) -> Vec<[Point2; 3]> {
    if ring.len() < 3 {
        return Vec::new();
    }
    if ring.len() == 3 {
        return vec![counter_clockwise([ring[0], ring[1], ring[2]])];
    }

    let vertices = ring
        .iter()
        .map(|p| Vertex::new([p[0], p[1], 0.0].into(), [0.0, 0.0, 1.0].into()))
        .collect();
    let polygon: Polygon<()> = Polygon::new(vertices, None);
    polygon
        .triangulate()
        .into_iter()
        .map(|triangle| counter_clockwise(triangle.map(|v| [v.pos.x, v.pos.y])))
        .filter(|triangle| signed_area(triangle).abs() > 1e-12)
        .collect()
}

fn counter_clockwise([a, b, c]: [Point2; 3]) -> [Point2; 3] {
    if signed_area(&[a, b, c]) < 0.0 {
        [a, c, b]
    } else {
        [a, b, c]
    }
}

fn same_point(a: Point2, b: Point2) -> bool {
    (a[0] - b[0]).abs() <= 1e-10 && (a[1] - b[1]).abs() <= 1e-10
}

#[cfg(test)]
mod tests {
    use super::{clean_ring, is_clockwise, signed_area, triangulate_ring};
    use crate::math::Point2;

    fn area_of(triangles: &[[Point2; 3]]) -> f64 {
        triangles.iter().map(|t| signed_area(t) / 2.0).sum()
    }

    fn square(size: f64, offset: f64) -> Vec<Point2> {
        vec![
            [offset, offset],
            [offset + size, offset],
            [offset + size, offset + size],
            [offset, offset + size],
        ]
    }

    #[test]
    fn square_splits_into_two_ccw_triangles() {
        let triangles = triangulate_ring(&square(2.0, 0.0));
        assert_eq!(triangles.len(), 2);
        assert!(triangles.iter().all(|t| signed_area(t) > 0.0));
        assert!((area_of(&triangles) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn clockwise_outline_is_reoriented() {
        let mut contour = square(1.0, 0.0);
        contour.reverse();
        assert!(is_clockwise(&contour));
        let triangles = triangulate_ring(&contour);
        assert!((area_of(&triangles) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn concave_outline_keeps_its_area() {
        let contour: Vec<Point2> = vec![
            [0.0, 0.0],
            [4.0, 0.0],
            [4.0, 4.0],
            [2.0, 1.0],
            [0.0, 4.0],
        ];
        let triangles = triangulate_ring(&contour);
        assert_eq!(triangles.len(), 3);
        assert!((area_of(&triangles) - signed_area(&contour) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_points_give_nothing() {
        assert!(triangulate_ring(&[[0.0, 0.0], [1.0, 0.0]]).is_empty());
    }

    #[test]
    fn clean_ring_drops_closing_duplicate() {
        let ring = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        assert_eq!(clean_ring(&ring).len(), 3);
    }
}
