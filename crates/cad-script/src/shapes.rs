//! Planar paths and curves behind `Shape`, `Path` and the curve classes.

use std::f64::consts::TAU;

use cad_mesh::math::Point2;

use crate::value::{Items, Shared, Value, shared};

const EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Ellipse {
    pub center: Point2,
    pub radius: Point2,
    pub start_angle: f64,
    pub end_angle: f64,
    pub clockwise: bool,
    pub rotation: f64,
}

impl Ellipse {
    fn point_at(&self, t: f64) -> Point2 {
        let mut delta = self.end_angle - self.start_angle;
        let same_points = delta.abs() < EPSILON;
        delta = delta.rem_euclid(TAU);
        if delta < EPSILON {
            delta = if same_points { 0.0 } else { TAU };
        }
        if self.clockwise && !same_points {
            delta = if delta == TAU { -TAU } else { delta - TAU };
        }

        let angle = self.start_angle + t * delta;
        let mut x = self.center[0] + self.radius[0] * angle.cos();
        let mut y = self.center[1] + self.radius[1] * angle.sin();

        if self.rotation != 0.0 {
            let (sin, cos) = self.rotation.sin_cos();
            let tx = x - self.center[0];
            let ty = y - self.center[1];
            x = tx * cos - ty * sin + self.center[0];
            y = tx * sin + ty * cos + self.center[1];
        }
        [x, y]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Curve2 {
    Line {
        from: Point2,
        to: Point2,
    },
    Quadratic {
        start: Point2,
        control: Point2,
        end: Point2,
    },
    Cubic {
        start: Point2,
        control1: Point2,
        control2: Point2,
        end: Point2,
    },
    Ellipse(Ellipse),
}

impl Curve2 {
    pub fn class_name(&self) -> &'static str {
        match self {
            Curve2::Line { .. } => "LineCurve",
            Curve2::Quadratic { .. } => "QuadraticBezierCurve",
            Curve2::Cubic { .. } => "CubicBezierCurve",
            Curve2::Ellipse(_) => "EllipseCurve",
        }
    }

    pub fn point_at(&self, t: f64) -> Point2 {
        match *self {
            Curve2::Line { from, to } => [
                from[0] + (to[0] - from[0]) * t,
                from[1] + (to[1] - from[1]) * t,
            ],
            Curve2::Quadratic {
                start,
                control,
                end,
            } => {
                let k = 1.0 - t;
                [
                    k * k * start[0] + 2.0 * k * t * control[0] + t * t * end[0],
                    k * k * start[1] + 2.0 * k * t * control[1] + t * t * end[1],
                ]
            }
            Curve2::Cubic {
                start,
                control1,
                control2,
                end,
            } => {
                let k = 1.0 - t;
                let a = k * k * k;
                let b = 3.0 * k * k * t;
                let c = 3.0 * k * t * t;
                let d = t * t * t;
                [
                    a * start[0] + b * control1[0] + c * control2[0] + d * end[0],
                    a * start[1] + b * control1[1] + c * control2[1] + d * end[1],
                ]
            }
            Curve2::Ellipse(ellipse) => ellipse.point_at(t),
        }
    }

    /// `divisions + 1` evenly spaced samples from `t = 0` to `t = 1`.
    pub fn points(&self, divisions: usize) -> Vec<Point2> {
        let divisions = divisions.max(1);
        (0..=divisions)
            .map(|d| self.point_at(d as f64 / divisions as f64))
            .collect()
    }

    /// Samples a curve contributes when it is part of a path.
    fn resolution(&self, divisions: usize) -> usize {
        match self {
            Curve2::Line { .. } => 1,
            Curve2::Ellipse(_) => divisions * 2,
            _ => divisions,
        }
    }
}

/// Backing state of a `Path` or `Shape`. Only shapes carry holes.
#[derive(Debug, Clone)]
pub(crate) struct PathData {
    pub curves: Vec<Curve2>,
    pub current: Point2,
    pub holes: Option<Shared<Items>>,
}

impl PathData {
    pub fn path() -> Self {
        Self {
            curves: Vec::new(),
            current: [0.0, 0.0],
            holes: None,
        }
    }

    pub fn shape() -> Self {
        Self {
            holes: Some(shared(Items::default())),
            ..Self::path()
        }
    }

    pub fn is_shape(&self) -> bool {
        self.holes.is_some()
    }

    pub fn set_from_points(&mut self, points: &[Point2]) {
        if let Some((first, rest)) = points.split_first() {
            self.move_to(*first);
            for point in rest {
                self.line_to(*point);
            }
        }
    }

    pub fn move_to(&mut self, point: Point2) {
        self.current = point;
    }

    pub fn line_to(&mut self, point: Point2) {
        self.curves.push(Curve2::Line {
            from: self.current,
            to: point,
        });
        self.current = point;
    }

    pub fn quadratic_to(&mut self, control: Point2, end: Point2) {
        self.curves.push(Curve2::Quadratic {
            start: self.current,
            control,
            end,
        });
        self.current = end;
    }

    pub fn bezier_to(&mut self, control1: Point2, control2: Point2, end: Point2) {
        self.curves.push(Curve2::Cubic {
            start: self.current,
            control1,
            control2,
            end,
        });
        self.current = end;
    }

    /// Appends an ellipse in absolute coordinates, bridging from the current
    /// point with a straight segment when the path already has curves.
    pub fn absellipse(&mut self, ellipse: Ellipse) {
        let curve = Curve2::Ellipse(ellipse);
        if !self.curves.is_empty() {
            let first = curve.point_at(0.0);
            if !same_point(first, self.current) {
                self.line_to(first);
            }
        }
        self.curves.push(curve);
        self.current = curve.point_at(1.0);
    }

    /// `ellipse`/`arc` variant whose centre is relative to the current point.
    pub fn ellipse(&mut self, mut ellipse: Ellipse) {
        ellipse.center[0] += self.current[0];
        ellipse.center[1] += self.current[1];
        self.absellipse(ellipse);
    }

    pub fn close(&mut self) {
        let (Some(first), Some(last)) = (self.curves.first(), self.curves.last()) else {
            return;
        };
        let start = first.point_at(0.0);
        let end = last.point_at(1.0);
        if !same_point(start, end) {
            self.curves.push(Curve2::Line {
                from: end,
                to: start,
            });
            self.current = start;
        }
    }

    /// Samples the whole path, skipping consecutive duplicates.
    pub fn points(&self, divisions: usize) -> Vec<Point2> {
        let mut points: Vec<Point2> = Vec::new();
        for curve in &self.curves {
            for point in curve.points(curve.resolution(divisions)) {
                if points.last().is_some_and(|last| same_point(*last, point)) {
                    continue;
                }
                points.push(point);
            }
        }
        points
    }
}

fn same_point(a: Point2, b: Point2) -> bool {
    a[0] == b[0] && a[1] == b[1]
}

#[cfg(test)]
mod tests {
    use std::f64::consts::{FRAC_PI_2, PI, TAU};

    use super::{Curve2, Ellipse, PathData};

    fn circle(clockwise: bool, end: f64) -> Ellipse {
        Ellipse {
            center: [0.0, 0.0],
            radius: [1.0, 1.0],
            start_angle: 0.0,
            end_angle: end,
            clockwise,
            rotation: 0.0,
        }
    }

    #[test]
    fn polyline_square_closes_back_to_start() {
        let mut path = PathData::shape();
        path.move_to([0.0, 0.0]);
        path.line_to([2.0, 0.0]);
        path.line_to([2.0, 2.0]);
        path.line_to([0.0, 2.0]);
        path.close();
        assert_eq!(path.curves.len(), 4);
        let points = path.points(12);
        assert_eq!(points.first(), Some(&[0.0, 0.0]));
        assert_eq!(points.last(), Some(&[0.0, 0.0]));
        assert_eq!(points.len(), 5);
    }

    #[test]
    fn full_circle_uses_double_resolution() {
        let mut path = PathData::path();
        path.absellipse(circle(false, TAU));
        let points = path.points(8);
        assert_eq!(points.len(), 17);
        for point in &points {
            assert!(((point[0] * point[0] + point[1] * point[1]).sqrt() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn clockwise_arc_runs_the_long_way() {
        let quarter = Curve2::Ellipse(circle(true, FRAC_PI_2));
        let mid = quarter.point_at(0.5);
        // Clockwise from 0 to PI/2 sweeps -3PI/2, passing through -3PI/4.
        let expected = -3.0 * PI / 4.0;
        assert!((mid[0] - expected.cos()).abs() < 1e-12);
        assert!((mid[1] - expected.sin()).abs() < 1e-12);
    }

    #[test]
    fn relative_arc_offsets_from_current_point() {
        let mut path = PathData::path();
        path.move_to([5.0, 0.0]);
        path.ellipse(circle(false, PI));
        let start = path.curves[0].point_at(0.0);
        assert!((start[0] - 6.0).abs() < 1e-12);
        assert!((path.current[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn ellipse_after_lines_is_bridged() {
        let mut path = PathData::path();
        path.move_to([0.0, 0.0]);
        path.line_to([3.0, 0.0]);
        path.absellipse(Ellipse {
            center: [3.0, 2.0],
            ..circle(false, PI)
        });
        // Ellipse starts at (4, 2), so a bridging line is inserted.
        assert_eq!(path.curves.len(), 3);
        assert!(matches!(path.curves[1], Curve2::Line { to, .. } if to == [4.0, 2.0]));
    }

    #[test]
    fn bezier_endpoints_are_exact() {
        let curve = Curve2::Cubic {
            start: [0.0, 0.0],
            control1: [1.0, 2.0],
            control2: [3.0, 2.0],
            end: [4.0, 0.0],
        };
        assert_eq!(curve.point_at(0.0), [0.0, 0.0]);
        assert_eq!(curve.point_at(1.0), [4.0, 0.0]);
        assert_eq!(curve.points(4).len(), 5);
    }
}
