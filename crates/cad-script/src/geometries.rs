//! Buffer geometries, attributes, shapes, curves and the `CSG` helpers.

use std::f64::consts::{PI, TAU};
use std::rc::Rc;

use cad_mesh::math::{self, Point2, Point3};
use cad_mesh::primitives::{self, CylinderParams, Outline, SphereParams};
use cad_mesh::{Geometry, Solid, Transform};

use crate::host::{self, Box3Data, Host, NodeKind, vector_arg, vector_value};
use crate::interpreter::{Flow, Interpreter};
use crate::shapes::{Curve2, Ellipse, PathData};
use crate::value::{Builtin, Shared, Value, arg, number_arg, shared};

pub(crate) const GEOMETRY_METHODS: &[&str] = &[
    "setAttribute", "getAttribute", "deleteAttribute", "hasAttribute", "setIndex", "getIndex",
    "translate", "rotateX", "rotateY", "rotateZ", "scale", "center", "computeBoundingBox",
    "computeBoundingSphere", "computeVertexNormals", "normalizeNormals", "clone", "copy",
    "toNonIndexed", "setFromPoints", "dispose",
];
pub(crate) const ATTRIBUTE_METHODS: &[&str] = &[
    "getX", "getY", "getZ", "setX", "setY", "setZ", "setXY", "setXYZ", "clone",
];
pub(crate) const PATH_METHODS: &[&str] = &[
    "moveTo", "lineTo", "quadraticCurveTo", "bezierCurveTo", "arc", "absarc", "ellipse",
    "absellipse", "closePath", "getPoints", "getSpacedPoints", "setFromPoints",
];
pub(crate) const CURVE_METHODS: &[&str] = &["getPoint", "getPoints", "getSpacedPoints"];
pub(crate) const CSG_METHODS: &[&str] = &["union", "subtract", "intersect", "clone"];
pub(crate) const CSG_STATICS: &[&str] = &[
    "union", "subtract", "intersect", "fromMesh", "fromGeometry", "toMesh", "toGeometry",
];

const DEFAULT_CURVE_SEGMENTS: f64 = 12.0;

pub(crate) struct AttributeData {
    pub array: Vec<f64>,
    pub item_size: usize,
}

impl AttributeData {
    fn count(&self) -> usize {
        self.array.len() / self.item_size.max(1)
    }

    fn component(&self, index: usize, offset: usize) -> f64 {
        if offset >= self.item_size {
            return f64::NAN;
        }
        self.array
            .get(index * self.item_size + offset)
            .copied()
            .unwrap_or(f64::NAN)
    }
}

/// State behind every `*Geometry` class.
pub(crate) struct GeometryData {
    pub kind: &'static str,
    pub attributes: Vec<(Rc<str>, Shared<AttributeData>)>,
    pub index: Option<Vec<u32>>,
    pub bounding_box: Option<Rc<Box3Data>>,
    pub parameters: Vec<(Rc<str>, Value)>,
}

impl GeometryData {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            attributes: Vec::new(),
            index: None,
            bounding_box: None,
            parameters: Vec::new(),
        }
    }

    fn from_geometry(kind: &'static str, geometry: Geometry) -> Self {
        let mut data = Self::new(kind);
        data.set_positions(&geometry.positions);
        data.index = geometry.indices;
        data
    }

    fn attribute(&self, name: &str) -> Option<Shared<AttributeData>> {
        self.attributes
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, attribute)| Rc::clone(attribute))
    }

    fn set_attribute(&mut self, name: &str, attribute: Shared<AttributeData>) {
        match self.attributes.iter_mut().find(|(key, _)| key.as_ref() == name) {
            Some(slot) => slot.1 = attribute,
            None => self.attributes.push((name.into(), attribute)),
        }
    }

    fn set_positions(&mut self, positions: &[Point3]) {
        let array = positions.iter().flatten().copied().collect();
        self.set_attribute("position", shared(AttributeData { array, item_size: 3 }));
    }

    fn positions(&self) -> Result<Vec<Point3>, String> {
        let Some(attribute) = self.attribute("position") else {
            return Ok(Vec::new());
        };
        let attribute = attribute.borrow();
        if attribute.item_size != 3 {
            return Err(format!(
                "position attribute must have itemSize 3, found {}",
                attribute.item_size
            ));
        }
        if attribute.array.len() % 3 != 0 {
            return Err(format!(
                "position attribute length {} is not a multiple of 3",
                attribute.array.len()
            ));
        }
        Ok(attribute
            .array
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .collect())
    }

    /// Snapshot for export and CSG.
    pub fn to_geometry(&self) -> Result<Geometry, String> {
        Ok(Geometry {
            positions: self.positions()?,
            indices: self.index.clone(),
        })
    }

    fn map_positions(&self, f: impl Fn(Point3) -> Point3) {
        let Some(attribute) = self.attribute("position") else {
            return;
        };
        let mut attribute = attribute.borrow_mut();
        if attribute.item_size != 3 {
            return;
        }
        for chunk in attribute.array.chunks_exact_mut(3) {
            let [x, y, z] = f([chunk[0], chunk[1], chunk[2]]);
            chunk[0] = x;
            chunk[1] = y;
            chunk[2] = z;
        }
    }

    fn deep_clone(&self) -> Self {
        Self {
            kind: self.kind,
            attributes: self
                .attributes
                .iter()
                .map(|(name, attribute)| {
                    let attribute = attribute.borrow();
                    let copy = AttributeData {
                        array: attribute.array.clone(),
                        item_size: attribute.item_size,
                    };
                    (Rc::clone(name), shared(copy))
                })
                .collect(),
            index: self.index.clone(),
            bounding_box: self
                .bounding_box
                .as_ref()
                .map(|b| Rc::new(Box3Data::new(*b.min.borrow(), *b.max.borrow()))),
            parameters: self.parameters.clone(),
        }
    }
}

pub(crate) fn empty_geometry() -> Shared<GeometryData> {
    shared(GeometryData::new("BufferGeometry"))
}

fn segments(interp: &Interpreter<'_>, args: &[Value], index: usize, default: usize, min: usize) -> usize {
    let requested = number_arg(args, index, default as f64);
    let requested = if requested.is_nan() {
        default
    } else {
        requested.floor().max(0.0) as usize
    };
    requested.clamp(min, interp.limits().max_segments.max(min))
}

fn finish_geometry(
    interp: &mut Interpreter<'_>,
    kind: &'static str,
    geometry: Geometry,
    parameters: Vec<(&str, Value)>,
) -> Flow<Value> {
    interp.charge_vertices(geometry.vertex_count())?;
    let mut data = GeometryData::from_geometry(kind, geometry);
    data.parameters = parameters
        .into_iter()
        .map(|(name, value)| (name.into(), value))
        .collect();
    Ok(Value::Host(Host::Geometry(shared(data))))
}

fn point2_list(interp: &mut Interpreter<'_>, value: &Value, what: &str) -> Flow<Vec<Point2>> {
    let Value::Array(items) = value else {
        return Err(interp.type_error(format!(
            "{what} expects an array of points, found {}",
            value.type_name()
        )));
    };
    let items = items.borrow().clone();
    items
        .iter()
        .map(|item| vector_value::<2>(interp, item))
        .collect()
}

fn point3_list(interp: &mut Interpreter<'_>, value: &Value, what: &str) -> Flow<Vec<Point3>> {
    let Value::Array(items) = value else {
        return Err(interp.type_error(format!(
            "{what} expects an array of points, found {}",
            value.type_name()
        )));
    };
    let items = items.borrow().clone();
    items
        .iter()
        .map(|item| vector_value::<3>(interp, item))
        .collect()
}

fn number_list(interp: &Interpreter<'_>, value: &Value, what: &str) -> Flow<Vec<f64>> {
    match value {
        Value::Array(items) => Ok(items.borrow().iter().map(Value::to_number).collect()),
        Value::Host(Host::Attribute(attribute)) => Ok(attribute.borrow().array.clone()),
        other => Err(interp.type_error(format!(
            "{what} expects an array, found {}",
            other.type_name()
        ))),
    }
}

fn option(interp: &mut Interpreter<'_>, options: &Value, key: &str) -> Flow<Value> {
    match options {
        Value::Object(_) => interp.get_property(options, key),
        _ => Ok(Value::Undefined),
    }
}

fn shape_outline(path: &PathData, divisions: usize) -> Outline {
    let holes = path
        .holes
        .as_ref()
        .map(|holes| {
            holes
                .borrow()
                .iter()
                .filter_map(|hole| match hole {
                    Value::Host(Host::Path(hole)) => Some(hole.borrow().points(divisions)),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    Outline {
        contour: path.points(divisions),
        holes,
    }
}

fn extrude_geometry(interp: &mut Interpreter<'_>, args: &[Value]) -> Flow<Value> {
    let shapes = match arg(args, 0) {
        Value::Array(items) => items.borrow().clone(),
        Value::Undefined => Vec::new(),
        single => vec![single],
    };
    let options = arg(args, 1);
    let depth = match option(interp, &options, "depth")? {
        Value::Undefined => match option(interp, &options, "amount")? {
            Value::Undefined => 1.0,
            amount => amount.to_number(),
        },
        depth => depth.to_number(),
    };
    let steps = match option(interp, &options, "steps")? {
        Value::Undefined => 1,
        steps => segments(interp, &[steps], 0, 1, 1),
    };
    let curve_segments = match option(interp, &options, "curveSegments")? {
        Value::Undefined => DEFAULT_CURVE_SEGMENTS as usize,
        value => segments(interp, &[value], 0, DEFAULT_CURVE_SEGMENTS as usize, 1),
    };

    let mut outlines = Vec::with_capacity(shapes.len());
    for shape in &shapes {
        match shape {
            Value::Host(Host::Path(path)) => {
                outlines.push(shape_outline(&path.borrow(), curve_segments))
            }
            other => {
                return Err(interp.type_error(format!(
                    "ExtrudeGeometry expects Shape objects, found {}",
                    other.type_name()
                )));
            }
        }
    }

    let geometry = primitives::extrude(&outlines, depth, steps);
    let shapes = interp.new_array(shapes);
    finish_geometry(
        interp,
        "ExtrudeGeometry",
        geometry,
        vec![("shapes", shapes), ("options", options)],
    )
}

fn ellipse_args(args: &[Value], circular: bool) -> Ellipse {
    let n = |index: usize, default: f64| number_arg(args, index, default);
    let (radius, rest) = if circular {
        ([n(2, 1.0), n(2, 1.0)], 3)
    } else {
        ([n(2, 1.0), n(3, 1.0)], 4)
    };
    Ellipse {
        center: [n(0, 0.0), n(1, 0.0)],
        radius,
        start_angle: n(rest, 0.0),
        end_angle: n(rest + 1, TAU),
        clockwise: arg(args, rest + 2).truthy(),
        rotation: if circular { 0.0 } else { n(rest + 3, 0.0) },
    }
}

/// Constructors and `CSG` statics not handled by the scene/math classes.
pub(crate) fn call_builtin(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    args: Vec<Value>,
) -> Flow<Value> {
    let n = |index: usize, default: f64| number_arg(&args, index, default);
    match (builtin.owner, builtin.name) {
        ("", "BufferGeometry") => Ok(Value::Host(Host::Geometry(empty_geometry()))),
        ("", "BoxGeometry") => {
            let (width, height, depth) = (n(0, 1.0), n(1, 1.0), n(2, 1.0));
            let geometry = primitives::box_geometry(width, height, depth);
            finish_geometry(
                interp,
                "BoxGeometry",
                geometry,
                vec![
                    ("width", width.into()),
                    ("height", height.into()),
                    ("depth", depth.into()),
                ],
            )
        }
        ("", "SphereGeometry") => {
            let params = SphereParams {
                radius: n(0, 1.0),
                width_segments: segments(interp, &args, 1, 32, 3),
                height_segments: segments(interp, &args, 2, 16, 2),
                phi_start: n(3, 0.0),
                phi_length: n(4, TAU),
                theta_start: n(5, 0.0),
                theta_length: n(6, PI),
            };
            finish_geometry(
                interp,
                "SphereGeometry",
                primitives::sphere(&params),
                vec![
                    ("radius", params.radius.into()),
                    ("widthSegments", (params.width_segments as f64).into()),
                    ("heightSegments", (params.height_segments as f64).into()),
                ],
            )
        }
        ("", kind @ ("CylinderGeometry" | "ConeGeometry")) => {
            let cone = kind == "ConeGeometry";
            let shift = usize::from(!cone);
            let params = CylinderParams {
                radius_top: if cone { 0.0 } else { n(0, 1.0) },
                radius_bottom: n(shift, 1.0),
                height: n(shift + 1, 1.0),
                radial_segments: segments(interp, &args, shift + 2, 32, 3),
                height_segments: segments(interp, &args, shift + 3, 1, 1),
                open_ended: arg(&args, shift + 4).truthy(),
                theta_start: n(shift + 5, 0.0),
                theta_length: n(shift + 6, TAU),
            };
            let mut parameters = vec![
                ("height", params.height.into()),
                ("radialSegments", (params.radial_segments as f64).into()),
            ];
            if cone {
                parameters.push(("radius", params.radius_bottom.into()));
            } else {
                parameters.push(("radiusTop", params.radius_top.into()));
                parameters.push(("radiusBottom", params.radius_bottom.into()));
            }
            finish_geometry(interp, kind, primitives::cylinder(&params), parameters)
        }
        ("", "TorusGeometry") => {
            let (radius, tube) = (n(0, 1.0), n(1, 0.4));
            let radial = segments(interp, &args, 2, 12, 3);
            let tubular = segments(interp, &args, 3, 48, 3);
            let arc = n(4, TAU);
            finish_geometry(
                interp,
                "TorusGeometry",
                primitives::torus(radius, tube, radial, tubular, arc),
                vec![("radius", radius.into()), ("tube", tube.into())],
            )
        }
        ("", "LatheGeometry") => {
            let points = match arg(&args, 0) {
                Value::Undefined => vec![[0.0, -0.5], [0.5, 0.0], [0.0, 0.5]],
                value => point2_list(interp, &value, "LatheGeometry")?,
            };
            let count = segments(interp, &args, 1, 12, 1);
            let geometry = primitives::lathe(&points, count, n(2, 0.0), n(3, TAU));
            finish_geometry(
                interp,
                "LatheGeometry",
                geometry,
                vec![("segments", (count as f64).into())],
            )
        }
        ("", "ExtrudeGeometry") => extrude_geometry(interp, &args),
        ("", "BufferAttribute" | "Float32BufferAttribute") => {
            let array = number_list(interp, &arg(&args, 0), builtin.name)?;
            let item_size = n(1, 3.0);
            if !(1.0..=4.0).contains(&item_size) || item_size.fract() != 0.0 {
                return Err(interp.range_error(format!("invalid itemSize {item_size}")));
            }
            let item_size = item_size as usize;
            interp.charge_vertices(array.len() / item_size)?;
            Ok(Value::Host(Host::Attribute(shared(AttributeData {
                array,
                item_size,
            }))))
        }
        ("", kind @ ("Shape" | "Path")) => {
            let mut path = if kind == "Shape" {
                PathData::shape()
            } else {
                PathData::path()
            };
            if let Some(holes) = &path.holes {
                interp.track_array(holes);
            }
            if let Some(points) = args.first().filter(|value| !value.is_nullish()) {
                let points = point2_list(interp, points, kind)?;
                path.set_from_points(&points);
            }
            Ok(Value::Host(Host::Path(shared(path))))
        }
        ("", "LineCurve") => {
            let curve = Curve2::Line {
                from: vector_arg::<2>(interp, &args, 0)?,
                to: vector_arg::<2>(interp, &args, 1)?,
            };
            Ok(Value::Host(Host::Curve(Rc::new(curve))))
        }
        ("", "QuadraticBezierCurve") => {
            let curve = Curve2::Quadratic {
                start: vector_arg::<2>(interp, &args, 0)?,
                control: vector_arg::<2>(interp, &args, 1)?,
                end: vector_arg::<2>(interp, &args, 2)?,
            };
            Ok(Value::Host(Host::Curve(Rc::new(curve))))
        }
        ("", "CubicBezierCurve") => {
            let curve = Curve2::Cubic {
                start: vector_arg::<2>(interp, &args, 0)?,
                control1: vector_arg::<2>(interp, &args, 1)?,
                control2: vector_arg::<2>(interp, &args, 2)?,
                end: vector_arg::<2>(interp, &args, 3)?,
            };
            Ok(Value::Host(Host::Curve(Rc::new(curve))))
        }
        ("", "EllipseCurve") => {
            let curve = Curve2::Ellipse(ellipse_args(&args, false));
            Ok(Value::Host(Host::Curve(Rc::new(curve))))
        }
        ("", "CSG") => Ok(Value::Host(Host::Csg(Rc::new(Solid::default())))),
        ("CSG", name) => csg_static(interp, name, &args),
        (owner, name) => {
            let full = if owner.is_empty() {
                name.to_string()
            } else {
                format!("{owner}.{name}")
            };
            Err(interp.type_error(format!("{full} is not a constructor")))
        }
    }
}

// ---- geometry instances -------------------------------------------------

fn parameters_object(interp: &mut Interpreter<'_>, geometry: &GeometryData) -> Value {
    interp.new_object(geometry.parameters.clone())
}

pub(crate) fn geometry_property(
    interp: &mut Interpreter<'_>,
    geometry: &Shared<GeometryData>,
    key: &str,
) -> Option<Value> {
    let data = geometry.borrow();
    match key {
        "type" => Some(Value::from(data.kind)),
        "isBufferGeometry" => Some(Value::Bool(true)),
        "parameters" => Some(parameters_object(interp, &data)),
        "attributes" => {
            let props = data
                .attributes
                .iter()
                .map(|(name, attribute)| {
                    (Rc::clone(name), Value::Host(Host::Attribute(Rc::clone(attribute))))
                })
                .collect();
            Some(interp.new_object(props))
        }
        "index" => Some(index_attribute(&data)),
        "boundingBox" => Some(
            data.bounding_box
                .as_ref()
                .map(|b| Value::Host(Host::Box3(Rc::clone(b))))
                .unwrap_or(Value::Null),
        ),
        _ => None,
    }
}

fn index_attribute(data: &GeometryData) -> Value {
    match &data.index {
        Some(index) => Value::Host(Host::Attribute(shared(AttributeData {
            array: index.iter().map(|i| f64::from(*i)).collect(),
            item_size: 1,
        }))),
        None => Value::Null,
    }
}

pub(crate) fn set_geometry_property(
    interp: &mut Interpreter<'_>,
    geometry: &Shared<GeometryData>,
    key: &str,
    value: Value,
) -> Flow<()> {
    if key == "index" {
        let index = parse_index(interp, &value)?;
        geometry.borrow_mut().index = index;
    }
    Ok(())
}

fn parse_index(interp: &Interpreter<'_>, value: &Value) -> Flow<Option<Vec<u32>>> {
    if value.is_nullish() {
        return Ok(None);
    }
    let numbers = number_list(interp, value, "setIndex")?;
    numbers
        .into_iter()
        .map(|n| {
            if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) {
                Ok(n as u32)
            } else {
                Err(interp.range_error(format!("invalid vertex index {n}")))
            }
        })
        .collect::<Flow<Vec<u32>>>()
        .map(Some)
}

fn bounding_box(data: &GeometryData) -> Box3Data {
    let bounds = data.positions().ok().and_then(|positions| {
        Geometry {
            positions,
            indices: None,
        }
        .bounds()
    });
    match bounds {
        Some((min, max)) => Box3Data::new(min, max),
        None => Box3Data::empty(),
    }
}

pub(crate) fn geometry_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    geometry: &Shared<GeometryData>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    let n = |index: usize, default: f64| number_arg(args, index, default);
    match name {
        "setAttribute" => {
            let key = arg(args, 0).to_js_string();
            let Value::Host(Host::Attribute(attribute)) = arg(args, 1) else {
                return Err(interp.type_error("setAttribute expects a BufferAttribute"));
            };
            geometry.borrow_mut().set_attribute(&key, attribute);
        }
        "getAttribute" => {
            let key = arg(args, 0).to_js_string();
            return Ok(geometry
                .borrow()
                .attribute(&key)
                .map(|attribute| Value::Host(Host::Attribute(attribute)))
                .unwrap_or(Value::Undefined));
        }
        "hasAttribute" => {
            let key = arg(args, 0).to_js_string();
            return Ok(Value::Bool(geometry.borrow().attribute(&key).is_some()));
        }
        "deleteAttribute" => {
            let key = arg(args, 0).to_js_string();
            geometry
                .borrow_mut()
                .attributes
                .retain(|(name, _)| name.as_ref() != key);
        }
        "setIndex" => {
            let index = parse_index(interp, &arg(args, 0))?;
            geometry.borrow_mut().index = index;
        }
        "getIndex" => return Ok(index_attribute(&geometry.borrow())),
        "translate" => {
            let offset = [n(0, 0.0), n(1, 0.0), n(2, 0.0)];
            geometry.borrow().map_positions(|p| math::add(p, offset));
        }
        "rotateX" => {
            let angle = n(0, 0.0);
            geometry.borrow().map_positions(|p| math::rotate_x(p, angle));
        }
        "rotateY" => {
            let angle = n(0, 0.0);
            geometry.borrow().map_positions(|p| math::rotate_y(p, angle));
        }
        "rotateZ" => {
            let angle = n(0, 0.0);
            geometry.borrow().map_positions(|p| math::rotate_z(p, angle));
        }
        "scale" => {
            let factors = [n(0, 1.0), n(1, 1.0), n(2, 1.0)];
            geometry
                .borrow()
                .map_positions(|p| [p[0] * factors[0], p[1] * factors[1], p[2] * factors[2]]);
        }
        "center" => {
            let bounds = bounding_box(&geometry.borrow());
            let (min, max) = (*bounds.min.borrow(), *bounds.max.borrow());
            if (0..3).all(|i| min[i] <= max[i]) {
                let offset = math::mul_scalar(math::lerp(min, max, 0.5), -1.0);
                geometry.borrow().map_positions(|p| math::add(p, offset));
            }
        }
        "computeBoundingBox" => {
            let bounds = bounding_box(&geometry.borrow());
            geometry.borrow_mut().bounding_box = Some(Rc::new(bounds));
            return Ok(Value::Undefined);
        }
        "computeBoundingSphere" | "computeVertexNormals" | "normalizeNormals" | "dispose" => {
            return Ok(Value::Undefined);
        }
        "clone" => {
            let copy = geometry.borrow().deep_clone();
            interp.charge_vertices(copy.positions().map(|p| p.len()).unwrap_or(0))?;
            return Ok(Value::Host(Host::Geometry(shared(copy))));
        }
        "copy" => {
            let Value::Host(Host::Geometry(source)) = arg(args, 0) else {
                return Err(interp.type_error("BufferGeometry.copy expects a BufferGeometry"));
            };
            if !Rc::ptr_eq(&source, geometry) {
                let copy = source.borrow().deep_clone();
                *geometry.borrow_mut() = copy;
            }
        }
        "toNonIndexed" => {
            let expanded = {
                let data = geometry.borrow();
                let flat = data.to_geometry().map_err(|message| interp.type_error(message))?;
                let triangles = flat
                    .triangles()
                    .map_err(|err| interp.type_error(err.to_string()))?;
                Geometry::non_indexed(triangles.into_iter().flatten().collect())
            };
            interp.charge_vertices(expanded.vertex_count())?;
            let mut data = GeometryData::from_geometry("BufferGeometry", expanded);
            data.kind = geometry.borrow().kind;
            return Ok(Value::Host(Host::Geometry(shared(data))));
        }
        "setFromPoints" => {
            let points = point3_list(interp, &arg(args, 0), "setFromPoints")?;
            interp.charge_vertices(points.len())?;
            let mut data = geometry.borrow_mut();
            data.set_positions(&points);
            data.index = None;
        }
        _ => return Err(interp.type_error(format!("BufferGeometry.{name} is not a function"))),
    }
    Ok(receiver.clone())
}

pub(crate) fn attribute_property(
    interp: &mut Interpreter<'_>,
    attribute: &Shared<AttributeData>,
    key: &str,
) -> Option<Value> {
    let data = attribute.borrow();
    match key {
        "count" => Some(Value::Number(data.count() as f64)),
        "itemSize" => Some(Value::Number(data.item_size as f64)),
        "isBufferAttribute" => Some(Value::Bool(true)),
        "array" => {
            let items = data.array.iter().map(|v| Value::Number(*v)).collect();
            drop(data);
            Some(interp.new_array(items))
        }
        _ => None,
    }
}

pub(crate) fn attribute_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    attribute: &Shared<AttributeData>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    let index = number_arg(args, 0, 0.0);
    let read = |offset: usize| -> Value {
        let data = attribute.borrow();
        match crate::interpreter::number_index(index) {
            Some(index) => Value::Number(data.component(index, offset)),
            None => Value::Undefined,
        }
    };
    match name {
        "getX" => return Ok(read(0)),
        "getY" => return Ok(read(1)),
        "getZ" => return Ok(read(2)),
        "clone" => {
            let data = attribute.borrow();
            let copy = AttributeData {
                array: data.array.clone(),
                item_size: data.item_size,
            };
            return Ok(Value::Host(Host::Attribute(shared(copy))));
        }
        _ => {}
    }

    let writes: Vec<(usize, f64)> = match name {
        "setX" => vec![(0, number_arg(args, 1, 0.0))],
        "setY" => vec![(1, number_arg(args, 1, 0.0))],
        "setZ" => vec![(2, number_arg(args, 1, 0.0))],
        "setXY" => vec![(0, number_arg(args, 1, 0.0)), (1, number_arg(args, 2, 0.0))],
        "setXYZ" => vec![
            (0, number_arg(args, 1, 0.0)),
            (1, number_arg(args, 2, 0.0)),
            (2, number_arg(args, 3, 0.0)),
        ],
        _ => return Err(interp.type_error(format!("BufferAttribute.{name} is not a function"))),
    };
    let Some(index) = crate::interpreter::number_index(index) else {
        return Err(interp.range_error(format!("invalid attribute index {index}")));
    };
    let mut data = attribute.borrow_mut();
    let item_size = data.item_size;
    for (offset, value) in writes {
        if offset >= item_size {
            continue;
        }
        if let Some(slot) = data.array.get_mut(index * item_size + offset) {
            *slot = value;
        }
    }
    Ok(receiver.clone())
}

// ---- paths and curves ---------------------------------------------------

fn vector2_array(interp: &mut Interpreter<'_>, points: Vec<Point2>) -> Value {
    let items = points
        .into_iter()
        .map(|p| Value::Host(Host::Vector2(shared(p))))
        .collect();
    interp.new_array(items)
}

pub(crate) fn path_property(
    interp: &mut Interpreter<'_>,
    path: &Shared<PathData>,
    key: &str,
) -> Option<Value> {
    let data = path.borrow();
    match key {
        "holes" => data.holes.as_ref().map(|holes| Value::Array(Rc::clone(holes))),
        "type" => Some(Value::from(if data.is_shape() { "Shape" } else { "Path" })),
        "currentPoint" => Some(Value::Host(Host::Vector2(shared(data.current)))),
        "curves" => {
            let curves = data
                .curves
                .iter()
                .map(|curve| Value::Host(Host::Curve(Rc::new(*curve))))
                .collect();
            drop(data);
            Some(interp.new_array(curves))
        }
        _ => None,
    }
}

pub(crate) fn set_path_property(
    interp: &mut Interpreter<'_>,
    path: &Shared<PathData>,
    key: &str,
    value: Value,
) -> Flow<()> {
    if key == "holes" && path.borrow().is_shape() {
        let Value::Array(holes) = value else {
            return Err(interp.type_error("Shape.holes must be an array of paths"));
        };
        path.borrow_mut().holes = Some(holes);
    }
    Ok(())
}

pub(crate) fn path_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    path: &Shared<PathData>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    let n = |index: usize| number_arg(args, index, 0.0);
    match name {
        "moveTo" => path.borrow_mut().move_to([n(0), n(1)]),
        "lineTo" => path.borrow_mut().line_to([n(0), n(1)]),
        "quadraticCurveTo" => path.borrow_mut().quadratic_to([n(0), n(1)], [n(2), n(3)]),
        "bezierCurveTo" => {
            path.borrow_mut()
                .bezier_to([n(0), n(1)], [n(2), n(3)], [n(4), n(5)])
        }
        "arc" => path.borrow_mut().ellipse(ellipse_args(args, true)),
        "absarc" => path.borrow_mut().absellipse(ellipse_args(args, true)),
        "ellipse" => path.borrow_mut().ellipse(ellipse_args(args, false)),
        "absellipse" => path.borrow_mut().absellipse(ellipse_args(args, false)),
        "closePath" => path.borrow_mut().close(),
        "setFromPoints" => {
            let points = point2_list(interp, &arg(args, 0), "setFromPoints")?;
            path.borrow_mut().set_from_points(&points);
        }
        "getPoints" | "getSpacedPoints" => {
            let divisions = segments(interp, args, 0, DEFAULT_CURVE_SEGMENTS as usize, 1);
            let points = path.borrow().points(divisions);
            interp.charge_vertices(points.len())?;
            return Ok(vector2_array(interp, points));
        }
        _ => {
            let class = if path.borrow().is_shape() { "Shape" } else { "Path" };
            return Err(interp.type_error(format!("{class}.{name} is not a function")));
        }
    }
    interp.tick()?;
    Ok(receiver.clone())
}

pub(crate) fn curve_property(curve: &Curve2, key: &str) -> Option<Value> {
    match key {
        "type" => Some(Value::from(curve.class_name())),
        "isCurve" => Some(Value::Bool(true)),
        _ => None,
    }
}

pub(crate) fn curve_method(
    interp: &mut Interpreter<'_>,
    curve: &Curve2,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    match name {
        "getPoint" => {
            let point = curve.point_at(number_arg(args, 0, 0.0));
            Ok(Value::Host(Host::Vector2(shared(point))))
        }
        "getPoints" | "getSpacedPoints" => {
            let divisions = segments(interp, args, 0, 5, 1);
            let points = curve.points(divisions);
            interp.charge_vertices(points.len())?;
            Ok(vector2_array(interp, points))
        }
        _ => Err(interp.type_error(format!(
            "{}.{name} is not a function",
            curve.class_name()
        ))),
    }
}

// ---- CSG ----------------------------------------------------------------

fn node_transform(node: &Shared<host::Node>) -> Transform {
    let data = node.borrow();
    Transform {
        position: *data.position.borrow(),
        rotation: *data.rotation.borrow(),
        scale: *data.scale.borrow(),
    }
}

fn inverse_apply(transform: &Transform, point: Point3) -> Point3 {
    let [rx, ry, rz] = transform.rotation;
    let local = math::sub(point, transform.position);
    let local = math::rotate_x(local, -rx);
    let local = math::rotate_y(local, -ry);
    let local = math::rotate_z(local, -rz);
    [
        local[0] / transform.scale[0],
        local[1] / transform.scale[1],
        local[2] / transform.scale[2],
    ]
}

fn geometry_triangles(interp: &Interpreter<'_>, geometry: &GeometryData) -> Flow<Vec<[Point3; 3]>> {
    geometry
        .to_geometry()
        .map_err(|message| interp.type_error(message))?
        .triangles()
        .map_err(|err| interp.type_error(format!("CSG operand: {err}")))
}

fn solid_from_mesh(interp: &mut Interpreter<'_>, value: &Value) -> Flow<Solid> {
    let node = match value {
        Value::Host(Host::Object3D(node)) => Rc::clone(node),
        Value::Host(Host::Csg(solid)) => return Ok(Solid::clone(solid)),
        other => {
            return Err(interp.type_error(format!(
                "CSG expects a Mesh, found {}",
                other.type_name()
            )));
        }
    };
    let geometry = match &node.borrow().kind {
        NodeKind::Mesh { geometry, .. } => Rc::clone(geometry),
        _ => return Err(interp.type_error("CSG expects a Mesh, found a Group")),
    };
    let transform = node_transform(&node);
    let mut triangles = geometry_triangles(interp, &geometry.borrow())?;
    for triangle in &mut triangles {
        *triangle = triangle.map(|p| transform.apply(p));
        if transform.is_mirroring() {
            triangle.swap(1, 2);
        }
    }
    check_polygons(interp, triangles.len())?;
    Ok(Solid::from_triangles(&triangles))
}

fn check_polygons(interp: &Interpreter<'_>, count: usize) -> Flow<()> {
    let cap = interp.limits().max_csg_polygons;
    if count > cap {
        return Err(interp.fatal(format!(
            "CSG operation exceeded the polygon limit ({count} > {cap})"
        )));
    }
    Ok(())
}

fn boolean(interp: &Interpreter<'_>, name: &str, a: &Solid, b: &Solid) -> Flow<Solid> {
    check_polygons(interp, a.polygon_count() + b.polygon_count())?;
    let result = match name {
        "union" => a.union(b),
        "subtract" => a.subtract(b),
        _ => a.intersect(b),
    };
    check_polygons(interp, result.polygon_count())?;
    Ok(result)
}

/// Geometry of `solid` expressed in the local space of `transform`.
fn localize(interp: &Interpreter<'_>, solid: &Solid, transform: Option<&Transform>) -> Flow<Geometry> {
    let mut geometry = solid.to_geometry();
    if let Some(transform) = transform {
        if transform.scale.iter().any(|s| *s == 0.0) {
            return Err(interp.type_error("cannot map CSG result into an object with zero scale"));
        }
        for position in &mut geometry.positions {
            *position = inverse_apply(transform, *position);
        }
        if transform.is_mirroring() {
            geometry.flip_winding();
        }
    }
    Ok(geometry)
}

fn solid_to_mesh(
    interp: &mut Interpreter<'_>,
    solid: &Solid,
    frame: Option<&Shared<host::Node>>,
    material: Value,
) -> Flow<Value> {
    let transform = frame.map(node_transform);
    let geometry = localize(interp, solid, transform.as_ref())?;
    interp.charge_vertices(geometry.vertex_count())?;
    let geometry = shared(GeometryData::from_geometry("BufferGeometry", geometry));
    let node = host::new_node(interp, NodeKind::Mesh { geometry, material });
    if let Some(transform) = transform {
        let data = node.borrow();
        *data.position.borrow_mut() = transform.position;
        *data.rotation.borrow_mut() = transform.rotation;
        *data.scale.borrow_mut() = transform.scale;
    }
    Ok(Value::Host(Host::Object3D(node)))
}

fn mesh_material(value: &Value) -> Value {
    match value {
        Value::Host(Host::Object3D(node)) => match &node.borrow().kind {
            NodeKind::Mesh { material, .. } => material.clone(),
            _ => Value::Undefined,
        },
        _ => Value::Undefined,
    }
}

fn frame_arg(value: &Value) -> Option<Shared<host::Node>> {
    match value {
        Value::Host(Host::Object3D(node)) => Some(Rc::clone(node)),
        _ => None,
    }
}

fn csg_static(interp: &mut Interpreter<'_>, name: &str, args: &[Value]) -> Flow<Value> {
    match name {
        "union" | "subtract" | "intersect" => {
            let first = arg(args, 0);
            let a = solid_from_mesh(interp, &first)?;
            let b = solid_from_mesh(interp, &arg(args, 1))?;
            let result = boolean(interp, name, &a, &b)?;
            tracing::trace!(op = name, polygons = result.polygon_count(), "csg");
            let frame = frame_arg(&first);
            solid_to_mesh(interp, &result, frame.as_ref(), mesh_material(&first))
        }
        "fromMesh" => {
            let solid = solid_from_mesh(interp, &arg(args, 0))?;
            Ok(Value::Host(Host::Csg(Rc::new(solid))))
        }
        "fromGeometry" => {
            let Value::Host(Host::Geometry(geometry)) = arg(args, 0) else {
                return Err(interp.type_error("CSG.fromGeometry expects a BufferGeometry"));
            };
            let triangles = geometry_triangles(interp, &geometry.borrow())?;
            check_polygons(interp, triangles.len())?;
            Ok(Value::Host(Host::Csg(Rc::new(Solid::from_triangles(&triangles)))))
        }
        "toMesh" | "toGeometry" => {
            let Value::Host(Host::Csg(solid)) = arg(args, 0) else {
                return Err(interp.type_error(format!("CSG.{name} expects a CSG object")));
            };
            let frame = frame_arg(&arg(args, 1));
            if name == "toMesh" {
                return solid_to_mesh(interp, &solid, frame.as_ref(), arg(args, 2));
            }
            let transform = frame.as_ref().map(node_transform);
            let geometry = localize(interp, &solid, transform.as_ref())?;
            interp.charge_vertices(geometry.vertex_count())?;
            let data = GeometryData::from_geometry("BufferGeometry", geometry);
            Ok(Value::Host(Host::Geometry(shared(data))))
        }
        _ => Err(interp.type_error(format!("CSG.{name} is not a function"))),
    }
}

pub(crate) fn csg_method(
    interp: &mut Interpreter<'_>,
    solid: &Rc<Solid>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    match name {
        "union" | "subtract" | "intersect" => {
            let Value::Host(Host::Csg(other)) = arg(args, 0) else {
                return Err(interp.type_error(format!("CSG.{name} expects a CSG object")));
            };
            let result = boolean(interp, name, solid, &other)?;
            Ok(Value::Host(Host::Csg(Rc::new(result))))
        }
        "clone" => Ok(Value::Host(Host::Csg(Rc::new(Solid::clone(solid))))),
        _ => Err(interp.type_error(format!("CSG.{name} is not a function"))),
    }
}

#[cfg(test)]
mod tests {
    use cad_mesh::Transform;
    use cad_mesh::primitives::box_geometry;

    use super::{AttributeData, GeometryData, inverse_apply};
    use crate::value::shared;

    #[test]
    fn inverse_transform_undoes_apply() {
        let transform = Transform {
            position: [1.0, -2.0, 3.0],
            rotation: [0.4, 1.2, -0.3],
            scale: [2.0, 0.5, -1.0],
        };
        let point = [0.7, 0.1, -4.0];
        let back = inverse_apply(&transform, transform.apply(point));
        for i in 0..3 {
            assert!((back[i] - point[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn geometry_round_trips_through_attributes() {
        let data = GeometryData::from_geometry("BoxGeometry", box_geometry(1.0, 2.0, 3.0));
        let geometry = data.to_geometry().unwrap();
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(geometry.triangle_count(), 12);
    }

    #[test]
    fn malformed_position_attribute_is_rejected() {
        let mut data = GeometryData::new("BufferGeometry");
        data.set_attribute(
            "position",
            shared(AttributeData {
                array: vec![0.0; 7],
                item_size: 3,
            }),
        );
        let err = data.to_geometry().unwrap_err();
        assert!(err.contains("not a multiple of 3"));
    }
}
