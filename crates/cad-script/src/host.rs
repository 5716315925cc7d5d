//! Host objects: the three.js-style classes a script manipulates.

use std::array;
use std::f64::consts::PI;
use std::rc::{Rc, Weak};

use cad_mesh::math::{self, Point3};
use cad_mesh::{SceneGroup, SceneMesh, SceneObject, Solid, Transform};

use crate::error::ExecutionError;
use crate::geometries::{self, AttributeData, GeometryData};
use crate::interpreter::{Flow, Interpreter};
use crate::shapes::{Curve2, PathData};
use crate::value::{Builtin, BoundMethod, Shared, Value, arg, number_arg, shared};

/// Deepest scene tree a script may build or export.
pub(crate) const MAX_SCENE_DEPTH: usize = 256;

#[derive(Clone)]
pub(crate) enum Host {
    Vector2(Shared<[f64; 2]>),
    Vector3(Shared<[f64; 3]>),
    Euler(Shared<[f64; 3]>),
    Color(Shared<[f64; 3]>),
    Box3(Rc<Box3Data>),
    Geometry(Shared<GeometryData>),
    Attribute(Shared<AttributeData>),
    Material(Shared<MaterialData>),
    Object3D(Shared<Node>),
    Path(Shared<PathData>),
    Curve(Rc<Curve2>),
    Csg(Rc<Solid>),
}

impl Host {
    pub fn class_name(&self) -> &'static str {
        match self {
            Host::Vector2(_) => "Vector2",
            Host::Vector3(_) => "Vector3",
            Host::Euler(_) => "Euler",
            Host::Color(_) => "Color",
            Host::Box3(_) => "Box3",
            Host::Geometry(geometry) => geometry.borrow().kind,
            Host::Attribute(_) => "BufferAttribute",
            Host::Material(material) => material.borrow().kind,
            Host::Object3D(node) => node.borrow().kind.class_name(),
            Host::Path(path) => {
                if path.borrow().is_shape() {
                    "Shape"
                } else {
                    "Path"
                }
            }
            Host::Curve(curve) => curve.class_name(),
            Host::Csg(_) => "CSG",
        }
    }

    pub fn ptr_eq(&self, other: &Host) -> bool {
        match (self, other) {
            (Host::Vector2(a), Host::Vector2(b)) => Rc::ptr_eq(a, b),
            (Host::Vector3(a), Host::Vector3(b))
            | (Host::Euler(a), Host::Euler(b))
            | (Host::Color(a), Host::Color(b)) => Rc::ptr_eq(a, b),
            (Host::Box3(a), Host::Box3(b)) => Rc::ptr_eq(a, b),
            (Host::Geometry(a), Host::Geometry(b)) => Rc::ptr_eq(a, b),
            (Host::Attribute(a), Host::Attribute(b)) => Rc::ptr_eq(a, b),
            (Host::Material(a), Host::Material(b)) => Rc::ptr_eq(a, b),
            (Host::Object3D(a), Host::Object3D(b)) => Rc::ptr_eq(a, b),
            (Host::Path(a), Host::Path(b)) => Rc::ptr_eq(a, b),
            (Host::Curve(a), Host::Curve(b)) => Rc::ptr_eq(a, b),
            (Host::Csg(a), Host::Csg(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `instanceof` against a global class name, including base classes.
    pub fn instance_of(&self, class: &str) -> bool {
        let name = self.class_name();
        if name == class {
            return true;
        }
        match self {
            Host::Object3D(_) => class == "Object3D",
            Host::Geometry(_) => class == "BufferGeometry",
            Host::Attribute(_) => class == "Float32BufferAttribute",
            Host::Material(_) => class == "Material",
            Host::Path(_) => class == "Path" || class == "CurvePath",
            Host::Curve(_) => class == "Curve",
            _ => false,
        }
    }
}

pub(crate) struct Box3Data {
    pub min: Shared<[f64; 3]>,
    pub max: Shared<[f64; 3]>,
}

impl Box3Data {
    pub fn new(min: Point3, max: Point3) -> Self {
        Self {
            min: shared(min),
            max: shared(max),
        }
    }

    pub fn empty() -> Self {
        Self::new([f64::INFINITY; 3], [f64::NEG_INFINITY; 3])
    }

    fn is_empty(&self) -> bool {
        let min = self.min.borrow();
        let max = self.max.borrow();
        (0..3).any(|i| max[i] < min[i])
    }

    fn expand(&self, point: Point3) {
        let mut min = self.min.borrow_mut();
        let mut max = self.max.borrow_mut();
        for i in 0..3 {
            min[i] = min[i].min(point[i]);
            max[i] = max[i].max(point[i]);
        }
    }
}

pub(crate) struct MaterialData {
    pub kind: &'static str,
    pub color: Shared<[f64; 3]>,
    pub props: Vec<(Rc<str>, Value)>,
}

pub(crate) enum NodeKind {
    Mesh {
        geometry: Shared<GeometryData>,
        material: Value,
    },
    Group,
    Object3D,
}

impl NodeKind {
    fn class_name(&self) -> &'static str {
        match self {
            NodeKind::Mesh { .. } => "Mesh",
            NodeKind::Group => "Group",
            NodeKind::Object3D => "Object3D",
        }
    }
}

/// Scene-graph node behind `Mesh`, `Group` and `Object3D`.
pub(crate) struct Node {
    pub kind: NodeKind,
    pub position: Shared<[f64; 3]>,
    pub rotation: Shared<[f64; 3]>,
    pub scale: Shared<[f64; 3]>,
    pub children: Vec<Shared<Node>>,
    pub parent: Weak<std::cell::RefCell<Node>>,
    /// Levels of descendants below this node.
    pub height: usize,
    pub extras: Vec<(Rc<str>, Value)>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            position: shared([0.0; 3]),
            rotation: shared([0.0; 3]),
            scale: shared([1.0; 3]),
            children: Vec::new(),
            parent: Weak::new(),
            height: 0,
            extras: Vec::new(),
        }
    }

    fn transform(&self) -> Transform {
        Transform {
            position: *self.position.borrow(),
            rotation: *self.rotation.borrow(),
            scale: *self.scale.borrow(),
        }
    }

    fn extra(&self, key: &str) -> Option<Value> {
        self.extras
            .iter()
            .find(|(name, _)| name.as_ref() == key)
            .map(|(_, value)| value.clone())
    }

    fn set_extra(&mut self, key: &str, value: Value) {
        match self.extras.iter_mut().find(|(name, _)| name.as_ref() == key) {
            Some(slot) => slot.1 = value,
            None => self.extras.push((key.into(), value)),
        }
    }
}

pub(crate) fn new_node(interp: &mut Interpreter<'_>, kind: NodeKind) -> Shared<Node> {
    let node = shared(Node::new(kind));
    interp.track_node(&node);
    node
}

/// Drops every value a node holds; used when the sandbox is torn down.
pub(crate) fn clear_node(node: &Shared<Node>) {
    let mut node = node.borrow_mut();
    let children = std::mem::take(&mut node.children);
    let extras = std::mem::take(&mut node.extras);
    if let NodeKind::Mesh { material, .. } = &mut node.kind {
        *material = Value::Undefined;
    }
    drop(node);
    drop(children);
    drop(extras);
}

// ---- conversions ------------------------------------------------------

/// Converts a finished node tree into an exportable scene.
pub(crate) fn to_scene(node: &Shared<Node>) -> Result<SceneObject, ExecutionError> {
    convert_node(node, 0)
}

fn convert_node(node: &Shared<Node>, depth: usize) -> Result<SceneObject, ExecutionError> {
    if depth > MAX_SCENE_DEPTH {
        return Err(ExecutionError::new(format!(
            "scene graph is nested deeper than {MAX_SCENE_DEPTH} levels"
        )));
    }
    let node = node.borrow();
    let transform = node.transform();
    let mut children = Vec::with_capacity(node.children.len() + 1);
    for child in &node.children {
        children.push(convert_node(child, depth + 1)?);
    }

    match &node.kind {
        NodeKind::Mesh { geometry, material } => {
            let geometry = geometry
                .borrow()
                .to_geometry()
                .map_err(ExecutionError::new)?;
            let color = material_color(material);
            if children.is_empty() {
                return Ok(SceneObject::Mesh(SceneMesh {
                    geometry,
                    color,
                    transform,
                }));
            }
            let mut own = SceneMesh::new(geometry);
            own.color = color;
            children.insert(0, SceneObject::Mesh(own));
            Ok(SceneObject::Group(SceneGroup {
                children,
                transform,
            }))
        }
        NodeKind::Group | NodeKind::Object3D => Ok(SceneObject::Group(SceneGroup {
            children,
            transform,
        })),
    }
}

fn material_color(material: &Value) -> Option<u32> {
    match material {
        Value::Host(Host::Material(material)) => Some(color_hex(*material.borrow().color.borrow())),
        Value::Array(items) => items.borrow().first().and_then(material_color),
        _ => None,
    }
}

pub(crate) fn color_hex(rgb: [f64; 3]) -> u32 {
    rgb.iter().fold(0u32, |acc, channel| {
        let byte = (channel.clamp(0.0, 1.0) * 255.0).round() as u32;
        (acc << 8) | byte
    })
}

fn hex_rgb(hex: u32) -> [f64; 3] {
    [
        f64::from((hex >> 16) & 0xff) / 255.0,
        f64::from((hex >> 8) & 0xff) / 255.0,
        f64::from(hex & 0xff) / 255.0,
    ]
}

const NAMED_COLORS: &[(&str, u32)] = &[
    ("black", 0x000000),
    ("white", 0xffffff),
    ("red", 0xff0000),
    ("green", 0x008000),
    ("lime", 0x00ff00),
    ("blue", 0x0000ff),
    ("yellow", 0xffff00),
    ("cyan", 0x00ffff),
    ("magenta", 0xff00ff),
    ("orange", 0xffa500),
    ("purple", 0x800080),
    ("pink", 0xffc0cb),
    ("brown", 0xa52a2a),
    ("gray", 0x808080),
    ("grey", 0x808080),
    ("silver", 0xc0c0c0),
    ("gold", 0xffd700),
    ("navy", 0x000080),
    ("teal", 0x008080),
    ("maroon", 0x800000),
    ("olive", 0x808000),
    ("beige", 0xf5f5dc),
    ("darkgray", 0xa9a9a9),
    ("lightgray", 0xd3d3d3),
];

fn parse_css_color(text: &str) -> Option<[f64; 3]> {
    let text = text.trim().to_ascii_lowercase();
    if let Some(hex) = text.strip_prefix('#') {
        return match hex.len() {
            6 => u32::from_str_radix(hex, 16).ok().map(hex_rgb),
            3 => {
                let expanded: String = hex.chars().flat_map(|ch| [ch, ch]).collect();
                u32::from_str_radix(&expanded, 16).ok().map(hex_rgb)
            }
            _ => None,
        };
    }
    if let Some(body) = text
        .strip_prefix("rgb(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let channels: Vec<f64> = body
            .split(',')
            .filter_map(|part| part.trim().parse::<f64>().ok())
            .collect();
        return match channels.as_slice() {
            [r, g, b] => Some([r / 255.0, g / 255.0, b / 255.0]),
            _ => None,
        };
    }
    NAMED_COLORS
        .iter()
        .find(|(name, _)| *name == text)
        .map(|(_, hex)| hex_rgb(*hex))
}

pub(crate) fn parse_color(interp: &Interpreter<'_>, value: &Value) -> Flow<[f64; 3]> {
    match value {
        Value::Number(hex) => Ok(hex_rgb(*hex as u32)),
        Value::Str(text) => parse_css_color(text)
            .ok_or_else(|| interp.type_error(format!("unknown colour '{text}'"))),
        Value::Host(Host::Color(color)) => Ok(*color.borrow()),
        other => Err(interp.type_error(format!(
            "expected a colour, found {}",
            other.type_name()
        ))),
    }
}

fn color_from_args(interp: &Interpreter<'_>, args: &[Value]) -> Flow<[f64; 3]> {
    match args {
        [] | [Value::Undefined, ..] => Ok([1.0, 1.0, 1.0]),
        [Value::Number(r), Value::Number(g), Value::Number(b), ..] => Ok([*r, *g, *b]),
        [single, ..] => parse_color(interp, single),
    }
}

/// Reads a vector argument; accepts any vector-like host or `{x, y, z}`.
pub(crate) fn vector_arg<const N: usize>(
    interp: &mut Interpreter<'_>,
    args: &[Value],
    index: usize,
) -> Flow<[f64; N]> {
    vector_value::<N>(interp, &arg(args, index))
}

pub(crate) fn vector_value<const N: usize>(
    interp: &mut Interpreter<'_>,
    value: &Value,
) -> Flow<[f64; N]> {
    let components: [f64; 3] = match value {
        Value::Host(Host::Vector2(v)) => {
            let v = v.borrow();
            [v[0], v[1], 0.0]
        }
        Value::Host(Host::Vector3(v) | Host::Euler(v)) => *v.borrow(),
        Value::Object(_) => {
            let mut out = [0.0; 3];
            for (slot, key) in out.iter_mut().zip(["x", "y", "z"]) {
                *slot = match interp.get_property(value, key)? {
                    Value::Undefined => 0.0,
                    other => other.to_number(),
                };
            }
            out
        }
        Value::Array(items) => {
            let items = items.borrow();
            array::from_fn(|i| items.get(i).map(Value::to_number).unwrap_or(0.0))
        }
        other => {
            return Err(interp.type_error(format!(
                "expected a Vector{N}, found {}",
                other.type_name()
            )));
        }
    };
    Ok(array::from_fn(|i| components[i]))
}

// ---- rotation helpers ---------------------------------------------------

type Matrix3 = [[f64; 3]; 3];

fn euler_matrix(euler: Point3) -> Matrix3 {
    let (b, a) = euler[0].sin_cos();
    let (d, c) = euler[1].sin_cos();
    let (f, e) = euler[2].sin_cos();
    let (ae, af, be, bf) = (a * e, a * f, b * e, b * f);
    [
        [c * e, -c * f, d],
        [af + be * d, ae - bf * d, -b * c],
        [bf - ae * d, be + af * d, a * c],
    ]
}

fn matrix_euler(m: &Matrix3) -> Point3 {
    let y = m[0][2].clamp(-1.0, 1.0).asin();
    if m[0][2].abs() < 0.999_999_9 {
        [(-m[1][2]).atan2(m[2][2]), y, (-m[0][1]).atan2(m[0][0])]
    } else {
        [m[2][1].atan2(m[1][1]), y, 0.0]
    }
}

fn axis_angle_matrix(axis: Point3, angle: f64) -> Matrix3 {
    let [x, y, z] = math::normalize(axis);
    let (s, c) = angle.sin_cos();
    let t = 1.0 - c;
    [
        [t * x * x + c, t * x * y - s * z, t * x * z + s * y],
        [t * x * y + s * z, t * y * y + c, t * y * z - s * x],
        [t * x * z - s * y, t * y * z + s * x, t * z * z + c],
    ]
}

fn mat_mul(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    array::from_fn(|row| array::from_fn(|col| (0..3).map(|k| a[row][k] * b[k][col]).sum()))
}

fn mat_apply(m: &Matrix3, v: Point3) -> Point3 {
    array::from_fn(|row| (0..3).map(|k| m[row][k] * v[k]).sum())
}

// ---- vectors ------------------------------------------------------------

const VECTOR_METHODS: &[&str] = &[
    "set", "setScalar", "setX", "setY", "copy", "clone", "add", "sub", "multiply", "divide",
    "addScalar", "subScalar", "multiplyScalar", "divideScalar", "addVectors", "subVectors",
    "multiplyVectors", "addScaledVector", "negate", "normalize", "setLength", "lerp",
    "lerpVectors", "min", "max", "floor", "ceil", "round", "fromArray", "length", "lengthSq",
    "manhattanLength", "dot", "distanceTo", "distanceToSquared", "equals", "toArray",
];
const VECTOR3_METHODS: &[&str] = &[
    "setZ", "cross", "crossVectors", "applyAxisAngle", "applyEuler", "angleTo",
];
const VECTOR2_METHODS: &[&str] = &["angle", "rotateAround"];
const EULER_METHODS: &[&str] = &["set", "copy", "clone", "toArray", "equals", "setFromVector3"];

fn zip<const N: usize>(a: [f64; N], b: [f64; N], f: impl Fn(f64, f64) -> f64) -> [f64; N] {
    array::from_fn(|i| f(a[i], b[i]))
}

fn pad3<const N: usize>(v: [f64; N]) -> Point3 {
    array::from_fn(|i| v.get(i).copied().unwrap_or(0.0))
}

fn trim<const N: usize>(v: Point3) -> [f64; N] {
    array::from_fn(|i| v[i])
}

fn norm<const N: usize>(v: [f64; N]) -> f64 {
    v.iter().map(|c| c * c).sum::<f64>().sqrt()
}

fn with_length<const N: usize>(v: [f64; N], length: f64) -> [f64; N] {
    let current = norm(v);
    if current == 0.0 {
        v
    } else {
        v.map(|c| c / current * length)
    }
}

fn vector_method<const N: usize>(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    data: &Shared<[f64; N]>,
    wrap: fn(Shared<[f64; N]>) -> Host,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    let current = *data.borrow();
    let scalar = |index: usize| number_arg(args, index, 0.0);

    let updated: [f64; N] = match name {
        "set" => array::from_fn(|i| number_arg(args, i, current[i])),
        "setScalar" => [scalar(0); N],
        "setX" | "setY" | "setZ" => {
            let index = match name {
                "setX" => 0,
                "setY" => 1,
                _ => 2,
            };
            let mut next = current;
            if let Some(slot) = next.get_mut(index) {
                *slot = scalar(0);
            }
            next
        }
        "copy" | "setFromVector3" => vector_arg::<N>(interp, args, 0)?,
        "add" => zip(current, vector_arg(interp, args, 0)?, |a, b| a + b),
        "sub" => zip(current, vector_arg(interp, args, 0)?, |a, b| a - b),
        "multiply" => zip(current, vector_arg(interp, args, 0)?, |a, b| a * b),
        "divide" => zip(current, vector_arg(interp, args, 0)?, |a, b| a / b),
        "addScalar" => current.map(|a| a + scalar(0)),
        "subScalar" => current.map(|a| a - scalar(0)),
        "multiplyScalar" => current.map(|a| a * scalar(0)),
        "divideScalar" => current.map(|a| a / scalar(0)),
        "addVectors" => zip(vector_arg(interp, args, 0)?, vector_arg(interp, args, 1)?, |a, b| a + b),
        "subVectors" => zip(vector_arg(interp, args, 0)?, vector_arg(interp, args, 1)?, |a, b| a - b),
        "multiplyVectors" => {
            zip(vector_arg(interp, args, 0)?, vector_arg(interp, args, 1)?, |a, b| a * b)
        }
        "addScaledVector" => {
            let s = scalar(1);
            zip(current, vector_arg(interp, args, 0)?, |a, b| a + b * s)
        }
        "negate" => current.map(|a| -a),
        "normalize" => with_length(current, 1.0),
        "setLength" => with_length(current, scalar(0)),
        "lerp" => {
            let t = scalar(1);
            zip(current, vector_arg(interp, args, 0)?, |a, b| a + (b - a) * t)
        }
        "lerpVectors" => {
            let t = scalar(2);
            zip(vector_arg(interp, args, 0)?, vector_arg(interp, args, 1)?, |a, b| a + (b - a) * t)
        }
        "min" => zip(current, vector_arg(interp, args, 0)?, f64::min),
        "max" => zip(current, vector_arg(interp, args, 0)?, f64::max),
        "floor" => current.map(f64::floor),
        "ceil" => current.map(f64::ceil),
        "round" => current.map(|a| (a + 0.5).floor()),
        "fromArray" => {
            let offset = number_arg(args, 1, 0.0).max(0.0) as usize;
            match arg(args, 0) {
                Value::Array(items) => {
                    let items = items.borrow();
                    array::from_fn(|i| items.get(offset + i).map(Value::to_number).unwrap_or(f64::NAN))
                }
                other => {
                    return Err(interp.type_error(format!(
                        "fromArray expects an array, found {}",
                        other.type_name()
                    )));
                }
            }
        }
        "cross" if N == 3 => trim(math::cross(pad3(current), pad3(vector_arg::<N>(interp, args, 0)?))),
        "crossVectors" if N == 3 => trim(math::cross(
            pad3(vector_arg::<N>(interp, args, 0)?),
            pad3(vector_arg::<N>(interp, args, 1)?),
        )),
        "applyAxisAngle" if N == 3 => {
            let axis = vector_arg::<3>(interp, args, 0)?;
            trim(mat_apply(&axis_angle_matrix(axis, scalar(1)), pad3(current)))
        }
        "applyEuler" if N == 3 => {
            let euler = vector_arg::<3>(interp, args, 0)?;
            trim(math::rotate_euler_xyz(pad3(current), euler))
        }
        "rotateAround" if N == 2 => {
            let center = vector_arg::<2>(interp, args, 0)?;
            let (s, c) = scalar(1).sin_cos();
            let x = current[0] - center[0];
            let y = current[1] - center[1];
            trim([x * c - y * s + center[0], x * s + y * c + center[1], 0.0])
        }
        "clone" => return Ok(Value::Host(wrap(shared(current)))),
        "length" => return Ok(Value::Number(norm(current))),
        "lengthSq" => return Ok(Value::Number(current.iter().map(|c| c * c).sum())),
        "manhattanLength" => return Ok(Value::Number(current.iter().map(|c| c.abs()).sum())),
        "dot" => {
            let other = vector_arg::<N>(interp, args, 0)?;
            return Ok(Value::Number(zip(current, other, |a, b| a * b).iter().sum()));
        }
        "distanceTo" | "distanceToSquared" => {
            let other = vector_arg::<N>(interp, args, 0)?;
            let squared: f64 = zip(current, other, |a, b| (a - b) * (a - b)).iter().sum();
            return Ok(Value::Number(if name == "distanceTo" {
                squared.sqrt()
            } else {
                squared
            }));
        }
        "equals" => {
            let other = vector_arg::<N>(interp, args, 0)?;
            return Ok(Value::Bool(current == other));
        }
        "angleTo" if N == 3 => {
            let other = vector_arg::<N>(interp, args, 0)?;
            let denominator = norm(current) * norm(other);
            if denominator == 0.0 {
                return Ok(Value::Number(PI / 2.0));
            }
            let cos = zip(current, other, |a, b| a * b).iter().sum::<f64>() / denominator;
            return Ok(Value::Number(cos.clamp(-1.0, 1.0).acos()));
        }
        "angle" if N == 2 => return Ok(Value::Number((-current[1]).atan2(-current[0]) + PI)),
        "toArray" => {
            let items = current.iter().map(|c| Value::Number(*c)).collect();
            return Ok(interp.new_array(items));
        }
        _ => {
            return Err(interp.type_error(format!(
                "{}.{name} is not a function",
                wrap(shared(current)).class_name()
            )));
        }
    };

    *data.borrow_mut() = updated;
    Ok(receiver.clone())
}

fn vector_component<const N: usize>(v: &[f64; N], key: &str) -> Option<Value> {
    let index = match key {
        "x" => 0,
        "y" => 1,
        "z" => 2,
        _ => return None,
    };
    v.get(index).map(|c| Value::Number(*c))
}

fn set_vector_component<const N: usize>(v: &Shared<[f64; N]>, key: &str, value: &Value) {
    let index = match key {
        "x" | "r" => 0,
        "y" | "g" => 1,
        "z" | "b" => 2,
        _ => return,
    };
    if let Some(slot) = v.borrow_mut().get_mut(index) {
        *slot = value.to_number();
    }
}

// ---- colours ------------------------------------------------------------

const COLOR_METHODS: &[&str] = &[
    "set", "setHex", "setRGB", "setHSL", "setScalar", "getHex", "getHexString", "clone", "copy",
    "lerp", "multiplyScalar", "equals",
];

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * 6.0 * (2.0 / 3.0 - t)
    } else {
        p
    }
}

fn hsl_rgb(h: f64, s: f64, l: f64) -> [f64; 3] {
    let h = h.rem_euclid(1.0);
    let s = s.clamp(0.0, 1.0);
    let l = l.clamp(0.0, 1.0);
    if s == 0.0 {
        return [l; 3];
    }
    let p = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let q = 2.0 * l - p;
    [
        hue_to_rgb(q, p, h + 1.0 / 3.0),
        hue_to_rgb(q, p, h),
        hue_to_rgb(q, p, h - 1.0 / 3.0),
    ]
}

fn color_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    color: &Shared<[f64; 3]>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    let current = *color.borrow();
    let updated = match name {
        "set" => color_from_args(interp, args)?,
        "setHex" => hex_rgb(number_arg(args, 0, 0.0) as u32),
        "setRGB" => [
            number_arg(args, 0, 0.0),
            number_arg(args, 1, 0.0),
            number_arg(args, 2, 0.0),
        ],
        "setHSL" => hsl_rgb(
            number_arg(args, 0, 0.0),
            number_arg(args, 1, 0.0),
            number_arg(args, 2, 0.0),
        ),
        "setScalar" => [number_arg(args, 0, 0.0); 3],
        "copy" => parse_color(interp, &arg(args, 0))?,
        "lerp" => {
            let other = parse_color(interp, &arg(args, 0))?;
            let t = number_arg(args, 1, 0.0);
            zip(current, other, |a, b| a + (b - a) * t)
        }
        "multiplyScalar" => current.map(|c| c * number_arg(args, 0, 1.0)),
        "getHex" => return Ok(Value::Number(f64::from(color_hex(current)))),
        "getHexString" => return Ok(Value::from(format!("{:06x}", color_hex(current)))),
        "clone" => return Ok(Value::Host(Host::Color(shared(current)))),
        "equals" => {
            let other = parse_color(interp, &arg(args, 0))?;
            return Ok(Value::Bool(other == current));
        }
        _ => return Err(interp.type_error(format!("Color.{name} is not a function"))),
    };
    *color.borrow_mut() = updated;
    Ok(receiver.clone())
}

fn color_component(color: &[f64; 3], key: &str) -> Option<Value> {
    let index = match key {
        "r" => 0,
        "g" => 1,
        "b" => 2,
        "isColor" => return Some(Value::Bool(true)),
        _ => return None,
    };
    Some(Value::Number(color[index]))
}

// ---- Box3 ---------------------------------------------------------------

const BOX3_METHODS: &[&str] = &[
    "set", "setFromObject", "setFromPoints", "getSize", "getCenter", "expandByPoint",
    "expandByScalar", "union", "containsPoint", "intersectsBox", "isEmpty", "makeEmpty", "clone",
    "copy",
];

/// Writes `value` into an optional target vector, or returns a new one.
fn vector_result(target: &Value, value: Point3) -> Value {
    match target {
        Value::Host(Host::Vector3(v)) => {
            *v.borrow_mut() = value;
            target.clone()
        }
        _ => Value::Host(Host::Vector3(shared(value))),
    }
}

fn box_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    data: &Rc<Box3Data>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    match name {
        "set" => {
            let min = vector_arg::<3>(interp, args, 0)?;
            let max = vector_arg::<3>(interp, args, 1)?;
            *data.min.borrow_mut() = min;
            *data.max.borrow_mut() = max;
        }
        "makeEmpty" => {
            *data.min.borrow_mut() = [f64::INFINITY; 3];
            *data.max.borrow_mut() = [f64::NEG_INFINITY; 3];
        }
        "setFromObject" => {
            let Value::Host(Host::Object3D(node)) = arg(args, 0) else {
                return Err(interp.type_error("Box3.setFromObject expects an Object3D"));
            };
            let scene = to_scene(&node).map_err(|err| interp.type_error(err.message))?;
            let (min, max) = scene
                .bounds()
                .unwrap_or(([f64::INFINITY; 3], [f64::NEG_INFINITY; 3]));
            *data.min.borrow_mut() = min;
            *data.max.borrow_mut() = max;
        }
        "setFromPoints" => {
            let points = match arg(args, 0) {
                Value::Array(items) => items.borrow().clone(),
                _ => return Err(interp.type_error("Box3.setFromPoints expects an array")),
            };
            *data.min.borrow_mut() = [f64::INFINITY; 3];
            *data.max.borrow_mut() = [f64::NEG_INFINITY; 3];
            for point in &points {
                let point = vector_value::<3>(interp, point)?;
                data.expand(point);
            }
        }
        "expandByPoint" => {
            let point = vector_arg::<3>(interp, args, 0)?;
            data.expand(point);
        }
        "expandByScalar" => {
            let amount = number_arg(args, 0, 0.0);
            data.min.borrow_mut().iter_mut().for_each(|c| *c -= amount);
            data.max.borrow_mut().iter_mut().for_each(|c| *c += amount);
        }
        "union" | "copy" => {
            let Value::Host(Host::Box3(other)) = arg(args, 0) else {
                return Err(interp.type_error(format!("Box3.{name} expects a Box3")));
            };
            let (min, max) = (*other.min.borrow(), *other.max.borrow());
            if name == "copy" {
                *data.min.borrow_mut() = min;
                *data.max.borrow_mut() = max;
            } else {
                data.expand(min);
                data.expand(max);
            }
        }
        "getSize" => {
            let size = if data.is_empty() {
                [0.0; 3]
            } else {
                math::sub(*data.max.borrow(), *data.min.borrow())
            };
            return Ok(vector_result(&arg(args, 0), size));
        }
        "getCenter" => {
            let center = if data.is_empty() {
                [0.0; 3]
            } else {
                math::lerp(*data.min.borrow(), *data.max.borrow(), 0.5)
            };
            return Ok(vector_result(&arg(args, 0), center));
        }
        "containsPoint" => {
            let point = vector_arg::<3>(interp, args, 0)?;
            let (min, max) = (*data.min.borrow(), *data.max.borrow());
            return Ok(Value::Bool(
                (0..3).all(|i| point[i] >= min[i] && point[i] <= max[i]),
            ));
        }
        "intersectsBox" => {
            let Value::Host(Host::Box3(other)) = arg(args, 0) else {
                return Err(interp.type_error("Box3.intersectsBox expects a Box3"));
            };
            let (min, max) = (*data.min.borrow(), *data.max.borrow());
            let (other_min, other_max) = (*other.min.borrow(), *other.max.borrow());
            return Ok(Value::Bool(
                (0..3).all(|i| other_max[i] >= min[i] && other_min[i] <= max[i]),
            ));
        }
        "isEmpty" => return Ok(Value::Bool(data.is_empty())),
        "clone" => {
            let copy = Box3Data::new(*data.min.borrow(), *data.max.borrow());
            return Ok(Value::Host(Host::Box3(Rc::new(copy))));
        }
        _ => return Err(interp.type_error(format!("Box3.{name} is not a function"))),
    }
    Ok(receiver.clone())
}

// ---- materials ----------------------------------------------------------

const MATERIAL_METHODS: &[&str] = &["clone", "dispose", "setValues"];

pub(crate) fn new_material(
    interp: &mut Interpreter<'_>,
    kind: &'static str,
    options: &Value,
) -> Flow<Shared<MaterialData>> {
    let material = shared(MaterialData {
        kind,
        color: shared([1.0, 1.0, 1.0]),
        props: Vec::new(),
    });
    interp.track_material(&material);
    apply_material_options(interp, &material, options)?;
    Ok(material)
}

fn apply_material_options(
    interp: &mut Interpreter<'_>,
    material: &Shared<MaterialData>,
    options: &Value,
) -> Flow<()> {
    match options {
        Value::Undefined | Value::Null => Ok(()),
        Value::Object(object) => {
            let entries = object.borrow().props.clone();
            for (key, value) in entries {
                set_material_property(interp, material, &key, value)?;
            }
            Ok(())
        }
        other => Err(interp.type_error(format!(
            "material options must be an object, found {}",
            other.type_name()
        ))),
    }
}

fn set_material_property(
    interp: &mut Interpreter<'_>,
    material: &Shared<MaterialData>,
    key: &str,
    value: Value,
) -> Flow<()> {
    if key == "color" {
        let rgb = parse_color(interp, &value)?;
        *material.borrow().color.borrow_mut() = rgb;
        return Ok(());
    }
    let mut material = material.borrow_mut();
    match material.props.iter_mut().find(|(name, _)| name.as_ref() == key) {
        Some(slot) => slot.1 = value,
        None => material.props.push((key.into(), value)),
    }
    Ok(())
}

fn material_property(material: &Shared<MaterialData>, key: &str) -> Option<Value> {
    let material = material.borrow();
    match key {
        "color" => Some(Value::Host(Host::Color(Rc::clone(&material.color)))),
        "type" => Some(Value::from(material.kind)),
        "isMaterial" => Some(Value::Bool(true)),
        _ => material
            .props
            .iter()
            .find(|(name, _)| name.as_ref() == key)
            .map(|(_, value)| value.clone()),
    }
}

fn material_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    material: &Shared<MaterialData>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    match name {
        "clone" => {
            let (kind, color, props) = {
                let data = material.borrow();
                (data.kind, *data.color.borrow(), data.props.clone())
            };
            let copy = shared(MaterialData {
                kind,
                color: shared(color),
                props,
            });
            interp.track_material(&copy);
            Ok(Value::Host(Host::Material(copy)))
        }
        "dispose" => Ok(Value::Undefined),
        "setValues" => {
            apply_material_options(interp, material, &arg(args, 0))?;
            Ok(receiver.clone())
        }
        _ => Err(interp.type_error(format!("Material.{name} is not a function"))),
    }
}

// ---- scene nodes --------------------------------------------------------

const NODE_METHODS: &[&str] = &[
    "add", "remove", "removeFromParent", "clear", "clone", "traverse", "getObjectByName",
    "rotateX", "rotateY", "rotateZ", "rotateOnAxis", "translateX", "translateY", "translateZ",
    "translateOnAxis", "getWorldPosition", "updateMatrix", "updateMatrixWorld",
    "updateWorldMatrix",
];

fn node_depth(node: &Shared<Node>) -> usize {
    let mut depth = 0;
    let mut current = node.borrow().parent.upgrade();
    while let Some(parent) = current {
        depth += 1;
        current = parent.borrow().parent.upgrade();
    }
    depth
}

fn is_ancestor(candidate: &Shared<Node>, node: &Shared<Node>) -> bool {
    let mut current = node.borrow().parent.upgrade();
    while let Some(parent) = current {
        if Rc::ptr_eq(&parent, candidate) {
            return true;
        }
        current = parent.borrow().parent.upgrade();
    }
    false
}

fn detach(child: &Shared<Node>) {
    let parent = child.borrow().parent.upgrade();
    if let Some(parent) = parent {
        parent
            .borrow_mut()
            .children
            .retain(|sibling| !Rc::ptr_eq(sibling, child));
    }
    child.borrow_mut().parent = Weak::new();
}

fn add_child(interp: &Interpreter<'_>, node: &Shared<Node>, child: &Shared<Node>) -> Flow<()> {
    if Rc::ptr_eq(node, child) {
        return Err(interp.type_error("an object can't be added as a child of itself"));
    }
    if is_ancestor(child, node) {
        return Err(interp.type_error("an object can't be added as a child of its descendant"));
    }
    let height = child.borrow().height;
    if node_depth(node) + height + 1 > MAX_SCENE_DEPTH {
        return Err(interp.range_error(format!(
            "scene graph would be nested deeper than {MAX_SCENE_DEPTH} levels"
        )));
    }

    detach(child);
    child.borrow_mut().parent = Rc::downgrade(node);
    node.borrow_mut().children.push(Rc::clone(child));

    let mut current = Rc::clone(node);
    let mut required = height + 1;
    loop {
        let parent = {
            let mut data = current.borrow_mut();
            if data.height >= required {
                break;
            }
            data.height = required;
            data.parent.upgrade()
        };
        match parent {
            Some(parent) => {
                current = parent;
                required += 1;
            }
            None => break,
        }
    }
    Ok(())
}

fn object_arg(interp: &Interpreter<'_>, value: &Value, method: &str) -> Flow<Shared<Node>> {
    match value {
        Value::Host(Host::Object3D(node)) => Ok(Rc::clone(node)),
        other => Err(interp.type_error(format!(
            "Object3D.{method}: expected an Object3D, found {}",
            other.type_name()
        ))),
    }
}

fn clone_node(
    interp: &mut Interpreter<'_>,
    node: &Shared<Node>,
    recursive: bool,
    depth: usize,
) -> Flow<Shared<Node>> {
    if depth > MAX_SCENE_DEPTH {
        return Err(interp.range_error("scene graph is too deep to clone"));
    }
    let (kind, transform, extras, children) = {
        let data = node.borrow();
        let kind = match &data.kind {
            NodeKind::Mesh { geometry, material } => NodeKind::Mesh {
                geometry: Rc::clone(geometry),
                material: material.clone(),
            },
            NodeKind::Group => NodeKind::Group,
            NodeKind::Object3D => NodeKind::Object3D,
        };
        (kind, data.transform(), data.extras.clone(), data.children.clone())
    };

    let copy = new_node(interp, kind);
    {
        let mut data = copy.borrow_mut();
        *data.position.borrow_mut() = transform.position;
        *data.rotation.borrow_mut() = transform.rotation;
        *data.scale.borrow_mut() = transform.scale;
        data.extras = extras;
    }
    if recursive {
        for child in &children {
            let child_copy = clone_node(interp, child, true, depth + 1)?;
            add_child(interp, &copy, &child_copy)?;
        }
    }
    Ok(copy)
}

/// Pre-order list of a subtree.
fn descendants(node: &Shared<Node>) -> Vec<Shared<Node>> {
    let mut order = Vec::new();
    let mut stack = vec![Rc::clone(node)];
    while let Some(current) = stack.pop() {
        stack.extend(current.borrow().children.iter().rev().cloned());
        order.push(current);
    }
    order
}

fn node_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    node: &Shared<Node>,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    match name {
        "add" => {
            for value in args {
                let child = object_arg(interp, value, "add")?;
                add_child(interp, node, &child)?;
            }
        }
        "remove" => {
            for value in args {
                let child = object_arg(interp, value, "remove")?;
                let is_child = child
                    .borrow()
                    .parent
                    .upgrade()
                    .is_some_and(|parent| Rc::ptr_eq(&parent, node));
                if is_child {
                    detach(&child);
                }
            }
        }
        "removeFromParent" => detach(node),
        "clear" => {
            let children = std::mem::take(&mut node.borrow_mut().children);
            for child in &children {
                child.borrow_mut().parent = Weak::new();
            }
        }
        "clone" => {
            let recursive = !matches!(args.first(), Some(Value::Bool(false)));
            let copy = clone_node(interp, node, recursive, 0)?;
            return Ok(Value::Host(Host::Object3D(copy)));
        }
        "traverse" => {
            let callback = arg(args, 0);
            for current in descendants(node) {
                interp.call_function(
                    &callback,
                    Value::Undefined,
                    vec![Value::Host(Host::Object3D(current))],
                )?;
            }
            return Ok(Value::Undefined);
        }
        "getObjectByName" => {
            let wanted = arg(args, 0).to_js_string();
            let found = descendants(node).into_iter().find(|current| {
                current
                    .borrow()
                    .extra("name")
                    .is_some_and(|name| name.to_js_string() == wanted)
            });
            return Ok(found
                .map(|found| Value::Host(Host::Object3D(found)))
                .unwrap_or(Value::Undefined));
        }
        "rotateX" | "rotateY" | "rotateZ" | "rotateOnAxis" => {
            let (axis, angle) = match name {
                "rotateX" => ([1.0, 0.0, 0.0], number_arg(args, 0, 0.0)),
                "rotateY" => ([0.0, 1.0, 0.0], number_arg(args, 0, 0.0)),
                "rotateZ" => ([0.0, 0.0, 1.0], number_arg(args, 0, 0.0)),
                _ => (vector_arg::<3>(interp, args, 0)?, number_arg(args, 1, 0.0)),
            };
            let data = node.borrow();
            let current = euler_matrix(*data.rotation.borrow());
            let rotated = mat_mul(&current, &axis_angle_matrix(axis, angle));
            *data.rotation.borrow_mut() = matrix_euler(&rotated);
        }
        "translateX" | "translateY" | "translateZ" | "translateOnAxis" => {
            let (axis, distance) = match name {
                "translateX" => ([1.0, 0.0, 0.0], number_arg(args, 0, 0.0)),
                "translateY" => ([0.0, 1.0, 0.0], number_arg(args, 0, 0.0)),
                "translateZ" => ([0.0, 0.0, 1.0], number_arg(args, 0, 0.0)),
                _ => (vector_arg::<3>(interp, args, 0)?, number_arg(args, 1, 0.0)),
            };
            let data = node.borrow();
            let direction = math::rotate_euler_xyz(axis, *data.rotation.borrow());
            let offset = math::mul_scalar(direction, distance);
            let moved = math::add(*data.position.borrow(), offset);
            *data.position.borrow_mut() = moved;
        }
        "getWorldPosition" => {
            let mut point = [0.0; 3];
            let mut current = Some(Rc::clone(node));
            while let Some(ancestor) = current {
                let data = ancestor.borrow();
                point = data.transform().apply(point);
                current = data.parent.upgrade();
            }
            return Ok(vector_result(&arg(args, 0), point));
        }
        "updateMatrix" | "updateMatrixWorld" | "updateWorldMatrix" => return Ok(Value::Undefined),
        _ => return Err(interp.type_error(format!("Object3D.{name} is not a function"))),
    }
    Ok(receiver.clone())
}

fn node_property(interp: &mut Interpreter<'_>, node: &Shared<Node>, key: &str) -> Option<Value> {
    let value = {
        let data = node.borrow();
        match key {
            "position" => Value::Host(Host::Vector3(Rc::clone(&data.position))),
            "rotation" => Value::Host(Host::Euler(Rc::clone(&data.rotation))),
            "scale" => Value::Host(Host::Vector3(Rc::clone(&data.scale))),
            "parent" => data
                .parent
                .upgrade()
                .map(|parent| Value::Host(Host::Object3D(parent)))
                .unwrap_or(Value::Null),
            "type" => Value::from(data.kind.class_name()),
            "isObject3D" => Value::Bool(true),
            "isMesh" => Value::Bool(matches!(data.kind, NodeKind::Mesh { .. })),
            "isGroup" => Value::Bool(matches!(data.kind, NodeKind::Group)),
            "geometry" | "material" => match &data.kind {
                NodeKind::Mesh { geometry, material } => {
                    if key == "geometry" {
                        Value::Host(Host::Geometry(Rc::clone(geometry)))
                    } else {
                        material.clone()
                    }
                }
                _ => data.extra(key).unwrap_or(Value::Undefined),
            },
            "children" | "userData" => Value::Undefined,
            _ => return data.extra(key).or_else(|| match key {
                "name" => Some(Value::from("")),
                "visible" => Some(Value::Bool(true)),
                _ => None,
            }),
        }
    };

    match key {
        "children" => {
            let children = node
                .borrow()
                .children
                .iter()
                .map(|child| Value::Host(Host::Object3D(Rc::clone(child))))
                .collect();
            Some(interp.new_array(children))
        }
        "userData" => {
            let existing = node.borrow().extra("userData");
            Some(existing.unwrap_or_else(|| {
                let data = interp.new_object(Vec::new());
                node.borrow_mut().set_extra("userData", data.clone());
                data
            }))
        }
        _ => Some(value),
    }
}

fn set_node_property(
    interp: &mut Interpreter<'_>,
    node: &Shared<Node>,
    key: &str,
    value: Value,
) -> Flow<()> {
    match key {
        "position" | "scale" | "rotation" => {
            let components = vector_value::<3>(interp, &value)?;
            let data = node.borrow();
            let target = match key {
                "position" => &data.position,
                "scale" => &data.scale,
                _ => &data.rotation,
            };
            *target.borrow_mut() = components;
        }
        "geometry" => {
            let mut data = node.borrow_mut();
            if let NodeKind::Mesh { geometry, .. } = &mut data.kind {
                let Value::Host(Host::Geometry(replacement)) = &value else {
                    return Err(interp.type_error("Mesh.geometry must be a BufferGeometry"));
                };
                *geometry = Rc::clone(replacement);
            } else {
                data.set_extra(key, value);
            }
        }
        "material" => {
            let mut data = node.borrow_mut();
            if let NodeKind::Mesh { material, .. } = &mut data.kind {
                *material = value;
            } else {
                data.set_extra(key, value);
            }
        }
        "children" | "parent" | "type" | "isObject3D" | "isMesh" | "isGroup" => {}
        _ => node.borrow_mut().set_extra(key, value),
    }
    Ok(())
}

// ---- dispatch -----------------------------------------------------------

fn has_method(host: &Host, key: &str) -> bool {
    let lists: &[&[&str]] = match host {
        Host::Vector2(_) => &[VECTOR_METHODS, VECTOR2_METHODS],
        Host::Vector3(_) => &[VECTOR_METHODS, VECTOR3_METHODS],
        Host::Euler(_) => &[EULER_METHODS],
        Host::Color(_) => &[COLOR_METHODS],
        Host::Box3(_) => &[BOX3_METHODS],
        Host::Geometry(_) => &[geometries::GEOMETRY_METHODS],
        Host::Attribute(_) => &[geometries::ATTRIBUTE_METHODS],
        Host::Material(_) => &[MATERIAL_METHODS],
        Host::Object3D(_) => &[NODE_METHODS],
        Host::Path(_) => &[geometries::PATH_METHODS],
        Host::Curve(_) => &[geometries::CURVE_METHODS],
        Host::Csg(_) => &[geometries::CSG_METHODS],
    };
    lists.iter().any(|list| list.contains(&key))
}

pub(crate) fn get_property(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    host: &Host,
    key: &str,
) -> Value {
    let found = match host {
        Host::Vector2(v) => vector_component(&*v.borrow(), key)
            .or_else(|| (key == "isVector2").then_some(Value::Bool(true))),
        Host::Vector3(v) => vector_component(&*v.borrow(), key)
            .or_else(|| (key == "isVector3").then_some(Value::Bool(true))),
        Host::Euler(v) => vector_component(&*v.borrow(), key).or_else(|| match key {
            "order" => Some(Value::from("XYZ")),
            "isEuler" => Some(Value::Bool(true)),
            _ => None,
        }),
        Host::Color(color) => color_component(&color.borrow(), key),
        Host::Box3(data) => match key {
            "min" => Some(Value::Host(Host::Vector3(Rc::clone(&data.min)))),
            "max" => Some(Value::Host(Host::Vector3(Rc::clone(&data.max)))),
            "isBox3" => Some(Value::Bool(true)),
            _ => None,
        },
        Host::Geometry(geometry) => geometries::geometry_property(interp, geometry, key),
        Host::Attribute(attribute) => geometries::attribute_property(interp, attribute, key),
        Host::Material(material) => material_property(material, key),
        Host::Object3D(node) => node_property(interp, node, key),
        Host::Path(path) => geometries::path_property(interp, path, key),
        Host::Curve(curve) => geometries::curve_property(curve, key),
        Host::Csg(_) => None,
    };
    match found {
        Some(value) => value,
        None if has_method(host, key) => Value::Method(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            name: key.into(),
        })),
        None => Value::Undefined,
    }
}

pub(crate) fn set_property(
    interp: &mut Interpreter<'_>,
    host: &Host,
    key: &str,
    value: Value,
) -> Flow<()> {
    match host {
        Host::Vector2(v) => set_vector_component(v, key, &value),
        Host::Vector3(v) | Host::Euler(v) => set_vector_component(v, key, &value),
        Host::Color(color) => set_vector_component(color, key, &value),
        Host::Box3(data) => {
            if key == "min" || key == "max" {
                let components = vector_value::<3>(interp, &value)?;
                let target = if key == "min" { &data.min } else { &data.max };
                *target.borrow_mut() = components;
            }
        }
        Host::Geometry(geometry) => geometries::set_geometry_property(interp, geometry, key, value)?,
        Host::Material(material) => set_material_property(interp, material, key, value)?,
        Host::Object3D(node) => set_node_property(interp, node, key, value)?,
        Host::Path(path) => geometries::set_path_property(interp, path, key, value)?,
        Host::Attribute(_) | Host::Curve(_) | Host::Csg(_) => {}
    }
    Ok(())
}

pub(crate) fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    host: &Host,
    name: &str,
    args: &[Value],
) -> Flow<Value> {
    match host {
        Host::Vector2(v) => vector_method(interp, receiver, v, Host::Vector2, name, args),
        Host::Vector3(v) => vector_method(interp, receiver, v, Host::Vector3, name, args),
        Host::Euler(v) => {
            if !EULER_METHODS.contains(&name) {
                return Err(interp.type_error(format!("Euler.{name} is not a function")));
            }
            vector_method(interp, receiver, v, Host::Euler, name, args)
        }
        Host::Color(color) => color_method(interp, receiver, color, name, args),
        Host::Box3(data) => box_method(interp, receiver, data, name, args),
        Host::Geometry(geometry) => {
            geometries::geometry_method(interp, receiver, geometry, name, args)
        }
        Host::Attribute(attribute) => {
            geometries::attribute_method(interp, receiver, attribute, name, args)
        }
        Host::Material(material) => material_method(interp, receiver, material, name, args),
        Host::Object3D(node) => node_method(interp, receiver, node, name, args),
        Host::Path(path) => geometries::path_method(interp, receiver, path, name, args),
        Host::Curve(curve) => geometries::curve_method(interp, curve, name, args),
        Host::Csg(solid) => geometries::csg_method(interp, solid, name, args),
    }
}

const MATH_UTILS: &[&str] = &[
    "degToRad", "radToDeg", "clamp", "lerp", "mapLinear", "euclideanModulo", "smoothstep",
    "randFloat", "randInt",
];

/// Static members of host namespaces such as `MathUtils` and `CSG`.
pub(crate) fn static_property(owner: &'static str, key: &str) -> Option<Value> {
    match owner {
        "MathUtils" => match key {
            "DEG2RAD" => Some(Value::Number(PI / 180.0)),
            "RAD2DEG" => Some(Value::Number(180.0 / PI)),
            _ => MATH_UTILS
                .iter()
                .find(|name| **name == key)
                .map(|name| Value::Builtin(Builtin::member("MathUtils", name))),
        },
        "CSG" => geometries::CSG_STATICS
            .iter()
            .find(|name| **name == key)
            .map(|name| Value::Builtin(Builtin::member("CSG", name))),
        _ => None,
    }
}

/// Constructors and static functions of the geometry capability group.
pub(crate) fn call_builtin(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    args: Vec<Value>,
) -> Flow<Value> {
    let n = |index: usize, default: f64| number_arg(&args, index, default);
    let value = match (builtin.owner, builtin.name) {
        ("", "Vector2") => Host::Vector2(shared([n(0, 0.0), n(1, 0.0)])),
        ("", "Vector3") => Host::Vector3(shared([n(0, 0.0), n(1, 0.0), n(2, 0.0)])),
        ("", "Euler") => Host::Euler(shared([n(0, 0.0), n(1, 0.0), n(2, 0.0)])),
        ("", "Color") => Host::Color(shared(color_from_args(interp, &args)?)),
        ("", "Box3") => {
            let min = match args.first() {
                Some(value) if !value.is_nullish() => vector_value::<3>(interp, value)?,
                _ => [f64::INFINITY; 3],
            };
            let max = match args.get(1) {
                Some(value) if !value.is_nullish() => vector_value::<3>(interp, value)?,
                _ => [f64::NEG_INFINITY; 3],
            };
            Host::Box3(Rc::new(Box3Data::new(min, max)))
        }
        ("", "Mesh") => {
            let geometry = match arg(&args, 0) {
                Value::Undefined => geometries::empty_geometry(),
                Value::Host(Host::Geometry(geometry)) => geometry,
                other => {
                    return Err(interp.type_error(format!(
                        "Mesh expects a BufferGeometry, found {}",
                        other.type_name()
                    )));
                }
            };
            let material = arg(&args, 1);
            Host::Object3D(new_node(interp, NodeKind::Mesh { geometry, material }))
        }
        ("", "Group") => Host::Object3D(new_node(interp, NodeKind::Group)),
        ("", "Object3D") => Host::Object3D(new_node(interp, NodeKind::Object3D)),
        ("", kind) if kind.starts_with("Mesh") && kind.ends_with("Material") => {
            Host::Material(new_material(interp, kind, &arg(&args, 0))?)
        }
        ("MathUtils", name) => {
            let result = match name {
                "degToRad" => n(0, 0.0) * PI / 180.0,
                "radToDeg" => n(0, 0.0) * 180.0 / PI,
                "clamp" => n(0, 0.0).max(n(1, 0.0)).min(n(2, 0.0)),
                "lerp" => n(0, 0.0) + (n(1, 0.0) - n(0, 0.0)) * n(2, 0.0),
                "mapLinear" => {
                    let (x, a1, a2, b1, b2) = (n(0, 0.0), n(1, 0.0), n(2, 0.0), n(3, 0.0), n(4, 0.0));
                    b1 + (x - a1) * (b2 - b1) / (a2 - a1)
                }
                "euclideanModulo" => n(0, 0.0).rem_euclid(n(1, 0.0)),
                "smoothstep" => {
                    let (x, min, max) = (n(0, 0.0), n(1, 0.0), n(2, 0.0));
                    if x <= min {
                        0.0
                    } else if x >= max {
                        1.0
                    } else {
                        let t = (x - min) / (max - min);
                        t * t * (3.0 - 2.0 * t)
                    }
                }
                "randFloat" => {
                    let (low, high) = (n(0, 0.0), n(1, 1.0));
                    low + interp.random() * (high - low)
                }
                "randInt" => {
                    let (low, high) = (n(0, 0.0), n(1, 1.0));
                    low + (interp.random() * (high - low + 1.0)).floor()
                }
                _ => return Err(interp.type_error(format!("MathUtils.{name} is not a function"))),
            };
            return Ok(Value::Number(result));
        }
        _ => return geometries::call_builtin(interp, builtin, args),
    };
    Ok(Value::Host(value))
}

#[cfg(test)]
mod tests {
    use super::{color_hex, euler_matrix, hsl_rgb, matrix_euler, parse_css_color};

    #[test]
    fn css_colours_parse() {
        assert_eq!(parse_css_color("#ff8000").map(color_hex), Some(0xff8000));
        assert_eq!(parse_css_color("#0f0").map(color_hex), Some(0x00ff00));
        assert_eq!(parse_css_color("rgb(0, 0, 255)").map(color_hex), Some(0x0000ff));
        assert_eq!(parse_css_color("Silver").map(color_hex), Some(0xc0c0c0));
        assert_eq!(parse_css_color("not-a-colour"), None);
    }

    #[test]
    fn hsl_primaries() {
        assert_eq!(color_hex(hsl_rgb(0.0, 1.0, 0.5)), 0xff0000);
        assert_eq!(color_hex(hsl_rgb(1.0 / 3.0, 1.0, 0.5)), 0x00ff00);
        assert_eq!(color_hex(hsl_rgb(0.5, 0.0, 0.5)), 0x808080);
    }

    #[test]
    fn euler_matrix_round_trips() {
        let euler = [0.3, -0.7, 1.1];
        let back = matrix_euler(&euler_matrix(euler));
        for i in 0..3 {
            assert!((euler[i] - back[i]).abs() < 1e-12);
        }
    }
}
