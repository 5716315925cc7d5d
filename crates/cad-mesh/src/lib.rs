pub mod csg;
mod error;
pub mod export;
pub mod geometry;
pub mod math;
pub mod primitives;
pub mod scene;
pub mod triangulate;

pub use csg::Solid;
pub use error::{ExportError, GeometryError};
pub use export::{MeshExporter, StlFormat, to_ascii_stl, to_binary_stl};
pub use geometry::Geometry;
pub use scene::{SceneGroup, SceneMesh, SceneObject, Transform, Triangle, bounds_of};
