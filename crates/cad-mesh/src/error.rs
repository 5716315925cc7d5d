use thiserror::Error;

/// Geometry that cannot be turned into a closed triangle list.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("geometry produced no triangles")]
    Empty,

    #[error("vertex count {count} is not a multiple of 3")]
    VertexCount { count: usize },

    #[error("index count {count} is not a multiple of 3")]
    IndexCount { count: usize },

    #[error("index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("geometry contains a non-finite coordinate")]
    NonFinite,

    #[error("invalid geometry: {0}")]
    Invalid(String),
}

/// Failure while serialising or persisting a scene.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("malformed geometry: {0}")]
    Malformed(#[from] GeometryError),

    #[error("failed to write mesh file: {0}")]
    Io(#[from] std::io::Error),
}
