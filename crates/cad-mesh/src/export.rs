use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{ExportError, GeometryError};
use crate::scene::{SceneObject, Triangle};

static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

const CREATE_ATTEMPTS: usize = 8;

pub fn to_binary_stl(triangles: &[Triangle], name: &str) -> Vec<u8> {
    let mut bytes = Vec::<u8>::with_capacity(84 + triangles.len() * 50);

    let mut header = [0u8; 80];
    let name_bytes = name.as_bytes();
    let header_len = name_bytes.len().min(80);
    header[..header_len].copy_from_slice(&name_bytes[..header_len]);
    bytes.extend_from_slice(&header);

    let tri_count = triangles.len() as u32;
    bytes.extend_from_slice(&tri_count.to_le_bytes());

    for triangle in triangles {
        push_f32_triplet(&mut bytes, triangle.normal);
        for vertex in triangle.vertices {
            push_f32_triplet(&mut bytes, vertex);
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
    }

    bytes
}

pub fn to_ascii_stl(triangles: &[Triangle], name: &str) -> String {
    let mut out = String::with_capacity(64 + triangles.len() * 256);
    out.push_str("solid ");
    out.push_str(name);
    out.push('\n');

    for triangle in triangles {
        let n = triangle.normal;
        let _ = writeln!(out, "  facet normal {} {} {}", n[0], n[1], n[2]);
        out.push_str("    outer loop\n");
        for v in triangle.vertices {
            let _ = writeln!(out, "      vertex {} {} {}", v[0], v[1], v[2]);
        }
        out.push_str("    endloop\n");
        out.push_str("  endfacet\n");
    }

    out.push_str("endsolid ");
    out.push_str(name);
    out.push('\n');
    out
}

#[inline]
fn push_f32_triplet(bytes: &mut Vec<u8>, value: [f64; 3]) {
    bytes.extend_from_slice(&(value[0] as f32).to_le_bytes());
    bytes.extend_from_slice(&(value[1] as f32).to_le_bytes());
    bytes.extend_from_slice(&(value[2] as f32).to_le_bytes());
}

/// Mesh encoding written by [`MeshExporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StlFormat {
    #[default]
    Ascii,
    Binary,
}

/// Writes scenes as uniquely named STL files under one output directory.
///
/// The directory is shared by every request; file names combine a UTC
/// timestamp with a process-wide counter and are created exclusively, so an
/// existing file is never overwritten.
#[derive(Debug, Clone)]
pub struct MeshExporter {
    dir: PathBuf,
    format: StlFormat,
}

impl MeshExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            format: StlFormat::Ascii,
        }
    }

    pub fn with_format(mut self, format: StlFormat) -> Self {
        self.format = format;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Serialises `scene` and returns the bare file name that was written.
    ///
    /// Malformed geometry is rejected before the filesystem is touched.
    pub fn export(&self, scene: &SceneObject) -> Result<String, ExportError> {
        let triangles = scene.triangles()?;
        debug!(
            triangles = triangles.len(),
            meshes = scene.mesh_count(),
            "serialising scene"
        );
        self.export_triangles(&triangles)
    }

    /// Writes triangles already flattened by [`SceneObject::triangles`].
    pub fn export_triangles(&self, triangles: &[Triangle]) -> Result<String, ExportError> {
        if triangles.is_empty() {
            return Err(GeometryError::Empty.into());
        }
        std::fs::create_dir_all(&self.dir)?;

        let mut last_error = None;
        for _ in 0..CREATE_ATTEMPTS {
            let stem = unique_stem();
            let file_name = format!("{stem}.stl");
            let bytes = match self.format {
                StlFormat::Ascii => to_ascii_stl(triangles, &stem).into_bytes(),
                StlFormat::Binary => to_binary_stl(triangles, &stem),
            };
            match write_new(&self.dir.join(&file_name), |file| file.write_all(&bytes)) {
                Ok(()) => {
                    info!(file = %file_name, triangles = triangles.len(), "mesh exported");
                    return Ok(file_name);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => last_error = Some(err),
                Err(err) => return Err(err.into()),
            }
        }

        Err(last_error
            .unwrap_or_else(|| std::io::Error::new(ErrorKind::AlreadyExists, "no free file name"))
            .into())
    }
}

/// Creates `path` exclusively and fills it. A file the fill fails on is
/// removed again so no truncated model is left behind.
fn write_new(
    path: &Path,
    fill: impl FnOnce(&mut File) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(err) = fill(&mut file).and_then(|()| file.flush()) {
        drop(file);
        if let Err(remove_err) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %remove_err, "failed to remove partial file");
        }
        return Err(err);
    }
    Ok(())
}

fn unique_stem() -> String {
    let counter = FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "model_{}_{counter}",
        Utc::now().format("%Y%m%dT%H%M%S%.6f")
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::{MeshExporter, StlFormat, to_ascii_stl, to_binary_stl, write_new};
    use crate::error::{ExportError, GeometryError};
    use crate::geometry::Geometry;
    use crate::primitives::box_geometry;
    use crate::scene::{SceneMesh, SceneObject, Triangle, bounds_of};

    fn simple_triangles() -> Vec<Triangle> {
        vec![Triangle {
            normal: [0.0, 0.0, 1.0],
            vertices: [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }]
    }

    fn single_triangle_scene() -> SceneObject {
        SceneObject::Mesh(SceneMesh::new(Geometry::non_indexed(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
        ])))
    }

    #[test]
    fn binary_stl_has_valid_size_and_triangle_count() {
        let bytes = to_binary_stl(&simple_triangles(), "test");
        assert_eq!(bytes.len(), 84 + 50);
        let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]);
        assert_eq!(count, 1);
    }

    #[test]
    fn ascii_stl_contains_required_tokens() {
        let stl = to_ascii_stl(&simple_triangles(), "tri");
        assert!(stl.starts_with("solid tri\n"));
        assert!(stl.contains("  facet normal 0 0 1\n"));
        assert!(stl.contains("      vertex 1 0 0\n"));
        assert!(stl.ends_with("endsolid tri\n"));
    }

    #[test]
    fn single_triangle_exports_exactly_one_facet_block() {
        let dir = tempfile::tempdir().expect("temp dir");
        let exporter = MeshExporter::new(dir.path());
        let file_name = exporter
            .export(&single_triangle_scene())
            .expect("export succeeds");

        let text = std::fs::read_to_string(dir.path().join(&file_name)).expect("file readable");
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let count = |prefix: &str| lines.iter().filter(|l| l.starts_with(prefix)).count();

        assert!(lines[0].starts_with("solid "));
        assert!(lines[lines.len() - 1].starts_with("endsolid "));
        assert_eq!(lines[0]["solid ".len()..], lines[lines.len() - 1]["endsolid ".len()..]);
        assert_eq!(count("facet normal"), 1);
        assert_eq!(count("outer loop"), 1);
        assert_eq!(count("vertex"), 3);
        assert_eq!(count("endloop"), 1);
        assert_eq!(count("endfacet"), 1);
    }

    #[test]
    fn malformed_geometry_writes_no_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let out = dir.path().join("out");
        let scene = SceneObject::Mesh(SceneMesh::new(Geometry::non_indexed(vec![[0.0; 3]; 4])));

        let err = MeshExporter::new(&out)
            .export(&scene)
            .expect_err("four vertices cannot form triangles");
        assert!(matches!(
            err,
            ExportError::Malformed(GeometryError::VertexCount { count: 4 })
        ));
        assert!(!out.exists());
    }

    #[test]
    fn repeated_exports_never_collide() {
        let dir = tempfile::tempdir().expect("temp dir");
        let exporter = MeshExporter::new(dir.path());
        let scene = SceneObject::Mesh(SceneMesh::new(box_geometry(1.0, 1.0, 1.0)));

        let a = exporter.export(&scene).expect("first export");
        let b = exporter.export(&scene).expect("second export");
        assert_ne!(a, b);
        assert!(a.starts_with("model_") && a.ends_with(".stl"));
    }

    #[test]
    fn binary_exporter_writes_triangle_count() {
        let dir = tempfile::tempdir().expect("temp dir");
        let exporter = MeshExporter::new(dir.path()).with_format(StlFormat::Binary);
        let scene = SceneObject::Mesh(SceneMesh::new(box_geometry(1.0, 1.0, 1.0)));

        let file_name = exporter.export(&scene).expect("export succeeds");
        let bytes = std::fs::read(dir.path().join(file_name)).expect("file readable");
        assert_eq!(bytes.len(), 84 + 12 * 50);
    }

    #[test]
    fn failed_write_removes_the_partial_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("partial.stl");

        let err = write_new(&path, |file| {
            file.write_all(b"solid partial\n")?;
            Err(std::io::Error::other("device full"))
        })
        .expect_err("fill fails");
        assert_eq!(err.to_string(), "device full");
        assert!(!path.exists());
    }

    #[test]
    fn existing_file_is_left_untouched() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("taken.stl");
        std::fs::write(&path, "keep").expect("seed file");

        let err = write_new(&path, |file| file.write_all(b"other")).expect_err("name taken");
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read_to_string(&path).expect("file readable"), "keep");
    }

    #[test]
    fn flattened_scene_is_measured_and_written_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let scene = SceneObject::Mesh(SceneMesh::new(box_geometry(4.0, 2.0, 1.0)));
        let triangles = scene.triangles().expect("box triangles");

        let (min, max) = bounds_of(&triangles).expect("non-empty");
        assert_eq!(min, [-2.0, -1.0, -0.5]);
        assert_eq!(max, [2.0, 1.0, 0.5]);

        let file_name = MeshExporter::new(dir.path())
            .export_triangles(&triangles)
            .expect("export succeeds");
        let text = std::fs::read_to_string(dir.path().join(file_name)).expect("file readable");
        assert_eq!(text.matches("endfacet").count(), 12);
    }

    #[test]
    fn empty_triangle_list_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = MeshExporter::new(dir.path())
            .export_triangles(&[])
            .expect_err("nothing to write");
        assert!(matches!(err, ExportError::Malformed(GeometryError::Empty)));
    }
}
