//! Sandboxed interpreter for procedural geometry scripts.
//!
//! Scripts are written in a small JavaScript dialect against a three.js-style
//! object model. A run sees nothing but the names in its [`Capabilities`]
//! table, is bounded by [`Limits`], and yields the [`SceneObject`] left in
//! its `mesh` or `group` binding.
//!
//! ```ignore
//! let scene = cad_script::run(
//!     "const mesh = new THREE.Mesh(new THREE.BoxGeometry(30, 30, 30));",
//! )?;
//! assert_eq!(scene.kind(), "mesh");
//! ```

mod ast;
mod capabilities;
mod error;
mod geometries;
mod host;
mod interpreter;
mod lexer;
mod parser;
mod shapes;
mod stdlib;
mod value;

use std::thread;
use std::time::Duration;

use cad_mesh::SceneObject;

pub use capabilities::{Capabilities, CapabilityGroup, capability_names};
pub use error::ExecutionError;

/// Resource bounds for one script run. Exceeding any of them aborts the run
/// with an error the script cannot catch.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Evaluation steps (statements, calls and loop iterations).
    pub max_steps: u64,
    /// Wall-clock budget, checked periodically.
    pub max_duration: Duration,
    /// Nested script function calls.
    pub max_call_depth: usize,
    /// Syntactic nesting accepted by the parser.
    pub max_nesting: usize,
    /// Upper clamp for segment counts passed to geometry constructors.
    pub max_segments: usize,
    /// Vertices all geometry constructors together may allocate.
    pub max_vertices: usize,
    /// Polygons a single boolean operation may consume or produce.
    pub max_csg_polygons: usize,
    /// Stack reserved for the interpreter thread.
    pub stack_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 2_000_000,
            max_duration: Duration::from_secs(10),
            max_call_depth: 200,
            max_nesting: 256,
            max_segments: 256,
            max_vertices: 2_000_000,
            max_csg_polygons: 100_000,
            stack_size: 128 * 1024 * 1024,
        }
    }
}

/// Runs `code` with the standard capability table and default limits.
pub fn run(code: &str) -> Result<SceneObject, ExecutionError> {
    run_with(code, &Capabilities::standard(), &Limits::default())
}

/// Runs `code` on a dedicated thread with a fresh global scope.
///
/// No script value outlives the call: only the exported scene or the error
/// crosses back to the caller.
pub fn run_with(
    code: &str,
    capabilities: &Capabilities,
    limits: &Limits,
) -> Result<SceneObject, ExecutionError> {
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("cad-script".into())
            .stack_size(limits.stack_size)
            .spawn_scoped(scope, || {
                let program = parser::parse_program(code, limits.max_nesting)?;
                interpreter::execute(&program, limits, capabilities)
            })
            .map_err(|err| ExecutionError::new(format!("failed to start script thread: {err}")))?;
        handle.join().unwrap_or_else(|_| {
            tracing::error!("script thread panicked");
            Err(ExecutionError::new("script execution aborted unexpectedly"))
        })
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cad_mesh::SceneObject;

    use super::{Capabilities, Limits, run, run_with};

    fn extent(scene: &SceneObject) -> [f64; 3] {
        let (min, max) = scene.bounds().unwrap();
        [max[0] - min[0], max[1] - min[1], max[2] - min[2]]
    }

    fn assert_close(actual: [f64; 3], expected: [f64; 3]) {
        for i in 0..3 {
            assert!(
                (actual[i] - expected[i]).abs() < 1e-6,
                "{actual:?} != {expected:?}"
            );
        }
    }

    #[test]
    fn cube_script_yields_mesh() {
        let scene = run(
            "const geometry = new THREE.BoxGeometry(30, 30, 30);\n\
             const material = new THREE.MeshStandardMaterial({ color: 0x808080 });\n\
             const mesh = new THREE.Mesh(geometry, material);",
        )
        .unwrap();
        assert_eq!(scene.kind(), "mesh");
        assert_eq!(scene.triangles().unwrap().len(), 12);
        assert_close(extent(&scene), [30.0, 30.0, 30.0]);
    }

    #[test]
    fn group_is_used_when_mesh_is_absent() {
        let scene = run(
            "const group = new Group();\n\
             for (let i = 0; i < 3; i++) {\n\
               const leg = new Mesh(new CylinderGeometry(1, 1, 10, 8), new MeshBasicMaterial());\n\
               leg.position.set(i * 5, 5, 0);\n\
               group.add(leg);\n\
             }",
        )
        .unwrap();
        assert_eq!(scene.kind(), "group");
        assert_eq!(scene.mesh_count(), 3);
        assert_close(extent(&scene), [12.0, 10.0, 2.0]);
    }

    #[test]
    fn missing_result_binding_fails() {
        let err = run("const size = 10;").unwrap_err();
        assert_eq!(err.message, "script did not define 'mesh' or 'group'");
    }

    #[test]
    fn wrong_result_type_fails() {
        let err = run("mesh = 42;").unwrap_err();
        assert!(err.message.contains("must be a Mesh or Group"), "{err}");
    }

    #[test]
    fn unknown_identifier_reports_line_and_suggestion() {
        let err = run("const geometry = new BoxGeometry(1, 1, 1);\nconst mesh = new Mesh(geometri);")
            .unwrap_err();
        assert_eq!(err.line, Some(2));
        assert!(err.message.contains("geometri is not defined"), "{err}");
        assert!(err.message.contains("geometry"), "{err}");
    }

    #[test]
    fn imports_are_rejected() {
        let err = run("import * as THREE from 'three';\nconst mesh = new THREE.Mesh();").unwrap_err();
        assert!(err.message.starts_with("SyntaxError"), "{err}");
        assert_eq!(err.line, Some(1));
        assert!(run("const fs = require('fs');").is_err());
    }

    #[test]
    fn infinite_loop_hits_step_limit() {
        let limits = Limits {
            max_steps: 10_000,
            ..Limits::default()
        };
        let err = run_with("while (true) {}", &Capabilities::standard(), &limits).unwrap_err();
        assert!(err.message.contains("step"), "{err}");
    }

    #[test]
    fn wall_clock_limit_applies() {
        let limits = Limits {
            max_steps: u64::MAX,
            max_duration: Duration::from_millis(50),
            ..Limits::default()
        };
        let err = run_with("for (;;) {}", &Capabilities::standard(), &limits).unwrap_err();
        assert!(!err.message.is_empty());
    }

    #[test]
    fn runaway_recursion_hits_call_limit() {
        let err = run("function f(n) { return f(n + 1); }\nf(0);").unwrap_err();
        assert!(err.message.contains("Maximum call stack size exceeded"), "{err}");
    }

    #[test]
    fn limit_errors_cannot_be_caught() {
        let script = "try { while (true) {} } catch (e) {}\n\
                      const mesh = new Mesh(new BoxGeometry(1, 1, 1));";
        let limits = Limits {
            max_steps: 5_000,
            ..Limits::default()
        };
        assert!(run_with(script, &Capabilities::standard(), &limits).is_err());
    }

    #[test]
    fn script_errors_can_be_caught() {
        let scene = run(
            "let size = 1;\n\
             try { null.foo; } catch (e) { size = e instanceof TypeError ? 4 : 2; }\n\
             const mesh = new Mesh(new BoxGeometry(size, size, size));",
        )
        .unwrap();
        assert_close(extent(&scene), [4.0, 4.0, 4.0]);
    }

    #[test]
    fn uncaught_throw_is_reported() {
        let err = run("\n\nthrow new Error('bad wall');").unwrap_err();
        assert_eq!(err.message, "Error: bad wall");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn deep_nesting_is_rejected_by_parser() {
        let code = format!("const x = {}1{};", "(".repeat(5_000), ")".repeat(5_000));
        let err = run(&code).unwrap_err();
        assert!(err.message.contains("nested"), "{err}");
    }

    #[test]
    fn runs_do_not_share_state() {
        run("var leaked = 1; const mesh = new Mesh(new BoxGeometry(1, 1, 1));").unwrap();
        let err = run("const mesh = new Mesh(new BoxGeometry(leaked, 1, 1));").unwrap_err();
        assert!(err.message.contains("leaked is not defined"), "{err}");
    }

    #[test]
    fn capabilities_cannot_be_reassigned() {
        let err = run("Math = null;").unwrap_err();
        assert!(err.message.contains("constant"), "{err}");
    }

    #[test]
    fn removed_capability_is_not_visible() {
        let capabilities = Capabilities::standard().without("CSG");
        let err = run_with(
            "const a = new Mesh(new BoxGeometry(1, 1, 1));\nconst mesh = CSG.union(a, a);",
            &capabilities,
            &Limits::default(),
        )
        .unwrap_err();
        assert!(err.message.contains("CSG is not defined"), "{err}");
    }

    #[test]
    fn csg_subtract_keeps_first_operand_frame() {
        let scene = run(
            "const block = new Mesh(new BoxGeometry(20, 20, 20), new MeshStandardMaterial({ color: 'red' }));\n\
             block.position.set(100, 0, 0);\n\
             const hole = new Mesh(new CylinderGeometry(4, 4, 40, 16));\n\
             hole.position.set(100, 0, 0);\n\
             const mesh = CSG.subtract(block, hole);",
        )
        .unwrap();
        let SceneObject::Mesh(mesh) = &scene else {
            panic!("expected a mesh");
        };
        assert_eq!(mesh.transform.position, [100.0, 0.0, 0.0]);
        assert_eq!(mesh.color, Some(0xff0000));
        let (min, max) = scene.bounds().unwrap();
        assert!((min[0] - 90.0).abs() < 1e-6 && (max[0] - 110.0).abs() < 1e-6);
        assert!(scene.triangles().unwrap().len() > 12);
    }

    #[test]
    fn extruded_shape_with_hole() {
        let scene = run(
            "const shape = new Shape();\n\
             shape.moveTo(0, 0);\n\
             shape.lineTo(40, 0);\n\
             shape.lineTo(40, 20);\n\
             shape.lineTo(0, 20);\n\
             shape.closePath();\n\
             const hole = new Path();\n\
             hole.absarc(20, 10, 5, 0, Math.PI * 2, false);\n\
             shape.holes.push(hole);\n\
             const geometry = new ExtrudeGeometry(shape, { depth: 5, bevelEnabled: false });\n\
             const mesh = new Mesh(geometry);",
        )
        .unwrap();
        assert_close(extent(&scene), [40.0, 20.0, 5.0]);
    }

    #[test]
    fn lathe_and_array_helpers() {
        let scene = run(
            "const points = Array.from({ length: 5 }, (_, i) => new Vector2(10 - i, i * 4));\n\
             const profile = points.filter((p) => p.x > 0).map((p) => new Vector2(p.x, p.y));\n\
             const mesh = new Mesh(new LatheGeometry(profile, 24));",
        )
        .unwrap();
        let [x, y, z] = extent(&scene);
        assert!((y - 16.0).abs() < 1e-6);
        assert!((x - 20.0).abs() < 1e-6 && (z - 20.0).abs() < 1e-6);
    }

    #[test]
    fn scene_cycles_are_rejected() {
        let err = run(
            "const a = new Group();\nconst b = new Group();\na.add(b);\nb.add(a);\nconst group = a;",
        )
        .unwrap_err();
        assert!(err.message.contains("descendant"), "{err}");
    }

    #[test]
    fn reference_cycles_do_not_leak_or_crash() {
        let scene = run(
            "const node = {};\nnode.self = node;\n\
             const list = [];\nlist.push(list);\n\
             function outer() { const inner = () => outer; return inner; }\n\
             outer();\n\
             const mesh = new Mesh(new SphereGeometry(5, 8, 6));",
        )
        .unwrap();
        assert_eq!(scene.kind(), "mesh");
    }

    #[test]
    fn shift_compound_assignments() {
        let scene = run(
            "let w = 5; w <<= 2;\n\
             let h = -64; h >>= 3;\n\
             let d = -1; d >>>= 28;\n\
             const mesh = new Mesh(new BoxGeometry(w, -h, d));",
        )
        .unwrap();
        assert_close(extent(&scene), [20.0, 8.0, 15.0]);
    }

    #[test]
    fn dropping_long_chains_mid_run_does_not_overflow() {
        let limits = Limits {
            max_steps: 50_000_000,
            max_duration: Duration::from_secs(120),
            stack_size: 8 * 1024 * 1024,
            ..Limits::default()
        };
        let scene = run_with(
            "let node = null;\n\
             for (let i = 0; i < 200000; i++) { node = { next: node }; }\n\
             node = null;\n\
             let list = [];\n\
             for (let i = 0; i < 200000; i++) { list = [list]; }\n\
             list = 0;\n\
             const mesh = new Mesh(new BoxGeometry(1, 1, 1));",
            &Capabilities::standard(),
            &limits,
        )
        .unwrap();
        assert_eq!(scene.kind(), "mesh");
    }

    #[test]
    fn vertex_budget_is_enforced() {
        let limits = Limits {
            max_vertices: 1_000,
            ..Limits::default()
        };
        let err = run_with(
            "const meshes = [];\nfor (let i = 0; i < 100; i++) meshes.push(new SphereGeometry(1, 32, 16));",
            &Capabilities::standard(),
            &limits,
        )
        .unwrap_err();
        assert!(err.message.contains("vert"), "{err}");
    }
}
