//! Instruction payloads sent to the generation model.
//!
//! A request is built for exactly one purpose: the first generation, the
//! repair of code that failed to run, or a change the user asked for.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use cad_script::{Capabilities, CapabilityGroup};

use crate::dimensions::BoundingBox;
use crate::retrieval::RankedExample;

/// Seeded assistant turn placed before the user message of an initial
/// request.
pub const EXAMPLE_REPLY: &str = "Here's an example of valid code:\n\
const geometry = new CylinderGeometry(1, 1, 4, 32);\n\
const material = new MeshPhysicalMaterial({color: 0xcccccc});\n\
const mesh = new Mesh(geometry, material);";

const CSG_USAGE: &str = "Boolean solids: CSG.union(a, b), CSG.subtract(a, b) and \
CSG.intersect(a, b) take two meshes and return a new mesh placed like `a`. \
CSG.fromMesh(mesh) returns a solid whose union/subtract/intersect methods chain, \
and CSG.toMesh(solid, reference, material) turns it back into a mesh.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Initial,
    ErrorCorrection,
    Modification,
}

/// A rendered image of a previous attempt, attached for visual grounding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub media_type: String,
    pub data: Vec<u8>,
}

impl PreviewImage {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            media_type: "image/png".to_string(),
            data,
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, BASE64.encode(&self.data))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub kind: RequestKind,
    pub system: String,
    /// Assistant turn shown to the model before `user`.
    pub example_reply: Option<String>,
    pub user: String,
    pub preview: Option<PreviewImage>,
}

impl GenerationRequest {
    pub fn with_preview(mut self, preview: Option<PreviewImage>) -> Self {
        self.preview = preview;
        self
    }
}

/// The capability list as shown to the model, rendered from the same table
/// the sandbox seeds its globals from.
pub fn capability_description() -> String {
    let capabilities = Capabilities::standard();
    format!(
        "Geometry, material and scene classes: {}.\nLanguage built-ins: {}.\n\
         Every geometry class is also reachable as THREE.<Name>.\n{CSG_USAGE}",
        capabilities.geometry_names().join(", "),
        capabilities.group(CapabilityGroup::Language).join(", "),
    )
}

fn output_contract(out: &mut String) {
    out.push_str(
        "- Return only the code: no prose, no explanation, no markdown fences.\n\
         - Assign the final result to a variable named `mesh` (a single Mesh) or \
         `group` (a Group of meshes).\n\
         - Only the names listed below exist; there is no import, require or module mechanism.\n\
         - Lengths are millimetres.\n",
    );
}

pub fn compose_initial(
    prompt: &str,
    bounding_box: &BoundingBox,
    examples: &[RankedExample],
) -> GenerationRequest {
    let mut system = String::from(
        "You are an expert 3D modeling assistant. Write procedural geometry code in a small \
         JavaScript dialect with a three.js-style API. The code must:\n",
    );
    output_contract(&mut system);
    let _ = writeln!(
        system,
        "- Fit the model within a bounding box: {}",
        bounding_box.describe()
    );
    system.push_str("- Use clear variable names and short comments for key sections.\n\n");
    system.push_str(&capability_description());

    if !examples.is_empty() {
        system.push_str("\n\nRelevant examples:\n");
        for (index, ranked) in examples.iter().enumerate() {
            let _ = write!(
                system,
                "Example {} - {}:\n{}\n\n",
                index + 1,
                ranked.example.title,
                ranked.example.code
            );
        }
    }

    GenerationRequest {
        kind: RequestKind::Initial,
        system: system.trim_end().to_string(),
        example_reply: Some(EXAMPLE_REPLY.to_string()),
        user: prompt.to_string(),
        preview: None,
    }
}

/// Asks for a fixed version of `code`, which failed with `error`.
pub fn compose_error_correction(
    code: &str,
    error: &str,
    preview: Option<PreviewImage>,
) -> GenerationRequest {
    let mut system = format!(
        "You are a debugging assistant for procedural geometry code. \
         This code snippet:\n{code}\n\nproduces this error:\n{error}\n\n\
         Correct the mistake and repeat only the corrected code snippet. \
         Do not explain the error or your corrections. The corrected code must:\n"
    );
    output_contract(&mut system);
    system.push('\n');
    system.push_str(&capability_description());

    let user = if preview.is_some() {
        "Return the corrected code. The attached image shows the previous attempt."
    } else {
        "Return the corrected code."
    };

    GenerationRequest {
        kind: RequestKind::ErrorCorrection,
        system,
        example_reply: None,
        user: user.to_string(),
        preview,
    }
}

/// Asks for `feedback` to be applied to previously accepted `code`.
pub fn compose_modification(code: &str, feedback: &str) -> GenerationRequest {
    let mut system = format!(
        "You are an expert 3D modeling assistant. The user accepted this code earlier:\n\
         {code}\n\nApply the change the user asks for and repeat the complete updated code. \
         Keep everything the user did not ask to change. The updated code must:\n"
    );
    output_contract(&mut system);
    system.push('\n');
    system.push_str(&capability_description());

    GenerationRequest {
        kind: RequestKind::Modification,
        system,
        example_reply: None,
        user: feedback.to_string(),
        preview: None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PreviewImage, RequestKind, capability_description, compose_error_correction,
        compose_initial, compose_modification,
    };
    use crate::dimensions::BoundingBox;
    use crate::retrieval::{Example, RankedExample};

    fn ranked(title: &str, code: &str) -> RankedExample {
        RankedExample {
            example: Example {
                title: title.to_string(),
                tags: Vec::new(),
                description: String::new(),
                code: code.to_string(),
                embedding: None,
            },
            similarity: 0.5,
        }
    }

    #[test]
    fn capability_list_matches_sandbox() {
        let description = capability_description();
        for name in ["BoxGeometry", "ExtrudeGeometry", "CSG", "Math", "parseFloat"] {
            assert!(description.contains(name), "missing {name}");
        }
        assert!(!description.contains("WebGLRenderer"));
        assert!(!description.contains("ShaderMaterial"));
    }

    #[test]
    fn initial_request_carries_box_and_examples() {
        let request = compose_initial(
            "a 30mm cube",
            &BoundingBox::from_prompt("a 30mm cube"),
            &[ranked("Cube", "const mesh = new Mesh(new BoxGeometry(1, 1, 1));")],
        );
        assert_eq!(request.kind, RequestKind::Initial);
        assert_eq!(request.user, "a 30mm cube");
        assert!(request.system.contains("[30, 10, 10]"));
        assert!(request.system.contains("`mesh`"));
        assert!(request.system.contains("`group`"));
        assert!(request.system.contains("no import"));
        assert!(request.system.contains("Example 1 - Cube:"));
        assert!(request.example_reply.is_some());
        assert!(request.preview.is_none());
    }

    #[test]
    fn initial_request_without_examples_omits_section() {
        let request = compose_initial("a ring", &BoundingBox::default(), &[]);
        assert!(!request.system.contains("Relevant examples"));
    }

    #[test]
    fn correction_requests_are_exclusive() {
        let repair = compose_error_correction("const x = ;", "SyntaxError: unexpected ';'", None);
        assert_eq!(repair.kind, RequestKind::ErrorCorrection);
        assert!(repair.system.contains("const x = ;"));
        assert!(repair.system.contains("SyntaxError"));
        assert!(repair.example_reply.is_none());

        let change = compose_modification("const mesh = a;", "make it taller");
        assert_eq!(change.kind, RequestKind::Modification);
        assert!(change.system.contains("const mesh = a;"));
        assert!(!change.system.contains("produces this error"));
        assert_eq!(change.user, "make it taller");
    }

    #[test]
    fn preview_is_sent_as_data_url() {
        let preview = PreviewImage::png(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(preview.data_url(), "data:image/png;base64,iVBORw==");
        let request = compose_error_correction("x", "boom", Some(preview.clone()));
        assert_eq!(request.preview, Some(preview));
        assert!(request.user.contains("image"));
    }
}
