//! Prompt in, STL file out.

use cad_mesh::math::sub;
use cad_mesh::{ExportError, GeometryError, MeshExporter, SceneObject, bounds_of};
use cad_script::{Capabilities, ExecutionError, Limits};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::correction::{
    CorrectionContext, CorrectionLoop, FailureCause, LoopFailure, LoopStart, LoopSuccess,
};
use crate::dimensions::BoundingBox;
use crate::error::{ErrorContext, PipelineError};
use crate::extract::extract_code;
use crate::model::{CompletionOptions, EmbeddingModel, LanguageModel, complete_code};
use crate::prompt::compose_initial;
use crate::retrieval::{RankedExample, RetrievalIndex};

/// What to do when the embedding service cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalPolicy {
    /// Continue without examples and flag the outcome.
    #[default]
    Degrade,
    /// Fail the request with `RetrievalUnavailable`.
    Abort,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub top_n: usize,
    pub retrieval_policy: RetrievalPolicy,
    pub completion: CompletionOptions,
    pub capabilities: Capabilities,
    pub limits: Limits,
    /// Fraction by which a scene may exceed the requested box and still count
    /// as fitting.
    pub fit_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_n: 2,
            retrieval_policy: RetrievalPolicy::Degrade,
            completion: CompletionOptions::default(),
            capabilities: Capabilities::standard(),
            limits: Limits::default(),
            fit_tolerance: 0.25,
        }
    }
}

/// A generated and exported model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub prompt: String,
    /// The code that produced the exported file.
    pub code: String,
    /// The code the run started from; equal to `code` unless corrected.
    pub original_code: String,
    pub corrected: bool,
    pub file_name: String,
    pub bounding_box: BoundingBox,
    pub scene_extent: [f64; 3],
    pub fits_bounding_box: bool,
    pub retrieval_degraded: bool,
    pub examples: Vec<String>,
}

impl GenerationOutcome {
    /// Context for a follow-up change to this model.
    pub fn context(&self) -> CorrectionContext {
        CorrectionContext::new(self.code.clone())
    }
}

pub struct Pipeline<M, E> {
    model: M,
    index: RetrievalIndex<E>,
    exporter: MeshExporter,
    config: PipelineConfig,
}

impl<M: LanguageModel, E: EmbeddingModel> Pipeline<M, E> {
    pub fn new(
        model: M,
        index: RetrievalIndex<E>,
        exporter: MeshExporter,
        config: PipelineConfig,
    ) -> Self {
        Self {
            model,
            index,
            exporter,
            config,
        }
    }

    pub fn exporter(&self) -> &MeshExporter {
        &self.exporter
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one request. Without `context` the prompt describes a new
    /// object; with it the prompt is a change to `context.previous_code`.
    pub async fn generate(
        &self,
        prompt: &str,
        context: Option<CorrectionContext>,
    ) -> Result<GenerationOutcome, PipelineError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::invalid_request("prompt must not be empty"));
        }
        info!(prompt, follow_up = context.is_some(), "generation requested");

        let bounding_box = BoundingBox::from_prompt(prompt);
        debug!(x = bounding_box.x, y = bounding_box.y, z = bounding_box.z, "dimensions extracted");

        let options = &self.config.completion;
        let (start, retrieval_degraded, examples) = match context {
            Some(context) => (
                LoopStart::Feedback(context, prompt.to_string()),
                false,
                Vec::new(),
            ),
            None => {
                let (examples, degraded) = self.retrieve(prompt).await?;
                let request = compose_initial(prompt, &bounding_box, &examples);
                let raw = complete_code(&self.model, &request, options)
                    .await
                    .map_err(|err| {
                        PipelineError::from_generation(err, ErrorContext::for_prompt(prompt))
                    })?;
                let titles = examples.into_iter().map(|r| r.example.title).collect();
                (LoopStart::Generated(extract_code(&raw)), degraded, titles)
            }
        };

        let result = CorrectionLoop::new(&self.model, options)
            .run(start, |code| self.execute(code))
            .await;
        let success = result.map_err(|failure| loop_error(prompt, failure))?;
        let LoopSuccess {
            value: scene,
            code,
            original_code,
            corrected,
            ..
        } = success;

        let error_context = || {
            let context = ErrorContext::for_prompt(prompt).with_code(original_code.clone());
            context.with_corrected_code(corrected.then(|| code.clone()))
        };
        let (file_name, scene_extent) = self.export(scene).await.map_err(|err| match err {
            ExportError::Malformed(source) => PipelineError::MalformedGeometry {
                context: error_context(),
                source,
            },
            ExportError::Io(source) => PipelineError::Export {
                context: error_context(),
                source,
            },
        })?;

        let fits_bounding_box = bounding_box.contains_extent(scene_extent, self.config.fit_tolerance);
        if !fits_bounding_box {
            warn!(?scene_extent, target = ?bounding_box.as_array(), "model exceeds the requested box");
        }
        info!(file = %file_name, corrected, "generation finished");

        Ok(GenerationOutcome {
            prompt: prompt.to_string(),
            code,
            original_code,
            corrected,
            file_name,
            bounding_box,
            scene_extent,
            fits_bounding_box,
            retrieval_degraded,
            examples,
        })
    }

    async fn retrieve(&self, prompt: &str) -> Result<(Vec<RankedExample>, bool), PipelineError> {
        match self.index.relevant_examples(prompt, self.config.top_n).await {
            Ok(examples) => Ok((examples, false)),
            Err(source) => match self.config.retrieval_policy {
                RetrievalPolicy::Degrade => {
                    warn!(error = %source, "retrieval unavailable, continuing without examples");
                    Ok((Vec::new(), true))
                }
                RetrievalPolicy::Abort => Err(PipelineError::RetrievalUnavailable {
                    context: ErrorContext::for_prompt(prompt),
                    source,
                }),
            },
        }
    }

    /// Runs `code` in a fresh sandbox off the async workers.
    async fn execute(&self, code: String) -> Result<SceneObject, ExecutionError> {
        let capabilities = self.config.capabilities.clone();
        let limits = self.config.limits.clone();
        let task =
            tokio::task::spawn_blocking(move || cad_script::run_with(&code, &capabilities, &limits));
        match task.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "sandbox task failed");
                Err(ExecutionError::new("script execution aborted unexpectedly"))
            }
        }
    }

    async fn export(&self, scene: SceneObject) -> Result<(String, [f64; 3]), ExportError> {
        let exporter = self.exporter.clone();
        let task = tokio::task::spawn_blocking(move || -> Result<_, ExportError> {
            let triangles = scene.triangles()?;
            let (min, max) = bounds_of(&triangles).ok_or(GeometryError::Empty)?;
            let file_name = exporter.export_triangles(&triangles)?;
            Ok((file_name, sub(max, min)))
        });
        match task.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "export task failed");
                Err(ExportError::Io(std::io::Error::other("mesh export aborted unexpectedly")))
            }
        }
    }
}

fn loop_error(prompt: &str, failure: LoopFailure) -> PipelineError {
    let LoopFailure {
        original_code,
        original_error,
        corrected_code,
        cause,
        ..
    } = failure;
    let context = ErrorContext::for_prompt(prompt)
        .with_code(original_code)
        .with_corrected_code(corrected_code);
    match cause {
        FailureCause::Generation(err) => PipelineError::from_generation(err, context),
        FailureCause::Execution(error) => PipelineError::ExecutionFailed {
            context,
            error,
            original_error,
        },
    }
}

#[cfg(test)]
mod tests {
    use cad_mesh::MeshExporter;
    use tempfile::TempDir;

    use super::{Pipeline, PipelineConfig, RetrievalPolicy};
    use crate::correction::CorrectionContext;
    use crate::error::{ModelError, PipelineError};
    use crate::fakes::{FailingEmbedder, LetterEmbedder, ScriptedModel};
    use crate::model::EmbeddingModel;
    use crate::prompt::RequestKind;
    use crate::retrieval::{RetrievalIndex, SEED_CORPUS, parse_corpus};

    const CUBE: &str = "```javascript\nconst geometry = new THREE.BoxGeometry(30, 10, 10);\nconst material = new THREE.MeshStandardMaterial({ color: 0x888888 });\nconst mesh = new THREE.Mesh(geometry, material);\n```";
    const FALLBACK_GROUP: &str = "const group = new Group();\nconst block = new Mesh(new BoxGeometry(10, 10, 10));\ngroup.add(block);";

    fn build<E: EmbeddingModel>(
        model: ScriptedModel,
        embedder: E,
        config: PipelineConfig,
    ) -> (Pipeline<ScriptedModel, E>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let corpus = parse_corpus(SEED_CORPUS).unwrap();
        let pipeline = Pipeline::new(
            model,
            RetrievalIndex::new(corpus, embedder),
            MeshExporter::new(dir.path().join("models")),
            config,
        );
        (pipeline, dir)
    }

    #[tokio::test]
    async fn thirty_mm_cube_is_exported() {
        let model = ScriptedModel::new([CUBE]);
        let (pipeline, _dir) = build(model.clone(), LetterEmbedder::default(), PipelineConfig::default());

        let outcome = pipeline.generate("a 30mm cube", None).await.unwrap();
        assert_eq!(outcome.bounding_box.as_array(), [30.0, 10.0, 10.0]);
        assert!(!outcome.corrected);
        assert!(outcome.fits_bounding_box);
        assert!(!outcome.retrieval_degraded);
        assert_eq!(outcome.examples.len(), 2);
        assert!(outcome.code.starts_with("const geometry"));
        assert!((outcome.scene_extent[0] - 30.0).abs() < 1e-9);

        let stl = std::fs::read_to_string(pipeline.exporter().dir().join(&outcome.file_name)).unwrap();
        assert!(stl.starts_with("solid"));
        assert!(stl.trim_end().lines().last().unwrap().starts_with("endsolid"));
        assert_eq!(stl.matches("endfacet").count(), 12);

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, RequestKind::Initial);
        assert!(requests[0].system.contains("[30, 10, 10]"));
    }

    #[tokio::test]
    async fn gibberish_prompt_ends_well_formed() {
        let model = ScriptedModel::new(["I cannot tell what object that is.", FALLBACK_GROUP]);
        let (pipeline, _dir) = build(model, LetterEmbedder::default(), PipelineConfig::default());
        let outcome = pipeline.generate("asdkjASD###", None).await.unwrap();
        assert!(outcome.corrected);
        assert_eq!(outcome.bounding_box.as_array(), [10.0, 10.0, 10.0]);
        assert_eq!(outcome.code, FALLBACK_GROUP);

        let model = ScriptedModel::new(["I cannot tell what object that is."]);
        let (pipeline, _dir) = build(model, LetterEmbedder::default(), PipelineConfig::default());
        let error = pipeline.generate("asdkjASD###", None).await.unwrap_err();
        assert_eq!(error.kind(), "generation_failed");
        assert_eq!(error.prompt(), Some("asdkjASD###"));
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_any_call() {
        let model = ScriptedModel::new([CUBE]);
        let (pipeline, _dir) = build(model.clone(), FailingEmbedder, PipelineConfig::default());
        let error = pipeline.generate("   ", None).await.unwrap_err();
        assert!(matches!(error, PipelineError::InvalidRequest { .. }));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_by_default() {
        let model = ScriptedModel::new([CUBE]);
        let (pipeline, _dir) = build(model.clone(), FailingEmbedder, PipelineConfig::default());
        let outcome = pipeline.generate("a 30mm cube", None).await.unwrap();
        assert!(outcome.retrieval_degraded);
        assert!(outcome.examples.is_empty());
        assert!(!model.requests()[0].system.contains("Relevant examples"));
    }

    #[tokio::test]
    async fn retrieval_failure_can_abort() {
        let config = PipelineConfig {
            retrieval_policy: RetrievalPolicy::Abort,
            ..PipelineConfig::default()
        };
        let model = ScriptedModel::new([CUBE]);
        let (pipeline, _dir) = build(model.clone(), FailingEmbedder, config);
        let error = pipeline.generate("a 30mm cube", None).await.unwrap_err();
        assert_eq!(error.kind(), "retrieval_unavailable");
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn initial_generation_failure_is_terminal() {
        let model = ScriptedModel::from_results([
            Err(ModelError::Unavailable("quota exceeded".into())),
            Ok(CUBE.to_string()),
        ]);
        let (pipeline, _dir) = build(model.clone(), LetterEmbedder::default(), PipelineConfig::default());
        let error = pipeline.generate("a cube", None).await.unwrap_err();
        assert_eq!(error.kind(), "generation_failed");
        assert!(error.code().is_none());
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn failing_code_is_corrected() {
        let model = ScriptedModel::new(["const mesh = new Mesh(new BoxGeometry(1, 1, 1)", CUBE]);
        let (pipeline, _dir) = build(model.clone(), LetterEmbedder::default(), PipelineConfig::default());
        let outcome = pipeline.generate("a 30mm cube", None).await.unwrap();
        assert!(outcome.corrected);
        assert!(outcome.code.contains("BoxGeometry(30, 10, 10)"));
        assert_eq!(outcome.original_code, "const mesh = new Mesh(new BoxGeometry(1, 1, 1)");

        let requests = model.requests();
        assert_eq!(requests[1].kind, RequestKind::ErrorCorrection);
        assert!(requests[1].system.contains("new BoxGeometry(1, 1, 1)"));
    }

    #[tokio::test]
    async fn twice_failing_code_reports_both_snippets() {
        let model = ScriptedModel::new([
            "const mesh = undefinedThing();",
            "const group = 42;",
        ]);
        let (pipeline, dir) = build(model, LetterEmbedder::default(), PipelineConfig::default());
        let error = pipeline.generate("a bracket", None).await.unwrap_err();
        let PipelineError::ExecutionFailed {
            original_error, ..
        } = &error
        else {
            panic!("unexpected error: {error}");
        };
        assert!(original_error.is_some());
        assert_eq!(error.code(), Some("const mesh = undefinedThing();"));
        assert_eq!(error.corrected_code(), Some("const group = 42;"));
        assert!(!dir.path().join("models").exists());
    }

    #[tokio::test]
    async fn feedback_modifies_previous_code() {
        let model = ScriptedModel::new([
            "const mesh = new Mesh(new CylinderGeometry(5, 5, 40, 24));",
        ]);
        let (pipeline, _dir) = build(model.clone(), FailingEmbedder, PipelineConfig::default());
        let context = CorrectionContext::new("const mesh = new Mesh(new CylinderGeometry(5, 5, 20, 24));");
        let outcome = pipeline
            .generate("make it 40mm tall", Some(context))
            .await
            .unwrap();
        assert!(outcome.corrected);
        assert!(!outcome.retrieval_degraded);
        assert_eq!(outcome.context().previous_code, outcome.code);

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, RequestKind::Modification);
        assert_eq!(requests[0].user, "make it 40mm tall");
    }

    #[tokio::test]
    async fn empty_scene_is_malformed_geometry() {
        let model = ScriptedModel::new(["const group = new Group();"]);
        let (pipeline, dir) = build(model, LetterEmbedder::default(), PipelineConfig::default());
        let error = pipeline.generate("nothing", None).await.unwrap_err();
        assert_eq!(error.kind(), "malformed_geometry");
        assert_eq!(error.code(), Some("const group = new Group();"));
        assert!(!dir.path().join("models").exists());
    }

    #[tokio::test]
    async fn oversized_models_are_flagged() {
        let model = ScriptedModel::new(["const mesh = new Mesh(new BoxGeometry(100, 100, 100));"]);
        let (pipeline, _dir) = build(model, LetterEmbedder::default(), PipelineConfig::default());
        let outcome = pipeline.generate("a 20mm cube", None).await.unwrap();
        assert!(!outcome.fits_bounding_box);
    }
}
