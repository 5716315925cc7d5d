//! The model-facing half of the generator.
//!
//! A prompt is reduced to a target [`BoundingBox`], enriched with similar
//! examples from a [`RetrievalIndex`], turned into code by a
//! [`LanguageModel`], and run through the sandbox inside a one-shot
//! [`CorrectionLoop`]. [`Pipeline`] chains the stages and exports the result.

pub mod correction;
pub mod dimensions;
mod error;
pub mod extract;
pub mod model;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;

#[cfg(test)]
mod fakes;

pub use correction::{CorrectionContext, CorrectionLoop, CorrectionTrigger, LoopState};
pub use dimensions::{BoundingBox, extract_dimensions_mm};
pub use error::{ErrorContext, GenerationError, ModelError, PipelineError, RetrievalError};
pub use extract::extract_code;
pub use model::{CompletionOptions, EmbeddingModel, LanguageModel, complete_code};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use pipeline::{GenerationOutcome, Pipeline, PipelineConfig, RetrievalPolicy};
pub use prompt::{GenerationRequest, PreviewImage, RequestKind};
pub use retrieval::{Example, RankedExample, RetrievalIndex, cosine_similarity};
