//! Seams to the language and embedding models.

use std::future::Future;

use tracing::debug;

use crate::error::{GenerationError, ModelError};
use crate::prompt::GenerationRequest;

/// Caps applied to every completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 10_000,
            temperature: 0.8,
        }
    }
}

/// A chat model that turns a [`GenerationRequest`] into free text.
pub trait LanguageModel: Send + Sync {
    fn complete(
        &self,
        request: &GenerationRequest,
        options: &CompletionOptions,
    ) -> impl Future<Output = Result<String, ModelError>> + Send;
}

/// A text embedding model.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, ModelError>> + Send;
}

/// Runs one completion and rejects a blank reply.
pub async fn complete_code<M: LanguageModel>(
    model: &M,
    request: &GenerationRequest,
    options: &CompletionOptions,
) -> Result<String, GenerationError> {
    debug!(kind = ?request.kind, max_tokens = options.max_tokens, "requesting completion");
    let text = model.complete(request, options).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::{CompletionOptions, complete_code};
    use crate::error::{GenerationError, ModelError};
    use crate::fakes::ScriptedModel;
    use crate::prompt::compose_modification;

    #[tokio::test]
    async fn blank_completion_is_empty_generation() {
        let model = ScriptedModel::new(["  \n "]);
        let request = compose_modification("const mesh = 1;", "bigger");
        let result = complete_code(&model, &request, &CompletionOptions::default()).await;
        assert!(matches!(result, Err(GenerationError::Empty)));
    }

    #[tokio::test]
    async fn transport_errors_stay_distinct() {
        let model = ScriptedModel::from_results([Err(ModelError::Unavailable("offline".into()))]);
        let request = compose_modification("const mesh = 1;", "bigger");
        let result = complete_code(&model, &request, &CompletionOptions::default()).await;
        assert!(matches!(result, Err(GenerationError::Failed(ModelError::Unavailable(_)))));
    }

    #[tokio::test]
    async fn completion_is_trimmed() {
        let model = ScriptedModel::new(["\n const mesh = 1; \n"]);
        let request = compose_modification("const mesh = 0;", "bigger");
        let text = complete_code(&model, &request, &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "const mesh = 1;");
        assert_eq!(model.requests().len(), 1);
    }
}
