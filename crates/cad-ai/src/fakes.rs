//! Scripted model doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ModelError;
use crate::model::{CompletionOptions, EmbeddingModel, LanguageModel};
use crate::prompt::GenerationRequest;

/// Replies from a queue and records every request it saw.
#[derive(Clone, Default)]
pub(crate) struct ScriptedModel {
    responses: Arc<Mutex<VecDeque<Result<String, ModelError>>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedModel {
    pub(crate) fn new<'a>(responses: impl IntoIterator<Item = &'a str>) -> Self {
        Self::from_results(responses.into_iter().map(|text| Ok(text.to_string())))
    }

    pub(crate) fn from_results(
        responses: impl IntoIterator<Item = Result<String, ModelError>>,
    ) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        request: &GenerationRequest,
        _options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Unavailable("no scripted response left".into())))
    }
}

/// Letter-frequency vectors: deterministic and good enough to rank by
/// shared vocabulary.
#[derive(Clone, Default)]
pub(crate) struct LetterEmbedder {
    calls: Arc<AtomicUsize>,
}

impl LetterEmbedder {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingModel for LetterEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0; 26];
        for c in text.chars().filter(char::is_ascii_alphabetic) {
            vector[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
        }
        Ok(vector)
    }
}

#[derive(Clone, Copy, Default)]
pub(crate) struct FailingEmbedder;

impl EmbeddingModel for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::Unavailable("embedding service offline".into()))
    }
}
