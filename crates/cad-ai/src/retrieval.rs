//! Example corpus ranked by embedding similarity to a prompt.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::RetrievalError;
use crate::model::EmbeddingModel;

/// Corpus shipped with the crate.
pub const SEED_CORPUS: &str = include_str!("../corpus/examples.json");

/// One reference snippet. `embedding` is filled in lazily and never
/// recomputed once present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Example {
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.description, self.code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedExample {
    pub example: Example,
    pub similarity: f32,
}

/// `dot(a, b) / (|a| |b|)`, or 0 when the vectors differ in length, are
/// empty or either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_finite() {
        similarity as f32
    } else {
        0.0
    }
}

pub fn parse_corpus(json: &str) -> Result<Vec<Example>, serde_json::Error> {
    serde_json::from_str(json)
}

pub struct RetrievalIndex<E> {
    embedder: E,
    examples: RwLock<Vec<Example>>,
    path: Option<PathBuf>,
    persist: Mutex<()>,
}

impl<E: EmbeddingModel> RetrievalIndex<E> {
    /// An in-memory index; computed embeddings are not persisted.
    pub fn new(examples: Vec<Example>, embedder: E) -> Self {
        Self {
            embedder,
            examples: RwLock::new(examples),
            path: None,
            persist: Mutex::new(()),
        }
    }

    /// Reads the corpus file at `path`; new embeddings are written back to it.
    pub fn load(path: impl Into<PathBuf>, embedder: E) -> Result<Self, RetrievalError> {
        let path = path.into();
        let json = std::fs::read_to_string(&path).map_err(|source| RetrievalError::Io {
            path: path.clone(),
            source,
        })?;
        let examples = parse_corpus(&json).map_err(|source| RetrievalError::Format {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), examples = examples.len(), "corpus loaded");
        Ok(Self {
            path: Some(path),
            ..Self::new(examples, embedder)
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn len(&self) -> usize {
        self.examples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.examples.read().await.is_empty()
    }

    /// The `top_n` examples most similar to `prompt`, best first.
    pub async fn relevant_examples(
        &self,
        prompt: &str,
        top_n: usize,
    ) -> Result<Vec<RankedExample>, RetrievalError> {
        if top_n == 0 || self.is_empty().await {
            return Ok(Vec::new());
        }

        let query = self
            .embedder
            .embed(prompt)
            .await
            .map_err(RetrievalError::Unavailable)?;
        let computed = self.ensure_embeddings().await?;
        if computed > 0
            && let Err(err) = self.save().await
        {
            warn!(error = %err, "failed to persist corpus embeddings");
        }

        let examples = self.examples.read().await;
        let mut ranked: Vec<RankedExample> = examples
            .iter()
            .map(|example| RankedExample {
                similarity: example
                    .embedding
                    .as_deref()
                    .map_or(0.0, |embedding| cosine_similarity(&query, embedding)),
                example: Example {
                    embedding: None,
                    ..example.clone()
                },
            })
            .collect();
        ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        ranked.truncate(top_n);
        debug!(
            titles = ?ranked.iter().map(|r| r.example.title.as_str()).collect::<Vec<_>>(),
            "examples retrieved"
        );
        Ok(ranked)
    }

    /// Embeds every example that has no embedding yet and returns how many
    /// were computed.
    ///
    /// The lock is not held while the embedder runs; a result is stored only
    /// if the slot is still empty, so concurrent callers are harmless.
    pub async fn ensure_embeddings(&self) -> Result<usize, RetrievalError> {
        let missing: Vec<(usize, String)> = self
            .examples
            .read()
            .await
            .iter()
            .enumerate()
            .filter(|(_, example)| example.embedding.is_none())
            .map(|(index, example)| (index, example.embedding_text()))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let mut computed = Vec::with_capacity(missing.len());
        for (index, text) in missing {
            let embedding = self
                .embedder
                .embed(&text)
                .await
                .map_err(RetrievalError::Unavailable)?;
            computed.push((index, embedding));
        }

        let mut examples = self.examples.write().await;
        let mut stored = 0;
        for (index, embedding) in computed {
            if let Some(example) = examples.get_mut(index)
                && example.embedding.is_none()
            {
                example.embedding = Some(embedding);
                stored += 1;
            }
        }
        debug!(stored, "example embeddings computed");
        Ok(stored)
    }

    /// Writes the corpus back to its file, if it was loaded from one.
    pub async fn save(&self) -> Result<(), RetrievalError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist.lock().await;
        let json = {
            let examples = self.examples.read().await;
            serde_json::to_string_pretty(&*examples).map_err(|source| RetrievalError::Format {
                path: path.clone(),
                source,
            })?
        };
        tokio::fs::write(path, json)
            .await
            .map_err(|source| RetrievalError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "corpus saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Example, RetrievalIndex, SEED_CORPUS, cosine_similarity, parse_corpus};
    use crate::error::RetrievalError;
    use crate::fakes::{FailingEmbedder, LetterEmbedder};
    use crate::model::EmbeddingModel;

    fn example(title: &str, description: &str) -> Example {
        Example {
            title: title.to_string(),
            tags: Vec::new(),
            description: description.to_string(),
            code: String::new(),
            embedding: None,
        }
    }

    #[test]
    fn self_similarity_is_one() {
        let v = [0.3, -1.2, 4.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn top_n_is_sorted_and_bounded() {
        let index = RetrievalIndex::new(
            vec![
                example("zebra", "zzz zebra"),
                example("cube", "cube box cube"),
                example("cup", "cup mug handle"),
                example("boxes", "box cube boxes"),
            ],
            LetterEmbedder::default(),
        );
        let ranked = index.relevant_examples("a cube box", 2).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].similarity >= ranked[1].similarity);
        assert!(
            ranked
                .iter()
                .all(|r| r.example.title == "cube" || r.example.title == "boxes")
        );
        assert!(ranked.iter().all(|r| r.example.embedding.is_none()));
    }

    #[tokio::test]
    async fn embeddings_are_computed_once() {
        let embedder = LetterEmbedder::default();
        let index = RetrievalIndex::new(
            vec![example("a", "alpha"), example("b", "beta")],
            embedder.clone(),
        );
        index.relevant_examples("alpha", 1).await.unwrap();
        index.relevant_examples("beta", 1).await.unwrap();
        // Two corpus entries once, plus one call per prompt.
        assert_eq!(embedder.calls(), 4);
        assert_eq!(index.ensure_embeddings().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_lookups_store_each_embedding_once() {
        let embedder = LetterEmbedder::default();
        let index = Arc::new(RetrievalIndex::new(
            vec![
                example("cube", "cube box"),
                example("cup", "cup mug"),
                example("ring", "ring torus"),
            ],
            embedder.clone(),
        ));

        let lookups: Vec<_> = ["a cube", "a torus ring"]
            .into_iter()
            .map(|prompt| {
                let index = Arc::clone(&index);
                tokio::spawn(async move { index.relevant_examples(prompt, 2).await })
            })
            .collect();
        for lookup in lookups {
            assert_eq!(lookup.await.unwrap().unwrap().len(), 2);
        }
        // One call per prompt, and each entry embedded by at least one lookup.
        assert!((5..=8).contains(&embedder.calls()), "{}", embedder.calls());

        let examples = index.examples.read().await;
        for example in examples.iter() {
            let stored = example.embedding.as_deref().expect("embedding stored");
            let expected = embedder.embed(&example.embedding_text()).await.unwrap();
            assert_eq!(stored, expected.as_slice(), "{}", example.title);
        }
        drop(examples);
        assert_eq!(index.ensure_embeddings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_corpus_skips_the_embedder() {
        let index = RetrievalIndex::new(Vec::new(), FailingEmbedder);
        assert!(index.relevant_examples("anything", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_embedder_is_reported() {
        let index = RetrievalIndex::new(vec![example("a", "alpha")], FailingEmbedder);
        let result = index.relevant_examples("alpha", 2).await;
        assert!(matches!(result, Err(RetrievalError::Unavailable(_))));
    }

    #[tokio::test]
    async fn computed_embeddings_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(&path, r#"[{"title": "ring", "code": "const mesh = 1;"}]"#).unwrap();

        let index = RetrievalIndex::load(&path, LetterEmbedder::default()).unwrap();
        assert_eq!(index.ensure_embeddings().await.unwrap(), 1);
        index.save().await.unwrap();

        let saved = parse_corpus(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].embedding.is_some());
        assert!(saved[0].tags.is_empty());
    }

    #[test]
    fn missing_corpus_file_is_an_io_error() {
        let result = RetrievalIndex::load("/nonexistent/corpus.json", FailingEmbedder);
        assert!(matches!(result, Err(RetrievalError::Io { .. })));
    }

    #[test]
    fn seed_corpus_parses() {
        let examples = parse_corpus(SEED_CORPUS).unwrap();
        assert!(examples.len() >= 6);
        assert!(examples.iter().all(|e| !e.code.is_empty() && !e.title.is_empty()));
    }

    #[test]
    fn seed_corpus_examples_run_in_the_sandbox() {
        for example in parse_corpus(SEED_CORPUS).unwrap() {
            let scene = cad_script::run(&example.code)
                .unwrap_or_else(|err| panic!("{} failed: {err}", example.title));
            assert!(
                scene.triangles().is_ok(),
                "{} produced malformed geometry",
                example.title
            );
        }
    }
}
