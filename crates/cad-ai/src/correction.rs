//! The one-shot correction loop.
//!
//! ```text
//! Initial --ok--> Done
//! Initial --err--> Correcting --ok--> Done
//!                  Correcting --err--> Failed
//! ```
//!
//! A user-directed change enters at `Correcting`, so whichever way a run
//! starts, at most one regenerated snippet is ever tried.

use std::future::Future;

use cad_script::ExecutionError;
use tracing::{info, warn};

use crate::error::GenerationError;
use crate::extract::extract_code;
use crate::model::{CompletionOptions, LanguageModel, complete_code};
use crate::prompt::{GenerationRequest, PreviewImage, compose_error_correction, compose_modification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initial,
    Correcting,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Succeeded,
    Failed,
}

impl LoopState {
    fn next(self, attempt: Attempt) -> Self {
        match (self, attempt) {
            (Self::Initial | Self::Correcting, Attempt::Succeeded) => Self::Done,
            (Self::Initial, Attempt::Failed) => Self::Correcting,
            (Self::Correcting, Attempt::Failed) => Self::Failed,
            (terminal @ (Self::Done | Self::Failed), _) => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Why a correction is being requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionTrigger {
    ExecutionError { code: String, error: String },
    UserFeedback { code: String, feedback: String },
}

impl CorrectionTrigger {
    pub fn code(&self) -> &str {
        match self {
            Self::ExecutionError { code, .. } | Self::UserFeedback { code, .. } => code,
        }
    }

    pub fn request(&self, preview: Option<PreviewImage>) -> GenerationRequest {
        match self {
            Self::ExecutionError { code, error } => compose_error_correction(code, error, preview),
            Self::UserFeedback { code, feedback } => {
                compose_modification(code, feedback).with_preview(preview)
            }
        }
    }
}

/// Per-conversation state for user-directed changes.
///
/// Created from the first successful generation, replaced by every
/// successful change and dropped when the conversation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionContext {
    pub previous_code: String,
    pub preview: Option<PreviewImage>,
}

impl CorrectionContext {
    pub fn new(previous_code: impl Into<String>) -> Self {
        Self {
            previous_code: previous_code.into(),
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: Option<PreviewImage>) -> Self {
        self.preview = preview;
        self
    }
}

/// Where a loop run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStart {
    /// Code from the initial generation, not yet executed.
    Generated(String),
    /// A change requested against previously accepted code.
    Feedback(CorrectionContext, String),
}

#[derive(Debug)]
pub struct LoopSuccess<T> {
    pub value: T,
    /// The snippet that produced `value`.
    pub code: String,
    /// The snippet the run started from.
    pub original_code: String,
    pub corrected: bool,
    pub state: LoopState,
}

#[derive(Debug)]
pub enum FailureCause {
    Generation(GenerationError),
    Execution(ExecutionError),
}

#[derive(Debug)]
pub struct LoopFailure {
    pub original_code: String,
    /// How the original snippet failed, when it was executed at all.
    pub original_error: Option<ExecutionError>,
    pub corrected_code: Option<String>,
    pub cause: FailureCause,
    pub state: LoopState,
}

pub struct CorrectionLoop<'a, M> {
    model: &'a M,
    options: &'a CompletionOptions,
    state: LoopState,
}

impl<'a, M: LanguageModel> CorrectionLoop<'a, M> {
    pub fn new(model: &'a M, options: &'a CompletionOptions) -> Self {
        Self {
            model,
            options,
            state: LoopState::Initial,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn advance(&mut self, attempt: Attempt) {
        let next = self.state.next(attempt);
        info!(from = ?self.state, to = ?next, "correction loop");
        self.state = next;
    }

    /// Drives the loop to `Done` or `Failed`, executing snippets with
    /// `execute`.
    pub async fn run<T, F, Fut>(
        mut self,
        start: LoopStart,
        mut execute: F,
    ) -> Result<LoopSuccess<T>, LoopFailure>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let (trigger, preview, original_error) = match start {
            LoopStart::Generated(code) => match execute(code.clone()).await {
                Ok(value) => {
                    self.advance(Attempt::Succeeded);
                    return Ok(LoopSuccess {
                        value,
                        code: code.clone(),
                        original_code: code,
                        corrected: false,
                        state: self.state,
                    });
                }
                Err(error) => {
                    warn!(%error, "generated code failed, requesting a correction");
                    self.advance(Attempt::Failed);
                    let trigger = CorrectionTrigger::ExecutionError {
                        code,
                        error: error.to_string(),
                    };
                    (trigger, None, Some(error))
                }
            },
            LoopStart::Feedback(context, feedback) => {
                self.state = LoopState::Correcting;
                let trigger = CorrectionTrigger::UserFeedback {
                    code: context.previous_code,
                    feedback,
                };
                (trigger, context.preview, None)
            }
        };

        let original_code = trigger.code().to_string();
        let request = trigger.request(preview);
        let raw = match complete_code(self.model, &request, self.options).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "correction request failed");
                self.advance(Attempt::Failed);
                return Err(LoopFailure {
                    original_code,
                    original_error,
                    corrected_code: None,
                    cause: FailureCause::Generation(error),
                    state: self.state,
                });
            }
        };

        let corrected_code = extract_code(&raw);
        match execute(corrected_code.clone()).await {
            Ok(value) => {
                self.advance(Attempt::Succeeded);
                Ok(LoopSuccess {
                    value,
                    code: corrected_code,
                    original_code,
                    corrected: true,
                    state: self.state,
                })
            }
            Err(error) => {
                warn!(%error, "corrected code failed as well");
                self.advance(Attempt::Failed);
                Err(LoopFailure {
                    original_code,
                    original_error,
                    corrected_code: Some(corrected_code),
                    cause: FailureCause::Execution(error),
                    state: self.state,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cad_script::ExecutionError;

    use super::{
        Attempt, CorrectionContext, CorrectionLoop, FailureCause, LoopStart, LoopState,
    };
    use crate::fakes::ScriptedModel;
    use crate::model::CompletionOptions;
    use crate::prompt::{PreviewImage, RequestKind};

    /// Accepts any snippet containing "good".
    async fn execute(code: String) -> Result<usize, ExecutionError> {
        if code.contains("good") {
            Ok(code.len())
        } else {
            Err(ExecutionError::at(format!("cannot run {code}"), 1))
        }
    }

    #[test]
    fn transitions_are_one_shot() {
        assert_eq!(LoopState::Initial.next(Attempt::Succeeded), LoopState::Done);
        assert_eq!(LoopState::Initial.next(Attempt::Failed), LoopState::Correcting);
        assert_eq!(LoopState::Correcting.next(Attempt::Succeeded), LoopState::Done);
        assert_eq!(LoopState::Correcting.next(Attempt::Failed), LoopState::Failed);
        assert_eq!(LoopState::Failed.next(Attempt::Succeeded), LoopState::Failed);
        assert!(LoopState::Done.is_terminal());
        assert!(!LoopState::Correcting.is_terminal());
    }

    #[tokio::test]
    async fn working_code_needs_no_model_call() {
        let model = ScriptedModel::default();
        let options = CompletionOptions::default();
        let success = CorrectionLoop::new(&model, &options)
            .run(LoopStart::Generated("good".into()), execute)
            .await
            .unwrap();
        assert_eq!(success.state, LoopState::Done);
        assert!(!success.corrected);
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn failing_code_is_corrected_once() {
        let model = ScriptedModel::new(["```js\ngood code\n```"]);
        let options = CompletionOptions::default();
        let success = CorrectionLoop::new(&model, &options)
            .run(LoopStart::Generated("bad code".into()), execute)
            .await
            .unwrap();
        assert_eq!(success.state, LoopState::Done);
        assert!(success.corrected);
        assert_eq!(success.code, "good code");
        assert_eq!(success.original_code, "bad code");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, RequestKind::ErrorCorrection);
        assert!(requests[0].system.contains("cannot run bad code"));
    }

    #[tokio::test]
    async fn second_failure_is_terminal() {
        let model = ScriptedModel::new(["still bad", "good"]);
        let options = CompletionOptions::default();
        let failure = CorrectionLoop::new(&model, &options)
            .run(LoopStart::Generated("bad".into()), execute)
            .await
            .unwrap_err();
        assert_eq!(failure.state, LoopState::Failed);
        assert_eq!(failure.original_code, "bad");
        assert_eq!(failure.corrected_code.as_deref(), Some("still bad"));
        assert!(failure.original_error.is_some());
        assert!(matches!(failure.cause, FailureCause::Execution(_)));
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_correction_fails_without_snippet() {
        let model = ScriptedModel::new([""]);
        let options = CompletionOptions::default();
        let failure = CorrectionLoop::new(&model, &options)
            .run(LoopStart::Generated("bad".into()), execute)
            .await
            .unwrap_err();
        assert_eq!(failure.state, LoopState::Failed);
        assert!(failure.corrected_code.is_none());
        assert!(matches!(failure.cause, FailureCause::Generation(_)));
    }

    #[tokio::test]
    async fn feedback_starts_in_correcting() {
        let model = ScriptedModel::new(["good and taller"]);
        let options = CompletionOptions::default();
        let context = CorrectionContext::new("good")
            .with_preview(Some(PreviewImage::png(vec![1, 2, 3])));
        let success = CorrectionLoop::new(&model, &options)
            .run(LoopStart::Feedback(context, "make it taller".into()), execute)
            .await
            .unwrap();
        assert_eq!(success.code, "good and taller");
        assert_eq!(success.original_code, "good");

        let requests = model.requests();
        assert_eq!(requests[0].kind, RequestKind::Modification);
        assert_eq!(requests[0].user, "make it taller");
        assert!(requests[0].preview.is_some());
    }

    #[tokio::test]
    async fn failed_feedback_is_not_error_corrected() {
        let model = ScriptedModel::new(["broken", "good"]);
        let options = CompletionOptions::default();
        let failure = CorrectionLoop::new(&model, &options)
            .run(
                LoopStart::Feedback(CorrectionContext::new("good"), "add a hole".into()),
                execute,
            )
            .await
            .unwrap_err();
        assert_eq!(failure.state, LoopState::Failed);
        assert!(failure.original_error.is_none());
        assert_eq!(failure.corrected_code.as_deref(), Some("broken"));
        assert_eq!(model.requests().len(), 1);
    }
}
