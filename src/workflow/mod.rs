//! Workflow state machine for the generate -> test -> fix loop
//!
//! Tracks progress through: describe -> code -> tests -> run -> regenerate.
//! Everything here is pure; [`WorkflowController`] owns the side effects.

mod controller;

pub use controller::{ActionOutcome, PendingRequest, RequestToken, WorkflowController};

use crate::language::Language;
use crate::remote::{
    CodeResponse, GenerateCodeRequest, GenerateTestsRequest, ImproveCodeRequest,
    ImproveTestsRequest, RegenerateCodeRequest, RegenerateCodeResponse, RemoteCodeService,
    RemoteError, RunTestsRequest, RunTestsResponse, TestsResponse,
};
use crate::sanitize::{sanitize_for_remote, strip_markdown_fences};
use crate::store::{Snippet, SnippetId, StoreError};
use std::fmt;

/// Actions offered to the user at some point of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Generate,
    ImproveCode,
    GenerateTests,
    ImproveTests,
    RunTests,
    Regenerate,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Generate,
        Action::ImproveCode,
        Action::GenerateTests,
        Action::ImproveTests,
        Action::RunTests,
        Action::Regenerate,
    ];

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Action::Generate => "Generate code",
            Action::ImproveCode => "Improve code",
            Action::GenerateTests => "Generate tests",
            Action::ImproveTests => "Improve tests",
            Action::RunTests => "Run tests",
            Action::Regenerate => "Regenerate from test results",
        }
    }

    /// Session command that triggers this action
    pub fn command(&self) -> &'static str {
        match self {
            Action::Generate => "generate",
            Action::ImproveCode => "improve",
            Action::GenerateTests => "tests",
            Action::ImproveTests => "improve-tests",
            Action::RunTests => "run",
            Action::Regenerate => "regenerate",
        }
    }

    /// Actions whose result is committed to the snippet library
    pub fn commits_snippet(&self) -> bool {
        matches!(self, Action::Generate | Action::Regenerate)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Outcome of the most recent test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestRun {
    #[default]
    None,
    Passed,
    Failed,
}

/// Position in the pipeline, carrying the artifacts that exist there.
///
/// Tests only exist alongside code and a run result only alongside tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Empty,
    CodeReady {
        code: String,
    },
    TestsReady {
        code: String,
        tests: String,
    },
    TestsPassed {
        code: String,
        tests: String,
        output: String,
    },
    TestsFailed {
        code: String,
        tests: String,
        output: String,
    },
}

/// Data-free mirror of [`Stage`] for matching and display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Empty,
    CodeReady,
    TestsReady,
    TestsPassed,
    TestsFailed,
}

impl StageKind {
    /// Human-readable status for display
    pub fn status_text(&self) -> &'static str {
        match self {
            StageKind::Empty => "Describe a snippet to generate",
            StageKind::CodeReady => "Code ready",
            StageKind::TestsReady => "Tests ready",
            StageKind::TestsPassed => "All tests passed",
            StageKind::TestsFailed => "Tests failed",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Empty => "empty",
            StageKind::CodeReady => "code ready",
            StageKind::TestsReady => "tests ready",
            StageKind::TestsPassed => "tests passed",
            StageKind::TestsFailed => "tests failed",
        };
        f.write_str(name)
    }
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Empty => StageKind::Empty,
            Stage::CodeReady { .. } => StageKind::CodeReady,
            Stage::TestsReady { .. } => StageKind::TestsReady,
            Stage::TestsPassed { .. } => StageKind::TestsPassed,
            Stage::TestsFailed { .. } => StageKind::TestsFailed,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Stage::Empty => None,
            Stage::CodeReady { code }
            | Stage::TestsReady { code, .. }
            | Stage::TestsPassed { code, .. }
            | Stage::TestsFailed { code, .. } => Some(code),
        }
    }

    pub fn tests(&self) -> Option<&str> {
        match self {
            Stage::Empty | Stage::CodeReady { .. } => None,
            Stage::TestsReady { tests, .. }
            | Stage::TestsPassed { tests, .. }
            | Stage::TestsFailed { tests, .. } => Some(tests),
        }
    }

    pub fn test_output(&self) -> Option<&str> {
        match self {
            Stage::TestsPassed { output, .. } | Stage::TestsFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// User-typed text that accompanies an action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    pub description: String,
    pub feedback: String,
    pub test_feedback: String,
}

impl Inputs {
    pub fn description(text: impl Into<String>) -> Self {
        Self {
            description: text.into(),
            ..Self::default()
        }
    }

    pub fn feedback(text: impl Into<String>) -> Self {
        Self {
            feedback: text.into(),
            ..Self::default()
        }
    }

    pub fn test_feedback(text: impl Into<String>) -> Self {
        Self {
            test_feedback: text.into(),
            ..Self::default()
        }
    }
}

/// Outbound payload for one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    Generate(GenerateCodeRequest),
    ImproveCode(ImproveCodeRequest),
    GenerateTests(GenerateTestsRequest),
    ImproveTests(ImproveTestsRequest),
    RunTests(RunTestsRequest),
    Regenerate(RegenerateCodeRequest),
}

impl RemoteRequest {
    pub fn action(&self) -> Action {
        match self {
            RemoteRequest::Generate(_) => Action::Generate,
            RemoteRequest::ImproveCode(_) => Action::ImproveCode,
            RemoteRequest::GenerateTests(_) => Action::GenerateTests,
            RemoteRequest::ImproveTests(_) => Action::ImproveTests,
            RemoteRequest::RunTests(_) => Action::RunTests,
            RemoteRequest::Regenerate(_) => Action::Regenerate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResponse {
    Code(CodeResponse),
    Tests(TestsResponse),
    TestRun(RunTestsResponse),
    Regenerated(RegenerateCodeResponse),
}

/// Send a prepared request to the matching service operation.
pub async fn execute<S>(service: &S, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>
where
    S: RemoteCodeService + ?Sized,
{
    match request {
        RemoteRequest::Generate(req) => service.generate_code(req).await.map(RemoteResponse::Code),
        RemoteRequest::ImproveCode(req) => {
            service.improve_code(req).await.map(RemoteResponse::Code)
        }
        RemoteRequest::GenerateTests(req) => {
            service.generate_tests(req).await.map(RemoteResponse::Tests)
        }
        RemoteRequest::ImproveTests(req) => {
            service.improve_tests(req).await.map(RemoteResponse::Tests)
        }
        RemoteRequest::RunTests(req) => service.run_tests(req).await.map(RemoteResponse::TestRun),
        RemoteRequest::Regenerate(req) => service
            .regenerate_code(req)
            .await
            .map(RemoteResponse::Regenerated),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("'{action}' is not available while {stage}")]
    InvalidTransition { action: Action, stage: StageKind },
    #[error("running tests is only available for Python snippets (current language: {0})")]
    ExecutionUnsupported(Language),
    #[error("another request is still in flight")]
    Busy,
    #[error("ignoring stale response for request #{0}")]
    StaleResponse(u64),
    #[error("please provide the code snippet description")]
    EmptyDescription,
    #[error("feedback for '{0}' must not be empty")]
    EmptyFeedback(Action),
    #[error("snippet {0} not found")]
    NotFound(SnippetId),
    #[error("response does not match the '{0}' request")]
    UnexpectedResponse(Action),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-session workflow state. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkflowState {
    language: Language,
    description: String,
    stage: Stage,
    /// Snippet currently shown, so regeneration re-saves under its description
    loaded_snippet: Option<SnippetId>,
}

impl WorkflowState {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }

    /// State after opening a saved snippet
    pub fn from_snippet(snippet: &Snippet) -> Self {
        Self {
            language: snippet.language.clone(),
            description: snippet.description.clone(),
            stage: Stage::CodeReady {
                code: snippet.code.clone(),
            },
            loaded_snippet: Some(snippet.id.clone()),
        }
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn stage_kind(&self) -> StageKind {
        self.stage.kind()
    }

    pub fn loaded_snippet(&self) -> Option<&SnippetId> {
        self.loaded_snippet.as_ref()
    }

    pub fn code(&self) -> Option<&str> {
        self.stage.code()
    }

    pub fn tests(&self) -> Option<&str> {
        self.stage.tests()
    }

    pub fn test_output(&self) -> Option<&str> {
        self.stage.test_output()
    }

    pub fn has_generated_code(&self) -> bool {
        self.stage.code().is_some()
    }

    pub fn has_generated_tests(&self) -> bool {
        self.stage.tests().is_some()
    }

    pub fn last_test_run(&self) -> TestRun {
        match self.stage {
            Stage::TestsPassed { .. } => TestRun::Passed,
            Stage::TestsFailed { .. } => TestRun::Failed,
            _ => TestRun::None,
        }
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    pub(crate) fn set_loaded_snippet(&mut self, id: Option<SnippetId>) {
        self.loaded_snippet = id;
    }

    /// Whether `action` may run right now
    pub fn is_permitted(&self, action: Action) -> bool {
        self.check(action).is_ok()
    }

    /// Get available actions for the current state
    pub fn available_actions(&self) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|a| self.is_permitted(*a))
            .collect()
    }

    /// Stage and language gate for `action`
    pub fn check(&self, action: Action) -> Result<(), WorkflowError> {
        let stage = self.stage_kind();
        let legal = match action {
            Action::Generate => true,
            Action::ImproveCode | Action::GenerateTests => stage != StageKind::Empty,
            Action::ImproveTests => matches!(
                stage,
                StageKind::TestsReady | StageKind::TestsPassed | StageKind::TestsFailed
            ),
            Action::RunTests => {
                if !self.language.supports_remote_execution() {
                    return Err(WorkflowError::ExecutionUnsupported(self.language.clone()));
                }
                matches!(
                    stage,
                    StageKind::TestsReady | StageKind::TestsPassed | StageKind::TestsFailed
                )
            }
            Action::Regenerate => stage == StageKind::TestsFailed,
        };
        if legal {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition { action, stage })
        }
    }

    /// Build the outbound payload for `action`.
    ///
    /// User text is sanitized here; code, tests and run output go out as held.
    pub fn prepare(&self, action: Action, inputs: &Inputs) -> Result<RemoteRequest, WorkflowError> {
        self.check(action)?;
        let language = self.language.clone();
        let code = || self.code().unwrap_or_default().to_string();
        let tests = || self.tests().unwrap_or_default().to_string();

        let request = match action {
            Action::Generate => {
                let description = clean_user_text(&inputs.description);
                if description.is_empty() {
                    return Err(WorkflowError::EmptyDescription);
                }
                RemoteRequest::Generate(GenerateCodeRequest {
                    description,
                    language,
                })
            }
            Action::ImproveCode => {
                let feedback = clean_user_text(&inputs.feedback);
                if feedback.is_empty() {
                    return Err(WorkflowError::EmptyFeedback(action));
                }
                RemoteRequest::ImproveCode(ImproveCodeRequest {
                    code: code(),
                    feedback,
                    language,
                })
            }
            Action::GenerateTests => RemoteRequest::GenerateTests(GenerateTestsRequest {
                code: code(),
                language,
            }),
            Action::ImproveTests => {
                let test_feedback = clean_user_text(&inputs.test_feedback);
                if test_feedback.is_empty() {
                    return Err(WorkflowError::EmptyFeedback(action));
                }
                RemoteRequest::ImproveTests(ImproveTestsRequest {
                    code: code(),
                    test_cases: tests(),
                    test_feedback,
                    language,
                })
            }
            Action::RunTests => RemoteRequest::RunTests(RunTestsRequest {
                code: code(),
                test_cases: tests(),
                language,
            }),
            Action::Regenerate => RemoteRequest::Regenerate(RegenerateCodeRequest {
                code: code(),
                feedback: self.test_output().unwrap_or_default().to_string(),
                language,
            }),
        };
        Ok(request)
    }

    /// Next state after `response` arrives for `request`. `self` is untouched.
    pub fn apply(
        &self,
        request: &RemoteRequest,
        response: RemoteResponse,
    ) -> Result<WorkflowState, WorkflowError> {
        let action = request.action();
        self.check(action)?;

        let mut next = self.clone();
        let code = || self.code().unwrap_or_default().to_string();

        let stage = match (request, response) {
            (RemoteRequest::Generate(req), RemoteResponse::Code(resp)) => {
                next.description = req.description.clone();
                next.loaded_snippet = None;
                Stage::CodeReady {
                    code: strip_markdown_fences(&resp.code),
                }
            }
            (RemoteRequest::ImproveCode(_), RemoteResponse::Code(resp)) => Stage::CodeReady {
                code: strip_markdown_fences(&resp.code),
            },
            (
                RemoteRequest::GenerateTests(_) | RemoteRequest::ImproveTests(_),
                RemoteResponse::Tests(resp),
            ) => Stage::TestsReady {
                code: code(),
                tests: strip_markdown_fences(&resp.code_tests),
            },
            (RemoteRequest::RunTests(_), RemoteResponse::TestRun(resp)) => {
                let tests = self.tests().unwrap_or_default().to_string();
                if resp.error {
                    Stage::TestsFailed {
                        code: code(),
                        tests,
                        output: resp.test_result,
                    }
                } else {
                    Stage::TestsPassed {
                        code: code(),
                        tests,
                        output: resp.test_result,
                    }
                }
            }
            (RemoteRequest::Regenerate(_), RemoteResponse::Regenerated(resp)) => Stage::CodeReady {
                code: strip_markdown_fences(&resp.new_code),
            },
            _ => return Err(WorkflowError::UnexpectedResponse(action)),
        };
        next.stage = stage;
        Ok(next)
    }
}

fn clean_user_text(text: &str) -> String {
    sanitize_for_remote(text).trim().to_string()
}
