//! Presentation commands
//!
//! The controller never touches a display directly. After every change it
//! derives a command list from the state snapshot and hands it to a
//! [`PresentationSink`].

use crate::sanitize::DisplayText;
use crate::store::{Snippet, SnippetId};
use crate::workflow::{Action, StageKind, TestRun, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Description,
    Language,
    Code,
    Tests,
    TestResult,
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Field::Description => "Description",
            Field::Language => "Language",
            Field::Code => "Code",
            Field::Tests => "Tests",
            Field::TestResult => "Test result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetSummary {
    pub id: SnippetId,
    pub label: String,
    /// The snippet currently open in the workflow
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCommand {
    SetText { field: Field, text: DisplayText },
    SetEnabled { action: Action, enabled: bool },
    SetBusy(bool),
    Status(String),
    Error(String),
    SnippetList(Vec<SnippetSummary>),
}

/// Anything that can show workflow state: a terminal, a web view, a test log.
pub trait PresentationSink {
    fn present(&mut self, commands: &[RenderCommand]);
}

/// Sink that keeps every batch it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub batches: Vec<Vec<RenderCommand>>,
}

impl RecordingSink {
    /// Most recent enablement of `action` across all batches
    pub fn enabled(&self, action: Action) -> Option<bool> {
        self.batches.iter().flatten().rev().find_map(|cmd| match cmd {
            RenderCommand::SetEnabled { action: a, enabled } if *a == action => Some(*enabled),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<&str> {
        self.batches
            .iter()
            .flatten()
            .filter_map(|cmd| match cmd {
                RenderCommand::Error(msg) => Some(msg.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl PresentationSink for RecordingSink {
    fn present(&mut self, commands: &[RenderCommand]) {
        self.batches.push(commands.to_vec());
    }
}

/// Full view of `state`. Every control is always set, enabled or not.
pub fn render(state: &WorkflowState, busy: bool) -> Vec<RenderCommand> {
    let text = |field: Field, value: Option<&str>| RenderCommand::SetText {
        field,
        text: DisplayText::new(value.unwrap_or_default()),
    };

    let mut commands = vec![
        RenderCommand::SetBusy(busy),
        text(Field::Description, Some(state.description())),
        text(Field::Language, Some(state.language().id())),
        text(Field::Code, state.code()),
        text(Field::Tests, state.tests()),
        text(Field::TestResult, state.test_output()),
    ];

    for action in Action::ALL {
        commands.push(RenderCommand::SetEnabled {
            action,
            enabled: !busy && state.is_permitted(action),
        });
    }

    commands.push(RenderCommand::Status(status_line(state, busy)));
    commands
}

pub fn render_snippet_list(snippets: &[Snippet], active: Option<&SnippetId>) -> RenderCommand {
    RenderCommand::SnippetList(
        snippets
            .iter()
            .map(|s| SnippetSummary {
                id: s.id.clone(),
                label: s.label(),
                active: Some(&s.id) == active,
            })
            .collect(),
    )
}

fn status_line(state: &WorkflowState, busy: bool) -> String {
    if busy {
        return "Working...".to_string();
    }
    let kind = state.stage_kind();
    let mut line = kind.status_text().to_string();
    if kind == StageKind::TestsFailed && state.last_test_run() == TestRun::Failed {
        line.push_str(" - regenerate available");
    }
    if state.has_generated_tests() && !state.language().supports_remote_execution() {
        line.push_str(&format!(
            " (test execution is Python-only; {} tests can't be run)",
            state.language().name()
        ));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    fn enabled_in(commands: &[RenderCommand], action: Action) -> bool {
        commands
            .iter()
            .find_map(|cmd| match cmd {
                RenderCommand::SetEnabled { action: a, enabled } if *a == action => Some(*enabled),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_empty_state_only_enables_generate() {
        let commands = render(&WorkflowState::default(), false);
        for action in Action::ALL {
            assert_eq!(enabled_in(&commands, action), action == Action::Generate);
        }
    }

    #[test]
    fn test_busy_disables_everything() {
        let commands = render(&WorkflowState::default(), true);
        assert!(Action::ALL.iter().all(|a| !enabled_in(&commands, *a)));
        assert!(commands.contains(&RenderCommand::SetBusy(true)));
        assert!(commands.contains(&RenderCommand::Status("Working...".into())));
    }

    #[test]
    fn test_run_button_disabled_for_javascript() {
        let snippet = Snippet {
            id: SnippetId::new(1),
            description: "sum".into(),
            language: Language::JavaScript,
            code: "const sum = (a, b) => a + b;".into(),
            created_at: None,
        };
        let commands = render(&WorkflowState::from_snippet(&snippet), false);
        assert!(!enabled_in(&commands, Action::RunTests));
        assert!(enabled_in(&commands, Action::GenerateTests));
    }

    #[test]
    fn test_code_text_is_escaped_for_markup() {
        let snippet = Snippet {
            id: SnippetId::new(1),
            description: "cmp".into(),
            language: Language::Python,
            code: "<script>".into(),
            created_at: None,
        };
        let commands = render(&WorkflowState::from_snippet(&snippet), false);
        let code = commands
            .iter()
            .find_map(|cmd| match cmd {
                RenderCommand::SetText {
                    field: Field::Code,
                    text,
                } => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(code.to_markup(), "&lt;script&gt;");
    }

    #[test]
    fn test_snippet_list_marks_active() {
        let snippets = vec![
            Snippet {
                id: SnippetId::new(1),
                description: "a".into(),
                language: Language::Python,
                code: String::new(),
                created_at: None,
            },
            Snippet {
                id: SnippetId::new(2),
                description: "b".into(),
                language: Language::Rust,
                code: String::new(),
                created_at: None,
            },
        ];
        let cmd = render_snippet_list(&snippets, Some(&SnippetId::new(2)));
        match cmd {
            RenderCommand::SnippetList(items) => {
                assert!(!items[0].active);
                assert!(items[1].active);
                assert_eq!(items[1].label, "b | rust");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
