//! Plain-text sink for the interactive session
//!
//! Only fields whose text changed since the previous batch are printed.

use crate::view::{Field, PresentationSink, RenderCommand};
use crate::workflow::Action;
use std::collections::HashMap;
use std::io::Write;

pub struct TerminalSink<W: Write> {
    out: W,
    shown: HashMap<Field, String>,
    enabled: Vec<Action>,
    last_status: String,
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: HashMap::new(),
            enabled: Vec::new(),
            last_status: String::new(),
        }
    }

    /// Actions enabled by the most recent render
    pub fn enabled(&self) -> &[Action] {
        &self.enabled
    }

    pub fn status(&self) -> &str {
        &self.last_status
    }

    /// Print the current status and the commands available right now.
    pub fn print_status(&mut self) {
        let available = if self.enabled.is_empty() {
            "none".to_string()
        } else {
            self.enabled
                .iter()
                .map(|a| a.command())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = writeln!(self.out, "status: {}", self.last_status);
        let _ = writeln!(self.out, "available: {available}");
    }

    pub fn print(&mut self, text: &str) {
        let _ = writeln!(self.out, "{text}");
    }

    pub fn prompt(&mut self) {
        let _ = write!(self.out, "codeloop> ");
        let _ = self.out.flush();
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PresentationSink for TerminalSink<W> {
    fn present(&mut self, commands: &[RenderCommand]) {
        let mut enabled = Vec::new();
        let mut saw_enablement = false;

        for command in commands {
            match command {
                RenderCommand::SetText { field, text } => {
                    let text = for_terminal(text.as_plain());
                    if self.shown.get(field) == Some(&text) {
                        continue;
                    }
                    if matches!(field, Field::Code | Field::Tests | Field::TestResult)
                        && !text.is_empty()
                    {
                        let _ = writeln!(self.out, "--- {} ---", field.label());
                        let _ = writeln!(self.out, "{text}");
                    }
                    self.shown.insert(*field, text);
                }
                RenderCommand::SetEnabled { action, enabled: on } => {
                    saw_enablement = true;
                    if *on {
                        enabled.push(*action);
                    }
                }
                RenderCommand::SetBusy(true) => {
                    let _ = writeln!(self.out, "working...");
                }
                RenderCommand::SetBusy(false) => {}
                RenderCommand::Status(status) => self.last_status = status.clone(),
                RenderCommand::Error(message) => {
                    let _ = writeln!(self.out, "error: {}", for_terminal(message));
                }
                RenderCommand::SnippetList(items) => {
                    if items.is_empty() {
                        let _ = writeln!(self.out, "no saved snippets");
                    }
                    for item in items {
                        let marker = if item.active { '*' } else { ' ' };
                        let _ = writeln!(
                            self.out,
                            "{marker} {:>14}  {}",
                            item.id,
                            for_terminal(&item.label)
                        );
                    }
                }
            }
        }

        if saw_enablement {
            self.enabled = enabled;
        }
        let _ = self.out.flush();
    }
}

/// Drop control characters so service output can't drive the terminal.
fn for_terminal(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::DisplayText;

    fn output(sink: TerminalSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_unchanged_fields_are_not_reprinted() {
        let mut sink = TerminalSink::new(Vec::new());
        let batch = [RenderCommand::SetText {
            field: Field::Code,
            text: DisplayText::new("print(1)"),
        }];
        sink.present(&batch);
        sink.present(&batch);
        assert_eq!(output(sink).matches("print(1)").count(), 1);
    }

    #[test]
    fn test_tracks_enabled_actions() {
        let mut sink = TerminalSink::new(Vec::new());
        sink.present(&[
            RenderCommand::SetEnabled {
                action: Action::Generate,
                enabled: true,
            },
            RenderCommand::SetEnabled {
                action: Action::RunTests,
                enabled: false,
            },
            RenderCommand::Status("Code ready".into()),
        ]);
        assert_eq!(sink.enabled(), &[Action::Generate]);
        assert_eq!(sink.status(), "Code ready");

        // Batches without enablement keep the previous set.
        sink.present(&[RenderCommand::Error("boom".into())]);
        assert_eq!(sink.enabled(), &[Action::Generate]);
        assert!(output(sink).contains("error: boom"));
    }

    #[test]
    fn test_escape_sequences_are_stripped() {
        let mut sink = TerminalSink::new(Vec::new());
        sink.present(&[RenderCommand::SetText {
            field: Field::TestResult,
            text: DisplayText::new("\u{1b}[2Jok\n\tdone"),
        }]);
        let out = output(sink);
        assert!(!out.contains('\u{1b}'));
        assert!(out.contains("[2Jok\n\tdone"));
    }
}
