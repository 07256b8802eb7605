//! Line parser for the interactive session

use crate::language::{Language, UnknownLanguage};
use crate::store::SnippetId;
use crate::workflow::{Action, Inputs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Language(Language),
    Run { action: Action, inputs: Inputs },
    Load(SnippetId),
    New,
    Delete(SnippetId),
    List,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command '{0}' (type 'help' for a list)")]
    Unknown(String),
    #[error("usage: {0}")]
    MissingArgument(&'static str),
    #[error(transparent)]
    Language(#[from] UnknownLanguage),
}

pub const HELP: &str = "\
Commands:
  lang <name>             select the target language
  generate <description>  generate code from a description
  improve <feedback>      rework the current code
  tests                   generate tests for the current code
  improve-tests <text>    rework the current tests
  run                     run the tests (Python only)
  regenerate              rewrite the code from the failing test output
  load <id>               open a saved snippet
  new                     clear the editor
  delete <id>             delete a saved snippet
  list                    show saved snippets
  status                  show the current state
  help                    show this help
  quit                    leave the session";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let action = |action: Action, inputs: Inputs| -> Result<Option<ReplCommand>, ParseError> {
        Ok(Some(ReplCommand::Run { action, inputs }))
    };

    match word.to_lowercase().as_str() {
        "lang" | "language" => {
            let name = required(rest, "lang <name>")?;
            Ok(Some(ReplCommand::Language(name.parse()?)))
        }
        "generate" | "gen" => action(
            Action::Generate,
            Inputs::description(required(rest, "generate <description>")?),
        ),
        "improve" => action(
            Action::ImproveCode,
            Inputs::feedback(required(rest, "improve <feedback>")?),
        ),
        "tests" => action(Action::GenerateTests, Inputs::default()),
        "improve-tests" => action(
            Action::ImproveTests,
            Inputs::test_feedback(required(rest, "improve-tests <feedback>")?),
        ),
        "run" => action(Action::RunTests, Inputs::default()),
        "regenerate" | "regen" => action(Action::Regenerate, Inputs::default()),
        "load" | "open" => Ok(Some(ReplCommand::Load(snippet_id(rest, "load <id>")?))),
        "new" => Ok(Some(ReplCommand::New)),
        "delete" | "rm" => Ok(Some(ReplCommand::Delete(snippet_id(rest, "delete <id>")?))),
        "list" | "ls" => Ok(Some(ReplCommand::List)),
        "status" => Ok(Some(ReplCommand::Status)),
        "help" | "?" => Ok(Some(ReplCommand::Help)),
        "quit" | "exit" | "q" => Ok(Some(ReplCommand::Quit)),
        _ => Err(ParseError::Unknown(word.to_string())),
    }
}

fn required<'a>(rest: &'a str, usage: &'static str) -> Result<&'a str, ParseError> {
    if rest.is_empty() {
        Err(ParseError::MissingArgument(usage))
    } else {
        Ok(rest)
    }
}

fn snippet_id(rest: &str, usage: &'static str) -> Result<SnippetId, ParseError> {
    required(rest, usage)?
        .parse()
        .map_err(|_| ParseError::MissingArgument(usage))
}
