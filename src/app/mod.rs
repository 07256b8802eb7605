//! Interactive session: reads commands line by line and drives the controller

pub mod input;
pub mod terminal;

pub use input::{parse_command, ParseError, ReplCommand, HELP};
pub use terminal::TerminalSink;

use crate::config::Config;
use crate::remote::{HttpCodeService, RemoteCodeService};
use crate::store::SnippetStore;
use crate::workflow::WorkflowController;
use anyhow::{Context, Result};
use std::io::{Stdout, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

pub type SessionController<W> = WorkflowController<HttpCodeService, TerminalSink<W>>;

/// Wire the HTTP service, the snippet library and a stdout sink from `config`.
pub fn session_controller(config: &Config) -> Result<SessionController<Stdout>> {
    let options = config.http_options(config.service_token());
    let service = HttpCodeService::new(&config.service_url, options)
        .context("Failed to set up the code service client")?;
    let store_path = config
        .store_path()
        .context("Failed to locate the snippet library")?;
    debug!(path = %store_path.display(), url = %service.base_url(), "session wired");
    Ok(WorkflowController::new(
        service,
        SnippetStore::open(store_path),
        TerminalSink::new(std::io::stdout()),
        config.default_language.clone(),
    ))
}

/// Run the command loop until `quit` or end of input.
pub async fn run_session<S, R, W>(
    ctl: &mut WorkflowController<S, TerminalSink<W>>,
    input: R,
) -> Result<()>
where
    S: RemoteCodeService,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    ctl.refresh();
    ctl.sink_mut().print_status();
    let mut lines = input.lines();

    loop {
        ctl.sink_mut().prompt();
        let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read from input")?
        else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                ctl.sink_mut().print(&format!("error: {err}"));
                continue;
            }
        };

        // Failures were already shown through the sink.
        let handled = match command {
            ReplCommand::Quit => break,
            ReplCommand::Help => {
                ctl.sink_mut().print(HELP);
                Ok(())
            }
            ReplCommand::Status => {
                ctl.sink_mut().print_status();
                Ok(())
            }
            ReplCommand::Language(language) => ctl.set_language(language),
            ReplCommand::Run { action, inputs } => {
                if let Err(err) = ctl.state().check(action) {
                    ctl.sink_mut()
                        .print(&format!("'{}' is unavailable: {err}", action.command()));
                    continue;
                }
                match ctl.dispatch(action, &inputs).await {
                    Ok(outcome) => {
                        if let Some(id) = outcome.saved {
                            ctl.sink_mut().print(&format!("saved snippet {id}"));
                        }
                        ctl.sink_mut().print_status();
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            ReplCommand::Load(id) => ctl.load_snippet(&id),
            ReplCommand::New => ctl.new_snippet(),
            ReplCommand::Delete(id) => match ctl.delete_snippet(&id) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    ctl.sink_mut().print(&format!("no snippet with id {id}"));
                    Ok(())
                }
                Err(err) => Err(err),
            },
            ReplCommand::List => ctl.snippets().map(|_| ()),
        };
        if let Err(err) = handled {
            debug!(error = %err, "command failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::remote::{
        CodeResponse, GenerateCodeRequest, GenerateTestsRequest, ImproveCodeRequest,
        ImproveTestsRequest, RegenerateCodeRequest, RegenerateCodeResponse, RemoteError,
        RunTestsRequest, RunTestsResponse, TestsResponse,
    };
    use crate::workflow::{Action, WorkflowState};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Tests fail until the code has been regenerated.
    struct FlakyFixService;

    #[async_trait]
    impl RemoteCodeService for FlakyFixService {
        async fn generate_code(
            &self,
            req: &GenerateCodeRequest,
        ) -> Result<CodeResponse, RemoteError> {
            Ok(CodeResponse {
                code: format!("def main():  # {}\n    pass", req.description),
            })
        }

        async fn improve_code(
            &self,
            req: &ImproveCodeRequest,
        ) -> Result<CodeResponse, RemoteError> {
            Ok(CodeResponse {
                code: req.code.clone(),
            })
        }

        async fn generate_tests(
            &self,
            _req: &GenerateTestsRequest,
        ) -> Result<TestsResponse, RemoteError> {
            Ok(TestsResponse {
                code_tests: "assert main() == 1".into(),
            })
        }

        async fn improve_tests(
            &self,
            req: &ImproveTestsRequest,
        ) -> Result<TestsResponse, RemoteError> {
            Ok(TestsResponse {
                code_tests: req.test_cases.clone(),
            })
        }

        async fn run_tests(&self, req: &RunTestsRequest) -> Result<RunTestsResponse, RemoteError> {
            let failing = req.code.contains("pass");
            Ok(RunTestsResponse {
                test_result: if failing {
                    "AssertionError: None != 1".into()
                } else {
                    "All tests passed successfully.".into()
                },
                error: failing,
            })
        }

        async fn regenerate_code(
            &self,
            _req: &RegenerateCodeRequest,
        ) -> Result<RegenerateCodeResponse, RemoteError> {
            Ok(RegenerateCodeResponse {
                new_code: "def main():\n    return 1".into(),
            })
        }
    }

    async fn run_script(
        language: Language,
        script: &str,
    ) -> (TempDir, WorkflowController<FlakyFixService, TerminalSink<Vec<u8>>>) {
        let dir = TempDir::new().unwrap();
        let mut ctl = WorkflowController::new(
            FlakyFixService,
            SnippetStore::open(dir.path().join("snippets.json")),
            TerminalSink::new(Vec::new()),
            language,
        );
        run_session(&mut ctl, script.as_bytes()).await.unwrap();
        (dir, ctl)
    }

    #[tokio::test]
    async fn test_session_runs_fix_loop() {
        let script = "generate sort a list\ntests\nrun\nregenerate\ntests\nrun\nquit\nlist\n";
        let (_dir, ctl) = run_script(Language::Python, script).await;

        assert_eq!(ctl.store().list().unwrap().len(), 2);
        assert_eq!(ctl.state().test_output(), Some("All tests passed successfully."));
        assert!(!ctl.sink().enabled().contains(&Action::Regenerate));
        assert!(ctl.sink().enabled().contains(&Action::RunTests));
    }

    #[tokio::test]
    async fn test_session_reports_unavailable_actions() {
        let (_dir, ctl) = run_script(Language::JavaScript, "run\ngenerate add\ntests\nrun\n").await;
        assert_eq!(ctl.state().tests(), Some("assert main() == 1"));
        assert!(ctl.state().test_output().is_none());
    }

    #[tokio::test]
    async fn test_session_survives_bad_input() {
        let script = "frobnicate\nload 42\nlang cobol\n\nhelp\n";
        let (_dir, ctl) = run_script(Language::Python, script).await;
        assert_eq!(ctl.state(), &WorkflowState::new(Language::Python));
    }
}
