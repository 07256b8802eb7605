//! Side-effecting half of the workflow: one in-flight request at a time,
//! persistence of committed code versions, and re-rendering after each change.

use super::{
    execute, Action, Inputs, RemoteRequest, RemoteResponse, StageKind, WorkflowError,
    WorkflowState,
};
use crate::language::Language;
use crate::remote::{RemoteCodeService, RemoteError};
use crate::store::{Snippet, SnippetId, SnippetStore};
use crate::view::{render, render_snippet_list, PresentationSink, RenderCommand};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Identifies one outbound request. Only the outstanding token is accepted back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub token: RequestToken,
    pub request: RemoteRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: Action,
    pub stage: StageKind,
    /// Id of the snippet persisted by this action, if it commits one
    pub saved: Option<SnippetId>,
}

pub struct WorkflowController<S, P> {
    service: S,
    store: SnippetStore,
    sink: P,
    state: WorkflowState,
    in_flight: Option<PendingRequest>,
    next_token: u64,
}

impl<S, P> WorkflowController<S, P>
where
    S: RemoteCodeService,
    P: PresentationSink,
{
    pub fn new(service: S, store: SnippetStore, sink: P, language: Language) -> Self {
        Self {
            service,
            store,
            sink,
            state: WorkflowState::new(language),
            in_flight: None,
            next_token: 1,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn store(&self) -> &SnippetStore {
        &self.store
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut P {
        &mut self.sink
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Push a full view of the current state to the sink.
    pub fn refresh(&mut self) {
        let commands = render(&self.state, self.is_busy());
        self.sink.present(&commands);
    }

    /// Run `action` end to end: validate, call the service, apply the result.
    pub async fn dispatch(
        &mut self,
        action: Action,
        inputs: &Inputs,
    ) -> Result<ActionOutcome, WorkflowError> {
        let pending = self.begin(action, inputs)?;
        let result = execute(&self.service, &pending.request).await;
        self.complete(pending.token, result)
    }

    /// Validate `action` and mark the controller busy.
    ///
    /// No state changes until [`complete`](Self::complete) is called with the
    /// returned token.
    #[instrument(skip(self, inputs), fields(stage = %self.state.stage_kind()))]
    pub fn begin(
        &mut self,
        action: Action,
        inputs: &Inputs,
    ) -> Result<PendingRequest, WorkflowError> {
        self.ensure_idle()?;
        let request = match self.state.prepare(action, inputs) {
            Ok(request) => request,
            Err(err) => return Err(self.fail(err)),
        };

        let token = RequestToken(self.next_token);
        self.next_token += 1;
        let pending = PendingRequest { token, request };
        self.in_flight = Some(pending.clone());
        debug!(%token, "request issued");
        self.refresh();
        Ok(pending)
    }

    /// Apply the service's answer to the outstanding request.
    #[instrument(skip(self, result))]
    pub fn complete(
        &mut self,
        token: RequestToken,
        result: Result<RemoteResponse, RemoteError>,
    ) -> Result<ActionOutcome, WorkflowError> {
        let pending = match self.in_flight.take() {
            Some(pending) if pending.token == token => pending,
            other => {
                self.in_flight = other;
                warn!(%token, "discarding response for a request that is not outstanding");
                return Err(WorkflowError::StaleResponse(token.get()));
            }
        };
        let action = pending.request.action();

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(%action, error = %err, "remote call failed; state unchanged");
                self.refresh();
                return Err(self.fail(err.into()));
            }
        };

        let next = match self.state.apply(&pending.request, response) {
            Ok(next) => next,
            Err(err) => {
                self.refresh();
                return Err(self.fail(err));
            }
        };
        let from = self.state.stage_kind();
        self.state = next;
        info!(%action, %from, to = %self.state.stage_kind(), "stage transition");

        let saved = if action.commits_snippet() {
            match self.commit() {
                Ok(id) => Some(id),
                Err(err) => {
                    self.refresh();
                    return Err(self.fail(err));
                }
            }
        } else {
            None
        };

        self.refresh();
        if saved.is_some() {
            self.show_snippets();
        }
        Ok(ActionOutcome {
            action,
            stage: self.state.stage_kind(),
            saved,
        })
    }

    /// Open a saved snippet in the editor at the code-ready stage.
    pub fn load_snippet(&mut self, id: &SnippetId) -> Result<(), WorkflowError> {
        self.ensure_idle()?;
        let snippet = match self.store.find(id) {
            Ok(Some(snippet)) => snippet,
            Ok(None) => {
                warn!(%id, "load of unknown snippet ignored");
                return Err(self.fail(WorkflowError::NotFound(id.clone())));
            }
            Err(err) => return Err(self.fail(err.into())),
        };
        self.state = WorkflowState::from_snippet(&snippet);
        debug!(%id, "snippet loaded");
        self.refresh();
        Ok(())
    }

    /// Clear the editor, keeping the selected language.
    pub fn new_snippet(&mut self) -> Result<(), WorkflowError> {
        self.ensure_idle()?;
        self.state = WorkflowState::new(self.state.language().clone());
        self.refresh();
        Ok(())
    }

    /// Delete a saved snippet. Returns whether anything was removed.
    pub fn delete_snippet(&mut self, id: &SnippetId) -> Result<bool, WorkflowError> {
        self.ensure_idle()?;
        let removed = match self.store.delete(id) {
            Ok(removed) => removed,
            Err(err) => return Err(self.fail(err.into())),
        };
        if !removed {
            warn!(%id, "delete of unknown snippet ignored");
            return Ok(false);
        }
        if self.state.loaded_snippet() == Some(id) {
            self.state = WorkflowState::new(Language::Python);
            self.refresh();
        }
        self.show_snippets();
        Ok(true)
    }

    pub fn set_language(&mut self, language: Language) -> Result<(), WorkflowError> {
        self.ensure_idle()?;
        debug!(%language, "language selected");
        self.state.set_language(language);
        self.refresh();
        Ok(())
    }

    /// Saved snippets in creation order. Also sent to the sink as a list.
    pub fn snippets(&mut self) -> Result<Vec<Snippet>, WorkflowError> {
        match self.store.list() {
            Ok(snippets) => {
                let list = render_snippet_list(&snippets, self.state.loaded_snippet());
                self.sink.present(&[list]);
                Ok(snippets)
            }
            Err(err) => Err(self.fail(err.into())),
        }
    }

    fn commit(&mut self) -> Result<SnippetId, WorkflowError> {
        let code = self.state.code().unwrap_or_default();
        let id = self
            .store
            .save(self.state.description(), self.state.language(), code)?;
        self.state.set_loaded_snippet(Some(id.clone()));
        Ok(id)
    }

    fn show_snippets(&mut self) {
        // A list failure was already reported to the sink.
        let _ = self.snippets();
    }

    fn ensure_idle(&mut self) -> Result<(), WorkflowError> {
        match self.in_flight.as_ref().map(|pending| pending.token) {
            Some(token) => {
                debug!(%token, "rejected while busy");
                Err(self.fail(WorkflowError::Busy))
            }
            None => Ok(()),
        }
    }

    /// Report `err` to the sink and hand it back for returning.
    fn fail(&mut self, err: WorkflowError) -> WorkflowError {
        self.sink.present(&[RenderCommand::Error(err.to_string())]);
        err
    }
}
