//! The investigation loop: drives `AgentState` from analyzing to a terminal
//! phase, talking to the reasoning provider and the tool executor.

use super::state::{estimate_tokens, AgentPhase, AgentState, Event, ProposalStatus};
use crate::llm::client::truncate_str;
use crate::llm::prompts::{
    agent_system_prompt, analysis_prompt, invalid_proposal_message, tool_results_message, BUILD_OUTPUT_LIMIT,
    NO_TOOL_CALL_REPROMPT,
};
use crate::llm::{parse_tool_calls, ChatMessage, CompletionRequest, ReasoningClient};
use crate::tools::{parse_proposal, ToolCall, ToolExecutor, ToolName, ToolResult};
use crate::types::{ChangeType, FailureSignature, FileChange};
use futures::future::join_all;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Lines of context read around the failing line during the initial investigation.
const SEED_READ_WINDOW: u32 = 40;

pub(crate) struct AgentRunner<'a> {
    client: &'a ReasoningClient,
    executor: &'a ToolExecutor,
    cancel: CancellationToken,
}

impl<'a> AgentRunner<'a> {
    pub(crate) fn new(client: &'a ReasoningClient, executor: &'a ToolExecutor, cancel: CancellationToken) -> Self {
        Self {
            client,
            executor,
            cancel,
        }
    }

    /// Run until the state reaches `Complete` or `Failed`.
    pub(crate) async fn run(
        &self,
        signature: &FailureSignature,
        project_context: Option<&str>,
        mut state: AgentState,
    ) -> AgentState {
        let system = agent_system_prompt();

        loop {
            if self.cancel.is_cancelled() {
                state.apply(Event::Cancelled);
            }
            match state.phase() {
                AgentPhase::Analyzing => {
                    state.push_message(ChatMessage::user(analysis_prompt(signature, project_context)));
                    state.apply(Event::Seeded);
                }
                AgentPhase::Investigating => self.investigate(&mut state, signature).await,
                AgentPhase::Reasoning => self.reason(&mut state, &system).await,
                AgentPhase::ExecutingTools => self.execute_pending(&mut state).await,
                AgentPhase::Fixing => {
                    let changes = FileChange::from_planned(state.planned_fixes());
                    state.set_applied_changes(changes);
                    state.apply(Event::FixesPlanned);
                }
                AgentPhase::Verifying => {
                    self.verify(&mut state);
                    state.apply(Event::Verified);
                }
                AgentPhase::Complete | AgentPhase::Failed => break,
            }
        }

        tracing::info!(
            phase = %state.phase(),
            iterations = state.iteration(),
            tokens = state.token_usage(),
            tools = state.investigation_results().len(),
            "agent run finished"
        );
        state
    }

    /// Await `future` unless the run is cancelled first.
    async fn cancellable<T>(&self, future: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = future => Some(out),
        }
    }

    /// Gather evidence every investigation needs before the first reasoning turn.
    async fn investigate(&self, state: &mut AgentState, signature: &FailureSignature) {
        let seeds = seed_calls(signature);
        let Some(results) = self.cancellable(self.execute_all(&seeds)).await else {
            state.apply(Event::Cancelled);
            return;
        };

        let pairs = self.record(state, seeds, results);
        if !pairs.is_empty() {
            state.push_message(ChatMessage::user(format!(
                "Initial evidence gathered automatically:\n\n{}",
                tool_results_message(&pairs)
            )));
        }
        state.apply(Event::EvidenceGathered);
    }

    async fn reason(&self, state: &mut AgentState, system: &str) {
        let request = CompletionRequest {
            system: system.to_string(),
            messages: state.messages().to_vec(),
            max_tokens: self.client.max_tokens(),
        };

        let completion = match self.cancellable(self.client.complete(&request)).await {
            None => {
                state.apply(Event::Cancelled);
                return;
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, iteration = state.iteration(), "reasoning request failed");
                state.apply(Event::ProviderFailed(err.to_string()));
                return;
            }
            Some(Ok(completion)) => completion,
        };

        let tokens = completion
            .usage
            .map(|u| u.total())
            .filter(|t| *t > 0)
            .unwrap_or_else(|| estimate_tokens(request.prompt_chars() + completion.content.chars().count()));
        state.add_tokens(tokens);
        state.push_message(ChatMessage::assistant(completion.content.as_str()));

        let calls = parse_tool_calls(&completion.content);
        tracing::debug!(
            iteration = state.iteration(),
            tokens,
            calls = calls.len(),
            "reasoning reply parsed"
        );

        let has_tool_calls = calls.iter().any(|c| !c.is_proposal());
        if has_tool_calls {
            // A proposal riding along is validated with the other calls.
            state.set_pending(calls);
            state.apply(Event::Responded {
                has_tool_calls,
                proposal: ProposalStatus::Absent,
            });
            return;
        }

        let proposal = match calls.into_iter().next() {
            None => {
                state.push_message(ChatMessage::user(NO_TOOL_CALL_REPROMPT));
                ProposalStatus::Absent
            }
            Some(call) => {
                let result = self.executor.execute(&call).await;
                state.record_investigation(&call, &result);
                match parse_proposal(&call.arguments) {
                    Ok(proposal) => {
                        state.accept_proposal(proposal);
                        ProposalStatus::Valid
                    }
                    Err(reason) => {
                        state.push_message(ChatMessage::user(invalid_proposal_message(&reason)));
                        ProposalStatus::Invalid
                    }
                }
            }
        };
        state.set_pending(Vec::new());
        state.apply(Event::Responded {
            has_tool_calls: false,
            proposal,
        });
    }

    async fn execute_pending(&self, state: &mut AgentState) {
        let calls = state.pending_tool_calls().to_vec();
        let Some(results) = self.cancellable(self.execute_all(&calls)).await else {
            state.apply(Event::Cancelled);
            return;
        };

        let pairs = self.record(state, calls, results);
        let mut proposal_accepted = false;
        for (call, result) in &pairs {
            if proposal_accepted || !call.is_proposal() || !result.success {
                continue;
            }
            if let Ok(proposal) = parse_proposal(&call.arguments) {
                state.accept_proposal(proposal);
                proposal_accepted = true;
            }
        }

        state.push_message(ChatMessage::user(tool_results_message(&pairs)));
        state.apply(Event::ToolsExecuted { proposal_accepted });
    }

    /// Execute calls concurrently; results come back in call order.
    async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.executor.execute(call))).await
    }

    /// Log each execution and remember file reads.
    fn record(
        &self,
        state: &mut AgentState,
        calls: Vec<ToolCall>,
        results: Vec<ToolResult>,
    ) -> Vec<(ToolCall, ToolResult)> {
        let pairs: Vec<(ToolCall, ToolResult)> = calls.into_iter().zip(results).collect();
        for (call, result) in &pairs {
            state.record_investigation(call, result);
            if result.success && call.name == ToolName::ReadFile.as_str() {
                if let Some(path) = call.arguments.get("path").and_then(|p| p.as_str()) {
                    state.record_file_read(path, result.result.as_str());
                }
            }
        }
        pairs
    }

    /// Dry-run the planned edits against the files on disk.
    ///
    /// Mismatches become suggestions for the user; they never block completion.
    fn verify(&self, state: &mut AgentState) {
        let mut notes = Vec::new();
        for change in state.applied_changes() {
            let current = self.executor.read_raw(&change.file);
            match (change.change_type, current) {
                (ChangeType::Create, Ok(_)) => {
                    notes.push(format!("{} already exists and would be overwritten", change.file));
                }
                (ChangeType::Create, Err(_)) => {}
                (ChangeType::Delete, Err(_)) => {
                    notes.push(format!("{} is marked for deletion but does not exist", change.file));
                }
                (ChangeType::Delete, Ok(_)) => {}
                (ChangeType::Modify, Err(err)) => {
                    if change.content.is_none() {
                        notes.push(format!("Cannot verify edits to {}: {}", change.file, err));
                    }
                }
                (ChangeType::Modify, Ok(mut working)) => {
                    for edit in &change.edits {
                        let hits = working.matches(edit.search.as_str()).count();
                        if hits == 0 {
                            notes.push(format!(
                                "Search text not found in {}: \"{}\"",
                                change.file,
                                truncate_str(edit.search.trim(), 80)
                            ));
                            continue;
                        }
                        if hits > 1 {
                            notes.push(format!(
                                "Search text matches {} places in {}; only the first is replaced",
                                hits, change.file
                            ));
                        }
                        working = working.replacen(edit.search.as_str(), &edit.replace, 1);
                    }
                }
            }
        }
        for note in notes {
            tracing::info!(note = %note, "verification note");
            state.add_suggestion(note);
        }
    }
}

/// Tool calls run before the first reasoning turn.
fn seed_calls(signature: &FailureSignature) -> Vec<ToolCall> {
    let mut calls = vec![ToolCall::new(
        "seed_1",
        ToolName::AnalyzeRuntimeError.as_str(),
        serde_json::json!({
            "errorMessage": signature.message,
            "stackTrace": truncate_str(&signature.raw_output, BUILD_OUTPUT_LIMIT),
        }),
    )];

    if let Some(file) = signature.file.as_deref().filter(|f| !f.trim().is_empty()) {
        let mut args = serde_json::json!({ "path": file });
        if let Some(line) = signature.line {
            let start = line.saturating_sub(SEED_READ_WINDOW / 2).max(1);
            args["startLine"] = serde_json::json!(start);
            args["endLine"] = serde_json::json!(line.saturating_add(SEED_READ_WINDOW / 2));
        }
        calls.push(ToolCall::new("seed_2", ToolName::ReadFile.as_str(), args));
    }
    calls
}
