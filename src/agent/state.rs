//! Agent working memory and the phase transition function.
//!
//! `transition` is pure: it looks at the current phase, the budgets and the
//! event, and names the next phase. `AgentState::apply` is the only place the
//! phase changes, and every reducer is a no-op once the phase is terminal.

use crate::llm::ChatMessage;
use crate::tools::{Proposal, ToolCall, ToolResult};
use crate::types::{FileChange, FixResult, PlannedFix};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Suggestions attached to every failed run.
pub const FAILURE_SUGGESTIONS: [&str; 3] = [
    "Review the investigation log to see which evidence was gathered before the run stopped",
    "Inspect the affected files manually and compare them with the pre-migration version",
    "Consult the target framework's migration guide for this error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentPhase {
    Analyzing,
    Investigating,
    Reasoning,
    ExecutingTools,
    Fixing,
    Verifying,
    Complete,
    Failed,
}

impl AgentPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentPhase::Complete | AgentPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPhase::Analyzing => "analyzing",
            AgentPhase::Investigating => "investigating",
            AgentPhase::Reasoning => "reasoning",
            AgentPhase::ExecutingTools => "executing-tools",
            AgentPhase::Fixing => "fixing",
            AgentPhase::Verifying => "verifying",
            AgentPhase::Complete => "complete",
            AgentPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a reasoning reply carried a usable `proposeChanges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    Absent,
    Valid,
    Invalid,
}

/// Something that happened during the current phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The conversation was seeded with the system and analysis prompts.
    Seeded,
    /// Initial evidence was gathered.
    EvidenceGathered,
    /// A reasoning reply was parsed.
    Responded {
        /// Calls other than `proposeChanges` were found.
        has_tool_calls: bool,
        proposal: ProposalStatus,
    },
    ToolsExecuted { proposal_accepted: bool },
    FixesPlanned,
    Verified,
    ProviderFailed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum FailureReason {
    IterationBudget { limit: u32 },
    TokenBudget { used: u64, limit: u64 },
    Provider(String),
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::IterationBudget { limit } => {
                write!(f, "reached the limit of {} reasoning iterations without a validated fix", limit)
            }
            FailureReason::TokenBudget { used, limit } => {
                write!(f, "used {} of {} budgeted tokens without a validated fix", used, limit)
            }
            FailureReason::Provider(msg) => write!(f, "the reasoning provider failed: {}", msg),
            FailureReason::Cancelled => f.write_str("the run was cancelled"),
        }
    }
}

/// One tool execution, as recorded in the investigation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestigationEntry {
    pub tool: String,
    pub query: serde_json::Value,
    pub result: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl InvestigationEntry {
    pub fn new(call: &ToolCall, result: &ToolResult) -> Self {
        Self {
            tool: call.name.clone(),
            query: call.arguments.clone(),
            result: result.result.clone(),
            success: result.success,
            timestamp: Utc::now(),
        }
    }
}

/// The phase the state should move to after `event`.
pub fn transition(state: &AgentState, event: &Event) -> AgentPhase {
    use AgentPhase::*;

    if state.phase.is_terminal() {
        return state.phase;
    }

    match (state.phase, event) {
        (_, Event::ProviderFailed(_)) | (_, Event::Cancelled) => Failed,
        (Analyzing, Event::Seeded) => guarded(state, Investigating),
        (Investigating, Event::EvidenceGathered) => guarded(state, Reasoning),
        (Reasoning, Event::Responded { has_tool_calls: true, .. }) => ExecutingTools,
        (
            Reasoning,
            Event::Responded {
                has_tool_calls: false,
                proposal: ProposalStatus::Valid,
            },
        ) => Fixing,
        (Reasoning, Event::Responded { .. }) => guarded(state, Reasoning),
        (ExecutingTools, Event::ToolsExecuted { proposal_accepted: true }) => Fixing,
        (ExecutingTools, Event::ToolsExecuted { proposal_accepted: false }) => guarded(state, Reasoning),
        (Fixing, Event::FixesPlanned) => Verifying,
        (Verifying, Event::Verified) => Complete,
        (phase, _) => phase,
    }
}

/// `target` unless the budget is already spent, in which case `Failed`.
fn guarded(state: &AgentState, target: AgentPhase) -> AgentPhase {
    if state.budget_exhaustion().is_some() {
        AgentPhase::Failed
    } else {
        target
    }
}

/// `ceil(chars / 4)`: the usage estimate when the provider reports none.
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(4)
}

/// Working memory of one agent run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    phase: AgentPhase,
    iteration: u32,
    iteration_budget: u32,
    token_usage: u64,
    token_budget: u64,
    investigation_results: Vec<InvestigationEntry>,
    files_read: BTreeMap<String, String>,
    pending_tool_calls: Vec<ToolCall>,
    planned_fixes: Vec<PlannedFix>,
    applied_changes: Vec<FileChange>,
    messages: Vec<ChatMessage>,
    success: bool,
    confidence: f64,
    reasoning: String,
    suggestions_for_user: Vec<String>,
    failure: Option<FailureReason>,
}

impl AgentState {
    pub fn new(iteration_budget: u32, token_budget: u64) -> Self {
        Self {
            phase: AgentPhase::Analyzing,
            iteration: 0,
            iteration_budget,
            token_usage: 0,
            token_budget,
            investigation_results: Vec::new(),
            files_read: BTreeMap::new(),
            pending_tool_calls: Vec::new(),
            planned_fixes: Vec::new(),
            applied_changes: Vec::new(),
            messages: Vec::new(),
            success: false,
            confidence: 0.0,
            reasoning: String::new(),
            suggestions_for_user: Vec::new(),
            failure: None,
        }
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn token_usage(&self) -> u64 {
        self.token_usage
    }

    pub fn investigation_results(&self) -> &[InvestigationEntry] {
        &self.investigation_results
    }

    pub fn files_read(&self) -> &BTreeMap<String, String> {
        &self.files_read
    }

    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        &self.pending_tool_calls
    }

    pub fn planned_fixes(&self) -> &[PlannedFix] {
        &self.planned_fixes
    }

    pub fn applied_changes(&self) -> &[FileChange] {
        &self.applied_changes
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions_for_user
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    /// Which budget is spent, if any.
    pub fn budget_exhaustion(&self) -> Option<FailureReason> {
        if self.iteration >= self.iteration_budget {
            Some(FailureReason::IterationBudget {
                limit: self.iteration_budget,
            })
        } else if self.token_usage >= self.token_budget {
            Some(FailureReason::TokenBudget {
                used: self.token_usage,
                limit: self.token_budget,
            })
        } else {
            None
        }
    }

    /// Move to the phase `transition` picks for `event`.
    pub fn apply(&mut self, event: Event) -> AgentPhase {
        if self.phase.is_terminal() {
            return self.phase;
        }
        let next = transition(self, &event);
        let enters_reasoning = next == AgentPhase::Reasoning
            && (self.phase != AgentPhase::Reasoning || matches!(event, Event::Responded { .. }));
        if next == self.phase && !enters_reasoning {
            return next;
        }

        match next {
            AgentPhase::Reasoning => self.iteration += 1,
            AgentPhase::Failed => {
                let reason = match event {
                    Event::ProviderFailed(msg) => FailureReason::Provider(msg),
                    Event::Cancelled => FailureReason::Cancelled,
                    _ => self.budget_exhaustion().unwrap_or(FailureReason::IterationBudget {
                        limit: self.iteration_budget,
                    }),
                };
                self.success = false;
                self.reasoning = format!("No fix was produced: {}.", reason);
                self.suggestions_for_user = FAILURE_SUGGESTIONS.iter().map(|s| s.to_string()).collect();
                self.failure = Some(reason);
            }
            AgentPhase::Complete => self.success = true,
            _ => {}
        }

        tracing::debug!(from = %self.phase, to = %next, iteration = self.iteration, "agent transition");
        self.phase = next;
        next
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        if !self.phase.is_terminal() {
            self.messages.push(message);
        }
    }

    pub fn add_tokens(&mut self, tokens: u64) {
        if !self.phase.is_terminal() {
            self.token_usage = self.token_usage.saturating_add(tokens);
        }
    }

    pub fn record_investigation(&mut self, call: &ToolCall, result: &ToolResult) {
        if self.phase.is_terminal() {
            return;
        }
        self.investigation_results.push(InvestigationEntry::new(call, result));
    }

    pub fn record_file_read(&mut self, path: impl Into<String>, content: impl Into<String>) {
        if !self.phase.is_terminal() {
            self.files_read.insert(path.into(), content.into());
        }
    }

    /// Replace (never extend) the calls awaiting execution.
    pub fn set_pending(&mut self, calls: Vec<ToolCall>) {
        if !self.phase.is_terminal() {
            self.pending_tool_calls = calls;
        }
    }

    pub fn accept_proposal(&mut self, proposal: Proposal) {
        if self.phase.is_terminal() {
            return;
        }
        self.planned_fixes = proposal.changes;
        self.confidence = proposal.confidence;
        self.reasoning = proposal.explanation;
    }

    pub fn set_applied_changes(&mut self, changes: Vec<FileChange>) {
        if !self.phase.is_terminal() {
            self.applied_changes = changes;
        }
    }

    pub fn add_suggestion(&mut self, suggestion: impl Into<String>) {
        if !self.phase.is_terminal() {
            self.suggestions_for_user.push(suggestion.into());
        }
    }

    /// The result handed back to the caller.
    pub fn to_fix_result(&self) -> FixResult {
        match (self.phase, &self.failure) {
            (AgentPhase::Complete, _) => {
                let mut result =
                    FixResult::fixed(self.applied_changes.clone(), self.reasoning.clone(), self.confidence);
                result.suggestions = self.suggestions_for_user.clone();
                result
            }
            (AgentPhase::Failed, Some(FailureReason::Provider(msg))) => {
                FixResult::manual(msg.clone(), self.reasoning.clone(), self.suggestions_for_user.clone())
            }
            (AgentPhase::Failed, reason) => {
                let mut result = FixResult::failed(self.reasoning.clone(), self.suggestions_for_user.clone());
                result.error = reason.as_ref().map(|r| r.to_string());
                result
            }
            (phase, _) => FixResult::failed(
                format!("Agent stopped in non-terminal phase {}.", phase),
                FAILURE_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
            ),
        }
    }
}
