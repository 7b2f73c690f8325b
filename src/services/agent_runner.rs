//! Agent runner: the per-task execution loop.
//!
//! One run interleaves streaming model requests with tool dispatches until
//! the model stops calling tools, `task_complete` fires, the iteration
//! budget runs out, or the run is cancelled. Cancellation is checked at
//! the top of each iteration and before each tool dispatch.

use futures::StreamExt;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::models::agent::{AgentInstance, AgentStatus};
use crate::domain::models::task::{CodeChange, Task, TaskResult};
use crate::domain::models::usage::TokenUsage;
use crate::domain::ports::cancellation::CancellationSignal;
use crate::domain::ports::model_provider::{
    ModelMessage, ModelProvider, ModelRequest, StreamPart, ToolCallPart,
};
use crate::services::event_bus::{EventBus, SwarmEvent};
use crate::services::tool_host::ToolHost;

/// Limits applied to one run.
#[derive(Debug, Clone)]
pub struct AgentRunnerConfig {
    /// Maximum model-request iterations per task.
    pub max_iterations: u32,
    /// Characters kept from the final assistant text for the summary.
    pub summary_limit: usize,
    /// Output token cap per request.
    pub max_tokens: u32,
}

impl Default for AgentRunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            summary_limit: 500,
            max_tokens: 4096,
        }
    }
}

/// Outcome of a run: the task result plus the token usage of every model
/// call made along the way.
#[derive(Debug, Clone)]
pub struct RunnerOutcome {
    pub result: TaskResult,
    pub usage: Vec<TokenUsage>,
    /// Free-form notes passed through `task_complete`.
    pub notes: Option<String>,
}

/// Executes a single task with one agent.
pub struct AgentRunner {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolHost>,
    bus: Arc<EventBus>,
    config: AgentRunnerConfig,
}

impl AgentRunner {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolHost>, bus: Arc<EventBus>) -> Self {
        Self {
            provider,
            tools,
            bus,
            config: AgentRunnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentRunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one task to completion. Never panics; every failure mode maps
    /// to a `TaskResult` with `success = false`.
    pub async fn run(
        &self,
        agent: &AgentInstance,
        task: &Task,
        cancel: CancellationSignal,
    ) -> RunnerOutcome {
        let session_id = agent.session_id;
        let mut transcript = vec![
            ModelMessage::system(build_system_prompt(agent, task)),
            ModelMessage::user(build_task_prompt(task)),
        ];
        let allowed: Vec<&str> = agent.role.profile().allowed_tools.clone();
        let schemas = self.tools.schemas_for(&allowed);

        let mut usage: Vec<TokenUsage> = Vec::new();
        let mut code_changes: Vec<CodeChange> = Vec::new();
        let mut last_text = String::new();

        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                return self.outcome(TaskResult::failed("cancelled"), usage, code_changes, None);
            }

            self.publish_progress(session_id, agent.id, (iteration * 10).min(90) as u8)
                .await;

            let request = ModelRequest::new(session_id, agent.model.clone(), transcript.clone())
                .with_agent(agent.id)
                .with_tools(schemas.clone());

            let mut stream = match self.provider.stream(request, cancel.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    return self.outcome(
                        TaskResult::failed(e.to_string()),
                        usage,
                        code_changes,
                        None,
                    )
                }
            };

            let mut text = String::new();
            let mut tool_calls: Vec<ToolCallPart> = Vec::new();
            let mut stream_error: Option<String> = None;
            while let Some(part) = stream.next().await {
                match part {
                    Ok(StreamPart::Text { content }) => text.push_str(&content),
                    Ok(StreamPart::ToolCalls { tool_calls: calls }) => {
                        tool_calls.extend(calls.into_iter().filter(|c| c.finished));
                    }
                    Ok(StreamPart::Usage { input_tokens, output_tokens }) => {
                        usage.push(TokenUsage::new(&agent.model, input_tokens, output_tokens));
                    }
                    Err(e) => {
                        stream_error = Some(e.to_string());
                        break;
                    }
                }
            }
            if let Some(error) = stream_error {
                return self.outcome(TaskResult::failed(error), usage, code_changes, None);
            }

            if !text.is_empty() {
                transcript.push(ModelMessage::assistant(text.clone()));
                last_text = text;
            }

            if tool_calls.is_empty() {
                self.publish_progress(session_id, agent.id, 100).await;
                let summary = truncate_summary(&last_text, self.config.summary_limit);
                return self.outcome(
                    TaskResult { success: true, summary, ..TaskResult::default() },
                    usage,
                    code_changes,
                    None,
                );
            }

            for call in tool_calls {
                if cancel.is_cancelled() {
                    return self.outcome(
                        TaskResult::failed("cancelled"),
                        usage,
                        code_changes,
                        None,
                    );
                }

                let result = self.tools.invoke(&call.name, &call.arguments).await;
                self.bus
                    .publish(SwarmEvent::ToolCall {
                        session_id,
                        agent_id: agent.id,
                        tool: call.name.clone(),
                        success: !result.is_error(),
                    })
                    .await;

                transcript.push(ModelMessage::tool_use(
                    call.id.clone(),
                    call.name.clone(),
                    call.arguments.clone(),
                ));
                transcript.push(ModelMessage::tool_result(
                    call.id.clone(),
                    result.combined_text(),
                    result.is_error(),
                ));

                if let Some(change) = result.code_change.clone() {
                    code_changes.push(change);
                }
                if let Some(completion) = result.completion {
                    self.publish_progress(session_id, agent.id, 100).await;
                    let summary = truncate_summary(&completion.summary, self.config.summary_limit);
                    return self.outcome(
                        TaskResult { success: true, summary, ..TaskResult::default() },
                        usage,
                        code_changes,
                        completion.notes,
                    );
                }
            }
        }

        // Iteration budget exhausted without task_complete: report success
        // with the best summary available.
        self.publish_progress(session_id, agent.id, 100).await;
        let summary = if last_text.is_empty() {
            "iteration budget exhausted".to_string()
        } else {
            truncate_summary(&last_text, self.config.summary_limit)
        };
        self.outcome(
            TaskResult { success: true, summary, ..TaskResult::default() },
            usage,
            code_changes,
            None,
        )
    }

    fn outcome(
        &self,
        mut result: TaskResult,
        usage: Vec<TokenUsage>,
        code_changes: Vec<CodeChange>,
        notes: Option<String>,
    ) -> RunnerOutcome {
        result.code_changes = code_changes;
        RunnerOutcome { result, usage, notes }
    }

    async fn publish_progress(&self, session_id: Uuid, agent_id: Uuid, progress: u8) {
        self.bus
            .publish(SwarmEvent::AgentUpdated {
                session_id,
                agent_id,
                status: AgentStatus::Working,
                progress: Some(progress),
            })
            .await;
    }
}

fn build_system_prompt(agent: &AgentInstance, task: &Task) -> String {
    format!(
        "{}\n\nYou are working on task \"{}\" ({}). Use the available tools to do the work, \
         then call task_complete with a summary.",
        agent.system_prompt,
        task.title,
        task.task_type.as_str()
    )
}

fn build_task_prompt(task: &Task) -> String {
    let mut prompt = task.description.clone();
    if !task.acceptance_criteria.is_empty() {
        prompt.push_str("\n\nAcceptance criteria:\n");
        for (i, criterion) in task.acceptance_criteria.iter().enumerate() {
            prompt.push_str(&format!("{}. {criterion}\n", i + 1));
        }
    }
    if !task.context_files.is_empty() {
        prompt.push_str("\nRelevant files:\n");
        for file in &task.context_files {
            prompt.push_str(&format!("- {file}\n"));
        }
    }
    prompt
}

fn truncate_summary(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}
