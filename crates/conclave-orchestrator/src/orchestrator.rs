//! Collaborative task orchestration.
//!
//! The [`Orchestrator`] turns a goal and a set of roles into delegated
//! tasks inside a fresh workspace. It picks one of three workflow shapes
//! from the requested roles alone:
//!
//! - researcher, analyzer and synthesizer: the four phase research pipeline
//! - researcher: the simple research workflow
//! - anything else: one parallel part per selected agent
//!
//! Delegation does not wait for results. Progress is read back with
//! [`Orchestrator::get_workflow_status`] and finished work is combined with
//! [`Orchestrator::aggregate_results`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use conclave_core::collaboration::{Communicator, DelegationRequest, Task, TaskStatus};
use conclave_core::config::OrchestratorConfig;
use conclave_core::workspace::{NewWorkspace, Workspace, WorkspaceStatus};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::directory::{AgentDirectory, AgentRecord};
use crate::error::{OrchestrationError, Result};
use crate::roles::{self, AgentRole};

/// Roles the research pipeline cannot run without.
const PIPELINE_ROLES: [AgentRole; 3] =
    [AgentRole::Researcher, AgentRole::Analyzer, AgentRole::Synthesizer];

/// A goal to be worked on by several agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollaborativeTask {
    /// What the collaboration should achieve.
    pub goal: String,
    /// Roles that should take part.
    pub required_roles: Vec<AgentRole>,
    /// Context handed to the first delegated task.
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Overall time budget; zero selects the configured default.
    #[serde(default)]
    pub max_duration: Duration,
}

impl CollaborativeTask {
    /// Creates a task using the default time budget.
    pub fn new(goal: impl Into<String>, required_roles: Vec<AgentRole>) -> Self {
        Self { goal: goal.into(), required_roles, ..Self::default() }
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Sets the overall time budget.
    #[must_use]
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }
}

/// Outcome of a collaboration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationStatus {
    /// Every workflow step was delegated.
    Completed,
    /// The workflow could not be delegated.
    Failed,
}

impl CollaborationStatus {
    /// Returns the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CollaborationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`Orchestrator::execute_collaborative_task`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollaborativeResult {
    /// Workspace created for the run.
    pub workspace_id: String,
    /// Human-readable summary of what was delegated.
    pub final_output: String,
    /// Task IDs keyed by workflow step, e.g. `research_task`.
    pub sub_results: HashMap<String, Value>,
    /// Wall-clock time spent orchestrating.
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Outcome of the run.
    pub status: CollaborationStatus,
    /// Failure reason when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn serialize_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Coarse progress bucket of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// No task has finished yet.
    Initializing,
    /// Less than half of the tasks have finished.
    Executing,
    /// At least half, but not all, of the tasks have finished.
    Finalizing,
    /// Every task has finished.
    Completed,
}

impl WorkflowPhase {
    /// Buckets a progress ratio in `[0, 1]`.
    pub fn from_progress(progress: f64) -> Self {
        if progress >= 1.0 {
            Self::Completed
        } else if progress >= 0.5 {
            Self::Finalizing
        } else if progress > 0.0 {
            Self::Executing
        } else {
            Self::Initializing
        }
    }

    /// Returns the phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Executing => "executing",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condensed view of one task in a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    /// Task ID.
    pub id: String,
    /// Executing agent.
    pub agent: String,
    /// What was delegated.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// When work started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether a non-empty result was reported.
    pub has_result: bool,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            agent: task.to.clone(),
            description: task.description.clone(),
            status: task.status,
            started_at: task.started_at,
            completed_at: task.completed_at,
            has_result: task.result.as_deref().is_some_and(|r| !r.is_empty()),
        }
    }
}

/// Progress of a collaboration, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStatus {
    /// Workspace of the collaboration.
    pub workspace_id: String,
    /// Progress bucket.
    pub phase: WorkflowPhase,
    /// Share of tasks in a terminal status, from 0.0 to 1.0.
    pub progress: f64,
    /// Every task of the workspace keyed by ID.
    pub tasks: BTreeMap<String, TaskSummary>,
    /// When the workspace was created.
    pub start_time: DateTime<Utc>,
    /// Latest workspace or task change.
    pub updated_at: DateTime<Utc>,
}

/// Delegations made by one workflow run.
#[derive(Debug, Default)]
struct WorkflowOutcome {
    summary: Vec<String>,
    sub_results: HashMap<String, Value>,
}

impl WorkflowOutcome {
    fn record(&mut self, key: impl Into<String>, label: &str, task: &Task) {
        self.summary.push(format!("{label} delegated to {} (task {})", task.to, task.id));
        self.sub_results.insert(key.into(), json!(task.id));
    }
}

/// Drives multi-agent workflows through a [`Communicator`].
pub struct Orchestrator {
    communicator: Arc<Communicator>,
    directory: Arc<dyn AgentDirectory>,
    config: OrchestratorConfig,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with default configuration.
    pub fn new(communicator: Arc<Communicator>, directory: Arc<dyn AgentDirectory>) -> Self {
        Self::with_config(communicator, directory, OrchestratorConfig::default())
    }

    /// Creates an orchestrator with explicit configuration.
    pub fn with_config(
        communicator: Arc<Communicator>,
        directory: Arc<dyn AgentDirectory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { communicator, directory, config }
    }

    /// Returns the communicator used for delegation.
    pub fn communicator(&self) -> &Arc<Communicator> {
        &self.communicator
    }

    /// Returns whether `message` asks for multi-agent work.
    pub fn detect_orchestration_need(&self, message: &str) -> bool {
        roles::detect_orchestration_need(message, self.config.orchestration_phrases.as_slice())
    }

    /// Returns the roles `message` calls for.
    pub fn identify_required_roles(&self, message: &str) -> Vec<AgentRole> {
        roles::identify_required_roles(message)
    }

    /// Selects one agent per requested role.
    ///
    /// Agents are considered in name order and the first one declaring the
    /// role wins. When no agent declares a role, the first `general` agent
    /// stands in if the fallback is enabled. Roles nobody can serve are left
    /// out of the map.
    ///
    /// # Errors
    /// * `OrchestrationError::NoSuitableAgents` - If no role could be served
    pub async fn find_agents_by_roles(
        &self,
        roles: &[AgentRole],
    ) -> Result<BTreeMap<AgentRole, String>> {
        let mut names = self.directory.list_agents().await;
        names.sort();

        let mut records: Vec<AgentRecord> = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(record) = self.directory.get_agent(name).await {
                records.push(record);
            }
        }

        let first_with = |role: AgentRole| {
            records.iter().find(|record| record.role == role).map(|record| record.name.clone())
        };

        let mut selected = BTreeMap::new();
        for &role in roles {
            if selected.contains_key(&role) {
                continue;
            }
            let agent = first_with(role).or_else(|| {
                if self.config.general_role_fallback {
                    first_with(AgentRole::General)
                } else {
                    None
                }
            });
            match agent {
                Some(agent) => {
                    debug!(role = %role, agent = %agent, "Selected agent for role");
                    selected.insert(role, agent);
                }
                None => warn!(role = %role, "No agent available for role"),
            }
        }

        if selected.is_empty() {
            return Err(OrchestrationError::NoSuitableAgents { roles: roles.to_vec() });
        }
        Ok(selected)
    }

    /// Runs a collaborative task on behalf of `main_agent`.
    ///
    /// Creates a workspace owned by `main_agent`, adds the selected agents
    /// and delegates the workflow steps. The call returns once every step
    /// has been delegated; it never waits for results.
    ///
    /// # Returns
    /// A completed result, or a failed one when the workflow could not be
    /// delegated. The workspace status is set to match.
    ///
    /// # Errors
    /// * `OrchestrationError::NoSuitableAgents` - If no agent matches any role
    /// * `OrchestrationError::Collaboration` - If the workspace cannot be created
    pub async fn execute_collaborative_task(
        &self,
        main_agent: &str,
        task: CollaborativeTask,
    ) -> Result<CollaborativeResult> {
        let started = Instant::now();
        let max_duration = if task.max_duration.is_zero() {
            self.config.default_max_duration()
        } else {
            task.max_duration
        };

        let agents = self.find_agents_by_roles(&task.required_roles).await?;

        let role_names: Vec<Value> =
            task.required_roles.iter().map(|r| json!(r.as_str())).collect();
        let mut params = NewWorkspace::new(workspace_name(&task.goal), main_agent)
            .with_shared_data("goal", json!(task.goal))
            .with_shared_data("required_roles", Value::Array(role_names));
        for agent in agents.values().collect::<BTreeSet<_>>() {
            params = params.with_agent(agent.as_str());
        }
        let workspace = self.communicator.workspaces().create(params).await?;

        info!(
            workspace_id = %workspace.id(),
            main_agent = %main_agent,
            agents = agents.len(),
            "Starting collaborative task"
        );

        let outcome = self.execute_workflow(&workspace, &task, &agents, max_duration).await;

        let result = match outcome {
            Ok(outcome) => {
                workspace.set_status(WorkspaceStatus::Completed).await?;
                CollaborativeResult {
                    workspace_id: workspace.id().to_string(),
                    final_output: outcome.summary.join("\n"),
                    sub_results: outcome.sub_results,
                    duration: started.elapsed(),
                    status: CollaborationStatus::Completed,
                    error: None,
                }
            }
            Err(e) => {
                warn!(workspace_id = %workspace.id(), error = %e, "Collaborative workflow failed");
                if let Err(status_err) = workspace.set_status(WorkspaceStatus::Failed).await {
                    warn!(
                        workspace_id = %workspace.id(),
                        error = %status_err,
                        "Failed to mark workspace as failed"
                    );
                }
                CollaborativeResult {
                    workspace_id: workspace.id().to_string(),
                    final_output: String::new(),
                    sub_results: HashMap::new(),
                    duration: started.elapsed(),
                    status: CollaborationStatus::Failed,
                    error: Some(e.to_string()),
                }
            }
        };

        info!(
            workspace_id = %result.workspace_id,
            status = %result.status,
            duration_ms = result.duration.as_millis() as u64,
            "Collaborative task finished"
        );
        Ok(result)
    }

    async fn execute_workflow(
        &self,
        workspace: &Workspace,
        task: &CollaborativeTask,
        agents: &BTreeMap<AgentRole, String>,
        max_duration: Duration,
    ) -> Result<WorkflowOutcome> {
        let requested: BTreeSet<AgentRole> = task.required_roles.iter().copied().collect();

        let (name, outcome) = if PIPELINE_ROLES.iter().all(|role| requested.contains(role)) {
            let outcome =
                self.execute_research_pipeline(workspace, task, agents, max_duration).await?;
            ("pipeline", outcome)
        } else if requested.contains(&AgentRole::Researcher) {
            ("simple", self.execute_simple_research(workspace, task, agents, max_duration).await?)
        } else {
            ("parallel", self.execute_parallel(workspace, task, agents, max_duration).await?)
        };

        info!(
            workspace_id = %workspace.id(),
            workflow = name,
            delegations = outcome.sub_results.len(),
            "Workflow delegated"
        );
        workspace.set_shared_data("workflow", json!(name)).await?;
        Ok(outcome)
    }

    /// Delegates the goal to the researcher, followed by a report if a
    /// synthesizer was selected.
    async fn execute_simple_research(
        &self,
        workspace: &Workspace,
        task: &CollaborativeTask,
        agents: &BTreeMap<AgentRole, String>,
        max_duration: Duration,
    ) -> Result<WorkflowOutcome> {
        let researcher = required_agent(agents, AgentRole::Researcher)?;
        let mut outcome = WorkflowOutcome::default();

        let mut request = DelegationRequest::new(
            workspace.id(),
            workspace.parent_agent(),
            researcher,
            &task.goal,
        )
        .with_priority(5)
        .with_timeout(max_duration);
        request.context.clone_from(&task.context);
        let research = self.communicator.delegate_task(request).await?;
        outcome.record("research_task", "Research", &research);

        if let Some(synthesizer) = agents.get(&AgentRole::Synthesizer) {
            let request = DelegationRequest::new(
                workspace.id(),
                workspace.parent_agent(),
                synthesizer,
                format!("Create a comprehensive report on: {}", task.goal),
            )
            .with_priority(4)
            .with_timeout(max_duration)
            .with_context("research_task_id", json!(research.id));
            let synthesis = self.communicator.delegate_task(request).await?;
            outcome.record("synthesis_task", "Synthesis", &synthesis);
        }

        Ok(outcome)
    }

    /// Splits the goal into one part per distinct selected agent.
    async fn execute_parallel(
        &self,
        workspace: &Workspace,
        task: &CollaborativeTask,
        agents: &BTreeMap<AgentRole, String>,
        max_duration: Duration,
    ) -> Result<WorkflowOutcome> {
        let distinct: BTreeSet<&String> = agents.values().collect();
        let total = distinct.len();
        let mut outcome = WorkflowOutcome::default();

        for (i, agent) in distinct.into_iter().enumerate() {
            let mut request = DelegationRequest::new(
                workspace.id(),
                workspace.parent_agent(),
                agent.as_str(),
                format!("{} (part {} of {})", task.goal, i + 1, total),
            )
            .with_priority(3)
            .with_timeout(max_duration);
            request.context.clone_from(&task.context);
            let delegated = self.communicator.delegate_task(request).await?;
            let label = format!("Part {} of {}", i + 1, total);
            outcome.record(format!("{agent}_task"), &label, &delegated);
        }

        Ok(outcome)
    }

    /// Runs the research, analysis, synthesis and validation phases.
    ///
    /// Each phase gets a quarter of the time budget and references the task
    /// IDs of the phases before it. A phase whose delegation fails is skipped.
    ///
    /// Fails with `MissingRequiredAgents` if researcher, analyzer or
    /// synthesizer has no agent.
    async fn execute_research_pipeline(
        &self,
        workspace: &Workspace,
        task: &CollaborativeTask,
        agents: &BTreeMap<AgentRole, String>,
        max_duration: Duration,
    ) -> Result<WorkflowOutcome> {
        let missing: Vec<AgentRole> =
            PIPELINE_ROLES.into_iter().filter(|role| !agents.contains_key(role)).collect();
        if !missing.is_empty() {
            return Err(OrchestrationError::MissingRequiredAgents { missing });
        }

        let phase_timeout = max_duration / 4;
        let mut outcome = WorkflowOutcome::default();

        let mut research = DelegationRequest::new(
            workspace.id(),
            workspace.parent_agent(),
            agents[&AgentRole::Researcher].as_str(),
            &task.goal,
        )
        .with_priority(5)
        .with_timeout(phase_timeout);
        research.context.clone_from(&task.context);
        let research_id = self.run_phase(&mut outcome, "research", "Research", research).await;

        let mut analysis = DelegationRequest::new(
            workspace.id(),
            workspace.parent_agent(),
            agents[&AgentRole::Analyzer].as_str(),
            format!("Analyze the research findings for: {}", task.goal),
        )
        .with_priority(4)
        .with_timeout(phase_timeout);
        if let Some(id) = &research_id {
            analysis = analysis.with_context("research_task_id", json!(id));
        }
        let analysis_id = self.run_phase(&mut outcome, "analysis", "Analysis", analysis).await;

        let mut synthesis = DelegationRequest::new(
            workspace.id(),
            workspace.parent_agent(),
            agents[&AgentRole::Synthesizer].as_str(),
            format!("Create a comprehensive report on: {}", task.goal),
        )
        .with_priority(4)
        .with_timeout(phase_timeout);
        if let Some(id) = &research_id {
            synthesis = synthesis.with_context("research_task_id", json!(id));
        }
        if let Some(id) = &analysis_id {
            synthesis = synthesis.with_context("analysis_task_id", json!(id));
        }
        let synthesis_id = self.run_phase(&mut outcome, "synthesis", "Synthesis", synthesis).await;

        if let Some(validator) = agents.get(&AgentRole::Validator) {
            let mut validation = DelegationRequest::new(
                workspace.id(),
                workspace.parent_agent(),
                validator.as_str(),
                format!("Validate the findings for: {}", task.goal),
            )
            .with_priority(3)
            .with_timeout(phase_timeout);
            if let Some(id) = &synthesis_id {
                validation = validation.with_context("synthesis_task_id", json!(id));
            }
            self.run_phase(&mut outcome, "validation", "Validation", validation).await;
        }

        Ok(outcome)
    }

    async fn run_phase(
        &self,
        outcome: &mut WorkflowOutcome,
        phase: &str,
        label: &str,
        request: DelegationRequest,
    ) -> Option<String> {
        match self.communicator.delegate_task(request).await {
            Ok(task) => {
                outcome.record(format!("{phase}_task"), label, &task);
                Some(task.id)
            }
            Err(e) => {
                warn!(phase = %phase, error = %e, "Pipeline phase skipped");
                None
            }
        }
    }

    /// Computes progress for the tasks of a workspace.
    ///
    /// # Errors
    /// * `OrchestrationError::Collaboration` - If the workspace does not exist
    pub async fn get_workflow_status(&self, workspace_id: &str) -> Result<WorkflowStatus> {
        let workspace = self.communicator.workspaces().get(workspace_id).await?;
        let tasks = self.communicator.list_tasks(workspace_id).await;

        let finished = tasks.iter().filter(|t| t.status.is_terminal()).count();
        let progress = if tasks.is_empty() { 0.0 } else { finished as f64 / tasks.len() as f64 };

        let updated_at = tasks
            .iter()
            .flat_map(|t| [Some(t.created_at), t.started_at, t.completed_at])
            .flatten()
            .fold(workspace.updated_at(), DateTime::max);

        Ok(WorkflowStatus {
            workspace_id: workspace_id.to_string(),
            phase: WorkflowPhase::from_progress(progress),
            progress,
            tasks: tasks.iter().map(|t| (t.id.clone(), TaskSummary::from(t))).collect(),
            start_time: workspace.created_at(),
            updated_at,
        })
    }

    /// Combines the results of completed tasks into one numbered list.
    ///
    /// Tasks that are unknown, belong to another workspace, are not
    /// completed, or have an empty result are left out.
    ///
    /// # Errors
    /// * `OrchestrationError::NoCompletedResults` - If no task qualifies
    pub async fn aggregate_results(
        &self,
        workspace_id: &str,
        task_ids: &[String],
    ) -> Result<String> {
        let mut entries = Vec::new();
        for task_id in task_ids {
            let task = match self.communicator.get_task(task_id).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Skipping task during aggregation");
                    continue;
                }
            };
            if task.workspace_id != workspace_id {
                warn!(
                    task_id = %task_id,
                    workspace_id = %workspace_id,
                    "Task belongs to another workspace"
                );
                continue;
            }
            if task.status != TaskStatus::Completed {
                continue;
            }
            if let Some(result) = task.result.as_deref().filter(|r| !r.is_empty()) {
                entries.push(format!("{}. {}: {}", entries.len() + 1, task.to, result));
            }
        }

        if entries.is_empty() {
            return Err(OrchestrationError::NoCompletedResults {
                workspace_id: workspace_id.to_string(),
            });
        }
        Ok(entries.join("\n\n"))
    }

    /// Cancels a collaboration and every task still open in it.
    ///
    /// # Returns
    /// The IDs of the cancelled tasks.
    pub async fn cancel_collaboration(&self, workspace_id: &str) -> Result<Vec<String>> {
        let workspace = self.communicator.workspaces().get(workspace_id).await?;
        workspace.set_status(WorkspaceStatus::Cancelled).await?;
        let cancelled = self.communicator.cancel_workspace_tasks(workspace_id).await;
        info!(workspace_id = %workspace_id, cancelled = cancelled.len(), "Cancelled collaboration");
        Ok(cancelled)
    }
}

fn required_agent(agents: &BTreeMap<AgentRole, String>, role: AgentRole) -> Result<&str> {
    agents
        .get(&role)
        .map(String::as_str)
        .ok_or_else(|| OrchestrationError::MissingRequiredAgents { missing: vec![role] })
}

/// Names a workspace after the first words of its goal.
fn workspace_name(goal: &str) -> String {
    const MAX_CHARS: usize = 48;
    let goal = goal.trim();
    if goal.chars().count() <= MAX_CHARS {
        return format!("collab: {goal}");
    }
    let short: String = goal.chars().take(MAX_CHARS).collect();
    format!("collab: {}...", short.trim_end())
}
