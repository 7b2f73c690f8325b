//! Task board: the dependency-aware DAG of subtasks for one session.
//!
//! The board owns every task of a session and keeps four things consistent
//! at all times: the `blocked_by`/`blocks` inverse relation, acyclicity of
//! the dependency graph, the readiness rule (a task is Ready iff all of its
//! dependencies are Complete), and the status→column projection.
//!
//! Board operations are synchronous; the owning session entry serialises
//! access, and emitted events are drained by the caller after each
//! mutation so subscribers observe them in happens-before order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::task::{Task, TaskPriority, TaskResult, TaskStatus};
use crate::services::event_bus::SwarmEvent;

/// Partial update applied by [`TaskBoard::update_task`].
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub acceptance_criteria: Option<Vec<String>>,
    pub context_files: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub add_note: Option<String>,
}

/// Dependency-aware task DAG for a single session.
#[derive(Debug)]
pub struct TaskBoard {
    session_id: Uuid,
    tasks: HashMap<Uuid, Task>,
    /// Insertion order; keeps `execution_order` deterministic.
    order: Vec<Uuid>,
    max_tasks: usize,
    events: Vec<SwarmEvent>,
}

impl TaskBoard {
    pub fn new(session_id: Uuid, max_tasks: usize) -> Self {
        Self {
            session_id,
            tasks: HashMap::new(),
            order: Vec::new(),
            max_tasks,
            events: Vec::new(),
        }
    }

    /// Insert a new task. `blocked_by` ids must already exist on the board;
    /// the inverse relation is updated atomically with the insert.
    pub fn create_task(&mut self, mut task: Task) -> SwarmResult<Uuid> {
        if self.tasks.len() >= self.max_tasks {
            return Err(SwarmError::TaskLimitExceeded {
                current: self.tasks.len(),
                max: self.max_tasks,
            });
        }
        task.validate().map_err(SwarmError::ValidationError)?;
        for dep in &task.blocked_by {
            if !self.tasks.contains_key(dep) {
                return Err(SwarmError::TaskNotFound(*dep));
            }
        }

        let id = task.id;
        for dep in task.blocked_by.clone() {
            if let Some(dep_task) = self.tasks.get_mut(&dep) {
                dep_task.blocks.insert(id);
            }
        }

        // Initial column: ready when no unmet dependencies, backlog otherwise.
        let ready = task
            .blocked_by
            .iter()
            .all(|dep| self.tasks.get(dep).map(|t| t.status == TaskStatus::Complete) == Some(true));
        let initial = if ready { TaskStatus::Ready } else { TaskStatus::Pending };
        task.set_status(initial);

        self.events.push(SwarmEvent::TaskCreated {
            session_id: self.session_id,
            task_id: id,
            title: task.title.clone(),
        });
        self.events.push(SwarmEvent::TaskUpdated {
            session_id: self.session_id,
            task_id: id,
            status: initial,
        });
        self.order.push(id);
        self.tasks.insert(id, task);
        Ok(id)
    }

    /// Apply a partial update.
    pub fn update_task(&mut self, id: Uuid, patch: TaskPatch) -> SwarmResult<()> {
        let task = self.tasks.get_mut(&id).ok_or(SwarmError::TaskNotFound(id))?;
        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(criteria) = patch.acceptance_criteria {
            task.acceptance_criteria = criteria;
        }
        if let Some(files) = patch.context_files {
            task.context_files = files;
        }
        if let Some(tags) = patch.tags {
            task.tags = tags;
        }
        if let Some(note) = patch.add_note {
            task.notes.push(note);
        }
        task.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Remove a task, detaching it from the graph on both sides.
    pub fn delete_task(&mut self, id: Uuid) -> SwarmResult<Task> {
        let task = self.tasks.remove(&id).ok_or(SwarmError::TaskNotFound(id))?;
        self.order.retain(|t| *t != id);

        for dep in &task.blocked_by {
            if let Some(dep_task) = self.tasks.get_mut(dep) {
                dep_task.blocks.remove(&id);
            }
        }
        let dependents: Vec<Uuid> = task.blocks.iter().copied().collect();
        for dependent in &dependents {
            if let Some(dep_task) = self.tasks.get_mut(dependent) {
                dep_task.blocked_by.remove(&id);
            }
        }
        self.events.push(SwarmEvent::TaskDeleted {
            session_id: self.session_id,
            task_id: id,
        });
        // Removing a blocker may unblock its dependents.
        for dependent in dependents {
            self.recompute_readiness(dependent);
        }
        Ok(task)
    }

    /// Add edge `task -> depends_on`, refusing cycles.
    pub fn add_dependency(&mut self, task: Uuid, depends_on: Uuid) -> SwarmResult<()> {
        if !self.tasks.contains_key(&task) {
            return Err(SwarmError::TaskNotFound(task));
        }
        if !self.tasks.contains_key(&depends_on) {
            return Err(SwarmError::TaskNotFound(depends_on));
        }
        if task == depends_on || self.reaches(depends_on, task) {
            return Err(SwarmError::TaskDependencyCycle { task, depends_on });
        }

        if let Some(t) = self.tasks.get_mut(&task) {
            t.blocked_by.insert(depends_on);
        }
        if let Some(t) = self.tasks.get_mut(&depends_on) {
            t.blocks.insert(task);
        }
        self.recompute_readiness(task);
        Ok(())
    }

    /// Remove edge `task -> depends_on`.
    pub fn remove_dependency(&mut self, task: Uuid, depends_on: Uuid) -> SwarmResult<()> {
        if !self.tasks.contains_key(&task) {
            return Err(SwarmError::TaskNotFound(task));
        }
        if !self.tasks.contains_key(&depends_on) {
            return Err(SwarmError::TaskNotFound(depends_on));
        }
        if let Some(t) = self.tasks.get_mut(&task) {
            t.blocked_by.remove(&depends_on);
        }
        if let Some(t) = self.tasks.get_mut(&depends_on) {
            t.blocks.remove(&task);
        }
        self.recompute_readiness(task);
        Ok(())
    }

    /// BFS over `blocked_by` edges: can `from` reach `target`?
    fn reaches(&self, from: Uuid, target: Uuid) -> bool {
        let mut frontier = VecDeque::from([from]);
        let mut seen = HashSet::from([from]);
        while let Some(current) = frontier.pop_front() {
            if current == target {
                return true;
            }
            if let Some(task) = self.tasks.get(&current) {
                for dep in &task.blocked_by {
                    if seen.insert(*dep) {
                        frontier.push_back(*dep);
                    }
                }
            }
        }
        false
    }

    /// Re-evaluate the readiness rule for one task. Only tasks that have
    /// not started move between Ready and Pending.
    fn recompute_readiness(&mut self, id: Uuid) {
        let Some(task) = self.tasks.get(&id) else { return };
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Ready) {
            return;
        }
        let deps_met = task
            .blocked_by
            .iter()
            .all(|dep| self.tasks.get(dep).map(|t| t.status == TaskStatus::Complete) == Some(true));
        let target = if deps_met { TaskStatus::Ready } else { TaskStatus::Pending };
        if self.tasks[&id].status != target {
            self.set_status(id, target);
        }
    }

    fn set_status(&mut self, id: Uuid, status: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.set_status(status);
            self.events.push(SwarmEvent::TaskUpdated {
                session_id: self.session_id,
                task_id: id,
                status,
            });
        }
    }

    /// Hand a Ready task to an agent.
    pub fn assign_task(&mut self, task_id: Uuid, agent_id: Uuid) -> SwarmResult<()> {
        let task = self
            .tasks
            .get(&task_id)
            .ok_or(SwarmError::TaskNotFound(task_id))?;
        if task.assigned_agent_id.is_some() {
            return Err(SwarmError::TaskAlreadyAssigned(task_id));
        }
        if task.status != TaskStatus::Ready {
            return Err(SwarmError::ValidationError(format!(
                "task {} is {} and cannot be assigned",
                task_id,
                task.status.as_str()
            )));
        }
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.assigned_agent_id = Some(agent_id);
        }
        self.set_status(task_id, TaskStatus::Assigned);
        Ok(())
    }

    /// Return an assigned-but-unstarted task to Ready.
    pub fn unassign_task(&mut self, task_id: Uuid) -> SwarmResult<()> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SwarmError::TaskNotFound(task_id))?;
        task.assigned_agent_id = None;
        self.set_status(task_id, TaskStatus::Ready);
        Ok(())
    }

    /// Mark an assigned task as actively executing.
    pub fn start_task(&mut self, task_id: Uuid) -> SwarmResult<()> {
        let task = self
            .tasks
            .get(&task_id)
            .ok_or(SwarmError::TaskNotFound(task_id))?;
        if task.status != TaskStatus::Assigned {
            return Err(SwarmError::ValidationError(format!(
                "task {} is {} and cannot start",
                task_id,
                task.status.as_str()
            )));
        }
        self.set_status(task_id, TaskStatus::InProgress);
        Ok(())
    }

    /// Move a finished task into Review, keeping its assignment.
    pub fn move_to_review(&mut self, task_id: Uuid) -> SwarmResult<()> {
        let task = self
            .tasks
            .get(&task_id)
            .ok_or(SwarmError::TaskNotFound(task_id))?;
        if !task.status.holds_assignment() {
            return Err(SwarmError::ValidationError(format!(
                "task {} is {} and cannot enter review",
                task_id,
                task.status.as_str()
            )));
        }
        self.set_status(task_id, TaskStatus::Review);
        Ok(())
    }

    /// Record a successful result and unblock dependents.
    ///
    /// The Complete event for this task is emitted strictly before any
    /// Ready event for a dependent.
    pub fn complete_task(&mut self, task_id: Uuid, result: TaskResult) -> SwarmResult<Vec<Uuid>> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SwarmError::TaskNotFound(task_id))?;
        task.result = Some(result);
        task.assigned_agent_id = None;
        let dependents: Vec<Uuid> = task.blocks.iter().copied().collect();
        self.set_status(task_id, TaskStatus::Complete);

        let mut now_ready = Vec::new();
        for dependent in dependents {
            let before = self.tasks.get(&dependent).map(|t| t.status);
            self.recompute_readiness(dependent);
            let after = self.tasks.get(&dependent).map(|t| t.status);
            if before != after && after == Some(TaskStatus::Ready) {
                now_ready.push(dependent);
            }
        }
        Ok(now_ready)
    }

    /// Record a failed attempt. Returns `true` when the retry budget is
    /// exhausted and the task is now terminally Failed.
    pub fn fail_task(&mut self, task_id: Uuid, reason: impl Into<String>) -> SwarmResult<bool> {
        let reason = reason.into();
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SwarmError::TaskNotFound(task_id))?;
        task.attempts += 1;
        task.assigned_agent_id = None;

        if task.attempts < task.max_attempts {
            self.set_status(task_id, TaskStatus::Ready);
            return Ok(false);
        }

        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.result = Some(TaskResult::failed(reason));
        }
        let dependents: Vec<Uuid> = self.tasks[&task_id].blocks.iter().copied().collect();
        self.set_status(task_id, TaskStatus::Failed);

        // Dependents of a dead task can never become ready.
        for dependent in dependents {
            if let Some(t) = self.tasks.get(&dependent) {
                if matches!(t.status, TaskStatus::Pending | TaskStatus::Ready) {
                    self.set_status(dependent, TaskStatus::Blocked);
                }
            }
        }
        Ok(true)
    }

    /// Cancel every task that has not reached a terminal state.
    pub fn cancel_active(&mut self) -> Vec<Uuid> {
        let active: Vec<Uuid> = self
            .order
            .iter()
            .copied()
            .filter(|id| !self.tasks[id].is_terminal())
            .collect();
        for id in &active {
            if let Some(task) = self.tasks.get_mut(id) {
                task.assigned_agent_id = None;
            }
            self.set_status(*id, TaskStatus::Cancelled);
        }
        active
    }

    /// Topological order over all tasks, deterministic under a fixed
    /// insertion order. The cycle error here is defence in depth: cyclic
    /// edges are already refused at insertion.
    pub fn execution_order(&self) -> SwarmResult<Vec<Uuid>> {
        let index: HashMap<Uuid, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let mut in_degree: HashMap<Uuid, usize> = self
            .tasks
            .iter()
            .map(|(id, t)| (*id, t.blocked_by.len()))
            .collect();

        let mut heap: BinaryHeap<Reverse<(usize, Uuid)>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse((index[id], *id)))
            .collect();

        let mut sorted = Vec::with_capacity(self.tasks.len());
        while let Some(Reverse((_, id))) = heap.pop() {
            sorted.push(id);
            for dependent in &self.tasks[&id].blocks {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        heap.push(Reverse((index[dependent], *dependent)));
                    }
                }
            }
        }

        if sorted.len() != self.tasks.len() {
            // Any unfinished node sits on a cycle.
            let (task, dep) = self
                .tasks
                .iter()
                .find(|(id, _)| !sorted.contains(id))
                .map(|(id, t)| (*id, t.blocked_by.iter().next().copied().unwrap_or(*id)))
                .unwrap_or((Uuid::nil(), Uuid::nil()));
            return Err(SwarmError::TaskDependencyCycle { task, depends_on: dep });
        }
        Ok(sorted)
    }

    pub fn get(&self, id: Uuid) -> SwarmResult<&Task> {
        self.tasks.get(&id).ok_or(SwarmError::TaskNotFound(id))
    }

    /// Tasks in insertion order.
    pub fn list(&self) -> Vec<&Task> {
        self.order.iter().map(|id| &self.tasks[id]).collect()
    }

    pub fn by_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.order
            .iter()
            .map(|id| &self.tasks[id])
            .filter(|t| t.status == status)
            .collect()
    }

    /// Ready tasks in insertion order.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.by_status(TaskStatus::Ready)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether every task is Complete, Failed, or Cancelled.
    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(Task::is_terminal)
    }

    /// Whether any task ended up terminally Failed.
    pub fn any_failed(&self) -> bool {
        self.tasks
            .values()
            .any(|t| t.status == TaskStatus::Failed)
    }

    /// Take the events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<SwarmEvent> {
        std::mem::take(&mut self.events)
    }
}
