// src/dag/graph.rs

use std::collections::{HashSet, VecDeque};

use crate::dag::task::{ScopeId, TaskId, TaskNode};

/// An ordered set of sibling tasks, optionally owned by a loop or group task.
#[derive(Debug, Clone)]
pub struct ScopeNode {
    pub id: ScopeId,
    pub owner: Option<TaskId>,
    pub tasks: Vec<TaskId>,
}

/// Arena holding every task of one process, nested scopes included.
///
/// Built and validated by [`crate::dag::build_graph`]; once built the
/// structure never changes, so it is shared read-only between concurrent
/// executions of the same process.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<TaskNode>,
    scopes: Vec<ScopeNode>,
}

impl TaskGraph {
    pub(crate) fn push_scope(&mut self, owner: Option<TaskId>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(ScopeNode {
            id,
            owner,
            tasks: Vec::new(),
        });
        id
    }

    pub(crate) fn push_task(&mut self, mut node: TaskNode) -> TaskId {
        let id = TaskId(self.tasks.len());
        node.id = id;
        self.scopes[node.scope.0].tasks.push(id);
        self.tasks.push(node);
        id
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> &mut TaskNode {
        &mut self.tasks[id.0]
    }

    /// The process-level scope.
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn task(&self, id: TaskId) -> &TaskNode {
        &self.tasks[id.0]
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeNode {
        &self.scopes[id.0]
    }

    pub fn tasks_in(&self, scope: ScopeId) -> &[TaskId] {
        &self.scopes[scope.0].tasks
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Slash-separated display names from the process level down, e.g.
    /// `Loop/Breaker` or `Outer/#2`.
    pub fn path_of(&self, id: TaskId) -> String {
        let mut parts = vec![self.task(id).display_name()];
        let mut current = self.task(id).parent;
        while let Some(parent) = current {
            parts.push(self.task(parent).display_name());
            current = self.task(parent).parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Inverse of [`TaskGraph::path_of`].
    pub fn find(&self, path: &str) -> Option<TaskId> {
        let mut scope = self.root();
        let mut found = None;
        for part in path.split('/') {
            let id = self
                .tasks_in(scope)
                .iter()
                .copied()
                .find(|id| self.task(*id).display_name() == part)?;
            found = Some(id);
            if let Some(child) = self.task(id).child {
                scope = child;
            }
        }
        found
    }

    /// Every task in `scope` and in the scopes nested below it.
    pub fn subtree(&self, scope: ScopeId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([scope]);
        while let Some(scope) = queue.pop_front() {
            for &id in self.tasks_in(scope) {
                out.push(id);
                if let Some(child) = self.task(id).child {
                    queue.push_back(child);
                }
            }
        }
        out
    }

    /// Siblings reachable backwards through predecessor references,
    /// breadth-first. `id` itself is not included.
    pub fn upstream(&self, id: TaskId) -> Vec<TaskId> {
        self.upstream_until(id, |_| false)
    }

    /// Like [`TaskGraph::upstream`], but does not walk past tasks for which
    /// `stop` returns true (they are still reported).
    pub fn upstream_until(&self, id: TaskId, stop: impl Fn(&TaskNode) -> bool) -> Vec<TaskId> {
        let mut seen = HashSet::from([id]);
        let mut out = Vec::new();
        let mut queue: VecDeque<TaskId> = self.task(id).predecessors.iter().map(|p| p.task).collect();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            let node = self.task(current);
            if stop(node) {
                continue;
            }
            queue.extend(node.predecessors.iter().map(|p| p.task));
        }
        out
    }

    /// Asynchronous launches a WAITFOR ASYNC at `id` collects.
    ///
    /// Searches the task's own scope first; if nothing is reachable there,
    /// repeats the search from the enclosing task, and so on upwards.
    pub fn async_launches_for(&self, id: TaskId) -> Vec<TaskId> {
        let mut current = Some(id);
        while let Some(task) = current {
            let found: Vec<TaskId> = self
                .upstream(task)
                .into_iter()
                .filter(|t| self.task(*t).kind.is_async_launch())
                .collect();
            if !found.is_empty() {
                return found;
            }
            current = self.task(task).parent;
        }
        Vec::new()
    }
}
