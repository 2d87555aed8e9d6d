// src/dag/builder.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::after::{AfterParseError, parse_after};
use crate::dag::graph::TaskGraph;
use crate::dag::task::{Combinator, Condition, Predecessor, ScopeId, TaskId, TaskKind, TaskNode};
use crate::dag::BuildError;
use crate::engine::BoolExpr;

/// Declarative description of one task, as written in a process definition.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    name: Option<String>,
    after: Option<String>,
    guard: Option<BoolExpr>,
    kind: TaskKind,
    children: Vec<TaskSpec>,
}

impl TaskSpec {
    /// An anonymous task.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            name: None,
            after: None,
            guard: None,
            kind,
            children: Vec::new(),
        }
    }

    pub fn named(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(kind)
        }
    }

    /// Set the AFTER clause, e.g. `"A SUCCEEDS AND B"`.
    pub fn after(mut self, clause: impl Into<String>) -> Self {
        self.after = Some(clause.into());
        self
    }

    /// Only run when `guard` evaluates true; otherwise the task is skipped.
    pub fn when(mut self, guard: BoolExpr) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn child(mut self, spec: TaskSpec) -> Self {
        self.children.push(spec);
        self
    }

    pub fn children(mut self, specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.children.extend(specs);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }
}

/// Lower task specs into a validated [`TaskGraph`].
pub fn build_graph(specs: Vec<TaskSpec>) -> Result<TaskGraph, BuildError> {
    let mut graph = TaskGraph::default();
    let root = graph.push_scope(None);
    lower_scope(&mut graph, root, None, specs)?;

    validate_acyclic(&graph)?;
    validate_breaks(&graph)?;
    validate_waits(&graph)?;
    Ok(graph)
}

fn lower_scope(
    graph: &mut TaskGraph,
    scope: ScopeId,
    parent: Option<TaskId>,
    specs: Vec<TaskSpec>,
) -> Result<(), BuildError> {
    let mut names: HashMap<String, TaskId> = HashMap::new();
    let mut pending = Vec::with_capacity(specs.len());

    // First pass: allocate every sibling so AFTER can refer forwards too.
    for (ordinal, spec) in specs.into_iter().enumerate() {
        let TaskSpec {
            name,
            after,
            guard,
            kind,
            children,
        } = spec;

        let node = TaskNode {
            id: TaskId(0),
            name: name.clone(),
            ordinal,
            scope,
            parent,
            predecessors: Vec::new(),
            combinator: Combinator::And,
            dependents: Vec::new(),
            guard,
            kind,
            child: None,
        };
        if !children.is_empty() && !node.kind.is_scope() {
            return Err(BuildError::ChildrenOnLeaf {
                task: node.display_name(),
            });
        }

        let id = graph.push_task(node);
        if let Some(name) = name {
            if names.insert(name.clone(), id).is_some() {
                return Err(BuildError::DuplicateTask { name });
            }
        }
        pending.push((id, after, children));
    }

    // Second pass: resolve predecessors and recurse into child scopes.
    let mut previous: Option<TaskId> = None;
    for (id, after, children) in pending {
        let task = graph.task(id).display_name();

        let (predecessors, combinator) = match after {
            Some(text) => {
                let clause = parse_after(&text).map_err(|err| match err {
                    AfterParseError::MixedCombinators => {
                        BuildError::MixedCombinators { task: task.clone() }
                    }
                    AfterParseError::Empty => BuildError::MalformedAfter {
                        task: task.clone(),
                        reason: "empty clause".to_string(),
                    },
                    AfterParseError::Malformed(reason) => BuildError::MalformedAfter {
                        task: task.clone(),
                        reason,
                    },
                })?;

                let mut preds = Vec::with_capacity(clause.terms.len());
                for (name, condition) in clause.terms {
                    let Some(&pred) = names.get(&name) else {
                        return Err(BuildError::UnknownPredecessor {
                            task,
                            predecessor: name,
                        });
                    };
                    if pred == id {
                        return Err(BuildError::SelfPredecessor { task });
                    }
                    preds.push(Predecessor {
                        task: pred,
                        condition,
                    });
                }
                (preds, clause.combinator)
            }
            None => {
                let implicit = previous.map(|task| Predecessor {
                    task,
                    condition: Condition::Completes,
                });
                (implicit.into_iter().collect(), Combinator::And)
            }
        };

        for pred in &predecessors {
            graph.task_mut(pred.task).dependents.push(id);
        }
        let node = graph.task_mut(id);
        node.predecessors = predecessors;
        node.combinator = combinator;
        previous = Some(id);

        if node.kind.is_scope() {
            let child = graph.push_scope(Some(id));
            graph.task_mut(id).child = Some(child);
            lower_scope(graph, child, Some(id), children)?;
        }
    }

    Ok(())
}

/// Predecessor edges within each scope must form a DAG.
fn validate_acyclic(graph: &TaskGraph) -> Result<(), BuildError> {
    // Edge direction: predecessor -> task.
    let mut edges: DiGraphMap<usize, ()> = DiGraphMap::new();
    for node in graph.tasks() {
        edges.add_node(node.id.index());
        for pred in &node.predecessors {
            edges.add_edge(pred.task.index(), node.id.index(), ());
        }
    }

    match toposort(&edges, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(BuildError::Cycle {
            task: graph.path_of(TaskId(cycle.node_id())),
        }),
    }
}

fn validate_breaks(graph: &TaskGraph) -> Result<(), BuildError> {
    for node in graph.tasks() {
        if matches!(node.kind, TaskKind::Break(_)) && node.parent.is_none() {
            return Err(BuildError::BreakOutsideLoop {
                task: graph.path_of(node.id),
            });
        }
    }
    Ok(())
}

/// Every WAITFOR ASYNC must reach at least one launch, and the path to the
/// launches it collects must not go through an OR.
fn validate_waits(graph: &TaskGraph) -> Result<(), BuildError> {
    for node in graph.tasks() {
        if !matches!(node.kind, TaskKind::WaitForAsync) {
            continue;
        }
        if graph.async_launches_for(node.id).is_empty() {
            return Err(BuildError::NoAsyncLaunch {
                task: graph.path_of(node.id),
            });
        }

        let mut current = Some(node.id);
        while let Some(task) = current {
            let chain = graph.upstream_until(task, |n| n.kind.is_async_launch());
            let ambiguous = std::iter::once(task)
                .chain(chain.iter().copied())
                .find(|t| {
                    let n = graph.task(*t);
                    !n.kind.is_async_launch()
                        && n.combinator == Combinator::Or
                        && n.predecessors.len() > 1
                });
            if let Some(via) = ambiguous {
                return Err(BuildError::AmbiguousWaitFor {
                    task: graph.path_of(node.id),
                    via: graph.path_of(via),
                });
            }
            if chain.iter().any(|t| graph.task(*t).kind.is_async_launch()) {
                break;
            }
            current = graph.task(task).parent;
        }
    }
    Ok(())
}
