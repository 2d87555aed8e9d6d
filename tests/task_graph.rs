// tests/task_graph.rs

use jobdag::dag::after::AfterParseError;
use jobdag::dag::{
    BuildError, Combinator, Condition, Invocation, TaskKind, TaskResult, TaskSpec, Verdict,
    build_graph, evaluate, parse_after,
};
use jobdag::engine::{BoolExpr, ValueExpr};
use jobdag_test_utils::builders::act;
use jobdag_test_utils::fake_actions::RecordingLog;

fn noop(name: &str) -> TaskSpec {
    act(name, RecordingLog::new().action(name))
}

fn launch(name: &str) -> TaskSpec {
    TaskSpec::named(
        name,
        TaskKind::Process {
            name: "child".to_string(),
            args: Vec::new(),
            invocation: Invocation::Async { into: None },
        },
    )
}

#[test]
fn after_clause_defaults_to_completes_and_and() {
    let clause = parse_after("A").unwrap();
    assert_eq!(clause.terms, vec![("A".to_string(), Condition::Completes)]);
    assert_eq!(clause.combinator, Combinator::And);
}

#[test]
fn after_clause_keywords_are_case_insensitive() {
    let clause = parse_after("A succeeds or B FAILS Or C").unwrap();
    assert_eq!(
        clause.terms,
        vec![
            ("A".to_string(), Condition::Succeeds),
            ("B".to_string(), Condition::Fails),
            ("C".to_string(), Condition::Completes),
        ]
    );
    assert_eq!(clause.combinator, Combinator::Or);
}

#[test]
fn after_clause_errors() {
    assert_eq!(parse_after("   "), Err(AfterParseError::Empty));
    assert_eq!(
        parse_after("A AND B OR C"),
        Err(AfterParseError::MixedCombinators)
    );
    assert!(matches!(parse_after("A AND"), Err(AfterParseError::Malformed(_))));
    assert!(matches!(parse_after("A B"), Err(AfterParseError::Malformed(_))));
    assert!(matches!(parse_after("SUCCEEDS"), Err(AfterParseError::Malformed(_))));
}

#[test]
fn and_orphans_as_soon_as_one_predecessor_is_wrong() {
    let verdict = evaluate(
        Combinator::And,
        [
            (TaskResult::Failed, Condition::Succeeds),
            (TaskResult::Running, Condition::Succeeds),
        ],
    );
    assert_eq!(verdict, Verdict::Orphaned);

    let verdict = evaluate(
        Combinator::And,
        [
            (TaskResult::Succeeded, Condition::Succeeds),
            (TaskResult::Running, Condition::Succeeds),
        ],
    );
    assert_eq!(verdict, Verdict::Waiting);
}

#[test]
fn or_is_ready_on_first_satisfied_and_orphaned_only_when_all_fail() {
    let verdict = evaluate(
        Combinator::Or,
        [
            (TaskResult::Succeeded, Condition::Succeeds),
            (TaskResult::NotRun, Condition::Succeeds),
        ],
    );
    assert_eq!(verdict, Verdict::Ready);

    let verdict = evaluate(
        Combinator::Or,
        [
            (TaskResult::Failed, Condition::Succeeds),
            (TaskResult::Running, Condition::Succeeds),
        ],
    );
    assert_eq!(verdict, Verdict::Waiting);

    let verdict = evaluate(
        Combinator::Or,
        [
            (TaskResult::Failed, Condition::Succeeds),
            (TaskResult::Orphaned, Condition::Succeeds),
        ],
    );
    assert_eq!(verdict, Verdict::Orphaned);
}

#[test]
fn completes_is_satisfied_by_either_outcome_only() {
    assert!(Condition::Completes.satisfied_by(TaskResult::Succeeded));
    assert!(Condition::Completes.satisfied_by(TaskResult::Failed));
    assert!(!Condition::Completes.satisfied_by(TaskResult::Skipped));
    assert!(!Condition::Completes.satisfied_by(TaskResult::Orphaned));
    assert_eq!(evaluate(Combinator::And, std::iter::empty::<(TaskResult, Condition)>()), Verdict::Ready);
}

#[test]
fn siblings_without_after_run_in_sequence() {
    let graph = build_graph(vec![noop("A"), noop("B"), noop("C").after("A")]).unwrap();
    let b = graph.task(graph.find("B").unwrap());
    let c = graph.task(graph.find("C").unwrap());
    let a = graph.find("A").unwrap();

    assert_eq!(b.predecessors.len(), 1);
    assert_eq!(b.predecessors[0].task, a);
    assert_eq!(b.predecessors[0].condition, Condition::Completes);
    assert_eq!(c.predecessors[0].task, a);
    assert_eq!(graph.task(a).dependents.len(), 2);
    assert!(graph.task(a).predecessors.is_empty());
}

#[test]
fn nested_tasks_get_paths_and_anonymous_ordinals() {
    let graph = build_graph(vec![
        TaskSpec::named("Outer", TaskKind::Group).children([
            TaskSpec::new(TaskKind::Fail(ValueExpr::text("x"))),
            noop("Inner"),
        ]),
    ])
    .unwrap();

    let inner = graph.find("Outer/Inner").unwrap();
    assert_eq!(graph.path_of(inner), "Outer/Inner");
    assert!(graph.find("Outer/#1").is_some());
    assert_eq!(graph.task(inner).parent, graph.find("Outer"));
    assert_eq!(graph.len(), 3);
}

#[test]
fn build_rejects_structural_errors() {
    let unknown = build_graph(vec![noop("A").after("Nope")]).unwrap_err();
    assert_eq!(
        unknown,
        BuildError::UnknownPredecessor {
            task: "A".to_string(),
            predecessor: "Nope".to_string()
        }
    );

    let mixed = build_graph(vec![noop("A"), noop("B"), noop("C").after("A AND B OR A")]);
    assert_eq!(
        mixed.unwrap_err(),
        BuildError::MixedCombinators {
            task: "C".to_string()
        }
    );

    let dup = build_graph(vec![noop("A"), noop("A")]).unwrap_err();
    assert_eq!(dup, BuildError::DuplicateTask { name: "A".to_string() });

    let own = build_graph(vec![noop("A").after("A")]).unwrap_err();
    assert_eq!(own, BuildError::SelfPredecessor { task: "A".to_string() });

    let cycle = build_graph(vec![noop("A").after("B"), noop("B").after("A")]).unwrap_err();
    assert!(matches!(cycle, BuildError::Cycle { .. }));

    let leaf = build_graph(vec![noop("A").child(noop("B"))]).unwrap_err();
    assert_eq!(leaf, BuildError::ChildrenOnLeaf { task: "A".to_string() });
}

#[test]
fn break_must_be_inside_a_loop() {
    let err = build_graph(vec![TaskSpec::named("Brk", TaskKind::Break(None))]).unwrap_err();
    assert_eq!(err, BuildError::BreakOutsideLoop { task: "Brk".to_string() });

    let ok = build_graph(vec![
        TaskSpec::named("Loop", TaskKind::While(BoolExpr::constant(true)))
            .child(TaskSpec::named("Brk", TaskKind::Break(None))),
    ]);
    assert!(ok.is_ok());
}

#[test]
fn waitfor_needs_a_reachable_launch() {
    let err = build_graph(vec![noop("A"), TaskSpec::named("Wait", TaskKind::WaitForAsync)])
        .unwrap_err();
    assert_eq!(err, BuildError::NoAsyncLaunch { task: "Wait".to_string() });
}

#[test]
fn waitfor_rejects_or_on_the_path_to_the_launch() {
    let err = build_graph(vec![
        launch("L1"),
        launch("L2").after("L1"),
        noop("Join").after("L1 OR L2"),
        TaskSpec::named("Wait", TaskKind::WaitForAsync).after("Join"),
    ])
    .unwrap_err();
    assert_eq!(
        err,
        BuildError::AmbiguousWaitFor {
            task: "Wait".to_string(),
            via: "Join".to_string()
        }
    );
}

#[test]
fn waitfor_finds_launches_through_the_parent() {
    let graph = build_graph(vec![
        launch("L1"),
        launch("L2"),
        TaskSpec::named("Block", TaskKind::Group)
            .child(TaskSpec::named("Wait", TaskKind::WaitForAsync)),
    ])
    .unwrap();

    let wait = graph.find("Block/Wait").unwrap();
    let mut found: Vec<String> = graph
        .async_launches_for(wait)
        .into_iter()
        .map(|id| graph.path_of(id))
        .collect();
    found.sort();
    assert_eq!(found, vec!["L1".to_string(), "L2".to_string()]);
}
