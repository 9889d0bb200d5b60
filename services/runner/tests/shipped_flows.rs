use parley_core::{ConfigurationError, ContextStrategy, END_NODE, FlowGraph, Transition};
use parley_runner::handlers::demo_registry;
use std::io::Write;
use std::path::PathBuf;

fn flow_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("flows").join(name)
}

fn load(name: &str) -> FlowGraph {
    FlowGraph::from_path(flow_path(name), &demo_registry())
        .unwrap_or_else(|e| panic!("{name} failed to load: {e}"))
}

#[test]
fn patient_intake_routes_on_birthday_check() {
    let graph = load("patient_intake.json");
    assert_eq!(graph.initial_node(), "start");
    assert_eq!(graph.reachable_terminals(), vec!["confirm"]);

    let verify = graph.node("start").unwrap().function("verify_birthday").unwrap();
    assert!(verify.handler.is_some());
    assert!(matches!(verify.transition, Transition::Dynamic { ref field, .. } if field == "verified"));
    assert!(graph.node("verify").unwrap().context_strategy.resets());
}

#[test]
fn founder_interview_ends_after_decision() {
    let graph = load("founder_interview.json");
    assert_eq!(graph.reachable_terminals(), vec!["end"]);
    assert!(matches!(
        graph.node("feedback_intro").unwrap().context_strategy,
        ContextStrategy::ResetWithSummary { summary_prompt: Some(_) }
    ));
    assert_eq!(graph.node("greeting").unwrap().role_messages.len(), 1);

    let next = |node: &str, function: &str| {
        graph.node(node).unwrap().function(function).unwrap().transition.targets()[0].to_string()
    };
    assert_eq!(next("feedback_intro", "ready_for_feedback"), "strengths_feedback");
    assert_eq!(next("strengths_feedback", "acknowledge_strengths"), "concerns_feedback");
    assert_eq!(next("concerns_feedback", "acknowledge_concerns"), "yc_decision");
}

#[test]
fn room_service_can_hang_up_early() {
    let graph = load("room_service.json");
    assert_eq!(graph.reachable_terminals(), vec![END_NODE, "order_placed"]);
    let placed = graph.node("order_placed").unwrap();
    assert_eq!(placed.pre_actions.len(), 1);
    assert_eq!(placed.post_actions.len(), 1);
}

#[test]
fn unknown_handler_in_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "initial_node": "start",
            "nodes": {{
                "start": {{"functions": [{{"type": "function", "function": {{
                    "name": "lookup", "handler": "no_such_handler", "transition_to": "end"
                }}}}]}},
                "end": {{}}
            }}
        }}"#
    )
    .unwrap();

    let err = FlowGraph::from_path(file.path(), &demo_registry()).unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::UnknownHandler { ref handler, .. } if handler == "no_such_handler"
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = FlowGraph::from_path(dir.path().join("absent.json"), &demo_registry()).unwrap_err();
    assert!(matches!(err, ConfigurationError::Io(_)));
}
