//! Integration tests for retrying a resume of an unknown session as a new
//! session.

use agent_conduit::models::event::NormalizedEvent;
use agent_conduit::SendRequest;
use tokio::sync::mpsc;

use super::test_helpers::{drain, error_text, FakeAgent, RESULT_LINE, RESUME_MISSING};

/// Fails every `--resume` call with the sentinel; succeeds otherwise.
fn forgetful_agent() -> FakeAgent {
    FakeAgent::new(&format!(
        "case \"$*\" in\n  *--resume*) echo '{RESUME_MISSING}' >&2; exit 1 ;;\nesac\necho '{RESULT_LINE}'\nexit 0"
    ))
}

#[tokio::test]
async fn missing_conversation_is_retried_as_new_session() {
    let agent = forgetful_agent();
    let orchestrator = agent.orchestrator();
    orchestrator
        .create_session_with("s1", agent.workspace_path(), false)
        .await
        .expect("create");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let code = orchestrator
        .send_message("s1", SendRequest::new("hi"), tx)
        .await
        .expect("send");

    assert_eq!(code, Some(0));
    let calls = agent.invocations();
    assert_eq!(calls.len(), 2, "calls: {calls:?}");
    assert!(calls[0].contains("--resume s1"));
    assert!(calls[1].contains("--session-id s1"));
    assert_eq!(orchestrator.is_first_message("s1").await, Some(false));

    let events = drain(&mut rx);
    assert!(error_text(&events).contains(RESUME_MISSING));
    assert!(events
        .iter()
        .any(|event| matches!(event, NormalizedEvent::Result { success: true, .. })));
}

#[tokio::test]
async fn retry_happens_at_most_once() {
    let agent = FakeAgent::new(&format!("echo '{RESUME_MISSING}' >&2\nexit 1"));
    let orchestrator = agent.orchestrator();
    orchestrator
        .create_session_with("s1", agent.workspace_path(), false)
        .await
        .expect("create");
    let (tx, _rx) = mpsc::unbounded_channel();

    let code = orchestrator
        .send_message("s1", SendRequest::new("hi"), tx)
        .await
        .expect("send");

    assert_eq!(code, Some(1));
    assert_eq!(agent.invocations().len(), 2);
    assert_eq!(orchestrator.is_first_message("s1").await, Some(true));
}

#[tokio::test]
async fn sentinel_on_stdout_also_triggers_retry() {
    let agent = FakeAgent::new(&format!(
        "case \"$*\" in\n  *--resume*) echo '{RESUME_MISSING}'; exit 1 ;;\nesac\necho '{RESULT_LINE}'"
    ));
    let orchestrator = agent.orchestrator();
    orchestrator
        .create_session_with("s1", agent.workspace_path(), false)
        .await
        .expect("create");
    let (tx, _rx) = mpsc::unbounded_channel();

    let code = orchestrator
        .send_message("s1", SendRequest::new("hi"), tx)
        .await
        .expect("send");

    assert_eq!(code, Some(0));
    assert_eq!(agent.invocations().len(), 2);
}

#[tokio::test]
async fn other_failures_are_not_retried() {
    let agent = FakeAgent::new("echo 'rate limited' >&2\nexit 1");
    let orchestrator = agent.orchestrator();
    orchestrator
        .create_session_with("s1", agent.workspace_path(), false)
        .await
        .expect("create");
    let (tx, _rx) = mpsc::unbounded_channel();

    let code = orchestrator
        .send_message("s1", SendRequest::new("hi"), tx)
        .await
        .expect("send");

    assert_eq!(code, Some(1));
    assert_eq!(agent.invocations().len(), 1);
    assert_eq!(orchestrator.is_first_message("s1").await, Some(false));
}

#[tokio::test]
async fn start_new_failures_are_not_retried() {
    let agent = FakeAgent::new(&format!("echo '{RESUME_MISSING}' >&2\nexit 1"));
    let orchestrator = agent.orchestrator();
    orchestrator
        .create_session("s1", agent.workspace_path())
        .await
        .expect("create");
    let (tx, _rx) = mpsc::unbounded_channel();

    let code = orchestrator
        .send_message("s1", SendRequest::new("hi"), tx)
        .await
        .expect("send");

    assert_eq!(code, Some(1));
    assert_eq!(agent.invocations().len(), 1);
}
