//! Integration tests for the one-process-per-session guarantee.

use agent_conduit::{AppError, SendRequest};
use tokio::sync::mpsc;

use super::test_helpers::{wait_until_busy, FakeAgent, RESULT_LINE};

#[tokio::test]
async fn concurrent_sends_admit_exactly_one() {
    let agent = FakeAgent::new(&format!("sleep 1\necho '{RESULT_LINE}'"));
    let orchestrator = agent.orchestrator();
    orchestrator
        .create_session("s1", agent.workspace_path())
        .await
        .expect("create");
    let (tx_a, _rx_a) = mpsc::unbounded_channel();
    let (tx_b, _rx_b) = mpsc::unbounded_channel();

    let (a, b) = tokio::join!(
        orchestrator.send_message("s1", SendRequest::new("a"), tx_a),
        orchestrator.send_message("s1", SendRequest::new("b"), tx_b),
    );

    let results = [a, b];
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::Busy(_))))
        .count();
    let completed = results
        .iter()
        .filter(|r| matches!(r, Ok(Some(0))))
        .count();
    assert_eq!((busy, completed), (1, 1), "results: {results:?}");
    assert_eq!(agent.invocations().len(), 1);
}

#[tokio::test]
async fn send_while_running_is_busy_then_allowed_after_exit() {
    let agent = FakeAgent::new(&format!("sleep 1\necho '{RESULT_LINE}'"));
    let orchestrator = agent.orchestrator();
    orchestrator
        .create_session("s1", agent.workspace_path())
        .await
        .expect("create");

    let background = orchestrator.clone();
    let (tx, _rx) = mpsc::unbounded_channel();
    let first = tokio::spawn(async move {
        background
            .send_message("s1", SendRequest::new("first"), tx)
            .await
    });
    wait_until_busy(&orchestrator, "s1").await;
    assert_eq!(orchestrator.get_busy_sessions().await, vec!["s1".to_owned()]);

    let (tx, _rx) = mpsc::unbounded_channel();
    let rejected = orchestrator
        .send_message("s1", SendRequest::new("second"), tx)
        .await;
    assert!(matches!(rejected, Err(AppError::Busy(_))));

    let code = first.await.expect("join").expect("first send");
    assert_eq!(code, Some(0));
    assert!(!orchestrator.is_session_busy("s1").await);

    let (tx, _rx) = mpsc::unbounded_channel();
    let third = orchestrator
        .send_message("s1", SendRequest::new("third"), tx)
        .await
        .expect("third send");
    assert_eq!(third, Some(0));
    assert_eq!(agent.invocations().len(), 2);
}

#[tokio::test]
async fn sessions_run_independently() {
    let agent = FakeAgent::new(&format!("sleep 1\necho '{RESULT_LINE}'"));
    let orchestrator = agent.orchestrator();
    for id in ["s2", "s1"] {
        orchestrator
            .create_session(id, agent.workspace_path())
            .await
            .expect("create");
    }

    let mut tasks = Vec::new();
    for id in ["s2", "s1"] {
        let orchestrator = orchestrator.clone();
        let (tx, _rx) = mpsc::unbounded_channel();
        tasks.push(tokio::spawn(async move {
            orchestrator.send_message(id, SendRequest::new("go"), tx).await
        }));
    }
    wait_until_busy(&orchestrator, "s1").await;
    wait_until_busy(&orchestrator, "s2").await;

    assert_eq!(
        orchestrator.get_busy_sessions().await,
        vec!["s1".to_owned(), "s2".to_owned()]
    );

    for task in tasks {
        assert_eq!(task.await.expect("join").expect("send"), Some(0));
    }
    assert!(orchestrator.get_busy_sessions().await.is_empty());
}
