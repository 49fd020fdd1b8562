//! Session replacement and metrics export
//!
//! These tests verify:
//! 1. `restart` fully stops the old session before the new one opens
//! 2. The replacement uses its own subscription parameters
//! 3. Session metrics follow lifecycle events to the terminal state

use feedline_core::core::{SessionError, SubscriptionKind, SubscriptionParams, TransportError};
use feedline_core::monitoring::SessionMetrics;
use feedline_core::session::{restart, Session, SessionState};
use feedline_core::testing::{test_settings, ScriptStep, ScriptedOpen, ScriptedTransport};
use serde_json::json;
use std::sync::Arc;

mod restart_session {
    use super::*;

    /// Test: old and new subscriptions never coexist
    #[tokio::test(start_paused = true)]
    async fn test_restart_without_overlap() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedOpen::Stream(vec![ScriptStep::Message(json!("old")), ScriptStep::Hang]),
            ScriptedOpen::Stream(vec![ScriptStep::Message(json!("new")), ScriptStep::Hang]),
        ]));

        let old = Session::new(test_settings(3), transport.clone());
        let mut old_messages = old.start().unwrap();
        assert_eq!(old_messages.recv().await.unwrap().payload, json!("old"));

        let mut settings = test_settings(3);
        settings.params = SubscriptionParams::new(SubscriptionKind::Blocks)
            .with_filters(json!({ "include_transactions": false }));
        let replacement = Session::new(settings, transport.clone());

        let (current, mut messages) = restart(old, replacement).await.unwrap();
        assert_eq!(messages.recv().await.unwrap().payload, json!("new"));
        assert!(old_messages.recv().await.is_none());

        assert_eq!(transport.max_live(), 1);
        let kinds: Vec<_> = transport.open_params().iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![SubscriptionKind::Slots, SubscriptionKind::Blocks]);
        assert_eq!(
            transport.open_params()[1].filters["include_transactions"],
            json!(false)
        );

        current.stop().await;
        assert_eq!(transport.live(), 0);
    }

    /// Test: restarting onto an already running session is refused after the old one stops
    #[tokio::test(start_paused = true)]
    async fn test_restart_onto_started_session() {
        let transport = Arc::new(ScriptedTransport::with_fallback(vec![], ScriptedOpen::Hang));
        let old = Session::new(test_settings(3), transport.clone());
        let observer = old.observer();
        let _old_messages = old.start().unwrap();

        let replacement = Session::new(test_settings(3), transport.clone());
        let _running = replacement.start().unwrap();

        let result = restart(old, replacement).await;
        assert_eq!(result.err(), Some(SessionError::AlreadyStarted));
        assert_eq!(observer.state(), SessionState::Stopped);
    }
}

mod metrics {
    use super::*;
    use feedline_core::session::SessionObserver;

    fn counter(metrics: &SessionMetrics, state: SessionState) -> u64 {
        metrics
            .transitions_total
            .with_label_values(&[state.name()])
            .get()
    }

    async fn run_to_end(transport: ScriptedTransport) -> (Arc<SessionMetrics>, SessionObserver) {
        let session = Session::new(test_settings(3), Arc::new(transport));
        let metrics = Arc::new(SessionMetrics::new().unwrap());
        let follower = metrics.clone().follow(session.observer());

        let mut messages = session.start().unwrap();
        while messages.recv().await.is_some() {}
        session.wait_terminal().await;
        follower.await.unwrap();
        (metrics, session.observer())
    }

    /// Test: gauges, counters and the backoff histogram after a full run
    #[tokio::test(start_paused = true)]
    async fn test_metrics_follow_session() {
        let (metrics, observer) = run_to_end(ScriptedTransport::new(vec![
            ScriptedOpen::Fail(TransportError::unavailable("connection refused")),
            ScriptedOpen::Stream(vec![
                ScriptStep::Message(json!(1)),
                ScriptStep::Message(json!(2)),
                ScriptStep::End,
            ]),
        ]))
        .await;

        assert_eq!(observer.state(), SessionState::Stopped);
        assert_eq!(metrics.state.get(), SessionState::Stopped.code());
        assert_eq!(metrics.attempt.get(), 0);
        assert_eq!(metrics.messages_total.get(), 2);
        assert_eq!(metrics.subscriptions_opened_total.get(), 1);
        assert_eq!(metrics.backoff_seconds.get_sample_count(), 1);
        assert_eq!(counter(&metrics, SessionState::Connecting), 2);
        assert_eq!(counter(&metrics, SessionState::Backoff), 1);
        assert_eq!(counter(&metrics, SessionState::Stopped), 1);
        assert!(!metrics.is_streaming());
    }

    /// Test: a failed session is reported as failed
    #[tokio::test(start_paused = true)]
    async fn test_metrics_on_failure() {
        let (metrics, _) = run_to_end(ScriptedTransport::always_failing(
            TransportError::unauthenticated("bad token"),
        ))
        .await;

        assert_eq!(metrics.state.get(), SessionState::Failed.code());
        assert_eq!(counter(&metrics, SessionState::Failed), 1);
        assert_eq!(counter(&metrics, SessionState::Backoff), 0);
        assert!(metrics.encode().unwrap().contains("feedline_session_state 4"));
    }
}
