//! End-to-end behavior of the bridge through its public API.
//!
//! Each test drives a session the way a binding would: open a handle,
//! dispatch from a caller context, await the shaped result.

use std::sync::Arc;
use std::time::Duration;

use cloudkit_bridge::provider::{CallbackMode, MockResponse};
use cloudkit_bridge::{
    BridgeConfig, BridgeError, CallerContext, DisabledProvider, Dispatcher, MockProvider,
    OperationKind, OperationRequest, SaveResult, SessionHandle,
};

fn mock_session(mock: &MockProvider) -> (SessionHandle, Dispatcher) {
    let handle = SessionHandle::init("test-container", Arc::new(mock.clone())).unwrap();
    (handle, Dispatcher::new(CallerContext::new("contract")))
}

// ============================================================================
// Failing and degraded providers
// ============================================================================

#[tokio::test]
async fn failing_provider_reports_unsuccessful_save() {
    let mock = MockProvider::failing("provider unavailable");
    let (handle, dispatcher) = mock_session(&mock);

    let result = dispatcher
        .save_note(&handle, r#"{"id":"n-1","text":"hello"}"#)
        .unwrap()
        .await;
    assert_eq!(
        result,
        SaveResult {
            success: false,
            error: Some("provider unavailable".to_string()),
        }
    );

    // The raw completion carries the same message as a provider failure.
    let raw = dispatcher
        .dispatch(
            &handle,
            OperationRequest::new(OperationKind::SaveNote, r#"{"id":"n-2"}"#),
        )
        .unwrap()
        .await;
    assert_eq!(
        raw,
        Err(BridgeError::ProviderFailure("provider unavailable".to_string()))
    );
}

#[tokio::test]
async fn degraded_mode_fetches_are_empty() {
    let handle = SessionHandle::from_config("test-container", &BridgeConfig::default()).unwrap();
    let dispatcher = Dispatcher::new(CallerContext::new("contract"));

    let history = dispatcher.fetch_all_history(&handle).unwrap().await;
    assert_eq!(history, Ok(Vec::new()));

    let notes = dispatcher.fetch_all_notes(&handle).unwrap().await;
    assert_eq!(notes, Ok(Vec::new()));

    let settings = dispatcher.fetch_settings(&handle).unwrap().await;
    assert_eq!(settings, Ok(None));
}

#[tokio::test]
async fn degraded_mode_saves_and_deletes_explain_themselves() {
    let handle = SessionHandle::init("test-container", Arc::new(DisabledProvider::default()))
        .unwrap();
    let dispatcher = Dispatcher::new(CallerContext::new("contract"));
    let expected = SaveResult::failed("CloudKit not initialized - requires Apple Developer setup");

    let results = vec![
        dispatcher
            .save_settings(&handle, r#"{"theme":"dark"}"#)
            .unwrap()
            .await,
        dispatcher
            .save_history_item(&handle, r#"{"id":"h-1"}"#)
            .unwrap()
            .await,
        dispatcher.delete_history_item(&handle, "h-1").unwrap().await,
        dispatcher.save_note(&handle, r#"{"id":"n-1"}"#).unwrap().await,
        dispatcher.delete_note(&handle, "n-1").unwrap().await,
    ];
    for result in results {
        assert_eq!(result, expected);
    }
}

#[tokio::test]
async fn configured_degraded_message_is_used() {
    let config =
        BridgeConfig::from_toml_str("[provider]\nunavailable_message = \"sync disabled\"\n")
            .unwrap();
    let handle = SessionHandle::from_config("test-container", &config).unwrap();
    let dispatcher = Dispatcher::from_config(CallerContext::new("contract"), &config);

    let result = dispatcher.delete_note(&handle, "n-1").unwrap().await;
    assert_eq!(result, SaveResult::failed("sync disabled"));
}

// ============================================================================
// Synchronous rejections
// ============================================================================

#[tokio::test]
async fn destroyed_handle_rejects_every_operation() {
    let mock = MockProvider::new();
    let (handle, dispatcher) = mock_session(&mock);
    assert!(handle.shutdown());

    for kind in OperationKind::ALL {
        let request = match kind.payload_rule() {
            cloudkit_bridge::PayloadRule::Record => OperationRequest::new(kind, "{}"),
            cloudkit_bridge::PayloadRule::Identifier => OperationRequest::new(kind, "id-1"),
            cloudkit_bridge::PayloadRule::None => OperationRequest::bare(kind),
        };
        let err = dispatcher.dispatch(&handle, request).unwrap_err();
        assert_eq!(err, BridgeError::InvalidHandle(handle.id()));
    }
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn empty_delete_identifier_is_invalid_argument() {
    let mock = MockProvider::new();
    let (handle, dispatcher) = mock_session(&mock);

    let err = dispatcher.delete_history_item(&handle, "").unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)));
    assert!(mock.calls().is_empty());
}

// ============================================================================
// Callback counts
// ============================================================================

#[tokio::test]
async fn fetch_all_on_empty_store_is_empty() {
    let mock = MockProvider::new();
    let (handle, dispatcher) = mock_session(&mock);

    let notes = dispatcher.fetch_all_notes(&handle).unwrap().await.unwrap();
    assert!(notes.is_empty());
}

#[tokio::test]
async fn duplicate_callback_resolves_once() {
    let mock = MockProvider::new();
    mock.set_callback_mode(CallbackMode::Twice);
    mock.queue_response(
        OperationKind::FetchAllNotes,
        MockResponse::Success(Some(r#"[{"id":"a"},{"id":"b"}]"#.to_string())),
    );
    let (handle, dispatcher) = mock_session(&mock);

    let notes = dispatcher.fetch_all_notes(&handle).unwrap().await.unwrap();
    assert_eq!(notes, vec![r#"{"id":"a"}"#, r#"{"id":"b"}"#]);
    assert_eq!(dispatcher.context().pending_count(), 0);
}

#[tokio::test]
async fn silent_provider_is_bounded_by_timeout() {
    let mock = MockProvider::new();
    mock.set_callback_mode(CallbackMode::Hold);
    let config =
        BridgeConfig::from_toml_str("[relay]\ncompletion_timeout_ms = 25\n").unwrap();
    let handle = SessionHandle::init("test-container", Arc::new(mock.clone())).unwrap();
    let dispatcher = Dispatcher::from_config(CallerContext::new("contract"), &config);

    let result = dispatcher.save_note(&handle, r#"{"id":"n-1"}"#).unwrap().await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("saveNote timed out after 25 ms")
    );
}

// ============================================================================
// Teardown and ordering
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn teardown_with_requests_in_flight() {
    let mock = MockProvider::new();
    mock.set_callback_mode(CallbackMode::Hold);
    let (handle, dispatcher) = mock_session(&mock);

    let in_flight: Vec<_> = (0..10)
        .map(|i| {
            dispatcher
                .save_history_item(&handle, format!(r#"{{"id":"h-{}"}}"#, i))
                .unwrap()
        })
        .collect();
    assert_eq!(dispatcher.context().pending_count(), 10);

    assert_eq!(dispatcher.context().teardown(), 10);

    // Late callbacks from provider threads are discarded without crashing.
    let workers: Vec<_> = mock
        .take_held()
        .into_iter()
        .map(|(_, completion)| std::thread::spawn(move || completion.succeed(None)))
        .collect();
    for worker in workers {
        assert!(!worker.join().unwrap());
    }

    for completion in in_flight {
        assert_eq!(
            completion.await,
            SaveResult::failed("cancelled: caller context torn down")
        );
    }

    // The context accepts nothing new.
    assert_eq!(
        dispatcher.fetch_all_history(&handle).unwrap_err(),
        BridgeError::Cancelled
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn teardown_races_callbacks_from_provider_threads() {
    const REQUESTS: usize = 16;

    let mock = MockProvider::new();
    mock.set_callback_mode(CallbackMode::Hold);
    let (handle, dispatcher) = mock_session(&mock);

    let pending: Vec<_> = (0..REQUESTS)
        .map(|i| {
            dispatcher
                .dispatch(
                    &handle,
                    OperationRequest::new(
                        OperationKind::SaveHistoryItem,
                        format!(r#"{{"id":"h-{}"}}"#, i),
                    ),
                )
                .unwrap()
        })
        .collect();

    let start = Arc::new(std::sync::Barrier::new(REQUESTS + 1));
    let workers: Vec<_> = mock
        .take_held()
        .into_iter()
        .map(|(_, completion)| {
            let start = Arc::clone(&start);
            std::thread::spawn(move || {
                start.wait();
                let delivered = completion.succeed(None);
                // Whatever happened, a second answer is always discarded.
                assert!(!completion.succeed(None));
                delivered
            })
        })
        .collect();

    start.wait();
    dispatcher.context().teardown();

    // Each request settles exactly one way: the callback won or teardown did.
    for (completion, worker) in pending.into_iter().zip(workers) {
        let delivered = worker.join().unwrap();
        let expected = if delivered {
            Ok(None)
        } else {
            Err(BridgeError::Cancelled)
        };
        assert_eq!(completion.await, expected);
    }
    assert_eq!(dispatcher.context().pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completions_arrive_out_of_order_across_threads() {
    let mock = MockProvider::new();
    mock.set_callback_mode(CallbackMode::Hold);
    let (handle, dispatcher) = mock_session(&mock);

    let pending: Vec<_> = (0..6)
        .map(|i| {
            dispatcher
                .dispatch(
                    &handle,
                    OperationRequest::new(
                        OperationKind::SaveNote,
                        format!(r#"{{"id":"n-{}"}}"#, i),
                    ),
                )
                .unwrap()
        })
        .collect();

    // Answer in reverse order, each from its own thread, with a stagger.
    let held = mock.take_held();
    let workers: Vec<_> = held
        .into_iter()
        .rev()
        .enumerate()
        .map(|(delay, (_, completion))| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay as u64 * 2));
                completion.succeed(None)
            })
        })
        .collect();

    for completion in pending {
        assert_eq!(completion.await, Ok(None));
    }
    for worker in workers {
        assert!(worker.join().unwrap());
    }
    assert_eq!(dispatcher.context().pending_count(), 0);
}

#[tokio::test]
async fn session_outlives_completions_after_drop() {
    let mock = MockProvider::new();
    mock.set_callback_mode(CallbackMode::Hold);
    let (handle, dispatcher) = mock_session(&mock);

    let pending = dispatcher.fetch_all_notes(&handle).unwrap();
    drop(handle);

    let held = mock.take_held();
    assert!(held[0].1.succeed(Some(r#"[{"id":"kept"}]"#)));
    assert_eq!(pending.await, Ok(vec![r#"{"id":"kept"}"#.to_string()]));
}
