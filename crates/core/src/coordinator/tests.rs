use std::sync::{Arc, Mutex};
use std::time::Duration;

use helflinq_model::ErrorKind;
use helflinq_test_client::{PresetFailure, PresetReply, ScriptedClient};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use super::*;
use crate::speech::Speaker;
use crate::store::StoreChange;

const WAIT: Duration = Duration::from_secs(1);

async fn settle(coordinator: &Coordinator) -> Vec<TranscriptEntry> {
    timeout(WAIT, coordinator.wait_idle()).await.unwrap().unwrap();
    coordinator.snapshot().await.unwrap()
}

async fn wait_until(
    coordinator: &Coordinator,
    mut pred: impl FnMut(&[TranscriptEntry]) -> bool,
) -> Vec<TranscriptEntry> {
    timeout(WAIT, async {
        loop {
            let entries = coordinator.snapshot().await.unwrap();
            if pred(&entries) {
                return entries;
            }
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap()
}

fn record_changes(
    builder: CoordinatorBuilder,
) -> (CoordinatorBuilder, Arc<Mutex<Vec<StoreChange>>>) {
    let changes = Arc::new(Mutex::new(vec![]));
    let builder = builder.on_store_change({
        let changes = Arc::clone(&changes);
        move |change, _| changes.lock().unwrap().push(*change)
    });
    (builder, changes)
}

#[derive(Clone, Default)]
struct RecordingSpeaker(Arc<Mutex<Vec<String>>>);

impl RecordingSpeaker {
    fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Speaker for RecordingSpeaker {
    fn speak(&self, text: &str) {
        self.0.lock().unwrap().push(format!("speak {text}"));
    }

    fn stop_speaking(&self) {
        self.0.lock().unwrap().push("stop".to_owned());
    }
}

#[tokio::test]
async fn test_streamed_text_is_trimmed_concatenation() {
    let client = ScriptedClient::streaming();
    client.push_reply(PresetReply::with_fragments(["  Hel", "lo ", "world \n"]));
    let coordinator = CoordinatorBuilder::with_client(client.clone()).build();

    coordinator.submit("Hi").unwrap();
    let entries = settle(&coordinator).await;

    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.send_content(), "Hi");
    assert_eq!(entry.response_text(), "Hello world");
    assert_eq!(entry.response_image(), "scripted");
    assert!(!entry.is_interacting());
    assert_eq!(entry.response_error(), None);
    assert_eq!(client.requests(), ["Hi"]);
}

#[tokio::test]
async fn test_each_fragment_replaces_tail() {
    let client = ScriptedClient::streaming();
    client.push_reply(PresetReply::with_fragments(["a", "b", "c"]));
    let texts = Arc::new(Mutex::new(vec![]));
    let coordinator = CoordinatorBuilder::with_client(client)
        .on_store_change({
            let texts = Arc::clone(&texts);
            move |change, entries| {
                if let StoreChange::Replaced(_) = change {
                    let tail = entries.last().unwrap();
                    texts.lock().unwrap().push((
                        tail.response_text().into_owned(),
                        tail.is_interacting(),
                    ));
                }
            }
        })
        .build();

    coordinator.submit("abc?").unwrap();
    settle(&coordinator).await;

    assert_eq!(
        *texts.lock().unwrap(),
        [
            ("a".to_owned(), true),
            ("ab".to_owned(), true),
            ("abc".to_owned(), true),
            ("abc".to_owned(), false),
        ]
    );
}

#[tokio::test]
async fn test_submit_appends_pending_entry_first() {
    let client = ScriptedClient::streaming();
    let (reply, gate) = PresetReply::default().gated();
    client.push_reply(reply);
    let first = Arc::new(Mutex::new(None));
    let coordinator = CoordinatorBuilder::with_client(client)
        .on_store_change({
            let first = Arc::clone(&first);
            move |change, entries| {
                let mut first = first.lock().unwrap();
                if first.is_none() {
                    *first = Some((*change, entries.to_vec()));
                }
            }
        })
        .build();

    coordinator.submit("X").unwrap();
    let entries = wait_until(&coordinator, |e| !e.is_empty()).await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_interacting());
    assert_eq!(coordinator.stage().await.unwrap(), Stage::Streaming);

    let (change, seen) = first.lock().unwrap().clone().unwrap();
    assert_eq!(change, StoreChange::Appended(seen[0].id()));
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].send_content(), "X");
    assert!(seen[0].is_interacting());
    assert!(seen[0].response_content().is_empty());
    assert_eq!(seen[0].response_error(), None);

    gate.open();
    let entries = settle(&coordinator).await;
    assert!(!entries[0].is_interacting());
    assert_eq!(coordinator.stage().await.unwrap(), Stage::Idle);
}

#[tokio::test]
async fn test_failure_keeps_partial_text() {
    let client = ScriptedClient::streaming();
    client.push_reply(
        PresetReply::with_fragments(["Hel", "lo"]).with_failure(
            PresetFailure::new(ErrorKind::Transport, "connection reset"),
        ),
    );
    let coordinator = CoordinatorBuilder::with_client(client).build();

    coordinator.submit("Hi").unwrap();
    let entries = settle(&coordinator).await;

    let entry = &entries[0];
    assert_eq!(entry.response_text(), "Hello");
    assert_eq!(entry.response_error(), Some("connection reset"));
    assert!(!entry.is_interacting());
}

#[tokio::test]
async fn test_buffered_response_is_written_as_returned() {
    let client = ScriptedClient::buffered();
    client.push_reply(PresetReply::with_fragments([" Fine, ", "thanks. "]));
    let (builder, changes) =
        record_changes(CoordinatorBuilder::with_client(client));
    let coordinator = builder.build();

    coordinator.submit("How are you?").unwrap();
    let entries = settle(&coordinator).await;

    assert_eq!(entries[0].response_text(), " Fine, thanks. ");
    assert!(!entries[0].is_interacting());
    let id = entries[0].id();
    assert_eq!(
        *changes.lock().unwrap(),
        [StoreChange::Appended(id), StoreChange::Replaced(id)]
    );
}

#[tokio::test]
async fn test_buffered_failure_is_recorded() {
    let client = ScriptedClient::buffered();
    client.push_reply(PresetReply::default().with_failure(PresetFailure::new(
        ErrorKind::Provider,
        "quota exceeded",
    )));
    let coordinator = CoordinatorBuilder::with_client(client).build();

    coordinator.submit("Hi").unwrap();
    let entries = settle(&coordinator).await;

    assert!(entries[0].response_content().is_empty());
    assert_eq!(entries[0].response_error(), Some("quota exceeded"));
}

#[tokio::test]
async fn test_retry_replaces_entry() {
    let client = ScriptedClient::streaming();
    client.push_reply(PresetReply::default().with_failure(PresetFailure::new(
        ErrorKind::Provider,
        "overloaded",
    )));
    client.push_reply(PresetReply::with_fragments(["Second ", "time."]));
    let coordinator = CoordinatorBuilder::with_client(client.clone()).build();

    coordinator.submit("Hello").unwrap();
    let entries = settle(&coordinator).await;
    let failed = entries[0].id();
    assert!(entries[0].response_error().is_some());

    coordinator.retry(failed).unwrap();
    let entries = settle(&coordinator).await;

    assert_eq!(entries.len(), 1);
    assert_ne!(entries[0].id(), failed);
    assert_eq!(entries[0].send_content(), "Hello");
    assert_eq!(entries[0].response_text(), "Second time.");
    assert_eq!(entries[0].response_error(), None);
    assert_eq!(client.requests(), ["Hello", "Hello"]);
}

#[tokio::test]
async fn test_retry_unknown_entry_is_noop() {
    let client = ScriptedClient::streaming();
    client.push_reply(PresetReply::with_fragments(["ok"]));
    let (builder, changes) =
        record_changes(CoordinatorBuilder::with_client(client.clone()));
    let coordinator = builder.build();

    coordinator.submit("Hi").unwrap();
    let before = settle(&coordinator).await;
    let changes_before = changes.lock().unwrap().len();

    coordinator.retry(EntryId::from_raw(42)).unwrap();
    let after = settle(&coordinator).await;

    assert_eq!(before, after);
    assert_eq!(changes.lock().unwrap().len(), changes_before);
    assert_eq!(client.requests(), ["Hi"]);
}

#[tokio::test]
async fn test_retry_of_entry_in_flight_is_noop() {
    let client = ScriptedClient::streaming();
    let (reply, gate) = PresetReply::with_fragments(["partial"]).gated();
    client.push_reply(reply);
    let coordinator = CoordinatorBuilder::with_client(client.clone()).build();

    coordinator.submit("Hi").unwrap();
    let entries = wait_until(&coordinator, |e| !e.is_empty()).await;
    coordinator.retry(entries[0].id()).unwrap();
    gate.open();
    let entries = settle(&coordinator).await;

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].response_text(), "partial");
    assert_eq!(client.requests(), ["Hi"]);
}

#[tokio::test]
async fn test_cancel_without_exchange_is_noop() {
    let client = ScriptedClient::streaming();
    client.push_reply(PresetReply::with_fragments(["done"]));
    let (builder, changes) =
        record_changes(CoordinatorBuilder::with_client(client));
    let coordinator = builder.build();

    coordinator.cancel().unwrap();
    assert!(settle(&coordinator).await.is_empty());
    assert!(changes.lock().unwrap().is_empty());

    coordinator.submit("Hi").unwrap();
    let before = settle(&coordinator).await;
    coordinator.cancel().unwrap();
    let after = settle(&coordinator).await;
    assert_eq!(before, after);
    assert_eq!(after[0].response_text(), "done");
}

#[tokio::test]
async fn test_cancel_streaming_keeps_partial_text() {
    let client = ScriptedClient::streaming();
    let (reply, _gate) = PresetReply::with_fragments(["Once ", "upon "]).gated();
    client.push_reply(reply);
    let speaker = RecordingSpeaker::default();
    let coordinator = CoordinatorBuilder::with_client(client)
        .with_speaker(speaker.clone())
        .build();

    coordinator.submit("Tell me a story").unwrap();
    wait_until(&coordinator, |e| {
        e.first().is_some_and(|e| e.response_text() == "Once upon")
    })
    .await;
    coordinator.cancel().unwrap();
    let entries = settle(&coordinator).await;

    let entry = &entries[0];
    assert_eq!(entry.response_text(), "Once upon");
    assert_eq!(entry.response_error(), None);
    assert!(!entry.is_interacting());
    assert!(speaker.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_buffered_discards_response() {
    let client = ScriptedClient::buffered();
    let (reply, gate) = PresetReply::with_fragments(["too late"]).gated();
    client.push_reply(reply);
    let coordinator = CoordinatorBuilder::with_client(client).build();

    coordinator.submit("Hi").unwrap();
    wait_until(&coordinator, |e| !e.is_empty()).await;
    assert_eq!(coordinator.stage().await.unwrap(), Stage::Waiting);

    coordinator.cancel().unwrap();
    // The request has to come back before the exchange notices.
    assert_eq!(coordinator.stage().await.unwrap(), Stage::Waiting);
    gate.open();
    let entries = settle(&coordinator).await;

    assert!(entries[0].response_content().is_empty());
    assert_eq!(entries[0].response_error(), None);
    assert!(!entries[0].is_interacting());
}

#[tokio::test]
async fn test_clear_all_abandons_exchange() {
    let client = ScriptedClient::streaming();
    client.push_reply(PresetReply::with_fragments(["first"]));
    let (reply, gate) = PresetReply::with_fragments(["late"]).gated();
    client.push_reply(reply);
    let speaker = RecordingSpeaker::default();
    let (idle_tx, idle_rx) = watch::channel(0u32);
    let coordinator = CoordinatorBuilder::with_client(client.clone())
        .with_speaker(speaker.clone())
        .on_idle(move || idle_tx.send_modify(|n| *n += 1))
        .build();

    coordinator.submit("one").unwrap();
    settle(&coordinator).await;
    coordinator.submit("two").unwrap();
    coordinator.submit("three").unwrap();
    wait_until(&coordinator, |e| {
        e.last().is_some_and(|e| e.response_text() == "late")
    })
    .await;
    assert_eq!(coordinator.queued_inputs().await.unwrap(), 1);

    coordinator.clear_all().unwrap();
    assert!(coordinator.snapshot().await.unwrap().is_empty());
    assert_eq!(coordinator.queued_inputs().await.unwrap(), 0);
    assert_eq!(coordinator.stage().await.unwrap(), Stage::Idle);
    assert_eq!(client.purge_count(), 1);
    assert_eq!(speaker.calls(), ["stop", "speak first", "stop"]);
    assert_eq!(*idle_rx.borrow(), 2);

    // Whatever the abandoned exchange still does must not show up.
    gate.open();
    sleep(Duration::from_millis(20)).await;
    assert!(settle(&coordinator).await.is_empty());
    assert_eq!(client.requests(), ["one", "two"]);
}

#[tokio::test]
async fn test_clear_all_on_empty_store() {
    let client = ScriptedClient::streaming();
    let (builder, changes) =
        record_changes(CoordinatorBuilder::with_client(client.clone()));
    let coordinator = builder.build();

    coordinator.clear_all().unwrap();
    assert!(settle(&coordinator).await.is_empty());
    assert!(changes.lock().unwrap().is_empty());
    assert_eq!(client.purge_count(), 1);
}

#[tokio::test]
async fn test_switch_client() {
    let streaming = ScriptedClient::streaming();
    let (reply, gate) = PresetReply::with_fragments(["old"]).gated();
    streaming.push_reply(reply);
    let buffered = ScriptedClient::buffered();
    buffered.push_reply(PresetReply::with_fragments(["new"]));
    let coordinator = CoordinatorBuilder::with_client(streaming.clone()).build();

    coordinator.submit("Hi").unwrap();
    wait_until(&coordinator, |e| !e.is_empty()).await;

    coordinator
        .switch_client(AnyClient::new(buffered.clone()))
        .unwrap();
    assert!(coordinator.snapshot().await.unwrap().is_empty());
    let provider = coordinator.provider().await.unwrap();
    assert_eq!(provider.display_name, "Scripted Buffer");
    gate.open();

    coordinator.submit("Hi again").unwrap();
    let entries = settle(&coordinator).await;

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].send_content(), "Hi again");
    assert_eq!(entries[0].response_text(), "new");
    assert_eq!(buffered.requests(), ["Hi again"]);
    // Switching does not purge the old client's history.
    assert_eq!(streaming.purge_count(), 0);
}

#[tokio::test]
async fn test_overlapping_submits_are_queued() {
    let client = ScriptedClient::streaming();
    for text in ["A", "B", "C"] {
        client.push_reply(PresetReply::with_fragments([text, "!"]));
    }
    let max_interacting = Arc::new(Mutex::new(0usize));
    let (idle_tx, mut idle_rx) = watch::channel(false);
    let coordinator = CoordinatorBuilder::with_client(client.clone())
        .on_store_change({
            let max_interacting = Arc::clone(&max_interacting);
            move |_, entries| {
                let n = entries.iter().filter(|e| e.is_interacting()).count();
                let mut max = max_interacting.lock().unwrap();
                *max = (*max).max(n);
            }
        })
        .on_idle(move || {
            idle_tx.send(true).unwrap();
        })
        .build();

    coordinator.submit("a").unwrap();
    coordinator.submit("b").unwrap();
    coordinator.submit("c").unwrap();

    timeout(WAIT, idle_rx.wait_for(|v| *v))
        .await
        .unwrap()
        .unwrap();
    let entries = coordinator.snapshot().await.unwrap();

    assert_eq!(*max_interacting.lock().unwrap(), 1);
    assert_eq!(client.requests(), ["a", "b", "c"]);
    let responses: Vec<_> = entries
        .iter()
        .map(|e| (e.send_content().to_owned(), e.response_text().into_owned()))
        .collect();
    assert_eq!(
        responses,
        [
            ("a".to_owned(), "A!".to_owned()),
            ("b".to_owned(), "B!".to_owned()),
            ("c".to_owned(), "C!".to_owned()),
        ]
    );
    assert!(entries.windows(2).all(|w| w[0].id() < w[1].id()));
}

#[tokio::test]
async fn test_retry_policy_recovers_from_transport_errors() {
    let client = ScriptedClient::streaming();
    client.push_reply(
        PresetReply::with_fragments(["made it"]).with_initiation_failures(2),
    );
    let policy = RetryPolicy::with_max_retries(3)
        .with_initial_interval(Duration::from_millis(1))
        .with_max_interval(Duration::from_millis(2));
    let coordinator = CoordinatorBuilder::with_client(client.clone())
        .with_retry_policy(policy)
        .build();

    coordinator.submit("Hi").unwrap();
    let entries = settle(&coordinator).await;

    assert_eq!(entries[0].response_text(), "made it");
    assert_eq!(entries[0].response_error(), None);
    assert_eq!(client.requests(), ["Hi", "Hi", "Hi"]);
}

#[tokio::test]
async fn test_initiation_failure_without_retry_policy() {
    let client = ScriptedClient::buffered();
    client.push_reply(
        PresetReply::with_fragments(["never"]).with_initiation_failures(1),
    );
    let coordinator = CoordinatorBuilder::with_client(client.clone()).build();

    coordinator.submit("Hi").unwrap();
    let entries = settle(&coordinator).await;

    assert_eq!(entries[0].response_error(), Some("connection refused"));
    assert_eq!(client.requests(), ["Hi"]);
}

#[tokio::test]
async fn test_cancel_during_retry_wait_settles_promptly() {
    let client = ScriptedClient::buffered();
    client.push_reply(
        PresetReply::with_fragments(["never"]).with_initiation_failures(10),
    );
    let policy = RetryPolicy::with_max_retries(5)
        .with_initial_interval(Duration::from_secs(3))
        .with_max_interval(Duration::from_secs(8));
    let coordinator = CoordinatorBuilder::with_client(client.clone())
        .with_retry_policy(policy)
        .build();

    coordinator.submit("Hi").unwrap();
    timeout(WAIT, async {
        while client.requests().is_empty() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    coordinator.cancel().unwrap();
    let entries = settle(&coordinator).await;

    assert!(!entries[0].is_interacting());
    assert_eq!(entries[0].response_error(), None);
    assert!(entries[0].response_content().is_empty());
    assert_eq!(client.requests(), ["Hi"]);
}

#[tokio::test]
async fn test_speaks_settled_response() {
    let client = ScriptedClient::streaming();
    client.push_reply(PresetReply::with_fragments(["Hello ", "there"]));
    client.push_reply(PresetReply::default());
    let speaker = RecordingSpeaker::default();
    let coordinator = CoordinatorBuilder::with_client(client)
        .with_speaker(speaker.clone())
        .build();

    coordinator.submit("Hi").unwrap();
    settle(&coordinator).await;
    assert_eq!(speaker.calls(), ["stop", "speak Hello there"]);

    // Nothing to say for an empty response.
    coordinator.submit("Silence?").unwrap();
    settle(&coordinator).await;
    assert_eq!(speaker.calls().len(), 2);
}

#[tokio::test]
async fn test_shutdown() {
    let coordinator =
        CoordinatorBuilder::with_client(ScriptedClient::streaming()).build();
    coordinator.shutdown();
    timeout(WAIT, async {
        while coordinator.submit("Hi").is_ok() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    assert!(coordinator.snapshot().await.is_err());
}
