//! Facade behaviour against the in-process socket

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_test::{assert_pending, task};
use uuid::Uuid;
use ws_facade::socket::memory::{CloseCall, MemoryConnector, MemoryPeer};
use ws_facade::socket::{SocketError, MAX_CLOSE_REASON_BYTES};
use ws_facade::{
    CloseError, CloseInfo, Connection, EventHandler, EventHandlers, OpenError, ReadyState,
    SendError, WebSocketClient,
};

const URL: &str = "wss://memory.test/feed";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    OpenCompleted,
    Message(Uuid, String),
    Close(CloseInfo),
}

/// Handlers that record each invocation, in invocation order
fn recording_handlers() -> (
    EventHandlers,
    mpsc::UnboundedSender<Event>,
    mpsc::UnboundedReceiver<Event>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let message_tx = tx.clone();
    let close_tx = tx.clone();
    let handlers = EventHandlers::new()
        .on_message(move |connection: Connection, payload| {
            let _ = message_tx.send(Event::Message(connection.id(), payload));
            async {}
        })
        .on_close(move |info| {
            let _ = close_tx.send(Event::Close(info));
            async {}
        });
    (handlers, tx, rx)
}

fn setup() -> (Arc<MemoryConnector>, WebSocketClient) {
    let connector = Arc::new(MemoryConnector::new());
    let client = WebSocketClient::with_connector(connector.clone());
    (connector, client)
}

async fn wait_for_peer(connector: &MemoryConnector) -> MemoryPeer {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Some(peer) = connector.take_peer() {
                return peer;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("socket was never constructed")
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<Event>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "unexpected event");
}

/// Open a connection whose peer completes the handshake
async fn open_connection(
    client: &WebSocketClient,
    connector: &MemoryConnector,
    handlers: EventHandlers,
) -> (Connection, MemoryPeer) {
    let (connection, peer) = tokio::join!(client.open(URL, handlers), async {
        let peer = wait_for_peer(connector).await;
        assert!(peer.open());
        peer
    });
    (connection.expect("open failed"), peer)
}

#[tokio::test]
async fn test_open_security_rejection() {
    let (connector, client) = setup();
    connector.reject_with(SocketError::Security("insecure scheme".to_string()));

    let (handlers, _tx, mut rx) = recording_handlers();
    let result = client.open(URL, handlers).await;

    assert_eq!(
        result.unwrap_err(),
        OpenError::BadSecurity("insecure scheme".to_string())
    );
    assert_eq!(connector.connect_count(), 1);
    assert_no_event(&mut rx).await;
}

#[tokio::test]
async fn test_open_argument_rejection() {
    let (connector, client) = setup();

    for error in [
        SocketError::Syntax("bad url".to_string()),
        SocketError::InvalidAccess("bad port".to_string()),
    ] {
        connector.reject_with(error);
        let result = client.open(URL, EventHandlers::new()).await;
        assert!(matches!(result, Err(OpenError::BadArgs(_))));
    }
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test]
async fn test_open_message_close_ordering() {
    let (connector, client) = setup();
    let (handlers, tx, mut rx) = recording_handlers();

    let (connection, peer) = tokio::join!(client.open(URL, handlers), async {
        let peer = wait_for_peer(&connector).await;
        peer.open();
        peer.message("hi");
        peer.close(1000, "", true);
        peer
    });
    let connection = connection.unwrap();
    tx.send(Event::OpenCompleted).unwrap();

    assert_eq!(next_event(&mut rx).await, Event::OpenCompleted);
    assert_eq!(
        next_event(&mut rx).await,
        Event::Message(connection.id(), "hi".to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        Event::Close(CloseInfo::new(1000, "", true))
    );
    assert_no_event(&mut rx).await;
    assert_eq!(peer.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn test_messages_delivered_in_order() {
    let (connector, client) = setup();
    let (handlers, _tx, mut rx) = recording_handlers();
    let (connection, peer) = open_connection(&client, &connector, handlers).await;

    for n in 0..5 {
        peer.message(format!("msg-{}", n));
    }
    for n in 0..5 {
        assert_eq!(
            next_event(&mut rx).await,
            Event::Message(connection.id(), format!("msg-{}", n))
        );
    }
}

#[tokio::test]
async fn test_open_fails_when_closed_before_ready() {
    let (connector, client) = setup();
    let (handlers, _tx, mut rx) = recording_handlers();

    let (result, _peer) = tokio::join!(client.open(URL, handlers), async {
        let peer = wait_for_peer(&connector).await;
        peer.fail();
        peer
    });

    assert_eq!(result.unwrap_err(), OpenError::Closed(CloseInfo::abnormal()));
    assert_eq!(next_event(&mut rx).await, Event::Close(CloseInfo::abnormal()));
    assert_no_event(&mut rx).await;
}

#[tokio::test]
async fn test_send_success() {
    let (connector, client) = setup();
    let (connection, peer) = open_connection(&client, &connector, EventHandlers::new()).await;

    assert_eq!(connection.send("hello").await, Ok(()));
    assert_eq!(connection.send("world").await, Ok(()));
    assert_eq!(peer.sent(), vec!["hello".to_string(), "world".to_string()]);
}

#[tokio::test]
async fn test_send_not_open_skips_transmission() {
    let (connector, client) = setup();
    let (connection, peer) = open_connection(&client, &connector, EventHandlers::new()).await;

    peer.close(1001, "going away", true);
    assert_eq!(connection.ready_state(), ReadyState::Closed);

    assert_eq!(connection.send("late").await, Err(SendError::NotOpen));
    assert_eq!(peer.send_attempts(), 0);
    assert!(peer.sent().is_empty());
}

#[tokio::test]
async fn test_send_transmission_error_is_bad_string() {
    let (connector, client) = setup();
    let (connection, peer) = open_connection(&client, &connector, EventHandlers::new()).await;

    peer.fail_sends(true);
    assert_eq!(connection.send("rejected").await, Err(SendError::BadString));
    assert_eq!(peer.send_attempts(), 1);

    peer.fail_sends(false);
    assert_eq!(connection.send("accepted").await, Ok(()));
    assert_eq!(peer.sent(), vec!["accepted".to_string()]);
}

#[tokio::test]
async fn test_close_fires_on_close_once() {
    let (connector, client) = setup();
    let (handlers, _tx, mut rx) = recording_handlers();
    let (connection, peer) = open_connection(&client, &connector, handlers).await;

    assert_eq!(connection.close(4000, "done").await, Ok(()));
    assert_eq!(
        next_event(&mut rx).await,
        Event::Close(CloseInfo::new(4000, "done", true))
    );

    // Neither a second close nor a late peer close produces another event
    assert_eq!(connection.close(1000, "").await, Ok(()));
    assert!(!peer.close(1000, "", true));
    assert_no_event(&mut rx).await;
    assert_eq!(connection.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn test_close_bad_reason() {
    let (connector, client) = setup();
    let (handlers, _tx, mut rx) = recording_handlers();
    let (connection, _peer) = open_connection(&client, &connector, handlers).await;

    let reason = "r".repeat(MAX_CLOSE_REASON_BYTES + 1);
    let result = connection.close(1000, &reason).await;

    assert!(matches!(result, Err(CloseError::BadReason(_))));
    assert_eq!(connection.ready_state(), ReadyState::Open);
    assert_no_event(&mut rx).await;
}

#[tokio::test]
async fn test_close_bad_code() {
    let (connector, client) = setup();
    let (handlers, _tx, mut rx) = recording_handlers();
    let (connection, _peer) = open_connection(&client, &connector, handlers).await;

    for code in [0, 1001, 1006, 2999, 5000] {
        let result = connection.close(code, "").await;
        assert!(matches!(result, Err(CloseError::BadCode(_))), "code {}", code);
    }
    assert_eq!(connection.ready_state(), ReadyState::Open);
    assert_eq!(connection.send("still open").await, Ok(()));
    assert_no_event(&mut rx).await;
}

#[tokio::test]
async fn test_queued_bytes_reads_backlog() {
    let (connector, client) = setup();
    let (connection, peer) = open_connection(&client, &connector, EventHandlers::new()).await;

    assert_eq!(connection.queued_bytes().await, 0);
    peer.set_buffered(4096);
    assert_eq!(connection.queued_bytes().await, 4096);
    assert_eq!(connection.queued_bytes().await, 4096);
    assert_eq!(peer.send_attempts(), 0);
}

#[tokio::test]
async fn test_cancel_before_ready_releases_socket() {
    let (connector, client) = setup();
    let (handlers, _tx, mut rx) = recording_handlers();

    let mut open = task::spawn(client.open(URL, handlers));
    assert_pending!(open.poll());

    let peer = connector.take_peer().expect("socket constructed");
    drop(open);

    assert_eq!(
        peer.close_calls(),
        vec![CloseCall {
            code: None,
            reason: String::new()
        }]
    );
    assert!(!peer.open());
    assert!(!peer.message("ignored"));

    assert_eq!(next_event(&mut rx).await, Event::Close(CloseInfo::abnormal()));
    assert_no_event(&mut rx).await;
    assert_eq!(peer.close_calls().len(), 1);
}

#[tokio::test]
async fn test_cancel_after_ready_event_suppresses_messages() {
    let (connector, client) = setup();
    let (handlers, _tx, mut rx) = recording_handlers();

    let mut open = task::spawn(client.open(URL, handlers));
    assert_pending!(open.poll());

    // The socket reports ready and a message, but open is dropped before it resolves
    let peer = connector.take_peer().expect("socket constructed");
    assert!(peer.open());
    assert!(peer.message("early"));
    drop(open);

    assert_eq!(peer.close_calls().len(), 1);
    match next_event(&mut rx).await {
        Event::Close(info) => assert!(info.was_clean),
        other => panic!("expected close, got {:?}", other),
    }
    assert_no_event(&mut rx).await;
}

#[tokio::test]
async fn test_connections_are_independent() {
    let (connector, client) = setup();
    let (first, first_peer) =
        open_connection(&client, &connector, EventHandlers::new()).await;
    let (second, _second_peer) =
        open_connection(&client, &connector, EventHandlers::new()).await;

    assert_ne!(first, second);
    first.close(1000, "").await.unwrap();
    assert_eq!(first.ready_state(), ReadyState::Closed);
    assert_eq!(second.ready_state(), ReadyState::Open);
    assert_eq!(second.send("ok").await, Ok(()));
    assert_eq!(first_peer.sent(), Vec::<String>::new());
}

/// Trait handler that does its recording after yielding
#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
    closed: Notify,
}

#[async_trait]
impl EventHandler for Journal {
    async fn on_message(&self, _connection: Connection, payload: String) {
        tokio::task::yield_now().await;
        self.entries.lock().unwrap().push(format!("message:{}", payload));
    }

    async fn on_close(&self, info: CloseInfo) {
        self.entries.lock().unwrap().push(format!("close:{}", info.code));
        self.closed.notify_one();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_trait_handler_close_follows_messages() {
    let (connector, client) = setup();

    for _ in 0..200 {
        let journal = Arc::new(Journal::default());
        let handlers = EventHandlers::from_handler(journal.clone());
        let (_connection, peer) = open_connection(&client, &connector, handlers).await;

        peer.message("one");
        peer.message("two");
        peer.close(1000, "", true);

        tokio::time::timeout(Duration::from_secs(1), journal.closed.notified())
            .await
            .expect("on_close never ran");
        assert_eq!(
            *journal.entries.lock().unwrap(),
            vec!["message:one", "message:two", "close:1000"]
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_closure_handlers_keep_event_order() {
    let (connector, client) = setup();

    for _ in 0..200 {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let message_tx = tx.clone();
        let handlers = EventHandlers::new()
            .on_message(move |_connection, payload: String| {
                let tx = message_tx.clone();
                async move {
                    tokio::task::yield_now().await;
                    let _ = tx.send(format!("message:{}", payload));
                }
            })
            .on_close(move |info| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(format!("close:{}", info.code));
                }
            });
        let (_connection, peer) = open_connection(&client, &connector, handlers).await;

        peer.message("hi");
        peer.close(4000, "done", true);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let entry = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out waiting for handler")
                .expect("handler channel closed");
            seen.push(entry);
        }
        assert_eq!(seen, vec!["message:hi", "close:4000"]);
    }
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_delivery() {
    let (connector, client) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let message_tx = tx.clone();
    let handlers = EventHandlers::new()
        .on_message(move |connection: Connection, payload: String| {
            let tx = message_tx.clone();
            async move {
                if payload == "boom" {
                    panic!("handler failure");
                }
                let _ = tx.send(Event::Message(connection.id(), payload));
            }
        })
        .on_close(move |info| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Event::Close(info));
            }
        });
    let (connection, peer) = open_connection(&client, &connector, handlers).await;

    peer.message("boom");
    peer.message("after");
    peer.close(1000, "", true);

    assert_eq!(
        next_event(&mut rx).await,
        Event::Message(connection.id(), "after".to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        Event::Close(CloseInfo::new(1000, "", true))
    );
}
