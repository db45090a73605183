// Protocol client tests
// Correlation-based request/response multiplexing against the stub engine

mod common;
use common::{
    active_user_resp, contact, contacts_list_resp, envelope, new_chat_items_resp, setup_logging,
    spawn_stub_engine, users_list_resp, Responder,
};

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use parley::client::{ChatClient, ChatCommand, ChatResponse, ClientError};

fn echo_active_user() -> Responder {
    Box::new(|cmd| {
        vec![envelope(
            cmd.corr_id.as_deref(),
            active_user_resp(1, "alice"),
        )]
    })
}

/// Every response resolves the waiter whose correlation id it carries.
#[tokio::test]
async fn test_response_resolves_matching_corr_id() {
    setup_logging();
    let stub = spawn_stub_engine(echo_active_user()).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let corr_id = client
        .send_command(&ChatCommand::ShowActiveUser)
        .await
        .expect("send");
    let resp = client
        .await_response_timeout(&corr_id, Duration::from_secs(2))
        .await
        .expect("response");

    let user = resp.as_active_user().expect("activeUser payload");
    assert_eq!(user.user_id, 1);
    assert_eq!(user.local_display_name, "alice");
}

/// Two outstanding commands whose responses arrive in reverse order each
/// still resolve to their own payload.
#[tokio::test]
async fn test_out_of_order_responses_resolve_without_cross_talk() {
    setup_logging();
    // Hold the first command's reply until the second command arrives,
    // then answer both in reverse order.
    let held: StdMutex<Option<String>> = StdMutex::new(None);
    let responder: Responder = Box::new(move |cmd| {
        let corr_id = cmd.corr_id.clone().unwrap_or_default();
        if cmd.cmd == "/u" {
            *held.lock().unwrap() = Some(corr_id);
            Vec::new()
        } else {
            let first = held.lock().unwrap().take();
            let mut replies = vec![envelope(Some(&corr_id), users_list_resp(Vec::new()))];
            if let Some(first_id) = first {
                replies.push(envelope(Some(&first_id), active_user_resp(1, "alice")));
            }
            replies
        }
    });
    let stub = spawn_stub_engine(responder).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let first = client
        .send_command(&ChatCommand::ShowActiveUser)
        .await
        .expect("send first");
    let second = client
        .send_command(&ChatCommand::ListUsers)
        .await
        .expect("send second");

    let (first_resp, second_resp) = tokio::join!(
        client.await_response_timeout(&first, Duration::from_secs(2)),
        client.await_response_timeout(&second, Duration::from_secs(2)),
    );

    assert!(
        matches!(first_resp.expect("first response"), ChatResponse::ActiveUser { .. }),
        "first command must resolve to its own payload"
    );
    assert!(
        matches!(second_resp.expect("second response"), ChatResponse::UsersList { .. }),
        "second command must resolve to its own payload"
    );
}

/// A response that already arrived is returned immediately, and again on
/// a repeated read.
#[tokio::test]
async fn test_await_after_resolution_is_a_repeatable_read() {
    setup_logging();
    let stub = spawn_stub_engine(echo_active_user()).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let corr_id = client
        .send_command(&ChatCommand::ShowActiveUser)
        .await
        .expect("send");
    let first = client
        .await_response_timeout(&corr_id, Duration::from_secs(2))
        .await
        .expect("first read");
    // Second read must not suspend: the record caches the response.
    let second = client
        .await_response_timeout(&corr_id, Duration::from_millis(50))
        .await
        .expect("repeated read");
    assert_eq!(first.tag(), second.tag());
}

/// Tag subscribers see only their tag; wildcard subscribers see
/// everything, including correlated responses.
#[tokio::test]
async fn test_event_fan_out_by_tag_and_wildcard() {
    setup_logging();
    let stub = spawn_stub_engine(Box::new(|_| Vec::new())).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let mut items_sub = client.subscribe("newChatItems").await;
    let mut all_sub = client.subscribe_all().await;

    let push = envelope(
        None,
        new_chat_items_resp(
            common::direct_chat_info(contact(7, "bob")),
            vec![common::chat_item(1, "hi")],
        ),
    );
    stub.push_tx.send(push).expect("push");
    stub.push_tx
        .send(envelope(None, contacts_list_resp(Vec::new())))
        .expect("push");

    let tagged = tokio::time::timeout(Duration::from_secs(2), items_sub.recv())
        .await
        .expect("tag subscriber timeout")
        .expect("tag subscriber event");
    assert_eq!(tagged.resp.tag(), "newChatItems");

    let first = tokio::time::timeout(Duration::from_secs(2), all_sub.recv())
        .await
        .expect("wildcard timeout")
        .expect("wildcard event");
    let second = tokio::time::timeout(Duration::from_secs(2), all_sub.recv())
        .await
        .expect("wildcard timeout")
        .expect("wildcard event");
    assert_eq!(first.resp.tag(), "newChatItems");
    assert_eq!(second.resp.tag(), "contactsList");

    // The tag subscriber must not receive the contactsList event.
    let extra = tokio::time::timeout(Duration::from_millis(100), items_sub.recv()).await;
    assert!(extra.is_err(), "tag subscriber saw a foreign tag");
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    setup_logging();
    let stub = spawn_stub_engine(Box::new(|_| Vec::new())).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let sub = client.subscribe_all().await;
    client.unsubscribe(sub.id()).await;

    stub.push_tx
        .send(envelope(None, contacts_list_resp(Vec::new())))
        .expect("push");

    let mut sub = sub;
    let event = tokio::time::timeout(Duration::from_millis(200), sub.recv()).await;
    // Channel closes once the registry entry is gone.
    assert!(matches!(event, Ok(None) | Err(_)));
}

/// A command the engine never answers fails with TimedOut instead of
/// suspending forever.
#[tokio::test]
async fn test_unanswered_command_times_out() {
    setup_logging();
    let stub = spawn_stub_engine(Box::new(|_| Vec::new())).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let corr_id = client
        .send_command(&ChatCommand::ListContacts)
        .await
        .expect("send");
    let result = client
        .await_response_timeout(&corr_id, Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(ClientError::TimedOut { .. })));
}

/// Disconnect fails suspended waiters rather than leaking them.
#[tokio::test]
async fn test_disconnect_fails_pending_waiters() {
    setup_logging();
    let stub = spawn_stub_engine(Box::new(|_| Vec::new())).await;
    let client = std::sync::Arc::new(ChatClient::connect(&stub.url).await.expect("connect"));

    let corr_id = client
        .send_command(&ChatCommand::ListContacts)
        .await
        .expect("send");

    let waiter = {
        let client = std::sync::Arc::clone(&client);
        let corr_id = corr_id.clone();
        tokio::spawn(async move { client.await_response(&corr_id).await })
    };
    // Give the waiter a moment to register before tearing down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.disconnect().await;

    let result = waiter.await.expect("join");
    assert!(matches!(result, Err(ClientError::Disconnected)));

    // New waits on the dead connection fail immediately.
    let late = client.await_response(&corr_id).await;
    assert!(matches!(late, Err(ClientError::Disconnected)));
}

#[tokio::test]
async fn test_await_unknown_corr_id_is_an_error() {
    setup_logging();
    let stub = spawn_stub_engine(Box::new(|_| Vec::new())).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let result = client.await_response("no-such-id").await;
    assert!(matches!(result, Err(ClientError::UnknownCorrId(_))));
}

/// Sent commands are retained with their responses for the console view.
#[tokio::test]
async fn test_sent_commands_audit_trail() {
    setup_logging();
    let stub = spawn_stub_engine(echo_active_user()).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let corr_id = client
        .send_command(&ChatCommand::ShowActiveUser)
        .await
        .expect("send");
    client
        .await_response_timeout(&corr_id, Duration::from_secs(2))
        .await
        .expect("response");
    let unanswered = client
        .send_command(&ChatCommand::ListContacts)
        .await
        .expect("send");

    let audit = client.sent_commands().await;
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].cmd, "/u");
    assert!(audit[0].response.is_some());
    assert_eq!(audit[1].cmd, "/contacts");
    assert!(audit[1].response.is_none());

    let record = client.sent_command(&unanswered).await.expect("record");
    assert_eq!(record.cmd, "/contacts");
}

/// chatCmdError arrives as data through the response channel, not as Err.
#[tokio::test]
async fn test_command_error_is_data_not_an_error() {
    setup_logging();
    let responder: Responder = Box::new(|cmd| {
        vec![envelope(
            cmd.corr_id.as_deref(),
            serde_json::json!({
                "type": "chatCmdError",
                "chatError": { "type": "error", "errorType": { "type": "noActiveUser" } }
            }),
        )]
    });
    let stub = spawn_stub_engine(responder).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    let resp = client
        .send_and_await(&ChatCommand::ShowActiveUser)
        .await
        .expect("transport must not fail");
    match resp {
        ChatResponse::ChatCmdError { chat_error, .. } => {
            assert_eq!(chat_error.kind, "error");
            assert!(chat_error.details.contains_key("errorType"));
        }
        other => panic!("expected chatCmdError, got {}", other.tag()),
    }
}

/// Undecodable frames are dropped without breaking the connection.
#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    setup_logging();
    let stub = spawn_stub_engine(echo_active_user()).await;
    let client = ChatClient::connect(&stub.url).await.expect("connect");

    stub.push_tx.send("{not json".to_string()).expect("push");

    // The connection still works after the bad frame.
    let resp = client
        .send_and_await(&ChatCommand::ShowActiveUser)
        .await
        .expect("response after bad frame");
    assert!(resp.as_active_user().is_some());
}
