//! Integration tests: command submission, pipelining, and reply routing.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use common::*;
use kvpipe::{Client, KvPipeError, LinkState, Reply, Transform};

/// Canned replies covering the reply types the scripted tests use.
fn scripted(cmd: &Command) -> Action {
    match verb(cmd).as_str() {
        "PING" => Action::Reply(b"+PONG\r\n".to_vec()),
        "SET" => Action::Reply(b"+OK\r\n".to_vec()),
        "GET" => Action::Reply(b"$3\r\nbar\r\n".to_vec()),
        "EXISTS" => Action::Reply(b":1\r\n".to_vec()),
        "MISSING" => Action::Reply(b"$-1\r\n".to_vec()),
        "KEYS" => Action::Reply(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n".to_vec()),
        "BAD" => Action::Reply(b"-ERR unknown command\r\n".to_vec()),
        _ => Action::Reply(b"+OK\r\n".to_vec()),
    }
}

#[tokio::test]
async fn ping_pong() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let reply = client.submit_str(&["PING"]).await.unwrap();
    assert_eq!(reply, Reply::Status("PONG".into()));
    assert!(client.is_ready());
}

#[tokio::test]
async fn reply_types_decode() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    assert_eq!(
        client.submit_str(&["GET", "foo"]).await.unwrap(),
        Reply::Bulk(Bytes::from_static(b"bar"))
    );
    assert_eq!(
        client.submit_str(&["EXISTS", "foo"]).await.unwrap(),
        Reply::Integer(1)
    );
    assert_eq!(client.submit_str(&["MISSING"]).await.unwrap(), Reply::Null);
    assert_eq!(
        client.submit_str(&["KEYS", "*"]).await.unwrap(),
        Reply::Array(vec![
            Reply::Bulk(Bytes::from_static(b"a")),
            Reply::Bulk(Bytes::from_static(b"b")),
        ])
    );
}

#[tokio::test]
async fn pipelined_replies_in_one_chunk_route_fifo() {
    // The server withholds the SET reply, then answers both commands with
    // a single write once the GET arrives.
    let server = MockServer::start(|cmd| match verb(cmd).as_str() {
        "SET" => Action::Silence,
        "GET" => Action::Reply(b"+OK\r\n$3\r\nbar\r\n".to_vec()),
        _ => Action::Reply(b"+OK\r\n".to_vec()),
    })
    .await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let set = client.submit_str(&["SET", "foo", "bar"]);
    let get = client.submit_str(&["GET", "foo"]);
    let (set, get) = tokio::join!(set, get);

    assert_eq!(set.unwrap(), Reply::Status("OK".into()));
    assert_eq!(get.unwrap(), Reply::Bulk(Bytes::from_static(b"bar")));
}

#[tokio::test]
async fn batch_delivers_all_results_in_order() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let commands = vec![
        vec!["SET".into(), "k".into(), "v".into()],
        vec!["GET".into(), "k".into()],
        vec!["EXISTS".into(), "k".into()],
    ];
    let results = client.submit_batch(&commands).await.unwrap();
    assert_eq!(
        results,
        vec![
            Reply::Status("OK".into()),
            Reply::Bulk(Bytes::from_static(b"bar")),
            Reply::Integer(1),
        ]
    );
}

#[tokio::test]
async fn batch_empty_completes_without_touching_the_wire() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let results = client.submit_batch(&[]).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(server.total_commands(), 0);
}

#[tokio::test]
async fn batch_member_error_becomes_nil_slot() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let commands = vec![
        vec!["SET".into(), "k".into(), "v".into()],
        vec!["BAD".into()],
        vec!["EXISTS".into(), "k".into()],
    ];
    let results = client.submit_batch(&commands).await.unwrap();
    assert_eq!(
        results,
        vec![Reply::Status("OK".into()), Reply::Null, Reply::Integer(1)]
    );
}

#[tokio::test]
async fn server_error_reply_fails_the_request_and_hits_the_hook() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.set_error_handler(move |e| sink.lock().push(e.to_string()));

    let err = client.submit_str(&["BAD"]).await.unwrap_err();
    assert!(matches!(err, KvPipeError::Server { .. }));
    assert!(err.to_string().contains("unknown command"));

    // The connection survives an error reply
    assert_eq!(
        client.submit_str(&["PING"]).await.unwrap(),
        Reply::Status("PONG".into())
    );
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn transform_applied_before_delivery() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let boolify: Transform = Box::new(|r| match r {
        Reply::Integer(1) => Reply::Status("true".into()),
        _ => Reply::Status("false".into()),
    });
    let reply = client
        .submit_with(&["EXISTS", "foo"], boolify)
        .await
        .unwrap();
    assert_eq!(reply, Reply::Status("true".into()));
}

#[tokio::test]
async fn binary_safe_arguments() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let payload: &[u8] = b"\x00\x01\r\nraw";
    client
        .submit(&[b"SET", b"bin", payload])
        .await
        .unwrap();

    let commands = server.commands(0);
    assert_eq!(commands[0][2], payload);
}

#[tokio::test]
async fn empty_command_rejected_locally() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();

    let err = client.submit_str(&[]).await.unwrap_err();
    assert!(matches!(err, KvPipeError::Config(_)));
    assert_eq!(server.total_commands(), 0);
}

#[tokio::test]
async fn submit_after_close_fails() {
    let server = MockServer::start(scripted).await;
    let client = Client::connect(config_for(&server.addr)).await.unwrap();
    assert_eq!(
        client.submit_str(&["PING"]).await.unwrap(),
        Reply::Status("PONG".into())
    );

    client.close();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(client.submit_str(&["PING"]).await.is_err());
    assert_eq!(client.state(), LinkState::Closing);
}

#[tokio::test]
async fn many_in_flight_requests_stay_ordered() {
    let server = MockServer::start(|cmd| {
        // Echo the argument back so mismatches are visible
        let arg = cmd[1].clone();
        let mut reply = format!("${}\r\n", arg.len()).into_bytes();
        reply.extend_from_slice(&arg);
        reply.extend_from_slice(b"\r\n");
        Action::Reply(reply)
    })
    .await;
    let client = Arc::new(Client::connect(config_for(&server.addr)).await.unwrap());

    let mut futures = Vec::new();
    for i in 0..100 {
        let c = client.clone();
        futures.push(tokio::spawn(async move {
            c.submit_str(&["ECHO", &format!("v{i}")]).await
        }));
    }
    for (i, handle) in futures.into_iter().enumerate() {
        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply.as_str(), Some(format!("v{i}").as_str()));
    }
}
