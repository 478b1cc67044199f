//! End-to-end append/read against an in-process fake server (no real
//! cluster, no real network beyond localhost loopback).

mod common;

use eventlog_client::error::Error;
use eventlog_client::metadata::CallOptions;
use eventlog_client::streams::Direction;
use eventlog_client::{Client, NewEvent, StreamState};

#[tokio::test]
async fn append_then_read_stream_round_trips_events() {
    let (addr, _server) = common::spawn_fake_server().await;
    let uri = format!("esdb://{}?Tls=false", addr);
    let client = Client::connect(&uri).expect("valid connection string");

    let events = vec![
        NewEvent::new("Deposited", br#"{"amount":10}"#.to_vec()),
        NewEvent::new("Withdrawn", br#"{"amount":3}"#.to_vec()),
    ];

    let commit_position = client
        .append("account-1", StreamState::NoStream, &events, &CallOptions::new())
        .await
        .expect("append should succeed against the fake server");
    assert_eq!(commit_position, 0);

    let read_back = client
        .read_stream(
            "account-1",
            StreamState::Revision(0),
            Direction::Forwards,
            10,
            false,
            &CallOptions::new(),
        )
        .await
        .expect("read should succeed");

    assert_eq!(read_back.len(), 2);
    assert_eq!(read_back[0].event_type, "Deposited");
    assert_eq!(read_back[1].event_type, "Withdrawn");
    assert_eq!(read_back[0].stream_position, 0);
    assert_eq!(read_back[1].stream_position, 1);
}

#[tokio::test]
async fn reading_an_unwritten_stream_returns_not_found() {
    let (addr, _server) = common::spawn_fake_server().await;
    let uri = format!("esdb://{}?Tls=false", addr);
    let client = Client::connect(&uri).expect("valid connection string");

    let result = client
        .read_stream(
            "never-written",
            StreamState::Revision(0),
            Direction::Forwards,
            10,
            false,
            &CallOptions::new(),
        )
        .await;

    assert!(matches!(result, Err(Error::NotFound)));
}

#[tokio::test]
async fn tombstoned_stream_fails_append_read_and_metadata_with_stream_is_deleted() {
    let (addr, _server) = common::spawn_fake_server().await;
    let uri = format!("esdb://{}?Tls=false", addr);
    let client = Client::connect(&uri).expect("valid connection string");

    let events = vec![NewEvent::new("Opened", br#"{}"#.to_vec())];
    client
        .append("account-2", StreamState::NoStream, &events, &CallOptions::new())
        .await
        .expect("append should succeed before tombstoning");

    client
        .tombstone("account-2", StreamState::Any, &CallOptions::new())
        .await
        .expect("tombstone should succeed");

    let append_result = client
        .append("account-2", StreamState::Any, &events, &CallOptions::new())
        .await;
    assert!(matches!(append_result, Err(Error::StreamIsDeleted)));

    let read_result = client
        .read_stream(
            "account-2",
            StreamState::Revision(0),
            Direction::Forwards,
            10,
            false,
            &CallOptions::new(),
        )
        .await;
    assert!(matches!(read_result, Err(Error::StreamIsDeleted)));

    let metadata_result = client.get_stream_metadata("account-2", &CallOptions::new()).await;
    assert!(matches!(metadata_result, Err(Error::StreamIsDeleted)));
}
