// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! SUBACK reconciliation and resubscribe tests. The protocol-mandated
//! divergence is covered by separate cases: v5.0 re-issues one SUBSCRIBE per
//! topic, v3.1.1 one batched SUBSCRIBE for all topics.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mqtt_session_tokio::mqtt_session::{
    ConnectOptions, Packet, Properties, ProtocolVersion, Qos, SessionEvent, Suback,
    SubscribeEntry, SubscribeOpts, Unsuback,
};

mod common;

use common::next_event_matching;
use stub_transport::{start_connected, Harness, TestBroker};

fn reconnecting_options(version: ProtocolVersion) -> ConnectOptions {
    ConnectOptions::builder()
        .client_id("c1".to_string())
        .protocol_version(version)
        .reconnect_period_ms(50u64)
        .build()
        .unwrap()
}

async fn subscribe_granted(harness: &mut Harness, filter: &str) {
    let session = Arc::clone(&harness.session);
    let filter_owned = filter.to_string();
    let task = tokio::spawn(async move {
        session
            .subscribe_topic(filter_owned, SubscribeOpts::qos(Qos::AtLeastOnce))
            .await
    });
    let packet_id = match harness.broker.recv_packet().await {
        Packet::Subscribe(s) => s.packet_id,
        other => panic!("expected SUBSCRIBE, got {:?}", other.packet_type()),
    };
    harness.broker.send_packet(&Packet::Suback(Suback {
        packet_id,
        granted: vec![1],
        properties: Properties::default(),
    }));
    task.await.unwrap().unwrap();
}

/// Drop the current stream and complete the next connection attempt.
async fn reconnect(harness: &mut Harness, session_present: bool) -> TestBroker {
    harness.broker.close();
    next_event_matching(&mut harness.events, 5, |e| matches!(e, SessionEvent::Offline)).await;
    let mut broker = harness.next_transport();
    broker.expect_connect().await;
    broker.send_connack(session_present, 0);
    next_event_matching(&mut harness.events, 5, |e| {
        matches!(e, SessionEvent::Connect { .. })
    })
    .await;
    broker
}

#[tokio::test]
async fn suback_grants_are_positional_and_failures_leave_the_map() {
    common::init_tracing();

    let mut harness = start_connected(reconnecting_options(ProtocolVersion::V3_1_1)).await;

    let session = Arc::clone(&harness.session);
    let task = tokio::spawn(async move {
        session
            .subscribe(vec![
                SubscribeEntry::new("a/b", SubscribeOpts::qos(Qos::AtLeastOnce)),
                SubscribeEntry::new("c/d", SubscribeOpts::qos(Qos::AtLeastOnce)),
            ])
            .await
    });

    let packet_id = match harness.broker.recv_packet().await {
        Packet::Subscribe(s) => {
            assert_eq!(s.entries.len(), 2);
            s.packet_id
        }
        other => panic!("expected SUBSCRIBE, got {:?}", other.packet_type()),
    };
    harness.broker.send_packet(&Packet::Suback(Suback {
        packet_id,
        granted: vec![1, 0x80],
        properties: Properties::default(),
    }));

    let grants = task.await.unwrap().unwrap();
    assert_eq!(grants.len(), 2);
    assert_eq!(grants[0].topic_filter, "a/b");
    assert_eq!(grants[0].code, 1);
    assert_eq!(grants[1].topic_filter, "c/d");
    assert_eq!(grants[1].code, 0x80);
    assert!(grants[1].is_failure());

    // Only the granted filter is re-issued after a reconnect.
    let mut broker2 = reconnect(&mut harness, false).await;
    match broker2.recv_packet().await {
        Packet::Subscribe(s) => {
            assert_eq!(s.entries.len(), 1);
            assert_eq!(s.entries[0].topic_filter, "a/b");
        }
        other => panic!("expected resubscribe, got {:?}", other.packet_type()),
    }
}

#[tokio::test]
async fn v311_resubscribe_is_one_batched_packet() {
    common::init_tracing();

    let mut harness = start_connected(reconnecting_options(ProtocolVersion::V3_1_1)).await;
    subscribe_granted(&mut harness, "a/b").await;
    subscribe_granted(&mut harness, "c/d").await;

    let mut broker2 = reconnect(&mut harness, false).await;
    match broker2.recv_packet().await {
        Packet::Subscribe(s) => {
            let filters: Vec<&str> = s
                .entries
                .iter()
                .map(|e| e.topic_filter.as_str())
                .collect();
            assert_eq!(filters, vec!["a/b", "c/d"]);
        }
        other => panic!("expected batched resubscribe, got {:?}", other.packet_type()),
    }
    assert!(broker2
        .try_recv_packet(Duration::from_millis(150))
        .await
        .is_none());
}

#[tokio::test]
async fn v5_resubscribe_is_one_packet_per_topic() {
    common::init_tracing();

    let mut harness = start_connected(reconnecting_options(ProtocolVersion::V5_0)).await;
    subscribe_granted(&mut harness, "a/b").await;
    subscribe_granted(&mut harness, "c/d").await;

    let mut broker2 = reconnect(&mut harness, false).await;
    let mut seen = HashSet::new();
    for _ in 0..2 {
        match broker2.recv_packet().await {
            Packet::Subscribe(s) => {
                assert_eq!(s.entries.len(), 1, "v5 resubscribe batches topics");
                seen.insert(s.entries[0].topic_filter.clone());
            }
            other => panic!("expected resubscribe, got {:?}", other.packet_type()),
        }
    }
    assert_eq!(seen, HashSet::from(["a/b".to_string(), "c/d".to_string()]));
    assert!(broker2
        .try_recv_packet(Duration::from_millis(150))
        .await
        .is_none());
}

#[tokio::test]
async fn resumed_v311_session_skips_resubscribe() {
    common::init_tracing();

    let options = ConnectOptions::builder()
        .client_id("c1".to_string())
        .clean(false)
        .reconnect_period_ms(50u64)
        .build()
        .unwrap();
    let mut harness = start_connected(options).await;
    subscribe_granted(&mut harness, "a/b").await;

    // The broker resumed the session; its subscription state survived.
    let mut broker2 = reconnect(&mut harness, true).await;
    assert!(broker2
        .try_recv_packet(Duration::from_millis(200))
        .await
        .is_none());
}

#[tokio::test]
async fn unsubscribe_purges_the_resubscribe_map() {
    common::init_tracing();

    let mut harness = start_connected(reconnecting_options(ProtocolVersion::V3_1_1)).await;
    subscribe_granted(&mut harness, "a/b").await;

    let session = Arc::clone(&harness.session);
    let task = tokio::spawn(async move { session.unsubscribe(vec!["a/b".to_string()]).await });
    let packet_id = match harness.broker.recv_packet().await {
        Packet::Unsubscribe(u) => {
            assert_eq!(u.topics, vec!["a/b".to_string()]);
            u.packet_id
        }
        other => panic!("expected UNSUBSCRIBE, got {:?}", other.packet_type()),
    };
    harness.broker.send_packet(&Packet::Unsuback(Unsuback {
        packet_id,
        reason_codes: vec![0],
        properties: Properties::default(),
    }));
    task.await.unwrap().unwrap();

    let mut broker2 = reconnect(&mut harness, false).await;
    assert!(broker2
        .try_recv_packet(Duration::from_millis(200))
        .await
        .is_none());
}
