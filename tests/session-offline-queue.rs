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

//! Offline queue and reconnect replay tests: QoS 0 queueing policy, store
//! replay order and once-per-pass semantics, queued subscribes, and PUBREL
//! obligations across reconnects.

use std::sync::Arc;
use std::time::Duration;

use mqtt_session_tokio::mqtt_session::{
    ConnectOptions, Packet, Properties, Puback, Pubcomp, PublishOptions, Pubrec, Qos, SessionError,
    SessionEvent, Suback, SubscribeOpts, Session,
};

mod common;

use common::next_event_matching;
use stub_transport::{channel_connector, duplex_pair, start_connected, JsonCodec};

#[tokio::test]
async fn qos0_while_offline_fails_when_queueing_disabled() {
    common::init_tracing();

    let (_supply, connector) = channel_connector();
    let options = ConnectOptions::builder()
        .queue_qos_zero(false)
        .build()
        .unwrap();
    // No transport supplied: the session stays in its first dial.
    let session = Session::connect(connector, JsonCodec, options).unwrap();

    let result = session
        .publish("t", b"m".to_vec(), PublishOptions::default())
        .await;
    assert!(matches!(result, Err(SessionError::OfflineQueueDisabled)));
}

#[tokio::test]
async fn qos0_queued_while_offline_is_flushed_on_connect() {
    common::init_tracing();

    let (supply, connector) = channel_connector();
    let session = Arc::new(Session::connect(connector, JsonCodec, ConnectOptions::default()).unwrap());
    let mut events = session.events();

    let publisher = Arc::clone(&session);
    let publish_task = tokio::spawn(async move {
        publisher
            .publish("t", b"queued".to_vec(), PublishOptions::default())
            .await
    });

    // Let the publish land in the offline queue, then complete the dial.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (transport, mut broker) = duplex_pair();
    supply.send(Box::new(transport)).unwrap();
    broker.expect_connect().await;
    broker.send_connack(false, 0);
    next_event_matching(&mut events, 5, |e| matches!(e, SessionEvent::Connect { .. })).await;

    match broker.recv_packet().await {
        Packet::Publish(p) => {
            assert_eq!(p.topic, "t");
            assert_eq!(p.qos, Qos::AtMostOnce);
        }
        other => panic!("expected queued PUBLISH, got {:?}", other.packet_type()),
    }
    publish_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn store_replay_resends_in_order_exactly_once_per_pass() {
    common::init_tracing();

    let options = ConnectOptions::builder()
        .client_id("c1".to_string())
        .clean(false)
        .reconnect_period_ms(50u64)
        .build()
        .unwrap();
    let mut harness = start_connected(options).await;

    let session = Arc::clone(&harness.session);
    let first = tokio::spawn(async move {
        session
            .publish("a", b"1".to_vec(), PublishOptions::qos(Qos::AtLeastOnce))
            .await
    });
    let session = Arc::clone(&harness.session);
    let second = tokio::spawn(async move {
        session
            .publish("b", b"2".to_vec(), PublishOptions::qos(Qos::AtLeastOnce))
            .await
    });

    // Both hit the wire unacknowledged.
    let id_a = match harness.broker.recv_packet().await {
        Packet::Publish(p) => p.packet_id.unwrap(),
        other => panic!("expected PUBLISH, got {:?}", other.packet_type()),
    };
    let id_b = match harness.broker.recv_packet().await {
        Packet::Publish(p) => p.packet_id.unwrap(),
        other => panic!("expected PUBLISH, got {:?}", other.packet_type()),
    };

    harness.broker.close();
    next_event_matching(&mut harness.events, 5, |e| matches!(e, SessionEvent::Offline)).await;

    let mut broker2 = harness.next_transport();
    next_event_matching(&mut harness.events, 5, |e| matches!(e, SessionEvent::Reconnect)).await;
    broker2.expect_connect().await;
    broker2.send_connack(true, 0);

    // Replay preserves insertion order and marks the resends as duplicates.
    match broker2.recv_packet().await {
        Packet::Publish(p) => {
            assert_eq!(p.topic, "a");
            assert_eq!(p.packet_id, Some(id_a));
            assert!(p.dup);
        }
        other => panic!("expected replayed PUBLISH a, got {:?}", other.packet_type()),
    }
    match broker2.recv_packet().await {
        Packet::Publish(p) => {
            assert_eq!(p.topic, "b");
            assert_eq!(p.packet_id, Some(id_b));
            assert!(p.dup);
        }
        other => panic!("expected replayed PUBLISH b, got {:?}", other.packet_type()),
    }
    // One pass resends each entry at most once.
    assert!(broker2
        .try_recv_packet(Duration::from_millis(150))
        .await
        .is_none());

    for id in [id_a, id_b] {
        broker2.send_packet(&Packet::Puback(Puback {
            packet_id: id,
            reason_code: 0,
            properties: Properties::default(),
        }));
    }
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert!(harness.session.stored_packets().await.unwrap().is_empty());
}

#[tokio::test]
async fn subscribe_while_offline_is_replayed_on_connect() {
    common::init_tracing();

    let (supply, connector) = channel_connector();
    let session = Arc::new(Session::connect(connector, JsonCodec, ConnectOptions::default()).unwrap());

    let subscriber = Arc::clone(&session);
    let subscribe_task = tokio::spawn(async move {
        subscriber
            .subscribe_topic("s/t", SubscribeOpts::qos(Qos::AtLeastOnce))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (transport, mut broker) = duplex_pair();
    supply.send(Box::new(transport)).unwrap();
    broker.expect_connect().await;
    broker.send_connack(false, 0);

    let packet_id = match broker.recv_packet().await {
        Packet::Subscribe(s) => {
            assert_eq!(s.entries.len(), 1);
            assert_eq!(s.entries[0].topic_filter, "s/t");
            s.packet_id
        }
        other => panic!("expected SUBSCRIBE, got {:?}", other.packet_type()),
    };
    broker.send_packet(&Packet::Suback(Suback {
        packet_id,
        granted: vec![1],
        properties: Properties::default(),
    }));

    let grants = subscribe_task.await.unwrap().unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].topic_filter, "s/t");
    assert_eq!(grants[0].code, 1);
}

#[tokio::test]
async fn pubrel_obligation_survives_reconnect() {
    common::init_tracing();

    let options = ConnectOptions::builder()
        .client_id("c1".to_string())
        .clean(false)
        .reconnect_period_ms(50u64)
        .build()
        .unwrap();
    let mut harness = start_connected(options).await;

    let session = Arc::clone(&harness.session);
    let publish_task = tokio::spawn(async move {
        session
            .publish("q2", b"m".to_vec(), PublishOptions::qos(Qos::ExactlyOnce))
            .await
    });

    let packet_id = match harness.broker.recv_packet().await {
        Packet::Publish(p) => p.packet_id.unwrap(),
        other => panic!("expected PUBLISH, got {:?}", other.packet_type()),
    };
    harness.broker.send_packet(&Packet::Pubrec(Pubrec {
        packet_id,
        reason_code: 0,
        properties: Properties::default(),
    }));
    match harness.broker.recv_packet().await {
        Packet::Pubrel(p) => assert_eq!(p.packet_id, packet_id),
        other => panic!("expected PUBREL, got {:?}", other.packet_type()),
    }

    // Drop before PUBCOMP: the pubrel obligation must replay.
    harness.broker.close();
    next_event_matching(&mut harness.events, 5, |e| matches!(e, SessionEvent::Offline)).await;
    let mut broker2 = harness.next_transport();
    broker2.expect_connect().await;
    broker2.send_connack(true, 0);

    match broker2.recv_packet().await {
        Packet::Pubrel(p) => assert_eq!(p.packet_id, packet_id),
        other => panic!("expected replayed PUBREL, got {:?}", other.packet_type()),
    }
    broker2.send_packet(&Packet::Pubcomp(Pubcomp {
        packet_id,
        reason_code: 0,
        properties: Properties::default(),
    }));
    publish_task.await.unwrap().unwrap();
    assert!(harness.session.stored_packets().await.unwrap().is_empty());
}
