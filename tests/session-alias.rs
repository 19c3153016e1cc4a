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

//! MQTT v5.0 topic alias tests: receive-side registration and resolution,
//! refusal of unknown or un-negotiated aliases, and send-side automatic
//! assignment and substitution.

use std::time::Duration;

use mqtt_session_tokio::mqtt_session::{
    Connack, ConnectOptions, Packet, Properties, ProtocolVersion, PublishOptions, Qos,
    SessionError, SessionEvent, TopicAliasError,
};

mod common;

use common::{drain_events, next_event_matching};
use stub_transport::{start, Harness};

fn v5_options() -> mqtt_session_tokio::mqtt_session::options::ConnectOptionsBuilder {
    ConnectOptions::builder().protocol_version(ProtocolVersion::V5_0)
}

async fn connect_v5(options: ConnectOptions, broker_alias_max: Option<u16>) -> Harness {
    let (mut harness, _connect) = start(options).await;
    harness.broker.send_connack_with(Connack {
        session_present: false,
        reason_code: 0,
        properties: Properties {
            topic_alias_maximum: broker_alias_max,
            ..Properties::default()
        },
    });
    next_event_matching(&mut harness.events, 5, |e| {
        matches!(e, SessionEvent::Connect { .. })
    })
    .await;
    harness
}

fn inbound(topic: &str, alias: Option<u16>) -> Packet {
    Packet::Publish(mqtt_session_tokio::mqtt_session::Publish {
        topic: topic.into(),
        payload: b"m".to_vec(),
        qos: Qos::AtMostOnce,
        retain: false,
        dup: false,
        packet_id: None,
        properties: Properties {
            topic_alias: alias,
            ..Properties::default()
        },
    })
}

#[tokio::test]
async fn incoming_alias_registers_then_resolves_empty_topics() {
    common::init_tracing();

    let options = v5_options().topic_alias_maximum(5u16).build().unwrap();
    let mut harness = connect_v5(options, None).await;

    // Full topic with alias registers the mapping, empty topic reuses it.
    harness.broker.send_packet(&inbound("sensors/temp", Some(2)));
    harness.broker.send_packet(&inbound("", Some(2)));

    let mut topics = Vec::new();
    for _ in 0..2 {
        let event = next_event_matching(&mut harness.events, 5, |e| {
            matches!(e, SessionEvent::Message(_))
        })
        .await;
        if let SessionEvent::Message(p) = event {
            topics.push(p.topic);
        }
    }
    assert_eq!(topics, vec!["sensors/temp".to_string(), "sensors/temp".to_string()]);
}

#[tokio::test]
async fn unknown_incoming_alias_is_refused_not_guessed() {
    common::init_tracing();

    let options = v5_options().topic_alias_maximum(5u16).build().unwrap();
    let mut harness = connect_v5(options, None).await;

    harness.broker.send_packet(&inbound("", Some(3)));

    let event = next_event_matching(&mut harness.events, 5, |e| {
        matches!(e, SessionEvent::Error(_))
    })
    .await;
    match event {
        SessionEvent::Error(error) => assert!(matches!(
            &*error,
            SessionError::TopicAlias(TopicAliasError::Unresolved(3))
        )),
        _ => unreachable!(),
    }
    let deliveries = drain_events(&mut harness.events, Duration::from_millis(150))
        .await
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Message(_)))
        .count();
    assert_eq!(deliveries, 0);
}

#[tokio::test]
async fn aliases_without_negotiation_fail_explicitly() {
    common::init_tracing();

    // topic_alias_maximum stays 0: no receive-side manager exists.
    let options = v5_options().build().unwrap();
    let mut harness = connect_v5(options, None).await;

    harness.broker.send_packet(&inbound("t", Some(1)));
    let event = next_event_matching(&mut harness.events, 5, |e| {
        matches!(e, SessionEvent::Error(_))
    })
    .await;
    match event {
        SessionEvent::Error(error) => assert!(matches!(
            &*error,
            SessionError::TopicAlias(TopicAliasError::NotEnabled)
        )),
        _ => unreachable!(),
    }

    // Send side: the broker advertised no alias space either.
    let result = harness
        .session
        .publish(
            "t",
            b"m".to_vec(),
            PublishOptions {
                properties: Properties {
                    topic_alias: Some(1),
                    ..Properties::default()
                },
                ..PublishOptions::default()
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(SessionError::TopicAlias(TopicAliasError::NotEnabled))
    ));
}

#[tokio::test]
async fn auto_assignment_teaches_then_substitutes_the_alias() {
    common::init_tracing();

    let options = v5_options()
        .auto_assign_topic_alias(true)
        .auto_use_topic_alias(true)
        .build()
        .unwrap();
    let mut harness = connect_v5(options, Some(3)).await;

    harness
        .session
        .publish("x/y", b"1".to_vec(), PublishOptions::default())
        .await
        .unwrap();
    harness
        .session
        .publish("x/y", b"2".to_vec(), PublishOptions::default())
        .await
        .unwrap();

    // First use carries the topic and the assigned alias; the second only
    // the alias.
    match harness.broker.recv_packet().await {
        Packet::Publish(p) => {
            assert_eq!(p.topic, "x/y");
            assert_eq!(p.properties.topic_alias, Some(1));
        }
        other => panic!("expected PUBLISH, got {:?}", other.packet_type()),
    }
    match harness.broker.recv_packet().await {
        Packet::Publish(p) => {
            assert_eq!(p.topic, "");
            assert_eq!(p.properties.topic_alias, Some(1));
        }
        other => panic!("expected aliased PUBLISH, got {:?}", other.packet_type()),
    }
}

#[tokio::test]
async fn out_of_range_incoming_alias_is_an_error() {
    common::init_tracing();

    let options = v5_options().topic_alias_maximum(2u16).build().unwrap();
    let mut harness = connect_v5(options, None).await;

    harness.broker.send_packet(&inbound("t", Some(9)));
    let event = next_event_matching(&mut harness.events, 5, |e| {
        matches!(e, SessionEvent::Error(_))
    })
    .await;
    match event {
        SessionEvent::Error(error) => assert!(matches!(
            &*error,
            SessionError::TopicAlias(TopicAliasError::OutOfRange { alias: 9, max: 2 })
        )),
        _ => unreachable!(),
    }
}
