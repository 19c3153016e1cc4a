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

//! Keepalive scheduling tests, run against paused tokio time: with
//! keepalive = 10 s and no traffic, exactly one PINGREQ goes out at t ≈ 10 s
//! and a keepalive timeout is declared at t ≈ 15 s absent a PINGRESP.

use std::time::Duration;

use mqtt_session_tokio::mqtt_session::{
    ConnectOptions, Packet, SessionError, SessionEvent, SessionState, TimeoutKind,
};

mod common;

use common::next_event_matching;
use stub_transport::start_connected;

#[tokio::test(start_paused = true)]
async fn pingreq_at_keepalive_and_timeout_at_one_and_a_half() {
    common::init_tracing();

    let options = ConnectOptions::builder()
        .keep_alive_secs(10u16)
        .reconnect_period_ms(0u64)
        .build()
        .unwrap();
    let mut harness = start_connected(options).await;

    // Quiet until the second tick: nothing on the wire before t = 10 s.
    assert!(harness
        .broker
        .try_recv_packet(Duration::from_millis(9500))
        .await
        .is_none());

    match harness.broker.try_recv_packet(Duration::from_secs(2)).await {
        Some(Packet::Pingreq) => {}
        other => panic!("expected PINGREQ at t = 10s, got {other:?}"),
    }

    // No PINGRESP: the third tick declares a keepalive timeout and the
    // session cleans up as if the transport had failed.
    let event = next_event_matching(&mut harness.events, 30, |e| {
        matches!(e, SessionEvent::Error(_))
    })
    .await;
    match event {
        SessionEvent::Error(error) => {
            assert!(matches!(
                &*error,
                SessionError::Timeout(TimeoutKind::Keepalive)
            ));
        }
        _ => unreachable!(),
    }
    next_event_matching(&mut harness.events, 30, |e| matches!(e, SessionEvent::Close)).await;
    assert_eq!(
        harness.session.state().await.unwrap(),
        SessionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn pingresp_resets_the_liveness_window() {
    common::init_tracing();

    let options = ConnectOptions::builder()
        .keep_alive_secs(10u16)
        .reconnect_period_ms(0u64)
        .build()
        .unwrap();
    let mut harness = start_connected(options).await;

    match harness.broker.try_recv_packet(Duration::from_secs(11)).await {
        Some(Packet::Pingreq) => {}
        other => panic!("expected first PINGREQ, got {other:?}"),
    }
    harness.broker.send_packet(&Packet::Pingresp);

    // The response restarted the window; the next PINGREQ lands a full
    // keepalive later instead of a timeout.
    match harness.broker.try_recv_packet(Duration::from_secs(11)).await {
        Some(Packet::Pingreq) => {}
        other => panic!("expected second PINGREQ, got {other:?}"),
    }
    assert_eq!(
        harness.session.state().await.unwrap(),
        SessionState::Connected
    );
}

#[tokio::test]
async fn keepalive_zero_disables_the_manager() {
    common::init_tracing();

    let options = ConnectOptions::builder()
        .keep_alive_secs(0u16)
        .build()
        .unwrap();
    let mut harness = start_connected(options).await;

    assert!(harness
        .broker
        .try_recv_packet(Duration::from_millis(300))
        .await
        .is_none());
    assert_eq!(
        harness.session.state().await.unwrap(),
        SessionState::Connected
    );
}
