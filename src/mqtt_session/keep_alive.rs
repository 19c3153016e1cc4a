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

//! Keepalive liveness tracking.
//!
//! The counting logic is separated from scheduling: the session actor fires a
//! tick every `keep_alive / 2` and feeds it through [`KeepAliveState::tick`],
//! while any traffic resets the counter and the tick timer. With no traffic
//! at all, a keepalive of K seconds sends PINGREQ at the second tick (t = K)
//! and declares a timeout at the third (t = 1.5 K).

use std::time::Duration;

/// What the session must do in response to a keepalive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    /// Still within the liveness window.
    Idle,
    /// Send PINGREQ now.
    SendPing,
    /// No PINGRESP within the window; treat the connection as dead.
    Timeout,
}

#[derive(Debug)]
pub struct KeepAliveState {
    enabled: bool,
    interval: Duration,
    counter: u8,
}

impl KeepAliveState {
    /// `keep_alive_secs == 0` disables the manager entirely.
    pub fn new(keep_alive_secs: u16) -> Self {
        Self {
            enabled: keep_alive_secs > 0,
            interval: Duration::from_millis(u64::from(keep_alive_secs) * 1000 / 2),
            counter: 0,
        }
    }

    /// The tick period (`keep_alive / 2`), or `None` when disabled.
    pub fn interval(&self) -> Option<Duration> {
        self.enabled.then_some(self.interval)
    }

    pub fn tick(&mut self) -> KeepAliveAction {
        if !self.enabled {
            return KeepAliveAction::Idle;
        }
        self.counter = self.counter.saturating_add(1);
        match self.counter {
            2 => KeepAliveAction::SendPing,
            n if n > 2 => KeepAliveAction::Timeout,
            _ => KeepAliveAction::Idle,
        }
    }

    /// Any outbound write (other than the PINGREQ itself) or any inbound
    /// packet proves liveness and restarts the window.
    pub fn on_activity(&mut self) {
        self.counter = 0;
    }
}
