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

use tokio::sync::oneshot;

use crate::mqtt_session::error::SessionError;
use crate::mqtt_session::options::SubscriptionGrant;
use crate::mqtt_session::packet::{Publish, StoredPacket, SubscribeEntry};
use crate::mqtt_session::session::SessionState;

pub(crate) enum Request {
    Publish {
        publish: Publish,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    Subscribe {
        entries: Vec<SubscribeEntry>,
        response_tx: oneshot::Sender<Result<Vec<SubscriptionGrant>, SessionError>>,
    },
    Unsubscribe {
        topics: Vec<String>,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    End {
        force: bool,
        response_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    GetState {
        response_tx: oneshot::Sender<SessionState>,
    },
    GetStoredPackets {
        response_tx: oneshot::Sender<Vec<StoredPacket>>,
    },
}
