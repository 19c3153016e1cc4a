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

pub mod codec;
pub mod error;
pub mod event;
pub mod keep_alive;
pub mod options;
pub mod packet;
pub mod packet_id;
mod request_response;
pub mod session;
pub mod store;
pub mod topic_alias;
pub mod transport;

pub use codec::{CodecError, DecodeOutcome, PacketCodec};
pub use error::{SessionError, TimeoutKind};
pub use event::{EventBus, SessionEvent};
pub use options::{
    AckOverride, ConnectOptions, PacketIdStrategy, ProtocolVersion, PublishOptions,
    SubscriptionGrant,
};
pub use packet::{
    Auth, Connack, Connect, Disconnect, Packet, PacketId, PacketType, Properties, Puback, Publish,
    Pubcomp, Pubrec, Pubrel, Qos, StoredPacket, Suback, Subscribe, SubscribeEntry, SubscribeOpts,
    Unsuback, Unsubscribe, Will,
};
pub use packet_id::PacketIdAllocator;
pub use session::{Session, SessionState};
pub use store::{PacketStore, StoreError};
pub use topic_alias::TopicAliasError;
pub use transport::{Connector, TransportError, TransportOps};
