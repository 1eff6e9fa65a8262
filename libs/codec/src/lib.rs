#![forbid(unsafe_code)]
#![warn(clippy::default_trait_access)]

#[macro_use]
mod macros;
mod auth;
mod codec;
mod connack;
mod connect;
mod disconnect;
mod error;
mod packet;
mod packet_id_allocator;
mod property;
mod puback;
mod pubcomp;
mod publish;
mod pubrec;
mod pubrel;
mod reader;
mod suback;
mod subscribe;
mod types;
mod unsuback;
mod unsubscribe;
mod writer;

pub use auth::{Auth, AuthProperties, AuthReasonCode};
pub use codec::Codec;
pub use connack::{ConnAck, ConnAckProperties, ConnectReasonCode};
pub use connect::{Connect, ConnectProperties, LastWill, WillProperties};
pub use disconnect::{Disconnect, DisconnectProperties, DisconnectReasonCode};
pub use error::{DecodeError, EncodeError};
pub use packet::Packet;
pub use packet_id_allocator::PacketIdAllocator;
pub use puback::{PubAck, PubAckProperties, PubAckReasonCode};
pub use pubcomp::{PubComp, PubCompProperties, PubCompReasonCode};
pub use publish::{Publish, PublishProperties};
pub use pubrec::{PubRec, PubRecProperties, PubRecReasonCode};
pub use pubrel::{PubRel, PubRelProperties, PubRelReasonCode};
pub use suback::{SubAck, SubAckProperties, SubscribeReasonCode};
pub use subscribe::{RetainHandling, Subscribe, SubscribeFilter, SubscribeProperties};
pub use types::{Level, Login, Qos};
pub use unsuback::{UnsubAck, UnsubAckProperties, UnsubAckReasonCode};
pub use unsubscribe::{Unsubscribe, UnsubscribeProperties};
