//! mqline-core - MQTT 3.1.1 / 5.0 packet codec.
//!
//! Frames raw bytes into length-delimited packets, (de)serializes typed
//! bodies for all control packet kinds and the MQTT5 property block. The
//! client crate builds its protocol engine on top of these types.

pub mod error;
pub mod packet;
pub mod property;
pub mod varint;

pub use error::{ProtocolError, Result};
pub use packet::*;
pub use property::{
    AckProperties, AuthProperties, ConnackProperties, ConnectProperties, DisconnectProperties,
    PropertyId, PropertySet, PublishProperties, SubscribeProperties, UnsubscribeProperties,
    WillProperties,
};
