//! mqline-client - Async MQTT 3.1.1 / 5.0 client.
//!
//! A cloneable [`AsyncClient`] handle submits requests to an [`EventLoop`]
//! that owns the broker connection. The loop reconnects with capped
//! exponential backoff, resends unacknowledged publishes when the session
//! survives, completes inbound QoS 2 exactly once and keeps the connection
//! alive with PINGREQ.
//!
//! # Example
//!
//! ```ignore
//! use mqline_client::{AsyncClient, ClientConfig, QoS};
//!
//! let config = ClientConfig::new("localhost:1883")
//!     .client_id("my-client")
//!     .mqtt5();
//!
//! let (client, mut eventloop) = AsyncClient::new(config, 10);
//! tokio::spawn(async move {
//!     while let Ok(event) = eventloop.poll().await {
//!         log::debug!("{:?}", event);
//!     }
//! });
//!
//! client.connect().await?;
//! let mut sensors = client.subscribe_stream("sensors/#", QoS::AtLeastOnce).await?;
//! client.publish("sensors/temp", "25.5", QoS::AtLeastOnce, false).await?;
//! ```
//!
//! # Transports
//!
//! The address selects the transport: `host:port` for TCP (TLS when a
//! [`TlsConfig`] is set), `unix:///path` for Unix sockets and `ws://` or
//! `wss://` URLs for WebSocket.

mod auth;
mod client;
mod config;
mod connection;
mod delivery;
mod error;
mod event_loop;
mod events;
mod keep_alive;
mod outbox;
mod packet_id;
mod request;
mod topic;
mod transport;
mod will;

pub use auth::AuthHandler;
pub use client::{AsyncClient, DisconnectOptions, MessageStream};
pub use config::{
    ClientConfig, ClientSettings, ConfigError, ReconnectConfig, TlsConfig, TransportAddress,
};
pub use connection::ConnectionState;
pub use error::{ClientError, Result};
pub use event_loop::EventLoop;
pub use events::{
    BrokerCapabilities, ConnectionInfo, Event, Message, PublishOutcome, SubscriptionResult,
    UnsubscriptionResult,
};
pub use will::Will;

// Re-export useful types from core
pub use mqline_core::{
    reason_code, AckProperties, ConnectProperties, ProtocolVersion, Publish, PublishProperties,
    QoS, RetainHandling, SubscribeProperties, Subscription, SubscriptionOptions,
    UnsubscribeProperties, WillProperties,
};
