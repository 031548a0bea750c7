//! The user-facing client handle.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mqline_core::{
    reason_code, Disconnect, Publish, PublishProperties, QoS, Subscribe, SubscribeProperties,
    Subscription, Unsubscribe, UnsubscribeProperties,
};
use tokio::sync::{mpsc, oneshot};

use crate::auth::AuthHandler;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::event_loop::{Command, EventLoop};
use crate::events::{
    ConnectionInfo, Message, PublishOutcome, SubscriptionResult, UnsubscriptionResult,
};
use crate::transport::Dialer;

const DEFAULT_STREAM_CAPACITY: usize = 100;

/// A stream of messages for a specific subscription.
///
/// Messages matching the subscription's topic filter are delivered here.
pub struct MessageStream {
    rx: mpsc::Receiver<Message>,
    filter: String,
}

impl MessageStream {
    /// Receive the next message.
    ///
    /// Returns `None` when the client shuts down or unsubscribes the filter.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Get the topic filter this stream is subscribed to.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// How to close the connection in [`AsyncClient::disconnect_with`].
#[derive(Debug, Clone, Default)]
pub struct DisconnectOptions {
    /// Ask the broker to publish the will anyway (MQTT 5.0 only).
    pub send_will: bool,
    /// Override the session expiry negotiated at connect (MQTT 5.0 only).
    pub session_expiry: Option<u32>,
    pub user_properties: Vec<(String, String)>,
}

impl DisconnectOptions {
    pub(crate) fn to_packet(&self) -> Disconnect {
        let code = if self.send_will {
            reason_code::DISCONNECT_WITH_WILL
        } else {
            reason_code::SUCCESS
        };
        let mut disconnect = Disconnect::new(code);
        disconnect.properties.session_expiry_interval = self.session_expiry;
        disconnect.properties.user_properties = self.user_properties.clone();
        disconnect
    }
}

/// Async MQTT client handle.
///
/// This is the user-facing API. It's `Clone` and can be shared across tasks.
/// Commands are sent to the `EventLoop` via a channel; nothing happens
/// unless the `EventLoop` is polled.
#[derive(Clone)]
pub struct AsyncClient {
    tx: mpsc::Sender<Command>,
}

impl AsyncClient {
    /// Create a new client and eventloop pair.
    ///
    /// `cap` is the command channel capacity (10 is usually fine).
    pub fn new(config: ClientConfig, cap: usize) -> (Self, EventLoop) {
        Self::with_dialer(config, cap, Dialer::Network)
    }

    pub(crate) fn with_dialer(
        config: ClientConfig,
        cap: usize,
        dialer: Dialer,
    ) -> (Self, EventLoop) {
        let (tx, rx) = mpsc::channel(cap.max(1));
        let client = Self { tx };
        let eventloop = EventLoop::new(config, rx, dialer);
        (client, eventloop)
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(command(resp_tx))
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        resp_rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Wait until the session is established.
    ///
    /// The event loop dials on its first poll; this resolves with the result
    /// of the attempt in progress, or starts one when the client is idle or
    /// waiting out a reconnect delay. Concurrent calls share one attempt.
    pub async fn connect(&self) -> Result<ConnectionInfo> {
        self.call(|resp| Command::Connect { resp }).await
    }

    /// Publish a message.
    ///
    /// Resolves once the broker has acknowledged it for QoS 1 and 2, or once
    /// it has been written for QoS 0.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishOutcome> {
        self.publish_with_properties(topic, payload, qos, retain, PublishProperties::default())
            .await
    }

    /// Publish with MQTT 5.0 properties.
    pub async fn publish_with_properties(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
        properties: PublishProperties,
    ) -> Result<PublishOutcome> {
        let publish = Publish {
            retain,
            properties,
            ..Publish::new(topic, qos, payload)
        };
        self.call(|resp| Command::Publish { publish, resp }).await
    }

    /// Subscribe to topics (raw API).
    ///
    /// Returns one result per filter, in order. For most use cases, prefer
    /// `subscribe_stream()` which gives you a dedicated message stream.
    pub async fn subscribe(&self, topics: &[(&str, QoS)]) -> Result<Vec<SubscriptionResult>> {
        let subscriptions = topics
            .iter()
            .map(|(filter, qos)| Subscription::new(*filter, *qos))
            .collect();
        self.subscribe_with(subscriptions, SubscribeProperties::default())
            .await
    }

    /// Subscribe with full per-filter options and MQTT 5.0 properties.
    pub async fn subscribe_with(
        &self,
        subscriptions: Vec<Subscription>,
        properties: SubscribeProperties,
    ) -> Result<Vec<SubscriptionResult>> {
        let subscribe = Subscribe {
            packet_id: 0,
            subscriptions,
            properties,
        };
        self.call(|resp| Command::Subscribe {
            subscribe,
            stream: None,
            resp,
        })
        .await
    }

    /// Subscribe and get a dedicated message stream.
    ///
    /// This is the recommended way to handle messages. Each subscription
    /// gets its own stream, so you can handle different topics in different
    /// tasks without manual topic matching.
    ///
    /// ```ignore
    /// let mut sensors = client.subscribe_stream("sensors/#", QoS::AtLeastOnce).await?;
    ///
    /// while let Some(msg) = sensors.recv().await {
    ///     println!("{}: {:?}", msg.topic, msg.payload);
    /// }
    /// ```
    pub async fn subscribe_stream(&self, filter: &str, qos: QoS) -> Result<MessageStream> {
        let (msg_tx, msg_rx) = mpsc::channel(DEFAULT_STREAM_CAPACITY);
        let subscribe = Subscribe {
            packet_id: 0,
            subscriptions: vec![Subscription::new(filter, qos)],
            properties: SubscribeProperties::default(),
        };
        let results = self
            .call(|resp| Command::Subscribe {
                subscribe,
                stream: Some(msg_tx),
                resp,
            })
            .await?;

        if let Some(SubscriptionResult::Failed(code)) = results.first() {
            return Err(ClientError::ServerRejected {
                packet: "SUBACK",
                reason_code: *code,
                reason_string: None,
            });
        }

        Ok(MessageStream {
            rx: msg_rx,
            filter: filter.to_string(),
        })
    }

    /// Unsubscribe from topics. Streams registered for these filters end.
    pub async fn unsubscribe(&self, topics: &[&str]) -> Result<Vec<UnsubscriptionResult>> {
        let filters = topics.iter().map(|t| t.to_string()).collect();
        self.unsubscribe_with(filters, UnsubscribeProperties::default())
            .await
    }

    /// Unsubscribe with MQTT 5.0 properties.
    pub async fn unsubscribe_with(
        &self,
        filters: Vec<String>,
        properties: UnsubscribeProperties,
    ) -> Result<Vec<UnsubscriptionResult>> {
        let unsubscribe = Unsubscribe {
            packet_id: 0,
            filters,
            properties,
        };
        self.call(|resp| Command::Unsubscribe { unsubscribe, resp })
            .await
    }

    /// Run an MQTT 5.0 re-authentication exchange on the live connection.
    pub async fn re_authenticate(
        &self,
        handler: Arc<dyn AuthHandler>,
        timeout: Duration,
    ) -> Result<()> {
        self.call(|resp| Command::ReAuthenticate {
            handler,
            timeout,
            resp,
        })
        .await
    }

    /// Disconnect from the broker and shut the event loop down.
    pub async fn disconnect(&self) -> Result<()> {
        self.disconnect_with(DisconnectOptions::default()).await
    }

    /// Disconnect with MQTT 5.0 options.
    pub async fn disconnect_with(&self, options: DisconnectOptions) -> Result<()> {
        match self
            .call(|resp| Command::Disconnect { options, resp })
            .await
        {
            // Already gone
            Err(ClientError::ConnectionClosed) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_options() {
        let packet = DisconnectOptions::default().to_packet();
        assert_eq!(packet.reason_code, reason_code::SUCCESS);
        assert_eq!(packet.properties.session_expiry_interval, None);

        let options = DisconnectOptions {
            send_will: true,
            session_expiry: Some(0),
            user_properties: vec![("k".into(), "v".into())],
        };
        let packet = options.to_packet();
        assert_eq!(packet.reason_code, 0x04);
        assert_eq!(packet.properties.session_expiry_interval, Some(0));
        assert_eq!(packet.properties.user_properties.len(), 1);
    }

    #[tokio::test]
    async fn test_calls_fail_without_event_loop() {
        let (client, eventloop) = AsyncClient::new(ClientConfig::new("localhost:1883"), 4);
        drop(eventloop);
        assert!(matches!(
            client.connect().await,
            Err(ClientError::ConnectionClosed)
        ));
        assert!(client.disconnect().await.is_ok());
    }
}
