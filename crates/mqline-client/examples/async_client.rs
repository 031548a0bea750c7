//! Async API example.
//!
//! Run with: cargo run -p mqline-client --example async_client
//!
//! This example demonstrates:
//! - Split architecture (AsyncClient + EventLoop)
//! - subscribe_stream() for per-subscription message handling
//! - Acknowledged publishes at QoS 1 and 2

use std::time::Duration;

use mqline_client::{AsyncClient, ClientConfig, Event, QoS};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost:1883".to_string());
    let config = ClientConfig::new(&address)
        .client_id("async-example")
        .clean_session(true)
        .keep_alive(30)
        .mqtt5();

    // Client is Clone and can be shared across tasks.
    // EventLoop owns the connection and must be polled.
    let (client, mut eventloop) = AsyncClient::new(config, 10);

    let poller = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Connected(info)) => {
                    println!(
                        "Connected as {} (session present: {})",
                        info.client_id, info.session_present
                    )
                }
                Ok(Event::Message(msg)) => println!("Unrouted message on {}", msg.topic),
                Ok(Event::Reconnecting { attempt, delay }) => {
                    println!("Reconnecting in {:?} (attempt {})", delay, attempt)
                }
                Ok(event) => log::debug!("{:?}", event),
                Err(e) => {
                    println!("Event loop stopped: {}", e);
                    break;
                }
            }
        }
    });

    client.connect().await?;

    let mut sensors = client
        .subscribe_stream("example/sensors/#", QoS::AtLeastOnce)
        .await?;
    tokio::spawn(async move {
        while let Some(msg) = sensors.recv().await {
            println!("[SENSOR] {} = {}", msg.topic, String::from_utf8_lossy(&msg.payload));
        }
    });

    let outcome = client
        .publish("example/sensors/temp", "23.5", QoS::AtLeastOnce, false)
        .await?;
    println!("PUBACK for packet {:?}", outcome.packet_id);

    let outcome = client
        .publish("example/sensors/humidity", "65%", QoS::ExactlyOnce, false)
        .await?;
    println!("PUBCOMP for packet {:?}", outcome.packet_id);

    tokio::time::sleep(Duration::from_millis(500)).await;

    client.disconnect().await?;
    poller.await?;
    println!("Done!");

    Ok(())
}
