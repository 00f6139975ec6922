//! MQTT transport loop
//!
//! Polls the broker connection and feeds every publish on `<base>/#` to the
//! [`CoredumpReceiver`]. The subscription is (re)issued on every ConnAck, so
//! it survives reconnects. Connection errors are logged and retried after a
//! short delay; they never end the loop, only cancellation does.

use crate::config::MqttConfig;
use crate::services::receiver::CoredumpReceiver;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Fragments can be large; rumqttc defaults to 10 KiB
const MAX_PACKET_SIZE: usize = 1024 * 1024;

const CLIENT_CHANNEL_CAPACITY: usize = 64;

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }
    if config.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

pub async fn run_mqtt(
    config: &MqttConfig,
    receiver: Arc<CoredumpReceiver>,
    cancel: CancellationToken,
) {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(config), CLIENT_CHANNEL_CAPACITY);
    let filter = format!("{}/#", receiver.base_topic());

    info!(
        host = %config.host,
        port = config.port,
        tls = config.use_tls,
        filter = %filter,
        "Connecting to MQTT broker"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = client.try_disconnect() {
                    debug!(error = %e, "MQTT disconnect request failed");
                }
                info!("MQTT loop stopped");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    // try_subscribe: awaiting here would stall the event loop it needs
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::ExactlyOnce) {
                        error!(filter = %filter, error = %e, "Subscribe request failed");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    info!(filter = %filter, "Subscribed");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // Protocol errors are logged by the receiver
                    let _ = receiver.handle_message(&publish.topic, publish.payload.to_vec());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection error, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            },
        }
    }
}
