use crate::decode::decode;
use crate::errors::{Error, Result};
use crate::metrics::{
    CHANNEL_FULL_TOTAL, DECODE_FAILURES_TOTAL, REPORTS_DECODED_TOTAL, REPORTS_TOTAL,
};
use crate::model::{CommandMessage, DeviceReport};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// Camera frames blow past rumqttc's default 10 KiB packet cap.
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Builds the broker client. The same client drives the report subscription
/// and the outbound command path; `main` owns its lifecycle and disconnects
/// it on shutdown.
pub fn connect(broker: &str, port: u16, client_id: &str) -> (AsyncClient, EventLoop) {
    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    AsyncClient::new(mqtt_options, 100)
}

/// Drives the report subscription: decodes each publish and forwards it to
/// the ingest channel. A malformed message is dropped and counted; it never
/// terminates the subscription. The subscription is (re-)issued on every
/// ConnAck, so a broker reconnect picks it back up.
pub async fn run_subscriber(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic: String,
    tx: mpsc::Sender<DeviceReport>,
) -> Result<()> {
    info!("Subscribing to {} with QoS 1", topic);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                client
                    .subscribe(&topic, QoS::AtLeastOnce)
                    .await
                    .map_err(Error::Mqtt)?;
                info!("Connected to broker, subscribed to {}", topic);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                REPORTS_TOTAL.inc();
                debug!(
                    "Received report on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                // Every failure path logs inside; a bad report never stops
                // the loop.
                let _ = handle_payload(&publish.payload, &tx).await;
            }
            Ok(_) => {}
            Err(e) => {
                // rumqttc reconnects on the next poll; just log and pace.
                error!("MQTT connection error: {}", e);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Decodes one raw payload and hands it to the ingest channel.
async fn handle_payload(payload: &[u8], tx: &mpsc::Sender<DeviceReport>) -> Result<()> {
    let report = match decode(payload, Utc::now()) {
        Ok(report) => report,
        Err(e) => {
            DECODE_FAILURES_TOTAL.inc();
            warn!("Dropping undecodable report: {}", e);
            return Err(e);
        }
    };

    match tx.try_send(report) {
        Ok(()) => {
            REPORTS_DECODED_TOTAL.inc();
            Ok(())
        }
        Err(mpsc::error::TrySendError::Full(report)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Ingest channel full, using blocking send");
            tx.send(report).await.map_err(|_| Error::ChannelSend)?;
            REPORTS_DECODED_TOTAL.inc();
            Ok(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("Ingest channel closed, cannot forward report");
            Err(Error::ChannelSend)
        }
    }
}

/// Thin outbound path: publishes operator commands to a device's control
/// topic.
#[derive(Clone)]
pub struct CommandPublisher {
    client: AsyncClient,
}

impl CommandPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    pub async fn publish(&self, device_id: &str, command: &CommandMessage) -> Result<()> {
        let payload = serde_json::to_vec(command)?;
        self.client
            .publish(command_topic(device_id), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(Error::Mqtt)?;
        Ok(())
    }
}

fn command_topic(device_id: &str) -> String {
    format!("devices/{}/commands", device_id)
}
