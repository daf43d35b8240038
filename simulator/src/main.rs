mod report;

use clap::Parser;
use report::ReportEnvelope;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};

/// Publishes synthetic camera reports to an MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "camera-simulator")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Number of simulated devices
    #[arg(long, env = "DEVICES", default_value_t = 5)]
    devices: usize,

    /// Delay between report rounds (one report per device per round)
    #[arg(long, env = "REPORT_INTERVAL_MS", default_value_t = 2000)]
    interval_ms: u64,

    #[arg(long, env = "TOPIC_PREFIX", default_value = "devices")]
    topic_prefix: String,
}

// Outgoing frames exceed rumqttc's default packet cap.
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting camera simulator");
    info!(
        "Broker: {}:{}, devices: {}, interval: {}ms",
        args.broker, args.port, args.devices, args.interval_ms
    );

    let client_id = format!("camera-sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    // Spawn eventloop handler
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT eventloop error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting to publish reports");

    let mut rng = rand::thread_rng();
    let mut counter = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));

    loop {
        ticker.tick().await;

        for device in 0..args.devices {
            let device_id = format!("cam-{}", device);
            let envelope = ReportEnvelope::random(&mut rng, device_id.clone());

            let topic = format!("{}/{}/reports", args.topic_prefix, device_id);
            let payload = match serde_json::to_vec(&envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to serialize report: {}", e);
                    continue;
                }
            };

            match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => {
                    counter += 1;
                }
                Err(e) => {
                    warn!("Failed to publish: {}", e);
                }
            }
        }

        if counter % 100 == 0 && counter > 0 {
            info!("Published {} reports", counter);
        }
    }
}
