mod telemetry;

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS, Transport};
use std::path::PathBuf;
use std::time::Duration;
use telemetry::{Payload, Sample};
use tracing::{error, info, warn};

/// Publishes synthetic MPU6050 sample batches in the ESP32 wire format.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    #[arg(long, env = "MQTT_TOPIC", default_value = "esp32/mpu6050/data")]
    topic: String,

    /// Batches per second
    #[arg(long, env = "RATE", default_value_t = 2)]
    rate: u64,

    /// Samples per batch, spaced `sample_period_ms` apart
    #[arg(long, env = "BATCH_SIZE", default_value_t = 50)]
    batch_size: usize,

    #[arg(long, default_value_t = 10)]
    sample_period_ms: i64,

    /// Publish an invalid JSON payload every N batches (0 disables)
    #[arg(long, default_value_t = 0)]
    malformed_every: u64,

    /// CA, client certificate and key for brokers that require mTLS
    #[arg(long, env = "MQTT_ROOT_CA", requires_all = ["certificate", "private_key"])]
    root_ca: Option<PathBuf>,

    #[arg(long, env = "MQTT_CERTIFICATE")]
    certificate: Option<PathBuf>,

    #[arg(long, env = "MQTT_PRIVATE_KEY")]
    private_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting IMU simulator");
    info!(
        "Broker: {}:{}, topic: {}, rate: {} batch/s, batch size: {}",
        args.broker, args.port, args.topic, args.rate, args.batch_size
    );

    let client_id = format!("imu-sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    if let (Some(ca), Some(cert), Some(key)) = (&args.root_ca, &args.certificate, &args.private_key) {
        match (std::fs::read(ca), std::fs::read(cert), std::fs::read(key)) {
            (Ok(ca), Ok(cert), Ok(key)) => {
                info!("Using mutual TLS");
                mqtt_options.set_transport(Transport::tls(ca, Some((cert, key)), None));
            }
            _ => {
                error!("Failed to read TLS material");
                std::process::exit(1);
            }
        }
    }

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);

    // Spawn eventloop handler
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Connected to MQTT broker, publishing");

    let interval = Duration::from_millis(1000 / args.rate.max(1));
    let mut ticker = tokio::time::interval(interval);
    let mut rng = rand::thread_rng();
    let mut published = 0u64;

    loop {
        ticker.tick().await;

        let payload = if args.malformed_every > 0 && (published + 1) % args.malformed_every == 0 {
            warn!("Publishing malformed payload");
            b"{\"samples\": [".to_vec()
        } else {
            let batch = generate_batch(&mut rng, args.batch_size, args.sample_period_ms);
            match serde_json::to_vec(&batch) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to serialize batch: {}", e);
                    continue;
                }
            }
        };

        match client.publish(&args.topic, QoS::AtLeastOnce, false, payload).await {
            Ok(_) => published += 1,
            Err(e) => warn!("Failed to publish: {}", e),
        }

        if published % 100 == 0 {
            info!("Published {} batches", published);
        }
    }
}

/// A device lying flat: gravity on z plus sensor noise, occasional bumps.
fn generate_batch(rng: &mut impl Rng, len: usize, period_ms: i64) -> Payload {
    let end = Utc::now().timestamp_millis();
    let start = end - period_ms * len.saturating_sub(1) as i64;

    let samples = (0..len)
        .map(|i| {
            let bump = if rng.gen_bool(0.02) {
                rng.gen_range(-4.0..4.0)
            } else {
                0.0
            };
            Sample {
                t: start + i as i64 * period_ms,
                a: [
                    rng.gen_range(-0.15..0.15) + bump,
                    rng.gen_range(-0.15..0.15),
                    9.81 + rng.gen_range(-0.1..0.1),
                ],
                g: [
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-1.5..1.5) + bump * 10.0,
                ],
            }
        })
        .collect();

    Payload { samples }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_batch_timestamps() {
        let mut rng = rand::thread_rng();
        let batch = generate_batch(&mut rng, 5, 10);

        assert_eq!(batch.samples.len(), 5);
        let steps: Vec<i64> = batch.samples.windows(2).map(|w| w[1].t - w[0].t).collect();
        assert_eq!(steps, vec![10, 10, 10, 10]);
    }

    #[test]
    fn test_wire_format() {
        let mut rng = rand::thread_rng();
        let json = serde_json::to_value(generate_batch(&mut rng, 1, 10)).unwrap();

        let sample = &json["samples"][0];
        assert!(sample["t"].is_i64());
        assert_eq!(sample["a"].as_array().unwrap().len(), 3);
        assert_eq!(sample["g"].as_array().unwrap().len(), 3);
    }
}
