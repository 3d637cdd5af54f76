//! MQTT client for receiving observation batches from the location bridge

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::ingress::{parse_batch, ObservationBatch};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Start the MQTT client and forward decoded batches to the cycle runner
///
/// Batches are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped batches are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    batch_tx: mpsc::Sender<ObservationBatch>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("geofence-ingress-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    // Batches can carry a whole team's positions
    mqttoptions.set_max_packet_size(1024 * 1024, 1024 * 1024);

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.ingress_topic(), QoS::AtLeastOnce).await?;

    info!(
        topic = %config.ingress_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(batch) = decode_payload(&publish.payload, &metrics) else {
                            continue;
                        };
                        debug!(
                            topic = %publish.topic,
                            observations = %batch.observations.len(),
                            undecodable = %batch.undecodable,
                            "batch_received"
                        );
                        metrics.record_batch_received();
                        if let Err(e) = batch_tx.try_send(batch) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_batch_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("batch_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("batch channel closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Decode a publish payload into a batch, counting payloads that are not one
fn decode_payload(payload: &[u8], metrics: &Metrics) -> Option<ObservationBatch> {
    let json_str = match std::str::from_utf8(payload) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "invalid_utf8_payload");
            metrics.record_payload_undecodable();
            return None;
        }
    };
    match parse_batch(json_str) {
        Ok(batch) => Some(batch),
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "batch_undecodable");
            metrics.record_payload_undecodable();
            None
        }
    }
}
