//! MQTT publisher for egress events
//!
//! Publishes cycle results to MQTT topics for downstream consumers:
//! - geofence/snapshots - Per-entity snapshots every cycle (QoS 0)
//! - geofence/alerts - Transitions into/out of alerting states (QoS 1)
//! - geofence/metrics - Periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    snapshots_topic: String,
    alerts_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("geofence-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let metrics_topic = metrics_topic_for(config.snapshots_topic());
        Self {
            client,
            rx,
            snapshots_topic: config.snapshots_topic().to_string(),
            alerts_topic: config.alerts_topic().to_string(),
            metrics_topic,
        }
    }

    /// Run the publisher loop
    ///
    /// Processes messages from the channel and publishes to MQTT.
    /// Runs until shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            snapshots = %self.snapshots_topic,
            alerts = %self.alerts_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        // Drain remaining messages
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Snapshot(payload) => {
                self.publish_json(&self.snapshots_topic, QoS::AtMostOnce, &payload).await;
            }
            EgressMessage::Alert(payload) => {
                // Alerts use at-least-once delivery
                self.publish_json(&self.alerts_topic, QoS::AtLeastOnce, &payload).await;
            }
            EgressMessage::Metrics(payload) => {
                self.publish_json(&self.metrics_topic, QoS::AtMostOnce, &payload).await;
            }
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, qos: QoS, payload: &T) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(topic = %topic, error = %e, "mqtt_egress_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(topic, qos, false, json.into_bytes()).await {
            match qos {
                QoS::AtMostOnce => debug!(topic = %topic, error = %e, "mqtt_egress_publish_failed"),
                _ => error!(topic = %topic, error = %e, "mqtt_egress_publish_failed"),
            }
        }
    }
}

/// Metrics go to a sibling of the snapshots topic: `a/snapshots` → `a/metrics`
fn metrics_topic_for(snapshots_topic: &str) -> String {
    match snapshots_topic.rsplit_once('/') {
        Some((prefix, _)) => format!("{}/metrics", prefix),
        None => "metrics".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_topic_for() {
        assert_eq!(metrics_topic_for("geofence/snapshots"), "geofence/metrics");
        assert_eq!(metrics_topic_for("site/a/out"), "site/a/metrics");
        assert_eq!(metrics_topic_for("snapshots"), "metrics");
    }
}
