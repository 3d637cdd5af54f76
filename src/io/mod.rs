//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `ingress` - Observation batch decoding and JSONL replay
//! - `mqtt` - MQTT client for receiving observation batches
//! - `mqtt_egress` - MQTT publisher for snapshots, alerts and metrics
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `egress` - Cycle output to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress;
pub mod egress_channel;
pub mod ingress;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use egress::Egress;
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use ingress::{parse_batch, read_replay_file, run_replay, ObservationBatch};
pub use mqtt_egress::MqttPublisher;
