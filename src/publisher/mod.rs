//! Publisher - Outbound Detection Delivery
//!
//! ## Responsibilities
//!
//! - Deliver one JSON message per detection to the outbound MQTT topic
//! - Own the broker connection lifecycle with its own reconnect backoff,
//!   decoupled from the bridge poll cadence
//!
//! A broker outage does not stop the bridge loop; it only makes every
//! delivery attempt fail until the driver task reconnects. Delivery is
//! at-least-once: payloads carry the detection `id` so downstream
//! consumers can de-duplicate.

use crate::error::{Error, Result};
use crate::models::Detection;
use crate::state::MqttConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Delivery seam between the bridge loop and the outbound channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, detection: &Detection) -> Result<()>;
}

/// Outbound message shape. The field set and types are fixed: downstream
/// consumers key on these names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionPayload {
    pub id: i64,
    pub common_name: String,
    pub scientific_name: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&Detection> for DetectionPayload {
    fn from(det: &Detection) -> Self {
        Self {
            id: det.id,
            common_name: det.common_name.clone(),
            scientific_name: det.scientific_name.clone(),
            confidence: det.confidence,
            timestamp: det.timestamp,
        }
    }
}

/// MQTT publisher over rumqttc
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    connected: Arc<AtomicBool>,
    publish_timeout: Duration,
}

impl MqttPublisher {
    /// Connect to the broker and spawn the event-loop driver task.
    ///
    /// The driver retries forever with exponential capped backoff; rumqttc
    /// re-establishes the session on the next poll after a failure.
    pub fn start(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));

        let flag = connected.clone();
        let broker = format!("{}:{}", config.host, config.port);
        tokio::spawn(async move {
            let mut backoff = RECONNECT_BACKOFF_INITIAL;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == rumqttc::ConnectReturnCode::Success {
                            tracing::info!(broker = %broker, "MQTT connected");
                            flag.store(true, Ordering::Relaxed);
                            backoff = RECONNECT_BACKOFF_INITIAL;
                        } else {
                            tracing::error!(broker = %broker, code = ?ack.code, "MQTT connection refused");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if flag.swap(false, Ordering::Relaxed) {
                            tracing::warn!(broker = %broker, error = %e, "MQTT connection lost");
                        }
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(RECONNECT_BACKOFF_CAP);
                    }
                }
            }
        });

        Self {
            client,
            topic: config.topic.clone(),
            connected,
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, detection: &Detection) -> Result<()> {
        // Fail fast while the driver is reconnecting; the bridge retries the
        // same batch on its next cycle.
        if !self.connected.load(Ordering::Relaxed) {
            return Err(Error::Publish("MQTT broker disconnected".to_string()));
        }

        let payload = serde_json::to_vec(&DetectionPayload::from(detection))?;

        match tokio::time::timeout(
            self.publish_timeout,
            self.client
                .publish(self.topic.clone(), QoS::AtLeastOnce, false, payload),
        )
        .await
        {
            Ok(Ok(())) => {
                tracing::debug!(id = detection.id, topic = %self.topic, "Detection published");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Publish(format!("publish to {}: {e}", self.topic))),
            Err(_) => Err(Error::Publish(format!(
                "publish to {} timed out after {:?}",
                self.topic, self.publish_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_detection() -> Detection {
        Detection {
            id: 42,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            common_name: "Merle noir".to_string(),
            scientific_name: "Turdus merula".to_string(),
            confidence: 0.93,
            clip_path: Some("clips/42.wav".to_string()),
        }
    }

    #[test]
    fn test_payload_field_set_is_stable() {
        let payload = DetectionPayload::from(&sample_detection());
        let value = serde_json::to_value(&payload).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["common_name", "confidence", "id", "scientific_name", "timestamp"]
        );
        assert_eq!(obj["id"], 42);
        assert_eq!(obj["common_name"], "Merle noir");
    }

    #[test]
    fn test_payload_drops_opaque_fields() {
        // clip_path is passed through the REST surface but not the stream
        let value =
            serde_json::to_value(DetectionPayload::from(&sample_detection())).unwrap();
        assert!(value.get("clip_path").is_none());
    }
}
