use crossbeam_channel::Sender;
use rumqttc::{Client, Event, Incoming, MqttOptions, QoS};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    sleep_while_running, ConnectionStatus, DeviceCommand, LogLimiter, ReconnectDecision, ReconnectPolicy,
    TopicRouter, Transport, TransportEvent, Worker,
};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::units::now_ms;

const DEFAULT_PORT: u16 = 1883;

/// MQTT connection on a background thread (rumqttc sync client)
pub struct MqttTransport {
    config: TransportConfig,
    client: Option<Client>,
    status: Arc<Mutex<ConnectionStatus>>,
    worker: Option<Worker>,
    topics: Vec<String>,
}

impl MqttTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            client: None,
            status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            worker: None,
            topics: Vec::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    fn set_status(status: &Mutex<ConnectionStatus>, tx: &Sender<TransportEvent>, next: ConnectionStatus) {
        if let Ok(mut current) = status.lock() {
            if *current == next {
                return;
            }
            *current = next;
        }
        let _ = tx.send(TransportEvent::Connection(next));
    }
}

/// Accepts `mqtt://host:port`, `tcp://host:port` or a bare `host[:port]`
pub fn parse_broker_url(url: &str) -> Result<(String, u16), TransportError> {
    let invalid = || TransportError::InvalidAddress(url.to_string());

    let trimmed = url.trim();
    let rest = match trimmed.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some(_) => return Err(invalid()),
        None => trimmed,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() || host.contains('/') {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

impl Transport for MqttTransport {
    fn start(&mut self, tx: Sender<TransportEvent>) -> Result<(), TransportError> {
        let url = self.config.broker_url.clone().ok_or(TransportError::NotConfigured)?;
        if self.status() == ConnectionStatus::Disabled {
            return Err(TransportError::Disabled {
                attempts: self.config.max_connection_attempts,
            });
        }

        if self.is_running() {
            return Ok(());
        }
        // A loop that gave up or lost the session has already exited
        self.worker = None;

        let (host, port) = parse_broker_url(&url)?;

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        let (client, mut connection) = Client::new(options, 32);

        let mut router = TopicRouter::new(&self.config.topic_prefix, &self.config.visualizer_prefix);
        self.topics = router.subscriptions();
        self.client = Some(client.clone());

        let status = self.status.clone();
        let topics = self.topics.clone();
        let mut policy = ReconnectPolicy::new(
            self.config.max_connection_attempts,
            Duration::from_millis(self.config.retry_period_ms),
        );
        let mut error_log = LogLimiter::new(self.config.error_suppression_window_ms);

        Self::set_status(&status, &tx, ConnectionStatus::Connecting);
        tracing::info!("[Transport/MQTT] Connecting to {}", url);

        let worker = Worker::spawn("mqtt-transport", move |running| {
            for notification in connection.iter() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                match notification {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        policy.record_success();
                        for topic in &topics {
                            if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                                tracing::error!("[Transport/MQTT] Failed to subscribe to {}: {}", topic, e);
                            } else {
                                tracing::info!("[Transport/MQTT] Subscribed to {}", topic);
                            }
                        }
                        Self::set_status(&status, &tx, ConnectionStatus::Connected);
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if let Some(event) = router.handle(&publish.topic, &publish.payload) {
                            if tx.send(event).is_err() {
                                // Session is gone
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => match policy.record_failure() {
                        ReconnectDecision::Retry { attempt, after } => {
                            if error_log.should_log(now_ms()) {
                                tracing::warn!("[Transport/MQTT] Connection error: {}", e);
                            }
                            Self::set_status(&status, &tx, ConnectionStatus::Reconnecting { attempt });
                            sleep_while_running(&running, after);
                        }
                        ReconnectDecision::GiveUp { attempts } => {
                            tracing::warn!(
                                "[Transport/MQTT] Connection failed after {} attempts. Transport disabled.",
                                attempts
                            );
                            running.store(false, Ordering::SeqCst);
                            Self::set_status(&status, &tx, ConnectionStatus::Disabled);
                            let _ = client.try_disconnect();
                            break;
                        }
                    },
                }
            }

            running.store(false, Ordering::SeqCst);
            if let Ok(mut current) = status.lock() {
                if *current != ConnectionStatus::Disabled {
                    *current = ConnectionStatus::Disconnected;
                }
            }
            tracing::debug!("[Transport/MQTT] Network loop finished");
        })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn publish(&self, command: &DeviceCommand) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotRunning)?;
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }

        let topic = format!("{}/{}", self.config.topic_prefix.trim_end_matches('/'), command.topic_suffix());
        tracing::debug!("[Transport/MQTT] Publishing {} = {}", topic, command.payload());

        client
            .try_publish(topic, QoS::AtLeastOnce, false, command.payload().into_bytes())
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    fn stop(&mut self) {
        let was_running = self.is_running();
        if let Some(worker) = &self.worker {
            worker.signal();
        }

        // Disconnecting wakes the network loop so it can see the stop flag
        if let Some(client) = self.client.take() {
            for topic in &self.topics {
                let _ = client.try_unsubscribe(topic.as_str());
            }
            let _ = client.try_disconnect();
        }

        if let Some(mut worker) = self.worker.take() {
            worker.join();
        }

        if let Ok(mut current) = self.status.lock() {
            if *current != ConnectionStatus::Disabled {
                *current = ConnectionStatus::Disconnected;
            }
        }

        if was_running {
            tracing::info!("[Transport/MQTT] Stopped");
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.status.lock().map(|s| *s).unwrap_or_default()
    }

    fn reset(&mut self) {
        if let Ok(mut current) = self.status.lock() {
            if *current == ConnectionStatus::Disabled {
                tracing::info!("[Transport/MQTT] Reset, connection attempts allowed again");
                *current = ConnectionStatus::Disconnected;
            }
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(parse_broker_url("mqtt://192.168.1.20:1883").unwrap(), ("192.168.1.20".to_string(), 1883));
        assert_eq!(parse_broker_url("tcp://broker.local:8883/").unwrap(), ("broker.local".to_string(), 8883));
        assert_eq!(parse_broker_url("broker.local").unwrap(), ("broker.local".to_string(), 1883));
    }

    #[test]
    fn test_parse_broker_url_rejects_garbage() {
        assert!(parse_broker_url("ws://broker:9001").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
        assert!(parse_broker_url("mqtt://host:port").is_err());
    }

    #[test]
    fn test_start_without_broker_is_not_configured() {
        let mut transport = MqttTransport::new(TransportConfig::default());
        let (tx, _rx) = crossbeam_channel::unbounded();
        assert!(matches!(transport.start(tx), Err(TransportError::NotConfigured)));
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_unreachable_broker_disables_until_reset() {
        let config = TransportConfig {
            // Nothing listens on port 1, connects are refused right away
            broker_url: Some("mqtt://127.0.0.1:1".into()),
            retry_period_ms: 10,
            ..Default::default()
        };
        let mut transport = MqttTransport::new(config);
        let (tx, rx) = crossbeam_channel::unbounded();
        transport.start(tx.clone()).unwrap();

        let mut statuses = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                TransportEvent::Connection(status) => {
                    statuses.push(status);
                    if status == ConnectionStatus::Disabled {
                        break;
                    }
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        assert_eq!(statuses.first(), Some(&ConnectionStatus::Connecting));
        assert!(statuses.contains(&ConnectionStatus::Reconnecting { attempt: 2 }));
        assert!(statuses.contains(&ConnectionStatus::Reconnecting { attempt: 3 }));
        assert_eq!(transport.status(), ConnectionStatus::Disabled);

        assert!(matches!(
            transport.start(tx.clone()),
            Err(TransportError::Disabled { attempts: 3 })
        ));
        assert!(matches!(
            transport.publish(&DeviceCommand::Restart),
            Err(TransportError::NotRunning)
        ));

        transport.reset();
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        transport.stop();
    }

    #[test]
    fn test_publish_before_start_fails() {
        let transport = MqttTransport::new(TransportConfig::default());
        assert!(matches!(
            transport.publish(&DeviceCommand::Restart),
            Err(TransportError::NotRunning)
        ));
    }
}
