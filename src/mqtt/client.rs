//! Blocking MQTT client for a single publishing session, backed by `rumqttc`.

use super::{BrokerCredentials, ClientState, ConnectReturnCode, MessagingClient, MqttError};
use crate::config::BrokerConfig;
use rumqttc::{
    Client, Connection, ConnectionError, Event, Outgoing, Packet, QoS, RecvTimeoutError,
    StateError, TryRecvError,
};
use std::time::Duration;

/// Requests queued between the client handle and its event loop.
const REQUEST_CAPACITY: usize = 10;

/// Upper bound on how long `disconnect` waits for DISCONNECT to go out.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Client settings fixed at construction.
#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    /// CONNACK wait and publish flush timeout.
    pub socket_timeout: Duration,
    /// Largest packet the client sends or accepts.
    pub buffer_size: usize,
}

impl MqttOptions {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            keep_alive: Duration::from_secs(u64::from(config.keep_alive_secs)),
            socket_timeout: Duration::from_secs(config.socket_timeout_secs),
            buffer_size: config.buffer_size,
        }
    }

    fn session_options(
        &self,
        client_id: &str,
        credentials: &BrokerCredentials,
    ) -> rumqttc::MqttOptions {
        let mut options = rumqttc::MqttOptions::new(client_id, self.host.as_str(), self.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true)
            .set_max_packet_size(self.buffer_size, self.buffer_size);
        if let Some(username) = &credentials.username {
            options.set_credentials(
                username.as_str(),
                credentials.password.as_deref().unwrap_or_default(),
            );
        }
        options
    }
}

impl Default for MqttOptions {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

/// Encoded size of a QoS 0 PUBLISH carrying `payload_len` bytes on `topic`.
fn publish_packet_len(topic: &str, payload_len: usize) -> usize {
    let remaining = 2 + topic.len() + payload_len;
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + length_bytes + remaining
}

/// State a session falls into after its event loop reports `error`.
fn lost_state(error: &ConnectionError) -> ClientState {
    match error {
        ConnectionError::NetworkTimeout
        | ConnectionError::FlushTimeout
        | ConnectionError::MqttState(StateError::AwaitPingResp) => ClientState::ConnectionTimeout,
        _ => ClientState::ConnectionLost,
    }
}

/// State a connect attempt ends in after its event loop reports `error`.
fn connect_failed_state(error: &ConnectionError) -> ClientState {
    match error {
        ConnectionError::ConnectionRefused(code) => ClientState::Refused((*code).into()),
        ConnectionError::NetworkTimeout => ClientState::ConnectionTimeout,
        _ => ClientState::ConnectFailed,
    }
}

struct Session {
    client: Client,
    connection: Connection,
}

/// Blocking MQTT 3.1.1 client that publishes at QoS 0.
///
/// Every connect attempt builds a fresh `rumqttc` event loop. Keep-alive
/// pings and inbound traffic are handled whenever [`service`] drains that
/// loop; any error it reports ends the session, and reconnecting is left to
/// the caller.
///
/// [`service`]: MessagingClient::service
pub struct MqttClient {
    options: MqttOptions,
    session: Option<Session>,
    state: ClientState,
}

impl MqttClient {
    pub fn new(options: MqttOptions) -> Self {
        tracing::debug!(
            host = %options.host,
            port = options.port,
            buffer_size = options.buffer_size,
            "MQTT client configured"
        );
        Self {
            options,
            session: None,
            state: ClientState::Disconnected,
        }
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    fn drop_session(&mut self, state: ClientState) {
        self.session = None;
        self.state = state;
    }

    fn handle_event(event: Event) {
        match event {
            Event::Incoming(Packet::Publish(publish)) => tracing::debug!(
                topic = %publish.topic,
                bytes = publish.payload.len(),
                "Ignoring inbound message"
            ),
            Event::Incoming(Packet::PingResp) => tracing::trace!("PINGRESP"),
            other => tracing::trace!(event = ?other, "MQTT event"),
        }
    }

    /// Drives the event loop until the queued PUBLISH is written.
    fn flush_publish(&mut self) -> Result<(), MqttError> {
        let timeout = self.options.socket_timeout;
        let Some(session) = self.session.as_mut() else {
            return Err(MqttError::NotConnected);
        };
        loop {
            match session.connection.recv_timeout(timeout) {
                Ok(Ok(Event::Outgoing(Outgoing::Publish(_)))) => return Ok(()),
                Ok(Ok(event)) => Self::handle_event(event),
                Ok(Err(e)) => {
                    self.drop_session(lost_state(&e));
                    return Err(MqttError::Connection(e));
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.drop_session(ClientState::ConnectionTimeout);
                    return Err(MqttError::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.drop_session(ClientState::ConnectionLost);
                    return Err(MqttError::ConnectionClosed);
                }
            }
        }
    }
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new(MqttOptions::default())
    }
}

impl MessagingClient for MqttClient {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<(), MqttError> {
        if self.is_connected() {
            return Ok(());
        }
        self.drop_session(ClientState::Disconnected);

        if client_id.is_empty() || client_id.starts_with(' ') {
            self.state = ClientState::Refused(ConnectReturnCode::IdentifierRejected);
            return Err(MqttError::Refused(ConnectReturnCode::IdentifierRejected));
        }

        let options = self.options.session_options(client_id, credentials);
        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);

        let outcome = loop {
            match connection.recv_timeout(self.options.socket_timeout) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    let code = ConnectReturnCode::from(ack.code);
                    break if code == ConnectReturnCode::Accepted {
                        Ok(())
                    } else {
                        Err((ClientState::Refused(code), MqttError::Refused(code)))
                    };
                }
                Ok(Ok(event)) => Self::handle_event(event),
                Ok(Err(ConnectionError::ConnectionRefused(code))) => {
                    let code = ConnectReturnCode::from(code);
                    break Err((ClientState::Refused(code), MqttError::Refused(code)));
                }
                Ok(Err(e)) => break Err((connect_failed_state(&e), MqttError::Connection(e))),
                Err(RecvTimeoutError::Timeout) => {
                    break Err((ClientState::ConnectionTimeout, MqttError::Timeout))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break Err((ClientState::ConnectFailed, MqttError::ConnectionClosed))
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.session = Some(Session { client, connection });
                self.state = ClientState::Connected;
                tracing::debug!(client_id, "MQTT session established");
                Ok(())
            }
            Err((state, e)) => {
                self.state = state;
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state == ClientState::Connected && self.session.is_some()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        let size = publish_packet_len(topic, payload.len());
        if size > self.options.buffer_size {
            return Err(MqttError::PayloadTooLarge {
                size,
                limit: self.options.buffer_size,
            });
        }

        let queued = match &self.session {
            Some(session) => {
                session
                    .client
                    .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            }
            None => return Err(MqttError::NotConnected),
        };
        if let Err(e) = queued {
            self.drop_session(ClientState::ConnectionLost);
            return Err(MqttError::Client(e));
        }
        self.flush_publish()
    }

    fn service(&mut self) -> Result<(), MqttError> {
        let Some(session) = self.session.as_mut() else {
            return Err(MqttError::NotConnected);
        };

        loop {
            match session.connection.try_recv() {
                Ok(Ok(event)) => Self::handle_event(event),
                Err(TryRecvError::Empty) => return Ok(()),
                Ok(Err(e)) => {
                    let state = lost_state(&e);
                    tracing::warn!(error = %e, rc = state.code(), "MQTT session dropped");
                    self.drop_session(state);
                    return Err(MqttError::Connection(e));
                }
                Err(TryRecvError::Disconnected) => {
                    self.drop_session(ClientState::ConnectionLost);
                    return Err(MqttError::ConnectionClosed);
                }
            }
        }
    }

    fn state(&self) -> ClientState {
        self.state
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            match session.client.try_disconnect() {
                Ok(()) => loop {
                    match session.connection.recv_timeout(DISCONNECT_GRACE) {
                        Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => break,
                        Ok(Ok(event)) => Self::handle_event(event),
                        Ok(Err(_)) | Err(_) => {
                            tracing::debug!("DISCONNECT not delivered");
                            break;
                        }
                    }
                },
                Err(e) => tracing::debug!(error = %e, "DISCONNECT not queued"),
            }
        }
        self.state = ClientState::Disconnected;
    }
}
