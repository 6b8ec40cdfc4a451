//! In-memory messaging client for tests.

use super::{BrokerCredentials, ClientState, MessagingClient, MqttError};
use std::collections::VecDeque;

/// A call made against [`MockMessagingClient`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connect { client_id: String },
    Publish { topic: String, bytes: usize },
    Service,
    Disconnect,
}

/// Scriptable messaging client that records every call.
#[derive(Debug)]
pub struct MockMessagingClient {
    state: ClientState,
    /// Upcoming connect outcomes; empty means accept.
    connect_script: VecDeque<ClientState>,
    /// Upcoming publish outcomes; empty means success.
    publish_script: VecDeque<bool>,
    events: Vec<ClientEvent>,
    published: Vec<(String, Vec<u8>)>,
    last_credentials: Option<BrokerCredentials>,
}

impl Default for MockMessagingClient {
    fn default() -> Self {
        Self {
            state: ClientState::Disconnected,
            connect_script: VecDeque::new(),
            publish_script: VecDeque::new(),
            events: Vec::new(),
            published: Vec::new(),
            last_credentials: None,
        }
    }
}

impl MockMessagingClient {
    /// A client that starts disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that starts with an open session.
    pub fn connected() -> Self {
        Self {
            state: ClientState::Connected,
            ..Self::default()
        }
    }

    /// Makes the next `count` connect attempts fail with `state`.
    pub fn refuse_next(&mut self, count: usize, state: ClientState) {
        self.connect_script
            .extend(std::iter::repeat(state).take(count));
    }

    /// Makes the next `count` publishes fail.
    pub fn fail_next_publish(&mut self, count: usize) {
        self.publish_script
            .extend(std::iter::repeat(false).take(count));
    }

    /// Simulates the broker dropping the session.
    pub fn drop_connection(&mut self) {
        self.state = ClientState::ConnectionLost;
    }

    pub fn events(&self) -> &[ClientEvent] {
        &self.events
    }

    /// Payloads that were accepted, with their topics.
    pub fn published(&self) -> &[(String, Vec<u8>)] {
        &self.published
    }

    pub fn connect_attempts(&self) -> usize {
        self.count(|e| matches!(e, ClientEvent::Connect { .. }))
    }

    pub fn publish_attempts(&self) -> usize {
        self.count(|e| matches!(e, ClientEvent::Publish { .. }))
    }

    pub fn service_calls(&self) -> usize {
        self.count(|e| matches!(e, ClientEvent::Service))
    }

    pub fn last_credentials(&self) -> Option<&BrokerCredentials> {
        self.last_credentials.as_ref()
    }

    fn count(&self, pred: impl Fn(&ClientEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl MessagingClient for MockMessagingClient {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<(), MqttError> {
        self.events.push(ClientEvent::Connect {
            client_id: client_id.to_string(),
        });
        self.last_credentials = Some(credentials.clone());

        match self.connect_script.pop_front() {
            None | Some(ClientState::Connected) => {
                self.state = ClientState::Connected;
                Ok(())
            }
            Some(ClientState::Refused(code)) => {
                self.state = ClientState::Refused(code);
                Err(MqttError::Refused(code))
            }
            Some(ClientState::ConnectionTimeout) => {
                self.state = ClientState::ConnectionTimeout;
                Err(MqttError::Timeout)
            }
            Some(state) => {
                self.state = state;
                Err(MqttError::ConnectionClosed)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        self.events.push(ClientEvent::Publish {
            topic: topic.to_string(),
            bytes: payload.len(),
        });
        if !self.is_connected() {
            return Err(MqttError::NotConnected);
        }
        if !self.publish_script.pop_front().unwrap_or(true) {
            return Err(MqttError::PayloadTooLarge {
                size: payload.len(),
                limit: 0,
            });
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn service(&mut self) -> Result<(), MqttError> {
        self.events.push(ClientEvent::Service);
        if self.is_connected() {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    fn state(&self) -> ClientState {
        self.state
    }

    fn disconnect(&mut self) {
        self.events.push(ClientEvent::Disconnect);
        self.state = ClientState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::ConnectReturnCode;

    #[test]
    fn test_scripted_refusals_then_accept() {
        let mut client = MockMessagingClient::new();
        client.refuse_next(
            1,
            ClientState::Refused(ConnectReturnCode::ServerUnavailable),
        );
        client.refuse_next(1, ClientState::ConnectFailed);
        let creds = BrokerCredentials::default();

        assert!(client.connect("a", &creds).is_err());
        assert_eq!(client.state().code(), 3);
        assert!(client.connect("b", &creds).is_err());
        assert_eq!(client.state().code(), -2);
        assert!(client.connect("c", &creds).is_ok());
        assert!(client.is_connected());
        assert_eq!(client.connect_attempts(), 3);
    }

    #[test]
    fn test_publish_records_payload() {
        let mut client = MockMessagingClient::connected();
        client.fail_next_publish(1);

        assert!(client.publish("t", b"one").is_err());
        assert!(client.publish("t", b"two").is_ok());

        assert_eq!(client.publish_attempts(), 2);
        assert_eq!(client.published(), &[("t".to_string(), b"two".to_vec())]);
    }
}
