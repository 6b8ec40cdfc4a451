//! Publish/subscribe messaging over MQTT 3.1.1.
//!
//! The capture loop only talks to the [`MessagingClient`] trait. The
//! blocking [`MqttClient`] implements it on top of `rumqttc`;
//! [`MockMessagingClient`] implements it for tests.
//!
//! Connection state is reported with the numeric codes long used by
//! small embedded MQTT clients, so log lines such as `rc=-2` read the
//! same as on the deployed cameras:
//!
//! | code | state |
//! |---|---|
//! | -4 | connection timeout |
//! | -3 | connection lost |
//! | -2 | connect failed |
//! | -1 | disconnected |
//! | 0 | connected |
//! | 1-5 | CONNACK refusal code |

mod client;
mod mock;

pub use client::{MqttClient, MqttOptions};
pub use mock::{ClientEvent, MockMessagingClient};

use thiserror::Error;

/// Errors from messaging operations.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("client is not connected")]
    NotConnected,
    #[error("packet of {size} bytes exceeds the {limit} byte message buffer")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("broker refused connection: {0}")]
    Refused(ConnectReturnCode),
    #[error("timed out waiting for the broker")]
    Timeout,
    #[error("broker closed the connection")]
    ConnectionClosed,
    #[error("connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("request not queued: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
}

impl ConnectReturnCode {
    /// Wire value of the code.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::UnacceptableProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadUserNameOrPassword => 4,
            Self::NotAuthorized => 5,
        }
    }
}

impl From<rumqttc::ConnectReturnCode> for ConnectReturnCode {
    fn from(code: rumqttc::ConnectReturnCode) -> Self {
        use rumqttc::ConnectReturnCode as Wire;
        match code {
            Wire::Success => Self::Accepted,
            Wire::RefusedProtocolVersion => Self::UnacceptableProtocolVersion,
            Wire::BadClientId => Self::IdentifierRejected,
            Wire::ServiceUnavailable => Self::ServerUnavailable,
            Wire::BadUserNamePassword => Self::BadUserNameOrPassword,
            Wire::NotAuthorized => Self::NotAuthorized,
        }
    }
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Accepted => "accepted",
            Self::UnacceptableProtocolVersion => "unacceptable protocol version",
            Self::IdentifierRejected => "identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadUserNameOrPassword => "bad user name or password",
            Self::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

/// Link state of a messaging client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    ConnectionTimeout,
    ConnectionLost,
    ConnectFailed,
    Disconnected,
    Connected,
    /// The broker answered CONNACK with a non-zero return code.
    Refused(ConnectReturnCode),
}

impl ClientState {
    /// Numeric state code, as printed in `rc=` log lines.
    pub fn code(self) -> i32 {
        match self {
            Self::ConnectionTimeout => -4,
            Self::ConnectionLost => -3,
            Self::ConnectFailed => -2,
            Self::Disconnected => -1,
            Self::Connected => 0,
            Self::Refused(code) => i32::from(code.as_byte()),
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionTimeout => f.write_str("connection timeout"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::ConnectFailed => f.write_str("connect failed"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connected => f.write_str("connected"),
            Self::Refused(code) => write!(f, "refused ({})", code),
        }
    }
}

/// Plaintext broker credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Capability interface over a publish/subscribe client.
pub trait MessagingClient {
    /// Opens a session. On failure [`state`](Self::state) holds the reason.
    fn connect(&mut self, client_id: &str, credentials: &BrokerCredentials)
        -> Result<(), MqttError>;

    fn is_connected(&self) -> bool;

    /// Sends `payload` as one message on `topic`.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError>;

    /// Processes inbound traffic and keep-alives. Call every loop iteration.
    fn service(&mut self) -> Result<(), MqttError>;

    fn state(&self) -> ClientState;

    /// Closes the session cleanly.
    fn disconnect(&mut self);
}

impl<T: MessagingClient + ?Sized> MessagingClient for Box<T> {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: &BrokerCredentials,
    ) -> Result<(), MqttError> {
        (**self).connect(client_id, credentials)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        (**self).publish(topic, payload)
    }

    fn service(&mut self) -> Result<(), MqttError> {
        (**self).service()
    }

    fn state(&self) -> ClientState {
        (**self).state()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        assert_eq!(ClientState::ConnectionTimeout.code(), -4);
        assert_eq!(ClientState::ConnectFailed.code(), -2);
        assert_eq!(ClientState::Connected.code(), 0);
        assert_eq!(
            ClientState::Refused(ConnectReturnCode::BadUserNameOrPassword).code(),
            4
        );
    }

    #[test]
    fn test_connack_codes_keep_wire_values() {
        let codes = [
            rumqttc::ConnectReturnCode::Success,
            rumqttc::ConnectReturnCode::RefusedProtocolVersion,
            rumqttc::ConnectReturnCode::BadClientId,
            rumqttc::ConnectReturnCode::ServiceUnavailable,
            rumqttc::ConnectReturnCode::BadUserNamePassword,
            rumqttc::ConnectReturnCode::NotAuthorized,
        ];
        for (byte, code) in codes.into_iter().enumerate() {
            assert_eq!(usize::from(ConnectReturnCode::from(code).as_byte()), byte);
        }
        assert_eq!(ConnectReturnCode::NotAuthorized.to_string(), "not authorized");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = BrokerCredentials {
            username: Some("cam".to_string()),
            password: Some("hunter2".to_string()),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("cam"));
        assert!(!rendered.contains("hunter2"));
    }
}
