//! Network link abstraction.
//!
//! On the device this is the WiFi station interface; on a host the
//! operating system owns the link and [`HostNetwork`] only waits until a
//! route to the broker exists.

use crate::clock::Clock;
use crate::retry::{retry, RetryPolicy};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use thiserror::Error;

/// Station credentials handed to the link.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Errors that can occur while bringing the link up.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("link not associated")]
    NotAssociated,
    #[error("association abandoned after {0} polls")]
    AssociationTimedOut(u32),
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface over the network transport.
pub trait NetworkLink {
    /// Starts association. Returns without waiting for it to finish.
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), NetworkError>;

    /// Polls the association state.
    fn is_connected(&mut self) -> bool;

    /// Address assigned to this station, once associated.
    fn local_address(&self) -> Option<IpAddr>;
}

impl<T: NetworkLink + ?Sized> NetworkLink for Box<T> {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), NetworkError> {
        (**self).begin(credentials)
    }

    fn is_connected(&mut self) -> bool {
        (**self).is_connected()
    }

    fn local_address(&self) -> Option<IpAddr> {
        (**self).local_address()
    }
}

/// Starts association and busy-polls until the link is up.
///
/// With an unbounded policy this never returns an error; the caller is
/// stuck here for as long as the network is absent.
pub fn associate<N, K>(
    link: &mut N,
    credentials: &WifiCredentials,
    policy: &RetryPolicy,
    clock: &K,
) -> Result<Option<IpAddr>, NetworkError>
where
    N: NetworkLink + ?Sized,
    K: Clock + ?Sized,
{
    link.begin(credentials)?;
    tracing::info!(ssid = %credentials.ssid, "Connecting to WiFi");

    retry(
        policy,
        clock,
        |_| {
            if link.is_connected() {
                Ok(())
            } else {
                Err(NetworkError::NotAssociated)
            }
        },
        |poll, _, _| tracing::trace!(poll, "Waiting for association"),
    )
    .map_err(|exhausted| NetworkError::AssociationTimedOut(exhausted.attempts))?;

    let address = link.local_address();
    match address {
        Some(ip) => tracing::info!(ip = %ip, "WiFi connected"),
        None => tracing::info!("WiFi connected"),
    }
    Ok(address)
}

/// Host link: considered associated once the OS can route to `probe`.
#[derive(Debug)]
pub struct HostNetwork {
    probe: String,
    local: Option<IpAddr>,
}

impl HostNetwork {
    /// `probe` is a `host:port` pair, normally the broker endpoint.
    pub fn new(probe: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            local: None,
        }
    }

    fn route_to(target: SocketAddr) -> std::io::Result<IpAddr> {
        let bind: IpAddr = if target.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        // Connecting a UDP socket sends nothing; it only asks the OS to pick
        // a route and source address.
        let socket = UdpSocket::bind((bind, 0))?;
        socket.connect(target)?;
        Ok(socket.local_addr()?.ip())
    }
}

impl NetworkLink for HostNetwork {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), NetworkError> {
        if !credentials.ssid.is_empty() {
            tracing::debug!(
                ssid = %credentials.ssid,
                "Station association is managed by the host OS"
            );
        }
        self.local = None;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        let targets = match self.probe.to_socket_addrs() {
            Ok(targets) => targets,
            Err(e) => {
                tracing::trace!(probe = %self.probe, error = %e, "Probe does not resolve yet");
                return false;
            }
        };

        for target in targets {
            match Self::route_to(target) {
                Ok(ip) if !ip.is_unspecified() => {
                    self.local = Some(ip);
                    return true;
                }
                Ok(_) => {}
                Err(e) => tracing::trace!(target = %target, error = %e, "No route"),
            }
        }
        false
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.local
    }
}

/// Fake link that associates after a fixed number of polls.
#[derive(Debug)]
pub struct MockNetwork {
    polls_until_up: u32,
    polls: u32,
    address: IpAddr,
    credentials: Option<WifiCredentials>,
}

impl MockNetwork {
    /// A link that is up on the first poll.
    pub fn new() -> Self {
        Self::up_after(0)
    }

    /// A link that reports disconnected for the first `polls` polls.
    pub fn up_after(polls: u32) -> Self {
        Self {
            polls_until_up: polls,
            polls: 0,
            address: Ipv4Addr::new(192, 168, 1, 50).into(),
            credentials: None,
        }
    }

    /// Polls made so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Credentials passed to `begin`.
    pub fn credentials(&self) -> Option<&WifiCredentials> {
        self.credentials.as_ref()
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkLink for MockNetwork {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), NetworkError> {
        self.credentials = Some(credentials.clone());
        self.polls = 0;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        if self.credentials.is_none() {
            return false;
        }
        let up = self.polls >= self.polls_until_up;
        self.polls += 1;
        up
    }

    fn local_address(&self) -> Option<IpAddr> {
        (self.credentials.is_some() && self.polls > self.polls_until_up).then_some(self.address)
    }
}
