//! Local address detection.

use std::net::{IpAddr, Ipv4Addr};

use reqwest::Url;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Address advertised when nothing better is known.
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// The local IPv4 address the OS would use to reach `registry_url`.
///
/// Connecting a UDP socket sends no packets; it only asks the routing table
/// which interface would be used.
pub async fn local_ip_toward(registry_url: &str) -> Option<IpAddr> {
    let url = Url::parse(registry_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    socket.connect((host, port)).await.ok()?;
    let ip = socket.local_addr().ok()?.ip();

    (!ip.is_unspecified()).then_some(ip)
}

/// Host to advertise to the registry.
///
/// A configured host wins; otherwise the routed local address, falling back
/// to loopback.
pub async fn advertise_host(configured: Option<&str>, registry_url: &str) -> String {
    if let Some(host) = configured.map(str::trim).filter(|h| !h.is_empty()) {
        return host.to_string();
    }

    match local_ip_toward(registry_url).await {
        Some(ip) => {
            debug!(ip = %ip, "Detected local address");
            ip.to_string()
        }
        None => {
            warn!(registry_url, "Could not detect local address, advertising loopback");
            LOOPBACK.to_string()
        }
    }
}
