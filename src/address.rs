//! Local address discovery for the connection URL.
//!
//! The relay advertises `ws://<ip>:<port>` (usually as a QR code) so a device
//! on the same network can connect. The IP is whatever interface the OS would
//! route outbound traffic through.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::constants::{ROUTE_PROBE_ADDR, URL_SCHEME};

/// Resolve the outward-facing local address.
///
/// Connects a UDP socket towards [`ROUTE_PROBE_ADDR`] (no datagram is sent)
/// and reads back the local address the OS picked. Falls back to loopback when
/// there is no route or no network. Never fails.
pub fn resolve_local_address() -> IpAddr {
    let ip = ROUTE_PROBE_ADDR
        .parse::<SocketAddr>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
        .and_then(probe_route)
        .unwrap_or_else(|e| {
            log::debug!("Route probe failed ({e}), falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });
    log::info!("Found IP: {ip}");
    ip
}

/// Ask the OS which local address it would use to reach `target`.
fn probe_route(target: SocketAddr) -> io::Result<IpAddr> {
    let bind_addr: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(target)?;
    let local = socket.local_addr()?.ip();
    if local.is_unspecified() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no local address selected",
        ));
    }
    Ok(local)
}

/// Build the URL a peer uses to reach the relay.
#[must_use]
pub fn connection_url(ip: IpAddr, port: u16) -> String {
    // SocketAddr's Display brackets IPv6 hosts for us.
    format!("{URL_SCHEME}://{}", SocketAddr::new(ip, port))
}
