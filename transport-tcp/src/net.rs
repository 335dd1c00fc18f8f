use std::net::{IpAddr, UdpSocket};

use anyhow::Result;

/// Discovers the host's primary outbound IPv4 address by connecting a
/// throwaway UDP socket to a public endpoint and reading the local side.
/// No packet is sent; `connect` on UDP only fixes the route.
pub fn local_ip() -> Result<IpAddr> {
    let probe = UdpSocket::bind(("0.0.0.0", 0))?;
    probe.connect(("8.8.8.8", 80))?;
    Ok(probe.local_addr()?.ip())
}
