// Local address discovery for the direct listener

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// The IPv4 address this host would use for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel to pick a
/// route. Falls back to loopback on hosts without a usable interface.
pub fn local_ipv4() -> Ipv4Addr {
    probe_route().unwrap_or(Ipv4Addr::LOCALHOST)
}

fn probe_route() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(10, 254, 254, 254), 1)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ipv4_is_usable() {
        let ip = local_ipv4();
        assert!(!ip.is_unspecified());
        assert!(!ip.is_multicast());
    }
}
