//! Wake-on-LAN magic packet dispatch.
//!
//! A magic packet is a single UDP datagram: six `0xFF` bytes followed by the
//! target's MAC address repeated sixteen times. Delivery is fire-and-forget.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};

pub const MAGIC_PACKET_LEN: usize = 102;

#[derive(Debug, Error)]
pub enum WakeError {
    #[error("invalid MAC address '{0}'")]
    InvalidAddress(String),

    #[error("failed to resolve {target}: {reason}")]
    Resolution { target: String, reason: String },

    #[error("failed to send magic packet to {target}: {source}")]
    Transport {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A 6-byte hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl FromStr for MacAddress {
    type Err = WakeError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` and `AABB.CCDD.EEFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WakeError::InvalidAddress(s.to_string());

        let hex: String = if s.len() == 17 {
            let sep = s.as_bytes()[2];
            if sep != b':' && sep != b'-' {
                return Err(invalid());
            }
            let groups: Vec<&str> = s.split(sep as char).collect();
            if groups.len() != 6 || groups.iter().any(|g| g.len() != 2) {
                return Err(invalid());
            }
            groups.concat()
        } else if s.len() == 14 {
            let groups: Vec<&str> = s.split('.').collect();
            if groups.len() != 3 || groups.iter().any(|g| g.len() != 4) {
                return Err(invalid());
            }
            groups.concat()
        } else {
            return Err(invalid());
        };

        // from_str_radix alone would accept a leading '+'.
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            let pair = hex.get(i * 2..i * 2 + 2).ok_or_else(invalid)?;
            *octet = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.0);
    }
    packet
}

/// Sends a wake signal to a device.
#[async_trait]
pub trait Waker: Send + Sync {
    async fn wake(&self, mac: &str, broadcast: &str, port: u16) -> Result<(), WakeError>;
}

/// Broadcasts magic packets over UDP.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpWaker;

impl UdpWaker {
    async fn resolve(broadcast: &str, port: u16) -> Result<SocketAddr, WakeError> {
        let target = if broadcast.contains(':') && !broadcast.starts_with('[') {
            format!("[{}]:{}", broadcast, port)
        } else {
            format!("{}:{}", broadcast, port)
        };

        let mut addrs = lookup_host(target.as_str())
            .await
            .map_err(|e| WakeError::Resolution {
                target: target.clone(),
                reason: e.to_string(),
            })?;

        addrs.next().ok_or_else(|| WakeError::Resolution {
            target,
            reason: "no addresses found".to_string(),
        })
    }

    async fn send(target: SocketAddr, packet: &[u8]) -> std::io::Result<()> {
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        if target.is_ipv4() {
            socket.set_broadcast(true)?;
        }

        let sent = socket.send_to(packet, target).await?;
        if sent != packet.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", sent, packet.len()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Waker for UdpWaker {
    async fn wake(&self, mac: &str, broadcast: &str, port: u16) -> Result<(), WakeError> {
        let mac: MacAddress = mac.parse()?;
        let packet = magic_packet(&mac);
        let target = Self::resolve(broadcast, port).await?;
        debug!("Sending magic packet for {} to {}", mac, target);

        Self::send(target, &packet)
            .await
            .map_err(|source| WakeError::Transport { target, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_colon_separated() {
        let mac: MacAddress = "AA:AA:BB:BB:CC:CC".parse().unwrap();
        assert_eq!(mac.0, [0xAA, 0xAA, 0xBB, 0xBB, 0xCC, 0xCC]);
    }

    #[test]
    fn test_parse_hyphen_separated_lowercase() {
        let mac: MacAddress = "01-23-45-67-89-ab".parse().unwrap();
        assert_eq!(mac.0, [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB]);
    }

    #[test]
    fn test_parse_dotted() {
        let mac: MacAddress = "0123.4567.89ab".parse().unwrap();
        assert_eq!(mac.0, [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "AA:BB:CC-DD:EE:FF",
            "AA:BB:CC:DD:EE:GG",
            "AABBCCDDEEFF",
            "AAA:B:CC:DD:EE:FF",
            "+A:BB:CC:DD:EE:FF",
        ] {
            let result = input.parse::<MacAddress>();
            assert!(
                matches!(result, Err(WakeError::InvalidAddress(_))),
                "expected {:?} to be rejected",
                input
            );
        }
    }

    #[test]
    fn test_display_round_trip() {
        let mac: MacAddress = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_magic_packet_layout() {
        let mac: MacAddress = "AA:AA:BB:BB:CC:CC".parse().unwrap();
        let packet = magic_packet(&mac);

        assert_eq!(packet.len(), 102);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for block in packet[6..].chunks(6) {
            assert_eq!(block, &[0xAA, 0xAA, 0xBB, 0xBB, 0xCC, 0xCC]);
        }
        assert_eq!(packet[6..].chunks(6).count(), 16);
    }

    #[tokio::test]
    async fn test_udp_waker_sends_one_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        UdpWaker
            .wake("AA:AA:BB:BB:CC:CC", "127.0.0.1", port)
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(len, MAGIC_PACKET_LEN);

        let expected = magic_packet(&"AA:AA:BB:BB:CC:CC".parse().unwrap());
        assert_eq!(&buf[..len], &expected[..]);
    }

    #[tokio::test]
    async fn test_udp_waker_invalid_mac() {
        let result = UdpWaker.wake("not-a-mac", "127.0.0.1", 9).await;
        assert!(matches!(result, Err(WakeError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_udp_waker_unresolvable_broadcast() {
        let result = UdpWaker
            .wake("AA:AA:BB:BB:CC:CC", "host.invalid", 9)
            .await;
        assert!(matches!(result, Err(WakeError::Resolution { .. })));
    }
}
