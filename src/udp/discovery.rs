//! Public address discovery.
//!
//! The client shares one udp socket between discovery and the peer handshake,
//! so a discovery service is modelled as a request/response codec rather than
//! something that owns a socket.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::DiscoveryError;
use crate::proto::cursor::{Reader, Writer};

/// Request/response codec of an address discovery service.
pub trait Discovery: Send {
    /// Bytes of a fresh discovery request.
    fn request(&mut self) -> Vec<u8>;

    /// Whether `payload` looks like a response of this service.
    fn is_response(&self, payload: &[u8]) -> bool;

    /// The address the service observed us at.
    fn parse_response(&self, payload: &[u8]) -> Result<SocketAddr, DiscoveryError>;
}

const MAGIC_COOKIE: u32 = 0x2112_a442;
const HEADER_LEN: usize = 20;
const TRANSACTION_ID_LEN: usize = 12;

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_V4: u8 = 0x01;
const FAMILY_V6: u8 = 0x02;

/// STUN binding requests (RFC 5389), just enough to learn the mapped address.
#[derive(Debug, Default)]
pub struct StunDiscovery;

impl StunDiscovery {
    pub fn new() -> Self {
        Self
    }
}

impl Discovery for StunDiscovery {
    fn request(&mut self) -> Vec<u8> {
        let transaction: [u8; TRANSACTION_ID_LEN] = rand::random();

        let mut w = Writer::with_capacity(HEADER_LEN);
        w.put_u16(BINDING_REQUEST);
        w.put_u16(0);
        w.put_u32(MAGIC_COOKIE);
        w.put_slice(&transaction);
        w.into_bytes().to_vec()
    }

    fn is_response(&self, payload: &[u8]) -> bool {
        payload.len() >= HEADER_LEN
            && payload[0] & 0xc0 == 0
            && payload[4..8] == MAGIC_COOKIE.to_be_bytes()
    }

    fn parse_response(&self, payload: &[u8]) -> Result<SocketAddr, DiscoveryError> {
        let mut r = Reader::new(payload);
        let kind = r.get_u16()?;
        let len = r.get_u16()? as usize;
        let _cookie = r.get_u32()?;
        let transaction = r.take(TRANSACTION_ID_LEN)?;

        if kind != BINDING_SUCCESS {
            return Err(DiscoveryError::NotSuccess(kind));
        }

        let mut attrs = Reader::new(r.take(len)?);
        let mut mapped = None;
        while attrs.remaining() > 0 {
            let attr = attrs.get_u16()?;
            let attr_len = attrs.get_u16()? as usize;
            let value = attrs.take(attr_len)?;
            // values are padded to a multiple of 4
            attrs.take((4 - attr_len % 4) % 4)?;

            match attr {
                ATTR_XOR_MAPPED_ADDRESS => return parse_address(value, Some(transaction)),
                ATTR_MAPPED_ADDRESS => mapped = Some(value),
                _ => {}
            }
        }

        match mapped {
            Some(value) => parse_address(value, None),
            None => Err(DiscoveryError::NoMappedAddress),
        }
    }
}

/// Decode an address attribute, undoing the xor when `transaction` is given.
fn parse_address(value: &[u8], transaction: Option<&[u8]>) -> Result<SocketAddr, DiscoveryError> {
    let mut r = Reader::new(value);
    let _reserved = r.get_u8()?;
    let family = r.get_u8()?;
    let mut port = r.get_u16()?;

    let mut mask = [0u8; 16];
    if let Some(t) = transaction {
        mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        mask[4..].copy_from_slice(t);
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match family {
        FAMILY_V4 => {
            let mut o = [0u8; 4];
            o.copy_from_slice(r.take(4)?);
            unmask(&mut o, &mask);
            IpAddr::V4(Ipv4Addr::from(o))
        }
        FAMILY_V6 => {
            let mut o = [0u8; 16];
            o.copy_from_slice(r.take(16)?);
            unmask(&mut o, &mask);
            IpAddr::V6(Ipv6Addr::from(o))
        }
        f => return Err(DiscoveryError::UnknownFamily(f)),
    };

    Ok(SocketAddr::new(ip, port))
}

fn unmask(octets: &mut [u8], mask: &[u8]) {
    octets.iter_mut().zip(mask).for_each(|(o, m)| *o ^= m);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    /// Binding success answering `request`, with an XOR-MAPPED-ADDRESS of `observed`
    /// or a plain MAPPED-ADDRESS.
    pub(crate) fn binding_success(request: &[u8], observed: SocketAddr, xor: bool) -> Vec<u8> {
        let transaction = &request[8..HEADER_LEN];
        let mut mask = MAGIC_COOKIE.to_be_bytes().to_vec();
        mask.extend_from_slice(transaction);
        if !xor {
            mask.iter_mut().for_each(|b| *b = 0);
        }

        let (family, octets) = match observed.ip() {
            IpAddr::V4(ip) => (FAMILY_V4, ip.octets().to_vec()),
            IpAddr::V6(ip) => (FAMILY_V6, ip.octets().to_vec()),
        };
        let port = match xor {
            true => observed.port() ^ (MAGIC_COOKIE >> 16) as u16,
            false => observed.port(),
        };

        let mut attrs = Writer::new();
        // an unrelated attribute with padding first (SOFTWARE)
        attrs.put_u16(0x8022);
        attrs.put_u16(5);
        attrs.put_slice(b"tests\0\0\0");
        attrs.put_u16(if xor {
            ATTR_XOR_MAPPED_ADDRESS
        } else {
            ATTR_MAPPED_ADDRESS
        });
        attrs.put_u16(4 + octets.len() as u16);
        attrs.put_u8(0);
        attrs.put_u8(family);
        attrs.put_u16(port);
        for (i, o) in octets.iter().enumerate() {
            attrs.put_u8(o ^ mask[i]);
        }
        let attrs = attrs.into_bytes();

        let mut w = Writer::new();
        w.put_u16(BINDING_SUCCESS);
        w.put_u16(attrs.len() as u16);
        w.put_u32(MAGIC_COOKIE);
        w.put_slice(transaction);
        w.put_slice(&attrs);
        w.into_bytes().to_vec()
    }

    fn request() -> Vec<u8> {
        StunDiscovery::new().request()
    }

    /// A local discovery service answering every binding request with the
    /// source address it came from.
    pub(crate) async fn spawn_reflector() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0; 1500];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                if n >= HEADER_LEN && buf[..2] == BINDING_REQUEST.to_be_bytes() {
                    let resp = binding_success(&buf[..n], from, true);
                    let _ = socket.send_to(&resp, from).await;
                }
            }
        });

        addr
    }

    #[test]
    fn test_request() {
        let mut d = StunDiscovery::new();
        let req = d.request();
        assert_eq!(req.len(), HEADER_LEN);
        assert_eq!(&req[..4], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(&req[4..8], &MAGIC_COOKIE.to_be_bytes());
        // fresh transaction id every time
        assert_ne!(d.request()[8..], req[8..]);
    }

    #[test]
    fn test_is_response() {
        let d = StunDiscovery::new();
        assert!(!d.is_response(b"ping"));
        assert!(!d.is_response(b"pong"));
        assert!(!d.is_response(&[0u8; 20]));

        let resp = binding_success(&request(), "1.2.3.4:5".parse().unwrap(), true);
        assert!(d.is_response(&resp));
    }

    #[test]
    fn test_xor_mapped_v4() {
        let d = StunDiscovery::new();
        let observed: SocketAddr = "203.0.113.7:40123".parse().unwrap();
        let resp = binding_success(&request(), observed, true);
        assert_eq!(d.parse_response(&resp).unwrap(), observed);
    }

    #[test]
    fn test_xor_mapped_v6() {
        let d = StunDiscovery::new();
        let observed: SocketAddr = "[2001:db8::1]:3478".parse().unwrap();
        let resp = binding_success(&request(), observed, true);
        assert_eq!(d.parse_response(&resp).unwrap(), observed);
    }

    #[test]
    fn test_plain_mapped() {
        let d = StunDiscovery::new();
        let observed: SocketAddr = "198.51.100.2:1000".parse().unwrap();
        let resp = binding_success(&request(), observed, false);
        assert_eq!(d.parse_response(&resp).unwrap(), observed);
    }

    #[test]
    fn test_malformed() {
        let d = StunDiscovery::new();
        let resp = binding_success(&request(), "1.2.3.4:5".parse().unwrap(), true);

        assert!(matches!(
            d.parse_response(&resp[..resp.len() - 2]),
            Err(DiscoveryError::Malformed(_))
        ));

        let mut error = resp.clone();
        error[..2].copy_from_slice(&0x0111u16.to_be_bytes());
        assert!(matches!(
            d.parse_response(&error),
            Err(DiscoveryError::NotSuccess(0x0111))
        ));

        let mut empty = resp[..HEADER_LEN].to_vec();
        empty[2..4].copy_from_slice(&[0, 0]);
        assert!(matches!(
            d.parse_response(&empty),
            Err(DiscoveryError::NoMappedAddress)
        ));
    }
}
