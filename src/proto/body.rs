//! Message bodies. Each body owns its field layout.

use super::cursor::{Reader, Writer};
use crate::error::CodecError;

pub const KEY_LEN: usize = 10;
pub const IP_LEN: usize = 20;
pub const VERSION_LEN: usize = 20;
pub const CHECKSUM_LEN: usize = 32;
pub const DEVICE_TYPE_LEN: usize = 10;
pub const SERIAL_BCD_LEN: usize = 6;
pub const LOCATION_LEN: usize = 10;

/// Upgrade kind carrying a second image (url and checksum).
pub const DUAL_IMAGE: u8 = 2;

/// Field layout shared by every body.
pub trait BodyCodec: Sized {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError>;
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;
}

/// Device asks whether a firmware upgrade is available.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryUpgrade {
    pub device_type: String,
    pub serial: u64,
    pub current_version: String,
    pub location: Vec<u8>,
}

impl BodyCodec for QueryUpgrade {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_str(&self.device_type, DEVICE_TYPE_LEN)?;
        w.put_bcd_u64(self.serial, SERIAL_BCD_LEN)?;
        w.put_str(&self.current_version, VERSION_LEN)?;
        w.put_bytes(&self.location, LOCATION_LEN)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            device_type: r.get_str(DEVICE_TYPE_LEN)?,
            serial: r.get_bcd_u64(SERIAL_BCD_LEN)?,
            current_version: r.get_str(VERSION_LEN)?,
            location: r.get_bytes(LOCATION_LEN)?,
        })
    }
}

/// Url and checksum of the second image of a [`DUAL_IMAGE`] upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecondImage {
    pub url: String,
    pub checksum: String,
}

/// Server offers an upgrade.
///
/// `second` is only written when `kind` is [`DUAL_IMAGE`], and must be set then.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeOffer {
    pub flag: u8,
    pub kind: u8,
    pub task_id: u32,
    pub src_version: String,
    pub dst_version: String,
    pub url: String,
    pub checksum: String,
    pub second: Option<SecondImage>,
}

impl BodyCodec for UpgradeOffer {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        let second = match (self.kind, &self.second) {
            (DUAL_IMAGE, None) => return Err(CodecError::Missing("second image")),
            (DUAL_IMAGE, Some(second)) => Some(second),
            _ => None,
        };

        w.put_u8(self.flag);
        w.put_u8(self.kind);
        w.put_u32(self.task_id);
        w.put_str(&self.src_version, VERSION_LEN)?;
        w.put_str(&self.dst_version, VERSION_LEN)?;
        w.put_var_str(&self.url)?;
        if let Some(second) = second {
            w.put_var_str(&second.url)?;
        }
        w.put_str(&self.checksum, CHECKSUM_LEN)?;
        if let Some(second) = second {
            w.put_str(&second.checksum, CHECKSUM_LEN)?;
        }
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let flag = r.get_u8()?;
        let kind = r.get_u8()?;
        let task_id = r.get_u32()?;
        let src_version = r.get_str(VERSION_LEN)?;
        let dst_version = r.get_str(VERSION_LEN)?;
        let url = r.get_var_str()?;
        let second_url = match kind {
            DUAL_IMAGE => Some(r.get_var_str()?),
            _ => None,
        };
        let checksum = r.get_str(CHECKSUM_LEN)?;
        let second = match second_url {
            Some(url) => Some(SecondImage {
                url,
                checksum: r.get_str(CHECKSUM_LEN)?,
            }),
            None => None,
        };

        Ok(Self {
            flag,
            kind,
            task_id,
            src_version,
            dst_version,
            url,
            checksum,
            second,
        })
    }
}

/// Device reports the outcome of an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeResult {
    pub task_id: u32,
    pub kind: u8,
    pub reason: u8,
    pub current_version: String,
}

impl BodyCodec for UpgradeResult {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_u32(self.task_id);
        w.put_u8(self.kind);
        w.put_u8(self.reason);
        w.put_str(&self.current_version, VERSION_LEN)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            task_id: r.get_u32()?,
            kind: r.get_u8()?,
            reason: r.get_u8()?,
            current_version: r.get_str(VERSION_LEN)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeAck {
    pub task_id: u32,
}

impl BodyCodec for UpgradeAck {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_u32(self.task_id);
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            task_id: r.get_u32()?,
        })
    }
}

/// Endpoint announces its key and observed public address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterAddress {
    pub key: String,
    pub ip: String,
    pub port: u32,
}

impl BodyCodec for RegisterAddress {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_str(&self.key, KEY_LEN)?;
        w.put_str(&self.ip, IP_LEN)?;
        w.put_u32(self.port);
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            key: r.get_str(KEY_LEN)?,
            ip: r.get_str(IP_LEN)?,
            port: r.get_u32()?,
        })
    }
}

/// Endpoint `local_key` asks for the address of `peer_key`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerLookup {
    pub peer_key: String,
    pub local_key: String,
}

impl BodyCodec for PeerLookup {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_str(&self.peer_key, KEY_LEN)?;
        w.put_str(&self.local_key, KEY_LEN)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            peer_key: r.get_str(KEY_LEN)?,
            local_key: r.get_str(KEY_LEN)?,
        })
    }
}

/// Address of endpoint `key`, as last registered. An empty ip or a zero port
/// means the server does not know it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressNotify {
    pub key: String,
    pub ip: String,
    pub port: u32,
}

impl AddressNotify {
    pub fn unknown<K: Into<String>>(key: K) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.ip.is_empty() || self.port == 0
    }
}

impl BodyCodec for AddressNotify {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_str(&self.key, KEY_LEN)?;
        w.put_str(&self.ip, IP_LEN)?;
        w.put_u32(self.port);
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            key: r.get_str(KEY_LEN)?,
            ip: r.get_str(IP_LEN)?,
            port: r.get_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<B: BodyCodec + PartialEq + std::fmt::Debug>(body: &B) -> usize {
        let mut w = Writer::new();
        body.encode(&mut w).unwrap();
        let buf = w.into_bytes();

        let mut r = Reader::new(&buf);
        let decoded = B::decode(&mut r).unwrap();
        assert_eq!(&decoded, body);
        assert_eq!(r.position(), buf.len());
        buf.len()
    }

    #[test]
    fn test_fixed_layout_sizes() {
        let reg = RegisterAddress {
            key: "app1".into(),
            ip: "203.0.113.7".into(),
            port: 40123,
        };
        assert_eq!(round_trip(&reg), 34);

        let lookup = PeerLookup {
            peer_key: "camera1".into(),
            local_key: "app1".into(),
        };
        assert_eq!(round_trip(&lookup), 20);

        assert_eq!(round_trip(&AddressNotify::unknown("camera1")), 34);
        assert_eq!(round_trip(&UpgradeAck { task_id: 77 }), 4);

        let result = UpgradeResult {
            task_id: 9,
            kind: 1,
            reason: 3,
            current_version: "v1.2.0".into(),
        };
        assert_eq!(round_trip(&result), 26);
    }

    #[test]
    fn test_query_upgrade() {
        let q = QueryUpgrade {
            device_type: "CAM-X1".into(),
            serial: 123456789012,
            current_version: "1.0.3".into(),
            location: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
        };
        assert_eq!(round_trip(&q), 46);
    }

    #[test]
    fn test_upgrade_offer_single_image() {
        let offer = UpgradeOffer {
            flag: 1,
            kind: 1,
            task_id: 0xdead_beef,
            src_version: "1.0.0".into(),
            dst_version: "1.1.0".into(),
            url: "http://fw.example/a.bin".into(),
            checksum: "0123456789abcdef0123456789abcdef".into(),
            second: None,
        };
        assert_eq!(round_trip(&offer), 1 + 1 + 4 + 20 + 20 + 1 + 23 + 32);
    }

    #[test]
    fn test_upgrade_offer_dual_image() {
        let offer = UpgradeOffer {
            flag: 1,
            kind: DUAL_IMAGE,
            task_id: 5,
            src_version: "1.0.0".into(),
            dst_version: "2.0.0".into(),
            url: "http://fw.example/a.bin".into(),
            checksum: "aa".into(),
            second: Some(SecondImage {
                url: "http://fw.example/b.bin".into(),
                checksum: "bb".into(),
            }),
        };
        assert_eq!(round_trip(&offer), 1 + 1 + 4 + 20 + 20 + 24 + 24 + 32 + 32);
    }

    #[test]
    fn test_upgrade_offer_ignores_second_image_for_single_kind() {
        let offer = UpgradeOffer {
            kind: 1,
            second: Some(SecondImage::default()),
            ..Default::default()
        };
        let mut w = Writer::new();
        offer.encode(&mut w).unwrap();
        let buf = w.into_bytes();

        let decoded = UpgradeOffer::decode(&mut Reader::new(&buf)).unwrap();
        assert_eq!(decoded.second, None);
    }

    #[test]
    fn test_dual_image_offer_needs_second_image() {
        let offer = UpgradeOffer {
            kind: DUAL_IMAGE,
            second: None,
            ..Default::default()
        };
        let mut w = Writer::new();
        assert!(matches!(
            offer.encode(&mut w),
            Err(CodecError::Missing("second image"))
        ));
    }

    #[test]
    fn test_truncated_body() {
        let mut w = Writer::new();
        RegisterAddress {
            key: "app1".into(),
            ip: "10.0.0.1".into(),
            port: 1,
        }
        .encode(&mut w)
        .unwrap();
        let buf = w.into_bytes();

        let err = RegisterAddress::decode(&mut Reader::new(&buf[..buf.len() - 1])).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { needed: 4, .. }));
    }

    #[test]
    fn test_unknown_address() {
        assert!(AddressNotify::unknown("x").is_unknown());
        let known = AddressNotify {
            key: "x".into(),
            ip: "1.2.3.4".into(),
            port: 9,
        };
        assert!(!known.is_unknown());
    }
}
