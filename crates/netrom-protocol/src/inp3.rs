//! INP3 routing information frames (RIF).
//!
//! A RIF carries one or more route advertisements back to back:
//!
//! ```text
//! 0xFF { dest (7) | hops (1) | trip time (2, BE, 10 ms units) | options... | 0x00 }*
//! ```
//!
//! Each option is `len | type | data[len - 2]`. A length that leaves no data
//! (0, 1 or 2) ends the option list of the current advertisement.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use netrom_core::{
    callsign::Callsign,
    constants::{CALLSIGN_LEN, ROUTING_SIGNATURE},
    error::DecodingErrorKind,
};
use tracing::debug;

/// Bytes consumed by the length and type fields of an option.
const OPTION_HEADER_LEN: usize = 2;
/// Largest option data that fits a one byte length.
const MAX_OPTION_DATA: usize = u8::MAX as usize - OPTION_HEADER_LEN;

/// Type byte of an INP3 option record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Inp3OptionType {
    /// Node mnemonic
    Alias,
    /// IP address of the node
    Ip,
    /// APRS position string
    AprsPosition,
    /// Node software class
    NodeType,
    /// Advertisement timestamp
    Timestamp,
    /// TCP service description
    TcpService,
    /// Time zone offset
    TzOffset,
    /// Maidenhead locator
    Maidenhead,
    /// Free-text location
    Qth,
    /// Software version string
    SoftwareVersion,
    /// A type this node does not interpret; preserved for re-encoding
    Unknown(u8),
}

impl Inp3OptionType {
    /// Returns the wire value of this option type.
    pub fn to_u8(self) -> u8 {
        match self {
            Inp3OptionType::Alias => 0,
            Inp3OptionType::Ip => 1,
            Inp3OptionType::AprsPosition => 2,
            Inp3OptionType::NodeType => 3,
            Inp3OptionType::Timestamp => 4,
            Inp3OptionType::TcpService => 5,
            Inp3OptionType::TzOffset => 6,
            Inp3OptionType::Maidenhead => 7,
            Inp3OptionType::Qth => 8,
            Inp3OptionType::SoftwareVersion => 9,
            Inp3OptionType::Unknown(value) => value,
        }
    }
}

impl From<u8> for Inp3OptionType {
    fn from(value: u8) -> Self {
        match value {
            0 => Inp3OptionType::Alias,
            1 => Inp3OptionType::Ip,
            2 => Inp3OptionType::AprsPosition,
            3 => Inp3OptionType::NodeType,
            4 => Inp3OptionType::Timestamp,
            5 => Inp3OptionType::TcpService,
            6 => Inp3OptionType::TzOffset,
            7 => Inp3OptionType::Maidenhead,
            8 => Inp3OptionType::Qth,
            9 => Inp3OptionType::SoftwareVersion,
            other => Inp3OptionType::Unknown(other),
        }
    }
}

/// One option record attached to an advertisement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inp3Option {
    /// Option type
    pub kind: Inp3OptionType,
    /// Raw option data
    pub data: Vec<u8>,
}

/// One route advertisement from a RIF.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inp3Advert {
    /// Advertised node
    pub destination: Callsign,
    /// Hops from the advertising node
    pub hops: u8,
    /// Trip time from the advertising node, 10 ms units
    pub trip_time: u16,
    /// Option records in wire order
    pub options: Vec<Inp3Option>,
}

impl Inp3Advert {
    /// Creates an advertisement without options.
    pub fn new(destination: Callsign, hops: u8, trip_time: u16) -> Self {
        Inp3Advert { destination, hops, trip_time, options: Vec::new() }
    }

    /// Adds an alias option.
    pub fn with_alias(mut self, alias: &Callsign) -> Self {
        self.options.push(Inp3Option {
            kind: Inp3OptionType::Alias,
            data: alias.base().as_bytes().to_vec(),
        });
        self
    }

    /// Returns the first well-formed alias option, if any.
    pub fn alias(&self) -> Option<Callsign> {
        self.options
            .iter()
            .filter(|opt| opt.kind == Inp3OptionType::Alias)
            .find_map(|opt| Callsign::from_alias_bytes(&opt.data))
    }
}

/// Parses a RIF body into its advertisements.
///
/// Only a missing `0xFF` signature is an error. A malformed header or an
/// option running past the end of the frame stops parsing; advertisements
/// completed before that point are returned and the damaged one is dropped.
pub fn decode_inp3_routing_body(data: &[u8]) -> Result<Vec<Inp3Advert>, DecodingErrorKind> {
    let mut cursor = Cursor::new(data);
    match cursor.read_u8() {
        Ok(ROUTING_SIGNATURE) => {}
        Ok(_) => return Err(DecodingErrorKind::Signature),
        Err(_) => return Err(DecodingErrorKind::Truncated { needed: 1, available: 0 }),
    }

    let mut adverts = Vec::new();
    while remaining(&cursor) > 0 {
        match read_advert(&mut cursor) {
            Some(advert) => adverts.push(advert),
            None => {
                debug!(
                    "Abandoning INP3 frame at offset {} after {} adverts",
                    cursor.position(),
                    adverts.len()
                );
                break;
            }
        }
    }
    Ok(adverts)
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

fn read_advert(cursor: &mut Cursor<&[u8]>) -> Option<Inp3Advert> {
    let mut call = [0u8; CALLSIGN_LEN];
    cursor.read_exact(&mut call).ok()?;
    let destination = Callsign::from_bytes(&call).ok()?;
    let hops = cursor.read_u8().ok()?;
    let trip_time = cursor.read_u16::<BigEndian>().ok()?;
    let mut advert = Inp3Advert::new(destination, hops, trip_time);

    // A frame may end right after the last option without a terminator.
    while remaining(cursor) > 0 {
        let length = cursor.read_u8().ok()? as usize;
        if length <= OPTION_HEADER_LEN {
            break;
        }
        let data_len = length - OPTION_HEADER_LEN;
        let kind = Inp3OptionType::from(cursor.read_u8().ok()?);
        if remaining(cursor) < data_len {
            return None;
        }
        let mut data = vec![0u8; data_len];
        cursor.read_exact(&mut data).ok()?;
        advert.options.push(Inp3Option { kind, data });
    }
    Some(advert)
}

/// Encodes advertisements into a RIF body. Option data longer than a length
/// byte can describe is truncated so the frame stays well formed.
pub fn encode_inp3_routing_body(adverts: &[Inp3Advert]) -> Vec<u8> {
    let mut out = vec![ROUTING_SIGNATURE];
    for advert in adverts {
        out.extend_from_slice(&advert.destination.to_bytes());
        out.push(advert.hops);
        let mut trip = [0u8; 2];
        BigEndian::write_u16(&mut trip, advert.trip_time);
        out.extend_from_slice(&trip);
        for option in &advert.options {
            let data = &option.data[..option.data.len().min(MAX_OPTION_DATA)];
            if data.is_empty() {
                continue;
            }
            out.push((data.len() + OPTION_HEADER_LEN) as u8);
            out.push(option.kind.to_u8());
            out.extend_from_slice(data);
        }
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(s: &str) -> Callsign {
        s.parse().unwrap()
    }

    #[test]
    fn test_decode_multiple_adverts_in_one_frame() {
        let adverts = vec![
            Inp3Advert::new(call("GB7AA"), 1, 50).with_alias(&call("AAA")),
            Inp3Advert::new(call("GB7BB-2"), 3, 30),
        ];
        let body = encode_inp3_routing_body(&adverts);
        let decoded = decode_inp3_routing_body(&body).unwrap();
        assert_eq!(decoded, adverts);
        assert_eq!(decoded[0].alias(), Some(call("AAA")));
        assert_eq!(decoded[1].alias(), None);
    }

    #[test]
    fn test_decode_known_bytes() {
        let mut body = vec![0xFF];
        body.extend_from_slice(&call("GB7AA").to_bytes());
        body.extend_from_slice(&[2, 0x01, 0x2C]); // 2 hops, 300 (3 s)
        body.extend_from_slice(&[5, 0, b'A', b'A', b'A']); // alias "AAA"
        body.extend_from_slice(&[4, 9, b'1', b'2']); // software version
        body.push(0);

        let adverts = decode_inp3_routing_body(&body).unwrap();
        assert_eq!(adverts.len(), 1);
        assert_eq!(adverts[0].hops, 2);
        assert_eq!(adverts[0].trip_time, 300);
        assert_eq!(adverts[0].options.len(), 2);
        assert_eq!(adverts[0].options[1].kind, Inp3OptionType::SoftwareVersion);
        assert_eq!(adverts[0].options[1].data, b"12".to_vec());
    }

    #[test]
    fn test_missing_signature_is_error() {
        assert_eq!(decode_inp3_routing_body(&[0x01, 0x02]), Err(DecodingErrorKind::Signature));
        assert!(decode_inp3_routing_body(&[]).is_err());
    }

    #[test]
    fn test_overlength_option_aborts_rest_of_frame() {
        let first = Inp3Advert::new(call("GB7AA"), 1, 10);
        let mut body = encode_inp3_routing_body(&[first.clone()]);
        body.extend_from_slice(&call("GB7BB").to_bytes());
        body.extend_from_slice(&[1, 0, 20]);
        body.extend_from_slice(&[200, 0, b'X']); // claims 198 data bytes

        let adverts = decode_inp3_routing_body(&body).unwrap();
        assert_eq!(adverts, vec![first]);
    }

    #[test]
    fn test_truncated_header_keeps_earlier_adverts() {
        let first = Inp3Advert::new(call("GB7AA"), 1, 10);
        let mut body = encode_inp3_routing_body(&[first.clone()]);
        body.extend_from_slice(&call("GB7BB").to_bytes()[..4]);
        assert_eq!(decode_inp3_routing_body(&body).unwrap(), vec![first]);
    }

    #[test]
    fn test_unknown_option_type_preserved() {
        let mut advert = Inp3Advert::new(call("GB7AA"), 1, 10);
        advert.options.push(Inp3Option { kind: Inp3OptionType::Unknown(0x42), data: vec![9] });
        let decoded = decode_inp3_routing_body(&encode_inp3_routing_body(&[advert.clone()])).unwrap();
        assert_eq!(decoded, vec![advert]);
    }
}
