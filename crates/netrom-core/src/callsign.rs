use std::{fmt, str::FromStr};

use crate::{
    constants::{CALLSIGN_LEN, NODES_BROADCAST_CALL},
    error::{DecodingErrorKind, ErrorKind},
};

/// Maximum number of characters in the base call.
const MAX_BASE_LEN: usize = 6;
/// Highest SSID the four-bit field can carry.
pub const MAX_SSID: u8 = 15;

/// An amateur radio station address: base call plus SSID.
///
/// NetROM aliases ("mnemonics") are represented as callsigns with SSID 0.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Callsign {
    base: String,
    ssid: u8,
}

impl Callsign {
    /// The `NODES` destination of routing broadcasts.
    pub fn nodes_broadcast() -> Self {
        Callsign { base: NODES_BROADCAST_CALL.to_string(), ssid: 0 }
    }

    /// Creates a callsign, upper-casing the base and validating both parts.
    pub fn new(base: &str, ssid: u8) -> Result<Self, ErrorKind> {
        let base = base.trim().to_ascii_uppercase();
        if base.is_empty() || base.len() > MAX_BASE_LEN {
            return Err(ErrorKind::InvalidCallsign(format!("bad length: {:?}", base)));
        }
        if !base.bytes().all(is_call_char) {
            return Err(ErrorKind::InvalidCallsign(format!("bad character in {:?}", base)));
        }
        if ssid > MAX_SSID {
            return Err(ErrorKind::InvalidCallsign(format!("ssid {} out of range", ssid)));
        }
        Ok(Callsign { base, ssid })
    }

    /// Returns the base call without SSID.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Returns the SSID (0-15).
    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Encodes into the seven byte AX.25 address form.
    ///
    /// Characters are space padded and shifted left one bit; the SSID byte
    /// carries the two reserved bits set and the SSID in bits 1-4.
    pub fn to_bytes(&self) -> [u8; CALLSIGN_LEN] {
        let mut out = [b' ' << 1; CALLSIGN_LEN];
        for (slot, ch) in out.iter_mut().zip(self.base.bytes()) {
            *slot = ch << 1;
        }
        out[MAX_BASE_LEN] = 0x60 | (self.ssid << 1);
        out
    }

    /// Decodes an AX.25 address field.
    ///
    /// Rejects fields shorter than seven bytes, character bytes with the
    /// extension bit set, and bases that are empty or contain non-call bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodingErrorKind> {
        if bytes.len() < CALLSIGN_LEN {
            return Err(DecodingErrorKind::Truncated {
                needed: CALLSIGN_LEN,
                available: bytes.len(),
            });
        }
        let mut base = String::with_capacity(MAX_BASE_LEN);
        for &b in &bytes[..MAX_BASE_LEN] {
            if b & 0x01 != 0 {
                return Err(DecodingErrorKind::Callsign);
            }
            base.push((b >> 1) as char);
        }
        let ssid = (bytes[MAX_BASE_LEN] >> 1) & 0x0F;
        let trimmed = base.trim_end();
        if trimmed.is_empty() || !trimmed.bytes().all(is_call_char) {
            return Err(DecodingErrorKind::Callsign);
        }
        Ok(Callsign { base: trimmed.to_string(), ssid })
    }

    /// Encodes the base as a six byte space padded (unshifted) alias field.
    pub fn to_alias_bytes(&self) -> [u8; MAX_BASE_LEN] {
        let mut out = [b' '; MAX_BASE_LEN];
        out[..self.base.len()].copy_from_slice(self.base.as_bytes());
        out
    }

    /// Decodes a six byte unshifted alias field. Blank aliases yield `None`.
    pub fn from_alias_bytes(bytes: &[u8]) -> Option<Self> {
        let text: String = bytes.iter().take(MAX_BASE_LEN).map(|&b| b as char).collect();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Callsign::new(trimmed, 0).ok()
    }
}

fn is_call_char(b: u8) -> bool {
    b.is_ascii_graphic() && b != b'-'
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}-{}", self.base, self.ssid)
        }
    }
}

impl fmt::Debug for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callsign({})", self)
    }
}

impl FromStr for Callsign {
    type Err = ErrorKind;

    /// Parses `CALL` or `CALL-SSID`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('-') {
            Some((base, ssid)) => {
                let ssid = ssid
                    .parse::<u8>()
                    .map_err(|_| ErrorKind::InvalidCallsign(format!("bad ssid in {:?}", s)))?;
                Callsign::new(base, ssid)
            }
            None => Callsign::new(s, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_nodes_broadcast_call_is_valid() {
        let nodes = Callsign::nodes_broadcast();
        assert_eq!(nodes, "nodes".parse::<Callsign>().unwrap());
        assert_eq!(Callsign::from_bytes(&nodes.to_bytes()).unwrap(), nodes);
    }

    #[test]
    fn test_parse_and_display() {
        let call: Callsign = "g8pzt-2".parse().unwrap();
        assert_eq!(call.base(), "G8PZT");
        assert_eq!(call.ssid(), 2);
        assert_eq!(call.to_string(), "G8PZT-2");
        assert_eq!("N0CALL".parse::<Callsign>().unwrap().to_string(), "N0CALL");
    }

    #[test]
    fn test_ssid_out_of_range_rejected() {
        assert!(Callsign::new("N0CALL", 16).is_err());
        assert!("N0CALL-16".parse::<Callsign>().is_err());
        assert!(Callsign::new("N0CALL", 15).is_ok());
    }

    #[test]
    fn test_bad_base_rejected() {
        assert!(Callsign::new("", 0).is_err());
        assert!(Callsign::new("TOOLONG", 0).is_err());
        assert!(Callsign::new("A B", 0).is_err());
    }

    #[test]
    fn test_known_encoding() {
        let call = Callsign::new("N0CALL", 0).unwrap();
        assert_eq!(call.to_bytes(), [0x9C, 0x60, 0x86, 0x82, 0x98, 0x98, 0x60]);
    }

    #[test]
    fn test_short_call_is_space_padded_and_trimmed() {
        let call = Callsign::new("A1", 3).unwrap();
        let bytes = call.to_bytes();
        assert_eq!(bytes[2], b' ' << 1);
        assert_eq!(Callsign::from_bytes(&bytes).unwrap(), call);
    }

    #[test]
    fn test_decode_rejects_extension_bit_in_characters() {
        let mut bytes = Callsign::new("N0CALL", 0).unwrap().to_bytes();
        bytes[0] |= 0x01;
        assert_eq!(Callsign::from_bytes(&bytes), Err(DecodingErrorKind::Callsign));
    }

    #[test]
    fn test_decode_rejects_blank_and_truncated() {
        assert_eq!(Callsign::from_bytes(&[b' ' << 1; 7]), Err(DecodingErrorKind::Callsign));
        assert!(matches!(
            Callsign::from_bytes(&[0x9C, 0x60]),
            Err(DecodingErrorKind::Truncated { needed: 7, available: 2 })
        ));
    }

    #[test]
    fn test_alias_field() {
        let alias = Callsign::new("BBS", 0).unwrap();
        assert_eq!(&alias.to_alias_bytes(), b"BBS   ");
        assert_eq!(Callsign::from_alias_bytes(b"BBS   "), Some(alias));
        assert_eq!(Callsign::from_alias_bytes(b"      "), None);
    }

    proptest! {
        #[test]
        fn test_callsign_round_trip(base in "[A-Z0-9]{1,6}", ssid in 0u8..=15) {
            let call = Callsign::new(&base, ssid).unwrap();
            let decoded = Callsign::from_bytes(&call.to_bytes()).unwrap();
            prop_assert_eq!(decoded.base(), base.as_str());
            prop_assert_eq!(decoded.ssid(), ssid);
        }
    }
}
