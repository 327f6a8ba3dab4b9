//! Datapoint types and value translation
//!
//! Every datapoint declares a [`DptId`] that fixes both the semantic type and
//! the wire encoding of its value. Values are handled in a string-normalized
//! form ("on", "42", "12.3", ...), the same representation the value cache
//! stores, and translated to/from their byte encoding here.
//!
//! Only the types of the fixed demonstration datapoint set are implemented;
//! the set covers one representative of every encoding size class (1-bit
//! booleans, 3-bit controlled, scaled 8-bit, 16-bit counters, 16- and 32-bit
//! floats, character strings and 16-bit status sets).

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

/// Value translation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DptError {
    /// The string value cannot be parsed for the declared type
    #[error("value {value:?} not valid for type {dpt}")]
    Value {
        /// Type id the value was checked against
        dpt: &'static str,
        /// Offending value
        value: String,
    },

    /// The value parsed but lies outside the encodable range
    #[error("value {value:?} out of range for type {dpt}")]
    Range {
        /// Type id the value was checked against
        dpt: &'static str,
        /// Offending value
        value: String,
    },

    /// Encoded data has the wrong length for the declared type
    #[error("wrong data length for type {dpt}: expected {expected} bytes, got {actual}")]
    Length {
        /// Type id the data was checked against
        dpt: &'static str,
        /// Expected encoded length
        expected: usize,
        /// Actual length received
        actual: usize,
    },
}

/// Datapoint type identifier
///
/// The discriminants mirror the conventional `main.sub` type codes used on
/// building-automation buses; [`DptId::id`] yields the textual code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DptId {
    /// 1.001, boolean, "off"/"on"
    Switch,
    /// 1.002, boolean, "false"/"true"
    Bool,
    /// 1.003, boolean, "disable"/"enable"
    Enable,
    /// 1.011, boolean, "not occupied"/"occupied"
    Occupancy,
    /// 3.008, blinds step control, "up N"/"down N" with step 0..=7
    ControlBlinds,
    /// 5.001, percentage 0..=100, scaled to one byte
    Scaling,
    /// 7.001, unsigned counter 0..=65535
    Count16,
    /// 7.600, absolute color temperature in kelvin
    ColorTemp,
    /// 9.026, 16-bit float (rain amount)
    Float16,
    /// 14.000, 32-bit IEEE float (acceleration)
    Float32,
    /// 16.001, character string, up to 14 Latin-1 bytes
    Text,
    /// 22.101, heating/cooling controller status, 16-bit set
    RhccStatus,
    /// 22.1000, media set, 16-bit set
    Media,
}

/// Boolean label pairs, low value first
const BOOL_LABELS: &[(DptId, &str, &str)] = &[
    (DptId::Switch, "off", "on"),
    (DptId::Bool, "false", "true"),
    (DptId::Enable, "disable", "enable"),
    (DptId::Occupancy, "not occupied", "occupied"),
];

impl DptId {
    /// Textual type code, e.g. `"5.001"`
    pub fn id(&self) -> &'static str {
        match self {
            Self::Switch => "1.001",
            Self::Bool => "1.002",
            Self::Enable => "1.003",
            Self::Occupancy => "1.011",
            Self::ControlBlinds => "3.008",
            Self::Scaling => "5.001",
            Self::Count16 => "7.001",
            Self::ColorTemp => "7.600",
            Self::Float16 => "9.026",
            Self::Float32 => "14.000",
            Self::Text => "16.001",
            Self::RhccStatus => "22.101",
            Self::Media => "22.1000",
        }
    }

    /// Resolve a textual type code
    pub fn from_id(id: &str) -> Option<Self> {
        [
            Self::Switch,
            Self::Bool,
            Self::Enable,
            Self::Occupancy,
            Self::ControlBlinds,
            Self::Scaling,
            Self::Count16,
            Self::ColorTemp,
            Self::Float16,
            Self::Float32,
            Self::Text,
            Self::RhccStatus,
            Self::Media,
        ]
        .into_iter()
        .find(|t| t.id() == id)
    }

    /// Encoded value length in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::Switch | Self::Bool | Self::Enable | Self::Occupancy | Self::ControlBlinds => 1,
            Self::Scaling => 1,
            Self::Count16 | Self::ColorTemp | Self::Float16 | Self::RhccStatus | Self::Media => 2,
            Self::Float32 => 4,
            Self::Text => 14,
        }
    }

    /// The type's zero/default string representation
    pub fn default_value(&self) -> String {
        match self {
            Self::Switch | Self::Bool | Self::Enable | Self::Occupancy => {
                self.bool_labels().0.to_string()
            }
            Self::ControlBlinds => "up 0".to_string(),
            Self::Scaling | Self::Count16 | Self::ColorTemp => "0".to_string(),
            Self::Float16 | Self::Float32 => "0.0".to_string(),
            Self::Text => String::new(),
            Self::RhccStatus | Self::Media => "0x0000".to_string(),
        }
    }

    fn bool_labels(&self) -> (&'static str, &'static str) {
        BOOL_LABELS
            .iter()
            .find(|(t, _, _)| t == self)
            .map(|(_, low, high)| (*low, *high))
            .unwrap_or(("false", "true"))
    }

    /// Encode a string-normalized value to its byte representation
    pub fn encode(&self, value: &str) -> Result<Bytes, DptError> {
        let value = value.trim();
        let bytes = match self {
            Self::Switch | Self::Bool | Self::Enable | Self::Occupancy => {
                vec![self.parse_bool(value)? as u8]
            }
            Self::ControlBlinds => vec![parse_step_control(self.id(), value)?],
            Self::Scaling => {
                let pct: f64 = parse_number(self.id(), value)?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(range(self, value));
                }
                vec![(pct * 255.0 / 100.0).round() as u8]
            }
            Self::Count16 | Self::ColorTemp => {
                let n: u32 = value.parse().map_err(|_| invalid(self, value))?;
                if n > 0xffff {
                    return Err(range(self, value));
                }
                (n as u16).to_be_bytes().to_vec()
            }
            Self::Float16 => encode_float16(self.id(), parse_number(self.id(), value)?)?,
            Self::Float32 => {
                let f: f64 = parse_number(self.id(), value)?;
                (f as f32).to_be_bytes().to_vec()
            }
            Self::Text => {
                let mut buf = vec![0u8; 14];
                if value.chars().count() > 14 {
                    return Err(range(self, value));
                }
                for (i, c) in value.chars().enumerate() {
                    if c as u32 > 0xff {
                        return Err(invalid(self, value));
                    }
                    buf[i] = c as u8;
                }
                buf
            }
            Self::RhccStatus | Self::Media => {
                let n = parse_u16_set(value).ok_or_else(|| invalid(self, value))?;
                n.to_be_bytes().to_vec()
            }
        };
        Ok(Bytes::from(bytes))
    }

    /// Decode a byte representation into the string-normalized value
    pub fn decode(&self, data: &[u8]) -> Result<String, DptError> {
        if data.len() != self.size() {
            return Err(DptError::Length {
                dpt: self.id(),
                expected: self.size(),
                actual: data.len(),
            });
        }
        let value = match self {
            Self::Switch | Self::Bool | Self::Enable | Self::Occupancy => {
                let (low, high) = self.bool_labels();
                if data[0] & 0x01 != 0 { high } else { low }.to_string()
            }
            Self::ControlBlinds => {
                let dir = if data[0] & 0x08 != 0 { "down" } else { "up" };
                format!("{} {}", dir, data[0] & 0x07)
            }
            Self::Scaling => format!("{}", (data[0] as f64 * 100.0 / 255.0).round() as u8),
            Self::Count16 | Self::ColorTemp => {
                format!("{}", u16::from_be_bytes([data[0], data[1]]))
            }
            Self::Float16 => {
                format_hundredths(decode_float16(u16::from_be_bytes([data[0], data[1]])))
            }
            Self::Float32 => format_float32(f32::from_be_bytes([data[0], data[1], data[2], data[3]])),
            Self::Text => data
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect(),
            Self::RhccStatus | Self::Media => {
                format!("0x{:04x}", u16::from_be_bytes([data[0], data[1]]))
            }
        };
        Ok(value)
    }

    fn parse_bool(&self, value: &str) -> Result<bool, DptError> {
        let (low, high) = self.bool_labels();
        match value {
            v if v.eq_ignore_ascii_case(high) => Ok(true),
            v if v.eq_ignore_ascii_case(low) => Ok(false),
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            _ => Err(invalid(self, value)),
        }
    }
}

impl fmt::Display for DptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

fn invalid(dpt: &DptId, value: &str) -> DptError {
    DptError::Value {
        dpt: dpt.id(),
        value: value.to_string(),
    }
}

fn range(dpt: &DptId, value: &str) -> DptError {
    DptError::Range {
        dpt: dpt.id(),
        value: value.to_string(),
    }
}

fn parse_number(dpt: &'static str, value: &str) -> Result<f64, DptError> {
    value.parse().map_err(|_| DptError::Value {
        dpt,
        value: value.to_string(),
    })
}

/// "up N" / "down N" with step 0..=7; bit 3 carries the direction
fn parse_step_control(dpt: &'static str, value: &str) -> Result<u8, DptError> {
    let err = || DptError::Value {
        dpt,
        value: value.to_string(),
    };
    let mut parts = value.split_whitespace();
    let dir = match parts.next().ok_or_else(err)? {
        d if d.eq_ignore_ascii_case("up") => 0u8,
        d if d.eq_ignore_ascii_case("down") => 0x08,
        _ => return Err(err()),
    };
    let step: u8 = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    if step > 7 || parts.next().is_some() {
        return Err(err());
    }
    Ok(dir | step)
}

fn parse_u16_set(value: &str) -> Option<u16> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// 16-bit float: value = 0.01 * M * 2^E with a 12-bit two's-complement
/// mantissa and a 4-bit exponent
fn encode_float16(dpt: &'static str, value: f64) -> Result<Vec<u8>, DptError> {
    let mut mantissa = (value * 100.0).round() as i64;
    let mut exponent = 0u16;
    while !(-2048..=2047).contains(&mantissa) {
        mantissa >>= 1;
        exponent += 1;
        if exponent > 15 {
            return Err(DptError::Range {
                dpt,
                value: format!("{value}"),
            });
        }
    }
    let m12 = (mantissa as u16) & 0x0fff;
    let raw = (m12 & 0x0800) << 4 | exponent << 11 | (m12 & 0x07ff);
    Ok(raw.to_be_bytes().to_vec())
}

/// Decode to hundredths so formatting stays exact
fn decode_float16(raw: u16) -> i64 {
    let exponent = (raw >> 11 & 0x0f) as u32;
    let mut mantissa = ((raw & 0x07ff) | (raw & 0x8000) >> 4) as i32;
    if mantissa & 0x0800 != 0 {
        mantissa |= !0x0fff;
    }
    (mantissa as i64) << exponent
}

/// Exact decimal form of a value given in hundredths
fn format_hundredths(scaled: i64) -> String {
    let sign = if scaled < 0 { "-" } else { "" };
    let abs = scaled.unsigned_abs();
    let (int, frac) = (abs / 100, abs % 100);
    if frac == 0 {
        format!("{sign}{int}.0")
    } else if frac % 10 == 0 {
        format!("{sign}{int}.{}", frac / 10)
    } else {
        format!("{sign}{int}.{frac:02}")
    }
}

/// Shortest decimal form, with a trailing ".0" on whole numbers
fn format_float32(value: f32) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bool_labels() {
        assert_eq!(DptId::Switch.encode("on").unwrap().as_ref(), &[1]);
        assert_eq!(DptId::Switch.decode(&[0]).unwrap(), "off");
        assert_eq!(DptId::Enable.decode(&[1]).unwrap(), "enable");
        assert_eq!(DptId::Occupancy.default_value(), "not occupied");
        // numeric forms are accepted on input
        assert_eq!(DptId::Bool.encode("1").unwrap().as_ref(), &[1]);
        assert!(DptId::Switch.encode("maybe").is_err());
    }

    #[test]
    fn test_step_control() {
        assert_eq!(DptId::ControlBlinds.encode("down 2").unwrap().as_ref(), &[0x0a]);
        assert_eq!(DptId::ControlBlinds.decode(&[0x03]).unwrap(), "up 3");
        assert!(DptId::ControlBlinds.encode("up 8").is_err());
        assert!(DptId::ControlBlinds.encode("sideways 1").is_err());
    }

    #[test]
    fn test_scaling_integer_percent_roundtrip() {
        for pct in 0..=100u8 {
            let encoded = DptId::Scaling.encode(&pct.to_string()).unwrap();
            assert_eq!(DptId::Scaling.decode(&encoded).unwrap(), pct.to_string());
        }
        assert!(DptId::Scaling.encode("101").is_err());
    }

    #[test]
    fn test_counter() {
        let encoded = DptId::Count16.encode("65535").unwrap();
        assert_eq!(encoded.as_ref(), &[0xff, 0xff]);
        assert_eq!(DptId::Count16.decode(&encoded).unwrap(), "65535");
        assert!(DptId::Count16.encode("65536").is_err());
    }

    #[test]
    fn test_float16_exact_values() {
        // values on the 0.01 grid with no exponent survive exactly
        let encoded = DptId::Float16.encode("12.3").unwrap();
        assert_eq!(DptId::Float16.decode(&encoded).unwrap(), "12.3");
        let encoded = DptId::Float16.encode("-5.5").unwrap();
        assert_eq!(DptId::Float16.decode(&encoded).unwrap(), "-5.5");
        assert_eq!(DptId::Float16.decode(&[0, 0]).unwrap(), "0.0");
    }

    #[test]
    fn test_float16_range() {
        assert!(DptId::Float16.encode("99999999").is_err());
    }

    #[test]
    fn test_float32() {
        let encoded = DptId::Float32.encode("9.81").unwrap();
        assert_eq!(DptId::Float32.decode(&encoded).unwrap(), "9.81");
        assert_eq!(DptId::Float32.decode(&[0; 4]).unwrap(), "0.0");
    }

    #[test]
    fn test_text_padding_and_limits() {
        let encoded = DptId::Text.encode("Hello bus!").unwrap();
        assert_eq!(encoded.len(), 14);
        assert_eq!(DptId::Text.decode(&encoded).unwrap(), "Hello bus!");
        assert_eq!(DptId::Text.decode(&[0; 14]).unwrap(), "");
        assert!(DptId::Text.encode("fifteen chars..").is_err());
        assert!(DptId::Text.encode("\u{20ac}").is_err()); // not Latin-1
    }

    #[test]
    fn test_bit_sets() {
        let encoded = DptId::RhccStatus.encode("0x0102").unwrap();
        assert_eq!(encoded.as_ref(), &[0x01, 0x02]);
        assert_eq!(DptId::Media.decode(&[0x01, 0x02]).unwrap(), "0x0102");
        assert_eq!(DptId::Media.encode("258").unwrap().as_ref(), &[0x01, 0x02]);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            DptId::Count16.decode(&[1]),
            Err(DptError::Length { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_type_code_lookup() {
        assert_eq!(DptId::from_id("5.001"), Some(DptId::Scaling));
        assert_eq!(DptId::from_id("9.026"), Some(DptId::Float16));
        assert_eq!(DptId::from_id("99.999"), None);
        assert_eq!(DptId::Media.to_string(), "22.1000");
    }

    proptest! {
        // the exponent==0 filter rejects ~15/16 of random draws, so give the
        // rejection sampler enough headroom to reach the default case count
        #![proptest_config(ProptestConfig { max_global_rejects: 100_000, ..ProptestConfig::default() })]
        // decoding then re-encoding a 16-bit float is stable once quantized
        #[test]
        fn prop_float16_requantization_stable(raw in 0u16..=0xffff) {
            let exponent = raw >> 11 & 0x0f;
            // skip non-canonical encodings of values that fit a smaller exponent
            prop_assume!(exponent == 0);
            let value = DptId::Float16.decode(&raw.to_be_bytes()).unwrap();
            let encoded = DptId::Float16.encode(&value).unwrap();
            prop_assert_eq!(DptId::Float16.decode(&encoded).unwrap(), value);
        }

        #[test]
        fn prop_counter_roundtrip(n in 0u32..=0xffff) {
            let encoded = DptId::Count16.encode(&n.to_string()).unwrap();
            prop_assert_eq!(DptId::Count16.decode(&encoded).unwrap(), n.to_string());
        }
    }
}
