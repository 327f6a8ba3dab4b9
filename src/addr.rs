//! Bus and device addressing
//!
//! Two address kinds exist on the simulated network:
//!
//! - [`BusAddress`], a shared, multicast-style destination under which a
//!   datapoint value is published. Written `main/middle/sub`.
//! - [`DeviceAddress`], the unique identity of one endpoint on the network.
//!   Written `area.line.device`.
//!
//! Both are 16-bit raw values with a fixed bit layout; the textual forms are
//! what appears in configuration and log output.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Address parse/range errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrError {
    /// Input did not match the expected textual form
    #[error("invalid address syntax: {0:?}")]
    Syntax(String),

    /// A component was outside its allowed range
    #[error("address component {component} out of range: {value}")]
    Range {
        /// Component name ("main", "line", ...)
        component: &'static str,
        /// Offending value
        value: u32,
    },
}

fn check(component: &'static str, value: u32, max: u32) -> Result<u16, AddrError> {
    if value > max {
        return Err(AddrError::Range { component, value });
    }
    Ok(value as u16)
}

/// Destination address of a shared datapoint value (5/3/8 bit layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusAddress(u16);

impl BusAddress {
    /// Create an address from main group (0..=31), middle group (0..=7) and
    /// sub group (0..=255).
    ///
    /// Component overflow wraps into the neighboring field; the textual form
    /// rejects out-of-range components instead.
    pub const fn new(main: u8, middle: u8, sub: u8) -> Self {
        Self((main as u16 & 0x1f) << 11 | (middle as u16 & 0x07) << 8 | sub as u16)
    }

    /// Address from the raw 16-bit value
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw 16-bit value
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Main group (0..=31)
    pub const fn main(&self) -> u8 {
        (self.0 >> 11) as u8
    }

    /// Middle group (0..=7)
    pub const fn middle(&self) -> u8 {
        (self.0 >> 8 & 0x07) as u8
    }

    /// Sub group (0..=255)
    pub const fn sub(&self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

impl FromStr for BusAddress {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (m, i, u) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(i), Some(u), None) => (m, i, u),
            _ => return Err(AddrError::Syntax(s.to_string())),
        };
        let parse = |p: &str| p.parse::<u32>().map_err(|_| AddrError::Syntax(s.to_string()));
        let main = check("main", parse(m)?, 31)?;
        let middle = check("middle", parse(i)?, 7)?;
        let sub = check("sub", parse(u)?, 255)?;
        Ok(Self(main << 11 | middle << 8 | sub))
    }
}

/// Unique identity of one endpoint (4/4/8 bit layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(u16);

impl DeviceAddress {
    /// Create an address from area (0..=15), line (0..=15) and device (0..=255).
    ///
    /// Component overflow wraps into the neighboring field, so the well-known
    /// identities are built with in-range literals only.
    pub const fn new(area: u8, line: u8, device: u8) -> Self {
        Self((area as u16 & 0x0f) << 12 | (line as u16 & 0x0f) << 8 | device as u16)
    }

    /// Address from the raw 16-bit value
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw 16-bit value
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Area (0..=15)
    pub const fn area(&self) -> u8 {
        (self.0 >> 12) as u8
    }

    /// Line (0..=15)
    pub const fn line(&self) -> u8 {
        (self.0 >> 8 & 0x0f) as u8
    }

    /// Device (0..=255)
    pub const fn device(&self) -> u8 {
        self.0 as u8
    }

    /// Two-byte big-endian form, as stored in address-valued properties
    pub const fn to_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl FromStr for DeviceAddress {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (a, l, d) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(l), Some(d), None) => (a, l, d),
            _ => return Err(AddrError::Syntax(s.to_string())),
        };
        let parse = |p: &str| p.parse::<u32>().map_err(|_| AddrError::Syntax(s.to_string()));
        let area = check("area", parse(a)?, 15)?;
        let line = check("line", parse(l)?, 15)?;
        let device = check("device", parse(d)?, 255)?;
        Ok(Self(area << 12 | line << 8 | device))
    }
}
