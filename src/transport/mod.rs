//! Transport abstraction
//!
//! The simulator core never touches wire-level framing; it talks to a
//! [`BusTransport`] that moves typed service requests and responses between
//! endpoints addressed by device identity, plus group-addressed value
//! traffic and a system-wide parameter read primitive. The in-memory
//! implementation backing the test network lives in [`virtualbus`].

pub mod virtualbus;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::addr::{BusAddress, DeviceAddress};
use crate::service::{Request, Response, ServiceError};

/// Default response timeout for confirmed requests
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Physical medium the bus emulates
///
/// Only the timing factor matters to the core: it scales the collision
/// avoidance jitter of broadcast responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Medium {
    /// Twisted pair
    #[default]
    Tp,
    /// IP backbone
    Ip,
    /// Radio frequency
    Rf,
}

impl Medium {
    /// Medium-specific timing factor in milliseconds
    pub const fn time_factor_ms(&self) -> u32 {
        match self {
            Self::Tp => 3,
            Self::Ip => 1,
            Self::Rf => 10,
        }
    }

    /// Medium code as stored in the device object
    pub const fn code(&self) -> u8 {
        match self {
            Self::Tp => 0x01,
            Self::Ip => 0x20,
            Self::Rf => 0x10,
        }
    }
}

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Confirmed request ran into the response timeout
    #[error("request to {0} timed out")]
    Timeout(DeviceAddress),

    /// Nobody answered a group read
    #[error("no data for group read of {0}")]
    NoData(BusAddress),

    /// System-wide parameter read got no answer
    #[error("no answer to system parameter read (object type {object_type}, pid {pid})")]
    NoAnswer {
        /// Queried object type
        object_type: u16,
        /// Queried parameter id
        pid: u8,
    },

    /// The address is already attached to the bus
    #[error("device address {0} already attached")]
    AddressInUse(DeviceAddress),

    /// The bus is gone
    #[error("bus closed")]
    Closed,

    /// A dispatcher failed while serving the request
    #[error("service failed: {0}")]
    Service(#[from] ServiceError),
}

/// Reliable request/response transport between simulated endpoints
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Send point-to-point data without waiting for an answer
    async fn send(&self, dst: DeviceAddress, req: Request) -> Result<(), TransportError>;

    /// Confirmed point-to-point request; waits up to the response timeout
    async fn request(
        &self,
        dst: DeviceAddress,
        req: Request,
    ) -> Result<Option<Response>, TransportError>;

    /// Publish a group value write to every endpoint on the bus
    async fn group_write(&self, addr: BusAddress, data: Bytes) -> Result<(), TransportError>;

    /// Group value read; the first answering endpoint wins
    async fn group_read(&self, addr: BusAddress) -> Result<Bytes, TransportError>;

    /// System-wide parameter read, delivered as a broadcast to all endpoints
    async fn system_parameter_read(
        &self,
        object_type: u16,
        pid: u8,
        operand: u8,
    ) -> Result<Bytes, TransportError>;

    /// Medium the bus emulates
    fn medium(&self) -> Medium;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medium_codes() {
        assert_eq!(Medium::Tp.code(), 0x01);
        assert_eq!(Medium::Rf.code(), 0x10);
        assert_eq!(Medium::default(), Medium::Tp);
        assert!(Medium::Rf.time_factor_ms() > Medium::Ip.time_factor_ms());
    }
}
