//! Management and value services
//!
//! The typed request/response vocabulary exchanged between endpoints, the
//! capability interface a dispatcher implements ([`logic::ServiceLogic`]),
//! the concrete simulated-endpoint behavior ([`sim::SimLogic`]) and the
//! spawned link-procedure task ([`link::LinkProcedure`]).
//!
//! # Dispatch model
//!
//! Each endpoint owns exactly one dispatcher operating per inbound request.
//! A request is first offered to the endpoint's [`logic::ServiceLogic`]; any
//! branch it declines falls through to an explicitly injected fallback
//! strategy ([`logic::DefaultLogic`]) that supplies the platform's baseline
//! behavior. "Handled with no payload" and "declined" are distinct outcomes:
//! a declined management indication still reaches the fallback, a swallowed
//! one never does.

pub mod link;
pub mod logic;
pub mod sim;

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::addr::BusAddress;
use crate::datapoint::DatapointError;
use crate::dpt::DptError;
use crate::object::PropertyError;

/// Service-type codes appearing in generic management indications
pub mod svc {
    /// Network-parameter response; swallowed by the simulated endpoint
    pub const NETWORK_PARAM_RESPONSE: u16 = 0x3db;
    /// System network-parameter read
    pub const SYSTEM_NETWORK_PARAM_READ: u16 = 0x1c8;
    /// System network-parameter response; swallowed by the simulated endpoint
    pub const SYSTEM_NETWORK_PARAM_RESPONSE: u16 = 0x1c9;
    /// Function-property command
    pub const FUNCTION_PROPERTY_COMMAND: u16 = 0x2c7;
    /// Function-property state read
    pub const FUNCTION_PROPERTY_STATE_READ: u16 = 0x2c8;
    /// Link association write, used by the link procedure
    pub const LINK_WRITE: u16 = 0x3e7;
}

/// Scope of a master reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EraseCode {
    /// Confirmed restart without erasure
    ConfirmedRestart = 1,
    /// Reset to factory defaults
    FactoryReset = 2,
    /// Reset the device address
    ResetDeviceAddress = 3,
    /// Erase the application program
    ResetApplicationProgram = 4,
    /// Erase application parameters
    ResetApplicationParameters = 5,
    /// Erase link associations
    ResetLinks = 6,
    /// Factory defaults, device address kept
    FactoryResetKeepAddress = 7,
}

/// Return codes carried in function-property responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReturnCode {
    /// Operation accepted
    Success = 0x00,
    /// Addressed data void / not available
    DataVoid = 0xa0,
    /// Command rejected (malformed or out of range)
    InvalidCommand = 0xa2,
}

/// Response to a function-property command or state read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncPropResponse {
    /// Outcome of the command
    pub return_code: ReturnCode,
    /// Response data; the first byte echoes the request's service id
    pub data: Bytes,
}

impl FuncPropResponse {
    /// Successful response with the given data
    pub fn success(data: impl Into<Bytes>) -> Self {
        Self {
            return_code: ReturnCode::Success,
            data: data.into(),
        }
    }

    /// Error response with the given return code and data
    pub fn error(return_code: ReturnCode, data: impl Into<Bytes>) -> Self {
        Self {
            return_code,
            data: data.into(),
        }
    }
}

/// Inbound service request kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Read a shared datapoint value
    GroupRead {
        /// Datapoint address
        addr: BusAddress,
    },
    /// Write a shared datapoint value
    GroupWrite {
        /// Datapoint address
        addr: BusAddress,
        /// Encoded value, per the datapoint's declared type
        data: Bytes,
    },
    /// Read a generic parameter of an object type
    ParameterRead {
        /// Object type code
        object_type: u16,
        /// Parameter id
        pid: u8,
        /// Additional request info
        info: Bytes,
    },
    /// Write a generic parameter of an object type
    ParameterWrite {
        /// Object type code
        object_type: u16,
        /// Parameter id
        pid: u8,
        /// Parameter data
        info: Bytes,
    },
    /// Read an analog channel
    AdcRead {
        /// Channel number
        channel: u8,
        /// Number of consecutive reads to average
        reads: u8,
    },
    /// Authorize with an access key
    Authorize {
        /// 4-byte access key
        key: [u8; 4],
    },
    /// Restart the endpoint
    Restart {
        /// Whether this is a master reset
        master_reset: bool,
        /// Erase scope of a master reset
        erase: EraseCode,
        /// Affected channel, 0 for the whole device
        channel: u8,
    },
    /// Function-property command, addressed by object index
    FuncPropCommand {
        /// Object index within the endpoint's object list
        object_index: u8,
        /// Property id
        pid: u8,
        /// Command payload: reserved byte, service id, optional operand
        data: Bytes,
    },
    /// Function-property state read, addressed by object index
    FuncPropStateRead {
        /// Object index within the endpoint's object list
        object_index: u8,
        /// Property id
        pid: u8,
        /// Query payload: reserved byte, service id
        data: Bytes,
    },
    /// Generic management indication, discriminated by service type
    Management {
        /// Service-type code (see [`svc`])
        svc_type: u16,
        /// Raw service data unit
        asdu: Bytes,
    },
}

/// Responses produced by a dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Encoded datapoint value, answering a group read
    GroupValue(Bytes),
    /// Parameter read response
    Parameter(Bytes),
    /// Analog channel reading
    Adc(i32),
    /// Granted access level
    Access(u8),
    /// Time until the endpoint is ready again after a restart
    RestartTime(Duration),
    /// Function-property outcome
    FuncProp(FuncPropResponse),
    /// Generic management response data
    Management(Bytes),
}

/// Outcome of offering a request to a [`logic::ServiceLogic`]
#[derive(Debug, Clone, PartialEq)]
pub enum Serviced<T> {
    /// The logic produced an answer
    Handled(T),
    /// The logic consumed the request and deliberately answers nothing
    NoResponse,
    /// The logic does not care; fall through to the fallback strategy
    Declined,
}

/// Service processing errors
///
/// Malformed requests are typed failures, distinct from "no answer" (which
/// dispatch expresses as an absent response).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// Property store rejected the operation
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// Datapoint registry rejected the operation
    #[error(transparent)]
    Datapoint(#[from] DatapointError),

    /// Value translation failed
    #[error(transparent)]
    Value(#[from] DptError),

    /// Request shape is invalid for its kind
    #[error("malformed request: {0}")]
    Malformed(String),
}
