//! Simulated field-bus automation network for integration testing
//!
//! This crate behaves like a set of real addressable devices on a
//! building-automation bus: each simulated endpoint exposes a
//! property/object model, answers management-service requests, holds a
//! small set of named datapoint values, and takes part in broadcast-style
//! network procedures. Test suites run against it exactly as they would
//! against physical hardware.
//!
//! # Architecture
//!
//! - **Endpoints** ([`endpoint::Endpoint`]) own their state exclusively: an
//!   interface-object store ([`object::ObjectStore`]), a datapoint value
//!   cache ([`datapoint::DatapointStore`]) and the mode flags in
//!   [`device::EndpointState`].
//! - **Service dispatch** is per request: role behavior
//!   ([`service::sim::SimLogic`]) answers the protocol corners the
//!   conformance tests depend on and declines everything else to an
//!   injected fallback ([`service::logic::DefaultLogic`]).
//! - **The link procedure** ([`service::link::LinkProcedure`]) runs as a
//!   fire-and-forget task negotiating group-object associations with a
//!   peer.
//! - **The transport** ([`transport::BusTransport`]) abstracts the bus; the
//!   in-memory [`transport::virtualbus::VirtualBus`] connects everything
//!   inside one process.
//! - **The driver** ([`driver::NetworkDriver`]) creates the endpoints,
//!   generates periodic read/write traffic and runs the system-broadcast
//!   enable/disable sequence against the gateway's router object.
//!
//! # Usage
//!
//! ```rust,no_run
//! use fieldbus_sim::driver::{DriverConfig, NetworkDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut driver = NetworkDriver::bootstrap(DriverConfig::default()).await?;
//!     // reads operator commands from stdin until `exit`
//!     driver.run().await?;
//!     Ok(())
//! }
//! ```

pub mod addr;
pub mod datapoint;
pub mod device;
pub mod dpt;
pub mod driver;
pub mod endpoint;
pub mod object;
pub mod platform;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use addr::{AddrError, BusAddress, DeviceAddress};
pub use datapoint::{Datapoint, DatapointError, DatapointStore};
pub use device::{EndpointState, NetDefaults, SimDevice};
pub use dpt::{DptError, DptId};
pub use driver::{DriverConfig, DriverError, NetworkDriver};
pub use endpoint::Endpoint;
pub use object::{Description, ObjectStore, ObjectType, PropertyError};
pub use service::{Request, Response, ServiceError};
pub use transport::{BusTransport, Medium, TransportError};
