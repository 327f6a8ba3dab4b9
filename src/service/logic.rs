//! Service capability interface and default fallback
//!
//! [`ServiceLogic`] is the seam a simulated role plugs its behavior into:
//! one method per inbound request kind, each free to handle the request,
//! answer nothing, or decline. Declining hands the request to a second
//! [`ServiceLogic`] instance injected as the fallback strategy, the
//! platform's baseline behavior, so role logic only encodes what it wants
//! to differ in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::datapoint::Datapoint;
use crate::device::SimDevice;
use crate::service::{EraseCode, FuncPropResponse, ReturnCode, ServiceError, Serviced};
use crate::transport::BusTransport;

/// Access level granted when authorization fails
pub const MIN_ACCESS_LEVEL: u8 = 15;

/// Time until a device answers again after a basic restart
pub const BASIC_RESTART_TIME: Duration = Duration::from_millis(5);

/// Time until a device answers again after a master reset
pub const MASTER_RESET_TIME: Duration = Duration::from_secs(2);

/// Per-request context supplied by the transport
#[derive(Clone)]
pub struct RequestCtx {
    /// Whether the request arrived as a broadcast rather than point-to-point
    pub broadcast: bool,
    /// Transport the request arrived on; used for follow-up traffic such as
    /// the link procedure
    pub transport: Arc<dyn BusTransport>,
}

impl RequestCtx {
    /// Timing factor of the transport's medium, in milliseconds
    pub fn time_factor_ms(&self) -> u32 {
        self.transport.medium().time_factor_ms()
    }
}

impl std::fmt::Debug for RequestCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCtx")
            .field("broadcast", &self.broadcast)
            .finish_non_exhaustive()
    }
}

/// Behavior of one simulated role, consulted per inbound request
///
/// Every method may return [`Serviced::Declined`] to fall through to the
/// injected fallback; that is also each method's default, so a role only
/// overrides the requests it wants to differ in. Errors are typed failures
/// surfaced to the requester, distinct from "no answer".
#[async_trait]
pub trait ServiceLogic: Send + Sync {
    /// Answer a datapoint read
    async fn request_datapoint_value(
        &self,
        _dev: &SimDevice,
        _dp: &Datapoint,
    ) -> Result<Serviced<String>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Apply a datapoint write
    async fn update_datapoint_value(
        &self,
        _dev: &mut SimDevice,
        _dp: &Datapoint,
        _value: String,
    ) -> Result<Serviced<()>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Answer a generic parameter read
    async fn read_parameter(
        &self,
        _dev: &SimDevice,
        _object_type: u16,
        _pid: u8,
        _info: &[u8],
        _ctx: &RequestCtx,
    ) -> Result<Serviced<Bytes>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Apply a generic parameter write
    async fn write_parameter(
        &self,
        _dev: &SimDevice,
        _object_type: u16,
        _pid: u8,
        _info: &[u8],
        _ctx: &RequestCtx,
    ) -> Result<Serviced<()>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Answer an analog-channel read
    async fn read_adc(
        &self,
        _dev: &SimDevice,
        _channel: u8,
        _reads: u8,
    ) -> Result<Serviced<i32>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Check an access key and grant a level
    async fn authorize(
        &self,
        _dev: &SimDevice,
        _key: [u8; 4],
    ) -> Result<Serviced<u8>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Restart the endpoint, optionally as a master reset
    async fn restart(
        &self,
        _dev: &mut SimDevice,
        _master_reset: bool,
        _erase: EraseCode,
        _channel: u8,
    ) -> Result<Serviced<Duration>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Execute a function-property command
    async fn function_property_command(
        &self,
        _dev: &mut SimDevice,
        _object_index: u8,
        _pid: u8,
        _data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Answer a function-property state read
    async fn read_function_property_state(
        &self,
        _dev: &SimDevice,
        _object_index: u8,
        _pid: u8,
        _data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        Ok(Serviced::Declined)
    }

    /// Process a generic management indication
    async fn management(
        &self,
        _dev: &mut SimDevice,
        _svc_type: u16,
        _asdu: &[u8],
        _ctx: &RequestCtx,
    ) -> Result<Serviced<Bytes>, ServiceError> {
        Ok(Serviced::Declined)
    }
}

/// Baseline platform behavior, used as the injected fallback strategy
///
/// Reads it cannot answer produce no response; authorization grants the
/// minimal level; restarts only report their processing time.
#[derive(Debug, Default)]
pub struct DefaultLogic;

impl DefaultLogic {
    /// New fallback instance
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceLogic for DefaultLogic {
    async fn request_datapoint_value(
        &self,
        _dev: &SimDevice,
        _dp: &Datapoint,
    ) -> Result<Serviced<String>, ServiceError> {
        Ok(Serviced::NoResponse)
    }

    async fn update_datapoint_value(
        &self,
        dev: &mut SimDevice,
        dp: &Datapoint,
        value: String,
    ) -> Result<Serviced<()>, ServiceError> {
        dev.datapoints_mut().write(dp.address, value)?;
        Ok(Serviced::Handled(()))
    }

    async fn read_parameter(
        &self,
        dev: &SimDevice,
        object_type: u16,
        pid: u8,
        _info: &[u8],
        _ctx: &RequestCtx,
    ) -> Result<Serviced<Bytes>, ServiceError> {
        log::debug!(
            "{}: no parameter (object type {}, pid {})",
            dev.state().address,
            object_type,
            pid
        );
        Ok(Serviced::NoResponse)
    }

    async fn write_parameter(
        &self,
        _dev: &SimDevice,
        _object_type: u16,
        _pid: u8,
        _info: &[u8],
        _ctx: &RequestCtx,
    ) -> Result<Serviced<()>, ServiceError> {
        Ok(Serviced::Handled(()))
    }

    async fn read_adc(
        &self,
        _dev: &SimDevice,
        _channel: u8,
        _reads: u8,
    ) -> Result<Serviced<i32>, ServiceError> {
        Ok(Serviced::Handled(0))
    }

    async fn authorize(
        &self,
        _dev: &SimDevice,
        _key: [u8; 4],
    ) -> Result<Serviced<u8>, ServiceError> {
        Ok(Serviced::Handled(MIN_ACCESS_LEVEL))
    }

    async fn restart(
        &self,
        dev: &mut SimDevice,
        master_reset: bool,
        erase: EraseCode,
        channel: u8,
    ) -> Result<Serviced<Duration>, ServiceError> {
        log::info!(
            "{}: restart (master reset {}, erase {:?}, channel {})",
            dev.state().address,
            master_reset,
            erase,
            channel
        );
        let time = if master_reset {
            MASTER_RESET_TIME
        } else {
            BASIC_RESTART_TIME
        };
        Ok(Serviced::Handled(time))
    }

    async fn function_property_command(
        &self,
        _dev: &mut SimDevice,
        _object_index: u8,
        _pid: u8,
        _data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        Ok(Serviced::Handled(FuncPropResponse::error(
            ReturnCode::DataVoid,
            Bytes::new(),
        )))
    }

    async fn read_function_property_state(
        &self,
        _dev: &SimDevice,
        _object_index: u8,
        _pid: u8,
        _data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        Ok(Serviced::Handled(FuncPropResponse::error(
            ReturnCode::DataVoid,
            Bytes::new(),
        )))
    }

    async fn management(
        &self,
        dev: &mut SimDevice,
        svc_type: u16,
        _asdu: &[u8],
        _ctx: &RequestCtx,
    ) -> Result<Serviced<Bytes>, ServiceError> {
        log::debug!(
            "{}: unhandled management service type 0x{:03x}",
            dev.state().address,
            svc_type
        );
        Ok(Serviced::NoResponse)
    }
}
