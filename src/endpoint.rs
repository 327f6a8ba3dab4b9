//! One endpoint's service dispatcher
//!
//! An [`Endpoint`] couples a [`SimDevice`] with the logic/fallback pair that
//! answers inbound requests. The device sits behind a `Mutex` held for the
//! whole of each dispatch call, so all mutating operations on one endpoint's
//! stores are serialized even when a transport delivers requests to
//! different endpoints concurrently.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::addr::DeviceAddress;
use crate::device::SimDevice;
use crate::service::logic::{DefaultLogic, RequestCtx, ServiceLogic};
use crate::service::sim::SimLogic;
use crate::service::{Request, Response, ServiceError, Serviced};

/// Offer a request to the role logic, falling through to the injected
/// fallback when declined; yields `Option<T>`
macro_rules! offer {
    ($self:ident, $dev:expr, $method:ident ( $($arg:expr),* )) => {
        match $self.logic.$method($dev, $($arg),*).await? {
            Serviced::Handled(v) => Some(v),
            Serviced::NoResponse => None,
            Serviced::Declined => match $self.fallback.$method($dev, $($arg),*).await? {
                Serviced::Handled(v) => Some(v),
                Serviced::NoResponse | Serviced::Declined => None,
            },
        }
    };
}

/// A simulated endpoint wired to its dispatcher
pub struct Endpoint {
    name: String,
    address: DeviceAddress,
    device: Mutex<SimDevice>,
    logic: Arc<dyn ServiceLogic>,
    fallback: Arc<dyn ServiceLogic>,
}

impl Endpoint {
    /// Endpoint with the standard simulated-role logic over the default
    /// fallback
    pub fn new(name: impl Into<String>, device: SimDevice) -> Arc<Self> {
        let fallback: Arc<dyn ServiceLogic> = Arc::new(DefaultLogic::new());
        let logic = Arc::new(SimLogic::new(fallback.clone()));
        Self::with_logic(name, device, logic, fallback)
    }

    /// Endpoint with explicit logic and fallback strategies
    pub fn with_logic(
        name: impl Into<String>,
        device: SimDevice,
        logic: Arc<dyn ServiceLogic>,
        fallback: Arc<dyn ServiceLogic>,
    ) -> Arc<Self> {
        let address = device.state().address;
        Arc::new(Self {
            name: name.into(),
            address,
            device: Mutex::new(device),
            logic,
            fallback,
        })
    }

    /// Endpoint name, for operator output
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus identity
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Exclusive access to the endpoint's device state
    pub async fn device(&self) -> MutexGuard<'_, SimDevice> {
        self.device.lock().await
    }

    /// Serve one inbound request.
    ///
    /// `Ok(None)` means "no answer", a declined read, a swallowed
    /// indication or a request kind that never answers. Malformed requests
    /// surface as [`ServiceError`]s instead.
    pub async fn dispatch(
        &self,
        req: Request,
        ctx: RequestCtx,
    ) -> Result<Option<Response>, ServiceError> {
        let mut dev = self.device.lock().await;
        let dev = &mut *dev;

        match req {
            Request::GroupRead { addr } => {
                let dp = match dev.datapoints().get(addr) {
                    Some(dp) => dp.clone(),
                    None => return Ok(None),
                };
                let value = offer!(self, dev, request_datapoint_value(&dp));
                match value {
                    Some(v) => Ok(Some(Response::GroupValue(dp.dpt.encode(&v)?))),
                    None => Ok(None),
                }
            }
            Request::GroupWrite { addr, data } => {
                let dp = match dev.datapoints().get(addr) {
                    Some(dp) => dp.clone(),
                    None => return Ok(None),
                };
                let value = dp.dpt.decode(&data)?;
                offer!(self, dev, update_datapoint_value(&dp, value.clone()));
                Ok(None)
            }
            Request::ParameterRead {
                object_type,
                pid,
                info,
            } => {
                let data = offer!(self, dev, read_parameter(object_type, pid, &info, &ctx));
                Ok(data.map(Response::Parameter))
            }
            Request::ParameterWrite {
                object_type,
                pid,
                info,
            } => {
                offer!(self, dev, write_parameter(object_type, pid, &info, &ctx));
                Ok(None)
            }
            Request::AdcRead { channel, reads } => {
                let reading = offer!(self, dev, read_adc(channel, reads));
                Ok(reading.map(Response::Adc))
            }
            Request::Authorize { key } => {
                let level = offer!(self, dev, authorize(key));
                Ok(level.map(Response::Access))
            }
            Request::Restart {
                master_reset,
                erase,
                channel,
            } => {
                let time = offer!(self, dev, restart(master_reset, erase, channel));
                Ok(time.map(Response::RestartTime))
            }
            Request::FuncPropCommand {
                object_index,
                pid,
                data,
            } => {
                let result = offer!(self, dev, function_property_command(object_index, pid, &data));
                Ok(result.map(Response::FuncProp))
            }
            Request::FuncPropStateRead {
                object_index,
                pid,
                data,
            } => {
                let result =
                    offer!(self, dev, read_function_property_state(object_index, pid, &data));
                Ok(result.map(Response::FuncProp))
            }
            Request::Management { svc_type, asdu } => {
                let data = offer!(self, dev, management(svc_type, &asdu, &ctx));
                Ok(data.map(Response::Management))
            }
        }
    }
}
