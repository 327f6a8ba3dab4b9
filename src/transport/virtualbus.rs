//! In-memory virtual bus
//!
//! [`VirtualBus`] is the shared transport the test network runs on: a
//! registry of attached endpoints that routes confirmed and unconfirmed
//! point-to-point requests by device address, fans group traffic out to
//! every endpoint, and delivers system-wide parameter reads as broadcasts
//! (so responders apply their collision-avoidance jitter).
//!
//! Requests to absent devices behave like a silent bus: the caller waits
//! out the response timeout and gets a timeout error, never a fast failure.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::addr::{BusAddress, DeviceAddress};
use crate::endpoint::Endpoint;
use crate::service::logic::RequestCtx;
use crate::service::{Request, Response};
use crate::transport::{BusTransport, Medium, TransportError, RESPONSE_TIMEOUT};

/// The shared in-memory transport of the simulated network
pub struct VirtualBus {
    medium: Medium,
    response_timeout: Duration,
    endpoints: RwLock<HashMap<u16, Arc<Endpoint>>>,
    this: Weak<VirtualBus>,
}

impl VirtualBus {
    /// New bus with the default response timeout
    pub fn new(medium: Medium) -> Arc<Self> {
        Self::with_response_timeout(medium, RESPONSE_TIMEOUT)
    }

    /// New bus with an explicit response timeout
    pub fn with_response_timeout(medium: Medium, response_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            medium,
            response_timeout,
            endpoints: RwLock::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// Attach an endpoint under its device address
    pub async fn attach(&self, endpoint: Arc<Endpoint>) -> Result<(), TransportError> {
        let mut endpoints = self.endpoints.write().await;
        let key = endpoint.address().raw();
        if endpoints.contains_key(&key) {
            return Err(TransportError::AddressInUse(endpoint.address()));
        }
        log::info!("attached {} as {}", endpoint.name(), endpoint.address());
        endpoints.insert(key, endpoint);
        Ok(())
    }

    /// Endpoint attached under the given address
    pub async fn endpoint(&self, addr: DeviceAddress) -> Option<Arc<Endpoint>> {
        self.endpoints.read().await.get(&addr.raw()).cloned()
    }

    /// Snapshot of all attached endpoints, in address order
    pub async fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        let mut all: Vec<_> = self.endpoints.read().await.values().cloned().collect();
        all.sort_by_key(|e| e.address().raw());
        all
    }

    fn ctx(&self, broadcast: bool) -> Result<RequestCtx, TransportError> {
        let transport = self.this.upgrade().ok_or(TransportError::Closed)?;
        Ok(RequestCtx {
            broadcast,
            transport,
        })
    }
}

#[async_trait]
impl BusTransport for VirtualBus {
    async fn send(&self, dst: DeviceAddress, req: Request) -> Result<(), TransportError> {
        let endpoint = match self.endpoint(dst).await {
            Some(ep) => ep,
            None => {
                log::debug!("send to absent device {} dropped", dst);
                return Ok(());
            }
        };
        endpoint.dispatch(req, self.ctx(false)?).await?;
        Ok(())
    }

    async fn request(
        &self,
        dst: DeviceAddress,
        req: Request,
    ) -> Result<Option<Response>, TransportError> {
        let endpoint = match self.endpoint(dst).await {
            Some(ep) => ep,
            None => {
                // silent bus: nobody answers until the timeout runs out
                tokio::time::sleep(self.response_timeout).await;
                return Err(TransportError::Timeout(dst));
            }
        };
        let ctx = self.ctx(false)?;
        match tokio::time::timeout(self.response_timeout, endpoint.dispatch(req, ctx)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout(dst)),
        }
    }

    async fn group_write(&self, addr: BusAddress, data: Bytes) -> Result<(), TransportError> {
        let ctx = self.ctx(false)?;
        for endpoint in self.endpoints().await {
            let req = Request::GroupWrite {
                addr,
                data: data.clone(),
            };
            if let Err(e) = endpoint.dispatch(req, ctx.clone()).await {
                log::warn!("{}: group write {} failed: {}", endpoint.address(), addr, e);
            }
        }
        Ok(())
    }

    async fn group_read(&self, addr: BusAddress) -> Result<Bytes, TransportError> {
        let ctx = self.ctx(false)?;
        for endpoint in self.endpoints().await {
            match endpoint.dispatch(Request::GroupRead { addr }, ctx.clone()).await {
                Ok(Some(Response::GroupValue(data))) => return Ok(data),
                Ok(_) => {}
                Err(e) => {
                    log::warn!("{}: group read {} failed: {}", endpoint.address(), addr, e);
                }
            }
        }
        Err(TransportError::NoData(addr))
    }

    async fn system_parameter_read(
        &self,
        object_type: u16,
        pid: u8,
        operand: u8,
    ) -> Result<Bytes, TransportError> {
        let ctx = self.ctx(true)?;
        for endpoint in self.endpoints().await {
            let req = Request::ParameterRead {
                object_type,
                pid,
                info: Bytes::copy_from_slice(&[operand]),
            };
            match endpoint.dispatch(req, ctx.clone()).await {
                Ok(Some(Response::Parameter(data))) => return Ok(data),
                Ok(_) => {}
                Err(e) => {
                    log::warn!(
                        "{}: system parameter read failed: {}",
                        endpoint.address(),
                        e
                    );
                }
            }
        }
        // nobody answered; wait out the response window like a real bus
        tokio::time::sleep(self.response_timeout).await;
        Err(TransportError::NoAnswer { object_type, pid })
    }

    fn medium(&self) -> Medium {
        self.medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::{NetDefaults, SimDevice, RESPONDER_DEVICE};
    use crate::dpt::DptId;
    use crate::service::sim::SYSTEM_STATE_PARAM;

    fn bus() -> Arc<VirtualBus> {
        VirtualBus::with_response_timeout(Medium::Tp, Duration::from_millis(20))
    }

    async fn attach_device(bus: &VirtualBus, address: DeviceAddress) -> Arc<Endpoint> {
        let device = SimDevice::new(address, Medium::Tp, &NetDefaults::default()).unwrap();
        let endpoint = Endpoint::new(format!("Device-{}", address.device()), device);
        bus.attach(endpoint.clone()).await.unwrap();
        endpoint
    }

    #[tokio::test]
    async fn test_attach_rejects_duplicate_address() {
        let bus = bus();
        attach_device(&bus, RESPONDER_DEVICE).await;
        let device = SimDevice::new(RESPONDER_DEVICE, Medium::Tp, &NetDefaults::default()).unwrap();
        let duplicate = Endpoint::new("dup", device);
        assert!(matches!(
            bus.attach(duplicate).await,
            Err(TransportError::AddressInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_request_to_absent_device_times_out() {
        let bus = bus();
        let result = bus
            .request(DeviceAddress::new(9, 9, 9), Request::AdcRead { channel: 1, reads: 1 })
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_group_write_reaches_every_endpoint() {
        let bus = bus();
        let a = attach_device(&bus, DeviceAddress::new(1, 1, 1)).await;
        let b = attach_device(&bus, RESPONDER_DEVICE).await;

        let addr: BusAddress = "1/0/4".parse().unwrap();
        let data = DptId::Count16.encode("77").unwrap();
        bus.group_write(addr, data).await.unwrap();

        assert_eq!(a.device().await.datapoints().read(addr).unwrap(), "77");
        assert_eq!(b.device().await.datapoints().read(addr).unwrap(), "77");
    }

    #[tokio::test]
    async fn test_group_read_answered_by_responder_only() {
        let bus = bus();
        attach_device(&bus, DeviceAddress::new(1, 1, 1)).await;
        let addr: BusAddress = "1/0/5".parse().unwrap();

        // no responder on the bus yet
        assert!(matches!(
            bus.group_read(addr).await,
            Err(TransportError::NoData(_))
        ));

        attach_device(&bus, RESPONDER_DEVICE).await;
        let data = bus.group_read(addr).await.unwrap();
        assert_eq!(DptId::Text.decode(&data).unwrap(), "Hello bus!");
    }

    #[tokio::test]
    async fn test_system_parameter_read_is_broadcast() {
        let bus = bus();
        attach_device(&bus, RESPONDER_DEVICE).await;

        // the system-state parameter answers network-wide questions
        let data = bus
            .system_parameter_read(0, SYSTEM_STATE_PARAM, 1)
            .await
            .unwrap();
        assert_eq!(data.as_ref(), &[0x0a]);

        // anything else runs into the silent-bus timeout
        let result = bus.system_parameter_read(0, 40, 1).await;
        assert!(matches!(result, Err(TransportError::NoAnswer { pid: 40, .. })));
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let bus = bus();
        attach_device(&bus, RESPONDER_DEVICE).await;
        let response = bus
            .request(RESPONDER_DEVICE, Request::AdcRead { channel: 2, reads: 1 })
            .await
            .unwrap();
        assert_eq!(response, Some(Response::Adc(0x100)));
    }
}
