//! Shared test doubles: a scriptable transport stub and a fallback logic
//! wrapper that records which methods a dispatcher delegated to it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::addr::{BusAddress, DeviceAddress};
use crate::datapoint::Datapoint;
use crate::device::SimDevice;
use crate::service::logic::{DefaultLogic, RequestCtx, ServiceLogic};
use crate::service::{EraseCode, FuncPropResponse, Request, Response, ServiceError, Serviced};
use crate::transport::{BusTransport, Medium, TransportError};

/// Transport stub answering (or timing out) every confirmed request
pub(crate) struct StubTransport {
    answer: bool,
    pub(crate) requests: Mutex<Vec<(DeviceAddress, Request)>>,
}

impl StubTransport {
    pub(crate) fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BusTransport for StubTransport {
    async fn send(&self, dst: DeviceAddress, req: Request) -> Result<(), TransportError> {
        self.requests.lock().unwrap().push((dst, req));
        Ok(())
    }

    async fn request(
        &self,
        dst: DeviceAddress,
        req: Request,
    ) -> Result<Option<Response>, TransportError> {
        self.requests.lock().unwrap().push((dst, req));
        if self.answer {
            Ok(Some(Response::Management(Bytes::new())))
        } else {
            Err(TransportError::Timeout(dst))
        }
    }

    async fn group_write(&self, _addr: BusAddress, _data: Bytes) -> Result<(), TransportError> {
        Ok(())
    }

    async fn group_read(&self, addr: BusAddress) -> Result<Bytes, TransportError> {
        Err(TransportError::NoData(addr))
    }

    async fn system_parameter_read(
        &self,
        object_type: u16,
        pid: u8,
        operand: u8,
    ) -> Result<Bytes, TransportError> {
        // broadcasts have no destination; recorded under the all-ones address
        self.requests.lock().unwrap().push((
            DeviceAddress::from_raw(0xffff),
            Request::ParameterRead {
                object_type,
                pid,
                info: Bytes::copy_from_slice(&[operand]),
            },
        ));
        Err(TransportError::NoAnswer { object_type, pid })
    }

    fn medium(&self) -> Medium {
        Medium::Tp
    }
}

/// Request context over a fresh transport stub
pub(crate) fn test_ctx(broadcast: bool) -> RequestCtx {
    RequestCtx {
        broadcast,
        transport: StubTransport::new(true),
    }
}

/// Fallback wrapper recording every method a dispatcher delegates to it
pub(crate) struct RecordingLogic {
    inner: DefaultLogic,
    pub(crate) calls: Mutex<Vec<&'static str>>,
}

impl RecordingLogic {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: DefaultLogic::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, method: &'static str) {
        self.calls.lock().unwrap().push(method);
    }
}

#[async_trait]
impl ServiceLogic for RecordingLogic {
    async fn request_datapoint_value(
        &self,
        dev: &SimDevice,
        dp: &Datapoint,
    ) -> Result<Serviced<String>, ServiceError> {
        self.record("request_datapoint_value");
        self.inner.request_datapoint_value(dev, dp).await
    }

    async fn update_datapoint_value(
        &self,
        dev: &mut SimDevice,
        dp: &Datapoint,
        value: String,
    ) -> Result<Serviced<()>, ServiceError> {
        self.record("update_datapoint_value");
        self.inner.update_datapoint_value(dev, dp, value).await
    }

    async fn read_parameter(
        &self,
        dev: &SimDevice,
        object_type: u16,
        pid: u8,
        info: &[u8],
        ctx: &RequestCtx,
    ) -> Result<Serviced<Bytes>, ServiceError> {
        self.record("read_parameter");
        self.inner.read_parameter(dev, object_type, pid, info, ctx).await
    }

    async fn write_parameter(
        &self,
        dev: &SimDevice,
        object_type: u16,
        pid: u8,
        info: &[u8],
        ctx: &RequestCtx,
    ) -> Result<Serviced<()>, ServiceError> {
        self.record("write_parameter");
        self.inner.write_parameter(dev, object_type, pid, info, ctx).await
    }

    async fn read_adc(
        &self,
        dev: &SimDevice,
        channel: u8,
        reads: u8,
    ) -> Result<Serviced<i32>, ServiceError> {
        self.record("read_adc");
        self.inner.read_adc(dev, channel, reads).await
    }

    async fn authorize(&self, dev: &SimDevice, key: [u8; 4]) -> Result<Serviced<u8>, ServiceError> {
        self.record("authorize");
        self.inner.authorize(dev, key).await
    }

    async fn restart(
        &self,
        dev: &mut SimDevice,
        master_reset: bool,
        erase: EraseCode,
        channel: u8,
    ) -> Result<Serviced<Duration>, ServiceError> {
        self.record("restart");
        self.inner.restart(dev, master_reset, erase, channel).await
    }

    async fn function_property_command(
        &self,
        dev: &mut SimDevice,
        object_index: u8,
        pid: u8,
        data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        self.record("function_property_command");
        self.inner
            .function_property_command(dev, object_index, pid, data)
            .await
    }

    async fn read_function_property_state(
        &self,
        dev: &SimDevice,
        object_index: u8,
        pid: u8,
        data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        self.record("read_function_property_state");
        self.inner
            .read_function_property_state(dev, object_index, pid, data)
            .await
    }

    async fn management(
        &self,
        dev: &mut SimDevice,
        svc_type: u16,
        asdu: &[u8],
        ctx: &RequestCtx,
    ) -> Result<Serviced<Bytes>, ServiceError> {
        self.record("management");
        self.inner.management(dev, svc_type, asdu, ctx).await
    }
}
