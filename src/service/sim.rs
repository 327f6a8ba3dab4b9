//! Simulated endpoint behavior
//!
//! [`SimLogic`] encodes the protocol corners the surrounding conformance
//! tests rely on: responder-gated datapoint reads, the system-state
//! parameter with its broadcast jitter, the link-procedure trigger, a fixed
//! ADC reading, key authorization, the restart side effect of the
//! programmable identity, operation-mode function properties and two
//! deliberately swallowed management service types. Everything else falls
//! through to the injected fallback, keeping the endpoint aligned with the
//! platform's baseline behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;

use crate::addr::{BusAddress, DeviceAddress};
use crate::datapoint::Datapoint;
use crate::device::{SimDevice, PROGRAMMABLE_DEVICE};
use crate::object::{pid, ObjectType};
use crate::service::link::LinkProcedure;
use crate::service::logic::{RequestCtx, ServiceLogic};
use crate::service::{svc, EraseCode, FuncPropResponse, ReturnCode, ServiceError, Serviced};

/// The one key that authorizes successfully
pub const VALID_KEY: [u8; 4] = [0x10, 0x20, 0x30, 0x40];

/// Access level granted for the valid key
pub const VALID_ACCESS_LEVEL: u8 = 2;

/// Parameter id of the system-state parameter on the device object
pub const SYSTEM_STATE_PARAM: u8 = 59;

/// Fixed system-state reply
pub const SYSTEM_STATE_VALUE: u8 = 0x0a;

/// Fixed reading of every simulated analog channel
pub const ADC_READING: i32 = 0x100;

/// Peer the link procedure negotiates with
pub const LINK_PEER: DeviceAddress = DeviceAddress::from_raw(1);

/// Device code announced during the link procedure
pub const LINK_DEVICE_CODE: u16 = 0xbeef;

/// Channel code: switching on/off
pub const CC_SWITCH_ONOFF: u8 = 1;

/// Channel code: dimming control
pub const CC_DIMMING_CTRL: u8 = 5;

/// Behavior of one simulated test-network endpoint
pub struct SimLogic {
    fallback: Arc<dyn ServiceLogic>,
}

impl SimLogic {
    /// New logic delegating declined requests to `fallback`
    pub fn new(fallback: Arc<dyn ServiceLogic>) -> Self {
        Self { fallback }
    }

    /// Whether the addressed property is the operation mode of the
    /// application program object
    fn is_operation_mode(dev: &SimDevice, object_index: u8, pid_: u8) -> bool {
        pid_ == pid::OPERATION_MODE
            && dev
                .objects()
                .object(object_index as usize)
                .map(|o| o.object_type() == ObjectType::ApplicationProgram)
                .unwrap_or(false)
    }
}

#[async_trait]
impl ServiceLogic for SimLogic {
    async fn request_datapoint_value(
        &self,
        dev: &SimDevice,
        dp: &Datapoint,
    ) -> Result<Serviced<String>, ServiceError> {
        if !dev.is_responder(dp.address) {
            return Ok(Serviced::Declined);
        }
        let value = dev.datapoints().read(dp.address)?;
        Ok(Serviced::Handled(value.to_string()))
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
        pid_: u8,
        _info: &[u8],
        ctx: &RequestCtx,
    ) -> Result<Serviced<Bytes>, ServiceError> {
        if object_type != 0 || pid_ != SYSTEM_STATE_PARAM {
            return Ok(Serviced::Declined);
        }
        // collision-avoidance jitter applies to broadcast questions only
        let wait = if ctx.broadcast {
            rand::thread_rng().gen_range(0..10 * ctx.time_factor_ms().max(1))
        } else {
            0
        };
        log::debug!(
            "{}: add random wait time of {} ms before response",
            dev.state().address,
            wait
        );
        if wait > 0 {
            tokio::time::sleep(Duration::from_millis(wait.into())).await;
        }
        Ok(Serviced::Handled(Bytes::from_static(&[SYSTEM_STATE_VALUE])))
    }

    async fn write_parameter(
        &self,
        dev: &SimDevice,
        object_type: u16,
        pid_: u8,
        info: &[u8],
        ctx: &RequestCtx,
    ) -> Result<Serviced<()>, ServiceError> {
        if LinkProcedure::is_enter_config_mode(object_type, pid_, info) {
            let mut group_objects = HashMap::new();
            group_objects.insert(CC_SWITCH_ONOFF, BusAddress::new(7, 3, 10));
            group_objects.insert(CC_DIMMING_CTRL, BusAddress::new(7, 3, 11));

            let device = dev.state().address;
            let procedure =
                LinkProcedure::for_sensor(device, LINK_PEER, LINK_DEVICE_CODE, group_objects)
                    .on_result(move |flags, group_objects| {
                        log::info!(
                            "{}: link response: flags {:#x} and group objects {:?}",
                            device,
                            flags,
                            group_objects
                        );
                    });
            // fire and forget; the procedure outlives this request
            let _ = procedure.spawn(ctx.transport.clone());
        }
        Ok(Serviced::Handled(()))
    }

    async fn read_adc(
        &self,
        _dev: &SimDevice,
        _channel: u8,
        _reads: u8,
    ) -> Result<Serviced<i32>, ServiceError> {
        Ok(Serviced::Handled(ADC_READING))
    }

    async fn authorize(
        &self,
        _dev: &SimDevice,
        key: [u8; 4],
    ) -> Result<Serviced<u8>, ServiceError> {
        if key == VALID_KEY {
            return Ok(Serviced::Handled(VALID_ACCESS_LEVEL));
        }
        Ok(Serviced::Declined)
    }

    async fn restart(
        &self,
        dev: &mut SimDevice,
        master_reset: bool,
        erase: EraseCode,
        channel: u8,
    ) -> Result<Serviced<Duration>, ServiceError> {
        let result = self.fallback.restart(dev, master_reset, erase, channel).await?;
        if dev.state().address == PROGRAMMABLE_DEVICE {
            dev.state_mut().programming_mode = true;
        }
        Ok(result)
    }

    async fn function_property_command(
        &self,
        dev: &mut SimDevice,
        object_index: u8,
        pid_: u8,
        data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        if !Self::is_operation_mode(dev, object_index, pid_) {
            return Ok(Serviced::Declined);
        }
        let service_id = data.get(1).copied().unwrap_or(0);
        let shape_ok = matches!(data.len(), 2 | 3) && data[0] == 0;
        if !shape_ok {
            return Ok(Serviced::Handled(FuncPropResponse::error(
                ReturnCode::InvalidCommand,
                vec![service_id],
            )));
        }
        if data.len() == 2 {
            // short form queries the current state
            let mode = dev.state().operation_mode;
            return Ok(Serviced::Handled(FuncPropResponse::success(vec![
                service_id, mode,
            ])));
        }
        let mode = data[2];
        if mode > 1 {
            return Ok(Serviced::Handled(FuncPropResponse::error(
                ReturnCode::InvalidCommand,
                vec![service_id],
            )));
        }
        dev.state_mut().operation_mode = mode;
        Ok(Serviced::Handled(FuncPropResponse::success(vec![service_id])))
    }

    async fn read_function_property_state(
        &self,
        dev: &SimDevice,
        object_index: u8,
        pid_: u8,
        data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        if !Self::is_operation_mode(dev, object_index, pid_) {
            return Ok(Serviced::Declined);
        }
        let service_id = data.get(1).copied().unwrap_or(0);
        if data.len() != 2 || data[0] != 0 {
            return Ok(Serviced::Handled(FuncPropResponse::error(
                ReturnCode::InvalidCommand,
                vec![service_id],
            )));
        }
        let mode = dev.state().operation_mode;
        Ok(Serviced::Handled(FuncPropResponse::success(vec![
            service_id, mode,
        ])))
    }

    async fn management(
        &self,
        _dev: &mut SimDevice,
        svc_type: u16,
        _asdu: &[u8],
        _ctx: &RequestCtx,
    ) -> Result<Serviced<Bytes>, ServiceError> {
        // these two would otherwise be forwarded a second time by the
        // generic management layer
        if svc_type == svc::NETWORK_PARAM_RESPONSE || svc_type == svc::SYSTEM_NETWORK_PARAM_RESPONSE
        {
            return Ok(Serviced::NoResponse);
        }
        Ok(Serviced::Declined)
    }
}
