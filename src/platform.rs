//! Bootstrap platform glue
//!
//! The surrounding platform owns server construction and configuration; the
//! simulator core only consumes a narrow surface of it: the shared subnet
//! link, the list of subnet connectors, and a nullable accessor for the
//! gateway endpoint carrying the bus-wide router and message-server
//! objects. [`Platform::launch`] stands in for that bootstrap and wires a
//! gateway onto a fresh virtual bus.

use std::sync::Arc;

use async_trait::async_trait;

use crate::device::{NetDefaults, SetupError, SimDevice, GATEWAY_DEVICE};
use crate::endpoint::Endpoint;
use crate::object::{pid, Description, ObjectType};
use crate::service::logic::{DefaultLogic, ServiceLogic};
use crate::service::{FuncPropResponse, ReturnCode, ServiceError, Serviced};
use crate::transport::virtualbus::VirtualBus;
use crate::transport::Medium;

/// One subnet attachment of the gateway
#[derive(Clone)]
pub struct SubnetConnector {
    name: String,
    link: Arc<VirtualBus>,
}

impl SubnetConnector {
    /// Connector name, for operator output
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The subnet link endpoints are created on
    pub fn subnet_link(&self) -> Arc<VirtualBus> {
        self.link.clone()
    }
}

/// Router and message-server behavior of the gateway
///
/// Handles the system-broadcast control function property on the router
/// object; everything else falls through to the default logic.
pub struct GatewayLogic;

impl GatewayLogic {
    fn is_sbc_control(dev: &SimDevice, object_index: u8, pid_: u8) -> bool {
        pid_ == pid::SBC_CONTROL
            && dev
                .objects()
                .object(object_index as usize)
                .map(|o| o.object_type() == ObjectType::Router)
                .unwrap_or(false)
    }
}

#[async_trait]
impl ServiceLogic for GatewayLogic {
    async fn function_property_command(
        &self,
        dev: &mut SimDevice,
        object_index: u8,
        pid_: u8,
        data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        if !Self::is_sbc_control(dev, object_index, pid_) {
            return Ok(Serviced::Declined);
        }
        let service_id = data.get(1).copied().unwrap_or(0);
        let mode = match data {
            [0, _, mode @ 0..=1] => *mode,
            _ => {
                return Ok(Serviced::Handled(FuncPropResponse::error(
                    ReturnCode::InvalidCommand,
                    vec![service_id],
                )))
            }
        };
        dev.objects_mut()
            .set_property_at(object_index as usize, pid::SBC_CONTROL, 1, 1, &[mode])?;
        log::info!(
            "gateway: system broadcast mode {}",
            if mode == 1 { "enabled" } else { "disabled" }
        );
        Ok(Serviced::Handled(FuncPropResponse::success(vec![service_id])))
    }

    async fn read_function_property_state(
        &self,
        dev: &SimDevice,
        object_index: u8,
        pid_: u8,
        data: &[u8],
    ) -> Result<Serviced<FuncPropResponse>, ServiceError> {
        if !Self::is_sbc_control(dev, object_index, pid_) {
            return Ok(Serviced::Declined);
        }
        let service_id = data.get(1).copied().unwrap_or(0);
        let mode = dev
            .objects()
            .get_property_at(object_index as usize, pid::SBC_CONTROL, 1, 1)?;
        Ok(Serviced::Handled(FuncPropResponse::success(vec![
            service_id, mode[0],
        ])))
    }
}

/// The consumed bootstrap surface: subnet link, connectors and gateway
pub struct Platform {
    connectors: Vec<SubnetConnector>,
    gateway: Option<Arc<Endpoint>>,
}

impl Platform {
    /// Construct the platform: one virtual subnet with the gateway attached.
    ///
    /// A gateway that fails to come up leaves the accessor empty rather than
    /// failing the launch; callers decide whether that is fatal.
    pub async fn launch(medium: Medium, net: &NetDefaults) -> Self {
        let bus = VirtualBus::new(medium);
        let gateway = match Self::gateway_endpoint(medium, net) {
            Ok(gateway) => match bus.attach(gateway.clone()).await {
                Ok(()) => Some(gateway),
                Err(e) => {
                    log::error!("gateway attach failed: {}", e);
                    None
                }
            },
            Err(e) => {
                log::error!("gateway setup failed: {}", e);
                None
            }
        };

        Self {
            connectors: vec![SubnetConnector {
                name: "virtual subnet 1".to_string(),
                link: bus,
            }],
            gateway,
        }
    }

    /// Platform whose gateway failed to come up
    #[cfg(test)]
    pub(crate) fn without_gateway(medium: Medium) -> Self {
        Self {
            connectors: vec![SubnetConnector {
                name: "virtual subnet 1".to_string(),
                link: VirtualBus::new(medium),
            }],
            gateway: None,
        }
    }

    /// Subnet connectors of the gateway
    pub fn subnet_connectors(&self) -> &[SubnetConnector] {
        &self.connectors
    }

    /// The currently active gateway; absence is a fatal startup condition
    /// for the driver
    pub fn gateway(&self) -> Option<Arc<Endpoint>> {
        self.gateway.clone()
    }

    fn gateway_endpoint(medium: Medium, net: &NetDefaults) -> Result<Arc<Endpoint>, SetupError> {
        let mut device = SimDevice::bare(GATEWAY_DEVICE, medium);
        let serial = device.state().serial;
        let objects = device.objects_mut();
        objects.add_object(ObjectType::Device)?;
        let router = objects.add_object(ObjectType::Router)?;
        objects.add_object(ObjectType::CemiServer)?;
        objects.add_object(ObjectType::NetParameter)?;

        objects.set_description(
            router,
            Description::new(pid::SBC_CONTROL, 3, true, 1),
            true,
        )?;
        objects.set_property_at(router, pid::SBC_CONTROL, 1, 1, &[0])?;
        objects.set_property_at(0, pid::SERIAL_NUMBER, 1, 1, &serial)?;
        objects.set_property(
            ObjectType::NetParameter,
            1,
            pid::net::SETUP_MULTICAST,
            1,
            1,
            &net.setup_multicast.octets(),
        )?;

        let fallback: Arc<dyn ServiceLogic> = Arc::new(DefaultLogic::new());
        Ok(Endpoint::with_logic(
            "gateway",
            device,
            Arc::new(GatewayLogic),
            fallback,
        ))
    }
}
