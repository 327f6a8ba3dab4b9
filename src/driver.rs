//! Network driver
//!
//! [`NetworkDriver`] orchestrates the simulated network: it launches the
//! bootstrap platform, creates the programmable and responder endpoints on
//! the shared subnet link, and then runs a periodic traffic loop, toggling
//! a boolean datapoint, stepping a scaled counter, and exercising the
//! system-broadcast sequence against the gateway's router object.
//!
//! The broadcast-mode enable/disable pair is managed by
//! [`with_system_broadcast`]: enabling acquires, the batch runs, and the
//! disable command is sent on every exit path, so the gateway is never left
//! in system-broadcast mode by a failing batch.
//!
//! Operator commands arrive on standard input: `exit` ends the loop, `stat`
//! prints the orchestration status, anything else is ignored. An idle
//! timeout re-polls without blocking, so traffic keeps flowing with no
//! operator attached.

use std::future::Future;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::addr::{BusAddress, DeviceAddress};
use crate::device::{
    NetDefaults, SetupError, SimDevice, GATEWAY_DEVICE, PROGRAMMABLE_DEVICE, RESPONDER_DEVICE,
};
use crate::dpt::{DptError, DptId};
use crate::endpoint::Endpoint;
use crate::object::{pid, ObjectType};
use crate::platform::Platform;
use crate::service::Request;
use crate::transport::virtualbus::VirtualBus;
use crate::transport::{BusTransport, Medium, TransportError};

/// Loop interval of the read/write traffic keeping the network "live"
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Datapoint toggled by the traffic generator
const TRAFFIC_SWITCH: BusAddress = BusAddress::new(1, 0, 1);

/// Datapoint carrying the cyclic counter
const TRAFFIC_COUNTER: BusAddress = BusAddress::new(1, 0, 3);

/// Driver configuration, resolved once at process start
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Medium of the virtual subnet
    pub medium: Medium,
    /// Interval between traffic ticks
    pub update_interval: Duration,
    /// Whether the read/write traffic generator runs
    pub generate_traffic: bool,
    /// Whether each tick runs the system-broadcast sequence
    pub system_broadcasts: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            medium: Medium::Tp,
            update_interval: UPDATE_INTERVAL,
            generate_traffic: true,
            system_broadcasts: true,
        }
    }
}

/// Driver failures; these abort the driver rather than one operation
#[derive(Debug, Error)]
pub enum DriverError {
    /// The platform came up without a gateway
    #[error("gateway not started")]
    GatewayUnavailable,

    /// The platform offers no subnet to attach endpoints to
    #[error("no subnet connector available")]
    NoSubnet,

    /// Endpoint construction failed
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// The shared link rejected an operation during bootstrap
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Traffic value translation failed
    #[error(transparent)]
    Value(#[from] DptError),
}

/// Orchestrates endpoints, synthetic traffic and the broadcast sequence
pub struct NetworkDriver {
    config: DriverConfig,
    link: Arc<VirtualBus>,
    gateway: Arc<Endpoint>,
    router_object_index: u8,
    started_at: DateTime<Local>,
    ticks: u64,
    toggle: bool,
    counter: u8,
}

impl NetworkDriver {
    /// Launch the platform and build the simulated network on top of it
    pub async fn bootstrap(config: DriverConfig) -> Result<Self, DriverError> {
        let net = NetDefaults::resolve();
        let platform = Platform::launch(config.medium, &net).await;
        Self::from_platform(platform, config, &net).await
    }

    /// Build the network on an already-launched platform.
    ///
    /// Fails when the platform has no gateway or no subnet; both are fatal
    /// startup conditions.
    pub async fn from_platform(
        platform: Platform,
        config: DriverConfig,
        net: &NetDefaults,
    ) -> Result<Self, DriverError> {
        let gateway = platform.gateway().ok_or(DriverError::GatewayUnavailable)?;
        let link = platform
            .subnet_connectors()
            .first()
            .ok_or(DriverError::NoSubnet)?
            .subnet_link();

        Self::create_device(&link, PROGRAMMABLE_DEVICE, config.medium, net).await?;
        Self::create_device(&link, RESPONDER_DEVICE, config.medium, net).await?;

        let router_object_index = gateway
            .device()
            .await
            .objects()
            .lookup(ObjectType::Router, 1)
            .map(|o| o.index() as u8)
            .ok_or(DriverError::GatewayUnavailable)?;

        // message-server properties checked by mode-switch testing
        {
            let mut dev = gateway.device().await;
            let objects = dev.objects_mut();
            for (pid_, value) in [(pid::SERVER_SUPPORT, 1u8), (pid::COMM_MODE, 0)] {
                if let Err(e) =
                    objects.set_property(ObjectType::CemiServer, 1, pid_, 1, 1, &[value])
                {
                    log::warn!("gateway mode property {}: {}", pid_, e);
                }
            }
        }

        Ok(Self {
            config,
            link,
            gateway,
            router_object_index,
            started_at: Local::now(),
            ticks: 0,
            toggle: true,
            counter: 13,
        })
    }

    async fn create_device(
        link: &Arc<VirtualBus>,
        address: DeviceAddress,
        medium: Medium,
        net: &NetDefaults,
    ) -> Result<Arc<Endpoint>, DriverError> {
        let device = SimDevice::new(address, medium, net)?;
        let endpoint = Endpoint::new(format!("Device-{}", address.device()), device);
        link.attach(endpoint.clone()).await?;
        Ok(endpoint)
    }

    /// Run the console loop until `exit` or end of input
    pub async fn run(&mut self) -> Result<(), DriverError> {
        println!("Test network is up and running");

        let mut lines = spawn_stdin_reader();
        loop {
            match tokio::time::timeout(self.config.update_interval, lines.recv()).await {
                Ok(Some(line)) => match line.as_str() {
                    "exit" => break,
                    "stat" => println!("{}", self.status().await),
                    // other non-empty input is ignored
                    _ => {}
                },
                // stdin closed; keep only the idle traffic running would
                // leave no way to stop the driver, so treat it like exit
                Ok(None) => break,
                // idle timeout: fall through to the traffic tick
                Err(_) => {}
            }
            self.tick().await;
        }
        Ok(())
    }

    /// One traffic round: toggle, count, read back, broadcast sequence.
    ///
    /// Transport failures are reported per operation and never stop the
    /// loop.
    pub async fn tick(&mut self) {
        self.ticks += 1;

        if self.config.generate_traffic {
            self.toggle = !self.toggle;
            let value = if self.toggle { "true" } else { "false" };
            if let Err(e) = self.write_read(TRAFFIC_SWITCH, DptId::Bool, value).await {
                log::warn!("traffic on {}: {}", TRAFFIC_SWITCH, e);
            }

            self.counter = (self.counter + 1) % 101;
            let value = self.counter.to_string();
            if let Err(e) = self.write_read(TRAFFIC_COUNTER, DptId::Scaling, &value).await {
                log::warn!("traffic on {}: {}", TRAFFIC_COUNTER, e);
            }
        }

        if self.config.system_broadcasts {
            send_system_broadcasts(self.link.as_ref(), self.router_object_index).await;
        }
    }

    async fn write_read(
        &self,
        addr: BusAddress,
        dpt: DptId,
        value: &str,
    ) -> Result<(), DriverError> {
        self.link.group_write(addr, dpt.encode(value)?).await?;
        let back = self.link.group_read(addr).await?;
        log::debug!("{} reads back as {}", addr, dpt.decode(&back)?);
        Ok(())
    }

    /// Human-readable orchestration status for the `stat` command
    pub async fn status(&self) -> String {
        let uptime = Local::now().signed_duration_since(self.started_at);
        let sbc = {
            let dev = self.gateway.device().await;
            match dev
                .objects()
                .get_property_at(self.router_object_index as usize, pid::SBC_CONTROL, 1, 1)
            {
                Ok(data) if data.first() == Some(&1) => "enabled",
                Ok(_) => "disabled",
                Err(_) => "unknown",
            }
        };
        let mut out = format!(
            "gateway {} up since {} ({} s), {} tick(s), system broadcast {}",
            self.gateway.address(),
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            uptime.num_seconds(),
            self.ticks,
            sbc,
        );
        for endpoint in self.link.endpoints().await {
            out.push_str(&format!("\n  {}  {}", endpoint.address(), endpoint.name()));
        }
        out
    }
}

/// Run `batch` with the gateway's system-broadcast mode enabled.
///
/// The enable command precedes the batch, the disable command follows it on
/// every exit path, and failures of either command are reported but never
/// break the pairing.
pub async fn with_system_broadcast<T, F, Fut>(
    bus: &dyn BusTransport,
    router_object_index: u8,
    batch: F,
) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    send_sbc_control(bus, router_object_index, 1).await;
    let result = batch().await;
    send_sbc_control(bus, router_object_index, 0).await;
    result
}

async fn send_sbc_control(bus: &dyn BusTransport, router_object_index: u8, mode: u8) {
    let req = Request::FuncPropCommand {
        object_index: router_object_index,
        pid: pid::SBC_CONTROL,
        data: Bytes::copy_from_slice(&[0, 0, mode]),
    };
    if let Err(e) = bus.send(GATEWAY_DEVICE, req).await {
        log::warn!("system broadcast control ({}) failed: {}", mode, e);
    }
}

/// The system-broadcast sequence: a batch of system-wide parameter reads
/// bracketed by the enable/disable pair.
///
/// Timeouts are expected, most questions have no answering device, and
/// are treated as "no answer", not as failures.
pub async fn send_system_broadcasts(bus: &dyn BusTransport, router_object_index: u8) {
    let batch = [
        // network-wide serial-number question
        (0u16, pid::SERIAL_NUMBER, 1u8),
        // the following are expected to be forwarded point-to-point
        (1, pid::SERIAL_NUMBER, 1),
        (0, 40, 1),
        (0, pid::SERIAL_NUMBER, 0),
    ];
    with_system_broadcast(bus, router_object_index, move || async move {
        for (object_type, pid_, operand) in batch {
            match bus.system_parameter_read(object_type, pid_, operand).await {
                Ok(data) => log::info!(
                    "system parameter (object type {}, pid {}): {:02x?}",
                    object_type,
                    pid_,
                    data.as_ref()
                ),
                Err(TransportError::NoAnswer { .. } | TransportError::Timeout(_)) => {
                    log::debug!("no answer for system parameter (object type {}, pid {})",
                        object_type, pid_);
                }
                Err(e) => log::warn!("system parameter read failed: {}", e),
            }
        }
    })
    .await;
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line.trim().to_string(),
                Err(_) => break,
            };
            if line.is_empty() {
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
