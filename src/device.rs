//! Simulated endpoint state and setup
//!
//! A [`SimDevice`] bundles everything one endpoint owns exclusively: its
//! [`EndpointState`], its interface-object store, its datapoint store with
//! value cache, its responder set and a small memory image. Construction
//! populates the fixed demonstration datapoint set and the interface-object
//! layout the surrounding test suites expect.
//!
//! Setup follows a partial-success discipline: failing to initialize one
//! optional property is logged and skipped so the endpoint stays usable and
//! inspectable; only object-list exhaustion and datapoint registration
//! conflicts abort construction.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::addr::{BusAddress, DeviceAddress};
use crate::datapoint::{Datapoint, DatapointError, DatapointStore};
use crate::dpt::DptId;
use crate::object::{pid, Description, ObjectStore, ObjectType, PropertyError};
use crate::transport::Medium;

/// Identity of the bus-wide gateway
pub const GATEWAY_DEVICE: DeviceAddress = DeviceAddress::new(1, 1, 0);
/// Endpoint that enters programming mode on restart
pub const PROGRAMMABLE_DEVICE: DeviceAddress = DeviceAddress::new(1, 1, 4);
/// Endpoint that answers datapoint read requests
pub const RESPONDER_DEVICE: DeviceAddress = DeviceAddress::new(1, 1, 5);

/// Default system-setup multicast group
pub const DEFAULT_SETUP_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

/// Size of the simulated device memory image
pub const MEMORY_SIZE: usize = 1000;

/// Device setup errors; everything here is fatal for construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// Object store rejected a mandatory operation
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// Datapoint registration failed
    #[error(transparent)]
    Datapoint(#[from] DatapointError),

    /// Memory access outside the image
    #[error("memory access out of range: offset {offset}, length {len}")]
    MemoryRange {
        /// Access offset
        offset: usize,
        /// Access length
        len: usize,
    },
}

/// Network-related defaults, resolved once at process start and passed into
/// every endpoint constructor
#[derive(Debug, Clone)]
pub struct NetDefaults {
    /// Hardware address stored in the net-parameter object; all-zero when
    /// no resolution is configured
    pub mac: [u8; 6],
    /// System-setup multicast group
    pub setup_multicast: Ipv4Addr,
    /// Local IPv4 address used for the IP-side parameter defaults
    pub local_ip: Ipv4Addr,
}

impl NetDefaults {
    /// Resolve the defaults from the host.
    ///
    /// The local address is taken from the first non-loopback IPv4
    /// interface; lookup failure falls back to the loopback address. The
    /// MAC stays at the documented all-zero default.
    pub fn resolve() -> Self {
        let local_ip = if_addrs::get_if_addrs()
            .ok()
            .and_then(|interfaces| {
                interfaces
                    .into_iter()
                    .filter(|i| !i.is_loopback())
                    .find_map(|i| match i.ip() {
                        std::net::IpAddr::V4(v4) => Some(v4),
                        std::net::IpAddr::V6(_) => None,
                    })
            })
            .unwrap_or(Ipv4Addr::LOCALHOST);
        Self {
            local_ip,
            ..Self::default()
        }
    }
}

impl Default for NetDefaults {
    fn default() -> Self {
        Self {
            mac: [0; 6],
            setup_multicast: DEFAULT_SETUP_MULTICAST,
            local_ip: Ipv4Addr::LOCALHOST,
        }
    }
}

/// Mutable per-endpoint identity and mode flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    /// Bus identity of the endpoint
    pub address: DeviceAddress,
    /// Serial number, last byte derived from the device number
    pub serial: [u8; 6],
    /// Programming mode flag, forced by restarts of the programmable device
    pub programming_mode: bool,
    /// Operation mode, set through function-property commands
    pub operation_mode: u8,
}

/// One simulated endpoint's exclusive state
#[derive(Debug)]
pub struct SimDevice {
    state: EndpointState,
    objects: ObjectStore,
    datapoints: DatapointStore,
    responders: HashSet<u16>,
    memory: Vec<u8>,
    medium: Medium,
}

impl SimDevice {
    /// Construct an endpoint with the demonstration datapoint set and the
    /// standard interface-object layout.
    ///
    /// The programmable identity starts in programming mode; the responder
    /// identity answers reads for its entire datapoint set.
    pub fn new(
        address: DeviceAddress,
        medium: Medium,
        net: &NetDefaults,
    ) -> Result<Self, SetupError> {
        let mut device = Self::bare(address, medium);

        for offset in 0..MEMORY_SIZE {
            device.write_memory(offset, &[offset as u8])?;
        }

        device.register_demo_datapoints()?;

        if address == PROGRAMMABLE_DEVICE {
            device.state.programming_mode = true;
        }
        if address == RESPONDER_DEVICE {
            device.responders = device.datapoints.iter().map(|d| d.address.raw()).collect();
        }

        device.create_objects(net)?;
        Ok(device)
    }

    /// Bare endpoint without datapoints or interface objects.
    ///
    /// Used for platform-supplied devices (the gateway) that populate their
    /// own object layout.
    pub fn bare(address: DeviceAddress, medium: Medium) -> Self {
        let mut serial = [0x01, 0x02, 0x03, 0x04, 0x05, 0x00];
        serial[5] = address.device().wrapping_add(1);
        Self {
            state: EndpointState {
                address,
                serial,
                programming_mode: false,
                operation_mode: 0,
            },
            objects: ObjectStore::new(),
            datapoints: DatapointStore::new(),
            responders: HashSet::new(),
            memory: vec![0; MEMORY_SIZE],
            medium,
        }
    }

    /// Endpoint state
    pub fn state(&self) -> &EndpointState {
        &self.state
    }

    /// Mutable endpoint state
    pub fn state_mut(&mut self) -> &mut EndpointState {
        &mut self.state
    }

    /// Interface-object store
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Mutable interface-object store
    pub fn objects_mut(&mut self) -> &mut ObjectStore {
        &mut self.objects
    }

    /// Datapoint store
    pub fn datapoints(&self) -> &DatapointStore {
        &self.datapoints
    }

    /// Mutable datapoint store
    pub fn datapoints_mut(&mut self) -> &mut DatapointStore {
        &mut self.datapoints
    }

    /// Whether the endpoint answers read requests for the given datapoint
    pub fn is_responder(&self, addr: BusAddress) -> bool {
        self.responders.contains(&addr.raw())
    }

    /// Medium the endpoint is attached to
    pub fn medium(&self) -> Medium {
        self.medium
    }

    /// Write into the device memory image
    pub fn write_memory(&mut self, offset: usize, data: &[u8]) -> Result<(), SetupError> {
        let end = offset + data.len();
        if end > self.memory.len() {
            return Err(SetupError::MemoryRange {
                offset,
                len: data.len(),
            });
        }
        self.memory[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Read from the device memory image
    pub fn read_memory(&self, offset: usize, len: usize) -> Result<&[u8], SetupError> {
        self.memory
            .get(offset..offset + len)
            .ok_or(SetupError::MemoryRange { offset, len })
    }

    fn register_demo_datapoints(&mut self) -> Result<(), SetupError> {
        let mut add = |address: BusAddress, name: Option<&str>, dpt: DptId, value: Option<&str>| {
            let dp = match name {
                Some(n) => Datapoint::new(address, n, dpt),
                None => Datapoint::unnamed(address, dpt),
            };
            self.datapoints.register(dp, value)
        };

        add(BusAddress::new(0, 0, 7), None, DptId::Switch, None)?;

        add(BusAddress::new(0, 1, 0), Some("input trigger"), DptId::Bool, None)?;
        add(BusAddress::new(0, 1, 1), Some("G1 switch"), DptId::Bool, None)?;
        add(BusAddress::new(0, 1, 2), Some("G2 switch"), DptId::Bool, None)?;
        add(BusAddress::new(0, 1, 10), Some("switching input G2"), DptId::Bool, None)?;

        add(BusAddress::new(1, 0, 1), Some("Bool"), DptId::Bool, None)?;
        add(BusAddress::new(1, 0, 11), Some("Bool 2"), DptId::Enable, None)?;
        add(BusAddress::new(1, 0, 111), Some("Bool 3"), DptId::Occupancy, None)?;
        add(BusAddress::new(1, 0, 2), None, DptId::ControlBlinds, None)?;
        add(BusAddress::new(1, 0, 3), None, DptId::Scaling, None)?;
        add(BusAddress::new(1, 0, 4), None, DptId::Count16, None)?;
        add(BusAddress::new(1, 0, 5), None, DptId::Text, Some("Hello bus!"))?;
        add(BusAddress::new(1, 0, 6), None, DptId::Float16, None)?;
        add(BusAddress::new(1, 0, 7), None, DptId::Float32, None)?;

        add(BusAddress::new(1, 0, 200), None, DptId::ColorTemp, None)?;
        add(BusAddress::new(1, 0, 205), None, DptId::RhccStatus, None)?;
        add(BusAddress::new(1, 0, 206), None, DptId::Media, None)?;
        Ok(())
    }

    /// One caught-and-logged setup step; failures leave the endpoint usable
    fn try_setup(&mut self, what: &str, f: impl FnOnce(&mut Self) -> Result<(), PropertyError>) {
        if let Err(e) = f(self) {
            log::warn!("{}: setup of {} failed: {}", self.state.address, what, e);
        }
    }

    fn create_objects(&mut self, net: &NetDefaults) -> Result<(), SetupError> {
        self.objects.add_object(ObjectType::Device)?;
        self.objects.add_object(ObjectType::AddressTable)?;
        self.objects.add_object(ObjectType::AssociationTable)?;
        self.objects.add_object(ObjectType::ApplicationProgram)?;
        self.objects.add_object(ObjectType::InterfaceProgram)?;

        self.try_setup("medium type", |s| {
            s.objects.set_description(
                0,
                Description::new(pid::MEDIUM_TYPE, 3, false, 1),
                true,
            )?;
            s.objects
                .set_property_at(0, pid::MEDIUM_TYPE, 1, 1, &[s.medium.code()])
        });

        // device control is checked by verify-mode tests, so it is writable
        self.try_setup("device control", |s| {
            s.objects.set_description(
                0,
                Description::new(pid::DEVICE_CONTROL, 3, true, 1),
                true,
            )?;
            s.objects.set_property_at(0, pid::DEVICE_CONTROL, 1, 1, &[0])
        });

        self.try_setup("serial number", |s| {
            let serial = s.state.serial;
            s.objects
                .set_property_at(0, pid::SERIAL_NUMBER, 1, 1, &serial)?;
            s.objects.set_description(
                0,
                Description::new(pid::SERIAL_NUMBER, 0, false, 1),
                true,
            )
        });

        if self.medium == Medium::Rf {
            let rf_index = self.objects.add_object(ObjectType::RfMedium)?;
            self.try_setup("rf multi type", |s| {
                s.objects.set_property_at(rf_index, pid::RF_MULTI_TYPE, 1, 1, &[0])
            });
        }

        self.objects.add_object(ObjectType::NetParameter)?;

        // object directory, recomputed to cover every object added above
        self.try_setup("object directory", |s| {
            let io_list = s.objects.io_list();
            let count = s.objects.len() as u16;
            s.objects
                .set_property_at(0, pid::IO_LIST, 1, count, &io_list)
        });

        self.set_program_data(2, 3);
        self.set_program_data(5, 5);
        self.try_setup("load states", |s| {
            s.objects
                .set_property_at(3, pid::LOAD_STATE_CONTROL, 1, 1, &[1])?;
            s.objects.set_property_at(4, pid::LOAD_STATE_CONTROL, 1, 1, &[4])
        });

        let net = net.clone();
        self.try_setup("net parameter object", move |s| {
            s.init_net_parameter_object(&net)
        });
        Ok(())
    }

    fn set_program_data(&mut self, index: usize, value: u8) {
        self.try_setup("program data", |s| {
            s.objects
                .set_property_at(index, pid::PROGRAM_VERSION, 1, 1, &[value; 5])?;
            s.objects
                .set_property_at(index, pid::LOAD_STATE_CONTROL, 1, 1, &[value])?;
            s.objects
                .set_property_at(index, pid::RUN_STATE_CONTROL, 1, 1, &[value])?;
            s.objects.set_property_at(index, pid::ERROR_CODE, 1, 1, &[8])
        });
    }

    fn init_net_parameter_object(&mut self, net: &NetDefaults) -> Result<(), PropertyError> {
        use pid::net as np;

        let t = ObjectType::NetParameter;
        let objects = &mut self.objects;

        // transmit counters start at zero
        objects.set_property(t, 1, np::MSG_TRANSMIT_TO_IP, 1, 1, &[0; 4])?;
        objects.set_property(t, 1, np::MSG_TRANSMIT_TO_BUS, 1, 1, &[0; 4])?;

        // discovery self-description: friendly name is a 30-character array
        let mut name = [0u8; 30];
        let friendly = b"Simulated Bus Device";
        name[..friendly.len()].copy_from_slice(friendly);
        objects.set_property(t, 1, np::FRIENDLY_NAME, 1, 30, &name)?;
        objects.set_property(t, 1, np::PROJECT_INSTALLATION_ID, 1, 1, &[0, 0])?;
        // not known before routing is configured, updated by the platform
        objects.set_property(t, 1, np::DEVICE_ADDRESS, 1, 1, &DeviceAddress::from_raw(0).to_bytes())?;
        objects.set_property(t, 1, np::MAC_ADDRESS, 1, 1, &net.mac)?;

        // routing multicast stays zero while no routing service is offered
        objects.set_property(t, 1, np::ROUTING_MULTICAST, 1, 1, &[0; 4])?;

        let current_ip = net.local_ip.octets();
        let mut configured_ip = current_ip;
        configured_ip[3] = configured_ip[3].wrapping_sub(1);
        objects.set_property(t, 1, np::CURRENT_IP_ADDRESS, 1, 1, &current_ip)?;
        objects.set_property(t, 1, np::IP_ADDRESS, 1, 1, &configured_ip)?;
        objects.set_property(t, 1, np::SUBNET_MASK, 1, 1, &[255, 255, 255, 0])?;
        objects.set_property(t, 1, np::DEFAULT_GATEWAY, 1, 1, &configured_ip)?;
        objects.set_property(t, 1, np::TTL, 1, 1, &[9])?;

        let index = objects
            .lookup(t, 1)
            .map(crate::object::InterfaceObject::index)
            .ok_or(PropertyError::InstanceNotFound {
                object_type: t,
                instance: 1,
            })?;
        objects.set_description(
            index,
            Description::new(np::ADDITIONAL_ADDRESSES, 0, true, 10),
            true,
        )?;
        for (element, device) in [(1u16, 5u8), (2, 6), (3, 7)] {
            let addr = DeviceAddress::new(1, 1, device);
            objects.set_property(t, 1, np::ADDITIONAL_ADDRESSES, element, 1, &addr.to_bytes())?;
        }

        objects.set_property(t, 1, np::SETUP_MULTICAST, 1, 1, &net.setup_multicast.octets())?;

        // capabilities: management, tunneling, diagnosis
        objects.set_property(t, 1, np::DEVICE_CAPABILITIES, 1, 1, &[0, 1 + 2 + 4])?;

        // left clear; the gateway or the operator owns these tasks
        objects.set_property(t, 1, np::ROUTING_CAPABILITIES, 1, 1, &[0])?;
        objects.set_property(t, 1, np::DEVICE_STATE, 1, 1, &[0])?;
        objects.set_property(t, 1, np::IP_CAPABILITIES, 1, 1, &[0])?;
        objects.set_property(t, 1, np::IP_ASSIGNMENT, 1, 1, &[1])?;
        objects.set_property(t, 1, np::CURRENT_IP_ASSIGNMENT, 1, 1, &[1])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(address: DeviceAddress) -> SimDevice {
        SimDevice::new(address, Medium::Tp, &NetDefaults::default()).unwrap()
    }

    #[test]
    fn test_demo_datapoint_set() {
        let dev = device(DeviceAddress::new(1, 1, 1));
        assert_eq!(dev.datapoints().len(), 17);
        let dp = dev.datapoints().get("1/0/3".parse().unwrap()).unwrap();
        assert_eq!(dp.dpt, DptId::Scaling);
        assert_eq!(
            dev.datapoints().read("1/0/5".parse().unwrap()).unwrap(),
            "Hello bus!"
        );
        // defaults seeded for everything else
        assert_eq!(dev.datapoints().read("1/0/4".parse().unwrap()).unwrap(), "0");
    }

    #[test]
    fn test_programmable_device_starts_in_programming_mode() {
        assert!(device(PROGRAMMABLE_DEVICE).state().programming_mode);
        assert!(!device(RESPONDER_DEVICE).state().programming_mode);
    }

    #[test]
    fn test_responder_set_covers_all_datapoints() {
        let responder = device(RESPONDER_DEVICE);
        for dp in responder.datapoints().iter() {
            assert!(responder.is_responder(dp.address));
        }
        let other = device(DeviceAddress::new(1, 1, 1));
        assert!(!other.is_responder("1/0/1".parse().unwrap()));
    }

    #[test]
    fn test_object_layout_and_directory() {
        let dev = device(DeviceAddress::new(1, 1, 1));
        let objects = dev.objects();
        assert_eq!(objects.object(0).unwrap().object_type(), ObjectType::Device);
        assert_eq!(objects.len(), 6);
        let io_list = objects.io_list();
        assert_eq!(io_list.len(), 2 * objects.len());
        assert_eq!(io_list.as_ref(), &[0, 0, 0, 1, 0, 2, 0, 3, 0, 4, 0, 11]);
        // the directory is also stored as a device-object property
        let stored = objects.get_property_at(0, pid::IO_LIST, 1, 6).unwrap();
        assert_eq!(stored, io_list);
    }

    #[test]
    fn test_rf_medium_gets_rf_object() {
        let dev =
            SimDevice::new(DeviceAddress::new(1, 1, 1), Medium::Rf, &NetDefaults::default())
                .unwrap();
        assert!(dev.objects().lookup(ObjectType::RfMedium, 1).is_some());
        let stored = dev
            .objects()
            .get_property_at(0, pid::MEDIUM_TYPE, 1, 1)
            .unwrap();
        assert_eq!(stored.as_ref(), &[Medium::Rf.code()]);
    }

    #[test]
    fn test_serial_number_derived_from_device() {
        let dev = device(DeviceAddress::new(1, 1, 4));
        let serial = dev
            .objects()
            .get_property_at(0, pid::SERIAL_NUMBER, 1, 1)
            .unwrap();
        assert_eq!(serial.as_ref(), &[1, 2, 3, 4, 5, 5]);
        assert_eq!(dev.state().serial, [1, 2, 3, 4, 5, 5]);
    }

    #[test]
    fn test_net_parameter_block() {
        let dev = device(DeviceAddress::new(1, 1, 1));
        let objects = dev.objects();
        let name = objects
            .get_property(ObjectType::NetParameter, 1, pid::net::FRIENDLY_NAME, 1, 30)
            .unwrap();
        assert_eq!(name.len(), 30);
        assert!(name.starts_with(b"Simulated Bus Device"));
        let extra = objects
            .get_property(ObjectType::NetParameter, 1, pid::net::ADDITIONAL_ADDRESSES, 1, 3)
            .unwrap();
        assert_eq!(extra.as_ref(), &[0x11, 0x05, 0x11, 0x06, 0x11, 0x07]);
        let ttl = objects
            .get_property(ObjectType::NetParameter, 1, pid::net::TTL, 1, 1)
            .unwrap();
        assert_eq!(ttl.as_ref(), &[9]);
    }

    #[test]
    fn test_memory_image() {
        let mut dev = device(DeviceAddress::new(1, 1, 1));
        assert_eq!(dev.read_memory(0, 4).unwrap(), &[0, 1, 2, 3]);
        assert_eq!(dev.read_memory(999, 1).unwrap(), &[(999 % 256) as u8]);
        dev.write_memory(10, &[0xaa, 0xbb]).unwrap();
        assert_eq!(dev.read_memory(10, 2).unwrap(), &[0xaa, 0xbb]);
        assert!(dev.read_memory(998, 3).is_err());
        assert!(dev.write_memory(MEMORY_SIZE, &[0]).is_err());
    }
}
