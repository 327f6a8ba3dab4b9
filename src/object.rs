//! Interface objects and the per-endpoint property store
//!
//! Every endpoint owns an ordered list of typed [`InterfaceObject`]s, each a
//! container of access-controlled, element-addressed properties. Object
//! indices are assigned on insertion and stay stable for the endpoint's
//! lifetime; index 0 is always the device object.
//!
//! Properties are arrays of fixed-size elements. The element size is pinned
//! by the first write; descriptions carry the access metadata used to
//! validate later reads and writes. A write to a property without a prior
//! description registers a permissive default description, matching the
//! store the setup code of real devices runs against.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Interface object kinds, with their conventional numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ObjectType {
    /// Device object, always present at index 0
    Device = 0,
    /// Address table
    AddressTable = 1,
    /// Association table
    AssociationTable = 2,
    /// Application program
    ApplicationProgram = 3,
    /// Interface program
    InterfaceProgram = 4,
    /// Router object (bus-wide, on the gateway)
    Router = 6,
    /// Message-server object (gateway-side mode switching)
    CemiServer = 8,
    /// Network parameter object (IP-side settings)
    NetParameter = 11,
    /// RF medium object
    RfMedium = 19,
}

impl ObjectType {
    /// Numeric object-type code
    pub const fn code(&self) -> u16 {
        *self as u16
    }
}

/// Property id constants
///
/// Ids below 50 are global; ids from 50 up are specific to one object type.
pub mod pid {
    /// Object type (global)
    pub const OBJECT_TYPE: u8 = 1;
    /// Load state control (global)
    pub const LOAD_STATE_CONTROL: u8 = 5;
    /// Run state control (global)
    pub const RUN_STATE_CONTROL: u8 = 6;
    /// Serial number (global)
    pub const SERIAL_NUMBER: u8 = 11;
    /// Program version (global)
    pub const PROGRAM_VERSION: u8 = 13;
    /// Device control (device object)
    pub const DEVICE_CONTROL: u8 = 14;
    /// Error code (global)
    pub const ERROR_CODE: u8 = 28;
    /// Object index (global)
    pub const OBJECT_INDEX: u8 = 29;
    /// Medium type (device object)
    pub const MEDIUM_TYPE: u8 = 51;
    /// Programming mode (device object); also the enter-config-mode
    /// parameter of the link procedure
    pub const PROGRAMMING_MODE: u8 = 54;
    /// Operation mode (application program object)
    pub const OPERATION_MODE: u8 = 55;
    /// Interface object list (device object)
    pub const IO_LIST: u8 = 71;
    /// RF multi type (RF medium object)
    pub const RF_MULTI_TYPE: u8 = 51;
    /// System broadcast control (router object)
    pub const SBC_CONTROL: u8 = 120;
    /// Communication mode (message-server object)
    pub const COMM_MODE: u8 = 52;
    /// Server-support flag (message-server object)
    pub const SERVER_SUPPORT: u8 = 201;

    /// Network parameter object ids
    pub mod net {
        /// Project installation id
        pub const PROJECT_INSTALLATION_ID: u8 = 51;
        /// Endpoint device address
        pub const DEVICE_ADDRESS: u8 = 52;
        /// Additional device addresses
        pub const ADDITIONAL_ADDRESSES: u8 = 53;
        /// Currently active IP assignment method
        pub const CURRENT_IP_ASSIGNMENT: u8 = 54;
        /// Configured IP assignment method
        pub const IP_ASSIGNMENT: u8 = 55;
        /// IP capabilities
        pub const IP_CAPABILITIES: u8 = 56;
        /// Currently active IP address
        pub const CURRENT_IP_ADDRESS: u8 = 57;
        /// Currently active subnet mask
        pub const CURRENT_SUBNET_MASK: u8 = 58;
        /// Currently active default gateway
        pub const CURRENT_GATEWAY: u8 = 59;
        /// Configured IP address
        pub const IP_ADDRESS: u8 = 60;
        /// Configured subnet mask
        pub const SUBNET_MASK: u8 = 61;
        /// Configured default gateway
        pub const DEFAULT_GATEWAY: u8 = 62;
        /// Routing multicast address
        pub const ROUTING_MULTICAST: u8 = 63;
        /// MAC address
        pub const MAC_ADDRESS: u8 = 64;
        /// Multicast TTL
        pub const TTL: u8 = 65;
        /// System setup multicast address
        pub const SETUP_MULTICAST: u8 = 66;
        /// Device capabilities word
        pub const DEVICE_CAPABILITIES: u8 = 67;
        /// Device state
        pub const DEVICE_STATE: u8 = 68;
        /// Routing capabilities
        pub const ROUTING_CAPABILITIES: u8 = 69;
        /// Frames transmitted to IP
        pub const MSG_TRANSMIT_TO_IP: u8 = 74;
        /// Frames transmitted to the bus
        pub const MSG_TRANSMIT_TO_BUS: u8 = 75;
        /// Friendly name (30-character array)
        pub const FRIENDLY_NAME: u8 = 76;
    }
}

/// Upper bound on objects per endpoint; exceeding it is treated as fatal
/// resource exhaustion by setup code
pub const MAX_OBJECTS: usize = 64;

/// Property store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// No object at the given index
    #[error("interface object index {0} does not exist")]
    ObjectNotFound(usize),

    /// No such object type/instance pair
    #[error("no instance {instance} of object type {object_type:?}")]
    InstanceNotFound {
        /// Requested object type
        object_type: ObjectType,
        /// Requested instance (1-based)
        instance: usize,
    },

    /// Property exists but holds no value yet, or was never created
    #[error("property {pid} of object {index} is not set")]
    PropertyNotSet {
        /// Object index
        index: usize,
        /// Property id
        pid: u8,
    },

    /// A description is already registered and overwrite was not requested
    #[error("description for property {pid} of object {index} already exists")]
    DescriptionExists {
        /// Object index
        index: usize,
        /// Property id
        pid: u8,
    },

    /// Start element / element count outside the property's bounds
    #[error("elements {start}..{start}+{elements} out of range for property {pid} (max {max})")]
    ElementRange {
        /// Property id
        pid: u8,
        /// 1-based start element
        start: u16,
        /// Element count
        elements: u16,
        /// Maximum elements per the description
        max: u16,
    },

    /// Data length does not match the element count and element size
    #[error("data length {actual} does not fit {elements} element(s) of {elem_size} byte(s)")]
    DataLength {
        /// Element count of the request
        elements: u16,
        /// Element size pinned by the first write
        elem_size: usize,
        /// Actual data length
        actual: usize,
    },

    /// The property's description forbids writing
    #[error("property {pid} of object {index} is read-only")]
    ReadOnly {
        /// Object index
        index: usize,
        /// Property id
        pid: u8,
    },

    /// Object list is full
    #[error("interface object limit ({0}) exhausted")]
    Exhausted(usize),
}

/// Access metadata of one property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Description {
    /// Property id
    pub pid: u8,
    /// Property data type code
    pub pdt: u8,
    /// Whether writes are allowed through the service interface
    pub writable: bool,
    /// Maximum number of elements
    pub max_elements: u16,
    /// Read access level
    pub read_level: u8,
    /// Write access level
    pub write_level: u8,
}

impl Description {
    /// Description with the given id, data type and access rights
    pub fn new(pid: u8, pdt: u8, writable: bool, max_elements: u16) -> Self {
        Self {
            pid,
            pdt,
            writable,
            max_elements,
            read_level: 3,
            write_level: 3,
        }
    }

    /// Permissive description registered implicitly on first write
    fn default_for(pid: u8) -> Self {
        Self::new(pid, 0, true, u16::MAX)
    }
}

/// One property: description plus element-addressed data
#[derive(Debug, Clone)]
struct Property {
    desc: Description,
    /// Element size in bytes, pinned by the first write (0 = not yet written)
    elem_size: usize,
    /// Current number of elements
    elements: u16,
    data: Vec<u8>,
}

impl Property {
    fn new(desc: Description) -> Self {
        Self {
            desc,
            elem_size: 0,
            elements: 0,
            data: Vec::new(),
        }
    }
}

/// A typed, indexed container of properties
#[derive(Debug, Clone)]
pub struct InterfaceObject {
    object_type: ObjectType,
    index: usize,
    properties: Vec<Property>,
}

impl InterfaceObject {
    /// Object kind
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Position in the endpoint's object list
    pub fn index(&self) -> usize {
        self.index
    }

    fn property(&self, pid: u8) -> Option<&Property> {
        self.properties.iter().find(|p| p.desc.pid == pid)
    }

    fn property_mut(&mut self, pid: u8) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.desc.pid == pid)
    }
}

/// Per-endpoint property store over all interface objects
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    objects: Vec<InterfaceObject>,
}

impl ObjectStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new object and return its index.
    ///
    /// Fails only when the object list is exhausted; callers treat that as
    /// fatal.
    pub fn add_object(&mut self, object_type: ObjectType) -> Result<usize, PropertyError> {
        if self.objects.len() >= MAX_OBJECTS {
            return Err(PropertyError::Exhausted(MAX_OBJECTS));
        }
        let index = self.objects.len();
        self.objects.push(InterfaceObject {
            object_type,
            index,
            properties: Vec::new(),
        });
        Ok(index)
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Object by index
    pub fn object(&self, index: usize) -> Option<&InterfaceObject> {
        self.objects.get(index)
    }

    /// Nth object (1-based instance) of the given type
    pub fn lookup(&self, object_type: ObjectType, instance: usize) -> Option<&InterfaceObject> {
        self.objects
            .iter()
            .filter(|o| o.object_type == object_type)
            .nth(instance.saturating_sub(1))
    }

    /// All objects in index order
    pub fn objects(&self) -> &[InterfaceObject] {
        &self.objects
    }

    /// Register or replace access metadata for a property.
    ///
    /// With `overwrite` false the call fails if a description is already
    /// present; existing data survives a replacement.
    pub fn set_description(
        &mut self,
        index: usize,
        desc: Description,
        overwrite: bool,
    ) -> Result<(), PropertyError> {
        let object = self
            .objects
            .get_mut(index)
            .ok_or(PropertyError::ObjectNotFound(index))?;
        match object.property_mut(desc.pid) {
            Some(property) => {
                if !overwrite {
                    return Err(PropertyError::DescriptionExists {
                        index,
                        pid: desc.pid,
                    });
                }
                property.desc = desc;
            }
            None => object.properties.push(Property::new(desc)),
        }
        Ok(())
    }

    /// Write elements of a property addressed by object type and instance
    pub fn set_property(
        &mut self,
        object_type: ObjectType,
        instance: usize,
        pid: u8,
        start: u16,
        elements: u16,
        data: &[u8],
    ) -> Result<(), PropertyError> {
        let index = self
            .lookup(object_type, instance)
            .map(InterfaceObject::index)
            .ok_or(PropertyError::InstanceNotFound {
                object_type,
                instance,
            })?;
        self.set_property_at(index, pid, start, elements, data)
    }

    /// Write elements of a property addressed by object index.
    ///
    /// `start` is 1-based; writing past the current element count extends the
    /// property up to the description's maximum. The data length must be an
    /// exact multiple of the element size pinned by the first write.
    pub fn set_property_at(
        &mut self,
        index: usize,
        pid: u8,
        start: u16,
        elements: u16,
        data: &[u8],
    ) -> Result<(), PropertyError> {
        let object = self
            .objects
            .get_mut(index)
            .ok_or(PropertyError::ObjectNotFound(index))?;
        if object.property(pid).is_none() {
            object.properties.push(Property::new(Description::default_for(pid)));
        }
        // the lookup above guarantees presence
        let property = match object.property_mut(pid) {
            Some(p) => p,
            None => return Err(PropertyError::PropertyNotSet { index, pid }),
        };

        if elements == 0 || data.len() % elements as usize != 0 {
            return Err(PropertyError::DataLength {
                elements,
                elem_size: property.elem_size,
                actual: data.len(),
            });
        }
        let elem_size = data.len() / elements as usize;
        if property.elem_size != 0 && elem_size != property.elem_size {
            return Err(PropertyError::DataLength {
                elements,
                elem_size: property.elem_size,
                actual: data.len(),
            });
        }
        let max = property.desc.max_elements;
        let end = start as u32 + elements as u32 - 1;
        if start == 0 || end > max as u32 {
            return Err(PropertyError::ElementRange {
                pid,
                start,
                elements,
                max,
            });
        }

        property.elem_size = elem_size;
        let needed = end as usize * elem_size;
        if property.data.len() < needed {
            property.data.resize(needed, 0);
        }
        let offset = (start as usize - 1) * elem_size;
        property.data[offset..offset + data.len()].copy_from_slice(data);
        property.elements = property.elements.max(end as u16);
        Ok(())
    }

    /// Read elements of a property addressed by object type and instance
    pub fn get_property(
        &self,
        object_type: ObjectType,
        instance: usize,
        pid: u8,
        start: u16,
        elements: u16,
    ) -> Result<Bytes, PropertyError> {
        let index = self
            .lookup(object_type, instance)
            .map(InterfaceObject::index)
            .ok_or(PropertyError::InstanceNotFound {
                object_type,
                instance,
            })?;
        self.get_property_at(index, pid, start, elements)
    }

    /// Read elements of a property addressed by object index.
    ///
    /// `start` 0 returns the current element count as a 2-byte value; reads
    /// of unset properties or past the current element count fail.
    pub fn get_property_at(
        &self,
        index: usize,
        pid: u8,
        start: u16,
        elements: u16,
    ) -> Result<Bytes, PropertyError> {
        let object = self
            .objects
            .get(index)
            .ok_or(PropertyError::ObjectNotFound(index))?;
        let property = object
            .property(pid)
            .filter(|p| p.elem_size != 0)
            .ok_or(PropertyError::PropertyNotSet { index, pid })?;

        if start == 0 {
            return Ok(Bytes::copy_from_slice(&property.elements.to_be_bytes()));
        }
        let end = start as u32 + elements as u32 - 1;
        if elements == 0 || end > property.elements as u32 {
            return Err(PropertyError::ElementRange {
                pid,
                start,
                elements,
                max: property.elements,
            });
        }
        let offset = (start as usize - 1) * property.elem_size;
        let len = elements as usize * property.elem_size;
        Ok(Bytes::copy_from_slice(&property.data[offset..offset + len]))
    }

    /// The wire-visible object directory: a `(0, object type)` byte pair per
    /// object in index order. Recomputed on each call, so it reflects every
    /// object addition.
    pub fn io_list(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.objects.len() * 2);
        for object in &self.objects {
            buf.put_u8(0);
            buf.put_u8(object.object_type.code() as u8);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_device() -> ObjectStore {
        let mut store = ObjectStore::new();
        store.add_object(ObjectType::Device).unwrap();
        store
    }

    #[test]
    fn test_indices_assigned_in_order() {
        let mut store = store_with_device();
        assert_eq!(store.add_object(ObjectType::AddressTable).unwrap(), 1);
        assert_eq!(store.add_object(ObjectType::Router).unwrap(), 2);
        assert_eq!(store.object(0).unwrap().object_type(), ObjectType::Device);
        assert_eq!(store.lookup(ObjectType::Router, 1).unwrap().index(), 2);
        assert!(store.lookup(ObjectType::Router, 2).is_none());
    }

    #[test]
    fn test_set_get_property() {
        let mut store = store_with_device();
        store
            .set_property_at(0, pid::SERIAL_NUMBER, 1, 1, &[1, 2, 3, 4, 5, 6])
            .unwrap();
        let value = store.get_property_at(0, pid::SERIAL_NUMBER, 1, 1).unwrap();
        assert_eq!(value.as_ref(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_unset_property_read_fails() {
        let mut store = store_with_device();
        assert!(matches!(
            store.get_property_at(0, pid::SERIAL_NUMBER, 1, 1),
            Err(PropertyError::PropertyNotSet { .. })
        ));
        // a description alone does not make the property readable
        store
            .set_description(0, Description::new(pid::SERIAL_NUMBER, 0, false, 1), true)
            .unwrap();
        assert!(store.get_property_at(0, pid::SERIAL_NUMBER, 1, 1).is_err());
    }

    #[test]
    fn test_element_size_pinned_by_first_write() {
        let mut store = store_with_device();
        store.set_property_at(0, 90, 1, 1, &[0, 0]).unwrap();
        // same property, different element size
        assert!(matches!(
            store.set_property_at(0, 90, 1, 1, &[0, 0, 0]),
            Err(PropertyError::DataLength { .. })
        ));
    }

    #[test]
    fn test_element_array_extension_and_bounds() {
        let mut store = store_with_device();
        store
            .set_description(0, Description::new(53, 0, true, 3), true)
            .unwrap();
        store.set_property_at(0, 53, 1, 1, &[0x11, 0x05]).unwrap();
        store.set_property_at(0, 53, 2, 1, &[0x11, 0x06]).unwrap();
        store.set_property_at(0, 53, 3, 1, &[0x11, 0x07]).unwrap();
        assert!(matches!(
            store.set_property_at(0, 53, 4, 1, &[0x11, 0x08]),
            Err(PropertyError::ElementRange { .. })
        ));
        let all = store.get_property_at(0, 53, 1, 3).unwrap();
        assert_eq!(all.as_ref(), &[0x11, 0x05, 0x11, 0x06, 0x11, 0x07]);
        // element count query
        let count = store.get_property_at(0, 53, 0, 1).unwrap();
        assert_eq!(count.as_ref(), &[0x00, 0x03]);
    }

    #[test]
    fn test_read_past_current_elements_fails() {
        let mut store = store_with_device();
        store.set_property_at(0, 90, 1, 1, &[7]).unwrap();
        assert!(matches!(
            store.get_property_at(0, 90, 1, 2),
            Err(PropertyError::ElementRange { .. })
        ));
    }

    #[test]
    fn test_description_overwrite_rules() {
        let mut store = store_with_device();
        let desc = Description::new(pid::DEVICE_CONTROL, 3, true, 1);
        store.set_description(0, desc, false).unwrap();
        assert!(matches!(
            store.set_description(0, desc, false),
            Err(PropertyError::DescriptionExists { .. })
        ));
        store.set_description(0, desc, true).unwrap();
    }

    #[test]
    fn test_io_list_tracks_object_set() {
        let mut store = store_with_device();
        assert_eq!(store.io_list().as_ref(), &[0, 0]);
        store.add_object(ObjectType::ApplicationProgram).unwrap();
        store.add_object(ObjectType::NetParameter).unwrap();
        let io_list = store.io_list();
        assert_eq!(io_list.len(), 2 * store.len());
        assert_eq!(io_list.as_ref(), &[0, 0, 0, 3, 0, 11]);
    }

    #[test]
    fn test_object_exhaustion() {
        let mut store = ObjectStore::new();
        for _ in 0..MAX_OBJECTS {
            store.add_object(ObjectType::Device).unwrap();
        }
        assert!(matches!(
            store.add_object(ObjectType::Device),
            Err(PropertyError::Exhausted(_))
        ));
    }

    #[test]
    fn test_type_instance_addressing() {
        let mut store = store_with_device();
        store.add_object(ObjectType::NetParameter).unwrap();
        store
            .set_property(ObjectType::NetParameter, 1, pid::net::TTL, 1, 1, &[9])
            .unwrap();
        let ttl = store
            .get_property(ObjectType::NetParameter, 1, pid::net::TTL, 1, 1)
            .unwrap();
        assert_eq!(ttl.as_ref(), &[9]);
        assert!(matches!(
            store.set_property(ObjectType::Router, 1, 1, 1, 1, &[0]),
            Err(PropertyError::InstanceNotFound { .. })
        ));
    }
}
