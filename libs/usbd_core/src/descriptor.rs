//! The descriptor tree: device → configurations → interfaces →
//! functional descriptors + endpoints, plus the optional Binary Object
//! Store.
//!
//! The tree is built eagerly before the pull-up is enabled and is immutable
//! afterwards except for alternate settings. `wTotalLength` fields are kept
//! current on every insertion, so serialization is a straight walk in
//! insertion order: configuration header, then per interface the
//! association descriptor (once, before its first member), the interface
//! descriptor, its functional descriptors and its endpoint descriptors.

use heapless::Vec;

use crate::config::{
    MAX_ASSOC_PER_CONF, MAX_BOS_CAPABILITIES, MAX_CAPABILITY_SIZE, MAX_CONF_PER_DEVICE,
    MAX_EP_PER_INTERFACE, MAX_FUNC_DESC_PER_INTERFACE, MAX_FUNC_DESC_SIZE, MAX_INTERF_PER_CONF,
};
use crate::setup::DescriptorType;
use crate::strings::StringTable;
use crate::{EndpointAddress, EndpointType, Result, UsbError};

pub const DEVICE_DESC_LEN: usize = 18;
pub const CONFIGURATION_DESC_LEN: usize = 9;
pub const INTERFACE_DESC_LEN: usize = 9;
pub const INTERFACE_ASSOCIATION_DESC_LEN: usize = 8;
pub const ENDPOINT_DESC_LEN: usize = 7;
pub const BOS_DESC_LEN: usize = 5;

fn put(buf: &mut [u8], at: usize, bytes: &[u8]) -> Result<usize> {
    let end = at + bytes.len();
    buf.get_mut(at..end).ok_or(UsbError::BufferOverflow)?.copy_from_slice(bytes);
    Ok(end)
}

/// Root of the tree; carries the device descriptor fields.
pub struct Device {
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    i_manufacturer: u8,
    i_product: u8,
    i_serial_number: u8,
    configurations: Vec<Configuration, MAX_CONF_PER_DEVICE>,
    bos: Option<Bos>,
}

impl Device {
    pub fn new() -> Self {
        Device {
            bcd_usb: 0x0200,
            device_class: 0,
            device_sub_class: 0,
            device_protocol: 0,
            max_packet_size_0: 64,
            vendor_id: 0,
            product_id: 0,
            bcd_device: 0x0100,
            i_manufacturer: 0,
            i_product: 0,
            i_serial_number: 0,
            configurations: Vec::new(),
            bos: None,
        }
    }

    pub fn set_manufacturer(&mut self, strings: &mut StringTable, s: &'static str) -> Result<()> {
        self.i_manufacturer = strings.add(s)?;
        Ok(())
    }

    pub fn set_product(&mut self, strings: &mut StringTable, s: &'static str) -> Result<()> {
        self.i_product = strings.add(s)?;
        Ok(())
    }

    pub fn set_serial_number(&mut self, strings: &mut StringTable, s: &'static str) -> Result<()> {
        self.i_serial_number = strings.add(s)?;
        Ok(())
    }

    /// Append a configuration and return its position. The configuration
    /// value must be nonzero and unique within the device.
    pub fn add_configuration(&mut self, config: Configuration) -> Result<u8> {
        if config.value == 0 || self.find_configuration(config.value).is_some() {
            return Err(UsbError::InvalidParameter);
        }
        self.configurations.push(config).map_err(|_| UsbError::CapacityExceeded)?;
        Ok(self.configurations.len() as u8 - 1)
    }

    pub fn num_configurations(&self) -> u8 {
        self.configurations.len() as u8
    }

    pub fn configuration(&self, position: u8) -> Option<&Configuration> {
        self.configurations.get(position as usize)
    }

    pub fn configuration_mut(&mut self, position: u8) -> Option<&mut Configuration> {
        self.configurations.get_mut(position as usize)
    }

    /// Look a configuration up by its `bConfigurationValue`.
    pub fn find_configuration(&self, value: u8) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.value == value)
    }

    pub fn find_configuration_mut(&mut self, value: u8) -> Option<&mut Configuration> {
        self.configurations.iter_mut().find(|c| c.value == value)
    }

    pub fn set_bos(&mut self, bos: Bos) {
        self.bos = Some(bos);
    }

    pub fn bos(&self) -> Option<&Bos> {
        self.bos.as_ref()
    }

    /// Serialize the 18-byte device descriptor.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let mut at = put(buf, 0, &[DEVICE_DESC_LEN as u8, DescriptorType::Device as u8])?;
        at = put(buf, at, &self.bcd_usb.to_le_bytes())?;
        at = put(buf, at, &[self.device_class, self.device_sub_class, self.device_protocol, self.max_packet_size_0])?;
        at = put(buf, at, &self.vendor_id.to_le_bytes())?;
        at = put(buf, at, &self.product_id.to_le_bytes())?;
        at = put(buf, at, &self.bcd_device.to_le_bytes())?;
        at = put(buf, at, &[self.i_manufacturer, self.i_product, self.i_serial_number, self.num_configurations()])?;
        Ok(at)
    }
}

/// One configuration: interfaces, associations and power attributes.
pub struct Configuration {
    value: u8,
    i_configuration: u8,
    self_powered: bool,
    remote_wakeup: bool,
    max_power: u8,
    interfaces: Vec<Interface, MAX_INTERF_PER_CONF>,
    associations: Vec<InterfaceAssociation, MAX_ASSOC_PER_CONF>,
}

impl Configuration {
    pub fn new(value: u8) -> Self {
        Configuration {
            value,
            i_configuration: 0,
            self_powered: false,
            remote_wakeup: false,
            max_power: 50, // 100 mA
            interfaces: Vec::new(),
            associations: Vec::new(),
        }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn set_description(&mut self, strings: &mut StringTable, s: &'static str) -> Result<()> {
        self.i_configuration = strings.add(s)?;
        Ok(())
    }

    pub fn set_self_powered(&mut self, on: bool) {
        self.self_powered = on;
    }

    pub fn self_powered(&self) -> bool {
        self.self_powered
    }

    pub fn set_remote_wakeup(&mut self, on: bool) {
        self.remote_wakeup = on;
    }

    pub fn remote_wakeup(&self) -> bool {
        self.remote_wakeup
    }

    /// `bMaxPower` is stored in 2 mA units.
    pub fn set_max_power_ma(&mut self, ma: u16) {
        self.max_power = (ma / 2) as u8;
    }

    /// Append an interface; its `bInterfaceNumber` is its position.
    pub fn add_interface(&mut self, mut interface: Interface) -> Result<u8> {
        let number = self.interfaces.len() as u8;
        interface.number = number;
        self.interfaces.push(interface).map_err(|_| UsbError::CapacityExceeded)?;
        Ok(number)
    }

    /// Append an interface as a member of association `assoc`. The first
    /// member pins the association's `bFirstInterface`.
    pub fn add_interface_to_association(&mut self, mut interface: Interface, assoc: u8) -> Result<u8> {
        {
            let a = self.associations.get_mut(assoc as usize).ok_or(UsbError::InvalidParameter)?;
            if a.interface_count == 0 {
                a.first_interface = self.interfaces.len() as u8;
            }
            a.interface_count += 1;
        }
        interface.association = Some(assoc);
        self.add_interface(interface)
    }

    pub fn add_association(&mut self, assoc: InterfaceAssociation) -> Result<u8> {
        self.associations.push(assoc).map_err(|_| UsbError::CapacityExceeded)?;
        Ok(self.associations.len() as u8 - 1)
    }

    pub fn num_interfaces(&self) -> u8 {
        self.interfaces.len() as u8
    }

    pub fn interface(&self, number: u8) -> Option<&Interface> {
        self.interfaces.get(number as usize)
    }

    pub fn interface_mut(&mut self, number: u8) -> Option<&mut Interface> {
        self.interfaces.get_mut(number as usize)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    /// Serialized size of this configuration and everything it owns.
    pub fn total_length(&self) -> u16 {
        let mut len = CONFIGURATION_DESC_LEN as u16;
        for iface in &self.interfaces {
            if let Some(a) = iface.association {
                if self.associations[a as usize].first_interface == iface.number {
                    len += INTERFACE_ASSOCIATION_DESC_LEN as u16;
                }
            }
            len += iface.total_length();
        }
        len
    }

    fn attributes(&self) -> u8 {
        // Bit 7 is reserved-set (bus powered in the 1.0 sense).
        let mut attrs = 0x80;
        if self.self_powered {
            attrs |= 0x40;
        }
        if self.remote_wakeup {
            attrs |= 0x20;
        }
        attrs
    }

    /// Serialize only the 9-byte configuration header. Hosts that probe
    /// with `wLength == 9` get this and read `wTotalLength` from it.
    pub fn serialize_header(&self, buf: &mut [u8]) -> Result<usize> {
        let mut at = put(buf, 0, &[CONFIGURATION_DESC_LEN as u8, DescriptorType::Configuration as u8])?;
        at = put(buf, at, &self.total_length().to_le_bytes())?;
        at = put(
            buf,
            at,
            &[self.num_interfaces(), self.value, self.i_configuration, self.attributes(), self.max_power],
        )?;
        Ok(at)
    }

    /// Serialize the full subtree in insertion order.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let mut at = self.serialize_header(buf)?;
        for iface in &self.interfaces {
            if let Some(a) = iface.association {
                let assoc = &self.associations[a as usize];
                if assoc.first_interface == iface.number {
                    at += assoc.serialize(&mut buf[at..])?;
                }
            }
            at += iface.serialize(&mut buf[at..])?;
        }
        Ok(at)
    }
}

/// Groups consecutive interfaces under one function (USB IAD ECN).
pub struct InterfaceAssociation {
    pub function_class: u8,
    pub function_sub_class: u8,
    pub function_protocol: u8,
    pub i_function: u8,
    first_interface: u8,
    interface_count: u8,
}

impl InterfaceAssociation {
    pub fn new(function_class: u8, function_sub_class: u8, function_protocol: u8) -> Self {
        InterfaceAssociation {
            function_class,
            function_sub_class,
            function_protocol,
            i_function: 0,
            first_interface: 0,
            interface_count: 0,
        }
    }

    fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        put(
            buf,
            0,
            &[
                INTERFACE_ASSOCIATION_DESC_LEN as u8,
                DescriptorType::InterfaceAssociation as u8,
                self.first_interface,
                self.interface_count,
                self.function_class,
                self.function_sub_class,
                self.function_protocol,
                self.i_function,
            ],
        )
    }
}

/// One interface: class triple, endpoints and functional descriptors.
pub struct Interface {
    number: u8,
    alternate_setting: u8,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    i_interface: u8,
    endpoints: Vec<EndpointDescriptor, MAX_EP_PER_INTERFACE>,
    functional: Vec<FunctionalDescriptor, MAX_FUNC_DESC_PER_INTERFACE>,
    association: Option<u8>,
}

impl Interface {
    pub fn new(class: u8, sub_class: u8, protocol: u8) -> Self {
        Interface {
            number: 0,
            alternate_setting: 0,
            interface_class: class,
            interface_sub_class: sub_class,
            interface_protocol: protocol,
            i_interface: 0,
            endpoints: Vec::new(),
            functional: Vec::new(),
            association: None,
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn alternate_setting(&self) -> u8 {
        self.alternate_setting
    }

    pub fn set_alternate_setting(&mut self, alt: u8) {
        self.alternate_setting = alt;
    }

    pub fn set_name(&mut self, strings: &mut StringTable, s: &'static str) -> Result<()> {
        self.i_interface = strings.add(s)?;
        Ok(())
    }

    pub fn add_endpoint(&mut self, ep: EndpointDescriptor) -> Result<()> {
        self.endpoints.push(ep).map_err(|_| UsbError::CapacityExceeded)
    }

    /// Append an opaque functional descriptor blob; emitted in insertion
    /// order between the interface and its endpoints.
    pub fn add_functional_descriptor(&mut self, bytes: &[u8]) -> Result<()> {
        let fd = FunctionalDescriptor::new(bytes)?;
        self.functional.push(fd).map_err(|_| UsbError::CapacityExceeded)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints.iter()
    }

    pub fn num_endpoints(&self) -> u8 {
        self.endpoints.len() as u8
    }

    fn total_length(&self) -> u16 {
        let mut len = INTERFACE_DESC_LEN as u16;
        for fd in &self.functional {
            len += fd.bytes.len() as u16;
        }
        len += (self.endpoints.len() * ENDPOINT_DESC_LEN) as u16;
        len
    }

    fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let mut at = put(
            buf,
            0,
            &[
                INTERFACE_DESC_LEN as u8,
                DescriptorType::Interface as u8,
                self.number,
                self.alternate_setting,
                self.num_endpoints(),
                self.interface_class,
                self.interface_sub_class,
                self.interface_protocol,
                self.i_interface,
            ],
        )?;
        for fd in &self.functional {
            at = put(buf, at, &fd.bytes)?;
        }
        for ep in &self.endpoints {
            at += ep.serialize(&mut buf[at..])?;
        }
        Ok(at)
    }
}

/// The wire image of one endpoint; the runtime state lives in the stack.
#[derive(Clone, Copy, Debug)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub kind: EndpointType,
    pub max_packet: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let mps = self.max_packet.to_le_bytes();
        put(
            buf,
            0,
            &[
                ENDPOINT_DESC_LEN as u8,
                DescriptorType::Endpoint as u8,
                self.address.to_byte(),
                self.kind as u8,
                mps[0],
                mps[1],
                self.interval,
            ],
        )
    }
}

/// An opaque class-specific descriptor owned by an interface.
struct FunctionalDescriptor {
    bytes: Vec<u8, MAX_FUNC_DESC_SIZE>,
}

impl FunctionalDescriptor {
    fn new(bytes: &[u8]) -> Result<Self> {
        let mut v = Vec::new();
        v.extend_from_slice(bytes).map_err(|_| UsbError::CapacityExceeded)?;
        Ok(FunctionalDescriptor { bytes: v })
    }
}

/// A device capability carried in the BOS. The only operations the tree
/// needs are the serialized length and the bytes themselves.
pub trait DeviceCapability {
    fn byte_length(&self) -> usize;
    /// Write the capability into `buf` and return `byte_length()`.
    fn bytes(&self, buf: &mut [u8]) -> usize;
}

/// Binary Object Store: a header plus up to [`MAX_BOS_CAPABILITIES`]
/// capability blobs, captured at insertion time.
pub struct Bos {
    capabilities: Vec<Vec<u8, MAX_CAPABILITY_SIZE>, MAX_BOS_CAPABILITIES>,
}

impl Bos {
    pub fn new() -> Self {
        Bos { capabilities: Vec::new() }
    }

    pub fn add_capability(&mut self, cap: &dyn DeviceCapability) -> Result<()> {
        let len = cap.byte_length();
        let mut blob: Vec<u8, MAX_CAPABILITY_SIZE> = Vec::new();
        blob.resize_default(len).map_err(|_| UsbError::CapacityExceeded)?;
        cap.bytes(&mut blob);
        self.capabilities.push(blob).map_err(|_| UsbError::CapacityExceeded)
    }

    pub fn total_length(&self) -> u16 {
        let caps: usize = self.capabilities.iter().map(|c| c.len()).sum();
        (BOS_DESC_LEN + caps) as u16
    }

    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let total = self.total_length().to_le_bytes();
        let mut at = put(
            buf,
            0,
            &[
                BOS_DESC_LEN as u8,
                DescriptorType::Bos as u8,
                total[0],
                total[1],
                self.capabilities.len() as u8,
            ],
        )?;
        for cap in &self.capabilities {
            at = put(buf, at, cap)?;
        }
        Ok(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UsbDirection;

    fn bulk_ep(index: u8, dir: UsbDirection) -> EndpointDescriptor {
        EndpointDescriptor {
            address: EndpointAddress::new(index, dir),
            kind: EndpointType::Bulk,
            max_packet: 64,
            interval: 0,
        }
    }

    fn build_composite() -> Configuration {
        let mut config = Configuration::new(1);
        let assoc = config.add_association(InterfaceAssociation::new(0x02, 0x02, 0x00)).unwrap();

        let mut comm = Interface::new(0x02, 0x02, 0x00);
        comm.add_functional_descriptor(&[0x05, 0x24, 0x00, 0x20, 0x01]).unwrap();
        comm.add_functional_descriptor(&[0x04, 0x24, 0x02, 0x06]).unwrap();
        comm.add_endpoint(EndpointDescriptor {
            address: EndpointAddress::new(3, UsbDirection::In),
            kind: EndpointType::Interrupt,
            max_packet: 16,
            interval: 10,
        })
        .unwrap();
        config.add_interface_to_association(comm, assoc).unwrap();

        let mut data = Interface::new(0x0a, 0x00, 0x00);
        data.add_endpoint(bulk_ep(1, UsbDirection::In)).unwrap();
        data.add_endpoint(bulk_ep(1, UsbDirection::Out)).unwrap();
        config.add_interface_to_association(data, assoc).unwrap();
        config
    }

    #[test]
    fn device_descriptor_layout() {
        let mut strings = StringTable::new();
        let mut dev = Device::new();
        dev.vendor_id = 0x04a0;
        dev.product_id = 0x008e;
        dev.set_product(&mut strings, "Demo").unwrap();
        dev.add_configuration(Configuration::new(1)).unwrap();

        let mut buf = [0u8; DEVICE_DESC_LEN];
        let len = dev.serialize(&mut buf).unwrap();
        assert_eq!(len, DEVICE_DESC_LEN);
        assert_eq!(buf[0], 0x12);
        assert_eq!(buf[1], 0x01);
        assert_eq!(&buf[2..4], &[0x00, 0x02]); // bcdUSB 2.00 LE
        assert_eq!(buf[7], 64);
        assert_eq!(&buf[8..10], &[0xa0, 0x04]);
        assert_eq!(buf[15], 1); // iProduct
        assert_eq!(buf[17], 1); // bNumConfigurations
    }

    #[test]
    fn duplicate_configuration_values_are_rejected() {
        let mut dev = Device::new();
        dev.add_configuration(Configuration::new(1)).unwrap();
        assert_eq!(dev.add_configuration(Configuration::new(1)), Err(UsbError::InvalidParameter));
        assert_eq!(dev.add_configuration(Configuration::new(0)), Err(UsbError::InvalidParameter));
    }

    #[test]
    fn total_length_matches_serialized_subtree() {
        let config = build_composite();
        let mut buf = [0u8; 256];
        let len = config.serialize(&mut buf).unwrap();
        assert_eq!(len, config.total_length() as usize);
        // wTotalLength inside the emitted header agrees.
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), len as u16);
    }

    #[test]
    fn association_is_emitted_once_before_first_member() {
        let config = build_composite();
        let mut buf = [0u8; 256];
        let len = config.serialize(&mut buf).unwrap();

        // Walk the stream by bLength and collect descriptor types.
        let mut types = heapless::Vec::<u8, 16>::new();
        let mut at = 0;
        while at < len {
            types.push(buf[at + 1]).unwrap();
            at += buf[at] as usize;
        }
        assert_eq!(at, len);
        assert_eq!(
            types.as_slice(),
            &[
                DescriptorType::Configuration as u8,
                DescriptorType::InterfaceAssociation as u8,
                DescriptorType::Interface as u8,
                0x24, // header functional
                0x24, // acm functional
                DescriptorType::Endpoint as u8,
                DescriptorType::Interface as u8,
                DescriptorType::Endpoint as u8,
                DescriptorType::Endpoint as u8,
            ]
        );
    }

    #[test]
    fn reparsed_stream_matches_tree() {
        let config = build_composite();
        let mut buf = [0u8; 256];
        let len = config.serialize(&mut buf).unwrap();

        // Header fields.
        assert_eq!(buf[4], config.num_interfaces());
        assert_eq!(buf[5], config.value());

        // Interface descriptors in the stream agree with the tree.
        let mut at = 0;
        let mut seen_interfaces = 0u8;
        while at < len {
            if buf[at + 1] == DescriptorType::Interface as u8 {
                let iface = config.interface(buf[at + 2]).unwrap();
                assert_eq!(buf[at + 4], iface.num_endpoints());
                assert_eq!(buf[at + 5], iface.interface_class);
                seen_interfaces += 1;
            }
            at += buf[at] as usize;
        }
        assert_eq!(seen_interfaces, config.num_interfaces());
    }

    #[test]
    fn bos_lengths() {
        struct Blob;
        impl DeviceCapability for Blob {
            fn byte_length(&self) -> usize {
                4
            }
            fn bytes(&self, buf: &mut [u8]) -> usize {
                buf[..4].copy_from_slice(&[0x04, 0x10, 0x02, 0x00]);
                4
            }
        }

        let mut bos = Bos::new();
        bos.add_capability(&Blob).unwrap();
        bos.add_capability(&Blob).unwrap();
        assert_eq!(bos.total_length(), 13);
        assert_eq!(bos.add_capability(&Blob), Err(UsbError::CapacityExceeded));

        let mut buf = [0u8; 32];
        let len = bos.serialize(&mut buf).unwrap();
        assert_eq!(len, 13);
        assert_eq!(buf[0], 5);
        assert_eq!(buf[1], 0x0f);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 13);
        assert_eq!(buf[4], 2);
    }
}
