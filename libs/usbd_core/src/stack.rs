//! The device stack: owns the driver, the descriptor tree and the runtime
//! endpoints, and implements the chapter 9 control protocol on endpoint 0.
//!
//! `poll` is the single entry point from the interrupt handler. It drains
//! the driver's events and dispatches them: SETUP packets to the control
//! dispatcher, buffer completions to the transfer engine and from there to
//! class drivers. The dispatcher handles exactly one SETUP at a time; a
//! new SETUP resets both directions of endpoint 0 and discards any
//! in-flight data stage.

use heapless::Vec;

use crate::class::UsbClass;
use crate::config::{MAX_DESC_SIZE, MAX_ENDPOINTS, MS_OS_20_MAX_SIZE};
use crate::descriptor::Device;
use crate::driver::{DriverError, UsbDriver};
use crate::endpoint::Endpoint;
use crate::ms_os::{url_descriptor, MsOs20DescriptorSet, MS_OS_20_DESCRIPTOR_INDEX, WEBUSB_REQUEST_GET_URL};
use crate::setup::{
    DescriptorType, Recipient, RequestKind, SetupPacket, StandardRequest,
    FEATURE_DEVICE_REMOTE_WAKEUP, FEATURE_ENDPOINT_HALT,
};
use crate::strings::StringTable;
use crate::{EndpointAddress, EndpointType, Result, UsbDirection, UsbError};

const EP0_IN: EndpointAddress = EndpointAddress::new(0, UsbDirection::In);
const EP0_OUT: EndpointAddress = EndpointAddress::new(0, UsbDirection::Out);

impl From<DriverError> for UsbError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::BufferMemoryExhausted | DriverError::EndpointTaken => UsbError::CapacityExceeded,
            DriverError::Unsupported => UsbError::InvalidParameter,
        }
    }
}

pub struct UsbStack<D: UsbDriver> {
    driver: D,
    device: Device,
    strings: StringTable,
    endpoints: Vec<Endpoint, MAX_ENDPOINTS>,
    active_configuration: u8,
    /// SET_ADDRESS value waiting for its status stage to complete.
    pending_address: Option<u8>,
    /// Class control OUT request whose data stage is still in flight.
    pending_class_out: Option<SetupPacket>,
    ms_os: Option<(MsOs20DescriptorSet, u8)>,
    webusb: Option<(&'static str, u8)>,
}

impl<D: UsbDriver> UsbStack<D> {
    /// Take ownership of the controller driver and set up the control
    /// endpoint pair. The descriptor tree is empty; build it through
    /// [`device_mut`](Self::device_mut) before enabling the pull-up.
    pub fn new(mut driver: D) -> Result<Self> {
        driver.alloc_endpoint(EP0_OUT, EndpointType::Control, 64)?;
        driver.alloc_endpoint(EP0_IN, EndpointType::Control, 64)?;

        let mut endpoints = Vec::new();
        let _ = endpoints.push(Endpoint::new(EP0_OUT, EndpointType::Control, 64, 0));
        let _ = endpoints.push(Endpoint::new(EP0_IN, EndpointType::Control, 64, 0));

        driver.irq_enable(true);

        Ok(UsbStack {
            driver,
            device: Device::new(),
            strings: StringTable::new(),
            endpoints,
            active_configuration: 0,
            pending_address: None,
            pending_class_out: None,
            ms_os: None,
            webusb: None,
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn strings_mut(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    pub fn active_configuration(&self) -> u8 {
        self.active_configuration
    }

    pub fn pullup_enable(&mut self, enabled: bool) {
        self.driver.pullup_enable(enabled);
    }

    /// Serve the given MS OS 2.0 descriptor set on the vendor request
    /// `vendor_code` (the code advertised in the BOS platform capability).
    pub fn set_ms_os_descriptors(&mut self, set: MsOs20DescriptorSet, vendor_code: u8) {
        self.ms_os = Some((set, vendor_code));
    }

    /// Serve `url` as the WebUSB landing page on `vendor_code`.
    pub fn set_webusb_url(&mut self, url: &'static str, vendor_code: u8) {
        self.webusb = Some((url, vendor_code));
    }

    /// Create an endpoint on the next free index of `direction` and attach
    /// its descriptor to `interface` of the configuration at
    /// `config_position`.
    pub fn create_endpoint(
        &mut self,
        config_position: u8,
        interface: u8,
        direction: UsbDirection,
        kind: EndpointType,
        max_packet: u16,
        interval: u8,
    ) -> Result<EndpointAddress> {
        let index = self.next_free_index(direction)?;
        self.create_endpoint_at(
            config_position,
            interface,
            EndpointAddress::new(index, direction),
            kind,
            max_packet,
            interval,
        )
    }

    /// Create an endpoint with an explicit address.
    pub fn create_endpoint_at(
        &mut self,
        config_position: u8,
        interface: u8,
        address: EndpointAddress,
        kind: EndpointType,
        max_packet: u16,
        interval: u8,
    ) -> Result<EndpointAddress> {
        if address.index() == 0 || self.addr_to_ep(address).is_some() {
            return Err(UsbError::InvalidParameter);
        }
        if self.endpoints.is_full() {
            return Err(UsbError::CapacityExceeded);
        }
        {
            let config = self.device.configuration_mut(config_position).ok_or(UsbError::InvalidParameter)?;
            let iface = config.interface_mut(interface).ok_or(UsbError::InvalidParameter)?;
            iface.add_endpoint(crate::descriptor::EndpointDescriptor {
                address,
                kind,
                max_packet,
                interval,
            })?;
        }
        self.driver.alloc_endpoint(address, kind, max_packet)?;
        let _ = self.endpoints.push(Endpoint::new(address, kind, max_packet, interval));
        Ok(address)
    }

    fn next_free_index(&self, direction: UsbDirection) -> Result<u8> {
        for index in 1..16 {
            let addr = EndpointAddress::new(index, direction);
            if self.addr_to_ep(addr).is_none() {
                return Ok(index);
            }
        }
        Err(UsbError::CapacityExceeded)
    }

    /// Look up the runtime endpoint behind an address.
    pub fn endpoint(&self, addr: EndpointAddress) -> Option<&Endpoint> {
        self.addr_to_ep(addr)
    }

    fn addr_to_ep(&self, addr: EndpointAddress) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.matches(addr))
    }

    fn ep_mut(&mut self, addr: EndpointAddress) -> Option<(&mut Endpoint, &mut D)> {
        let driver = &mut self.driver;
        let ep = self.endpoints.iter_mut().find(|e| e.matches(addr))?;
        Some((ep, driver))
    }

    // Endpoint operations used by class drivers.

    pub fn start_transfer(&mut self, addr: EndpointAddress, data: &[u8]) -> Result<()> {
        let (ep, driver) = self.ep_mut(addr).ok_or(UsbError::InvalidEndpoint)?;
        ep.start_transfer(driver, data)
    }

    pub fn start_receive(&mut self, addr: EndpointAddress, len: u16) -> Result<()> {
        let (ep, driver) = self.ep_mut(addr).ok_or(UsbError::InvalidEndpoint)?;
        ep.start_receive(driver, len)
    }

    /// Payload of the last completed OUT transfer on `addr`; valid until
    /// the endpoint is rearmed.
    pub fn received(&self, addr: EndpointAddress) -> &[u8] {
        self.addr_to_ep(addr).map(|e| e.received()).unwrap_or(&[])
    }

    pub fn is_active(&self, addr: EndpointAddress) -> bool {
        self.addr_to_ep(addr).map(|e| e.is_active()).unwrap_or(false)
    }

    pub fn endpoint_next_pid(&self, addr: EndpointAddress) -> u8 {
        self.addr_to_ep(addr).map(|e| e.next_pid()).unwrap_or(0)
    }

    pub fn endpoint_max_packet(&self, addr: EndpointAddress) -> u16 {
        self.addr_to_ep(addr).map(|e| e.max_packet()).unwrap_or(0)
    }

    pub fn send_stall(&mut self, addr: EndpointAddress, stalled: bool) {
        if let Some((ep, driver)) = self.ep_mut(addr) {
            ep.send_stall(driver, stalled);
        }
    }

    pub fn is_stalled(&self, addr: EndpointAddress) -> bool {
        self.addr_to_ep(addr).map(|e| e.is_stalled(&self.driver)).unwrap_or(false)
    }

    pub fn send_nak(&mut self, addr: EndpointAddress, nak: bool) {
        if let Some((ep, driver)) = self.ep_mut(addr) {
            ep.send_nak(driver, nak);
        }
    }

    pub fn send_zlp_data1(&mut self, addr: EndpointAddress) {
        if let Some((ep, driver)) = self.ep_mut(addr) {
            ep.send_zlp_data1(driver);
        }
    }

    /// Return an endpoint direction to the post-SETUP state: stall and
    /// NAK cleared, transfer abandoned, toggle at DATA1.
    pub fn reset_endpoint(&mut self, addr: EndpointAddress) {
        if let Some((ep, driver)) = self.ep_mut(addr) {
            ep.reset(driver);
        }
    }

    pub fn enable_endpoint(&mut self, addr: EndpointAddress, enabled: bool) {
        if let Some((ep, driver)) = self.ep_mut(addr) {
            ep.enable(driver, enabled);
        }
    }

    pub fn irq_enable(&mut self, enabled: bool) {
        self.driver.irq_enable(enabled);
    }

    // Control helpers for class setup handlers.

    /// Answer an IN control request with `data`, truncated to `wLength`.
    pub fn control_in(&mut self, setup: &SetupPacket, data: &[u8]) -> Result<()> {
        let len = data.len().min(setup.length as usize);
        self.start_transfer(EP0_IN, &data[..len])
    }

    /// Accept the data stage of a claimed OUT control request. The payload
    /// arrives later through [`UsbClass::setup_out`].
    pub fn control_accept_out(&mut self, setup: &SetupPacket) -> Result<()> {
        let len = (setup.length as usize).min(MAX_DESC_SIZE) as u16;
        self.pending_class_out = Some(*setup);
        self.start_receive(EP0_OUT, len)
    }

    /// Refuse the current control request: stall both directions of
    /// endpoint 0. The stalls clear on the next SETUP.
    pub fn control_stall(&mut self) {
        self.send_stall(EP0_IN, true);
        self.send_stall(EP0_OUT, true);
    }

    /// Drain controller events and dispatch them. Called from the IRQ
    /// entry; `classes` receive their endpoint and setup events here.
    pub fn poll(&mut self, classes: &mut [&mut dyn UsbClass<D>]) {
        let events = self.driver.poll();

        if events.bus_reset {
            self.handle_bus_reset();
            for class in classes.iter_mut() {
                class.on_reset(self);
            }
        }

        if let Some(raw) = events.setup {
            let setup = SetupPacket::parse(&raw);
            self.handle_setup(&setup, classes);
        }

        for index in 0..16u8 {
            if events.ep_in_complete & (1 << index) != 0 {
                self.handle_in_complete(index, classes);
            }
            if events.ep_out_complete & (1 << index) != 0 {
                self.handle_out_complete(index, classes);
            }
        }
    }

    fn handle_bus_reset(&mut self) {
        log::info!("USB bus reset");
        self.driver.reset_address();
        self.pending_address = None;
        self.pending_class_out = None;
        if self.active_configuration != 0 {
            self.activate_configuration_endpoints(self.active_configuration, false);
        }
        self.active_configuration = 0;
        for ep in self.endpoints.iter_mut() {
            ep.clear_after_bus_reset();
        }
    }

    fn activate_configuration_endpoints(&mut self, value: u8, enabled: bool) {
        let device = &self.device;
        let driver = &mut self.driver;
        let endpoints = &mut self.endpoints;
        let Some(config) = device.find_configuration(value) else {
            log::warn!("cannot (de)activate unknown configuration {}", value);
            return;
        };
        for iface in config.interfaces() {
            for epd in iface.endpoints() {
                if let Some(ep) = endpoints.iter_mut().find(|e| e.matches(epd.address)) {
                    ep.enable(driver, enabled);
                }
            }
        }
    }

    fn ep0_reset(&mut self) {
        for addr in [EP0_IN, EP0_OUT] {
            if let Some((ep, driver)) = self.ep_mut(addr) {
                ep.reset(driver);
            }
        }
    }

    fn handle_setup(&mut self, setup: &SetupPacket, classes: &mut [&mut dyn UsbClass<D>]) {
        self.pending_class_out = None;
        self.ep0_reset();

        if setup.kind != RequestKind::Standard {
            self.route_class_request(setup, classes);
            return;
        }

        match StandardRequest::try_from(setup.request) {
            Ok(StandardRequest::SetAddress) => self.handle_set_address(setup),
            Ok(StandardRequest::GetDescriptor) => self.handle_get_descriptor(setup),
            Ok(StandardRequest::SetDescriptor) => {
                log::info!("Set descriptor: not implemented");
                self.control_stall();
            }
            Ok(StandardRequest::GetConfiguration) => {
                log::info!("Get configuration ({})", self.active_configuration);
                let value = [self.active_configuration];
                let _ = self.control_in(setup, &value);
            }
            Ok(StandardRequest::SetConfiguration) => self.handle_set_configuration(setup, classes),
            Ok(StandardRequest::GetInterface) => self.handle_get_interface(setup),
            Ok(StandardRequest::SetInterface) => self.handle_set_interface(setup),
            Ok(StandardRequest::GetStatus) => self.handle_get_status(setup),
            Ok(StandardRequest::ClearFeature) => self.handle_feature(setup, false),
            Ok(StandardRequest::SetFeature) => self.handle_feature(setup, true),
            Ok(StandardRequest::SynchFrame) => {
                log::info!("Synch frame");
                // Forward to whichever class owns the endpoint.
                let mut claimed = false;
                for class in classes.iter_mut() {
                    if class.setup(self, setup) {
                        claimed = true;
                        break;
                    }
                }
                if !claimed {
                    self.control_stall();
                }
            }
            Err(_) => {
                log::warn!("Unknown standard request 0x{:02x}", setup.request);
                self.control_stall();
            }
        }
    }

    fn handle_set_address(&mut self, setup: &SetupPacket) {
        // The host waits for the status stage before using the new
        // address, so the register write happens in handle_in_complete
        // once the status ZLP went out.
        let address = setup.value as u8;
        log::info!("Set address ({})", address);
        self.pending_address = Some(address);
        self.send_zlp_data1(EP0_IN);
    }

    fn handle_get_descriptor(&mut self, setup: &SetupPacket) {
        let mut buf = [0u8; MAX_DESC_SIZE];
        match DescriptorType::try_from(setup.descriptor_type()) {
            Ok(DescriptorType::Device) => {
                log::info!("Get device descriptor (len={})", setup.length);
                // Hosts often probe with wLength = 8 first.
                let len = match self.device.serialize(&mut buf) {
                    Ok(len) => len.min(setup.length as usize),
                    Err(_) => return self.control_stall(),
                };
                let _ = self.start_transfer(EP0_IN, &buf[..len]);
            }
            Ok(DescriptorType::Configuration) => {
                let index = setup.descriptor_index();
                log::info!("Get configuration descriptor (index {}, len={})", index, setup.length);
                let Some(config) = self.device.configuration(index) else {
                    return self.control_stall();
                };
                let result = if setup.length >= config.total_length() {
                    config.serialize(&mut buf)
                } else {
                    config.serialize_header(&mut buf)
                };
                match result {
                    Ok(len) => {
                        let len = len.min(setup.length as usize);
                        let _ = self.start_transfer(EP0_IN, &buf[..len]);
                    }
                    Err(_) => self.control_stall(),
                }
            }
            Ok(DescriptorType::String) => {
                let index = setup.descriptor_index();
                log::info!("Get string descriptor [{}] (len={})", index, setup.length);
                match self.strings.descriptor_utf16(index, &mut buf) {
                    Ok(len) => {
                        let len = len.min(setup.length as usize);
                        let _ = self.start_transfer(EP0_IN, &buf[..len]);
                    }
                    Err(_) => self.control_stall(),
                }
            }
            Ok(DescriptorType::Bos) => {
                log::info!("Get BOS descriptor (len={})", setup.length);
                let Some(bos) = self.device.bos() else {
                    return self.control_stall();
                };
                match bos.serialize(&mut buf) {
                    Ok(len) => {
                        let len = len.min(setup.length as usize);
                        let _ = self.start_transfer(EP0_IN, &buf[..len]);
                    }
                    Err(_) => self.control_stall(),
                }
            }
            Ok(DescriptorType::Otg) | Ok(DescriptorType::Debug) | Ok(DescriptorType::DeviceQualifier) => {
                log::info!("Get descriptor type {}: unsupported", setup.descriptor_type());
                self.control_stall();
            }
            _ => {
                log::warn!("Unsupported descriptor type {}", setup.descriptor_type());
                self.control_stall();
            }
        }
    }

    fn handle_set_configuration(&mut self, setup: &SetupPacket, classes: &mut [&mut dyn UsbClass<D>]) {
        let value = setup.value as u8;
        log::info!("Set configuration ({})", value);
        if self.active_configuration != value {
            if self.active_configuration != 0 {
                self.activate_configuration_endpoints(self.active_configuration, false);
                log::info!("Disabled configuration {}", self.active_configuration);
            }
            self.active_configuration = 0;
            if value != 0 {
                if self.device.find_configuration(value).is_none() {
                    return self.control_stall();
                }
                self.activate_configuration_endpoints(value, true);
                self.active_configuration = value;
                log::info!("Enabled configuration {}", value);
                for class in classes.iter_mut() {
                    class.on_configured(self);
                }
            }
        }
        self.send_zlp_data1(EP0_IN);
    }

    fn handle_get_interface(&mut self, setup: &SetupPacket) {
        log::info!("Get interface ({})", setup.index);
        let alt = self
            .device
            .find_configuration(self.active_configuration)
            .and_then(|c| c.interface(setup.index as u8))
            .map(|i| i.alternate_setting());
        match alt {
            Some(alt) => {
                let _ = self.control_in(setup, &[alt]);
            }
            None => self.control_stall(),
        }
    }

    fn handle_set_interface(&mut self, setup: &SetupPacket) {
        log::info!("Set interface ({}, alt {})", setup.index, setup.value);
        if let Some(iface) = self
            .device
            .find_configuration_mut(self.active_configuration)
            .and_then(|c| c.interface_mut(setup.index as u8))
        {
            iface.set_alternate_setting(setup.value as u8);
        }
        self.send_zlp_data1(EP0_IN);
    }

    fn handle_get_status(&mut self, setup: &SetupPacket) {
        log::info!("Get status");
        let mut data: u16 = 0;
        match setup.recipient {
            Recipient::Device => {
                if let Some(config) = self.device.find_configuration(self.active_configuration) {
                    if config.self_powered() {
                        data |= 1 << 0;
                    }
                    if config.remote_wakeup() {
                        data |= 1 << 1;
                    }
                } else {
                    log::warn!("No active configuration for GET_STATUS");
                }
            }
            Recipient::Interface => {
                // Interface status is always zero.
            }
            Recipient::Endpoint => {
                let addr = EndpointAddress::from_byte(setup.index as u8);
                if self.is_stalled(addr) {
                    data |= 1 << 0;
                }
            }
            Recipient::Other => {
                log::warn!("GET_STATUS for unknown recipient");
            }
        }
        let _ = self.control_in(setup, &data.to_le_bytes());
    }

    fn handle_feature(&mut self, setup: &SetupPacket, set: bool) {
        match setup.recipient {
            Recipient::Device => {
                if setup.value == FEATURE_DEVICE_REMOTE_WAKEUP {
                    log::info!("Feature: remote wakeup {}", if set { "on" } else { "off" });
                    if let Some(config) = self.device.find_configuration_mut(self.active_configuration) {
                        config.set_remote_wakeup(set);
                    }
                } else {
                    log::warn!("Unknown device feature {}", setup.value);
                }
            }
            Recipient::Endpoint => {
                if setup.value == FEATURE_ENDPOINT_HALT {
                    let addr = EndpointAddress::from_byte(setup.index as u8);
                    log::info!("Feature: EP 0x{:02x} halt {}", addr.to_byte(), if set { "on" } else { "off" });
                    self.send_stall(addr, set);
                } else {
                    log::warn!("Unknown endpoint feature {}", setup.value);
                }
            }
            _ => {
                log::warn!("Unknown feature recipient");
            }
        }
        self.send_zlp_data1(EP0_IN);
    }

    fn route_class_request(&mut self, setup: &SetupPacket, classes: &mut [&mut dyn UsbClass<D>]) {
        if setup.recipient == Recipient::Device
            && setup.kind == RequestKind::Vendor
            && self.handle_vendor_device_request(setup)
        {
            return;
        }

        let mut claimed = false;
        for class in classes.iter_mut() {
            if class.setup(self, setup) {
                claimed = true;
                break;
            }
        }

        if claimed {
            // OUT requests without a data stage are acknowledged here; the
            // data-stage variants complete in handle_out_complete.
            if setup.direction == UsbDirection::Out && setup.length == 0 {
                self.send_zlp_data1(EP0_IN);
            }
        } else {
            log::warn!(
                "Unclaimed {:?} request 0x{:02x} for {:?} {}",
                setup.kind,
                setup.request,
                setup.recipient,
                setup.index
            );
            self.control_stall();
        }
    }

    fn handle_vendor_device_request(&mut self, setup: &SetupPacket) -> bool {
        if let Some((set, vendor_code)) = &self.ms_os {
            if setup.request == *vendor_code && setup.index == MS_OS_20_DESCRIPTOR_INDEX {
                log::info!("Get MS OS 2.0 descriptor set (len={})", setup.length);
                let mut buf = [0u8; MS_OS_20_MAX_SIZE];
                let len = set.bytes().len();
                buf[..len].copy_from_slice(set.bytes());
                let _ = self.control_in(setup, &buf[..len]);
                return true;
            }
        }
        if let Some((url, vendor_code)) = self.webusb {
            if setup.request == vendor_code && setup.index == WEBUSB_REQUEST_GET_URL {
                log::info!("Get WebUSB landing page");
                let mut buf = [0u8; MAX_DESC_SIZE];
                // Scheme 255: the stored URL carries its own scheme.
                match url_descriptor(url, 255, &mut buf) {
                    Ok(len) => {
                        let _ = self.control_in(setup, &buf[..len]);
                    }
                    Err(_) => self.control_stall(),
                }
                return true;
            }
        }
        false
    }

    fn handle_in_complete(&mut self, index: u8, classes: &mut [&mut dyn UsbClass<D>]) {
        let addr = EndpointAddress::new(index, UsbDirection::In);
        let done = match self.ep_mut(addr) {
            Some((ep, driver)) => ep.handle_in_complete(driver),
            None => return,
        };
        let Some(len) = done else { return };

        if index == 0 {
            // The status stage the host was waiting for is on the wire;
            // a latched SET_ADDRESS may now reach the hardware.
            if let Some(address) = self.pending_address.take() {
                self.driver.set_address(address);
                log::info!("Device address {} committed", address);
            }
            if len > 0 {
                // Data stage finished; prepare to receive the status ZLP.
                self.send_zlp_data1(EP0_OUT);
            }
        } else {
            for class in classes.iter_mut() {
                class.on_in_complete(self, addr, len);
            }
        }
    }

    fn handle_out_complete(&mut self, index: u8, classes: &mut [&mut dyn UsbClass<D>]) {
        let addr = EndpointAddress::new(index, UsbDirection::Out);
        let done = match self.ep_mut(addr) {
            Some((ep, driver)) => ep.handle_out_complete(driver),
            None => return,
        };
        let Some(len) = done else { return };

        if index == 0 {
            if len > 0 {
                // Acknowledge the received data stage.
                self.send_zlp_data1(EP0_IN);
                if let Some(setup) = self.pending_class_out.take() {
                    let mut data = [0u8; MAX_DESC_SIZE];
                    let n = {
                        let received = self.received(EP0_OUT);
                        let n = received.len().min(MAX_DESC_SIZE);
                        data[..n].copy_from_slice(&received[..n]);
                        n
                    };
                    for class in classes.iter_mut() {
                        if class.setup_out(self, &setup, &data[..n]) {
                            break;
                        }
                    }
                }
            }
        } else {
            for class in classes.iter_mut() {
                class.on_out_complete(self, addr, len);
            }
        }
    }
}
