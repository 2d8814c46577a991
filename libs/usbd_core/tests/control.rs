//! Control-pipe integration tests driven through the scripted mock driver:
//! enumeration, descriptor reads, feature handling and the set-address
//! commit ordering.

use usbd_core::descriptor::{Configuration, Interface};
use usbd_core::testing::{MockDriver, MockOp};
use usbd_core::{
    EndpointAddress, EndpointType, MsOs20Capability, MsOs20DescriptorSet, UsbClass, UsbDirection,
    UsbStack, MS_OS_20_DESCRIPTOR_INDEX,
};

type Stack = UsbStack<MockDriver>;
type Classes<'a> = [&'a mut dyn UsbClass<MockDriver>];

fn build_stack() -> (Stack, EndpointAddress) {
    let mut usb = UsbStack::new(MockDriver::new()).unwrap();

    usb.device_mut().vendor_id = 0x04a0;
    usb.device_mut().product_id = 0x008e;

    let mut config = Configuration::new(1);
    config.set_max_power_ma(100);
    config.add_interface(Interface::new(0xff, 0x00, 0x00)).unwrap();
    usb.device_mut().add_configuration(config).unwrap();

    let bulk_in = usb
        .create_endpoint(0, 0, UsbDirection::In, EndpointType::Bulk, 64, 0)
        .unwrap();
    (usb, bulk_in)
}

fn setup_in(request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let v = value.to_le_bytes();
    let i = index.to_le_bytes();
    let l = length.to_le_bytes();
    [0x80, request, v[0], v[1], i[0], i[1], l[0], l[1]]
}

fn setup_out(request: u8, value: u16, index: u16) -> [u8; 8] {
    let v = value.to_le_bytes();
    let i = index.to_le_bytes();
    [0x00, request, v[0], v[1], i[0], i[1], 0, 0]
}

fn setup_out_endpoint(request: u8, value: u16, index: u16) -> [u8; 8] {
    let mut s = setup_out(request, value, index);
    s[0] = 0x02; // endpoint recipient
    s
}

/// Run a full control read transaction and return the data stage.
fn control_read(usb: &mut Stack, classes: &mut Classes, setup: [u8; 8]) -> Vec<u8> {
    usb.driver_mut().host_setup(setup);
    usb.poll(classes);

    let mut data = Vec::new();
    while let Some((_pid, chunk)) = usb.driver_mut().host_read_in(0) {
        data.extend_from_slice(&chunk);
        usb.poll(classes);
    }
    // Status stage.
    if usb.driver_mut().host_write_out(0, &[]) {
        usb.poll(classes);
    }
    data
}

/// Run a data-less OUT control transaction (status stage only).
fn control_write_status(usb: &mut Stack, classes: &mut Classes, setup: [u8; 8]) {
    usb.driver_mut().host_setup(setup);
    usb.poll(classes);
    let zlp = usb.driver_mut().host_read_in(0);
    assert!(matches!(zlp, Some((1, ref d)) if d.is_empty()), "expected DATA1 status ZLP");
    usb.poll(classes);
}

#[test]
fn device_descriptor_truncated_to_wlength() {
    let (mut usb, _) = build_stack();
    // GET_DESCRIPTOR(DEVICE, wLength = 8): the classic first probe.
    let data = control_read(&mut usb, &mut [], setup_in(0x06, 0x0100, 0, 8));
    assert_eq!(data, &[0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 64]);
}

#[test]
fn string_descriptors() {
    let (mut usb, _) = build_stack();
    usb.strings_mut().add("Acme").unwrap();
    let product = usb.strings_mut().add("ABC").unwrap();
    assert_eq!(product, 2);

    let lang = control_read(&mut usb, &mut [], setup_in(0x06, 0x0300, 0, 255));
    assert_eq!(lang, &[0x04, 0x03, 0x09, 0x04]);

    let s = control_read(&mut usb, &mut [], setup_in(0x06, 0x0302, 0, 255));
    assert_eq!(s, &[0x08, 0x03, b'A', 0, b'B', 0, b'C', 0]);
}

#[test]
fn configuration_descriptor_header_then_full() {
    let (mut usb, _) = build_stack();

    let header = control_read(&mut usb, &mut [], setup_in(0x06, 0x0200, 0, 9));
    assert_eq!(header.len(), 9);
    let total = u16::from_le_bytes([header[2], header[3]]);
    // Interface (9) + config (9) + one endpoint (7).
    assert_eq!(total, 25);

    let full = control_read(&mut usb, &mut [], setup_in(0x06, 0x0200, 0, total));
    assert_eq!(full.len(), total as usize);
    assert_eq!(full[..9], header[..]);
    // Walk by bLength; the stream must cover wTotalLength exactly.
    let mut at = 0;
    while at < full.len() {
        at += full[at] as usize;
    }
    assert_eq!(at, full.len());
}

#[test]
fn unsupported_descriptors_stall_ep0() {
    let (mut usb, _) = build_stack();
    for desc_type in [0x06u16, 0x09, 0x0a] {
        // DEVICE_QUALIFIER, OTG, DEBUG
        usb.driver_mut().host_setup(setup_in(0x06, desc_type << 8, 0, 255));
        usb.poll(&mut []);
        assert!(usb.is_stalled(EndpointAddress::new(0, UsbDirection::In)));
        assert!(usb.is_stalled(EndpointAddress::new(0, UsbDirection::Out)));
        assert!(usb.driver_mut().host_read_in(0).is_none());
    }
}

#[test]
fn set_address_commits_after_status_stage() {
    let (mut usb, _) = build_stack();
    usb.driver_mut().host_setup(setup_out(0x05, 5, 0));
    usb.poll(&mut []);
    // The register must not change before the host collects the status.
    assert_eq!(usb.driver().address, 0);

    let zlp = usb.driver_mut().host_read_in(0).expect("status ZLP armed");
    assert_eq!(zlp.0, 1);
    assert!(zlp.1.is_empty());
    usb.poll(&mut []);
    assert_eq!(usb.driver().address, 5);

    // Journal ordering: commit strictly between the status read and the
    // next SETUP.
    usb.driver_mut().host_setup(setup_in(0x06, 0x0100, 0, 8));
    usb.poll(&mut []);
    let journal = &usb.driver().journal;
    let read_at = journal.iter().position(|op| *op == MockOp::HostReadIn(0, 0)).unwrap();
    let commit_at = journal.iter().position(|op| *op == MockOp::SetAddress(5)).unwrap();
    let next_setup_at = journal.iter().rposition(|op| *op == MockOp::HostSetup).unwrap();
    assert!(read_at < commit_at && commit_at < next_setup_at);
}

#[test]
fn configuration_lifecycle_enables_endpoints() {
    let (mut usb, bulk_in) = build_stack();
    assert!(!usb.driver().is_enabled(bulk_in));

    control_write_status(&mut usb, &mut [], setup_out(0x09, 1, 0));
    assert_eq!(usb.active_configuration(), 1);
    assert!(usb.driver().is_enabled(bulk_in));

    let got = control_read(&mut usb, &mut [], setup_in(0x08, 0, 0, 1));
    assert_eq!(got, &[1]);

    control_write_status(&mut usb, &mut [], setup_out(0x09, 0, 0));
    assert_eq!(usb.active_configuration(), 0);
    assert!(!usb.driver().is_enabled(bulk_in));
}

#[test]
fn endpoint_halt_feature_and_toggle() {
    let (mut usb, bulk_in) = build_stack();
    control_write_status(&mut usb, &mut [], setup_out(0x09, 1, 0));

    // SET_FEATURE(ENDPOINT_HALT) on 0x81.
    let ep_index = bulk_in.to_byte() as u16;
    control_write_status(&mut usb, &mut [], setup_out_endpoint(0x03, 0, ep_index));
    assert!(usb.is_stalled(bulk_in));

    // GET_STATUS reflects the halt.
    let status = control_read(&mut usb, &mut [], {
        let mut s = setup_in(0x00, 0, ep_index, 2);
        s[0] = 0x82; // endpoint recipient
        s
    });
    assert_eq!(status, &[1, 0]);

    // CLEAR_FEATURE un-halts and resets the toggle to DATA0.
    control_write_status(&mut usb, &mut [], setup_out_endpoint(0x01, 0, ep_index));
    assert!(!usb.is_stalled(bulk_in));
    assert_eq!(usb.endpoint_next_pid(bulk_in), 0);
}

#[test]
fn bus_reset_clears_configuration() {
    let (mut usb, bulk_in) = build_stack();
    control_write_status(&mut usb, &mut [], setup_out(0x09, 1, 0));
    control_write_status(&mut usb, &mut [], setup_out(0x05, 9, 0));
    usb.driver_mut().host_read_in(0);
    usb.poll(&mut []);
    assert_eq!(usb.driver().address, 9);

    usb.driver_mut().host_bus_reset();
    usb.poll(&mut []);
    assert_eq!(usb.driver().address, 0);
    assert_eq!(usb.active_configuration(), 0);
    assert!(!usb.driver().is_enabled(bulk_in));
}

#[test]
fn ms_os_descriptor_set_served_on_vendor_request() {
    let (mut usb, _) = build_stack();
    let set = MsOs20DescriptorSet::new(1, 0).unwrap();
    let total = set.total_length();
    let cap = MsOs20Capability { total_length: total, vendor_code: 0x20, alt_enum_code: 0 };

    let mut bos = usbd_core::descriptor::Bos::new();
    bos.add_capability(&cap).unwrap();
    usb.device_mut().set_bos(bos);
    usb.set_ms_os_descriptors(set, 0x20);

    // BOS is readable.
    let bos_bytes = control_read(&mut usb, &mut [], setup_in(0x06, 0x0f00, 0, 255));
    assert_eq!(bos_bytes[0], 5);
    assert_eq!(bos_bytes[1], 0x0f);
    assert_eq!(bos_bytes.len(), 5 + 28);

    // Vendor request with the advertised code returns the whole set.
    let mut setup = setup_in(0x20, 0, MS_OS_20_DESCRIPTOR_INDEX, total);
    setup[0] = 0xc0; // vendor, device recipient
    let blob = control_read(&mut usb, &mut [], setup);
    assert_eq!(blob.len(), total as usize);
    assert_eq!(u16::from_le_bytes([blob[0], blob[1]]), 10);
}
