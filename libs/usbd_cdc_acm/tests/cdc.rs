//! Serial-port behavior over the mock wire: line coding, flow control,
//! packet delimiting and the descriptor layout.

use usbd_cdc_acm::{CdcAcm, CDC_ACM_FIFO_SIZE};
use usbd_core::descriptor::Configuration;
use usbd_core::testing::MockDriver;
use usbd_core::{EndpointAddress, UsbClass, UsbDirection, UsbStack};

struct Rig {
    usb: UsbStack<MockDriver>,
    cdc: CdcAcm,
}

// Endpoint indexes as allocated: notify = 1 IN, bulk = 2 IN, 1 OUT.
const EP_NOTIFY: u8 = 1;
const EP_BULK_IN: u8 = 2;
const EP_BULK_OUT: u8 = 1;

impl Rig {
    fn new() -> Self {
        let mut usb = UsbStack::new(MockDriver::new()).unwrap();
        usb.device_mut().add_configuration(Configuration::new(1)).unwrap();
        let cdc = CdcAcm::new(&mut usb, 0).unwrap();
        let mut rig = Rig { usb, cdc };

        rig.usb.driver_mut().host_setup([0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        rig.poll();
        rig.usb.driver_mut().host_read_in(0);
        rig.poll();
        rig
    }

    fn poll(&mut self) {
        let Rig { usb, cdc } = self;
        usb.poll(&mut [cdc as &mut dyn UsbClass<MockDriver>]);
    }

    fn bulk_out_addr(&self) -> EndpointAddress {
        EndpointAddress::new(EP_BULK_OUT, UsbDirection::Out)
    }
}

#[test]
fn configuration_descriptor_contains_the_function() {
    let rig = Rig::new();
    let config = rig.usb.device().configuration(0).unwrap();
    let mut buf = [0u8; 256];
    let len = config.serialize(&mut buf).unwrap();
    assert_eq!(len, config.total_length() as usize);

    // Walk the stream: expect 1 IAD, 2 interfaces, 4 functional
    // descriptors and 3 endpoints.
    let (mut iads, mut ifaces, mut funcs, mut eps) = (0, 0, 0, 0);
    let mut at = 0;
    while at < len {
        match buf[at + 1] {
            0x0b => iads += 1,
            0x04 => ifaces += 1,
            0x24 => funcs += 1,
            0x05 => eps += 1,
            _ => {}
        }
        at += buf[at] as usize;
    }
    assert_eq!((iads, ifaces, funcs, eps), (1, 2, 4, 3));
}

#[test]
fn line_coding_set_and_get() {
    let mut rig = Rig::new();

    // SET_LINE_CODING: 9600 8N1, delivered in the data stage.
    rig.usb.driver_mut().host_setup([0x21, 0x20, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00]);
    rig.poll();
    assert!(rig.usb.driver_mut().host_write_out(0, &[0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]));
    rig.poll();
    // Status stage ZLP from the device.
    let zlp = rig.usb.driver_mut().host_read_in(0).unwrap();
    assert!(zlp.1.is_empty());
    rig.poll();

    assert_eq!(rig.cdc.line_coding().data_rate, 9600);
    assert_eq!(rig.cdc.line_coding().data_bits, 8);

    // GET_LINE_CODING returns the same block.
    rig.usb.driver_mut().host_setup([0xa1, 0x21, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00]);
    rig.poll();
    let (_pid, data) = rig.usb.driver_mut().host_read_in(0).unwrap();
    assert_eq!(data.as_slice(), &[0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]);
}

#[test]
fn control_line_state_sets_dtr_rts() {
    let mut rig = Rig::new();
    assert!(!rig.cdc.dtr());

    rig.usb.driver_mut().host_setup([0x21, 0x22, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
    rig.poll();
    // Data-less OUT request: the stack acknowledges with a ZLP.
    let zlp = rig.usb.driver_mut().host_read_in(0).unwrap();
    assert!(zlp.1.is_empty());

    assert!(rig.cdc.dtr());
    assert!(rig.cdc.rts());
}

#[test]
fn tx_drains_fifo_in_packets() {
    let mut rig = Rig::new();
    let Rig { usb, cdc } = &mut rig;
    let queued = cdc.write(usb, b"hello world");
    assert_eq!(queued, 11);

    let (_pid, data) = rig.usb.driver_mut().host_read_in(EP_BULK_IN).unwrap();
    assert_eq!(data.as_slice(), b"hello world");
    rig.poll();
    // Short packet: no ZLP follows.
    assert!(rig.usb.driver_mut().host_read_in(EP_BULK_IN).is_none());
}

#[test]
fn exact_packet_write_is_followed_by_zlp() {
    let mut rig = Rig::new();
    let payload = [0x55u8; 64];
    {
        let Rig { usb, cdc } = &mut rig;
        assert_eq!(cdc.write(usb, &payload), 64);
    }

    let (_pid, data) = rig.usb.driver_mut().host_read_in(EP_BULK_IN).unwrap();
    assert_eq!(data.len(), 64);
    rig.poll();

    let (_pid, zlp) = rig.usb.driver_mut().host_read_in(EP_BULK_IN).expect("delimiting ZLP");
    assert!(zlp.is_empty());
    rig.poll();
    assert!(rig.usb.driver_mut().host_read_in(EP_BULK_IN).is_none());
}

#[test]
fn large_write_fragments_across_packets() {
    let mut rig = Rig::new();
    let mut payload = [0u8; 200];
    for (i, b) in payload.iter_mut().enumerate() {
        *b = i as u8;
    }
    {
        let Rig { usb, cdc } = &mut rig;
        assert_eq!(cdc.write(usb, &payload), 200);
    }

    let mut data = Vec::new();
    while let Some((_pid, chunk)) = rig.usb.driver_mut().host_read_in(EP_BULK_IN) {
        let short = chunk.len() < 64;
        data.extend_from_slice(&chunk);
        rig.poll();
        if short {
            break;
        }
    }
    assert_eq!(data.len(), 200);
    assert!(data.iter().enumerate().all(|(i, b)| *b == i as u8));
}

#[test]
fn rx_flow_control_nak_until_drained() {
    let mut rig = Rig::new();

    // Fill the RX FIFO with full packets.
    let packet = [0xaau8; 64];
    for _ in 0..CDC_ACM_FIFO_SIZE / 64 {
        assert!(rig.usb.driver_mut().host_write_out(EP_BULK_OUT, &packet));
        rig.poll();
    }
    assert_eq!(rig.cdc.available(), CDC_ACM_FIFO_SIZE);

    // The pipe is paused now: no room for another full packet.
    assert!(rig.usb.driver().is_nak(rig.bulk_out_addr()));
    assert!(!rig.usb.driver_mut().host_write_out(EP_BULK_OUT, &packet));

    // Draining the FIFO reopens reception.
    let mut buf = [0u8; CDC_ACM_FIFO_SIZE];
    let n = {
        let Rig { usb, cdc } = &mut rig;
        cdc.read(usb, &mut buf)
    };
    assert_eq!(n, CDC_ACM_FIFO_SIZE);
    assert!(buf.iter().all(|b| *b == 0xaa));

    assert!(!rig.usb.driver().is_nak(rig.bulk_out_addr()));
    assert!(rig.usb.driver_mut().host_write_out(EP_BULK_OUT, &packet));
    rig.poll();
    assert_eq!(rig.cdc.available(), 64);
}

#[test]
fn serial_state_notification_on_change() {
    let mut rig = Rig::new();
    {
        let Rig { usb, cdc } = &mut rig;
        cdc.set_serial_state(usb, 0x0003);
    }

    let (_pid, packet) = rig.usb.driver_mut().host_read_in(EP_NOTIFY).expect("notification");
    assert_eq!(packet.len(), 10);
    assert_eq!(packet[0], 0xa1);
    assert_eq!(packet[1], 0x20);
    assert_eq!(u16::from_le_bytes([packet[6], packet[7]]), 2);
    assert_eq!(u16::from_le_bytes([packet[8], packet[9]]), 0x0003);
    rig.poll();

    // Unchanged state sends nothing.
    {
        let Rig { usb, cdc } = &mut rig;
        cdc.set_serial_state(usb, 0x0003);
    }
    assert!(rig.usb.driver_mut().host_read_in(EP_NOTIFY).is_none());
}
