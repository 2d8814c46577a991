//! The Bulk-Only Transport state machine and SCSI command dispatch.

use packing::{Packed, PackedSize};

use usbd_core::descriptor::Interface;
use usbd_core::{
    EndpointAddress, EndpointType, Recipient, SetupPacket, UsbClass, UsbDriver, UsbStack,
};

use crate::block_device::BlockDevice;
use crate::bot::{BotState, CommandBlockWrapper, CommandStatus, CommandStatusWrapper};
use crate::scsi::{
    additional_sense, InquiryResponse, ModeSense6Command, ModeSense6Response, OpCode,
    PreventAllowMediumRemovalCommand, Read10Command, ReadCapacity10Response,
    ReadFormatCapacitiesResponse, RequestSenseResponse, SenseKey, StartStopUnitCommand,
    Write10Command,
};
use crate::{
    INTERFACE_CLASS_MSC, INTERFACE_PROTOCOL_BOT, INTERFACE_SUBCLASS_SCSI_TRANSPARENT,
    MSC_BLOCK_SIZE, REQUEST_BOT_RESET, REQUEST_GET_MAX_LUN,
};

/// A mass storage function: one interface, two bulk endpoints and the
/// state shared between interrupt context and the foreground poll.
///
/// The interrupt side ([`UsbClass`] events) only latches received packets
/// and keeps the OUT pipe flowing; every state transition happens in
/// [`handle_request`](Self::handle_request), which must be called from a
/// tight foreground loop or task.
pub struct MscBot<B: BlockDevice> {
    interface: u8,
    ep_in: EndpointAddress,
    ep_out: EndpointAddress,

    state: BotState,
    csw: CommandStatusWrapper,
    sense: RequestSenseResponse,
    inquiry: InquiryResponse,
    block_device: B,
    ready: bool,
    max_lun: u8,

    /// Block received from the host, handed from IRQ to foreground.
    /// While `buffer_out_len` is nonzero the OUT endpoint NAKs, so the
    /// buffer cannot be overwritten before the foreground consumed it.
    buffer_out: [u8; MSC_BLOCK_SIZE],
    buffer_out_len: u16,
    buffer_in: [u8; MSC_BLOCK_SIZE],

    blocks_to_transfer: u16,
    blocks_transferred: u16,
    lba: u32,
}

impl<B: BlockDevice> MscBot<B> {
    /// Attach a mass storage function to the configuration at
    /// `config_position`: MSC class, SCSI transparent command set, BOT
    /// protocol, with one bulk endpoint pair.
    pub fn new<D: UsbDriver>(
        usb: &mut UsbStack<D>,
        config_position: u8,
        block_device: B,
    ) -> usbd_core::Result<Self> {
        assert!(B::BLOCK_BYTES == MSC_BLOCK_SIZE);

        let interface = usb
            .device_mut()
            .configuration_mut(config_position)
            .ok_or(usbd_core::UsbError::InvalidParameter)?
            .add_interface(Interface::new(
                INTERFACE_CLASS_MSC,
                INTERFACE_SUBCLASS_SCSI_TRANSPARENT,
                INTERFACE_PROTOCOL_BOT,
            ))?;

        let ep_in = usb.create_endpoint(
            config_position,
            interface,
            usbd_core::UsbDirection::In,
            EndpointType::Bulk,
            64,
            0,
        )?;
        let ep_out = usb.create_endpoint(
            config_position,
            interface,
            usbd_core::UsbDirection::Out,
            EndpointType::Bulk,
            64,
            0,
        )?;

        Ok(MscBot {
            interface,
            ep_in,
            ep_out,
            state: BotState::ReceiveCbw,
            csw: CommandStatusWrapper::default(),
            sense: RequestSenseResponse::default(),
            inquiry: InquiryResponse::default(),
            block_device,
            ready: true,
            max_lun: 0,
            buffer_out: [0; MSC_BLOCK_SIZE],
            buffer_out_len: 0,
            buffer_in: [0; MSC_BLOCK_SIZE],
            blocks_to_transfer: 0,
            blocks_transferred: 0,
            lba: 0,
        })
    }

    pub fn set_vendor_id(&mut self, s: &str) {
        self.inquiry.set_vendor_id(s);
    }

    pub fn set_product_id(&mut self, s: &str) {
        self.inquiry.set_product_id(s);
    }

    pub fn set_product_rev(&mut self, s: &str) {
        self.inquiry.set_product_rev(s);
    }

    /// Medium availability, reflected in TEST UNIT READY sense data.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn block_device(&self) -> &B {
        &self.block_device
    }

    pub fn block_device_mut(&mut self) -> &mut B {
        &mut self.block_device
    }

    fn scsi_fail(&mut self, key: SenseKey, code: (u8, u8)) {
        self.sense.set(key, code);
        self.csw.data_residue = 0;
        self.csw.status = CommandStatus::CommandError;
    }

    /// Consume the latched OUT block and let new packets flow in.
    fn consume_out<D: UsbDriver>(&mut self, usb: &mut UsbStack<D>) {
        self.buffer_out_len = 0;
        usb.send_nak(self.ep_out, false);
    }

    /// Advance the transport state machine. Call from the foreground in a
    /// tight loop; each call performs at most one step.
    pub fn handle_request<D: UsbDriver>(&mut self, usb: &mut UsbStack<D>) {
        match self.state {
            BotState::ReceiveCbw => {
                if self.buffer_out_len == 0 {
                    return;
                }
                log::debug!("BOT state: RECEIVE_CBW");
                let len = self.buffer_out_len as usize;

                if !CommandBlockWrapper::is_valid(&self.buffer_out[..len]) {
                    // MSC 6.6.1: stall both bulk pipes and wait for the
                    // host's reset recovery; stay in RECEIVE_CBW.
                    log::warn!("Invalid CBW ({} bytes)", len);
                    usb.send_stall(self.ep_in, true);
                    usb.send_stall(self.ep_out, true);
                    self.consume_out(usb);
                    return;
                }
                let cbw = match CommandBlockWrapper::unpack(&self.buffer_out[..CommandBlockWrapper::BYTES]) {
                    Ok(cbw) => cbw,
                    Err(_) => {
                        usb.send_stall(self.ep_in, true);
                        usb.send_stall(self.ep_out, true);
                        self.consume_out(usb);
                        return;
                    }
                };

                // Seed the CSW; commands override status on failure.
                self.csw = CommandStatusWrapper {
                    tag: cbw.tag,
                    ..CommandStatusWrapper::default()
                };
                self.state = BotState::SendCsw;
                self.process_scsi_command(usb, &cbw);
                self.consume_out(usb);
            }
            BotState::SendCsw => {
                if usb.is_active(self.ep_in) {
                    return;
                }
                log::debug!("BOT state: SEND_CSW");
                let mut raw = [0u8; CommandStatusWrapper::BYTES];
                if self.csw.pack(&mut raw).is_ok() {
                    let _ = usb.start_transfer(self.ep_in, &raw);
                }
                self.state = BotState::ReceiveCbw;
            }
            BotState::DataRead => {
                if usb.is_active(self.ep_in) {
                    return;
                }
                log::debug!("BOT state: DATA_READ");
                let result = self.block_device.read_block(self.lba, &mut self.buffer_in);
                let _ = usb.start_transfer(self.ep_in, &self.buffer_in);
                self.lba += 1;
                self.blocks_transferred += 1;
                if self.blocks_transferred == self.blocks_to_transfer {
                    self.state = BotState::SendCsw;
                }
                if result.is_err() {
                    self.scsi_fail(SenseKey::NotReady, additional_sense::MEDIUM_NOT_PRESENT);
                }
            }
            BotState::DataWrite => {
                if self.buffer_out_len == 0 {
                    return;
                }
                log::debug!("BOT state: DATA_WRITE");
                let len = self.buffer_out_len as usize;
                if len != MSC_BLOCK_SIZE {
                    log::warn!("Partial block of {} bytes", len);
                }
                let result = {
                    let block = &self.buffer_out[..MSC_BLOCK_SIZE];
                    self.block_device.write_block(self.lba, block)
                };
                self.lba += 1;
                self.blocks_transferred += 1;
                if self.blocks_transferred == self.blocks_to_transfer {
                    self.state = BotState::SendCsw;
                }
                if result.is_err() {
                    self.scsi_fail(SenseKey::MediumError, additional_sense::MEDIUM_NOT_PRESENT);
                }
                self.consume_out(usb);
            }
        }
    }

    fn process_scsi_command<D: UsbDriver>(&mut self, usb: &mut UsbStack<D>, cbw: &CommandBlockWrapper) {
        let expected = cbw.data_transfer_length as usize;
        let mut response = [0u8; 64];
        let mut response_len = 0usize;

        match OpCode::try_from(cbw.cb[0]) {
            Ok(OpCode::TestUnitReady) => {
                log::info!("SCSI: TEST_UNIT_READY");
                if self.ready {
                    self.sense.reset();
                } else {
                    self.sense.set(SenseKey::NotReady, additional_sense::NOT_READY);
                }
            }
            Ok(OpCode::RequestSense) => {
                log::info!("SCSI: REQUEST_SENSE");
                response_len = RequestSenseResponse::BYTES;
                let _ = self.sense.pack(&mut response[..response_len]);
            }
            Ok(OpCode::Inquiry) => {
                log::info!("SCSI: INQUIRY");
                response_len = InquiryResponse::BYTES;
                let _ = self.inquiry.pack(&mut response[..response_len]);
            }
            Ok(OpCode::ModeSense6) => {
                log::info!("SCSI: MODE_SENSE_6");
                let _ = ModeSense6Command::unpack(&cbw.cb[..6]);
                let header = ModeSense6Response {
                    write_protect: !self.block_device.is_writable(),
                    ..ModeSense6Response::default()
                };
                response_len = ModeSense6Response::BYTES;
                let _ = header.pack(&mut response[..response_len]);
                if !self.ready {
                    self.csw.status = CommandStatus::CommandError;
                }
            }
            Ok(OpCode::StartStopUnit) => {
                log::info!("SCSI: START_STOP_UNIT");
                if let Ok(cmd) = StartStopUnitCommand::unpack(&cbw.cb[..6]) {
                    // Eject handling is left to the callback; the ready
                    // flag is not touched here.
                    self.block_device.start_stop(cmd.start, cmd.load_eject);
                }
                if !self.ready {
                    self.csw.status = CommandStatus::CommandError;
                }
            }
            Ok(OpCode::PreventAllowMediumRemoval) => {
                log::info!("SCSI: PREVENT_ALLOW_MEDIUM_REMOVAL");
                if let Ok(cmd) = PreventAllowMediumRemovalCommand::unpack(&cbw.cb[..6]) {
                    self.block_device.prevent_removal(cmd.prevent != 0);
                }
                if !self.ready {
                    self.csw.status = CommandStatus::CommandError;
                }
            }
            Ok(OpCode::ReadCapacity10) => {
                let cap = ReadCapacity10Response {
                    last_lba: self.block_device.max_lba(),
                    block_size: B::BLOCK_BYTES as u32,
                };
                log::info!("SCSI: READ_CAPACITY_10 (last lba {})", cap.last_lba);
                response_len = ReadCapacity10Response::BYTES;
                let _ = cap.pack(&mut response[..response_len]);
                if !self.ready {
                    self.csw.status = CommandStatus::CommandError;
                }
            }
            Ok(OpCode::ReadFormatCapacities) => {
                log::info!("SCSI: READ_FORMAT_CAPACITIES");
                let rfc = ReadFormatCapacitiesResponse {
                    capacity_list_length: 8,
                    number_of_blocks: self.block_device.max_lba() + 1,
                    descriptor_code: 2, // formatted media
                    block_length: B::BLOCK_BYTES as u32,
                };
                response_len = ReadFormatCapacitiesResponse::BYTES;
                let _ = rfc.pack(&mut response[..response_len]);
                if !self.ready {
                    self.csw.status = CommandStatus::CommandError;
                }
            }
            Ok(OpCode::Read10) => {
                match Read10Command::unpack(&cbw.cb[..10]) {
                    Ok(cmd) => {
                        log::info!("SCSI: READ_10 ({} blocks at {})", cmd.transfer_length, cmd.lba);
                        self.blocks_to_transfer = cmd.transfer_length;
                        self.blocks_transferred = 0;
                        self.lba = cmd.lba;
                        self.state = BotState::DataRead;
                        if !self.ready {
                            self.scsi_fail(SenseKey::NotReady, additional_sense::NOT_READY);
                            self.state = BotState::SendCsw;
                        }
                    }
                    Err(_) => {
                        self.scsi_fail(SenseKey::IllegalRequest, additional_sense::INVALID_FIELD_IN_CDB);
                    }
                }
            }
            Ok(OpCode::Write10) => {
                match Write10Command::unpack(&cbw.cb[..10]) {
                    Ok(cmd) => {
                        if !self.block_device.is_writable() {
                            log::warn!("SCSI: write on write-protected device");
                            self.scsi_fail(SenseKey::DataProtect, additional_sense::WRITE_PROTECTED);
                            return;
                        }
                        if !self.ready {
                            self.scsi_fail(SenseKey::NotReady, additional_sense::NOT_READY);
                            return;
                        }
                        log::info!("SCSI: WRITE_10 ({} blocks at {})", cmd.transfer_length, cmd.lba);
                        self.blocks_to_transfer = cmd.transfer_length;
                        self.blocks_transferred = 0;
                        self.lba = cmd.lba;
                        self.state = BotState::DataWrite;
                    }
                    Err(_) => {
                        self.scsi_fail(SenseKey::IllegalRequest, additional_sense::INVALID_FIELD_IN_CDB);
                    }
                }
            }
            Err(_) => {
                log::error!(
                    "Unrecognized SCSI command 0x{:02x} (tag {:x}, len {}, cb len {})",
                    cbw.cb[0],
                    cbw.tag,
                    cbw.data_transfer_length,
                    cbw.cb_length
                );
                self.scsi_fail(SenseKey::IllegalRequest, additional_sense::INVALID_COMMAND);
            }
        }

        // Commands answered inline (no data state entered): reconcile the
        // response with what the host expected.
        if self.state == BotState::SendCsw {
            if expected > 0 {
                if response_len > 0 {
                    if response_len > expected {
                        response_len = expected;
                    }
                    self.csw.data_residue = (expected - response_len) as u32;
                    let _ = usb.start_transfer(self.ep_in, &response[..response_len]);
                } else {
                    log::warn!("SCSI response expected but none produced");
                    self.csw.status = CommandStatus::CommandError;
                }
            } else if response_len > 0 {
                // MSC 6.7.1: the host expected no data stage.
                log::warn!("SCSI response produced but none expected");
                self.csw.status = CommandStatus::CommandError;
            }
        }
    }
}

impl<B: BlockDevice, D: UsbDriver> UsbClass<D> for MscBot<B> {
    fn on_reset(&mut self, _usb: &mut UsbStack<D>) {
        self.state = BotState::ReceiveCbw;
        self.buffer_out_len = 0;
        self.sense.reset();
    }

    fn on_configured(&mut self, usb: &mut UsbStack<D>) {
        // Ask for exactly one block: a larger request could swallow a
        // trailing CBW into the block transfer without a packet boundary
        // to split them.
        let _ = usb.start_receive(self.ep_out, MSC_BLOCK_SIZE as u16);
    }

    fn setup(&mut self, usb: &mut UsbStack<D>, setup: &SetupPacket) -> bool {
        if setup.recipient != Recipient::Interface || setup.index != self.interface as u16 {
            return false;
        }
        match setup.request {
            REQUEST_BOT_RESET => {
                log::info!("MSC: BOT reset");
                // Per BOT 3.1 the bulk stall state and data toggles stay
                // untouched; only the transport restarts.
                self.state = BotState::ReceiveCbw;
                self.buffer_out_len = 0;
                true
            }
            REQUEST_GET_MAX_LUN => {
                log::info!("MSC: get max LUN");
                let max_lun = [self.max_lun];
                let _ = usb.control_in(setup, &max_lun);
                true
            }
            _ => {
                log::error!("Unsupported MSC request 0x{:02x}", setup.request);
                false
            }
        }
    }

    fn on_out_complete(&mut self, usb: &mut UsbStack<D>, addr: EndpointAddress, len: u16) {
        if addr != self.ep_out {
            return;
        }
        if self.buffer_out_len != 0 {
            log::warn!("Unconsumed MSC data overwritten");
        }
        // Hold the host off until the foreground consumed this block,
        // then rearm so reception resumes the moment NAK clears.
        usb.send_nak(self.ep_out, true);
        let n = (len as usize).min(MSC_BLOCK_SIZE);
        self.buffer_out[..n].copy_from_slice(&usb.received(addr)[..n]);
        self.buffer_out_len = len;
        let _ = usb.start_receive(self.ep_out, MSC_BLOCK_SIZE as u16);
    }
}
