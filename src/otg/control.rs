//! Control endpoint (ep0) handling for the HID gadget
//!
//! Both gadget backends read fixed 12-byte event records from ep0. The record
//! layouts differ (functionfs puts a one-byte type after the setup packet,
//! gadgetfs a 32-bit one), but the setup requests are answered by the same
//! [`HidControl`] state machine.

use std::fmt;

use tracing::{debug, trace};

use super::descriptors::{
    hid_descriptor, language_table, string_descriptor, USB_DIR_IN, USB_DT_HID, USB_DT_REPORT,
    USB_DT_STRING,
};
use crate::error::{AppError, Result};

/// Size of one ep0 event record (both protocols)
pub const EVENT_SIZE: usize = 12;

pub const USB_TYPE_MASK: u8 = 0x60;
pub const USB_TYPE_STANDARD: u8 = 0x00;
pub const USB_TYPE_CLASS: u8 = 0x20;
pub const USB_RECIP_MASK: u8 = 0x1f;
pub const USB_RECIP_DEVICE: u8 = 0x00;
pub const USB_RECIP_INTERFACE: u8 = 0x01;
pub const USB_RECIP_ENDPOINT: u8 = 0x02;

pub const USB_REQ_GET_STATUS: u8 = 0x00;
pub const USB_REQ_CLEAR_FEATURE: u8 = 0x01;
pub const USB_REQ_SET_FEATURE: u8 = 0x03;
pub const USB_REQ_GET_DESCRIPTOR: u8 = 0x06;
pub const USB_REQ_SET_CONFIGURATION: u8 = 0x09;
pub const USB_REQ_SET_INTERFACE: u8 = 0x0b;

pub const HID_REQ_SET_IDLE: u8 = 0x0a;

const USB_ENDPOINT_HALT: u16 = 0;

/// 8-byte USB control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn parse(raw: &[u8; 8]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let [v0, v1] = self.value.to_le_bytes();
        let [i0, i1] = self.index.to_le_bytes();
        let [l0, l1] = self.length.to_le_bytes();
        [self.request_type, self.request, v0, v1, i0, i1, l0, l1]
    }

    /// Device-to-host data stage
    pub fn is_in(&self) -> bool {
        self.request_type & USB_DIR_IN != 0
    }

    pub fn kind(&self) -> u8 {
        self.request_type & USB_TYPE_MASK
    }

    pub fn recipient(&self) -> u8 {
        self.request_type & USB_RECIP_MASK
    }

    /// Descriptor type of a GET_DESCRIPTOR request
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }

    pub fn descriptor_index(&self) -> u8 {
        (self.value & 0xff) as u8
    }
}

impl fmt::Display for SetupPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bmRequestType={:#04x} bRequest={:#04x} wValue={:#06x} wIndex={:#06x} wLength={}",
            self.request_type, self.request, self.value, self.index, self.length
        )
    }
}

fn split_record(record: &[u8]) -> Result<([u8; 8], &[u8])> {
    if record.len() != EVENT_SIZE {
        return Err(AppError::ProtocolViolation(format!(
            "ep0 event record is {} bytes, expected {}",
            record.len(),
            EVENT_SIZE
        )));
    }
    let mut setup = [0u8; 8];
    setup.copy_from_slice(&record[..8]);
    Ok((setup, &record[8..]))
}

/// functionfs ep0 event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfsEvent {
    Bind,
    Unbind,
    /// The host selected our configuration
    Enable,
    Disable,
    Setup(SetupPacket),
    Suspend,
    Resume,
    Unknown(u8),
}

impl FfsEvent {
    /// Decode `struct usb_functionfs_event`
    pub fn parse(record: &[u8]) -> Result<Self> {
        let (setup, tail) = split_record(record)?;
        Ok(match tail[0] {
            0 => FfsEvent::Bind,
            1 => FfsEvent::Unbind,
            2 => FfsEvent::Enable,
            3 => FfsEvent::Disable,
            4 => FfsEvent::Setup(SetupPacket::parse(&setup)),
            5 => FfsEvent::Suspend,
            6 => FfsEvent::Resume,
            other => FfsEvent::Unknown(other),
        })
    }
}

/// gadgetfs ep0 event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GadgetFsEvent {
    Nop,
    Connect,
    Disconnect,
    Setup(SetupPacket),
    Suspend,
    Unknown(u32),
}

impl GadgetFsEvent {
    /// Decode `struct usb_gadgetfs_event`
    pub fn parse(record: &[u8]) -> Result<Self> {
        let (setup, tail) = split_record(record)?;
        let kind = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        Ok(match kind {
            0 => GadgetFsEvent::Nop,
            1 => GadgetFsEvent::Connect,
            2 => GadgetFsEvent::Disconnect,
            3 => GadgetFsEvent::Setup(SetupPacket::parse(&setup)),
            4 => GadgetFsEvent::Suspend,
            other => GadgetFsEvent::Unknown(other),
        })
    }
}

/// Enumeration progress of the gadget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GadgetState {
    Unbound,
    DescriptorsInstalled,
    /// Bound to a UDC, waiting for the host to select the configuration
    Configured,
    EndpointsOpen,
    /// The host has taken at least one report
    Active,
}

impl fmt::Display for GadgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GadgetState::Unbound => "unbound",
            GadgetState::DescriptorsInstalled => "descriptors installed",
            GadgetState::Configured => "configured",
            GadgetState::EndpointsOpen => "endpoints open",
            GadgetState::Active => "active",
        };
        f.write_str(name)
    }
}

/// What the transport has to do on ep0 in answer to a setup request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Data stage: write these bytes
    Reply(Vec<u8>),
    /// Zero-length status stage
    Ack,
    /// Ack, then open the data endpoints
    Configure,
    /// Ack, then close the data endpoints
    Deconfigure,
    Stall,
}

/// HID function request handling and enumeration state
#[derive(Debug)]
pub struct HidControl {
    state: GadgetState,
    report_descriptor: &'static [u8],
    /// (manufacturer, product) when ep0 has to answer string requests itself
    strings: Option<(String, String)>,
    violations: u64,
}

impl HidControl {
    pub fn new(report_descriptor: &'static [u8]) -> Self {
        Self {
            state: GadgetState::Unbound,
            report_descriptor,
            strings: None,
            violations: 0,
        }
    }

    /// Answer GET_DESCRIPTOR(STRING) from ep0 (gadgetfs only)
    pub fn with_strings(mut self, manufacturer: &str, product: &str) -> Self {
        self.strings = Some((manufacturer.to_string(), product.to_string()));
        self
    }

    pub fn state(&self) -> GadgetState {
        self.state
    }

    /// Number of stalled (unexpected) requests
    pub fn violations(&self) -> u64 {
        self.violations
    }

    fn transition(&mut self, next: GadgetState) {
        if self.state != next {
            debug!("Gadget state: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    pub fn descriptors_installed(&mut self) {
        self.transition(GadgetState::DescriptorsInstalled);
    }

    pub fn bound(&mut self) {
        self.transition(GadgetState::Configured);
    }

    pub fn endpoints_opened(&mut self) {
        self.transition(GadgetState::EndpointsOpen);
    }

    /// Endpoints went away (host deconfigured, disabled or disconnected)
    pub fn endpoints_closed(&mut self) {
        if self.state > GadgetState::Configured {
            self.transition(GadgetState::Configured);
        }
    }

    /// First report delivered
    pub fn mark_active(&mut self) {
        if self.state == GadgetState::EndpointsOpen {
            self.transition(GadgetState::Active);
        }
    }

    pub fn unbound(&mut self) {
        self.transition(GadgetState::Unbound);
    }

    /// Decide how to answer one setup request
    pub fn on_setup(&mut self, setup: &SetupPacket) -> ControlAction {
        trace!("Setup request: {}", setup);

        let action = match (setup.kind(), setup.request) {
            (USB_TYPE_STANDARD, USB_REQ_GET_DESCRIPTOR) if setup.is_in() => {
                self.get_descriptor(setup)
            }
            (USB_TYPE_STANDARD, USB_REQ_SET_CONFIGURATION)
                if !setup.is_in() && setup.recipient() == USB_RECIP_DEVICE =>
            {
                match setup.value {
                    0 => ControlAction::Deconfigure,
                    1 => ControlAction::Configure,
                    _ => ControlAction::Stall,
                }
            }
            (USB_TYPE_STANDARD, USB_REQ_SET_INTERFACE) if setup.value == 0 => ControlAction::Ack,
            (USB_TYPE_STANDARD, USB_REQ_GET_STATUS)
                if setup.is_in()
                    && matches!(setup.recipient(), USB_RECIP_INTERFACE | USB_RECIP_ENDPOINT) =>
            {
                ControlAction::Reply(vec![0, 0])
            }
            (USB_TYPE_STANDARD, USB_REQ_CLEAR_FEATURE | USB_REQ_SET_FEATURE)
                if setup.recipient() == USB_RECIP_ENDPOINT && setup.value == USB_ENDPOINT_HALT =>
            {
                ControlAction::Ack
            }
            (USB_TYPE_CLASS, HID_REQ_SET_IDLE)
                if !setup.is_in() && setup.recipient() == USB_RECIP_INTERFACE =>
            {
                ControlAction::Ack
            }
            _ => ControlAction::Stall,
        };

        let action = match action {
            ControlAction::Reply(mut data) => {
                data.truncate(setup.length as usize);
                ControlAction::Reply(data)
            }
            other => other,
        };

        if action == ControlAction::Stall {
            self.violations += 1;
            debug!(
                "{}",
                AppError::ProtocolViolation(format!("unhandled control request ({})", setup))
            );
        }
        action
    }

    fn get_descriptor(&self, setup: &SetupPacket) -> ControlAction {
        match (setup.recipient(), setup.descriptor_type()) {
            (USB_RECIP_INTERFACE, USB_DT_REPORT) => {
                ControlAction::Reply(self.report_descriptor.to_vec())
            }
            (USB_RECIP_INTERFACE, USB_DT_HID) => {
                ControlAction::Reply(hid_descriptor(self.report_descriptor.len() as u16).to_vec())
            }
            (USB_RECIP_DEVICE, USB_DT_STRING) => match (&self.strings, setup.descriptor_index()) {
                (Some(_), 0) => ControlAction::Reply(language_table().to_vec()),
                (Some((manufacturer, _)), 1) => ControlAction::Reply(string_descriptor(manufacturer)),
                (Some((_, product)), 2) => ControlAction::Reply(string_descriptor(product)),
                _ => ControlAction::Stall,
            },
            _ => ControlAction::Stall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::report_desc::{GAMEPAD, MANUFACTURER, PRODUCT};

    fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> SetupPacket {
        SetupPacket {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    fn report_request(length: u16) -> SetupPacket {
        setup(0x81, USB_REQ_GET_DESCRIPTOR, 0x2200, 0, length)
    }

    fn bound_control() -> HidControl {
        let mut control = HidControl::new(GAMEPAD);
        control.descriptors_installed();
        control.bound();
        control
    }

    #[test]
    fn test_parse_setup_packet() {
        let raw = [0x81, 0x06, 0x00, 0x22, 0x00, 0x00, 0x50, 0x00];
        let packet = SetupPacket::parse(&raw);
        assert_eq!(packet, report_request(80));
        assert!(packet.is_in());
        assert_eq!(packet.recipient(), USB_RECIP_INTERFACE);
        assert_eq!(packet.descriptor_type(), USB_DT_REPORT);
        assert_eq!(packet.to_bytes(), raw);
    }

    #[test]
    fn test_parse_event_records() {
        let mut record = [0u8; EVENT_SIZE];
        record[..8].copy_from_slice(&report_request(64).to_bytes());
        record[8] = 4;
        assert_eq!(FfsEvent::parse(&record).unwrap(), FfsEvent::Setup(report_request(64)));

        record[8] = 3;
        assert_eq!(GadgetFsEvent::parse(&record).unwrap(), GadgetFsEvent::Setup(report_request(64)));

        record[8] = 2;
        assert_eq!(FfsEvent::parse(&record).unwrap(), FfsEvent::Enable);
        assert_eq!(GadgetFsEvent::parse(&record).unwrap(), GadgetFsEvent::Disconnect);

        assert!(FfsEvent::parse(&record[..8]).is_err());
    }

    #[test]
    fn test_report_descriptor_request() {
        let mut control = bound_control();
        assert_eq!(
            control.on_setup(&report_request(0x100)),
            ControlAction::Reply(GAMEPAD.to_vec())
        );
        // Truncated to wLength
        assert_eq!(
            control.on_setup(&report_request(9)),
            ControlAction::Reply(GAMEPAD[..9].to_vec())
        );
        assert_eq!(control.violations(), 0);
    }

    #[test]
    fn test_set_configuration_opens_endpoints() {
        let mut control = bound_control();
        assert_eq!(control.state(), GadgetState::Configured);

        let action = control.on_setup(&setup(0x00, USB_REQ_SET_CONFIGURATION, 1, 0, 0));
        assert_eq!(action, ControlAction::Configure);
        control.endpoints_opened();
        assert_eq!(control.state(), GadgetState::EndpointsOpen);

        control.mark_active();
        assert_eq!(control.state(), GadgetState::Active);

        let action = control.on_setup(&setup(0x00, USB_REQ_SET_CONFIGURATION, 0, 0, 0));
        assert_eq!(action, ControlAction::Deconfigure);
        control.endpoints_closed();
        assert_eq!(control.state(), GadgetState::Configured);
    }

    #[test]
    fn test_default_requests() {
        let mut control = bound_control();

        assert_eq!(
            control.on_setup(&setup(0x82, USB_REQ_GET_STATUS, 0, 0x81, 2)),
            ControlAction::Reply(vec![0, 0])
        );
        assert_eq!(
            control.on_setup(&setup(0x02, USB_REQ_CLEAR_FEATURE, 0, 0x81, 0)),
            ControlAction::Ack
        );
        assert_eq!(
            control.on_setup(&setup(0x21, HID_REQ_SET_IDLE, 0, 0, 0)),
            ControlAction::Ack
        );
        assert_eq!(control.violations(), 0);

        // Vendor request
        assert_eq!(control.on_setup(&setup(0xc0, 0x42, 0, 0, 4)), ControlAction::Stall);
        assert_eq!(control.violations(), 1);
    }

    #[test]
    fn test_string_requests() {
        let mut plain = bound_control();
        assert_eq!(
            plain.on_setup(&setup(0x80, USB_REQ_GET_DESCRIPTOR, 0x0301, 0x0409, 255)),
            ControlAction::Stall
        );

        let mut control = HidControl::new(GAMEPAD).with_strings(MANUFACTURER, PRODUCT);
        assert_eq!(
            control.on_setup(&setup(0x80, USB_REQ_GET_DESCRIPTOR, 0x0300, 0, 255)),
            ControlAction::Reply(vec![4, 3, 0x09, 0x04])
        );
        assert_eq!(
            control.on_setup(&setup(0x80, USB_REQ_GET_DESCRIPTOR, 0x0302, 0x0409, 255)),
            ControlAction::Reply(string_descriptor(PRODUCT))
        );
    }
}
