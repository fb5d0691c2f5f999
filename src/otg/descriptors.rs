//! USB descriptor builders
//!
//! Every descriptor is a `#[repr(C, packed)]` struct with fixed field widths,
//! turned into bytes with `bytemuck`. Multi-byte fields are stored
//! little-endian at construction time.

use bytemuck::{Pod, Zeroable};

use super::report_desc::DeviceIdentity;

pub const USB_DT_DEVICE: u8 = 0x01;
pub const USB_DT_CONFIG: u8 = 0x02;
pub const USB_DT_STRING: u8 = 0x03;
pub const USB_DT_INTERFACE: u8 = 0x04;
pub const USB_DT_ENDPOINT: u8 = 0x05;
pub const USB_DT_HID: u8 = 0x21;
pub const USB_DT_REPORT: u8 = 0x22;

pub const USB_CLASS_HID: u8 = 0x03;
pub const USB_DIR_IN: u8 = 0x80;
pub const USB_ENDPOINT_XFER_INT: u8 = 0x03;
pub const USB_CONFIG_ATT_ONE: u8 = 0x80;

/// US English
pub const LANG_EN_US: u16 = 0x0409;

/// Interrupt IN endpoint (device to host reports)
pub const EP_IN_ADDRESS: u8 = 1 | USB_DIR_IN;
/// Interrupt OUT endpoint (host to device)
pub const EP_OUT_ADDRESS: u8 = 2;
pub const EP_MAX_PACKET: u16 = 64;
pub const EP_INTERVAL: u8 = 5;

const BCD_HID: u16 = 0x0111;

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DeviceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ConfigDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
    pub i_configuration: u8,
    pub bm_attributes: u8,
    pub b_max_power: u8,
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct InterfaceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_interface_number: u8,
    pub b_alternate_setting: u8,
    pub b_num_endpoints: u8,
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub i_interface: u8,
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct HidDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_hid: u16,
    pub b_country_code: u8,
    pub b_num_descriptors: u8,
    pub b_report_descriptor_type: u8,
    pub w_report_descriptor_length: u16,
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct EndpointDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_endpoint_address: u8,
    pub bm_attributes: u8,
    pub w_max_packet_size: u16,
    pub b_interval: u8,
}

pub const DEVICE_DESC_LEN: usize = std::mem::size_of::<DeviceDescriptor>();
pub const CONFIG_DESC_LEN: usize = std::mem::size_of::<ConfigDescriptor>();
pub const INTERFACE_DESC_LEN: usize = std::mem::size_of::<InterfaceDescriptor>();
pub const HID_DESC_LEN: usize = std::mem::size_of::<HidDescriptor>();
pub const ENDPOINT_DESC_LEN: usize = std::mem::size_of::<EndpointDescriptor>();

const _: () = assert!(DEVICE_DESC_LEN == 18);
const _: () = assert!(CONFIG_DESC_LEN == 9);
const _: () = assert!(INTERFACE_DESC_LEN == 9);
const _: () = assert!(HID_DESC_LEN == 9);
const _: () = assert!(ENDPOINT_DESC_LEN == 7);

/// Interface + HID + IN endpoint + OUT endpoint
pub const FUNCTION_DESC_LEN: usize =
    INTERFACE_DESC_LEN + HID_DESC_LEN + 2 * ENDPOINT_DESC_LEN;

/// Configuration descriptor followed by the function descriptors
pub const CONFIG_TOTAL_LEN: usize = CONFIG_DESC_LEN + FUNCTION_DESC_LEN;

/// Number of descriptors in one speed's function list
pub const FUNCTION_DESC_COUNT: u32 = 4;

/// Device descriptor
///
/// gadgetfs replaces bMaxPacketSize0 with the controller's ep0 size, 0xff
/// marks it as "fill in".
pub fn device_descriptor(identity: &DeviceIdentity) -> [u8; DEVICE_DESC_LEN] {
    bytemuck::cast(DeviceDescriptor {
        b_length: DEVICE_DESC_LEN as u8,
        b_descriptor_type: USB_DT_DEVICE,
        bcd_usb: identity.bcd_usb.to_le(),
        b_device_class: 0,
        b_device_sub_class: 0,
        b_device_protocol: 0,
        b_max_packet_size0: 0xff,
        id_vendor: identity.vendor_id.to_le(),
        id_product: identity.product_id.to_le(),
        bcd_device: identity.bcd_device.to_le(),
        i_manufacturer: 1,
        i_product: 2,
        i_serial_number: 0,
        b_num_configurations: 1,
    })
}

pub fn config_descriptor(max_power_ma: u16) -> [u8; CONFIG_DESC_LEN] {
    bytemuck::cast(ConfigDescriptor {
        b_length: CONFIG_DESC_LEN as u8,
        b_descriptor_type: USB_DT_CONFIG,
        w_total_length: (CONFIG_TOTAL_LEN as u16).to_le(),
        b_num_interfaces: 1,
        b_configuration_value: 1,
        i_configuration: 0,
        bm_attributes: USB_CONFIG_ATT_ONE,
        // bMaxPower is in 2 mA units
        b_max_power: (max_power_ma / 2).min(u8::MAX as u16) as u8,
    })
}

pub fn interface_descriptor(i_interface: u8) -> [u8; INTERFACE_DESC_LEN] {
    bytemuck::cast(InterfaceDescriptor {
        b_length: INTERFACE_DESC_LEN as u8,
        b_descriptor_type: USB_DT_INTERFACE,
        b_interface_number: 0,
        b_alternate_setting: 0,
        b_num_endpoints: 2,
        b_interface_class: USB_CLASS_HID,
        b_interface_sub_class: 0,
        b_interface_protocol: 0,
        i_interface,
    })
}

pub fn hid_descriptor(report_len: u16) -> [u8; HID_DESC_LEN] {
    bytemuck::cast(HidDescriptor {
        b_length: HID_DESC_LEN as u8,
        b_descriptor_type: USB_DT_HID,
        bcd_hid: BCD_HID.to_le(),
        b_country_code: 0,
        b_num_descriptors: 1,
        b_report_descriptor_type: USB_DT_REPORT,
        w_report_descriptor_length: report_len.to_le(),
    })
}

pub fn interrupt_endpoint(address: u8) -> [u8; ENDPOINT_DESC_LEN] {
    bytemuck::cast(EndpointDescriptor {
        b_length: ENDPOINT_DESC_LEN as u8,
        b_descriptor_type: USB_DT_ENDPOINT,
        b_endpoint_address: address,
        bm_attributes: USB_ENDPOINT_XFER_INT,
        w_max_packet_size: EP_MAX_PACKET.to_le(),
        b_interval: EP_INTERVAL,
    })
}

/// Interface, HID class and both endpoint descriptors, in enumeration order
pub fn function_descriptors(report_len: u16, i_interface: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(FUNCTION_DESC_LEN);
    out.extend_from_slice(&interface_descriptor(i_interface));
    out.extend_from_slice(&hid_descriptor(report_len));
    out.extend_from_slice(&interrupt_endpoint(EP_IN_ADDRESS));
    out.extend_from_slice(&interrupt_endpoint(EP_OUT_ADDRESS));
    out
}

/// Full configuration: config descriptor + function descriptors
pub fn configuration(report_len: u16, max_power_ma: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(CONFIG_TOTAL_LEN);
    out.extend_from_slice(&config_descriptor(max_power_ma));
    out.extend(function_descriptors(report_len, 0));
    out
}

/// String descriptor: `[len, STRING, utf16le...]`
pub fn string_descriptor(text: &str) -> Vec<u8> {
    let utf16: Vec<u16> = text.encode_utf16().take(126).collect();
    let mut out = Vec::with_capacity(2 + utf16.len() * 2);
    out.push((2 + utf16.len() * 2) as u8);
    out.push(USB_DT_STRING);
    for unit in utf16 {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// String descriptor zero: the supported language list
pub fn language_table() -> [u8; 4] {
    let [lo, hi] = LANG_EN_US.to_le_bytes();
    [4, USB_DT_STRING, lo, hi]
}

/// FunctionFS ep0 blobs
pub mod ffs {
    use super::*;

    const DESCRIPTORS_MAGIC_V2: u32 = 3;
    const STRINGS_MAGIC: u32 = 2;
    const HAS_FS_DESC: u32 = 1;
    const HAS_HS_DESC: u32 = 2;

    /// v2 descriptor blob with identical full-speed and high-speed lists
    pub fn descriptors(report_len: u16) -> Vec<u8> {
        let function = function_descriptors(report_len, 1);
        let length = 5 * 4 + 2 * function.len();

        let mut out = Vec::with_capacity(length);
        out.extend_from_slice(&DESCRIPTORS_MAGIC_V2.to_le_bytes());
        out.extend_from_slice(&(length as u32).to_le_bytes());
        out.extend_from_slice(&(HAS_FS_DESC | HAS_HS_DESC).to_le_bytes());
        out.extend_from_slice(&FUNCTION_DESC_COUNT.to_le_bytes());
        out.extend_from_slice(&FUNCTION_DESC_COUNT.to_le_bytes());
        out.extend_from_slice(&function);
        out.extend_from_slice(&function);
        out
    }

    /// String table for one language, NUL-terminated strings
    pub fn strings(lang: u16, strings: &[&str]) -> Vec<u8> {
        let body: usize = strings.iter().map(|s| s.len() + 1).sum();
        let length = 4 * 4 + 2 + body;

        let mut out = Vec::with_capacity(length);
        out.extend_from_slice(&STRINGS_MAGIC.to_le_bytes());
        out.extend_from_slice(&(length as u32).to_le_bytes());
        out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&lang.to_le_bytes());
        for s in strings {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        out
    }
}

/// gadgetfs ep0 / endpoint configuration blobs
pub mod gadgetfs {
    use super::*;

    /// ep0: tag 0, full-speed config, high-speed config, device descriptor
    pub fn device_config(identity: &DeviceIdentity, report_len: u16, max_power_ma: u16) -> Vec<u8> {
        let config = configuration(report_len, max_power_ma);
        let mut out = Vec::with_capacity(4 + 2 * config.len() + DEVICE_DESC_LEN);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&config);
        out.extend_from_slice(&config);
        out.extend_from_slice(&device_descriptor(identity));
        out
    }

    /// Data endpoint: tag 1, full-speed and high-speed endpoint descriptor
    pub fn endpoint_config(address: u8) -> Vec<u8> {
        let desc = interrupt_endpoint(address);
        let mut out = Vec::with_capacity(4 + 2 * ENDPOINT_DESC_LEN);
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&desc);
        out.extend_from_slice(&desc);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::report_desc::GAMEPAD;

    #[test]
    fn test_device_descriptor_layout() {
        let desc = device_descriptor(&DeviceIdentity::default());
        assert_eq!(
            desc,
            [
                0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0xff, 0x0d, 0x0f, 0xc1, 0x00, 0x72,
                0x05, 0x01, 0x02, 0x00, 0x01
            ]
        );
    }

    #[test]
    fn test_configuration_layout() {
        let config = configuration(GAMEPAD.len() as u16, 250);
        assert_eq!(config.len(), 0x29);
        assert_eq!(&config[..9], &[0x09, 0x02, 0x29, 0x00, 0x01, 0x01, 0x00, 0x80, 125]);
        // HID class descriptor points at the 80-byte report descriptor
        assert_eq!(&config[18..27], &[0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 80, 0x00]);
        assert_eq!(&config[27..34], &[0x07, 0x05, 0x81, 0x03, 0x40, 0x00, 0x05]);
        assert_eq!(&config[34..41], &[0x07, 0x05, 0x02, 0x03, 0x40, 0x00, 0x05]);
    }

    #[test]
    fn test_string_descriptor() {
        assert_eq!(string_descriptor("HORI"), vec![10, 3, b'H', 0, b'O', 0, b'R', 0, b'I', 0]);
        assert_eq!(language_table(), [4, 3, 0x09, 0x04]);
    }

    #[test]
    fn test_ffs_blobs() {
        let descs = ffs::descriptors(80);
        assert_eq!(descs.len(), 20 + 2 * FUNCTION_DESC_LEN);
        assert_eq!(&descs[0..4], &3u32.to_le_bytes());
        assert_eq!(&descs[4..8], &(descs.len() as u32).to_le_bytes());
        // iInterface refers to the first string of the table
        assert_eq!(descs[20 + 8], 1);

        let strings = ffs::strings(LANG_EN_US, &["HID Interface"]);
        assert_eq!(&strings[4..8], &(strings.len() as u32).to_le_bytes());
        assert_eq!(&strings[16..18], &[0x09, 0x04]);
        assert_eq!(strings.last(), Some(&0));
    }

    #[test]
    fn test_gadgetfs_blobs() {
        let blob = gadgetfs::device_config(&DeviceIdentity::default(), 80, 250);
        assert_eq!(blob.len(), 4 + 2 * CONFIG_TOTAL_LEN + DEVICE_DESC_LEN);
        assert_eq!(&blob[..4], &[0, 0, 0, 0]);
        assert_eq!(blob[4 + CONFIG_TOTAL_LEN..][..2], [0x09, 0x02]);

        let ep = gadgetfs::endpoint_config(EP_IN_ADDRESS);
        assert_eq!(ep, [1, 0, 0, 0, 7, 5, 0x81, 3, 64, 0, 5, 7, 5, 0x81, 3, 64, 0, 5]);
    }
}
