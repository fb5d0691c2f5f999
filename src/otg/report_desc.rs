//! HID Report Descriptor and device identity of the emulated gamepad

/// Gamepad HID Report Descriptor
///
/// Report format (8 bytes input):
///   [0-1] Buttons (14 bits) + padding (2 bits)
///   [2]   Hat switch (4 bits, 0-7, null state 8+) + padding (4 bits)
///   [3-6] X, Y, Z, Rz (8 bits each, 0-255)
///   [7]   Vendor byte (constant)
pub const GAMEPAD: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Game Pad)
    0xA1, 0x01, // Collection (Application)
    // Buttons (14 bits)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x35, 0x00, //   Physical Minimum (0)
    0x45, 0x01, //   Physical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x0E, //   Report Count (14)
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x0E, //   Usage Maximum (14)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Padding (2 bits)
    0x95, 0x02, //   Report Count (2)
    0x81, 0x01, //   Input (Constant)
    // Hat switch
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x25, 0x07, //   Logical Maximum (7)
    0x46, 0x3B, 0x01, // Physical Maximum (315)
    0x75, 0x04, //   Report Size (4)
    0x95, 0x01, //   Report Count (1)
    0x65, 0x14, //   Unit (Eng Rot: Degrees)
    0x09, 0x39, //   Usage (Hat switch)
    0x81, 0x42, //   Input (Data, Variable, Absolute, Null State)
    0x65, 0x00, //   Unit (None)
    // Padding (4 bits)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x01, //   Input (Constant)
    // Sticks
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x46, 0xFF, 0x00, // Physical Maximum (255)
    0x09, 0x30, //   Usage (X)
    0x09, 0x31, //   Usage (Y)
    0x09, 0x32, //   Usage (Z)
    0x09, 0x35, //   Usage (Rz)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x04, //   Report Count (4)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Vendor byte
    0x75, 0x08, //   Report Size (8)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x01, //   Input (Constant)
    0xC0, // End Collection
];

/// USB Vendor ID (HORI)
pub const USB_VENDOR_ID: u16 = 0x0f0d;

/// USB Product ID (HORIPAD S)
pub const USB_PRODUCT_ID: u16 = 0x00c1;

/// USB spec version (USB 2.0)
pub const USB_BCD_USB: u16 = 0x0200;

/// Device release number
pub const USB_BCD_DEVICE: u16 = 0x0572;

pub const MANUFACTURER: &str = "HORI CO.,LTD.";

pub const PRODUCT: &str = "HORIPAD S";

/// Interface string (functionfs string table)
pub const INTERFACE: &str = "HID Interface";

/// Configuration power budget in mA
pub const MAX_POWER_MA: u16 = 250;

/// Identity the gadget presents to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_usb: u16,
    pub bcd_device: u16,
    pub manufacturer: String,
    pub product: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_id: USB_VENDOR_ID,
            product_id: USB_PRODUCT_ID,
            bcd_usb: USB_BCD_USB,
            bcd_device: USB_BCD_DEVICE,
            manufacturer: MANUFACTURER.to_string(),
            product: PRODUCT.to_string(),
        }
    }
}
