//! Compile-time sizing knobs.
//!
//! Everything here bounds a statically allocated table. The defaults suit a
//! composite device with a handful of interfaces; bigger trees only need
//! these constants raised.

/// Maximum number of entries in the string table. One entry is implicitly
/// used for the language-ID descriptor at index 0.
pub const MAX_STRINGS: usize = 10;

/// Size of the scratch buffer used to serialize descriptors on endpoint 0.
/// Bounds the total configuration descriptor size.
pub const MAX_DESC_SIZE: usize = 256;

/// Maximum number of configurations per device.
pub const MAX_CONF_PER_DEVICE: usize = 5;

/// Maximum number of interfaces per configuration.
pub const MAX_INTERF_PER_CONF: usize = 5;

/// Maximum number of interface associations per configuration.
pub const MAX_ASSOC_PER_CONF: usize = 5;

/// Maximum number of endpoints per interface.
pub const MAX_EP_PER_INTERFACE: usize = 5;

/// Maximum number of functional descriptors chained to one interface.
pub const MAX_FUNC_DESC_PER_INTERFACE: usize = 8;

/// Maximum serialized size of a single functional descriptor.
pub const MAX_FUNC_DESC_SIZE: usize = 32;

/// Maximum serialized size of a single BOS device capability.
pub const MAX_CAPABILITY_SIZE: usize = 32;

/// Maximum number of device capabilities in the BOS.
pub const MAX_BOS_CAPABILITIES: usize = 2;

/// Default wMaxPacketSize for full-speed bulk and control endpoints.
pub const DEFAULT_PACKET_SIZE: u16 = 64;

/// Default bInterval for interrupt endpoints, in frames.
pub const DEFAULT_POLL_INTERVAL: u8 = 10;

/// Number of runtime endpoint slots (one per active (index, direction)
/// pair, endpoint 0 needs two). Each slot carries a staging buffer of
/// [`MAX_TRANSFER_SIZE`] bytes.
pub const MAX_ENDPOINTS: usize = 8;

/// Largest single transfer the engine will fragment. Sized for one mass
/// storage block; the control pipe and CDC data path need less.
pub const MAX_TRANSFER_SIZE: usize = 512;

/// Maximum size of the assembled Microsoft OS 2.0 descriptor set.
pub const MS_OS_20_MAX_SIZE: usize = 256;
