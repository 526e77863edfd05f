//! Acceptance filter bank configuration.
//!
//! Each of the 14 banks holds two 32-bit filter words whose meaning is
//! selected per bank: one 32-bit or two 16-bit filters, in identifier-mask
//! or identifier-list mode. The types here build the register words; the
//! receive engine programs them inside a filter-init transaction.

use crate::id::{ExtendedId, Id, StandardId};
use crate::Fifo;

const F32_RTR: u32 = 1 << 1;
const F32_IDE: u32 = 1 << 2;
const F32_EXTENDED_SHIFT: u32 = 3;
const F32_STANDARD_SHIFT: u32 = 21;

const F16_IDE: u16 = 1 << 3;
const F16_RTR: u16 = 1 << 4;
const F16_STANDARD_SHIFT: u16 = 5;

/// A 32-bit filter bank entry with an identifier and a mask.
///
/// Bits set in the mask must match the identifier; a mask of 0 accepts
/// every frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mask32 {
    id: u32,
    mask: u32,
}

impl Mask32 {
    /// Creates a filter that accepts all frames.
    pub fn accept_all() -> Self {
        Mask32 { id: 0, mask: 0 }
    }

    /// Creates a filter that accepts frames with the given standard
    /// identifier, masked by `mask` (both data and remote frames).
    pub fn frames_with_std_id(id: StandardId, mask: StandardId) -> Self {
        Mask32 {
            id: u32::from(id.as_raw()) << F32_STANDARD_SHIFT,
            mask: u32::from(mask.as_raw()) << F32_STANDARD_SHIFT | F32_IDE,
        }
    }

    /// Creates a filter that accepts frames with the given extended
    /// identifier, masked by `mask` (both data and remote frames).
    pub fn frames_with_ext_id(id: ExtendedId, mask: ExtendedId) -> Self {
        Mask32 {
            id: id.as_raw() << F32_EXTENDED_SHIFT | F32_IDE,
            mask: mask.as_raw() << F32_EXTENDED_SHIFT | F32_IDE,
        }
    }

    /// Restricts the filter to data frames.
    pub fn data_frames_only(&mut self) -> &mut Self {
        self.id &= !F32_RTR;
        self.mask |= F32_RTR;
        self
    }

    /// Restricts the filter to remote frames.
    pub fn remote_frames_only(&mut self) -> &mut Self {
        self.id |= F32_RTR;
        self.mask |= F32_RTR;
        self
    }
}

/// A 32-bit filter bank entry matching a single identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ListEntry32(u32);

impl ListEntry32 {
    /// Creates a list entry accepting data frames with the identifier.
    pub fn data_frames_with_id(id: impl Into<Id>) -> Self {
        ListEntry32(id_to_f32(id.into()))
    }

    /// Creates a list entry accepting remote frames with the identifier.
    pub fn remote_frames_with_id(id: impl Into<Id>) -> Self {
        ListEntry32(id_to_f32(id.into()) | F32_RTR)
    }
}

/// A 16-bit filter bank entry with an identifier and a mask.
///
/// 16-bit filters only match standard identifiers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mask16 {
    id: u16,
    mask: u16,
}

impl Mask16 {
    /// Creates a filter that accepts all standard-identifier frames.
    pub fn accept_all() -> Self {
        Mask16 { id: 0, mask: 0 }
    }

    /// Creates a filter that accepts frames with the given standard
    /// identifier, masked by `mask` (both data and remote frames).
    pub fn frames_with_std_id(id: StandardId, mask: StandardId) -> Self {
        Mask16 {
            id: id.as_raw() << F16_STANDARD_SHIFT,
            mask: mask.as_raw() << F16_STANDARD_SHIFT | F16_IDE,
        }
    }

    /// Restricts the filter to data frames.
    pub fn data_frames_only(&mut self) -> &mut Self {
        self.id &= !F16_RTR;
        self.mask |= F16_RTR;
        self
    }

    /// Restricts the filter to remote frames.
    pub fn remote_frames_only(&mut self) -> &mut Self {
        self.id |= F16_RTR;
        self.mask |= F16_RTR;
        self
    }
}

/// A 16-bit filter bank entry matching a single standard identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ListEntry16(u16);

impl ListEntry16 {
    /// Creates a list entry accepting data frames with the identifier.
    pub fn data_frames_with_id(id: StandardId) -> Self {
        ListEntry16(id.as_raw() << F16_STANDARD_SHIFT)
    }

    /// Creates a list entry accepting remote frames with the identifier.
    pub fn remote_frames_with_id(id: StandardId) -> Self {
        ListEntry16(id.as_raw() << F16_STANDARD_SHIFT | F16_RTR)
    }
}

fn id_to_f32(id: Id) -> u32 {
    match id {
        Id::Standard(id) => u32::from(id.as_raw()) << F32_STANDARD_SHIFT,
        Id::Extended(id) => id.as_raw() << F32_EXTENDED_SHIFT | F32_IDE,
    }
}

/// The contents of one filter bank; the variant selects mode and scale.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BankConfig {
    /// One 32-bit identifier/mask pair.
    Mask32(Mask32),
    /// Two 32-bit identifiers.
    List32([ListEntry32; 2]),
    /// Two 16-bit identifier/mask pairs.
    Mask16([Mask16; 2]),
    /// Four 16-bit identifiers.
    List16([ListEntry16; 4]),
}

impl BankConfig {
    /// `true` for identifier-list mode, `false` for identifier-mask mode.
    pub(crate) fn is_list_mode(&self) -> bool {
        matches!(self, BankConfig::List32(_) | BankConfig::List16(_))
    }

    /// `true` for 32-bit scale, `false` for 16-bit scale.
    pub(crate) fn is_32bit_scale(&self) -> bool {
        matches!(self, BankConfig::Mask32(_) | BankConfig::List32(_))
    }

    /// Encodes the configuration into the bank's two filter words.
    pub(crate) fn to_words(self) -> (u32, u32) {
        match self {
            BankConfig::Mask32(f) => (f.id, f.mask),
            BankConfig::List32([a, b]) => (a.0, b.0),
            BankConfig::Mask16([a, b]) => (
                u32::from(a.mask) << 16 | u32::from(a.id),
                u32::from(b.mask) << 16 | u32::from(b.id),
            ),
            BankConfig::List16([a, b, c, d]) => (
                u32::from(b.0) << 16 | u32::from(a.0),
                u32::from(d.0) << 16 | u32::from(c.0),
            ),
        }
    }
}

impl From<Mask32> for BankConfig {
    fn from(f: Mask32) -> Self {
        BankConfig::Mask32(f)
    }
}

impl From<[ListEntry32; 2]> for BankConfig {
    fn from(f: [ListEntry32; 2]) -> Self {
        BankConfig::List32(f)
    }
}

impl From<[Mask16; 2]> for BankConfig {
    fn from(f: [Mask16; 2]) -> Self {
        BankConfig::Mask16(f)
    }
}

impl From<[ListEntry16; 4]> for BankConfig {
    fn from(f: [ListEntry16; 4]) -> Self {
        BankConfig::List16(f)
    }
}

/// Number of filter banks on a single-CAN device.
pub const FILTER_BANK_COUNT: u8 = 14;

/// A filter bank programming request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxFilter {
    /// Bank index, `0..14`.
    pub index: u8,
    /// The FIFO frames accepted by this bank are routed to.
    pub fifo: Fifo,
    /// Mode, scale and filter values.
    pub config: BankConfig,
}

impl RxFilter {
    /// Creates a programming request for bank `index`.
    pub fn new(index: u8, fifo: Fifo, config: impl Into<BankConfig>) -> Self {
        RxFilter {
            index,
            fifo,
            config: config.into(),
        }
    }

    /// Creates a pass-all request for bank `index`.
    pub fn accept_all(index: u8, fifo: Fifo) -> Self {
        RxFilter::new(index, fifo, Mask32::accept_all())
    }
}
