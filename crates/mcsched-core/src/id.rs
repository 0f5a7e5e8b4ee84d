//! Module and envelope identifier types

use core::fmt;
use crate::constants::MAX_MODULES;

/// Destination identifier of a registered component's inbox
///
/// A small stable integer in `0..MAX_MODULES`. The maximum value
/// (`u16::MAX`) is reserved as a sentinel for "no module".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ModuleId(u16);

impl ModuleId {
    /// Sentinel value indicating no module
    pub const NONE: ModuleId = ModuleId(u16::MAX);

    /// System queue: scheduler timers and system messages
    pub const SYS: ModuleId = ModuleId(0);

    /// Umbrella queue shared by legacy and callback-carrying firmware messages
    pub const TARGET_IF: ModuleId = ModuleId(1);

    /// OS interface queue: callback-only messages
    pub const OS_IF: ModuleId = ModuleId(2);

    /// Legacy firmware-command destination, funnelled into `TARGET_IF`
    pub const LEGACY_WMA: ModuleId = ModuleId(3);

    /// First id not reserved by the scheduler itself
    pub const FIRST_CLIENT: u16 = 8;

    #[inline]
    pub const fn new(id: u16) -> Self {
        ModuleId(id)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// True when the id addresses a slot of the module table
    #[inline]
    pub const fn is_valid(self) -> bool {
        (self.0 as usize) < MAX_MODULES
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u16::MAX
    }

    /// Name of a scheduler-reserved module, if this is one
    pub const fn reserved_name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("SYS"),
            1 => Some("TARGET_IF"),
            2 => Some("OS_IF"),
            3 => Some("LEGACY_WMA"),
            _ => None,
        }
    }
}

impl From<u16> for ModuleId {
    #[inline]
    fn from(id: u16) -> Self {
        ModuleId(id)
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_none(), self.reserved_name()) {
            (true, _) => write!(f, "ModuleId(NONE)"),
            (false, Some(name)) => write!(f, "ModuleId({})", name),
            (false, None) => write!(f, "ModuleId({})", self.0),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_none(), self.reserved_name()) {
            (true, _) => write!(f, "none"),
            (false, Some(name)) => write!(f, "{}", name),
            (false, None) => write!(f, "{}", self.0),
        }
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        ModuleId::NONE
    }
}

/// Index of an envelope slot inside the pool arena
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct EnvelopeId(u32);

impl EnvelopeId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        EnvelopeId(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_id_validity() {
        assert!(ModuleId::SYS.is_valid());
        assert!(ModuleId::new((MAX_MODULES - 1) as u16).is_valid());
        assert!(!ModuleId::new(MAX_MODULES as u16).is_valid());
        assert!(!ModuleId::NONE.is_valid());
        assert!(ModuleId::NONE.is_none());
    }

    #[test]
    fn test_module_id_display() {
        assert_eq!(format!("{}", ModuleId::TARGET_IF), "TARGET_IF");
        assert_eq!(format!("{}", ModuleId::new(12)), "12");
        assert_eq!(format!("{:?}", ModuleId::NONE), "ModuleId(NONE)");
    }

    #[test]
    fn test_reserved_ids_below_first_client() {
        for id in [ModuleId::SYS, ModuleId::TARGET_IF, ModuleId::OS_IF, ModuleId::LEGACY_WMA] {
            assert!(id.as_u16() < ModuleId::FIRST_CLIENT);
            assert!(id.reserved_name().is_some());
        }
        assert!(ModuleId::new(ModuleId::FIRST_CLIENT).reserved_name().is_none());
    }
}
