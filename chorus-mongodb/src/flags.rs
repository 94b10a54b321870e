//! Behavior flags controlling codec policy.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// A bitset of codec and operation behaviors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BehaviorFlags(u32);

impl BehaviorFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Decode eligible keys into interned symbols.
    pub const SLOTIFY: Self = Self(0x1);
    /// Mark symbolic strings with a leading colon.
    pub const COLONIZE: Self = Self(0x2);
    /// Read arrays as choices and write choices without a sentinel.
    pub const PREFCHOICES: Self = Self(0x4);
    /// The current field is a choice-slot.
    pub const CHOICESLOT: Self = Self(0x8);
    /// The current field stores symbols as bare lower-case strings.
    pub const SYMSLOT: Self = Self(0x10);
    /// The current field's key is a raw string.
    pub const RAWSLOT: Self = Self(0x20);
    /// Fail instead of waiting when no pooled connection is free.
    pub const NOBLOCK: Self = Self(0x10000);
    /// Log every operation.
    pub const LOGOPS: Self = Self(0x20000);
    /// The default policy: slotify and colonize.
    pub const DEFAULTS: Self = Self(0x1 | 0x2);

    const NAMES: &'static [(Self, &'static str)] = &[
        (Self::SLOTIFY, "slotify"),
        (Self::COLONIZE, "colonize"),
        (Self::PREFCHOICES, "prefchoices"),
        (Self::CHOICESLOT, "choiceslot"),
        (Self::SYMSLOT, "symslot"),
        (Self::RAWSLOT, "rawslot"),
        (Self::NOBLOCK, "noblock"),
        (Self::LOGOPS, "logops"),
    ];

    /// Flags from a raw bitmask.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw bitmask.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set.
    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flags are set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Set or clear `flag`.
    pub fn set(&mut self, flag: Self, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    /// Copy with `flag` set.
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    /// Copy with `flag` cleared.
    pub const fn without(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }

    /// Flags for a field whose key is a raw string.
    ///
    /// Raw keys get no colon marking, no choice or symbol slot treatment,
    /// and no generic array-as-choice reading.
    pub const fn for_raw_key(self) -> Self {
        self.with(Self::RAWSLOT)
            .without(Self::PREFCHOICES)
            .without(Self::COLONIZE)
            .without(Self::CHOICESLOT)
            .without(Self::SYMSLOT)
    }

    /// Flags to hand down to nested values: per-field markers are cleared.
    pub const fn for_children(self) -> Self {
        self.without(Self::CHOICESLOT)
            .without(Self::SYMSLOT)
            .without(Self::RAWSLOT)
    }

    /// Look up a flag by its option name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "slotify" => Some(Self::SLOTIFY),
            "colonize" => Some(Self::COLONIZE),
            "prefchoices" => Some(Self::PREFCHOICES),
            "choiceslot" => Some(Self::CHOICESLOT),
            "symslot" => Some(Self::SYMSLOT),
            "noblock" => Some(Self::NOBLOCK),
            "logops" => Some(Self::LOGOPS),
            _ => None,
        }
    }
}

impl BitOr for BehaviorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BehaviorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for BehaviorFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for BehaviorFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for BehaviorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "BehaviorFlags({:#x}: {})", self.0, names.join("|"))
    }
}
