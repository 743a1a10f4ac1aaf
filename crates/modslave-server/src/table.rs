use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// One of the four Modbus data tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    #[serde(rename = "COILS")]
    Coils,
    #[serde(rename = "HREGS")]
    HoldingRegisters,
    #[serde(rename = "ISTS")]
    DiscreteInputs,
    #[serde(rename = "IREGS")]
    InputRegisters,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Coils,
        Table::HoldingRegisters,
        Table::DiscreteInputs,
        Table::InputRegisters,
    ];

    /// Read-only tables never accept writes from a master.
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::DiscreteInputs | Self::InputRegisters)
    }

    pub const fn holds_bits(self) -> bool {
        matches!(self, Self::Coils | Self::DiscreteInputs)
    }

    /// Key used by the declarative register configuration.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Coils => "COILS",
            Self::HoldingRegisters => "HREGS",
            Self::DiscreteInputs => "ISTS",
            Self::InputRegisters => "IREGS",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Coils => 0,
            Self::HoldingRegisters => 1,
            Self::DiscreteInputs => 2,
            Self::InputRegisters => 3,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coils => "coils",
            Self::HoldingRegisters => "holding registers",
            Self::DiscreteInputs => "discrete inputs",
            Self::InputRegisters => "input registers",
        };
        f.write_str(name)
    }
}

/// Values held by a register: booleans for bit tables, words for register tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterValues {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

impl RegisterValues {
    pub fn empty_for(table: Table) -> Self {
        if table.holds_bits() {
            Self::Bits(Vec::new())
        } else {
            Self::Words(Vec::new())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bits(bits) => bits.len(),
            Self::Words(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether these values have the element type stored by `table`.
    pub fn fits(&self, table: Table) -> bool {
        matches!(self, Self::Bits(_)) == table.holds_bits()
    }

    pub fn as_bits(&self) -> Option<&[bool]> {
        match self {
            Self::Bits(bits) => Some(bits),
            Self::Words(_) => None,
        }
    }

    pub fn as_words(&self) -> Option<&[u16]> {
        match self {
            Self::Words(words) => Some(words),
            Self::Bits(_) => None,
        }
    }

    pub fn into_bits(self) -> Option<Vec<bool>> {
        match self {
            Self::Bits(bits) => Some(bits),
            Self::Words(_) => None,
        }
    }

    pub fn into_words(self) -> Option<Vec<u16>> {
        match self {
            Self::Words(words) => Some(words),
            Self::Bits(_) => None,
        }
    }

    pub(crate) fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Self::Bits(bits) => Self::Bits(bits[range].to_vec()),
            Self::Words(words) => Self::Words(words[range].to_vec()),
        }
    }

    pub(crate) fn extend(&mut self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bits(dst), Self::Bits(src)) => dst.extend_from_slice(src),
            (Self::Words(dst), Self::Words(src)) => dst.extend_from_slice(src),
            _ => return false,
        }
        true
    }

    /// Copies `src[range]` over `self` starting at `at`.
    pub(crate) fn overlay(&mut self, at: usize, src: &Self, range: Range<usize>) -> bool {
        let len = range.len();
        match (self, src) {
            (Self::Bits(dst), Self::Bits(src)) => dst[at..at + len].copy_from_slice(&src[range]),
            (Self::Words(dst), Self::Words(src)) => dst[at..at + len].copy_from_slice(&src[range]),
            _ => return false,
        }
        true
    }
}

impl From<Vec<bool>> for RegisterValues {
    fn from(bits: Vec<bool>) -> Self {
        Self::Bits(bits)
    }
}

impl From<Vec<u16>> for RegisterValues {
    fn from(words: Vec<u16>) -> Self {
        Self::Words(words)
    }
}

impl From<bool> for RegisterValues {
    fn from(bit: bool) -> Self {
        Self::Bits(vec![bit])
    }
}

impl From<u16> for RegisterValues {
    fn from(word: u16) -> Self {
        Self::Words(vec![word])
    }
}
