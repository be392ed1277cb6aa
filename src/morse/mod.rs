pub mod table;
pub mod timing;

pub use table::{
    character_to_representation, is_valid_representation, lookup_phonetic,
    lookup_procedural_character, representation_to_character,
};
pub use timing::{ReceiveParameters, SendParameters, TimingParameters};

use crate::error::{CwError, Result};

pub const DOT_SYMBOL: char = '.';
pub const DASH_SYMBOL: char = '-';

/// One keyed Morse element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Element {
    Dot,
    Dash,
}

impl Element {
    /// Nominal duration in units (1 unit = unweighted dot length)
    pub fn units(&self) -> u32 {
        match self {
            Element::Dot => 1,
            Element::Dash => 3,
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            Element::Dot => DOT_SYMBOL,
            Element::Dash => DASH_SYMBOL,
        }
    }

    pub fn from_symbol(symbol: char) -> Result<Self> {
        match symbol {
            DOT_SYMBOL => Ok(Element::Dot),
            DASH_SYMBOL => Ok(Element::Dash),
            other => Err(CwError::invalid(format!("'{}' is not a dot or dash", other))),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Element::Dot => Element::Dash,
            Element::Dash => Element::Dot,
        }
    }
}

/// Convert a representation string into elements
pub fn representation_elements(representation: &str) -> Result<Vec<Element>> {
    representation.chars().map(Element::from_symbol).collect()
}
