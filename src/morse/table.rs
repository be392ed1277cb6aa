//! Static Morse lookup tables.
//!
//! Representation lookups go through a hash of the dot/dash pattern into a
//! 256-slot array. Patterns longer than [`MAX_HASHED_LENGTH`] hash to zero and
//! fall back to a linear scan of the main table.

use std::sync::OnceLock;

use super::{DASH_SYMBOL, DOT_SYMBOL};
use crate::error::{CwError, Result};

/// Longest representation that fits the hash
pub const MAX_HASHED_LENGTH: usize = 7;

#[derive(Clone, Copy, Debug)]
pub struct MorseEntry {
    pub character: char,
    pub representation: &'static str,
}

const fn entry(character: char, representation: &'static str) -> MorseEntry {
    MorseEntry {
        character,
        representation,
    }
}

static MORSE_TABLE: &[MorseEntry] = &[
    // Letters
    entry('A', ".-"),
    entry('B', "-..."),
    entry('C', "-.-."),
    entry('D', "-.."),
    entry('E', "."),
    entry('F', "..-."),
    entry('G', "--."),
    entry('H', "...."),
    entry('I', ".."),
    entry('J', ".---"),
    entry('K', "-.-"),
    entry('L', ".-.."),
    entry('M', "--"),
    entry('N', "-."),
    entry('O', "---"),
    entry('P', ".--."),
    entry('Q', "--.-"),
    entry('R', ".-."),
    entry('S', "..."),
    entry('T', "-"),
    entry('U', "..-"),
    entry('V', "...-"),
    entry('W', ".--"),
    entry('X', "-..-"),
    entry('Y', "-.--"),
    entry('Z', "--.."),
    // Numerals
    entry('0', "-----"),
    entry('1', ".----"),
    entry('2', "..---"),
    entry('3', "...--"),
    entry('4', "....-"),
    entry('5', "....."),
    entry('6', "-...."),
    entry('7', "--..."),
    entry('8', "---.."),
    entry('9', "----."),
    // Punctuation
    entry('"', ".-..-."),
    entry('\'', ".----."),
    entry('$', "...-..-"),
    entry('(', "-.--."),
    entry(')', "-.--.-"),
    entry('+', ".-.-."),
    entry(',', "--..--"),
    entry('-', "-....-"),
    entry('.', ".-.-.-"),
    entry('/', "-..-."),
    entry(':', "---..."),
    entry(';', "-.-.-."),
    entry('=', "-...-"),
    entry('?', "..--.."),
    entry('_', "..--.-"),
    entry('@', ".--.-."),
    // Latin-1 accented letters
    entry('Ü', "..--"),
    entry('Ä', ".-.-"),
    entry('Ç', "-.-.."),
    entry('Ö', "---."),
    entry('É', "..-.."),
    entry('È', ".-..-"),
    entry('À', ".--.-"),
    entry('Ñ', "--.--"),
    // Latin-2 accented letters
    entry('Ş', "----"),
    entry('Ż', "--..-"),
    // Procedural signal extensions
    entry('<', "...-.-"),  // VA/SK, end of work
    entry('>', "-...-.-"), // BK, break
    entry('!', "...-."),   // SN, understood
    entry('&', ".-..."),   // AS, wait
    entry('^', "-.-.-"),   // KA, starting signal
    entry('~', ".-.-.."),  // AL, paragraph
];

/// A character with a conventional procedural-signal expansion
#[derive(Clone, Copy, Debug)]
pub struct ProceduralSignal {
    pub character: char,
    pub expansion: &'static str,
    /// Usually spelled out as its expansion rather than shown as the character
    pub usually_expanded: bool,
}

const fn procedural(character: char, expansion: &'static str, usually_expanded: bool) -> ProceduralSignal {
    ProceduralSignal {
        character,
        expansion,
        usually_expanded,
    }
}

static PROCEDURAL_TABLE: &[ProceduralSignal] = &[
    procedural('"', "AF", false),
    procedural('\'', "WG", false),
    procedural('$', "SX", false),
    procedural('(', "KN", false),
    procedural(')', "KK", false),
    procedural('+', "AR", false),
    procedural(',', "MIM", false),
    procedural('-', "DU", false),
    procedural('.', "AAA", false),
    procedural('/', "DN", false),
    procedural(':', "OS", false),
    procedural(';', "KR", false),
    procedural('=', "BT", false),
    procedural('?', "IMI", false),
    procedural('_', "IQ", false),
    procedural('@', "AC", false),
    procedural('<', "VA", true),
    procedural('>', "BK", true),
    procedural('!', "SN", true),
    procedural('&', "AS", true),
    procedural('^', "KA", true),
    procedural('~', "AL", true),
];

static PHONETICS: [&str; 26] = [
    "Alfa", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India", "Juliett",
    "Kilo", "Lima", "Mike", "November", "Oscar", "Papa", "Quebec", "Romeo", "Sierra", "Tango",
    "Uniform", "Victor", "Whiskey", "X-ray", "Yankee", "Zulu",
];

struct FastLookup {
    /// Indexed by representation hash
    by_hash: [Option<char>; 256],
    /// Indexed by code point, for characters below 256
    by_character: [Option<&'static str>; 256],
    /// False when some table entry could not be hashed
    hash_complete: bool,
}

fn fast_lookup() -> &'static FastLookup {
    static LOOKUP: OnceLock<FastLookup> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut lookup = FastLookup {
            by_hash: [None; 256],
            by_character: [None; 256],
            hash_complete: true,
        };
        for e in MORSE_TABLE {
            match representation_hash(e.representation) {
                0 => lookup.hash_complete = false,
                hash => lookup.by_hash[hash as usize] = Some(e.character),
            }
            let code = e.character as u32;
            if code < 256 {
                lookup.by_character[code as usize] = Some(e.representation);
            }
        }
        log::trace!(
            "Morse fast lookup built, hash table complete: {}",
            lookup.hash_complete
        );
        lookup
    })
}

fn normalize(character: char) -> char {
    let mut upper = character.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(c), None) => c,
        _ => character,
    }
}

/// Hash a representation into 2..=255.
///
/// Starts from 1 and shifts in one bit per symbol, 1 for a dash. Returns 0
/// for empty, invalid or over-long representations.
pub fn representation_hash(representation: &str) -> u8 {
    let length = representation.chars().count();
    if length == 0 || length > MAX_HASHED_LENGTH {
        return 0;
    }

    let mut hash: u8 = 1;
    for symbol in representation.chars() {
        hash <<= 1;
        match symbol {
            DASH_SYMBOL => hash |= 1,
            DOT_SYMBOL => {}
            _ => return 0,
        }
    }
    hash
}

/// Non-empty and made only of dots and dashes
pub fn is_valid_representation(representation: &str) -> bool {
    !representation.is_empty()
        && representation
            .chars()
            .all(|c| c == DOT_SYMBOL || c == DASH_SYMBOL)
}

pub fn character_count() -> usize {
    MORSE_TABLE.len()
}

pub fn list_characters() -> String {
    MORSE_TABLE.iter().map(|e| e.character).collect()
}

pub fn max_representation_length() -> usize {
    MORSE_TABLE
        .iter()
        .map(|e| e.representation.len())
        .max()
        .unwrap_or(0)
}

pub fn entries() -> &'static [MorseEntry] {
    MORSE_TABLE
}

/// Look up the representation of a character, case-insensitively
pub fn character_to_representation(character: char) -> Result<&'static str> {
    let character = normalize(character);
    let code = character as u32;
    if code < 256 {
        return fast_lookup().by_character[code as usize].ok_or(CwError::NotFound);
    }

    MORSE_TABLE
        .iter()
        .find(|e| e.character == character)
        .map(|e| e.representation)
        .ok_or(CwError::NotFound)
}

/// Look up the character for a representation
pub fn representation_to_character(representation: &str) -> Result<char> {
    if !is_valid_representation(representation) {
        return Err(CwError::invalid(format!(
            "bad representation \"{}\"",
            representation
        )));
    }

    let lookup = fast_lookup();
    let hash = representation_hash(representation);
    if hash != 0 {
        if let Some(c) = lookup.by_hash[hash as usize] {
            return Ok(c);
        }
        if lookup.hash_complete {
            return Err(CwError::NotFound);
        }
    }

    MORSE_TABLE
        .iter()
        .find(|e| e.representation == representation)
        .map(|e| e.character)
        .ok_or(CwError::NotFound)
}

pub fn procedural_character_count() -> usize {
    PROCEDURAL_TABLE.len()
}

pub fn list_procedural_characters() -> String {
    PROCEDURAL_TABLE.iter().map(|p| p.character).collect()
}

pub fn max_procedural_expansion_length() -> usize {
    PROCEDURAL_TABLE
        .iter()
        .map(|p| p.expansion.len())
        .max()
        .unwrap_or(0)
}

/// Expansion of a procedural character and whether it is usually expanded
pub fn lookup_procedural_character(character: char) -> Result<(&'static str, bool)> {
    PROCEDURAL_TABLE
        .iter()
        .find(|p| p.character == character)
        .map(|p| (p.expansion, p.usually_expanded))
        .ok_or(CwError::NotFound)
}

pub fn max_phonetic_length() -> usize {
    PHONETICS.iter().map(|p| p.len()).max().unwrap_or(0)
}

/// Phonetic alphabet word for a letter
pub fn lookup_phonetic(character: char) -> Result<&'static str> {
    let upper = character.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        Ok(PHONETICS[(upper as u8 - b'A') as usize])
    } else {
        Err(CwError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_to_representation() {
        assert_eq!(character_to_representation('A').unwrap(), ".-");
        assert_eq!(character_to_representation('s').unwrap(), "...");
        assert_eq!(character_to_representation('@').unwrap(), ".--.-.");
        assert_eq!(character_to_representation('ü').unwrap(), "..--");
        assert_eq!(character_to_representation('Ż').unwrap(), "--..-");
        assert!(matches!(
            character_to_representation('#'),
            Err(CwError::NotFound)
        ));
    }

    #[test]
    fn test_table_round_trip() {
        for e in entries() {
            let repr = character_to_representation(e.character).unwrap();
            assert_eq!(representation_to_character(repr).unwrap(), e.character);
        }
    }

    #[test]
    fn test_representations_unique() {
        for (i, a) in entries().iter().enumerate() {
            for b in &entries()[i + 1..] {
                assert_ne!(a.representation, b.representation, "{} vs {}", a.character, b.character);
            }
        }
    }

    #[test]
    fn test_representation_hash() {
        assert_eq!(representation_hash("."), 2);
        assert_eq!(representation_hash("-"), 3);
        assert_eq!(representation_hash(".-"), 0b101);
        assert_eq!(representation_hash("-------"), 255);
        assert_eq!(representation_hash("........"), 0);
        assert_eq!(representation_hash(""), 0);
        assert_eq!(representation_hash(".x"), 0);
    }

    #[test]
    fn test_every_short_representation_hashes_uniquely() {
        let mut seen = [false; 256];
        for len in 1..=MAX_HASHED_LENGTH {
            for bits in 0..(1u32 << len) {
                let repr: String = (0..len)
                    .map(|i| if bits & (1 << (len - 1 - i)) != 0 { '-' } else { '.' })
                    .collect();
                let hash = representation_hash(&repr) as usize;
                assert!(hash >= 2);
                assert!(!seen[hash], "collision for {}", repr);
                seen[hash] = true;
            }
        }
    }

    #[test]
    fn test_representation_to_character_errors() {
        assert!(matches!(
            representation_to_character("...---..."),
            Err(CwError::NotFound)
        ));
        assert!(matches!(
            representation_to_character("......."),
            Err(CwError::NotFound)
        ));
        assert!(matches!(
            representation_to_character(".x-"),
            Err(CwError::InvalidArgument(_))
        ));
        assert!(representation_to_character("").is_err());
    }

    #[test]
    fn test_counts_and_lists() {
        assert_eq!(character_count(), list_characters().chars().count());
        assert_eq!(max_representation_length(), 7);
        assert!(list_characters().starts_with("ABC"));
        assert_eq!(procedural_character_count(), 22);
        assert_eq!(max_procedural_expansion_length(), 3);
    }

    #[test]
    fn test_procedural_lookup() {
        assert_eq!(lookup_procedural_character('=').unwrap(), ("BT", false));
        assert_eq!(lookup_procedural_character('<').unwrap(), ("VA", true));
        assert!(lookup_procedural_character('A').is_err());
        for c in list_procedural_characters().chars() {
            assert!(character_to_representation(c).is_ok());
        }
    }

    #[test]
    fn test_phonetics() {
        assert_eq!(lookup_phonetic('a').unwrap(), "Alfa");
        assert_eq!(lookup_phonetic('X').unwrap(), "X-ray");
        assert_eq!(lookup_phonetic('Z').unwrap(), "Zulu");
        assert!(lookup_phonetic('5').is_err());
        assert_eq!(max_phonetic_length(), "November".len());
    }
}
