//! Text to timed tones.
//!
//! Every element is followed by the inter-element silence, so a character
//! space only adds the remainder of the character gap and a word space the
//! remainder of the word gap. At default weighting and no Farnsworth gap,
//! "PARIS " is exactly 50 units long.

use crate::error::{CwError, Result};
use crate::generator::{lock, Generator};
use crate::morse::{self, Element, SendParameters};
use crate::tone_queue::{Tone, TONE_QUEUE_HIGH_WATER_MARK};

/// True if `character` can be sent; space is always sendable
pub fn check_character(character: char) -> bool {
    character == ' ' || morse::character_to_representation(character).is_ok()
}

pub fn check_string(text: &str) -> bool {
    text.chars().all(check_character)
}

/// True for non-empty strings of dots and dashes
pub fn check_representation(representation: &str) -> bool {
    morse::is_valid_representation(representation)
}

impl Generator {
    fn send_timing(&self) -> (SendParameters, i32) {
        let mut timing = lock(&self.shared.timing);
        (timing.send_parameters(), timing.frequency())
    }

    /// One dot or dash followed by the inter-element silence
    pub fn send_element(&self, element: Element) -> Result<()> {
        let (send, frequency) = self.send_timing();
        let usecs = match element {
            Element::Dot => send.dot_length,
            Element::Dash => send.dash_length,
        };
        self.shared.enqueue(Tone::new(usecs, frequency))?;
        self.shared.enqueue(Tone::silence(send.end_of_element_delay))
    }

    /// Send a '.' or '-'
    pub fn send_symbol(&self, symbol: char) -> Result<()> {
        self.send_element(Element::from_symbol(symbol)?)
    }

    pub fn send_dot(&self) -> Result<()> {
        self.send_element(Element::Dot)
    }

    pub fn send_dash(&self) -> Result<()> {
        self.send_element(Element::Dash)
    }

    /// The rest of an inter-character gap, Farnsworth delay included
    pub fn send_character_space(&self) -> Result<()> {
        let (send, _) = self.send_timing();
        self.shared.enqueue(Tone::silence(
            send.end_of_character_delay + send.additional_delay,
        ))
    }

    /// The rest of an inter-word gap after a completed character
    pub fn send_word_space(&self) -> Result<()> {
        let (send, _) = self.send_timing();
        self.shared.enqueue(Tone::silence(
            send.end_of_word_delay - send.end_of_element_delay + send.adjustment_delay,
        ))
    }

    pub fn send_representation(&self, representation: &str) -> Result<()> {
        self.send_representation_internal(representation, false)
    }

    /// Send without the closing character space, so the next
    /// representation runs into this one
    pub fn send_representation_partial(&self, representation: &str) -> Result<()> {
        self.send_representation_internal(representation, true)
    }

    fn send_representation_internal(&self, representation: &str, partial: bool) -> Result<()> {
        let elements = morse::representation_elements(representation)?;
        if elements.is_empty() {
            return Err(CwError::invalid("empty representation"));
        }
        // Refuse near the top so a character is rarely cut short by a full queue
        if self.shared.queue.length() >= TONE_QUEUE_HIGH_WATER_MARK {
            return Err(CwError::QueueFull);
        }

        for element in elements {
            self.send_element(element)?;
        }
        if !partial {
            self.send_character_space()?;
        }
        Ok(())
    }

    pub fn send_character(&self, character: char) -> Result<()> {
        self.send_character_internal(character, false)
    }

    pub fn send_character_partial(&self, character: char) -> Result<()> {
        self.send_character_internal(character, true)
    }

    fn send_character_internal(&self, character: char, partial: bool) -> Result<()> {
        if character == ' ' {
            return self.send_word_space();
        }
        let representation = morse::character_to_representation(character)?;
        self.send_representation_internal(representation, partial)
    }

    /// Send `text`. Nothing is queued if any character is unsendable; a
    /// full queue part way through leaves the characters before it queued.
    pub fn send_string(&self, text: &str) -> Result<()> {
        if !check_string(text) {
            return Err(CwError::NotFound);
        }
        for character in text.chars() {
            self.send_character(character)?;
        }
        log::debug!("Queued {:?}", text);
        Ok(())
    }
}
