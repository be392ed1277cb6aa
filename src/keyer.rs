//! Iambic keyer with Curtis mode A and B.
//!
//! [`IambicKeyer`] is the bare state machine: paddle events go in, and each
//! clock tick yields the next [`KeyerStep`]. The generator applies the steps
//! to the sink and re-arms the clock for the returned duration.
//!
//! Starting from idle, the machine pretends the opposite element has just
//! ended so the normal after-element logic picks the pressed paddle first.

use crate::error::{CwError, Result};
use crate::generator::{lock, Generator, Shared, TickSource};
use crate::morse::timing::SendParameters;
use crate::morse::Element;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyerState {
    #[default]
    Idle,
    InDotA,
    InDashA,
    AfterDotA,
    AfterDashA,
    InDotB,
    InDashB,
    AfterDotB,
    AfterDashB,
}

impl KeyerState {
    pub fn is_in_element(&self) -> bool {
        matches!(
            self,
            KeyerState::InDotA | KeyerState::InDashA | KeyerState::InDotB | KeyerState::InDashB
        )
    }

    pub fn is_after_element(&self) -> bool {
        matches!(
            self,
            KeyerState::AfterDotA
                | KeyerState::AfterDashA
                | KeyerState::AfterDotB
                | KeyerState::AfterDashB
        )
    }
}

/// What the keyer wants done on a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyerStep {
    /// Nothing to do
    Idle,
    /// Close the key and sound an element for `usecs`
    Mark { element: Element, usecs: i32 },
    /// Open the key and stay silent for `usecs`
    Space { usecs: i32 },
    /// The keyer just went idle
    Finished,
}

#[derive(Clone, Debug, Default)]
pub struct IambicKeyer {
    state: KeyerState,
    dot_paddle: bool,
    dash_paddle: bool,
    dot_latch: bool,
    dash_latch: bool,
    curtis_b_latch: bool,
    curtis_mode_b: bool,
}

impl IambicKeyer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> KeyerState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != KeyerState::Idle
    }

    /// (dot, dash)
    pub fn paddles(&self) -> (bool, bool) {
        (self.dot_paddle, self.dash_paddle)
    }

    /// (dot, dash)
    pub fn latches(&self) -> (bool, bool) {
        (self.dot_latch, self.dash_latch)
    }

    pub fn curtis_mode_b(&self) -> bool {
        self.curtis_mode_b
    }

    pub fn set_curtis_mode_b(&mut self, enabled: bool) {
        self.curtis_mode_b = enabled;
    }

    /// Record new paddle states. Returns true if the keyer left idle and
    /// needs a tick to produce its first element.
    pub fn paddle_event(&mut self, dot: bool, dash: bool) -> bool {
        if dot && !self.dot_paddle {
            self.dot_latch = true;
        }
        if dash && !self.dash_paddle {
            self.dash_latch = true;
        }
        self.dot_paddle = dot;
        self.dash_paddle = dash;

        if self.curtis_mode_b && dot && dash {
            self.curtis_b_latch = true;
        }

        log::debug!(
            "Keyer paddles {},{} latches {},{} curtis_b {}",
            self.dot_paddle,
            self.dash_paddle,
            self.dot_latch,
            self.dash_latch,
            self.curtis_b_latch
        );

        if self.state != KeyerState::Idle {
            return false;
        }
        self.state = if dot {
            if self.curtis_b_latch {
                KeyerState::AfterDashB
            } else {
                KeyerState::AfterDashA
            }
        } else if dash {
            if self.curtis_b_latch {
                KeyerState::AfterDotB
            } else {
                KeyerState::AfterDotA
            }
        } else {
            return false;
        };
        true
    }

    /// Advance on a clock tick
    pub fn tick(&mut self, timing: &SendParameters) -> KeyerStep {
        let from = self.state;
        let step = match self.state {
            KeyerState::Idle => return KeyerStep::Idle,
            KeyerState::InDotA | KeyerState::InDotB => {
                self.state = if from == KeyerState::InDotA {
                    KeyerState::AfterDotA
                } else {
                    KeyerState::AfterDotB
                };
                KeyerStep::Space {
                    usecs: timing.end_of_element_delay,
                }
            }
            KeyerState::InDashA | KeyerState::InDashB => {
                self.state = if from == KeyerState::InDashA {
                    KeyerState::AfterDashA
                } else {
                    KeyerState::AfterDashB
                };
                KeyerStep::Space {
                    usecs: timing.end_of_element_delay,
                }
            }
            KeyerState::AfterDotA | KeyerState::AfterDotB => {
                if !self.dot_paddle {
                    self.dot_latch = false;
                }
                if from == KeyerState::AfterDotB {
                    self.state = KeyerState::InDashA;
                    Self::mark(Element::Dash, timing)
                } else if self.dash_latch {
                    self.state = if self.curtis_b_latch {
                        self.curtis_b_latch = false;
                        KeyerState::InDashB
                    } else {
                        KeyerState::InDashA
                    };
                    Self::mark(Element::Dash, timing)
                } else if self.dot_latch {
                    self.state = KeyerState::InDotA;
                    Self::mark(Element::Dot, timing)
                } else {
                    self.state = KeyerState::Idle;
                    KeyerStep::Finished
                }
            }
            KeyerState::AfterDashA | KeyerState::AfterDashB => {
                if !self.dash_paddle {
                    self.dash_latch = false;
                }
                if from == KeyerState::AfterDashB {
                    self.state = KeyerState::InDotA;
                    Self::mark(Element::Dot, timing)
                } else if self.dot_latch {
                    self.state = if self.curtis_b_latch {
                        self.curtis_b_latch = false;
                        KeyerState::InDotB
                    } else {
                        KeyerState::InDotA
                    };
                    Self::mark(Element::Dot, timing)
                } else if self.dash_latch {
                    self.state = KeyerState::InDashA;
                    Self::mark(Element::Dash, timing)
                } else {
                    self.state = KeyerState::Idle;
                    KeyerStep::Finished
                }
            }
        };
        log::trace!("Keyer {:?} -> {:?}", from, self.state);
        step
    }

    fn mark(element: Element, timing: &SendParameters) -> KeyerStep {
        let usecs = match element {
            Element::Dot => timing.dot_length,
            Element::Dash => timing.dash_length,
        };
        KeyerStep::Mark { element, usecs }
    }

    /// Release both paddles, clear latches and go idle. The mode is kept.
    pub fn reset(&mut self) {
        *self = Self {
            curtis_mode_b: self.curtis_mode_b,
            ..Self::default()
        };
    }
}

impl Shared {
    pub(crate) fn keyer_tick(&self) {
        if !self.take_due(TickSource::Keyer) {
            return;
        }
        let step = {
            let mut keyer = lock(&self.keyer);
            if !keyer.is_busy() {
                return;
            }
            let timing = lock(&self.timing).send_parameters();
            keyer.tick(&timing)
        };

        match step {
            KeyerStep::Idle => {}
            KeyerStep::Mark { usecs, .. } => {
                self.keying.set(true);
                self.play(self.frequency());
                self.arm(TickSource::Keyer, usecs);
            }
            KeyerStep::Space { usecs } => {
                self.keying.set(false);
                self.play(0);
                self.arm(TickSource::Keyer, usecs);
            }
            KeyerStep::Finished => self.schedule_finalization(),
        }
    }
}

impl Generator {
    /// Report both paddle states. Elements are produced in the background.
    pub fn notify_keyer_paddle_event(&self, dot: bool, dash: bool) -> Result<()> {
        let started = {
            let _claim = self.shared.claim_sink();
            if self.shared.queue.is_busy() || lock(&self.shared.straight_key).is_down() {
                return Err(CwError::Busy);
            }
            lock(&self.shared.keyer).paddle_event(dot, dash)
        };
        if started {
            self.shared.cancel_finalization();
            self.shared.arm(TickSource::Keyer, 0);
        }
        Ok(())
    }

    pub fn notify_keyer_dot_paddle_event(&self, dot: bool) -> Result<()> {
        let (_, dash) = self.keyer_paddles();
        self.notify_keyer_paddle_event(dot, dash)
    }

    pub fn notify_keyer_dash_paddle_event(&self, dash: bool) -> Result<()> {
        let (dot, _) = self.keyer_paddles();
        self.notify_keyer_paddle_event(dot, dash)
    }

    /// (dot, dash)
    pub fn keyer_paddles(&self) -> (bool, bool) {
        lock(&self.shared.keyer).paddles()
    }

    /// (dot, dash)
    pub fn keyer_paddle_latches(&self) -> (bool, bool) {
        lock(&self.shared.keyer).latches()
    }

    pub fn keyer_state(&self) -> KeyerState {
        lock(&self.shared.keyer).state()
    }

    pub fn is_keyer_busy(&self) -> bool {
        lock(&self.shared.keyer).is_busy()
    }

    pub fn enable_curtis_mode_b(&self) {
        lock(&self.shared.keyer).set_curtis_mode_b(true);
    }

    pub fn disable_curtis_mode_b(&self) {
        lock(&self.shared.keyer).set_curtis_mode_b(false);
    }

    pub fn is_curtis_mode_b(&self) -> bool {
        lock(&self.shared.keyer).curtis_mode_b()
    }

    /// Wait until the element being sent, and the space after it, are done
    pub fn wait_for_keyer_element(&self) -> Result<()> {
        self.shared.check_can_wait()?;
        while self.keyer_state().is_in_element() {
            self.shared.clock.wait_for_tick()?;
        }
        while self.keyer_state().is_after_element() {
            self.shared.clock.wait_for_tick()?;
        }
        Ok(())
    }

    /// Wait for the keyer to go idle. Fails with `Deadlock` while a paddle
    /// is held, since the keyer would never stop.
    pub fn wait_for_keyer(&self) -> Result<()> {
        self.shared.check_can_wait()?;
        let (dot, dash) = self.keyer_paddles();
        if dot || dash {
            return Err(CwError::Deadlock);
        }
        while self.is_keyer_busy() {
            self.shared.clock.wait_for_tick()?;
        }
        Ok(())
    }

    pub fn reset_keyer(&self) {
        let was_busy = {
            let mut keyer = lock(&self.shared.keyer);
            let busy = keyer.is_busy();
            keyer.reset();
            busy
        };
        // An idle keyer does not own the sink
        if was_busy {
            self.shared.keying.set(false);
            self.shared.play(0);
            self.shared.schedule_finalization();
        }
    }
}
