//! Per-channel interpreter state.

use opl_common::CorruptProgram;

/// Depth of the subroutine return stack.
pub(crate) const RETURN_STACK_DEPTH: usize = 4;

/// Effect run first after each tick's program scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryEffect {
    /// No effect
    #[default]
    None,
    /// Frequency slide with octave carry
    Slide,
    /// Vibrato around the note frequency
    Vibrato,
}

/// Effect run after the primary effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecondaryEffect {
    /// No effect
    #[default]
    None,
    /// Writes successive table bytes into an operator register
    TableSweep,
}

/// Slide counters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Slide {
    pub rate: u8,
    pub delta: u16,
    pub acc: u8,
}

/// Vibrato counters.
///
/// `step` and `delay_counter` are primed on every note-on, even while the
/// vibrato is not the active primary effect.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Vibrato {
    pub rate: u8,
    pub depth_shift: u8,
    pub countdown: u8,
    pub length: u8,
    pub delay: u8,
    pub step: u16,
    pub delay_counter: u8,
    pub acc: u8,
}

/// Table sweep counters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TableSweep {
    pub acc: u8,
    pub rate: u8,
    pub length: i8,
    pub index: i8,
    pub register: u8,
    pub table_offset: u16,
}

/// One logical channel: nine voices plus the control channel.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub(crate) priority: u8,
    pub(crate) data_ptr: Option<usize>,
    return_stack: [usize; RETURN_STACK_DEPTH],
    stack_depth: usize,

    pub(crate) duration: u8,
    pub(crate) position: u8,
    pub(crate) tempo: u8,
    pub(crate) tempo_reset: u8,
    pub(crate) repeat_counter: u8,

    pub(crate) base_note: i8,
    pub(crate) base_octave: i8,
    pub(crate) base_freq: u8,
    pub(crate) raw_note: u8,
    pub(crate) warp: i8,

    pub(crate) reg_a: u8,
    pub(crate) reg_b: u8,

    pub(crate) spacing1: u8,
    pub(crate) spacing2: u8,
    pub(crate) fractional_spacing: u8,
    pub(crate) duration_randomness: u8,

    pub(crate) op_level1: u8,
    pub(crate) op_level2: u8,
    pub(crate) two_op: bool,
    pub(crate) extra_level1: u8,
    pub(crate) extra_level2: u8,
    pub(crate) extra_level3: u8,

    pub(crate) primary: PrimaryEffect,
    pub(crate) secondary: SecondaryEffect,
    pub(crate) slide: Slide,
    pub(crate) vibrato: Vibrato,
    pub(crate) sweep: TableSweep,

    pub(crate) stored: [u8; 2],
}

impl Channel {
    /// Fresh channel as left by a reset.
    pub(crate) fn new() -> Self {
        Self {
            tempo: 0xFF,
            spacing1: 1,
            ..Self::default()
        }
    }

    /// Reset everything except the second extra level.
    pub(crate) fn reinit(&mut self) {
        *self = Self {
            extra_level2: self.extra_level2,
            ..Self::new()
        };
    }

    /// Whether a program is running on this channel.
    pub fn is_active(&self) -> bool {
        self.data_ptr.is_some()
    }

    /// Offset of the next program byte, if a program is running.
    pub fn data_ptr(&self) -> Option<usize> {
        self.data_ptr
    }

    /// Current priority.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Last values written to the `0xA0`/`0xB0` pair.
    pub fn frequency_registers(&self) -> (u8, u8) {
        (self.reg_a, self.reg_b)
    }

    /// Active primary effect.
    pub fn primary_effect(&self) -> PrimaryEffect {
        self.primary
    }

    /// Active secondary effect.
    pub fn secondary_effect(&self) -> SecondaryEffect {
        self.secondary
    }

    /// Stop the program and drop the priority.
    pub(crate) fn halt(&mut self) {
        self.duration = 0;
        self.priority = 0;
        self.data_ptr = None;
    }

    pub(crate) fn push_return(&mut self, offset: usize, channel: usize) -> Result<(), CorruptProgram> {
        let slot = self
            .return_stack
            .get_mut(self.stack_depth)
            .ok_or(CorruptProgram::StackOverflow { channel })?;
        *slot = offset;
        self.stack_depth += 1;
        Ok(())
    }

    pub(crate) fn pop_return(&mut self, channel: usize) -> Result<usize, CorruptProgram> {
        self.stack_depth = self
            .stack_depth
            .checked_sub(1)
            .ok_or(CorruptProgram::StackUnderflow { channel })?;
        Ok(self.return_stack[self.stack_depth])
    }

    /// Current F-number from the register mirrors.
    pub(crate) fn fnum(&self) -> u16 {
        (u16::from(self.reg_b & 0x03) << 8) | u16::from(self.reg_a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_channel_is_idle() {
        let channel = Channel::new();
        assert!(!channel.is_active());
        assert_eq!(channel.tempo, 0xFF);
        assert_eq!(channel.spacing1, 1);
        assert_eq!(channel.primary_effect(), PrimaryEffect::None);
    }

    #[test]
    fn test_reinit_keeps_extra_level2() {
        let mut channel = Channel::new();
        channel.extra_level2 = 12;
        channel.extra_level1 = 3;
        channel.priority = 9;
        channel.data_ptr = Some(40);
        channel.reinit();
        assert_eq!(channel.extra_level2, 12);
        assert_eq!(channel.extra_level1, 0);
        assert_eq!(channel.priority, 0);
        assert!(!channel.is_active());
    }

    #[test]
    fn test_return_stack_bounds() {
        let mut channel = Channel::new();
        for offset in 0..RETURN_STACK_DEPTH {
            channel.push_return(offset * 10, 2).unwrap();
        }
        assert_eq!(
            channel.push_return(99, 2),
            Err(CorruptProgram::StackOverflow { channel: 2 })
        );
        assert_eq!(channel.pop_return(2).unwrap(), 30);
        for _ in 1..RETURN_STACK_DEPTH {
            channel.pop_return(2).unwrap();
        }
        assert_eq!(
            channel.pop_return(2),
            Err(CorruptProgram::StackUnderflow { channel: 2 })
        );
    }
}
