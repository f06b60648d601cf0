// I2S sample FIFO.

use std::collections::VecDeque;

use log::trace;

use crate::device::Peripheral;

const FIFO_CAPACITY: usize = 256;
const ENABLE_BIT: u32 = 1 << 0;
const TX_ENABLE_BIT: u32 = 1 << 1;
const RX_ENABLE_BIT: u32 = 1 << 2;

const BASE_CLOCK_HZ: u64 = 24_000_000;

pub mod offset {
    pub const CONTROL: u32 = 0x00;
    pub const CLOCK_DIVIDER: u32 = 0x04;
    pub const FIFO_WRITE: u32 = 0x08;
    pub const FIFO_STATUS: u32 = 0x0C;
}

// One stereo sample, little-endian packed {left: low 16, right: high 16}
// matching the FIFO's 32-bit word layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioSample {
    pub left: i16,
    pub right: i16,
}

impl AudioSample {
    fn from_word(word: u32) -> Self {
        Self { left: (word & 0xFFFF) as i16, right: (word >> 16) as i16 }
    }
}

pub struct I2sController {
    control: u32,
    clock_divider: u32,
    fifo: VecDeque<AudioSample>,
    on_half_full: Option<Box<dyn FnMut(&[AudioSample])>>,
}

impl I2sController {
    pub fn new() -> Self {
        Self { control: 0, clock_divider: 1, fifo: VecDeque::with_capacity(FIFO_CAPACITY), on_half_full: None }
    }

    pub fn set_drain_callback(&mut self, cb: Box<dyn FnMut(&[AudioSample])>) {
        self.on_half_full = Some(cb);
    }

    fn enabled(&self) -> bool {
        self.control & ENABLE_BIT != 0
    }

    fn tx_enabled(&self) -> bool {
        self.control & TX_ENABLE_BIT != 0
    }

    // sample_rate = base_clock / (64 * divider), a 64-bit-frame-clock
    // divisor off the 24 MHz base.
    pub fn sample_rate_hz(&self) -> u64 {
        let divider = self.clock_divider.max(1) as u64;
        BASE_CLOCK_HZ / (64 * divider)
    }

    fn maybe_drain(&mut self) {
        if self.fifo.len() * 2 < FIFO_CAPACITY {
            return;
        }
        let drained: Vec<AudioSample> = self.fifo.drain(..).collect();
        trace!("i2s: fifo half-full, draining {} samples", drained.len());
        if let Some(cb) = &mut self.on_half_full {
            cb(&drained);
        }
    }
}

impl Default for I2sController {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for I2sController {
    fn read(&mut self, offset: u32) -> u32 {
        match offset {
            offset::CONTROL => self.control,
            offset::CLOCK_DIVIDER => self.clock_divider,
            offset::FIFO_STATUS => self.fifo.len() as u32,
            _ => 0,
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        match offset {
            offset::CONTROL => {
                let was_enabled = self.enabled();
                self.control = value;
                if was_enabled && !self.enabled() {
                    self.fifo.clear();
                }
            }
            offset::CLOCK_DIVIDER => self.clock_divider = value,
            offset::FIFO_WRITE => {
                if self.enabled() && self.tx_enabled() && self.fifo.len() < FIFO_CAPACITY {
                    self.fifo.push_back(AudioSample::from_word(value));
                    self.maybe_drain();
                }
            }
            // FIFO_STATUS is read-only.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn disabled_fifo_drops_writes() {
        let mut i2s = I2sController::new();
        i2s.write(offset::FIFO_WRITE, 0x1234_5678);
        assert_eq!(i2s.read(offset::FIFO_STATUS), 0);
    }

    #[test]
    fn half_full_invokes_drain_callback() {
        let drained = Rc::new(RefCell::new(0usize));
        let drained_clone = Rc::clone(&drained);
        let mut i2s = I2sController::new();
        i2s.set_drain_callback(Box::new(move |samples| {
            *drained_clone.borrow_mut() += samples.len();
        }));
        i2s.write(offset::CONTROL, ENABLE_BIT | TX_ENABLE_BIT);
        for i in 0..(FIFO_CAPACITY / 2) {
            i2s.write(offset::FIFO_WRITE, i as u32);
        }
        assert_eq!(*drained.borrow(), FIFO_CAPACITY / 2);
        assert_eq!(i2s.read(offset::FIFO_STATUS), 0);
    }

    #[test]
    fn disable_clears_fifo() {
        let mut i2s = I2sController::new();
        i2s.write(offset::CONTROL, ENABLE_BIT | TX_ENABLE_BIT);
        i2s.write(offset::FIFO_WRITE, 0x0001_0002);
        i2s.write(offset::CONTROL, 0);
        assert_eq!(i2s.read(offset::FIFO_STATUS), 0);
    }

    #[test]
    fn sample_rate_formula() {
        let mut i2s = I2sController::new();
        i2s.write(offset::CLOCK_DIVIDER, 6);
        // 24_000_000 / (64 * 6) = 62500 Hz
        assert_eq!(i2s.sample_rate_hz(), 62_500);
    }

    #[test]
    fn sample_word_layout() {
        let sample = AudioSample::from_word(0xFFFE_0010);
        assert_eq!(sample.left, 0x0010);
        assert_eq!(sample.right, -2);
    }
}
