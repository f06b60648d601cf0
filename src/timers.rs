// Countdown timers, microsecond counter, and seconds RTC.

use std::cell::RefCell;
use std::rc::Weak;

use log::trace;

use crate::device::Peripheral;
use crate::interrupt::{InterruptController, InterruptSource};

const ENABLE_BIT: u32 = 1 << 31;
const REPEAT_BIT: u32 = 1 << 30;
const COUNT_MASK: u32 = 0x1FFF_FFFF;

pub mod offset {
    pub const TIMER1_CONFIG: u32 = 0x00;
    pub const TIMER1_VALUE: u32 = 0x04;
    pub const TIMER2_CONFIG: u32 = 0x08;
    pub const TIMER2_VALUE: u32 = 0x0C;
    // Free-running, read-only microsecond counter.
    pub const USEC_TIMER: u32 = 0x10;
    // Seconds RTC; firmware both reads and writes it to set the clock.
    pub const RTC_SECONDS: u32 = 0x14;
}

#[derive(Debug, Default)]
struct Countdown {
    config: u32,
    value: u32,
    // Fractional cycles carried forward between ticks, in CPU cycles.
    cycle_accumulator: u64,
    // Fractional microseconds carried forward after dividing out whole ones.
    usec_accumulator: u64,
    source: Option<InterruptSource>,
}

impl Countdown {
    fn new(source: InterruptSource) -> Self {
        Self { source: Some(source), ..Default::default() }
    }

    fn enabled(&self) -> bool {
        self.config & ENABLE_BIT != 0
    }

    fn repeat(&self) -> bool {
        self.config & REPEAT_BIT != 0
    }

    fn count(&self) -> u32 {
        self.config & COUNT_MASK
    }

    fn write_config(&mut self, value: u32) {
        self.config = value;
        self.value = self.count();
        self.cycle_accumulator = 0;
        self.usec_accumulator = 0;
    }

    fn write_value(&mut self, value: u32) {
        // Acknowledges the interrupt; reload happens from count, not value,
        // to honor repeat mode regardless of what the firmware wrote here.
        let _ = value;
        if self.repeat() {
            self.value = self.count();
        } else {
            self.config &= !ENABLE_BIT;
        }
    }

    // Advance by cpu_cycles cycles at cpu_freq_mhz, firing into interrupts
    // on underflow. Returns the number of whole microseconds elapsed, for
    // callers that also need that (the free-running counter).
    fn tick(&mut self, cpu_cycles: u32, cpu_freq_mhz: u32, interrupts: &RefCell<InterruptController>) -> u64 {
        if cpu_freq_mhz == 0 {
            return 0;
        }
        self.cycle_accumulator += cpu_cycles as u64;
        let usecs = self.cycle_accumulator / cpu_freq_mhz as u64;
        self.cycle_accumulator %= cpu_freq_mhz as u64;
        if !self.enabled() || usecs == 0 {
            return usecs;
        }
        let mut remaining = usecs;
        while remaining > 0 {
            if !self.enabled() {
                break;
            }
            if remaining < self.value as u64 {
                self.value -= remaining as u32;
                remaining = 0;
            } else {
                let overshoot = remaining - self.value as u64;
                self.fire(interrupts);
                // A zero reload count in repeat mode would otherwise spin
                // forever: self.value stays 0 after fire()'s reload, so
                // remaining would never shrink. Fire once per tick and stop.
                if !self.repeat() || self.value == 0 {
                    remaining = 0;
                    break;
                }
                remaining = overshoot;
            }
        }
        usecs
    }

    fn fire(&mut self, interrupts: &RefCell<InterruptController>) {
        if let Some(source) = self.source {
            trace!("timer: {:?} fired", source);
            interrupts.borrow_mut().assert(source);
        }
        if self.repeat() {
            self.value = self.count();
        } else {
            self.config &= !ENABLE_BIT;
            self.value = 0;
        }
    }
}

pub struct Timers {
    timer1: Countdown,
    timer2: Countdown,
    usec_accumulator: u64,
    usec_counter: u64,
    rtc_accumulator: u64,
    rtc_seconds: u32,
    interrupts: Weak<RefCell<InterruptController>>,
}

impl Timers {
    pub fn new(interrupts: Weak<RefCell<InterruptController>>) -> Self {
        Self {
            timer1: Countdown::new(InterruptSource::Timer1),
            timer2: Countdown::new(InterruptSource::Timer2),
            usec_accumulator: 0,
            usec_counter: 0,
            rtc_accumulator: 0,
            rtc_seconds: 0,
            interrupts,
        }
    }

    // The free-running microsecond counter, guaranteed monotonically
    // non-decreasing within the same cycle window. This method never
    // resets state, only tick does.
    pub fn usec_counter(&self) -> u64 {
        self.usec_counter
    }

    pub fn rtc_seconds(&self) -> u32 {
        self.rtc_seconds
    }
}

impl Peripheral for Timers {
    fn read(&mut self, offset: u32) -> u32 {
        match offset {
            offset::TIMER1_CONFIG => self.timer1.config,
            offset::TIMER1_VALUE => self.timer1.value,
            offset::TIMER2_CONFIG => self.timer2.config,
            offset::TIMER2_VALUE => self.timer2.value,
            offset::USEC_TIMER => self.usec_counter as u32,
            offset::RTC_SECONDS => self.rtc_seconds,
            _ => 0,
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        match offset {
            offset::TIMER1_CONFIG => self.timer1.write_config(value),
            offset::TIMER1_VALUE => self.timer1.write_value(value),
            offset::TIMER2_CONFIG => self.timer2.write_config(value),
            offset::TIMER2_VALUE => self.timer2.write_value(value),
            offset::RTC_SECONDS => self.rtc_seconds = value,
            // USEC_TIMER is read-only.
            _ => {}
        }
    }

    fn tick(&mut self, cpu_cycles: u32, cpu_freq_mhz: u32) {
        let Some(interrupts) = self.interrupts.upgrade() else { return };

        self.timer1.tick(cpu_cycles, cpu_freq_mhz, &interrupts);
        self.timer2.tick(cpu_cycles, cpu_freq_mhz, &interrupts);
        // Advance the free-running counter from the same cycle source as the
        // countdown timers, independent of whether either is enabled.
        if cpu_freq_mhz != 0 {
            self.usec_accumulator += cpu_cycles as u64;
        }
        if cpu_freq_mhz != 0 {
            let whole = self.usec_accumulator / cpu_freq_mhz as u64;
            self.usec_accumulator %= cpu_freq_mhz as u64;
            if whole > 0 {
                self.usec_counter += whole;
                self.rtc_accumulator += whole;
                let whole_secs = self.rtc_accumulator / 1_000_000;
                if whole_secs > 0 {
                    self.rtc_accumulator %= 1_000_000;
                    self.rtc_seconds = self.rtc_seconds.wrapping_add(whole_secs as u32);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn harness() -> (Timers, Rc<RefCell<InterruptController>>) {
        let ic = Rc::new(RefCell::new(InterruptController::new()));
        ic.borrow_mut().set_cpu_enable(InterruptSource::Timer1.bit() | InterruptSource::Timer2.bit());
        let timers = Timers::new(Rc::downgrade(&ic));
        (timers, ic)
    }

    #[test]
    fn disabled_timer_does_not_advance() {
        let (mut timers, ic) = harness();
        timers.write(offset::TIMER1_CONFIG, 100);
        timers.tick(80_000_000, 80);
        assert!(!ic.borrow().has_pending_irq());
        assert_eq!(timers.read(offset::TIMER1_VALUE), 100);
    }

    #[test]
    fn one_shot_clears_enable_on_fire() {
        let (mut timers, ic) = harness();
        timers.write(offset::TIMER1_CONFIG, ENABLE_BIT | 10);
        // 10 us at 1 MHz == 10 cycles.
        timers.tick(10, 1);
        assert!(ic.borrow().has_pending_irq());
        assert_eq!(timers.read(offset::TIMER1_CONFIG) & ENABLE_BIT, 0);
    }

    #[test]
    fn repeat_mode_fires_multiple_times_in_a_window() {
        let (mut timers, ic) = harness();
        timers.write(offset::TIMER1_CONFIG, ENABLE_BIT | REPEAT_BIT | 100);
        let mut fires = 0;
        for _ in 0..250 {
            // One microsecond of cycles per step at 80 MHz.
            timers.tick(80, 80);
            if ic.borrow().has_pending_irq() {
                fires += 1;
                ic.borrow_mut().clear(InterruptSource::Timer1);
            }
        }
        assert!(fires >= 2, "expected at least 2 fires, got {fires}");
    }

    #[test]
    fn usec_counter_is_monotonic() {
        let (mut timers, _ic) = harness();
        let mut last = timers.usec_counter();
        for _ in 0..1000 {
            timers.tick(37, 80);
            let now = timers.usec_counter();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn rtc_advances_from_same_cycle_source() {
        let (mut timers, _ic) = harness();
        // 80 MHz for 1 second's worth of cycles.
        timers.tick(80_000_000, 80);
        assert_eq!(timers.rtc_seconds(), 1);
    }

    #[test]
    fn zero_reload_repeat_timer_fires_without_hanging() {
        let (mut timers, ic) = harness();
        timers.write(offset::TIMER1_CONFIG, ENABLE_BIT | REPEAT_BIT);
        timers.tick(80, 80);
        assert!(ic.borrow().has_pending_irq());
        assert_eq!(timers.read(offset::TIMER1_CONFIG) & ENABLE_BIT, ENABLE_BIT);
    }

    #[test]
    fn value_write_acknowledges_without_resetting_accumulator() {
        let (mut timers, ic) = harness();
        timers.write(offset::TIMER1_CONFIG, ENABLE_BIT | REPEAT_BIT | 5);
        timers.tick(5, 1);
        assert!(ic.borrow().has_pending_irq());
        ic.borrow_mut().clear(InterruptSource::Timer1);
        timers.write(offset::TIMER1_VALUE, 0);
        assert_eq!(timers.read(offset::TIMER1_VALUE), 5);
    }
}
