// Interrupt aggregation.
//
// Peripherals never deliver interrupts to the CPU directly; they each hold
// a Weak handle into a single shared InterruptController and call
// InterruptController::assert. The emulator shell polls has_pending_irq /
// has_pending_fiq once per step() and drives the CPU's input lines from
// the result.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::device::Peripheral;

// One bit per interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InterruptSource {
    Timer1 = 0,
    Timer2 = 1,
    Ide = 2,
    Dma = 3,
    I2c = 4,
    I2s = 5,
    Serial0 = 6,
    Gpio = 7,
    Usb = 8,
    Rtc = 9,
}

impl InterruptSource {
    pub const ALL: [InterruptSource; 10] = [
        InterruptSource::Timer1,
        InterruptSource::Timer2,
        InterruptSource::Ide,
        InterruptSource::Dma,
        InterruptSource::I2c,
        InterruptSource::I2s,
        InterruptSource::Serial0,
        InterruptSource::Gpio,
        InterruptSource::Usb,
        InterruptSource::Rtc,
    ];

    #[inline]
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

// Sources classified as FIQ rather than IRQ. Fixed by the hardware, not
// software-configurable.
const FIQ_CLASSIFIER_MASK: u32 = InterruptSource::Ide.bit();

// Register offsets within the interrupt controller's MMIO window. There is
// one such window per core (CPU and COP); MemoryBus routes each core's
// accesses to the matching InterruptController instance.
pub mod offset {
    pub const STATUS_RAW: u32 = 0x00;
    // (raw | forced) & enable, read-only.
    pub const STATUS_ENABLED: u32 = 0x04;
    // Software-injected bits, OR'd into raw for pending evaluation.
    pub const FORCE: u32 = 0x08;
    // Write: OR into the enable mask. Read: current enable mask.
    pub const ENABLE_SET: u32 = 0x0C;
    // Write: AND-NOT out of the enable mask (bits written as 1 are cleared).
    pub const ENABLE_CLEAR: u32 = 0x10;
    // Write a 1 to a bit here to clear that source's raw status bit.
    pub const CLEAR: u32 = 0x14;
}

#[derive(Debug, Default)]
pub struct InterruptController {
    raw_status: u32,
    forced: u32,
    cpu_enable: u32,
    cop_enable: u32,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assert(&mut self, source: InterruptSource) {
        trace!("irq: assert {:?}", source);
        self.raw_status |= source.bit();
    }

    pub fn clear(&mut self, source: InterruptSource) {
        self.raw_status &= !source.bit();
    }

    pub fn set_cpu_enable(&mut self, mask: u32) {
        self.cpu_enable = mask;
    }

    pub fn set_cop_enable(&mut self, mask: u32) {
        self.cop_enable = mask;
    }

    pub fn cpu_enable(&self) -> u32 {
        self.cpu_enable
    }

    pub fn cop_enable(&self) -> u32 {
        self.cop_enable
    }

    fn pending(&self, enable: u32) -> u32 {
        (self.raw_status | self.forced) & enable
    }

    pub fn has_pending_irq_for(&self, enable: u32) -> bool {
        self.pending(enable) & !FIQ_CLASSIFIER_MASK != 0
    }

    pub fn has_pending_fiq_for(&self, enable: u32) -> bool {
        self.pending(enable) & FIQ_CLASSIFIER_MASK != 0
    }

    pub fn has_pending_irq(&self) -> bool {
        self.has_pending_irq_for(self.cpu_enable)
    }

    pub fn has_pending_fiq(&self) -> bool {
        self.has_pending_fiq_for(self.cpu_enable)
    }

    pub fn has_pending_irq_cop(&self) -> bool {
        self.has_pending_irq_for(self.cop_enable)
    }

    pub fn has_pending_fiq_cop(&self) -> bool {
        self.has_pending_fiq_for(self.cop_enable)
    }

    // Read the register window as seen from one core's enable mask.
    pub fn read(&self, offset: u32, is_cop: bool) -> u32 {
        let enable = if is_cop { self.cop_enable } else { self.cpu_enable };
        match offset {
            offset::STATUS_RAW => self.raw_status,
            offset::STATUS_ENABLED => self.pending(enable),
            offset::FORCE => self.forced,
            offset::ENABLE_SET | offset::ENABLE_CLEAR => enable,
            offset::CLEAR => 0,
            _ => 0,
        }
    }

    pub fn write(&mut self, offset: u32, value: u32, is_cop: bool) {
        match offset {
            offset::FORCE => self.forced = value,
            offset::ENABLE_SET => {
                if is_cop {
                    self.cop_enable |= value;
                } else {
                    self.cpu_enable |= value;
                }
            }
            offset::ENABLE_CLEAR => {
                if is_cop {
                    self.cop_enable &= !value;
                } else {
                    self.cpu_enable &= !value;
                }
            }
            offset::CLEAR => self.raw_status &= !value,
            // STATUS_RAW / STATUS_ENABLED are read-only; writes drop silently.
            _ => {}
        }
    }
}

// The bus-visible MMIO window for one core's view of the interrupt
// controller. The CPU and COP each get their own window over the same
// underlying InterruptController; only the enable-mask half of the
// register file differs between them.
pub struct InterruptWindow {
    inner: Rc<RefCell<InterruptController>>,
    is_cop: bool,
}

impl InterruptWindow {
    pub fn new(inner: Rc<RefCell<InterruptController>>, is_cop: bool) -> Self {
        Self { inner, is_cop }
    }
}

impl Peripheral for InterruptWindow {
    fn read(&mut self, offset: u32) -> u32 {
        self.inner.borrow().read(offset, self.is_cop)
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.inner.borrow_mut().write(offset, value, self.is_cop);
    }
}
