// System controller, chip identification, and the dual-core rendezvous.
//
// Firmware boot loops poll COP_CTL bit 31 expecting the COP to report
// itself permanently asleep, since this crate does not drive a second
// core. Get this wrong and firmware hangs on boot.

use log::{debug, trace};

use crate::device::Peripheral;

pub const CHIP_ID: u32 = 0x6021_C000;
const PROC_SLEEP_BIT: u32 = 1 << 31;
const PLL_LOCKED_BIT: u32 = 1 << 31;
const READY_NIBBLE_MASK: u32 = 0x0000_000F;

// The COP's rendezvous state. This is bookkeeping only: the COP never
// actually executes instructions in this crate unless an external Cpu is
// attached as the coprocessor and the emulator shell chooses to step it.
// COP_CTL reads are independent of this enum, they always report
// sleeping, regardless of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopState {
    Disabled,
    Sleeping,
    Waking,
    Running,
    Halted,
}

// The three bus-visible sub-windows this component owns. Each is registered
// at a different base address by MemoryBus; SystemControllerView tags
// accesses with which one before forwarding to the shared controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Identity,
    DeviceControl,
    CoreControl,
}

pub mod identity_offset {
    pub const PROCESSOR_ID: u32 = 0x00;
    pub const CHIP_ID: u32 = 0x04;
}

pub mod device_offset {
    pub const DEVICE_ENABLE: u32 = 0x00;
    pub const DEVICE_RESET: u32 = 0x04;
    pub const DEVICE_INIT: u32 = 0x08;
    pub const PLL_CONTROL: u32 = 0x0C;
    pub const PLL_STATUS: u32 = 0x10;
}

pub mod core_offset {
    pub const CPU_CTL: u32 = 0x00;
    pub const COP_CTL: u32 = 0x04;
}

pub struct SystemController {
    device_enable: u32,
    device_reset: u32,
    device_init: u32,
    pll_control: u32,
    cpu_ctl_raw: u32,
    cop_ctl_raw: u32,
    cop_state: CopState,
    wake_request_count: u32,
    kernel_init_complete: bool,
    cop_access: bool,
}

impl SystemController {
    pub fn new() -> Self {
        Self {
            device_enable: 0,
            device_reset: 0,
            device_init: 0,
            pll_control: 0,
            cpu_ctl_raw: 0,
            cop_ctl_raw: 0,
            cop_state: CopState::Disabled,
            wake_request_count: 0,
            kernel_init_complete: false,
            cop_access: false,
        }
    }

    // Toggled by MemoryBus::set_cop_access around each COP step so that
    // PROCESSOR_ID reads the right value for whichever core is asking.
    pub fn set_cop_access(&mut self, flag: bool) {
        self.cop_access = flag;
    }

    pub fn cop_state(&self) -> CopState {
        self.cop_state
    }

    pub fn kernel_init_complete(&self) -> bool {
        self.kernel_init_complete
    }

    fn read_identity(&self, offset: u32) -> u32 {
        match offset {
            identity_offset::PROCESSOR_ID => {
                if self.cop_access {
                    0xAA
                } else {
                    0x55
                }
            }
            identity_offset::CHIP_ID => CHIP_ID,
            _ => 0,
        }
    }

    fn read_device(&self, offset: u32) -> u32 {
        match offset {
            device_offset::DEVICE_ENABLE => self.device_enable,
            device_offset::DEVICE_RESET => self.device_reset,
            device_offset::DEVICE_INIT => self.device_init,
            device_offset::PLL_CONTROL => self.pll_control,
            device_offset::PLL_STATUS => PLL_LOCKED_BIT,
            _ => 0,
        }
    }

    fn write_device(&mut self, offset: u32, value: u32) {
        match offset {
            device_offset::DEVICE_ENABLE => self.device_enable = value,
            device_offset::DEVICE_RESET => {
                self.device_reset = value;
                self.device_init |= value;
            }
            device_offset::DEVICE_INIT => self.device_init = value,
            device_offset::PLL_CONTROL => self.pll_control = value,
            // PLL_STATUS is read-only.
            _ => {}
        }
    }

    fn read_core(&self, offset: u32) -> u32 {
        match offset {
            // Reads always clear the CPU's own sleep bit: the CPU must never
            // appear asleep to itself.
            core_offset::CPU_CTL => self.cpu_ctl_raw & !PROC_SLEEP_BIT,
            // Reads always report PROC_SLEEP set, preserving the low
            // ready-flag nibble from whatever was last written. This is the
            // contract that lets firmware's `while (!(COP_CTL & PROC_SLEEP))`
            // loops and `wake_core`'s early-return both exit immediately.
            core_offset::COP_CTL => (self.cop_ctl_raw & READY_NIBBLE_MASK) | PROC_SLEEP_BIT,
            _ => 0,
        }
    }

    fn write_core(&mut self, offset: u32, value: u32) {
        match offset {
            core_offset::CPU_CTL => {
                // A self-sleep request is stored but unwound on the very next
                // read (see read_core), so it never actually blocks the CPU.
                self.cpu_ctl_raw = value;
            }
            core_offset::COP_CTL => {
                self.cop_ctl_raw = value;
                self.mirror_into_state_machine(value);
            }
            _ => {}
        }
    }

    fn mirror_into_state_machine(&mut self, value: u32) {
        let requests_wake = value & PROC_SLEEP_BIT == 0;
        match (self.cop_state, requests_wake) {
            (CopState::Disabled, true) => {
                self.cop_state = CopState::Waking;
                self.wake_request_count += 1;
                debug!("cop: wake requested (COP_CTL={:#010x})", value);
            }
            (CopState::Sleeping, true) => {
                self.cop_state = CopState::Waking;
                self.wake_request_count += 1;
            }
            (CopState::Waking, _) => {
                self.cop_state = CopState::Running;
                self.kernel_init_complete = true;
            }
            (_, false) => {
                if self.cop_state == CopState::Running {
                    self.cop_state = CopState::Sleeping;
                }
            }
            _ => {}
        }
        trace!("cop: state now {:?}", self.cop_state);
    }
}

impl Default for SystemController {
    fn default() -> Self {
        Self::new()
    }
}

// The bus-visible view over one of SystemController's three sub-windows.
pub struct SystemControllerView {
    inner: std::rc::Rc<std::cell::RefCell<SystemController>>,
    region: Region,
}

impl SystemControllerView {
    pub fn new(inner: std::rc::Rc<std::cell::RefCell<SystemController>>, region: Region) -> Self {
        Self { inner, region }
    }
}

impl Peripheral for SystemControllerView {
    fn read(&mut self, offset: u32) -> u32 {
        let inner = self.inner.borrow();
        match self.region {
            Region::Identity => inner.read_identity(offset),
            Region::DeviceControl => inner.read_device(offset),
            Region::CoreControl => inner.read_core(offset),
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        let mut inner = self.inner.borrow_mut();
        match self.region {
            Region::Identity => {} // read-only window
            Region::DeviceControl => inner.write_device(offset, value),
            Region::CoreControl => inner.write_core(offset, value),
        }
    }
}
