// The top-level shell: owns every component, wires the shared controllers
// together, and drives the step/run loop.
//
// An EmulatorConfig builder collects what the caller wants (SDRAM size, an
// optional firmware image, an optional disk backend), and Emulator::new is
// the only place that wires peripherals onto the bus.

use std::cell::RefCell;
use std::rc::Rc;

use log::{info, trace};

use crate::ata::AtaController;
use crate::bus::MemoryBus;
use crate::cache::CacheController;
use crate::clickwheel::{Button, ClickWheel};
use crate::cpu::{Bus as CpuBus, Cpu};
use crate::device::Shared;
use crate::disk::{DiskBackend, RamDisk};
use crate::dma::DmaController;
use crate::error::Result;
use crate::gpio::Gpio;
use crate::i2c::I2cController;
use crate::i2s::{AudioSample, I2sController};
use crate::interrupt::{InterruptController, InterruptSource, InterruptWindow};
use crate::lcd::{FrameBuffer, Lcd2Bridge, LcdCore, LcdController};
use crate::map;
use crate::system::{CopState, Region, SystemController, SystemControllerView};
use crate::timers::Timers;

// The ARM7TDMI core clock on real PP5021C hardware; used to convert CPU
// cycles into microseconds for the timer and DMA blocks.
pub const CPU_FREQ_MHZ: u32 = 80;

const FRAME_RATE_HZ: u64 = 60;

// Sectors in the default disk created when EmulatorConfig is given no
// backend: 32 MiB, matching the default SDRAM size.
const DEFAULT_DISK_SECTORS: u64 = 64 * 1024;

// Collects everything Emulator::new needs before any peripheral exists.
pub struct EmulatorConfig {
    pub sdram_size: usize,
    // Loaded at IRAM offset 0 (the ARM7TDMI reset vector) before the first
    // step().
    pub firmware: Option<Vec<u8>>,
    pub disk: Option<Box<dyn DiskBackend>>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self { sdram_size: map::SDRAM_MAX_SIZE as usize, firmware: None, disk: None }
    }
}

// Owns the bus and every peripheral, and drives the CPU/COP step loop.
// The ARM7TDMI decode loop itself is supplied by the caller as a Cpu
// implementation; this crate never decodes an instruction.
pub struct Emulator {
    cpu: Box<dyn Cpu>,
    cop: Option<Box<dyn Cpu>>,
    bus: MemoryBus,
    interrupts: Rc<RefCell<InterruptController>>,
    system_controller: Rc<RefCell<SystemController>>,
    gpio: Rc<RefCell<Gpio>>,
    i2s: Rc<RefCell<I2sController>>,
    clickwheel: Rc<RefCell<ClickWheel>>,
    lcd_core: Rc<RefCell<LcdCore>>,
    total_cycles: u64,
    stopped: bool,
}

impl Emulator {
    pub fn new(config: EmulatorConfig, cpu: Box<dyn Cpu>, cop: Option<Box<dyn Cpu>>) -> Result<Self> {
        let mut bus = MemoryBus::new(config.sdram_size)?;

        let interrupts = Rc::new(RefCell::new(InterruptController::new()));
        bus.register_peripheral(
            map::CPU_INTERRUPT_BASE,
            0x18,
            Box::new(InterruptWindow::new(Rc::clone(&interrupts), false)),
        );
        bus.register_peripheral(
            map::COP_INTERRUPT_BASE,
            0x18,
            Box::new(InterruptWindow::new(Rc::clone(&interrupts), true)),
        );

        let system_controller = Rc::new(RefCell::new(SystemController::new()));
        bus.register_peripheral(
            map::SYSTEM_CONTROLLER_BASE,
            0x08,
            Box::new(SystemControllerView::new(Rc::clone(&system_controller), Region::Identity)),
        );
        bus.register_peripheral(
            map::DEVICE_ENABLE_BASE,
            0x14,
            Box::new(SystemControllerView::new(Rc::clone(&system_controller), Region::DeviceControl)),
        );
        bus.register_peripheral(
            map::CPU_CTL_ADDR,
            0x08,
            Box::new(SystemControllerView::new(Rc::clone(&system_controller), Region::CoreControl)),
        );
        bus.attach_system_controller(Rc::clone(&system_controller));

        bus.register_peripheral(map::TIMERS_BASE, 0x18, Box::new(Timers::new(Rc::downgrade(&interrupts))));

        let gpio = Rc::new(RefCell::new(Gpio::new()));
        bus.register_peripheral(map::GPIO_BASE, map::GPIO_END - map::GPIO_BASE + 1, Box::new(Shared(Rc::clone(&gpio))));

        bus.register_peripheral(map::CACHE_CONTROLLER_BASE, 0x10, Box::new(CacheController::new()));

        bus.register_peripheral(
            map::DMA_BASE,
            map::DMA_END - map::DMA_BASE + 1,
            Box::new(DmaController::new(Rc::downgrade(&interrupts))),
        );

        bus.register_peripheral(map::I2C_BASE, 0x20, Box::new(I2cController::new()));

        let i2s = Rc::new(RefCell::new(I2sController::new()));
        bus.register_peripheral(map::I2S_BASE, 0x10, Box::new(Shared(Rc::clone(&i2s))));

        let clickwheel = Rc::new(RefCell::new(ClickWheel::new(Rc::downgrade(&interrupts))));
        bus.register_peripheral(map::CLICKWHEEL_BASE, 0x10, Box::new(Shared(Rc::clone(&clickwheel))));

        let lcd_controller = LcdController::new();
        let lcd_core = lcd_controller.core_handle();
        bus.register_peripheral(map::BCM_LCD_BASE, map::BCM_LCD_END - map::BCM_LCD_BASE + 1, Box::new(lcd_controller));
        bus.register_peripheral(map::LCD2_BRIDGE_BASE, 0x10, Box::new(Lcd2Bridge::new(Rc::clone(&lcd_core))));

        let disk = config.disk.unwrap_or_else(|| Box::new(RamDisk::new(DEFAULT_DISK_SECTORS)));
        bus.register_peripheral(map::ATA_BASE, 0x400, Box::new(AtaController::new(disk, Rc::downgrade(&interrupts))));

        if let Some(firmware) = &config.firmware {
            bus.load_iram(0, firmware)?;
            info!("emulator: loaded {} byte firmware image into IRAM", firmware.len());
        }

        Ok(Self {
            cpu,
            cop,
            bus,
            interrupts,
            system_controller,
            gpio,
            i2s,
            clickwheel,
            lcd_core,
            total_cycles: 0,
            stopped: false,
        })
    }

    // Execute exactly one main-CPU instruction, optionally one COP
    // instruction, and advance every peripheral by the resulting cycle
    // count. Returns the number of CPU cycles the main core consumed.
    //
    // Order: re-derive the IRQ/FIQ lines from the interrupt controller's
    // current state before stepping, so a source asserted by the previous
    // step's peripheral tick is visible to this step's CPU; step the main
    // CPU; step the COP if it should run this cycle; tick every peripheral
    // by the main CPU's cycle count.
    pub fn step(&mut self) -> u32 {
        self.gpio_to_interrupt();

        self.cpu.set_irq_line(self.interrupts.borrow().has_pending_irq());
        self.cpu.set_fiq_line(self.interrupts.borrow().has_pending_fiq());
        let cycles = self.cpu.step(&mut self.bus);

        if let Some(cop) = &mut self.cop {
            if self.system_controller.borrow().cop_state() == CopState::Running {
                cop.set_irq_line(self.interrupts.borrow().has_pending_irq_cop());
                cop.set_fiq_line(self.interrupts.borrow().has_pending_fiq_cop());
                self.bus.set_cop_access(true);
                cop.step(&mut self.bus);
                self.bus.set_cop_access(false);
            }
        }

        self.bus.tick_peripherals(cycles, CPU_FREQ_MHZ);
        self.total_cycles += cycles as u64;
        cycles
    }

    // Latches a pending GPIO edge into the shared interrupt controller.
    // GPIO asserts no source of its own (unlike timers/DMA/ATA, which hold
    // a Weak<RefCell<InterruptController>>), because its pending state is
    // a level computed across all twelve ports, not a single fire event.
    fn gpio_to_interrupt(&mut self) {
        if self.gpio.borrow().has_pending_interrupt() {
            self.interrupts.borrow_mut().assert(InterruptSource::Gpio);
        }
    }

    // Step until max_cycles total CPU cycles have elapsed or stop() was
    // called.
    pub fn run(&mut self, max_cycles: u64) {
        while !self.stopped && self.total_cycles < max_cycles {
            self.step();
        }
    }

    // Step for one display frame's worth of cycles at CPU_FREQ_MHZ and
    // FRAME_RATE_HZ, the unit a host front-end drives its redraw loop with.
    pub fn run_frame(&mut self) {
        let cycles_per_frame = (CPU_FREQ_MHZ as u64 * 1_000_000) / FRAME_RATE_HZ;
        let start = self.total_cycles;
        while !self.stopped && self.total_cycles - start < cycles_per_frame {
            self.step();
        }
    }

    // Breaks out of any in-progress run/run_frame loop at the next step()
    // boundary.
    pub fn stop(&mut self) {
        trace!("emulator: stop requested at cycle {}", self.total_cycles);
        self.stopped = true;
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    // --- Host-facing peripheral access -------------------------------
    //
    // The click wheel, GPIO external inputs, and the audio/display sinks
    // are driven by whatever owns the emulator (a CLI frontend, a test
    // harness), not by the CPU, so they need a handle that survives past
    // construction alongside the bus's type-erased Box<dyn Peripheral>.

    pub fn press_button(&self, button: Button) {
        self.clickwheel.borrow_mut().press(button);
    }

    pub fn release_button(&self, button: Button) {
        self.clickwheel.borrow_mut().release(button);
    }

    pub fn touch_wheel(&self, position: u8) {
        self.clickwheel.borrow_mut().touch(position);
    }

    pub fn untouch_wheel(&self) {
        self.clickwheel.borrow_mut().untouch();
    }

    pub fn rotate_wheel(&self, delta: i8) {
        self.clickwheel.borrow_mut().rotate(delta);
    }

    pub fn set_gpio_external_input(&self, port: usize, value: u32) {
        self.gpio.borrow_mut().set_external_input(port, value);
    }

    pub fn set_audio_drain_callback(&self, cb: Box<dyn FnMut(&[AudioSample])>) {
        self.i2s.borrow_mut().set_drain_callback(cb);
    }

    pub fn set_display_update_callback(&self, cb: Box<dyn FnMut(&FrameBuffer)>) {
        self.lcd_core.borrow_mut().set_update_callback(cb);
    }

    // --- Direct bus access --------------------------------------------
    //
    // A host harness driving firmware bring-up (or an integration test
    // asserting on register-level behavior) needs to read and write
    // arbitrary addresses without owning a CPU.

    pub fn read8(&mut self, addr: u32) -> u8 {
        self.bus.read8(addr)
    }

    pub fn read16(&mut self, addr: u32) -> u16 {
        self.bus.read16(addr)
    }

    pub fn read32(&mut self, addr: u32) -> u32 {
        self.bus.read32(addr)
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        self.bus.write8(addr, value);
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        self.bus.write16(addr, value);
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.bus.write32(addr, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Bus as CpuBus;

    // Enough of an ARM7TDMI to drive the step loop in tests without
    // decoding real instructions: it always reports a fixed cycle count
    // and exposes the IRQ/FIQ lines it was last given so tests can assert
    // on them.
    struct StubCpu {
        cycles_per_step: u32,
        regs: [u32; 16],
        cpsr: u32,
        irq: bool,
        fiq: bool,
        steps: u32,
    }

    impl StubCpu {
        fn new(cycles_per_step: u32) -> Self {
            Self { cycles_per_step, regs: [0; 16], cpsr: 0, irq: false, fiq: false, steps: 0 }
        }
    }

    impl Cpu for StubCpu {
        fn reset(&mut self) {
            self.regs = [0; 16];
            self.cpsr = 0;
        }

        fn step(&mut self, _bus: &mut dyn CpuBus) -> u32 {
            self.steps += 1;
            self.cycles_per_step
        }

        fn get_reg(&self, index: u8) -> u32 {
            self.regs[index as usize]
        }

        fn set_reg(&mut self, index: u8, value: u32) {
            self.regs[index as usize] = value;
        }

        fn cpsr(&self) -> u32 {
            self.cpsr
        }

        fn set_cpsr(&mut self, value: u32) {
            self.cpsr = value;
        }

        fn is_thumb(&self) -> bool {
            false
        }

        fn set_irq_line(&mut self, asserted: bool) {
            self.irq = asserted;
        }

        fn set_fiq_line(&mut self, asserted: bool) {
            self.fiq = asserted;
        }
    }

    fn harness() -> Emulator {
        Emulator::new(EmulatorConfig::default(), Box::new(StubCpu::new(4)), None).unwrap()
    }

    #[test]
    fn step_advances_total_cycles_by_cpu_count() {
        let mut emu = harness();
        emu.step();
        assert_eq!(emu.total_cycles(), 4);
        emu.step();
        assert_eq!(emu.total_cycles(), 8);
    }

    #[test]
    fn run_stops_at_requested_cycle_budget() {
        let mut emu = harness();
        emu.run(10);
        assert!(emu.total_cycles() >= 10);
        assert!(emu.total_cycles() < 20);
    }

    #[test]
    fn stop_breaks_run_early() {
        let mut emu = harness();
        emu.stop();
        emu.run(1_000_000);
        assert_eq!(emu.total_cycles(), 0);
    }

    #[test]
    fn run_frame_advances_roughly_one_frame_of_cycles() {
        let mut emu = harness();
        emu.run_frame();
        let cycles_per_frame = (CPU_FREQ_MHZ as u64 * 1_000_000) / FRAME_RATE_HZ;
        assert!(emu.total_cycles() >= cycles_per_frame);
    }

    #[test]
    fn click_wheel_press_is_visible_on_the_bus() {
        let mut emu = harness();
        emu.press_button(Button::Select);
        assert_ne!(emu.read32(map::CLICKWHEEL_BASE) & 0x01, 0);
    }

    #[test]
    fn cop_never_steps_while_disabled() {
        let mut emu = Emulator::new(EmulatorConfig::default(), Box::new(StubCpu::new(4)), Some(Box::new(StubCpu::new(4)))).unwrap();
        for _ in 0..10 {
            emu.step();
        }
        // The COP state machine starts Disabled and nothing in this test
        // writes COP_CTL, so it should never transition to Running.
        assert_eq!(emu.system_controller.borrow().cop_state(), CopState::Disabled);
    }
}
