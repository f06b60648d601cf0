// End-to-end scenarios driving the emulator through its public API only,
// the way a firmware bring-up harness would.

use std::cell::RefCell;
use std::rc::Rc;

use pp5021c::cpu::{Bus, Cpu};
use pp5021c::{Button, DiskBackend, Emulator, EmulatorConfig, RamDisk};

// Peripheral-internal register offsets not re-exported by `pp5021c::map`
// (the map only carries bus base addresses and the ATA task file).
mod offset {
    pub mod timer {
        pub const TIMER1_CONFIG: u32 = 0x00;
    }
    pub mod irq {
        pub const STATUS_ENABLED: u32 = 0x04;
        pub const ENABLE_SET: u32 = 0x0C;
        pub const CLEAR: u32 = 0x14;
    }
    pub mod i2c {
        pub const CONTROL: u32 = 0x00;
        pub const ADDRESS: u32 = 0x04;
        pub const CURRENT_REGISTER: u32 = 0x08;
        pub const DATA0: u32 = 0x0C;
        pub const STATUS: u32 = 0x1C;
    }
    pub mod clickwheel {
        pub const STATUS: u32 = 0x00;
        pub const DATA: u32 = 0x04;
    }
    pub mod core_control {
        pub const COP_CTL: u32 = 0x04;
    }
}

const TIMER_ENABLE_BIT: u32 = 1 << 31;
const TIMER_REPEAT_BIT: u32 = 1 << 30;
const TIMER1_SOURCE_BIT: u32 = 1 << 0;
const ATA_DRQ: u8 = 1 << 3;
const I2C_READ_BIT: u8 = 1 << 7;
const I2C_START_BIT: u32 = 1 << 31;
const I2C_STATUS_ACK: u32 = 0x01;
const CLICKWHEEL_DATA_AVAILABLE: u32 = 1;

// A minimal ARM7TDMI stand-in that recognizes exactly one encoding,
// MOV R0, #0x42, and otherwise idles. This is the only scenario that needs
// a real CPU, since it exercises instruction fetch.
struct MovR0Cpu {
    state: Rc<RefCell<CpuState>>,
}

#[derive(Default)]
struct CpuState {
    regs: [u32; 16],
    pc: u32,
}

impl MovR0Cpu {
    fn new(state: Rc<RefCell<CpuState>>) -> Self {
        Self { state }
    }
}

impl Cpu for MovR0Cpu {
    fn reset(&mut self) {
        *self.state.borrow_mut() = CpuState::default();
    }

    fn step(&mut self, bus: &mut dyn Bus) -> u32 {
        let mut state = self.state.borrow_mut();
        let pc = state.pc;
        let word = u32::from_le_bytes([bus.read8(pc), bus.read8(pc + 1), bus.read8(pc + 2), bus.read8(pc + 3)]);
        if word == 0xE3A00042 {
            state.regs[0] = 0x42;
        }
        state.pc = pc + 4;
        4
    }

    fn get_reg(&self, index: u8) -> u32 {
        self.state.borrow().regs[index as usize]
    }

    fn set_reg(&mut self, index: u8, value: u32) {
        self.state.borrow_mut().regs[index as usize] = value;
    }

    fn cpsr(&self) -> u32 {
        0
    }

    fn set_cpsr(&mut self, _value: u32) {}

    fn is_thumb(&self) -> bool {
        false
    }

    fn set_irq_line(&mut self, _asserted: bool) {}

    fn set_fiq_line(&mut self, _asserted: bool) {}
}

// Burns a fixed cycle count per step without touching the bus. Used by
// every scenario that pokes registers directly rather than executing
// firmware.
struct IdleCpu {
    cycles_per_step: u32,
}

impl Cpu for IdleCpu {
    fn reset(&mut self) {}

    fn step(&mut self, _bus: &mut dyn Bus) -> u32 {
        self.cycles_per_step
    }

    fn get_reg(&self, _index: u8) -> u32 {
        0
    }

    fn set_reg(&mut self, _index: u8, _value: u32) {}

    fn cpsr(&self) -> u32 {
        0
    }

    fn set_cpsr(&mut self, _value: u32) {}

    fn is_thumb(&self) -> bool {
        false
    }

    fn set_irq_line(&mut self, _asserted: bool) {}

    fn set_fiq_line(&mut self, _asserted: bool) {}
}

fn idle_harness() -> Emulator {
    Emulator::new(EmulatorConfig::default(), Box::new(IdleCpu { cycles_per_step: 4 }), None).unwrap()
}

// S1: RAM read/write/execute. MOV R0, #0x42 loaded at IRAM offset 0 leaves
// reg[0] == 0x42 and the program counter at 4 after one step.
#[test]
fn s1_ram_read_write_execute() {
    let state = Rc::new(RefCell::new(CpuState::default()));
    let cpu = MovR0Cpu::new(Rc::clone(&state));

    let config = EmulatorConfig { firmware: Some(vec![0x42, 0x00, 0xA0, 0xE3]), ..EmulatorConfig::default() };
    let mut emu = Emulator::new(config, Box::new(cpu), None).unwrap();

    emu.step();

    assert_eq!(state.borrow().regs[0], 0x42);
    assert_eq!(state.borrow().pc, 4);
}

// S2: MBR via ATA. Selecting LBA mode and issuing READ SECTORS against a
// disk whose first sector carries the MBR boot signature returns that
// signature as the last two bytes of the 256-word data burst.
#[test]
fn s2_mbr_via_ata() {
    let mut disk = RamDisk::new(16);
    let mut mbr = [0u8; 512];
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    disk.write(0, &mbr);

    let config = EmulatorConfig { disk: Some(Box::new(disk)), ..EmulatorConfig::default() };
    let mut emu = Emulator::new(config, Box::new(IdleCpu { cycles_per_step: 4 }), None).unwrap();

    use pp5021c::map::{ata, ATA_BASE};
    emu.write32(ATA_BASE + ata::SELECT, 0xE0);
    emu.write32(ATA_BASE + ata::SECTOR, 0);
    emu.write32(ATA_BASE + ata::LCYL, 0);
    emu.write32(ATA_BASE + ata::HCYL, 0);
    emu.write32(ATA_BASE + ata::NSECTOR, 1);
    emu.write32(ATA_BASE + ata::COMMAND_STATUS, 0x20); // READ SECTORS

    assert_ne!(emu.read32(ATA_BASE + ata::COMMAND_STATUS) as u8 & ATA_DRQ, 0);

    let mut bytes = Vec::with_capacity(512);
    for _ in 0..256 {
        let word = emu.read32(ATA_BASE + ata::DATA) as u16;
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
}

// S3: timer repeat fires. timer1 configured for count=100 with enable and
// repeat, ticked one microsecond per step at 80 MHz, asserts at least
// twice over 250 steps.
#[test]
fn s3_timer_repeat_fires() {
    use pp5021c::map::{CPU_INTERRUPT_BASE, TIMERS_BASE};

    let mut emu = Emulator::new(EmulatorConfig::default(), Box::new(IdleCpu { cycles_per_step: 80 }), None).unwrap();

    emu.write32(CPU_INTERRUPT_BASE + offset::irq::ENABLE_SET, TIMER1_SOURCE_BIT);
    emu.write32(TIMERS_BASE + offset::timer::TIMER1_CONFIG, TIMER_ENABLE_BIT | TIMER_REPEAT_BIT | 100);

    let mut fires = 0;
    for _ in 0..250 {
        emu.step();
        if emu.read32(CPU_INTERRUPT_BASE + offset::irq::STATUS_ENABLED) & TIMER1_SOURCE_BIT != 0 {
            fires += 1;
            emu.write32(CPU_INTERRUPT_BASE + offset::irq::CLEAR, TIMER1_SOURCE_BIT);
        }
    }
    assert!(fires >= 2, "expected at least 2 timer1 fires, got {fires}");
}

// S4: click wheel packet. Pressing SELECT makes a data-available status
// bit readable, the returned packet matches the documented idle layout
// with SELECT's bit set, and the status clears after the data read.
#[test]
fn s4_click_wheel_packet() {
    use pp5021c::map::CLICKWHEEL_BASE;

    let mut emu = idle_harness();
    emu.press_button(Button::Select);

    assert_eq!(emu.read32(CLICKWHEEL_BASE + offset::clickwheel::STATUS) & CLICKWHEEL_DATA_AVAILABLE, 1);

    let packet = emu.read32(CLICKWHEEL_BASE + offset::clickwheel::DATA);
    assert_eq!(packet & 0x80000FFF, 0x8000023A);
    assert_ne!(packet & (1 << 16), 0);

    assert_eq!(emu.read32(CLICKWHEEL_BASE + offset::clickwheel::STATUS) & CLICKWHEEL_DATA_AVAILABLE, 0);
}

// S5: I2C PMIC identity. Addressing the PMIC for a single-byte read from
// register 0 and triggering the transfer returns the PMIC's fixed ID byte
// with an ACK status.
#[test]
fn s5_i2c_pmic_identity() {
    use pp5021c::map::I2C_BASE;

    let mut emu = idle_harness();
    const PMIC_ADDRESS: u32 = 0x08;

    emu.write32(I2C_BASE + offset::i2c::ADDRESS, PMIC_ADDRESS | I2C_READ_BIT as u32);
    emu.write32(I2C_BASE + offset::i2c::CURRENT_REGISTER, 0);
    emu.write32(I2C_BASE + offset::i2c::CONTROL, I2C_START_BIT);

    assert_eq!(emu.read32(I2C_BASE + offset::i2c::DATA0), 0x35);
    assert_eq!(emu.read32(I2C_BASE + offset::i2c::STATUS), I2C_STATUS_ACK);
}

// S6: COP rendezvous escape. Polling COP_CTL without ever stepping a COP
// always reports bit 31 set, regardless of what was last written there, so
// a firmware "while (!(COP_CTL & 0x80000000)) {}" loop exits immediately.
#[test]
fn s6_cop_rendezvous_escape() {
    use pp5021c::map::COP_CTL_ADDR;

    let mut emu = idle_harness();

    for pattern in [0u32, 0xFFFF_FFFF, 0x1234_5678, 0x0000_0000] {
        emu.write32(COP_CTL_ADDR, pattern);
        assert_ne!(emu.read32(COP_CTL_ADDR) & 0x8000_0000, 0);
    }

    // Confirms the address used above lands on the same register
    // `core_control::COP_CTL` documents relative to the core-control base.
    assert_eq!(COP_CTL_ADDR, pp5021c::map::CPU_CTL_ADDR + offset::core_control::COP_CTL);
}
