// Twelve general-purpose I/O ports.

use log::trace;

use crate::device::Peripheral;
use crate::map::{GPIO_PORT_COUNT, GPIO_PORT_STRIDE};

pub mod offset {
    pub const ENABLE: u32 = 0x00;
    pub const OUTPUT_ENABLE: u32 = 0x04;
    pub const OUTPUT_VALUE: u32 = 0x08;
    pub const INPUT_VALUE: u32 = 0x0C;
    pub const INTERRUPT_ENABLE: u32 = 0x10;
    // Read returns latched edges; write-1-to-clear the matching bits.
    pub const INTERRUPT_STATUS: u32 = 0x14;
}

const PIN_MASK: u32 = 0xFF;

#[derive(Debug, Default, Clone, Copy)]
struct Port {
    enable: u32,
    output_enable: u32,
    output_value: u32,
    external_input: u32,
    interrupt_enable: u32,
    interrupt_status: u32,
}

impl Port {
    fn input_value(&self) -> u32 {
        ((self.output_value & self.output_enable) | (self.external_input & !self.output_enable)) & PIN_MASK
    }
}

// Twelve 8-pin ports, labelled A..L to match the firmware's naming.
pub struct Gpio {
    ports: [Port; GPIO_PORT_COUNT],
    on_output_change: Option<Box<dyn FnMut(usize, u32)>>,
}

impl Gpio {
    pub fn new() -> Self {
        Self { ports: [Port::default(); GPIO_PORT_COUNT], on_output_change: None }
    }

    pub fn set_output_change_callback(&mut self, cb: Box<dyn FnMut(usize, u32)>) {
        self.on_output_change = Some(cb);
    }

    // Drive port's external input pins (the half of input_value not
    // overridden by output_enable), asserting any newly-triggered
    // interrupt-enabled pins as changed.
    pub fn set_external_input(&mut self, port: usize, value: u32) {
        let Some(p) = self.ports.get_mut(port) else { return };
        let before = p.input_value();
        p.external_input = value & PIN_MASK;
        let after = p.input_value();
        let changed = before ^ after;
        p.interrupt_status |= changed & p.interrupt_enable;
    }

    pub fn input_value(&self, port: usize) -> u32 {
        self.ports.get(port).map(Port::input_value).unwrap_or(0)
    }

    // True if any port has a latched, enabled interrupt-status bit set,
    // the condition the emulator shell ORs into InterruptSource::Gpio.
    pub fn has_pending_interrupt(&self) -> bool {
        self.ports.iter().any(|p| p.interrupt_status & p.interrupt_enable != 0)
    }

    fn port_and_offset(addr_offset: u32) -> (usize, u32) {
        let port = (addr_offset / GPIO_PORT_STRIDE) as usize;
        let reg = addr_offset % GPIO_PORT_STRIDE;
        (port, reg)
    }
}

impl Default for Gpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for Gpio {
    fn read(&mut self, offset: u32) -> u32 {
        let (port, reg) = Self::port_and_offset(offset);
        let Some(p) = self.ports.get(port) else { return 0 };
        match reg {
            offset::ENABLE => p.enable,
            offset::OUTPUT_ENABLE => p.output_enable,
            offset::OUTPUT_VALUE => p.output_value,
            offset::INPUT_VALUE => p.input_value(),
            offset::INTERRUPT_ENABLE => p.interrupt_enable,
            offset::INTERRUPT_STATUS => p.interrupt_status,
            _ => 0,
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        let (port, reg) = Self::port_and_offset(offset);
        let Some(p) = self.ports.get_mut(port) else { return };
        match reg {
            offset::ENABLE => p.enable = value & PIN_MASK,
            offset::OUTPUT_ENABLE => p.output_enable = value & PIN_MASK,
            offset::OUTPUT_VALUE => {
                p.output_value = value & PIN_MASK;
                trace!("gpio: port {} output = {:#04x}", port, p.output_value);
                if let Some(cb) = &mut self.on_output_change {
                    cb(port, p.output_value);
                }
            }
            offset::INTERRUPT_ENABLE => p.interrupt_enable = value & PIN_MASK,
            // Write-1-to-clear: never write a bit to 1 directly.
            offset::INTERRUPT_STATUS => p.interrupt_status &= !value,
            // INPUT_VALUE is read-only.
            _ => {}
        }
    }
}
