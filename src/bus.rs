// The PP5021C memory bus: address decoding, logical to physical remap, and
// peripheral dispatch.
//
// Peripheral registers are always 32-bit at a 4-byte-aligned offset.
// Narrower loads are derived here by rounding the offset down to its
// enclosing register and masking/shifting the 32-bit value the handler
// returns. Narrower stores are handed to the peripheral itself via
// write_narrow, since only the peripheral knows whether recombining bits
// via a read-modify-write is safe for a given register.

use log::trace;
use std::cell::RefCell;
use std::rc::Rc;

use crate::cpu::Bus as CpuBus;
use crate::device::{Peripheral, Width};
use crate::error::{EmulatorError, Result};
use crate::map;
use crate::system::SystemController;

struct PeripheralSlot {
    base: u32,
    size: u32,
    handler: Box<dyn Peripheral>,
}

#[derive(Debug, Default, Clone, Copy)]
struct RemapEntry {
    logical_mask: u32,
    physical_base: u32,
}

pub struct MemoryBus {
    iram: Vec<u8>,
    sdram: Vec<u8>,
    peripherals: Vec<PeripheralSlot>,
    remap: [RemapEntry; map::REMAP_ENTRY_COUNT],
    cop_access: bool,
    system_controller: Option<Rc<RefCell<SystemController>>>,
}

impl MemoryBus {
    pub fn new(sdram_size: usize) -> Result<Self> {
        if sdram_size > map::SDRAM_MAX_SIZE as usize {
            return Err(EmulatorError::SdramTooLarge { requested: sdram_size });
        }
        Ok(Self {
            iram: vec![0; map::IRAM_SIZE as usize],
            sdram: vec![0; sdram_size],
            peripherals: Vec::new(),
            remap: Default::default(),
            cop_access: false,
            system_controller: None,
        })
    }

    pub fn register_peripheral(&mut self, base: u32, size: u32, handler: Box<dyn Peripheral>) {
        self.peripherals.push(PeripheralSlot { base, size, handler });
    }

    // Lets set_cop_access also mirror into the system controller's
    // processor-ID logic.
    pub fn attach_system_controller(&mut self, sc: Rc<RefCell<SystemController>>) {
        self.system_controller = Some(sc);
    }

    pub fn load_iram(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() > self.iram.len() {
            return Err(EmulatorError::IramImageTooLarge { size: bytes.len() });
        }
        self.iram[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn load_sdram(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() > self.sdram.len() {
            return Err(EmulatorError::SdramImageTooLarge { size: bytes.len(), sdram_size: self.sdram.len() });
        }
        self.sdram[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn set_cop_access(&mut self, flag: bool) {
        self.cop_access = flag;
        if let Some(sc) = &self.system_controller {
            sc.borrow_mut().set_cop_access(flag);
        }
    }

    // Raw byte-level RAM access used by DMA's ATA-transfer callback, which
    // needs to land arbitrary bytes in RAM without going through the
    // width-typed load/store entry points.
    pub fn write_byte_raw(&mut self, addr: u32, value: u8) {
        let addr = self.apply_remap(addr);
        if let Some(byte) = self.ram_byte_mut(addr) {
            *byte = value;
        }
    }

    pub fn read_byte_raw(&mut self, addr: u32) -> u8 {
        let addr = self.apply_remap(addr);
        self.ram_byte(addr).unwrap_or(0)
    }

    pub fn set_remap_entry(&mut self, index: usize, logical_mask: u32, physical_base: u32) {
        if let Some(entry) = self.remap.get_mut(index) {
            *entry = RemapEntry { logical_mask, physical_base };
        }
    }

    fn apply_remap(&self, addr: u32) -> u32 {
        for entry in &self.remap {
            if entry.logical_mask != 0 && addr & entry.logical_mask == entry.logical_mask {
                return entry.physical_base | (addr & !entry.logical_mask);
            }
        }
        addr
    }

    fn ram_byte(&self, addr: u32) -> Option<u8> {
        if (map::IRAM_BASE..=map::IRAM_END).contains(&addr) {
            self.iram.get((addr - map::IRAM_BASE) as usize).copied()
        } else if addr >= map::SDRAM_BASE && (addr - map::SDRAM_BASE) < self.sdram.len() as u32 {
            self.sdram.get((addr - map::SDRAM_BASE) as usize).copied()
        } else {
            None
        }
    }

    fn ram_byte_mut(&mut self, addr: u32) -> Option<&mut u8> {
        if (map::IRAM_BASE..=map::IRAM_END).contains(&addr) {
            self.iram.get_mut((addr - map::IRAM_BASE) as usize)
        } else if addr >= map::SDRAM_BASE && (addr - map::SDRAM_BASE) < self.sdram.len() as u32 {
            self.sdram.get_mut((addr - map::SDRAM_BASE) as usize)
        } else {
            None
        }
    }

    fn is_remap_config(addr: u32) -> bool {
        addr >= map::REMAP_BASE && addr < map::REMAP_BASE + map::REMAP_ENTRY_STRIDE * map::REMAP_ENTRY_COUNT as u32
    }

    fn write_remap_config(&mut self, addr: u32, value: u32) {
        let rel = addr - map::REMAP_BASE;
        let index = (rel / map::REMAP_ENTRY_STRIDE) as usize;
        let reg = rel % map::REMAP_ENTRY_STRIDE;
        let Some(entry) = self.remap.get_mut(index) else { return };
        match reg {
            map::remap::LOGICAL_MASK => entry.logical_mask = value,
            map::remap::PHYSICAL_BASE => entry.physical_base = value,
            _ => {}
        }
    }

    fn read_remap_config(&self, addr: u32) -> u32 {
        let rel = addr - map::REMAP_BASE;
        let index = (rel / map::REMAP_ENTRY_STRIDE) as usize;
        let reg = rel % map::REMAP_ENTRY_STRIDE;
        let Some(entry) = self.remap.get(index) else { return 0 };
        match reg {
            map::remap::LOGICAL_MASK => entry.logical_mask,
            map::remap::PHYSICAL_BASE => entry.physical_base,
            _ => 0,
        }
    }

    fn find_peripheral(&mut self, addr: u32) -> Option<(u32, &mut Box<dyn Peripheral>)> {
        self.peripherals.iter_mut().find(|slot| addr >= slot.base && addr - slot.base < slot.size).map(|slot| (slot.base, &mut slot.handler))
    }

    fn read(&mut self, addr: u32, width: Width) -> u32 {
        let addr = self.apply_remap(addr);

        if let Some(byte0) = self.ram_byte(addr) {
            let mut bytes = [0u8; 4];
            bytes[0] = byte0;
            for i in 1..width.bytes() {
                bytes[i as usize] = self.ram_byte(addr + i).unwrap_or(0);
            }
            return u32::from_le_bytes(bytes);
        }

        if Self::is_remap_config(addr) {
            return self.read_remap_config(addr);
        }

        match self.find_peripheral(addr) {
            Some((base, handler)) => {
                let full_offset = addr - base;
                let aligned_offset = full_offset & !3;
                let lane = (full_offset & 3) * 8;
                let word = handler.read(aligned_offset);
                let shifted = word >> lane.min(31);
                match width {
                    Width::Byte => shifted & 0xFF,
                    Width::Half => shifted & 0xFFFF,
                    Width::Word => word,
                }
            }
            None => {
                trace!("bus: unmapped read at {:#010x}", addr);
                0
            }
        }
    }

    fn write(&mut self, addr: u32, value: u32, width: Width) {
        let addr = self.apply_remap(addr);

        if self.ram_byte(addr).is_some() {
            let bytes = value.to_le_bytes();
            for i in 0..width.bytes() {
                if let Some(slot) = self.ram_byte_mut(addr + i) {
                    *slot = bytes[i as usize];
                }
            }
            return;
        }

        if Self::is_remap_config(addr) {
            self.write_remap_config(addr, value);
            return;
        }

        match self.find_peripheral(addr) {
            Some((base, handler)) => {
                let full_offset = addr - base;
                let aligned_offset = full_offset & !3;
                let lane = (full_offset & 3) * 8;
                match width {
                    Width::Word => handler.write(aligned_offset, value),
                    // Narrow stores are handled by the peripheral itself
                    // (write_narrow), not recombined here: the generic
                    // default does a read-modify-write, which is only safe
                    // for registers whose read has no side effect.
                    Width::Half | Width::Byte => handler.write_narrow(aligned_offset, lane, width, value),
                }
            }
            None => trace!("bus: unmapped write at {:#010x}", addr),
        }
    }

    // Advance every registered peripheral's time-driven state. Called by
    // the emulator shell once per step().
    pub fn tick_peripherals(&mut self, cpu_cycles: u32, cpu_freq_mhz: u32) {
        for slot in &mut self.peripherals {
            slot.handler.tick(cpu_cycles, cpu_freq_mhz);
        }
    }
}

impl CpuBus for MemoryBus {
    fn read8(&mut self, addr: u32) -> u8 {
        self.read(addr, Width::Byte) as u8
    }

    fn read16(&mut self, addr: u32) -> u16 {
        self.read(addr, Width::Half) as u16
    }

    fn read32(&mut self, addr: u32) -> u32 {
        self.read(addr, Width::Word)
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.write(addr, value as u32, Width::Byte);
    }

    fn write16(&mut self, addr: u32, value: u16) {
        self.write(addr, value as u32, Width::Half);
    }

    fn write32(&mut self, addr: u32, value: u32) {
        self.write(addr, value, Width::Word);
    }
}
