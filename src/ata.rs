// ATA task-file interface.
//
// Task-file registers sit at a 4-byte stride rather than the 1-byte stride
// a plain ATA host controller would use; offsets are drawn from
// crate::map::ata. LBA48 support follows real ATA's high-order-byte
// convention: writing a task-file register twice in a row latches the
// first write as the "previous" (high) byte and the second as "current"
// (low), rather than exposing separate high/low addresses.

use log::{debug, trace};
use std::cell::RefCell;
use std::rc::Weak;

use crate::device::Peripheral;
use crate::disk::{DiskBackend, SECTOR_SIZE};
use crate::interrupt::{InterruptController, InterruptSource};
use crate::map::ata as offset;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        const BSY  = 1 << 7;
        const DRDY = 1 << 6;
        const DF   = 1 << 5;
        const DSC  = 1 << 4;
        const DRQ  = 1 << 3;
        const ERR  = 1 << 0;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u8 {
        // Disables interrupt generation when set.
        const NIEN = 1 << 1;
        const SRST = 1 << 2;
    }
}

mod command {
    pub const IDENTIFY: u8 = 0xEC;
    pub const READ_SECTORS: u8 = 0x20;
    pub const READ_SECTORS_EXT: u8 = 0x24;
    pub const READ_MULTIPLE: u8 = 0xC4;
    pub const WRITE_SECTORS: u8 = 0x30;
    pub const WRITE_MULTIPLE: u8 = 0xC5;
    pub const FLUSH_CACHE: u8 = 0xE7;
    pub const FLUSH_CACHE_EXT: u8 = 0xEA;
    pub const STANDBY_IMMEDIATE: u8 = 0xE0;
    pub const IDLE_IMMEDIATE: u8 = 0xE1;
    pub const SET_FEATURES: u8 = 0xEF;
    pub const SET_MULTIPLE: u8 = 0xC6;
}

const ABORT: u8 = 0x04;
const DIAGNOSTIC_PASSED: u8 = 0x01;
const LBA_MODE_BIT: u8 = 1 << 6;
const HEAD_MASK: u8 = 0x0F;

const CHS_HEADS: u32 = 16;
const CHS_SECTORS_PER_TRACK: u32 = 63;

const MODEL: &str = "PP5021C EMULATED DISK                  ";
const FIRMWARE: &str = "1.00    ";
const SERIAL: &str = "PP5021EMU00000000001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

// One task-file byte with real ATA's two-deep write history, used by LBA48
// addressing to recover the "high" half of a 16-bit field.
#[derive(Debug, Default, Clone, Copy)]
struct HobByte {
    current: u8,
    previous: u8,
}

impl HobByte {
    fn write(&mut self, value: u8) {
        self.previous = self.current;
        self.current = value;
    }

    fn combined16(&self) -> u16 {
        ((self.previous as u16) << 8) | self.current as u16
    }
}

pub struct AtaController {
    error_feature: HobByte,
    sector_count: HobByte,
    sector_num: HobByte,
    cyl_low: HobByte,
    cyl_high: HobByte,
    select: u8,
    status: Status,
    control: Control,
    buffer: Vec<u8>,
    buffer_pos: usize,
    direction: Direction,
    current_lba: u64,
    remaining_sectors: u32,
    multiple_count: u8,
    disk: Box<dyn DiskBackend>,
    interrupts: Weak<RefCell<InterruptController>>,
}

impl AtaController {
    pub fn new(disk: Box<dyn DiskBackend>, interrupts: Weak<RefCell<InterruptController>>) -> Self {
        Self {
            error_feature: HobByte::default(),
            sector_count: HobByte::default(),
            sector_num: HobByte::default(),
            cyl_low: HobByte::default(),
            cyl_high: HobByte::default(),
            select: LBA_MODE_BIT,
            status: Status::DRDY | Status::DSC,
            control: Control::empty(),
            buffer: vec![0; SECTOR_SIZE],
            buffer_pos: 0,
            direction: Direction::Read,
            current_lba: 0,
            remaining_sectors: 0,
            multiple_count: 1,
            disk,
            interrupts,
        }
    }

    fn lba_mode(&self) -> bool {
        self.select & LBA_MODE_BIT != 0
    }

    fn head(&self) -> u8 {
        self.select & HEAD_MASK
    }

    // 28-bit LBA, or an assumed-geometry CHS translation when not in LBA
    // mode (16 heads, 63 sectors/track).
    fn lba28(&self) -> u64 {
        if self.lba_mode() {
            self.sector_num.current as u64
                | (self.cyl_low.current as u64) << 8
                | (self.cyl_high.current as u64) << 16
                | (self.head() as u64) << 24
        } else {
            let cylinder = (self.cyl_low.current as u32) | (self.cyl_high.current as u32) << 8;
            let head = self.head() as u32;
            let sector = self.sector_num.current.max(1) as u32;
            ((cylinder * CHS_HEADS + head) * CHS_SECTORS_PER_TRACK + (sector - 1)) as u64
        }
    }

    // 48-bit LBA using the HOB (high-order-byte) halves.
    fn lba48(&self) -> u64 {
        self.sector_num.current as u64
            | (self.cyl_low.current as u64) << 8
            | (self.cyl_high.current as u64) << 16
            | (self.sector_num.previous as u64) << 24
            | (self.cyl_low.previous as u64) << 32
            | (self.cyl_high.previous as u64) << 40
    }

    fn sector_count_value(&self, ext: bool) -> u32 {
        if ext {
            let count = self.sector_count.combined16() as u32;
            if count == 0 { 65536 } else { count }
        } else {
            let count = self.sector_count.current as u32;
            if count == 0 { 256 } else { count }
        }
    }

    fn maybe_assert_irq(&mut self) {
        if self.control.contains(Control::NIEN) {
            return;
        }
        if let Some(ic) = self.interrupts.upgrade() {
            ic.borrow_mut().assert(InterruptSource::Ide);
        }
    }

    fn abort(&mut self) {
        self.error_feature.current = ABORT;
        self.status = Status::DRDY | Status::ERR;
        self.maybe_assert_irq();
    }

    fn begin_read(&mut self, lba: u64, count: u32) {
        self.current_lba = lba;
        self.remaining_sectors = count - 1;
        self.direction = Direction::Read;
        self.fetch_sector();
    }

    fn fetch_sector(&mut self) {
        let mut sector = [0u8; SECTOR_SIZE];
        if self.disk.read(self.current_lba, &mut sector) {
            self.buffer.copy_from_slice(&sector);
            self.buffer_pos = 0;
            self.status = Status::DRDY | Status::DRQ;
            self.maybe_assert_irq();
        } else {
            self.abort();
        }
    }

    fn begin_write(&mut self, lba: u64, count: u32) {
        self.current_lba = lba;
        self.remaining_sectors = count - 1;
        self.direction = Direction::Write;
        self.buffer.iter_mut().for_each(|b| *b = 0);
        self.buffer_pos = 0;
        self.status = Status::DRDY | Status::DRQ;
    }

    fn identify(&mut self) {
        let mut words = [0u16; 256];
        words[49] = 1 << 9; // LBA supported
        let lba28_sectors = self.disk.sector_count().min(u32::MAX as u64) as u32;
        words[60] = (lba28_sectors & 0xFFFF) as u16;
        words[61] = (lba28_sectors >> 16) as u16;
        words[83] = 1 << 10; // LBA48 supported
        let lba48_sectors = self.disk.sector_count();
        words[100] = (lba48_sectors & 0xFFFF) as u16;
        words[101] = ((lba48_sectors >> 16) & 0xFFFF) as u16;
        words[102] = ((lba48_sectors >> 32) & 0xFFFF) as u16;
        words[103] = ((lba48_sectors >> 48) & 0xFFFF) as u16;
        write_ascii_words(&mut words, 10, SERIAL);
        write_ascii_words(&mut words, 23, FIRMWARE);
        write_ascii_words(&mut words, 27, MODEL);

        for (i, word) in words.iter().enumerate() {
            // ATA strings are byte-swapped within each word; the raw
            // register words above are not, so swap uniformly on write-out.
            self.buffer[i * 2] = (word >> 8) as u8;
            self.buffer[i * 2 + 1] = (word & 0xFF) as u8;
        }
        self.buffer_pos = 0;
        self.direction = Direction::Read;
        self.remaining_sectors = 0;
        self.status = Status::DRDY | Status::DRQ;
        self.maybe_assert_irq();
    }

    fn dispatch(&mut self, cmd: u8) {
        trace!("ata: command {:#04x}", cmd);
        self.status = Status::BSY;
        self.error_feature.current = 0;
        match cmd {
            command::IDENTIFY => self.identify(),
            command::READ_SECTORS | command::READ_MULTIPLE => {
                let lba = self.lba28();
                let count = self.sector_count_value(false);
                self.begin_read(lba, count);
            }
            command::READ_SECTORS_EXT => {
                let lba = self.lba48();
                let count = self.sector_count_value(true);
                self.begin_read(lba, count);
            }
            command::WRITE_SECTORS | command::WRITE_MULTIPLE => {
                let lba = self.lba28();
                let count = self.sector_count_value(false);
                self.begin_write(lba, count);
            }
            command::FLUSH_CACHE | command::FLUSH_CACHE_EXT | command::STANDBY_IMMEDIATE | command::IDLE_IMMEDIATE | command::SET_FEATURES => {
                self.status = Status::DRDY | Status::DSC;
                self.maybe_assert_irq();
            }
            command::SET_MULTIPLE => {
                self.multiple_count = if self.sector_count.current == 0 { 1 } else { self.sector_count.current };
                self.status = Status::DRDY | Status::DSC;
                self.maybe_assert_irq();
            }
            _ => {
                debug!("ata: aborted unknown command {:#04x}", cmd);
                self.abort();
            }
        }
    }

    fn reset(&mut self) {
        self.status = Status::DRDY | Status::DSC;
        self.error_feature.current = DIAGNOSTIC_PASSED;
        self.buffer_pos = 0;
        self.remaining_sectors = 0;
    }

    fn read_data_word(&mut self) -> u16 {
        if self.buffer_pos + 1 >= self.buffer.len() {
            return 0;
        }
        let word = u16::from_be_bytes([self.buffer[self.buffer_pos], self.buffer[self.buffer_pos + 1]]);
        self.buffer_pos += 2;
        if self.buffer_pos >= SECTOR_SIZE {
            if self.remaining_sectors > 0 {
                self.current_lba += 1;
                self.remaining_sectors -= 1;
                self.fetch_sector();
            } else {
                self.status = Status::DRDY | Status::DSC;
                self.maybe_assert_irq();
            }
        }
        word
    }

    fn write_data_word(&mut self, value: u16) {
        if self.buffer_pos + 1 >= self.buffer.len() {
            return;
        }
        let bytes = value.to_be_bytes();
        self.buffer[self.buffer_pos] = bytes[0];
        self.buffer[self.buffer_pos + 1] = bytes[1];
        self.buffer_pos += 2;
        if self.buffer_pos >= SECTOR_SIZE {
            let mut sector = [0u8; SECTOR_SIZE];
            sector.copy_from_slice(&self.buffer);
            if !self.disk.write(self.current_lba, &sector) {
                self.abort();
                return;
            }
            if self.remaining_sectors > 0 {
                self.current_lba += 1;
                self.remaining_sectors -= 1;
                self.buffer_pos = 0;
                self.status = Status::DRDY | Status::DRQ;
                self.maybe_assert_irq();
            } else {
                self.status = Status::DRDY | Status::DSC;
                self.maybe_assert_irq();
            }
        }
    }

    fn read_status(&mut self, clear_irq: bool) -> u8 {
        if clear_irq {
            if let Some(ic) = self.interrupts.upgrade() {
                ic.borrow_mut().clear(InterruptSource::Ide);
            }
        }
        self.status.bits()
    }
}

fn write_ascii_words(words: &mut [u16; 256], start: usize, text: &str) {
    let bytes = text.as_bytes();
    for (i, pair) in bytes.chunks(2).enumerate() {
        let hi = pair[0];
        let lo = *pair.get(1).unwrap_or(&b' ');
        words[start + i] = ((hi as u16) << 8) | lo as u16;
    }
}

impl Peripheral for AtaController {
    fn read(&mut self, byte_offset: u32) -> u32 {
        match byte_offset {
            offset::DATA => self.read_data_word() as u32,
            offset::ERROR_FEATURE => self.error_feature.current as u32,
            offset::NSECTOR => self.sector_count.current as u32,
            offset::SECTOR => self.sector_num.current as u32,
            offset::LCYL => self.cyl_low.current as u32,
            offset::HCYL => self.cyl_high.current as u32,
            offset::SELECT => self.select as u32,
            offset::COMMAND_STATUS => self.read_status(true) as u32,
            offset::ALT_STATUS => self.read_status(false) as u32,
            offset::CONTROL => self.control.bits() as u32,
            _ => 0,
        }
    }

    fn write(&mut self, byte_offset: u32, value: u32) {
        let byte = value as u8;
        match byte_offset {
            offset::DATA => self.write_data_word(value as u16),
            offset::ERROR_FEATURE => self.error_feature.write(byte),
            offset::NSECTOR => self.sector_count.write(byte),
            offset::SECTOR => self.sector_num.write(byte),
            offset::LCYL => self.cyl_low.write(byte),
            offset::HCYL => self.cyl_high.write(byte),
            offset::SELECT => self.select = byte,
            offset::COMMAND_STATUS => self.dispatch(byte),
            offset::CONTROL => {
                let was_srst = self.control.contains(Control::SRST);
                self.control = Control::from_bits_truncate(byte);
                if self.control.contains(Control::SRST) && !was_srst {
                    self.reset();
                }
            }
            // ALT_STATUS is read-only.
            _ => {}
        }
    }

    // Task-file registers are already byte- or half-word-sized values
    // stored at a 4-byte-aligned offset, so a narrow store never needs
    // recombining with the register's current contents. write already
    // extracts the right width from value itself. DATA, COMMAND, and
    // ALT_STATUS all have a side-effecting read, so the generic
    // read-modify-write default must not be used here.
    fn write_narrow(&mut self, aligned_offset: u32, _lane_shift: u32, _width: crate::device::Width, value: u32) {
        self.write(aligned_offset, value);
    }
}
