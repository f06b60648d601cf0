// The ATA controller's injected block-device backend.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{EmulatorError, Result};

pub const SECTOR_SIZE: usize = 512;

// An injected block device. read/write return false on media error
// (out-of-range LBA, I/O failure); the ATA controller translates a false
// into an aborted-command status.
pub trait DiskBackend {
    fn sector_count(&self) -> u64;
    fn read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> bool;
    fn write(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> bool;
}

// An in-memory disk, used by the test suite and as the default when no
// --disk image is supplied.
pub struct RamDisk {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

impl RamDisk {
    pub fn new(sector_count: u64) -> Self {
        Self { sectors: vec![[0u8; SECTOR_SIZE]; sector_count as usize] }
    }

    // Build a disk from a flat byte buffer, zero-padding the final partial
    // sector if the buffer's length isn't a sector multiple.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let sector_count = bytes.len().div_ceil(SECTOR_SIZE);
        let mut sectors = vec![[0u8; SECTOR_SIZE]; sector_count];
        for (i, chunk) in bytes.chunks(SECTOR_SIZE).enumerate() {
            sectors[i][..chunk.len()].copy_from_slice(chunk);
        }
        Self { sectors }
    }
}

impl DiskBackend for RamDisk {
    fn sector_count(&self) -> u64 {
        self.sectors.len() as u64
    }

    fn read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> bool {
        match self.sectors.get(lba as usize) {
            Some(sector) => {
                buf.copy_from_slice(sector);
                true
            }
            None => false,
        }
    }

    fn write(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> bool {
        match self.sectors.get_mut(lba as usize) {
            Some(sector) => {
                sector.copy_from_slice(buf);
                true
            }
            None => false,
        }
    }
}

// A flat sector-addressable image file on the host filesystem, opened by
// the CLI's --disk flag.
pub struct FileDisk {
    file: File,
    sector_count: u64,
}

impl FileDisk {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(|source| EmulatorError::DiskOpen {
            path: path.to_string(),
            source,
        })?;
        let len = file.metadata().map_err(|source| EmulatorError::DiskOpen { path: path.to_string(), source })?.len();
        Ok(Self { file, sector_count: len / SECTOR_SIZE as u64 })
    }
}

impl DiskBackend for FileDisk {
    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> bool {
        if lba >= self.sector_count {
            return false;
        }
        self.file.seek(SeekFrom::Start(lba * SECTOR_SIZE as u64)).is_ok() && self.file.read_exact(buf).is_ok()
    }

    fn write(&mut self, lba: u64, buf: &[u8; SECTOR_SIZE]) -> bool {
        if lba >= self.sector_count {
            return false;
        }
        self.file.seek(SeekFrom::Start(lba * SECTOR_SIZE as u64)).is_ok() && self.file.write_all(buf).is_ok()
    }
}
