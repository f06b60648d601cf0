// PP5021C memory map: base addresses and register offsets, kept in one
// place rather than scattered across each peripheral.

pub const IRAM_BASE: u32 = 0x0000_0000;
pub const IRAM_SIZE: u32 = 128 * 1024;
pub const IRAM_END: u32 = IRAM_BASE + IRAM_SIZE - 1;

pub const SDRAM_BASE: u32 = 0x1000_0000;
pub const SDRAM_MAX_SIZE: u32 = 32 * 1024 * 1024;
pub const SDRAM_END: u32 = 0x11FF_FFFF;

pub const BCM_LCD_BASE: u32 = 0x3000_0000;
pub const BCM_LCD_END: u32 = 0x3FFF_FFFF;
// Only bits 16..18 of the offset within the BCM window are decoded.
pub const BCM_LCD_DECODE_MASK: u32 = 0x0007_0000;

pub const SYSTEM_CONTROLLER_BASE: u32 = 0x6000_0000;
pub const CPU_INTERRUPT_BASE: u32 = 0x6000_4000;
pub const COP_INTERRUPT_BASE: u32 = 0x6000_4100;
// Four 8-byte entries: logical_mask then physical_base.
pub const REMAP_BASE: u32 = 0x6000_3000;
pub const REMAP_ENTRY_STRIDE: u32 = 0x08;
pub const REMAP_ENTRY_COUNT: usize = 4;
pub mod remap {
    pub const LOGICAL_MASK: u32 = 0x00;
    pub const PHYSICAL_BASE: u32 = 0x04;
}

pub const TIMERS_BASE: u32 = 0x6000_5000;
pub const DEVICE_ENABLE_BASE: u32 = 0x6000_6000;
pub const CPU_CTL_ADDR: u32 = 0x6000_7000;
pub const COP_CTL_ADDR: u32 = 0x6000_7004;
pub const DMA_BASE: u32 = 0x6000_A000;
pub const DMA_END: u32 = 0x6000_B0FF;
pub const CACHE_CONTROLLER_BASE: u32 = 0x6000_C000;

pub const GPIO_BASE: u32 = 0x6000_D000;
pub const GPIO_PORT_STRIDE: u32 = 0x20;
pub const GPIO_PORT_COUNT: usize = 12;
pub const GPIO_END: u32 = GPIO_BASE + (GPIO_PORT_STRIDE * GPIO_PORT_COUNT as u32) - 1;

pub const I2S_BASE: u32 = 0x7000_2800;
pub const LCD2_BRIDGE_BASE: u32 = 0x7000_8A00;
pub const I2C_BASE: u32 = 0x7000_C000;
pub const CLICKWHEEL_BASE: u32 = 0x7000_C100;

pub const ATA_BASE: u32 = 0xC300_0000;

// Task-file offsets inside the ATA window. Each register sits at a
// 4-byte-aligned stride, not the 1-byte stride a plain ATA host would use.
pub mod ata {
    pub const DATA: u32 = 0x1E0;
    pub const ERROR_FEATURE: u32 = 0x1E4;
    pub const NSECTOR: u32 = 0x1E8;
    pub const SECTOR: u32 = 0x1EC;
    pub const LCYL: u32 = 0x1F0;
    pub const HCYL: u32 = 0x1F4;
    pub const SELECT: u32 = 0x1F8;
    pub const COMMAND_STATUS: u32 = 0x1FC;
    pub const CONTROL: u32 = 0x3F8;
    pub const ALT_STATUS: u32 = 0x3FC;
}
