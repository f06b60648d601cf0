// A cycle-counted functional emulator for the PP5021C SoC (the PortalPlayer
// chip used in 5th-generation iPods): memory bus and address decoding, the
// peripheral set (timers, interrupt controller, ATA disk, DMA, I2C/PMIC/
// codec, I2S, click wheel, LCD, GPIO, system/cache controllers with
// dual-core COP rendezvous), and the emulator shell that drives them. The
// ARM7TDMI instruction decoder itself is supplied externally, see cpu.

mod ata;
mod bus;
mod cache;
mod clickwheel;
pub mod cpu;
mod device;
mod disk;
mod dma;
pub mod emulator;
pub mod error;
mod gpio;
mod i2c;
mod i2s;
mod interrupt;
mod lcd;
pub mod map;
mod system;
mod timers;

pub use ata::AtaController;
pub use bus::MemoryBus;
pub use clickwheel::Button;
pub use device::Peripheral;
pub use disk::{DiskBackend, FileDisk, RamDisk, SECTOR_SIZE};
pub use emulator::{Emulator, EmulatorConfig};
pub use error::{EmulatorError, Result};
pub use i2s::AudioSample;
pub use interrupt::InterruptSource;
pub use lcd::{FrameBuffer, HEIGHT, WIDTH};
