//! Bit flags naming which `SystemSample` fields the running kernel actually
//! populated this cycle, mirroring the historical `/proc/stat` field-count
//! progression on Linux (4, 5, 7, 8, 9 and 10-field cpu lines each unlock
//! one more counter).

pub const CPU_USER: u32 = 1 << 0;
pub const CPU_NICE: u32 = 1 << 1;
pub const CPU_SYSTEM: u32 = 1 << 2;
pub const CPU_IOWAIT: u32 = 1 << 3;
pub const CPU_HARDIRQ: u32 = 1 << 4;
pub const CPU_SOFTIRQ: u32 = 1 << 5;
pub const CPU_STEAL: u32 = 1 << 6;
pub const CPU_GUEST: u32 = 1 << 7;
pub const CPU_GUEST_NICE: u32 = 1 << 8;
pub const FD_SYSTEM: u32 = 1 << 9;
pub const FD_PROCESS: u32 = 1 << 10;
pub const IO_PROCESS: u32 = 1 << 11;
