//! # cache-geometry-rs
//!
//! Infers the geometry of a CPU data cache (line size, capacity, set count and associativity)
//! purely from memory-access latency. Pointer chains are laid out in a large [`arena::Arena`],
//! walked by a [`probe::LatencyProbe`], averaged by the [`converge`] driver until the running
//! mean stabilizes, swept over a parameter axis by [`sweep::run_sweep`], and finally reduced to a
//! single number by the spike policies in [`detect`] and [`infer`].
//!
//! [`instrument::Instrument`] strings the three sweeps (line size, capacity, associativity)
//! together.
pub mod arena;
pub mod chain;
pub mod config;
pub mod converge;
pub mod detect;
pub mod error;
pub mod infer;
pub mod instrument;
pub mod model;
pub mod probe;
pub mod report;
pub mod sweep;

pub use error::Error;

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;
pub const GIB: usize = 1024 * MIB;

/// Convert number of bytes to formatted string
pub fn format_size(bytes: u64) -> String {
    const GB: u64 = GIB as u64;
    const MB: u64 = MIB as u64;
    const KB: u64 = KIB as u64;

    if bytes >= GB {
        format!("{:.2} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Convert number of bytes to formatted string for fixed-width integer string
pub fn format_size_fixed_int(bytes: u64) -> String {
    const GB: u64 = GIB as u64;
    const MB: u64 = MIB as u64;
    const KB: u64 = KIB as u64;

    if bytes >= GB && bytes % GB == 0 {
        format!("{:>4} GiB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{:>4} MiB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{:>4} KiB", bytes / KB)
    } else {
        format!("{:>4} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(48 * KIB as u64), "48.00 KiB");
        assert_eq!(format_size(3 * MIB as u64 / 2), "1.50 MiB");
        assert_eq!(format_size(GIB as u64), "1.00 GiB");
    }

    #[test]
    fn formats_fixed_width_sizes() {
        assert_eq!(format_size_fixed_int(64), "  64 B");
        assert_eq!(format_size_fixed_int(48 * KIB as u64), "  48 KiB");
        assert_eq!(format_size_fixed_int(2 * MIB as u64), "   2 MiB");
        // not a whole number of KiB, so stays in bytes
        assert_eq!(format_size_fixed_int(1536 + 8), "1544 B");
    }
}
