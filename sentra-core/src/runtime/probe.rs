//! Host resource probing for pre-load validation.
//!
//! The runtime manager refuses to start an expensive native load when the
//! host categorically cannot fit the model, and rejects known emulated
//! targets outright. The probe is a trait so tests can script any host
//! condition without touching `/proc`.

/// Memory figures in megabytes.
#[derive(Debug, Clone, Copy)]
pub struct HostMemory {
    pub total_mb: u64,
    pub available_mb: u64,
}

/// Source of host facts consulted before a model load.
pub trait HostProbe: Send + Sync + 'static {
    /// Current memory figures, or `None` when the platform offers no
    /// reliable source (the check is then skipped, not failed).
    fn memory(&self) -> Option<HostMemory>;

    /// `Some(description)` when the host is a known-unsupported emulated or
    /// virtualized target. Loading the engine on these hangs or crashes the
    /// native layer, so initialization fails fast and non-retryably.
    fn emulated_environment(&self) -> Option<String>;
}

/// Default probe backed by `/proc/meminfo` and DMI identifiers on Linux.
/// On other platforms both checks are skipped.
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn memory(&self) -> Option<HostMemory> {
        #[cfg(target_os = "linux")]
        {
            let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
            let total_kb = parse_meminfo_field(&meminfo, "MemTotal:")?;
            let available_kb = parse_meminfo_field(&meminfo, "MemAvailable:")?;
            Some(HostMemory {
                total_mb: total_kb / 1024,
                available_mb: available_kb / 1024,
            })
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    fn emulated_environment(&self) -> Option<String> {
        #[cfg(target_os = "linux")]
        {
            let product = std::fs::read_to_string("/sys/devices/virtual/dmi/id/product_name")
                .ok()?
                .trim()
                .to_string();
            if is_known_emulator(&product) {
                return Some(product);
            }
            None
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn parse_meminfo_field(meminfo: &str, field: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with(field))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn is_known_emulator(product: &str) -> bool {
    const KNOWN: &[&str] = &["goldfish", "ranchu", "QEMU", "Standard PC (Q35", "VirtualBox"];
    KNOWN.iter().any(|tag| product.contains(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_known_emulator_products() {
        assert!(is_known_emulator("QEMU Virtual Machine"));
        assert!(is_known_emulator("goldfish"));
        assert!(!is_known_emulator("Pixel 8 Pro"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parses_meminfo_fields() {
        let sample = "MemTotal:       16303412 kB\nMemFree:         1234 kB\nMemAvailable:    8151706 kB\n";
        assert_eq!(parse_meminfo_field(sample, "MemTotal:"), Some(16_303_412));
        assert_eq!(
            parse_meminfo_field(sample, "MemAvailable:"),
            Some(8_151_706)
        );
        assert_eq!(parse_meminfo_field(sample, "SwapTotal:"), None);
    }
}
