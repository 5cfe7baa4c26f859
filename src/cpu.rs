//! CPU feature probing.
//!
//! A single process-wide boolean derived from CPUID, computed once and read
//! thereafter. Emitted code can consult [`is_popcnt_supported`] to pick
//! between a POPCNT-based helper and a portable fallback; the core compiler
//! itself never branches on this.

use once_cell::sync::Lazy;

#[cfg(target_arch = "x86_64")]
fn probe_popcnt() -> bool {
    raw_cpuid::CpuId::new()
        .get_feature_info()
        .map(|f| f.has_popcnt())
        .unwrap_or(false)
}

#[cfg(not(target_arch = "x86_64"))]
fn probe_popcnt() -> bool {
    true
}

static POPCNT_SUPPORTED: Lazy<bool> = Lazy::new(probe_popcnt);

/// Whether the host CPU supports the POPCNT instruction.
///
/// Cheap to call repeatedly; the underlying CPUID query only runs once.
pub fn is_popcnt_supported() -> bool {
    *POPCNT_SUPPORTED
}

/// As [`is_popcnt_supported`], but honoring
/// [`crate::options::JitOptions::force_popcnt_unsupported`] so tests can
/// exercise the popcnt-unavailable path on hosts that do have the feature.
pub fn is_popcnt_supported_with(options: &crate::options::JitOptions) -> bool {
    !options.force_popcnt_unsupported && is_popcnt_supported()
}
