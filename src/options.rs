//! Minimal configuration surface. This is a library, not a CLI -- there is
//! no argument parser here, just a small struct a host passes to
//! `crate::driver::Compiler::with_options`.

/// Compiler-wide knobs. Defaults are fine for ordinary use; the explicit
/// constructor exists mainly for tests that want determinism across hosts
/// that may or may not have POPCNT.
#[derive(Copy, Clone, Debug)]
pub struct JitOptions {
    /// Initial size, in bytes, `dynasmrt` reserves for the assembler's
    /// backing buffer before it grows. Purely a performance hint; the
    /// buffer grows on demand regardless.
    pub initial_buffer_size: usize,

    /// Force `crate::cpu::is_popcnt_supported` to report `false` regardless
    /// of the actual host, so tests that exercise the popcnt-unavailable
    /// helper path are reproducible on machines that do have the feature.
    pub force_popcnt_unsupported: bool,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            initial_buffer_size: 4096,
            force_popcnt_unsupported: false,
        }
    }
}
