/// Page-mapping permission tag (spec §3 "Page mapping"). Translated to the
/// architecture-defined bits by each [`super::PagingMode`] implementation;
/// mapping a page that is already present is always a bug in this kernel and
/// is rejected by `map_page` regardless of the requested permission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    KernelCode,
    KernelDataRo,
    KernelDataRw,
    UserCode,
    UserDataRo,
    UserDataRw,
    Mmio,
    VideoFramebuffer,
}

/// The architectural bits a [`Permission`] maps to, in the layout crossing
/// the loader/kernel boundary (spec §6: bit 0 present, 1 write, 2 user,
/// 3 write-through, 4 cache-disable, 7 large, 8 global, 63 no-execute).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawFlags {
    pub present: bool,
    pub write: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub large: bool,
    pub global: bool,
    pub no_execute: bool,
}

impl Permission {
    /// Maps this permission to architectural bits, *before* intersecting
    /// with a mode's [`super::SupportedFlags`] (a mode without NX support
    /// simply drops `no_execute`, per the NX-probe contract in spec §4.B).
    pub const fn raw_flags(self) -> RawFlags {
        use Permission::*;
        match self {
            KernelCode => RawFlags {
                present: true,
                write: false,
                user: false,
                write_through: false,
                cache_disable: false,
                large: false,
                global: true,
                no_execute: false,
            },
            KernelDataRo => RawFlags {
                present: true,
                write: false,
                user: false,
                write_through: false,
                cache_disable: false,
                large: false,
                global: true,
                no_execute: true,
            },
            KernelDataRw => RawFlags {
                present: true,
                write: true,
                user: false,
                write_through: false,
                cache_disable: false,
                large: false,
                global: true,
                no_execute: true,
            },
            UserCode => RawFlags {
                present: true,
                write: false,
                user: true,
                write_through: false,
                cache_disable: false,
                large: false,
                global: false,
                no_execute: false,
            },
            UserDataRo => RawFlags {
                present: true,
                write: false,
                user: true,
                write_through: false,
                cache_disable: false,
                large: false,
                global: false,
                no_execute: true,
            },
            UserDataRw => RawFlags {
                present: true,
                write: true,
                user: true,
                write_through: false,
                cache_disable: false,
                large: false,
                global: false,
                no_execute: true,
            },
            Mmio => RawFlags {
                present: true,
                write: true,
                user: false,
                write_through: true,
                cache_disable: true,
                large: false,
                global: true,
                no_execute: true,
            },
            VideoFramebuffer => RawFlags {
                present: true,
                write: true,
                user: false,
                write_through: true,
                cache_disable: false,
                large: false,
                global: true,
                no_execute: true,
            },
        }
    }
}

impl RawFlags {
    /// Intersects `no_execute` with whether the running mode actually
    /// supports NX, so "request NX; get NX if possible, otherwise plain
    /// no-exec absent" holds uniformly (spec §4.B NX probe).
    pub const fn clamp_nx(mut self, nx_supported: bool) -> Self {
        if !nx_supported {
            self.no_execute = false;
        }
        self
    }

    pub fn to_bits(self) -> u64 {
        let mut bits = 0u64;
        if self.present {
            bits |= 1 << 0;
        }
        if self.write {
            bits |= 1 << 1;
        }
        if self.user {
            bits |= 1 << 2;
        }
        if self.write_through {
            bits |= 1 << 3;
        }
        if self.cache_disable {
            bits |= 1 << 4;
        }
        if self.large {
            bits |= 1 << 7;
        }
        if self.global {
            bits |= 1 << 8;
        }
        if self.no_execute {
            bits |= 1 << 63;
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_code_is_executable_and_supervisor_only() {
        let flags = Permission::KernelCode.raw_flags();
        assert!(flags.present);
        assert!(!flags.no_execute);
        assert!(!flags.user);
    }

    #[test]
    fn clamp_nx_drops_no_execute_when_unsupported() {
        let flags = Permission::KernelDataRw.raw_flags();
        assert!(flags.no_execute);
        assert!(!flags.clamp_nx(false).no_execute);
        assert!(flags.clamp_nx(true).no_execute);
    }

    #[test]
    fn to_bits_matches_the_documented_layout() {
        let bits = Permission::UserDataRw.raw_flags().to_bits();
        assert_eq!(bits & 0b1, 1, "present");
        assert_eq!((bits >> 1) & 0b1, 1, "write");
        assert_eq!((bits >> 2) & 0b1, 1, "user");
    }
}
