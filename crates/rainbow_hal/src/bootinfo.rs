//! Boot handoff record (spec §6 "Boot handoff (from the loader)").
//!
//! The loader is an external collaborator (spec.md §1 "Out of scope");
//! this module only defines the ABI-stable record it hands the kernel and
//! the conversion into [`rainbow_mm::pmm::MemoryDescriptor`]s the PMM
//! consumes at `init` time.

use rainbow_mm::pmm::{MemoryDescriptor, MemoryKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FirmwareKind {
    Bios = 0,
    Uefi = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MemoryDescriptorKind {
    Available,
    Reserved,
    Unusable,
    Persistent,
    Bootloader,
    BootModule,
    KernelCode,
    KernelData,
    AcpiReclaimable,
    AcpiNvs,
    Launcher,
}

impl From<MemoryDescriptorKind> for MemoryKind {
    fn from(kind: MemoryDescriptorKind) -> Self {
        match kind {
            MemoryDescriptorKind::Available => MemoryKind::Available,
            MemoryDescriptorKind::Reserved => MemoryKind::Reserved,
            MemoryDescriptorKind::Unusable => MemoryKind::Unusable,
            MemoryDescriptorKind::Persistent => MemoryKind::Persistent,
            MemoryDescriptorKind::Bootloader => MemoryKind::Bootloader,
            MemoryDescriptorKind::BootModule => MemoryKind::BootModule,
            MemoryDescriptorKind::KernelCode => MemoryKind::KernelCode,
            MemoryDescriptorKind::KernelData => MemoryKind::KernelData,
            MemoryDescriptorKind::AcpiReclaimable => MemoryKind::AcpiReclaimable,
            MemoryDescriptorKind::AcpiNvs => MemoryKind::AcpiNvs,
            MemoryDescriptorKind::Launcher => MemoryKind::Launcher,
        }
    }
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct RawMemoryDescriptor {
    pub kind: MemoryDescriptorKind,
    pub flags: u32,
    pub address: u64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct ModuleDescriptor {
    pub name: [u8; 64],
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct FramebufferInfo {
    pub pixels: u64,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub format: u32,
}

/// The record handed from the loader to `kernel_init`. Everything here is
/// `Copy` and `repr(C)` so the loader and the kernel agree on layout without
/// sharing a build (spec.md §1's external-collaborator boundary).
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct BootInfo {
    pub version: u32,
    pub firmware: FirmwareKind,
    pub memory_map: *const RawMemoryDescriptor,
    pub memory_map_len: usize,
    pub initrd_address: u64,
    pub initrd_size: u64,
    pub framebuffer: Option<FramebufferInfo>,
    pub acpi_rsdp: u64,
    pub modules: *const ModuleDescriptor,
    pub modules_len: usize,
}

impl BootInfo {
    /// # Safety
    /// `self.memory_map` must point at `self.memory_map_len` valid,
    /// initialised `RawMemoryDescriptor`s for the whole call.
    pub unsafe fn memory_descriptors(&self) -> impl Iterator<Item = MemoryDescriptor> + '_ {
        let slice = unsafe { core::slice::from_raw_parts(self.memory_map, self.memory_map_len) };
        slice.iter().map(|raw| MemoryDescriptor {
            kind: raw.kind.into(),
            range: rainbow_mm::address::PRange::new(
                rainbow_mm::address::PAddr::from_val(raw.address as usize),
                rainbow_mm::address::PAddr::from_val((raw.address + raw.size) as usize),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_kind_maps_onto_pmm_memory_kind() {
        assert_eq!(
            MemoryKind::from(MemoryDescriptorKind::Available),
            MemoryKind::Available
        );
        assert_eq!(
            MemoryKind::from(MemoryDescriptorKind::AcpiNvs),
            MemoryKind::AcpiNvs
        );
    }

    #[test]
    fn memory_descriptors_reads_the_raw_array() {
        let raw = [
            RawMemoryDescriptor {
                kind: MemoryDescriptorKind::Available,
                flags: 0,
                address: 0x10_0000,
                size: 0x1000,
            },
            RawMemoryDescriptor {
                kind: MemoryDescriptorKind::Reserved,
                flags: 0,
                address: 0,
                size: 0x1000,
            },
        ];
        let info = BootInfo {
            version: 1,
            firmware: FirmwareKind::Bios,
            memory_map: raw.as_ptr(),
            memory_map_len: raw.len(),
            initrd_address: 0,
            initrd_size: 0,
            framebuffer: None,
            acpi_rsdp: 0,
            modules: core::ptr::null(),
            modules_len: 0,
        };

        let descriptors: alloc::vec::Vec<_> = unsafe { info.memory_descriptors() }.collect();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].kind, MemoryKind::Available);
    }
}
