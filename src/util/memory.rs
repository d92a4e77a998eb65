use crate::util::Address;
use libc::{c_void, PROT_NONE, PROT_READ, PROT_WRITE};
use std::io::{Error, Result};
use std::os::unix::io::RawFd;

/// Zero `len` bytes starting at `start`.
pub fn zero(start: Address, len: usize) {
    unsafe { std::ptr::write_bytes(start.to_mut_ptr::<u8>(), 0, len) };
}

/// Demand-zero mmap at an address chosen by the kernel, without reserving swap space.
/// The memory is readable and writable right away.
pub fn dzmmap_noreserve_anywhere(size: usize) -> Result<Address> {
    let prot = PROT_READ | PROT_WRITE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    mmap_anywhere(size, prot, flags)
}

/// Reserve an address range at an address chosen by the kernel. Any access to the range
/// faults until something is mapped on top of it with a `MAP_FIXED` mapping.
pub fn reserve_anywhere(size: usize) -> Result<Address> {
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    mmap_anywhere(size, PROT_NONE, flags)
}

/// Replace whatever is mapped at `[start, start + size)` with an inaccessible reservation.
/// The range stays reserved, so nothing else in the process can claim it.
pub fn reserve_fixed(start: Address, size: usize) -> Result<()> {
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE | libc::MAP_FIXED;
    mmap_fixed(start, size, PROT_NONE, flags, -1, 0)
}

/// Map `size` bytes of the file `fd`, starting at file offset `offset`, at the fixed address
/// `start`. Several shared mappings of the same file offset see the same bytes.
pub fn mmap_shared_fixed(start: Address, size: usize, fd: RawFd, offset: usize) -> Result<()> {
    let flags = libc::MAP_SHARED | libc::MAP_FIXED;
    mmap_fixed(start, size, PROT_READ | PROT_WRITE, flags, fd, offset as libc::off_t)
}

fn mmap_anywhere(size: usize, prot: libc::c_int, flags: libc::c_int) -> Result<Address> {
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), size, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        Err(Error::last_os_error())
    } else {
        Ok(Address::from_mut_ptr(ptr))
    }
}

fn mmap_fixed(
    start: Address,
    size: usize,
    prot: libc::c_int,
    flags: libc::c_int,
    fd: RawFd,
    offset: libc::off_t,
) -> Result<()> {
    let ptr: *mut c_void = start.to_mut_ptr();
    wrap_libc_call(
        &|| unsafe { libc::mmap(start.to_mut_ptr(), size, prot, flags, fd, offset) },
        ptr,
    )
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

/// Unmap the given range.
pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

/// An owned anonymous mapping that is unmapped when dropped.
#[derive(Debug)]
pub struct MmapRegion {
    start: Address,
    size: usize,
}

impl MmapRegion {
    /// Map a fresh zeroed, readable and writable region of `size` bytes.
    pub fn new(size: usize) -> Result<Self> {
        let start = dzmmap_noreserve_anywhere(size)?;
        Ok(MmapRegion { start, size })
    }

    /// Reserve an inaccessible region of `size` bytes.
    pub fn reserve(size: usize) -> Result<Self> {
        let start = reserve_anywhere(size)?;
        Ok(MmapRegion { start, size })
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        if let Err(e) = munmap(self.start, self.size) {
            warn!("Failed to unmap {}..{}: {}", self.start, self.end(), e);
        }
    }
}
