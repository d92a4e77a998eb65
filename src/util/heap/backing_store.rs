//! The platform capability the physical memory manager is built on.

use crate::util::Address;

/// Physical memory that can be committed piecemeal and mapped at several virtual addresses at
/// once. Offsets are offsets into the physical backing, addresses are virtual.
pub trait BackingStore: Send + Sync {
    /// Reserve `size` bytes of address space. The store picks the address.
    fn reserve(&self, size: usize) -> Option<Address>;
    /// Commit `[offset, offset + size)`. Returns how many bytes, from `offset` upward, were
    /// actually committed.
    fn commit(&self, offset: usize, size: usize) -> usize;
    /// Uncommit `[offset, offset + size)`. Returns how many bytes, from `offset` upward, were
    /// actually uncommitted.
    fn uncommit(&self, offset: usize, size: usize) -> usize;
    /// Map `size` bytes of physical memory starting at `offset` at the reserved address `addr`.
    fn map(&self, addr: Address, size: usize, offset: usize) -> bool;
    /// Unmap `[addr, addr + size)`, leaving the range reserved.
    fn unmap(&self, addr: Address, size: usize) -> bool;
}

#[cfg(target_os = "linux")]
pub use self::memfd::MemfdBackingStore;

#[cfg(target_os = "linux")]
mod memfd {
    use super::BackingStore;
    use crate::util::conversions::raw_align_down;
    use crate::util::memory;
    use crate::util::Address;
    use std::io::{Error, Result};
    use std::os::unix::io::RawFd;
    use std::sync::Mutex;

    /// Physical memory backed by an anonymous in-memory file. Committing allocates file
    /// blocks, uncommitting punches holes, and mapping the file at several addresses gives
    /// several views of the same bytes.
    pub struct MemfdBackingStore {
        fd: RawFd,
        max_capacity: usize,
        granule_size: usize,
        reservations: Mutex<Vec<(Address, usize)>>,
    }

    impl MemfdBackingStore {
        pub fn new(max_capacity: usize, granule_size: usize) -> Result<Self> {
            let name = b"scavenger_heap\0";
            let fd = unsafe {
                libc::memfd_create(name.as_ptr() as *const libc::c_char, libc::MFD_CLOEXEC)
            };
            if fd == -1 {
                return Err(Error::last_os_error());
            }
            if unsafe { libc::ftruncate(fd, max_capacity as libc::off_t) } == -1 {
                let err = Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }
            debug!(
                "Created heap backing file (fd {}, {} MB)",
                fd,
                max_capacity >> 20
            );
            Ok(MemfdBackingStore {
                fd,
                max_capacity,
                granule_size,
                reservations: Mutex::new(Vec::new()),
            })
        }

        fn fallocate(&self, mode: libc::c_int, offset: usize, size: usize) -> Result<()> {
            let ret = unsafe {
                libc::fallocate(
                    self.fd,
                    mode,
                    offset as libc::off_t,
                    size as libc::off_t,
                )
            };
            if ret == 0 {
                Ok(())
            } else {
                Err(Error::last_os_error())
            }
        }

        fn commit_inner(&self, offset: usize, size: usize) -> bool {
            match self.fallocate(0, offset, size) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Failed to commit [{:#x}, {:#x}): {}", offset, offset + size, e);
                    false
                }
            }
        }
    }

    impl BackingStore for MemfdBackingStore {
        fn reserve(&self, size: usize) -> Option<Address> {
            match memory::reserve_anywhere(size) {
                Ok(addr) => {
                    let mut reservations = self.reservations.lock().unwrap();
                    reservations.push((addr, size));
                    Some(addr)
                }
                Err(e) => {
                    warn!("Failed to reserve {} bytes of address space: {}", size, e);
                    None
                }
            }
        }

        fn commit(&self, offset: usize, size: usize) -> usize {
            assert!(offset + size <= self.max_capacity);
            if self.commit_inner(offset, size) {
                return size;
            }

            // Failed, commit as much as possible by halving the request.
            let mut start = offset;
            let mut end = offset + size;
            loop {
                let length = raw_align_down((end - start) / 2, self.granule_size);
                if length < self.granule_size {
                    return start - offset;
                }
                if self.commit_inner(start, length) {
                    start += length;
                } else {
                    end -= length;
                }
            }
        }

        fn uncommit(&self, offset: usize, size: usize) -> usize {
            let mode = libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE;
            match self.fallocate(mode, offset, size) {
                Ok(()) => size,
                Err(e) => {
                    warn!(
                        "Failed to uncommit [{:#x}, {:#x}): {}",
                        offset,
                        offset + size,
                        e
                    );
                    0
                }
            }
        }

        fn map(&self, addr: Address, size: usize, offset: usize) -> bool {
            match memory::mmap_shared_fixed(addr, size, self.fd, offset) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to map {} bytes at {}: {}", size, addr, e);
                    false
                }
            }
        }

        fn unmap(&self, addr: Address, size: usize) -> bool {
            match memory::reserve_fixed(addr, size) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to unmap {} bytes at {}: {}", size, addr, e);
                    false
                }
            }
        }
    }

    impl Drop for MemfdBackingStore {
        fn drop(&mut self) {
            let reservations = self
                .reservations
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (addr, size) in reservations.drain(..) {
                if let Err(e) = memory::munmap(addr, size) {
                    warn!("Failed to release reservation at {}: {}", addr, e);
                }
            }
            unsafe { libc::close(self.fd) };
        }
    }

}
