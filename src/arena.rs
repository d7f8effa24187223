//! Page-aligned measurement arena.
//!
//! The arena is a raw, zero-initialized byte region viewed as an array of 8-byte slots. Chains
//! are written into the slots as absolute addresses, so every access goes through volatile
//! reads and writes to keep the optimizer from reasoning about the contents.
//!
//! On Unix the memory comes from an anonymous `mmap`, which is page aligned by construction.
//! Elsewhere it falls back to the global allocator with a page-sized alignment.

use crate::Error;
use log::{debug, info};
use std::ptr;

/// Width of one chain slot in bytes (one pointer).
pub const SLOT_SIZE: usize = std::mem::size_of::<u64>();

/// Page size used when the OS cannot be asked.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Returns the OS page size in bytes.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    FALLBACK_PAGE_SIZE
}

/// A fixed-length, page-aligned, zero-initialized memory region.
pub struct Arena {
    ptr: *mut u8,
    len: usize,
    page_size: usize,
}

impl Arena {
    /// Allocates `len` bytes, zero-fills them and touches every byte once so that page faults
    /// happen here rather than inside a timed walk.
    ///
    /// `len` must be a non-zero multiple of [`SLOT_SIZE`].
    pub fn new(len: usize) -> Result<Self, Error> {
        if len == 0 || len % SLOT_SIZE != 0 {
            return Err(Error::InvalidConfig(format!(
                "arena length {} is not a non-zero multiple of {}",
                len, SLOT_SIZE
            )));
        }
        let page_size = page_size();
        let ptr = Self::map(len, page_size)?;
        let mut arena = Arena {
            ptr,
            len,
            page_size,
        };
        arena.zero();
        info!(
            "Allocated array of {} bytes ({}), page size {}",
            len,
            crate::format_size(len as u64),
            page_size
        );
        Ok(arena)
    }

    #[cfg(unix)]
    fn map(len: usize, page_size: usize) -> Result<*mut u8, Error> {
        // SAFETY: anonymous private mapping, no file descriptor involved.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::ResourceExhaustion {
                len,
                align: page_size,
            });
        }
        Ok(ptr.cast::<u8>())
    }

    #[cfg(not(unix))]
    fn map(len: usize, page_size: usize) -> Result<*mut u8, Error> {
        let layout = std::alloc::Layout::from_size_align(len, page_size).map_err(|_| {
            Error::ResourceExhaustion {
                len,
                align: page_size,
            }
        })?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::ResourceExhaustion {
                len,
                align: page_size,
            });
        }
        Ok(ptr)
    }

    /// Writes zero over the whole region, one slot at a time.
    fn zero(&mut self) {
        let slots = self.ptr.cast::<u64>();
        for index in 0..self.slot_count() {
            // SAFETY: index < slot_count, region is owned and slot aligned.
            unsafe { ptr::write_volatile(slots.add(index), 0) };
        }
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Page size the region is aligned to.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of 8-byte slots in the region.
    pub fn slot_count(&self) -> usize {
        self.len / SLOT_SIZE
    }

    /// Address of the first byte.
    pub fn base_addr(&self) -> u64 {
        self.ptr as u64
    }

    /// Absolute address of slot `index`; this is the value chains store.
    pub fn slot_addr(&self, index: usize) -> u64 {
        self.base_addr() + (index * SLOT_SIZE) as u64
    }

    /// Maps an absolute address back to a slot index, if it points at a slot of this arena.
    pub fn slot_of(&self, addr: u64) -> Option<usize> {
        let offset = addr.checked_sub(self.base_addr())? as usize;
        if offset < self.len && offset % SLOT_SIZE == 0 {
            Some(offset / SLOT_SIZE)
        } else {
            None
        }
    }

    /// Reads slot `index` with a volatile load, or `None` past the end of the arena.
    pub fn get_slot(&self, index: usize) -> Option<u64> {
        if index < self.slot_count() {
            // SAFETY: bounds checked above.
            Some(unsafe { ptr::read_volatile(self.ptr.cast::<u64>().add(index)) })
        } else {
            None
        }
    }

    /// Reads slot `index` with a volatile load.
    ///
    /// Panics if `index` is out of bounds; see [`Arena::get_slot`] for the checked form.
    pub fn read_slot(&self, index: usize) -> u64 {
        assert!(index < self.slot_count(), "arena read out of bounds");
        // SAFETY: bounds checked above.
        unsafe { ptr::read_volatile(self.ptr.cast::<u64>().add(index)) }
    }

    /// Writes slot `index` with a volatile store.
    pub fn write_slot(&mut self, index: usize, value: u64) {
        assert!(index < self.slot_count(), "arena write out of bounds");
        // SAFETY: bounds checked above.
        unsafe { ptr::write_volatile(self.ptr.cast::<u64>().add(index), value) }
    }

    /// Raw slot pointer for the timed walks in [`crate::probe`].
    pub(crate) fn as_slot_ptr(&self) -> *const u64 {
        self.ptr.cast::<u64>()
    }

    /// Sequentially overwrites every byte, evicting whatever the caches held before.
    ///
    /// Only meant for dummy arenas: any chain stored in the region is destroyed.
    pub fn flush(&mut self) {
        let slots = self.ptr.cast::<u64>();
        for index in 0..self.slot_count() {
            // SAFETY: index < slot_count.
            unsafe { ptr::write_volatile(slots.add(index), index as u64) };
        }
        debug!("Flushed {} through dummy array", crate::format_size(self.len as u64));
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        #[cfg(unix)]
        // SAFETY: ptr/len come from the successful mmap in `map`.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.len);
        }
        #[cfg(not(unix))]
        // SAFETY: same layout as the allocation in `map`.
        unsafe {
            let layout = std::alloc::Layout::from_size_align_unchecked(self.len, self.page_size);
            std::alloc::dealloc(self.ptr, layout);
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("base", &format_args!("{:#x}", self.base_addr()))
            .field("len", &self.len)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_page_aligned_and_zeroed() {
        let arena = Arena::new(64 * 1024).unwrap();
        assert_eq!(arena.base_addr() as usize % arena.page_size(), 0);
        assert_eq!(arena.slot_count(), 8 * 1024);
        assert!((0..arena.slot_count()).all(|i| arena.read_slot(i) == 0));
    }

    #[test]
    fn rejects_unaligned_length() {
        assert!(matches!(Arena::new(0), Err(Error::InvalidConfig(_))));
        assert!(matches!(Arena::new(4097), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn slot_addresses_round_trip() {
        let mut arena = Arena::new(4096).unwrap();
        let addr = arena.slot_addr(17);
        assert_eq!(addr, arena.base_addr() + 17 * 8);
        assert_eq!(arena.slot_of(addr), Some(17));
        assert_eq!(arena.slot_of(addr + 1), None);
        assert_eq!(arena.slot_of(arena.base_addr() + 4096), None);
        assert_eq!(arena.slot_of(0), None);

        arena.write_slot(17, 0xdead_beef);
        assert_eq!(arena.read_slot(17), 0xdead_beef);
    }

    #[test]
    fn flush_overwrites_every_slot() {
        let mut arena = Arena::new(4096).unwrap();
        arena.flush();
        assert!((1..arena.slot_count()).all(|i| arena.read_slot(i) == i as u64));
    }

    #[test]
    fn checked_read_stops_at_the_end() {
        let mut arena = Arena::new(4096).unwrap();
        arena.write_slot(511, 7);
        assert_eq!(arena.get_slot(511), Some(7));
        assert_eq!(arena.get_slot(512), None);
        assert_eq!(arena.get_slot(usize::MAX), None);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_read_panics() {
        let arena = Arena::new(4096).unwrap();
        arena.read_slot(512);
    }
}
