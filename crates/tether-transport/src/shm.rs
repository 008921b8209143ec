use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};

/// Prefix for segment names derived from a numeric key.
pub const SEGMENT_NAME_PREFIX: &str = "/tether_shm_";

/// Segment name for a numeric key (the absolute value of a negative port).
pub fn segment_name(key: u32) -> String {
    format!("{SEGMENT_NAME_PREFIX}{key}")
}

/// A named POSIX shared-memory segment mapped into this process.
///
/// The creating side owns the name and unlinks it on drop; the attaching
/// side only unmaps. Every accessor is bounds-checked against the mapped
/// size. Byte flags are accessed atomically (acquire/release) so a flag
/// store publishes every plain write that preceded it.
pub struct SharedSegment {
    name: String,
    ptr: NonNull<u8>,
    size: usize,
    _fd: OwnedFd,
    owner: bool,
}

// SAFETY: the mapping stays valid for the lifetime of the value and all
// access goes through raw-pointer copies or atomics; cross-process ordering
// is the protocol's job, not the type system's.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a zero-filled segment of `size` bytes.
    ///
    /// Fails with [`TransportError::SegmentCreate`] if the name already
    /// exists: a live segment belongs to another owner, and a stale one left
    /// by a crashed process has to be removed before the name is reused.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let create_err = |source| TransportError::SegmentCreate {
            name: name.to_string(),
            source,
        };
        if size == 0 {
            return Err(create_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "segment size must be non-zero",
            )));
        }
        let c_name = c_name(name).map_err(create_err)?;

        // SAFETY: `c_name` is a valid NUL-terminated string.
        let raw = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if raw < 0 {
            return Err(create_err(std::io::Error::last_os_error()));
        }
        // SAFETY: `raw` is a freshly opened descriptor we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: `fd` is an open shared-memory descriptor.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            unlink(&c_name);
            return Err(create_err(err));
        }

        let ptr = match map(&fd, size) {
            Ok(ptr) => ptr,
            Err(source) => {
                unlink(&c_name);
                return Err(TransportError::SegmentMap {
                    name: name.to_string(),
                    source,
                });
            }
        };

        // SAFETY: the mapping is `size` writable bytes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };

        info!(name, size, "created shared memory segment");
        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            _fd: fd,
            owner: true,
        })
    }

    /// Attach to an existing segment created by another process.
    pub fn open(name: &str) -> Result<Self> {
        let open_err = |source| TransportError::SegmentOpen {
            name: name.to_string(),
            source,
        };
        let c_name = c_name(name).map_err(open_err)?;

        // SAFETY: `c_name` is a valid NUL-terminated string.
        let raw = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0 as libc::c_uint) };
        if raw < 0 {
            return Err(open_err(std::io::Error::last_os_error()));
        }
        // SAFETY: `raw` is a freshly opened descriptor we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let file = std::fs::File::from(fd);
        let size = file.metadata().map_err(open_err)?.len() as usize;
        let fd = OwnedFd::from(file);
        if size == 0 {
            return Err(open_err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "segment has zero size",
            )));
        }

        let ptr = map(&fd, size).map_err(|source| TransportError::SegmentMap {
            name: name.to_string(),
            source,
        })?;

        debug!(name, size, "attached to shared memory segment");
        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            _fd: fd,
            owner: false,
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Always false for a mapped segment; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether this handle created the segment (and unlinks it on drop).
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Atomically load the byte at `offset` (acquire).
    pub fn load_u8(&self, offset: usize) -> Result<u8> {
        self.check(offset, 1)?;
        // SAFETY: in bounds; AtomicU8 has alignment 1.
        let flag = unsafe { AtomicU8::from_ptr(self.ptr.as_ptr().add(offset)) };
        Ok(flag.load(Ordering::Acquire))
    }

    /// Atomically store the byte at `offset` (release).
    pub fn store_u8(&self, offset: usize, value: u8) -> Result<()> {
        self.check(offset, 1)?;
        // SAFETY: in bounds; AtomicU8 has alignment 1.
        let flag = unsafe { AtomicU8::from_ptr(self.ptr.as_ptr().add(offset)) };
        flag.store(value, Ordering::Release);
        Ok(())
    }

    /// Read a native-order `i32` at a possibly unaligned `offset`.
    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        self.check(offset, 4)?;
        // SAFETY: in bounds; read_unaligned has no alignment requirement.
        Ok(unsafe { std::ptr::read_unaligned(self.ptr.as_ptr().add(offset).cast::<i32>()) })
    }

    /// Write a native-order `i32` at a possibly unaligned `offset`.
    pub fn write_i32(&self, offset: usize, value: i32) -> Result<()> {
        self.check(offset, 4)?;
        // SAFETY: in bounds; write_unaligned has no alignment requirement.
        unsafe { std::ptr::write_unaligned(self.ptr.as_ptr().add(offset).cast::<i32>(), value) };
        Ok(())
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the segment.
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        // SAFETY: source range is in bounds and cannot overlap a Rust slice.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                dst.as_mut_ptr(),
                dst.len(),
            )
        };
        Ok(())
    }

    /// Copy `src` into the segment starting at `offset`.
    pub fn copy_in(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        // SAFETY: destination range is in bounds and cannot overlap a Rust slice.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len())
        };
        Ok(())
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(TransportError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`size` describe the mapping created in `map`.
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.size) } != 0 {
            warn!(
                name = %self.name,
                error = %std::io::Error::last_os_error(),
                "failed to unmap shared memory"
            );
        }
        if self.owner {
            if let Ok(c_name) = c_name(&self.name) {
                debug!(name = %self.name, "unlinking shared memory segment");
                unlink(&c_name);
            }
        }
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("owner", &self.owner)
            .finish()
    }
}

fn c_name(name: &str) -> std::io::Result<CString> {
    CString::new(name).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "segment name contains a NUL byte",
        )
    })
}

fn map(fd: &OwnedFd, size: usize) -> std::io::Result<NonNull<u8>> {
    // SAFETY: we request a fresh shared mapping of an open descriptor; the
    // kernel picks the address.
    let raw = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    NonNull::new(raw.cast::<u8>()).ok_or_else(|| std::io::Error::other("mmap returned null"))
}

fn unlink(name: &CString) {
    // SAFETY: `name` is a valid NUL-terminated string.
    if unsafe { libc::shm_unlink(name.as_ptr()) } != 0 {
        warn!(
            name = ?name,
            error = %std::io::Error::last_os_error(),
            "failed to unlink shared memory"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .subsec_nanos();
        format!("/tt{tag}{}{}", std::process::id(), nanos % 100_000)
    }

    #[test]
    fn test_create_is_zero_filled() {
        let name = unique_name("z");
        let seg = SharedSegment::create(&name, 64).unwrap();
        assert_eq!(seg.len(), 64);
        assert!(seg.is_owner());

        let mut buf = [0xFFu8; 64];
        seg.copy_out(0, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_open_sees_writes_from_creator() {
        let name = unique_name("o");
        let owner = SharedSegment::create(&name, 32).unwrap();
        let peer = SharedSegment::open(&name).unwrap();
        assert_eq!(peer.len(), 32);
        assert!(!peer.is_owner());

        owner.write_i32(6, 4096).unwrap();
        owner.copy_in(20, b"abc").unwrap();
        owner.store_u8(5, 2).unwrap();

        assert_eq!(peer.load_u8(5).unwrap(), 2);
        assert_eq!(peer.read_i32(6).unwrap(), 4096);
        let mut buf = [0u8; 3];
        peer.copy_out(20, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_unaligned_integer_access() {
        let name = unique_name("u");
        let seg = SharedSegment::create(&name, 32).unwrap();
        seg.write_i32(1, -7).unwrap();
        seg.write_i32(10, i32::MAX).unwrap();
        assert_eq!(seg.read_i32(1).unwrap(), -7);
        assert_eq!(seg.read_i32(10).unwrap(), i32::MAX);
    }

    #[test]
    fn test_out_of_bounds_access_is_rejected() {
        let name = unique_name("b");
        let seg = SharedSegment::create(&name, 16).unwrap();
        assert!(matches!(
            seg.read_i32(14),
            Err(TransportError::OutOfBounds { .. })
        ));
        assert!(matches!(
            seg.copy_in(10, &[0u8; 7]),
            Err(TransportError::OutOfBounds { .. })
        ));
        assert!(matches!(
            seg.load_u8(16),
            Err(TransportError::OutOfBounds { .. })
        ));
        assert!(matches!(
            seg.store_u8(usize::MAX, 1),
            Err(TransportError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_owner_drop_unlinks_name() {
        let name = unique_name("d");
        let seg = SharedSegment::create(&name, 16).unwrap();
        drop(seg);
        assert!(matches!(
            SharedSegment::open(&name),
            Err(TransportError::SegmentOpen { .. })
        ));
    }

    #[test]
    fn test_create_refuses_an_existing_name() {
        let name = unique_name("x");
        let first = SharedSegment::create(&name, 16).unwrap();
        first.store_u8(0, 1).unwrap();

        match SharedSegment::create(&name, 16) {
            Err(TransportError::SegmentCreate { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
            }
            other => panic!("expected SegmentCreate, got {other:?}"),
        }

        // The failed attempt neither zeroed nor unlinked the live segment.
        assert_eq!(first.load_u8(0).unwrap(), 1);
        let peer = SharedSegment::open(&name).unwrap();
        assert_eq!(peer.load_u8(0).unwrap(), 1);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let name = unique_name("e");
        assert!(matches!(
            SharedSegment::create(&name, 0),
            Err(TransportError::SegmentCreate { .. })
        ));
    }

    #[test]
    fn test_segment_name_from_key() {
        assert_eq!(segment_name(19997), "/tether_shm_19997");
    }
}
