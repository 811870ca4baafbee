// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

fn page_aligned_size(size: usize) -> usize {
    let page_size = page_size::get();
    // round up to nearest page
    ((size - 1) & !(page_size - 1)) + page_size
}

/// POSIX shm object names must lead with a slash; callers pass bare names.
fn shm_path(name: &str) -> io::Result<CString> {
    let path = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    CString::new(path).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul in shm name"))
}

/// Owner of the shm object's path; unlinks it on drop. Only the creating
/// side holds one, so a segment disappears with the service that made it.
struct ShmPath {
    name: CString,
}

impl Drop for ShmPath {
    fn drop(&mut self) {
        let _ = shm_unlink(self.name.as_c_str());
    }
}

/// A named POSIX shared memory object. Created exclusively by the owning
/// process (which unlinks it on drop) or opened by any number of viewers.
pub struct NamedShmHandle {
    fd: OwnedFd,
    size: usize,
    path: Option<ShmPath>,
}

impl NamedShmHandle {
    /// Creates the object, failing if it already exists. The handle owns
    /// the name and removes it when dropped.
    pub fn create(name: &str, size: usize) -> io::Result<NamedShmHandle> {
        let path = shm_path(name)?;
        let size = page_aligned_size(size);
        let fd = shm_open(
            path.as_c_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IWUSR | Mode::S_IRUSR,
        )?;
        ftruncate(&fd, size as libc::off_t)?;
        Ok(NamedShmHandle {
            fd,
            size,
            path: Some(ShmPath { name: path }),
        })
    }

    /// Opens an existing object; the size is taken from the object itself.
    pub fn open(name: &str) -> io::Result<NamedShmHandle> {
        let path = shm_path(name)?;
        let fd = shm_open(path.as_c_str(), OFlag::O_RDWR, Mode::empty())?;
        let file: File = fd.into();
        let size = file.metadata()?.len() as usize;
        Ok(NamedShmHandle {
            fd: file.into(),
            size,
            path: None,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Path of an owned (created) object; `None` for opened views.
    pub fn path(&self) -> Option<&std::ffi::CStr> {
        self.path.as_ref().map(|p| p.name.as_c_str())
    }

    pub fn map(self) -> io::Result<MappedMem> {
        let ptr = unsafe {
            mmap(
                None,
                NonZeroUsize::new(self.size)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty mapping"))?,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &self.fd,
                0,
            )?
        };
        Ok(MappedMem { ptr, mem: self })
    }
}

/// A mapped view of a [`NamedShmHandle`]; unmapped on drop.
pub struct MappedMem {
    ptr: NonNull<libc::c_void>,
    mem: NamedShmHandle,
}

impl MappedMem {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.mem.size) }
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.mem.size) }
    }

    pub fn base(&self) -> *mut u8 {
        self.ptr.as_ptr() as *mut u8
    }

    pub fn len(&self) -> usize {
        self.mem.size
    }

    pub fn is_empty(&self) -> bool {
        self.mem.size == 0
    }
}

impl Drop for MappedMem {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr, self.mem.size);
        }
    }
}

// SAFETY: the mapping is plain memory; all cross-thread coordination inside
// it goes through atomics.
unsafe impl Send for MappedMem {}
unsafe impl Sync for MappedMem {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn unique_name(tag: &str) -> String {
        format!("pm-test-{tag}-{}", std::process::id())
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn create_then_open_shares_content() {
        let name = unique_name("shm-share");
        let created = NamedShmHandle::create(&name, 5).unwrap();
        let mut mapped = created.map().unwrap();
        let _ = mapped.as_slice_mut().write(&[1, 2, 3, 4, 5]).unwrap();

        let other = NamedShmHandle::open(&name).unwrap().map().unwrap();
        assert_eq!(&other.as_slice()[..5], &[1, 2, 3, 4, 5]);
        assert!(other.len() >= 5);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn create_is_exclusive() {
        let name = unique_name("shm-excl");
        let _first = NamedShmHandle::create(&name, 16).unwrap();
        assert!(NamedShmHandle::create(&name, 16).is_err());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn creator_unlinks_on_drop() {
        let name = unique_name("shm-unlink");
        {
            let _handle = NamedShmHandle::create(&name, 16).unwrap();
            assert!(NamedShmHandle::open(&name).is_ok());
        }
        assert!(NamedShmHandle::open(&name).is_err());
    }
}
