//! # Linux perf backend
//!
//! Opens one counting event per slot with `perf_event_open(2)` on the
//! calling thread:
//!
//! - `disabled` and `pinned`, then reset and enabled via ioctl
//! - kernel and hypervisor excluded for PMU events. Software events keep
//!   kernel scope: a context-switch counter that excludes the kernel reads 0.
//! - PMU events get their first page mapped read-only. Its `cap_user_rdpmc`
//!   capability and `index` field decide whether the hot path can use
//!   `rdpmc` instead of `read(2)`.
//!
//! All resources are owned: the control page unmaps and the descriptor
//! closes in `Drop`, after a best-effort disable ioctl.

// perf_event_open, the perf ioctls, the control-page reads and rdpmc all
// need unsafe
#![allow(unsafe_code)]

use std::cell::Cell;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd};
use std::ptr;
use std::sync::atomic::{fence, Ordering};

use log::{debug, warn};
use memmap2::{Mmap, MmapOptions};
use perf_event_open_sys::bindings::{perf_event_attr, perf_event_mmap_page, PERF_FLAG_FD_CLOEXEC};
use perf_event_open_sys::{ioctls, perf_event_open};

use super::{CounterSession, FastRead, SessionBackend, SessionTarget};
use crate::domain::{EventDescriptor, SessionError};

/// `cap_user_rdpmc` bit of `perf_event_mmap_page.capabilities`
const CAP_USER_RDPMC: u64 = 1 << 2;

type PerfIoctl = unsafe fn(libc::c_int, libc::c_uint) -> libc::c_int;

/// Backend for real hardware/software counters
#[derive(Debug, Clone)]
pub struct PerfBackend {
    page_size: usize,
}

impl Default for PerfBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfBackend {
    #[must_use]
    pub fn new() -> Self {
        // SAFETY: sysconf has no preconditions
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = usize::try_from(page_size).unwrap_or(4096);
        Self { page_size }
    }
}

impl SessionBackend for PerfBackend {
    type Session = PerfSession;

    fn name(&self) -> &'static str {
        "perf"
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn open(
        &self,
        event: &EventDescriptor,
        target: SessionTarget,
    ) -> Result<PerfSession, SessionError> {
        let mut attr = attr_for(event);
        let cpu = target.cpu.map_or(-1, |cpu| cpu.0 as libc::c_int);

        // SAFETY: attr is a fully initialised perf_event_attr with a correct
        // size field; pid 0 is the calling thread.
        let fd = unsafe { perf_event_open(&mut attr, 0, cpu, -1, PERF_FLAG_FD_CLOEXEC.into()) };
        if fd < 0 {
            return Err(SessionError::OpenFailed {
                event: event.name.clone(),
                perf_type: attr.type_,
                config: event.config,
                source: std::io::Error::last_os_error(),
            });
        }
        // SAFETY: fd was just returned by perf_event_open and is owned by
        // nothing else
        let file = unsafe { File::from_raw_fd(fd) };

        let page = if event.category.supports_register_read() {
            let page = ControlPage::map(&file, self.page_size).map_err(|source| {
                SessionError::MapFailed { event: event.name.clone(), source }
            })?;
            Some(page)
        } else {
            None
        };

        let session = PerfSession {
            event: event.clone(),
            page,
            file,
            pmc_mask: u64::MAX,
            last_raw: Cell::new(0),
            widened: Cell::new(0),
        };

        if let Err(e) = session.ioctl("reset", ioctls::RESET) {
            warn!("{}: {e}", target.thread);
        }
        if let Err(e) = session.ioctl("enable", ioctls::ENABLE) {
            warn!("{}: {e}", target.thread);
        }

        debug!(
            "{}: perf session fd={} for {} (cpu {cpu}, control page: {})",
            target.thread,
            session.file.as_raw_fd(),
            event.name,
            session.page.is_some()
        );
        Ok(session)
    }
}

/// Attributes for one counting session on the calling thread
#[allow(clippy::cast_possible_truncation)]
fn attr_for(event: &EventDescriptor) -> perf_event_attr {
    let mut attr = perf_event_attr {
        size: std::mem::size_of::<perf_event_attr>() as u32,
        type_: event.category.perf_type(),
        config: event.config,
        ..perf_event_attr::default()
    };
    attr.set_disabled(1);
    attr.set_pinned(1);
    if !event.category.is_software() {
        attr.set_exclude_kernel(1);
        attr.set_exclude_hv(1);
    }
    attr
}

/// Read path and value mask published by a control page, if there is one
fn fast_read_from(info: Option<RdpmcInfo>) -> (FastRead, u64) {
    let Some(info) = info.filter(|info| info.capable) else {
        return (FastRead::Syscall, u64::MAX);
    };
    // index 0 means no hardware counter is allocated right now
    let Some(index) = info.index.checked_sub(1) else {
        return (FastRead::Syscall, u64::MAX);
    };

    let mask = match info.width {
        width if width == 0 || width >= 64 => u64::MAX,
        width => (1u64 << width) - 1,
    };
    (FastRead::Register(index), mask)
}

/// Distance from `last` to `raw` on a counter that wraps at `mask`
#[inline]
fn masked_delta(last: u64, raw: u64, mask: u64) -> u64 {
    raw.wrapping_sub(last) & mask
}

/// Read-only mapping of a session's `perf_event_mmap_page`
#[derive(Debug)]
struct ControlPage {
    map: Mmap,
}

#[derive(Debug, Clone, Copy)]
struct RdpmcInfo {
    capable: bool,
    index: u32,
    width: u16,
}

impl ControlPage {
    fn map(file: &File, len: usize) -> std::io::Result<Self> {
        // SAFETY: the kernel owns the page contents; we only ever read it
        // through volatile loads under its seqlock
        let map = unsafe { MmapOptions::new().len(len).map(file)? };
        Ok(Self { map })
    }

    /// Read capability, index and width consistently: retry while the
    /// kernel's sequence counter moves underneath us.
    fn rdpmc_info(&self) -> RdpmcInfo {
        let page = self.map.as_ptr().cast::<perf_event_mmap_page>();
        loop {
            // SAFETY: the mapping is at least one page, page aligned, and
            // stays mapped for the lifetime of self
            unsafe {
                let seq = ptr::read_volatile(ptr::addr_of!((*page).lock));
                fence(Ordering::Acquire);

                let capabilities =
                    ptr::read_volatile(ptr::addr_of!((*page).__bindgen_anon_1.capabilities));
                let index = ptr::read_volatile(ptr::addr_of!((*page).index));
                let width = ptr::read_volatile(ptr::addr_of!((*page).pmc_width));

                fence(Ordering::Acquire);
                if seq == ptr::read_volatile(ptr::addr_of!((*page).lock)) {
                    return RdpmcInfo { capable: capabilities & CAP_USER_RDPMC != 0, index, width };
                }
            }
        }
    }
}

/// One open perf counter
///
/// Field order matters: the control page is unmapped before the
/// descriptor is closed.
///
/// `rdpmc` returns only `pmc_width` bits. Register reads are widened to a
/// 64-bit running value so a wrap between two reads still yields a small
/// difference.
#[derive(Debug)]
pub struct PerfSession {
    event: EventDescriptor,
    page: Option<ControlPage>,
    file: File,
    pmc_mask: u64,
    last_raw: Cell<u64>,
    widened: Cell<u64>,
}

impl PerfSession {
    fn ioctl(&self, op: &'static str, request: PerfIoctl) -> Result<(), SessionError> {
        // SAFETY: the descriptor is a live perf event owned by self
        let rc = unsafe { request(self.file.as_raw_fd(), 0) };
        if rc < 0 {
            return Err(SessionError::Ioctl {
                op,
                event: self.event.name.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl CounterSession for PerfSession {
    fn event(&self) -> &EventDescriptor {
        &self.event
    }

    fn resolve_fast_read(&mut self) -> FastRead {
        let info = if cfg!(target_arch = "x86_64") {
            self.page.as_ref().map(ControlPage::rdpmc_info)
        } else {
            None
        };

        let (fast_read, mask) = fast_read_from(info);
        self.pmc_mask = mask;
        self.last_raw.set(0);
        self.widened.set(0);
        fast_read
    }

    #[inline]
    fn read_register(&self, index: u32) -> u64 {
        let raw = rdpmc(index) & self.pmc_mask;
        let delta = masked_delta(self.last_raw.replace(raw), raw, self.pmc_mask);
        let value = self.widened.get().wrapping_add(delta);
        self.widened.set(value);
        value
    }

    fn read_syscall(&self) -> Result<u64, SessionError> {
        let mut buf = [0u8; 8];
        match (&self.file).read(&mut buf) {
            Ok(8) => Ok(u64::from_ne_bytes(buf)),
            Ok(got) => Err(SessionError::ShortRead { event: self.event.name.clone(), got }),
            Err(source) => Err(SessionError::ReadFailed { event: self.event.name.clone(), source }),
        }
    }
}

impl Drop for PerfSession {
    fn drop(&mut self) {
        if let Err(e) = self.ioctl("disable", ioctls::DISABLE) {
            warn!("{e}");
        }
    }
}

/// Read performance counter `index` of the current CPU
#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn rdpmc(index: u32) -> u64 {
    let lo: u32;
    let hi: u32;
    // SAFETY: only called with an index the kernel published together with
    // cap_user_rdpmc, which is what makes rdpmc legal in user mode
    unsafe {
        std::arch::asm!(
            "rdpmc",
            in("ecx") index,
            out("eax") lo,
            out("edx") hi,
            options(nostack, nomem, preserves_flags),
        );
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn rdpmc(_index: u32) -> u64 {
    0
}
