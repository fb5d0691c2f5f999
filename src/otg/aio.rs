//! Asynchronous endpoint I/O
//!
//! Gadget endpoint files only make progress while the host polls them, so a
//! blocking write would stall the whole relay. Each [`AsyncEndpoint`] owns a
//! private kernel AIO context with room for one request, and completions are
//! signalled through an eventfd that can be waited on with `poll(2)`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};
use tracing::{debug, trace, warn};

use crate::error::{AppError, Result};

type AioContext = libc::c_ulong;

const IOCB_CMD_PREAD: u16 = 0;
const IOCB_CMD_PWRITE: u16 = 1;
const IOCB_FLAG_RESFD: u32 = 1 << 0;

/// `struct iocb` (little-endian layout)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct Iocb {
    aio_data: u64,
    aio_key: u32,
    aio_rw_flags: u32,
    aio_lio_opcode: u16,
    aio_reqprio: i16,
    aio_fildes: u32,
    aio_buf: u64,
    aio_nbytes: u64,
    aio_offset: i64,
    aio_reserved2: u64,
    aio_flags: u32,
    aio_resfd: u32,
}

/// `struct io_event`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct IoEvent {
    data: u64,
    obj: u64,
    res: i64,
    res2: i64,
}

const _: () = assert!(std::mem::size_of::<Iocb>() == 64);
const _: () = assert!(std::mem::size_of::<IoEvent>() == 32);

fn syscall_result(ret: libc::c_long) -> io::Result<libc::c_long> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Transfer direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host: we write
    In,
    /// Host to device: we read
    Out,
}

/// One endpoint file with at most one transfer in flight
pub struct AsyncEndpoint {
    path: PathBuf,
    file: File,
    direction: Direction,
    ctx: AioContext,
    notify: EventFd,
    // Boxed so the kernel keeps valid pointers while the request is queued
    iocb: Box<Iocb>,
    buf: Box<[u8]>,
    in_flight: bool,
}

impl AsyncEndpoint {
    /// Open `path` and set up an AIO context for it
    pub fn open(path: &Path, direction: Direction, buf_len: usize) -> Result<Self> {
        let file = match direction {
            Direction::In => OpenOptions::new().write(true).open(path),
            Direction::Out => OpenOptions::new().read(true).open(path),
        }
        .map_err(|e| AppError::DeviceNotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_file(file, path, direction, buf_len)
    }

    /// Wrap an endpoint file that is already open (and configured)
    pub fn from_file(file: File, path: &Path, direction: Direction, buf_len: usize) -> Result<Self> {
        let notify = EventFd::from_flags(EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)?;

        let mut ctx: AioContext = 0;
        // SAFETY: io_setup only writes the new context id into `ctx`
        let ret = unsafe {
            libc::syscall(libc::SYS_io_setup, 1 as libc::c_long, &mut ctx as *mut AioContext)
        };
        syscall_result(ret)?;

        trace!("Opened async endpoint {} ({:?})", path.display(), direction);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            direction,
            ctx,
            notify,
            iocb: Box::default(),
            buf: vec![0u8; buf_len].into_boxed_slice(),
            in_flight: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Completion notifier, readable once a transfer has finished
    pub fn notifier(&self) -> BorrowedFd<'_> {
        self.notify.as_fd()
    }

    /// Queue `data` as the next IN transfer
    pub fn submit_write(&mut self, data: &[u8]) -> Result<()> {
        if self.direction != Direction::In {
            return Err(AppError::Internal(format!("{} is not an IN endpoint", self.path.display())));
        }
        if data.len() > self.buf.len() {
            return Err(AppError::Internal(format!(
                "transfer of {} bytes exceeds endpoint buffer ({})",
                data.len(),
                self.buf.len()
            )));
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.submit(IOCB_CMD_PWRITE, data.len())
    }

    /// Arm the endpoint for the next OUT transfer
    pub fn submit_read(&mut self) -> Result<()> {
        if self.direction != Direction::Out {
            return Err(AppError::Internal(format!("{} is not an OUT endpoint", self.path.display())));
        }
        let len = self.buf.len();
        self.submit(IOCB_CMD_PREAD, len)
    }

    fn submit(&mut self, opcode: u16, len: usize) -> Result<()> {
        if self.in_flight {
            return Err(AppError::ResourceBusy(format!(
                "transfer already in flight on {}",
                self.path.display()
            )));
        }

        *self.iocb = Iocb {
            aio_lio_opcode: opcode,
            aio_fildes: self.file.as_raw_fd() as u32,
            aio_buf: self.buf.as_mut_ptr() as u64,
            aio_nbytes: len as u64,
            aio_flags: IOCB_FLAG_RESFD,
            aio_resfd: self.notify.as_fd().as_raw_fd() as u32,
            ..Iocb::default()
        };

        let mut list = [&mut *self.iocb as *mut Iocb];
        // SAFETY: iocb and buf are heap allocations owned by self that stay
        // put until the request completes or is cancelled in Drop
        let ret = unsafe { libc::syscall(libc::SYS_io_submit, self.ctx, 1 as libc::c_long, list.as_mut_ptr()) };
        match syscall_result(ret)? {
            1 => {
                self.in_flight = true;
                Ok(())
            }
            n => Err(AppError::Internal(format!(
                "io_submit queued {} requests on {}",
                n,
                self.path.display()
            ))),
        }
    }

    /// Collect a finished transfer without blocking
    ///
    /// Returns the number of bytes transferred, `None` if nothing completed.
    pub fn harvest(&mut self) -> Result<Option<usize>> {
        if !self.in_flight {
            return Ok(None);
        }

        match self.notify.read() {
            Ok(_) => {}
            Err(Errno::EAGAIN) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut event = IoEvent::default();
        let mut timeout = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: room for exactly one event, zero timeout
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_getevents,
                self.ctx,
                0 as libc::c_long,
                1 as libc::c_long,
                &mut event as *mut IoEvent,
                &mut timeout as *mut libc::timespec,
            )
        };
        if syscall_result(ret)? == 0 {
            return Ok(None);
        }

        self.in_flight = false;
        if event.res < 0 {
            return Err(AppError::Io(io::Error::from_raw_os_error(-event.res as i32)));
        }
        Ok(Some(event.res as usize))
    }

    /// Bytes of the last completed OUT transfer
    pub fn data(&self, len: usize) -> &[u8] {
        &self.buf[..len.min(self.buf.len())]
    }

    fn cancel(&mut self) {
        if !self.in_flight {
            return;
        }
        let mut event = IoEvent::default();
        // SAFETY: the iocb pointer is the one submitted on this context
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_cancel,
                self.ctx,
                &mut *self.iocb as *mut Iocb,
                &mut event as *mut IoEvent,
            )
        };
        if let Err(e) = syscall_result(ret) {
            // EINPROGRESS/EAGAIN: io_destroy waits for the request
            trace!("io_cancel on {}: {}", self.path.display(), e);
        }
        self.in_flight = false;
    }

    /// Cancel any transfer and release the endpoint
    pub fn close(self) {
        debug!("Closing endpoint {}", self.path.display());
        drop(self);
    }
}

impl Drop for AsyncEndpoint {
    fn drop(&mut self) {
        self.cancel();
        // SAFETY: the context is ours and destroyed exactly once
        let ret = unsafe { libc::syscall(libc::SYS_io_destroy, self.ctx) };
        if let Err(e) = syscall_result(ret) {
            warn!("io_destroy on {} failed: {}", self.path.display(), e);
        }
    }
}

/// Wait until any of `fds` becomes readable, bounded by `timeout`
///
/// Returns whether something is ready.
pub fn wait_readable(fds: &[BorrowedFd<'_>], timeout: Duration) -> Result<bool> {
    let mut pollfds: Vec<PollFd<'_>> = fds
        .iter()
        .map(|fd| PollFd::new(*fd, PollFlags::POLLIN))
        .collect();
    let timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
    match poll(&mut pollfds, PollTimeout::from(timeout_ms)) {
        Ok(n) => Ok(n > 0),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
