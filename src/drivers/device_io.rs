use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
};

/// One control channel to a keyboard backlight driver.
///
/// `control` issues an opaque control operation with a single 32-bit in/out
/// buffer seeded from `input` (zero when absent) and returns the buffer
/// contents after the driver has answered.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceIO: Send + Sync {
    fn control(&self, code: u32, input: Option<u32>) -> io::Result<u32>;
}

/// Acquires a handle for a profile's principal.
pub trait DeviceOpener {
    fn open(&self, principal: &str) -> io::Result<Box<dyn DeviceIO>>;
}

/// Device node driven through `ioctl(2)`.
#[derive(Debug)]
pub struct IoctlDevice {
    file: File,
}

impl DeviceIO for IoctlDevice {
    fn control(&self, code: u32, input: Option<u32>) -> io::Result<u32> {
        let mut buf: u32 = input.unwrap_or(0);
        // SAFETY: `buf` outlives the call and is exactly the 4 bytes every
        // configured control code transfers.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), code as _, &mut buf as *mut u32) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(buf)
    }
}

/// Opens principals as read/write device nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct IoctlOpener;

impl DeviceOpener for IoctlOpener {
    fn open(&self, principal: &str) -> io::Result<Box<dyn DeviceIO>> {
        let file = OpenOptions::new().read(true).write(true).open(principal)?;
        Ok(Box::new(IoctlDevice { file }))
    }
}
