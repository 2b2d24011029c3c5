//! TAP devices backed by `/dev/net/tun`.
//!
//! A TAP device carries Ethernet frames and, without `IFF_PERSIST`, lives
//! exactly as long as some process holds a descriptor to it.

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use tapcni_common::{DeviceName, TapError, TapResult};

/// Clone device of the TUN/TAP driver.
const TUN_DEVICE: &str = "/dev/net/tun";

/// Ethernet framing.
#[allow(clippy::cast_possible_truncation)]
pub const IFF_TAP: libc::c_short = libc::IFF_TAP as libc::c_short;
/// Do not prepend the packet information header.
#[allow(clippy::cast_possible_truncation)]
pub const IFF_NO_PI: libc::c_short = libc::IFF_NO_PI as libc::c_short;

/// `struct ifreq` restricted to the name and flags members.
#[repr(C)]
struct IfReqFlags {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 24 - std::mem::size_of::<libc::c_short>()],
}

impl IfReqFlags {
    fn new(name: &str, flags: libc::c_short) -> Self {
        let mut ifr = Self {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: flags,
            _pad: [0; 24 - std::mem::size_of::<libc::c_short>()],
        };
        // DeviceName guarantees the name leaves room for the terminator.
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name.bytes()) {
            *dst = src as libc::c_char;
        }
        ifr
    }

    fn name(&self) -> String {
        let bytes: Vec<u8> = self
            .ifr_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Interface name and mode flags reported by the driver for a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapInfo {
    /// Interface name.
    pub name: String,
    /// Raw `IFF_*` flags.
    pub flags: libc::c_short,
}

impl TapInfo {
    /// Whether the device uses Ethernet framing.
    #[must_use]
    pub const fn is_tap(&self) -> bool {
        self.flags & IFF_TAP != 0
    }

    /// Whether frames are prefixed with the packet information header.
    #[must_use]
    pub const fn packet_info(&self) -> bool {
        self.flags & IFF_NO_PI == 0
    }
}

/// An open TAP device.
#[derive(Debug)]
pub struct TapDevice {
    name: DeviceName,
    file: File,
}

impl TapDevice {
    /// Create a TAP device in the namespace of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Provisioning`] if `/dev/net/tun` cannot be opened
    /// or the kernel refuses the device (name in use, missing privileges).
    pub fn create(name: &DeviceName) -> TapResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TUN_DEVICE)
            .map_err(|e| provisioning_error(name, format!("failed to open {TUN_DEVICE}: {e}")))?;

        let mut ifr = IfReqFlags::new(name.as_str(), IFF_TAP | IFF_NO_PI);
        // The driver writes the final name back into `ifr`.
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), libc::TUNSETIFF, &mut ifr) };
        if ret < 0 {
            return Err(provisioning_error(
                name,
                format!("TUNSETIFF failed: {}", std::io::Error::last_os_error()),
            ));
        }

        tracing::info!(device = %name, "Created TAP device");

        Ok(Self {
            name: name.clone(),
            file,
        })
    }

    /// Adopt a descriptor received from the provisioning service.
    ///
    /// The descriptor must belong to the TAP device `expected`, in TAP mode
    /// and without the packet information header.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Provisioning`] if the descriptor is not the
    /// expected device.
    pub fn from_fd(fd: OwnedFd, expected: &DeviceName) -> TapResult<Self> {
        let info = Self::query(fd.as_fd()).map_err(|e| provisioning_error(expected, e.to_string()))?;

        if info.name != expected.as_str() {
            return Err(provisioning_error(
                expected,
                format!("received descriptor for device {}", info.name),
            ));
        }
        if !info.is_tap() || info.packet_info() {
            return Err(provisioning_error(
                expected,
                format!("unexpected device flags {:#06x}", info.flags),
            ));
        }

        Ok(Self {
            name: expected.clone(),
            file: File::from(fd),
        })
    }

    /// Ask the driver which device a descriptor is attached to.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is not an attached TUN/TAP
    /// descriptor.
    pub fn query(fd: BorrowedFd<'_>) -> std::io::Result<TapInfo> {
        let mut ifr = IfReqFlags::new("", 0);
        let ret = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TUNGETIFF, &mut ifr) };
        if ret < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(TapInfo {
            name: ifr.name(),
            flags: ifr.ifr_flags,
        })
    }

    /// Device name.
    #[must_use]
    pub const fn name(&self) -> &DeviceName {
        &self.name
    }

    /// Current name and flags as reported by the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the ioctl fails.
    pub fn info(&self) -> std::io::Result<TapInfo> {
        Self::query(self.file.as_fd())
    }
}

impl AsFd for TapDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

fn provisioning_error(device: &DeviceName, message: impl Into<String>) -> TapError {
    TapError::Provisioning {
        device: device.to_string(),
        message: message.into(),
    }
}
