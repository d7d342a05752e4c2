//! Network connectivity probe.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

/// Answers whether any usable network interface exists right now.
pub trait NetworkProbe: Send + Sync {
    fn has_viable_interface(&self) -> bool;
}

/// Probe backed by the OS interface table.
///
/// An interface is viable when it is up, is not loopback, and carries an
/// IPv4 or IPv6 address. If the table cannot be read the probe reports
/// connected so downloads fall back to ordinary retry handling.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceProbe;

impl NetworkProbe for InterfaceProbe {
    #[cfg(unix)]
    fn has_viable_interface(&self) -> bool {
        let mut ifaddr: *mut libc::ifaddrs = std::ptr::null_mut();
        // SAFETY: getifaddrs writes a heap-allocated list head into `ifaddr`,
        // which is released with freeifaddrs below.
        if unsafe { libc::getifaddrs(&mut ifaddr) } == -1 {
            warn!(
                error = %std::io::Error::last_os_error(),
                "getifaddrs failed; assuming network is available"
            );
            return true;
        }

        let mut found = false;
        let mut cursor = ifaddr;
        while !cursor.is_null() {
            // SAFETY: cursor walks the list returned by getifaddrs and stays
            // valid until freeifaddrs.
            let ifa = unsafe { &*cursor };
            cursor = ifa.ifa_next;

            if ifa.ifa_addr.is_null() {
                continue;
            }
            let flags = ifa.ifa_flags;
            if flags & (libc::IFF_UP as libc::c_uint) == 0
                || flags & (libc::IFF_LOOPBACK as libc::c_uint) != 0
            {
                continue;
            }
            // SAFETY: ifa_addr was checked non-null above.
            let family = i32::from(unsafe { (*ifa.ifa_addr).sa_family });
            if family == libc::AF_INET || family == libc::AF_INET6 {
                found = true;
                break;
            }
        }

        // SAFETY: ifaddr came from a successful getifaddrs call.
        unsafe { libc::freeifaddrs(ifaddr) };

        if found {
            debug!("network connectivity detected");
        } else {
            warn!("no network connectivity detected");
        }
        found
    }

    #[cfg(not(unix))]
    fn has_viable_interface(&self) -> bool {
        true
    }
}

/// Probe whose answer is set explicitly.
#[derive(Debug)]
pub struct FixedProbe {
    connected: AtomicBool,
}

impl FixedProbe {
    #[must_use]
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl NetworkProbe for FixedProbe {
    fn has_viable_interface(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
