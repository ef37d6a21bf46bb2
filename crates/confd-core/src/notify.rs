//! Service-manager readiness notification.
//!
//! Mirrors the systemd sd_notify protocol: a single datagram write to the
//! socket path in `$NOTIFY_SOCKET`, no library dependency needed since the
//! protocol is just `READY=1\n` over a Unix datagram socket.

#[cfg(unix)]
use std::os::unix::net::UnixDatagram;

/// Hook for announcing supervisor lifecycle transitions to whatever service
/// manager started this process. `NoopNotify` is the default; `SystemdNotify`
/// is used automatically when `$NOTIFY_SOCKET` is set.
pub trait NotifyHook: Send + Sync {
    fn ready(&self) {}
    fn reloading(&self) {}
    fn stopping(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotify;

impl NotifyHook for NoopNotify {}

/// Picks `SystemdNotify` if `$NOTIFY_SOCKET` is set, `NoopNotify` otherwise.
pub fn from_env() -> Box<dyn NotifyHook> {
    match std::env::var("NOTIFY_SOCKET") {
        Ok(path) if !path.is_empty() => Box::new(SystemdNotify { socket_path: path }),
        _ => Box::new(NoopNotify),
    }
}

pub struct SystemdNotify {
    socket_path: String,
}

impl SystemdNotify {
    #[cfg(unix)]
    fn send(&self, state: &str) {
        let Ok(socket) = UnixDatagram::unbound() else {
            return;
        };
        if let Err(e) = socket.send_to(state.as_bytes(), &self.socket_path) {
            log::debug!("sd_notify send failed: {e}");
        }
    }

    #[cfg(not(unix))]
    fn send(&self, _state: &str) {}
}

impl NotifyHook for SystemdNotify {
    fn ready(&self) {
        self.send("READY=1\n");
    }

    fn reloading(&self) {
        self.send("RELOADING=1\n");
    }

    fn stopping(&self) {
        self.send("STOPPING=1\n");
    }
}
