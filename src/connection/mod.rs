//! The common connection state shared by `DcpProducer` and `DcpConsumer`.
//!
//! DCP connections carry more state than a bare TCP proxy (name, cookie,
//! role, control options, pause/disconnect flags); that shape is
//! `ConnectionCore` here, paired with a plain `Socket` for the transport.

pub mod control;
pub mod socket;

pub use self::socket::Socket;

use std::time::{Duration, Instant};

use crate::connection::control::ControlState;

/// An opaque token identifying the transport endpoint a connection rides on.
/// Two connections can never legitimately share a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
    Notifier,
}

/// The host-provided capability set a connection uses to wake its front-end
/// thread (Design Notes: "define the host callback surface as an
/// explicit capability set passed into the connection at construction;
/// avoid process-wide mutable pointers to the host API").
pub trait HostCallbacks {
    fn notify_io_complete(&self, cookie: Cookie);
}

/// A no-op host, useful for unit tests that don't care about wakeups.
pub struct NullHost;
impl HostCallbacks for NullHost {
    fn notify_io_complete(&self, _cookie: Cookie) {}
}

pub struct ConnectionCore {
    pub cookie: Cookie,
    pub name: String,
    pub role: Role,
    pub open_flags: u32,
    pub last_receive_time: Instant,
    pub paused: bool,
    pub disconnect_requested: bool,
    pub control: ControlState,
    pub connection_manager_interval: Duration,
    host: Box<dyn HostCallbacks>,
}

impl ConnectionCore {
    pub fn new(
        cookie: Cookie,
        name: String,
        role: Role,
        open_flags: u32,
        connection_manager_interval: Duration,
        host: Box<dyn HostCallbacks>,
    ) -> ConnectionCore {
        ConnectionCore {
            cookie,
            name,
            role,
            open_flags,
            last_receive_time: Instant::now(),
            paused: true,
            disconnect_requested: false,
            control: ControlState::default(),
            connection_manager_interval,
            host,
        }
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_receive_time.elapsed()
    }

    pub fn mark_disconnect_requested(&mut self) {
        self.disconnect_requested = true;
        self.host.notify_io_complete(self.cookie);
    }

    pub fn wake(&self) {
        self.host.notify_io_complete(self.cookie);
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}
