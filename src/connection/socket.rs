//! A thin wrapper opaquely holding the network socket for a DCP connection.
//!
//! TLS termination is an explicit non-goal, so unlike a `Socket` that hides
//! plain vs. `rustls` streams behind one enum, this crate only ever holds a
//! plain `TcpStream`. The wrapper is kept anyway so `Connection<C>` and the
//! codec never depend on `tokio_core::net::TcpStream` directly.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use tokio_core::net::TcpStream;
use tokio_io::AsyncWrite;

pub fn plain(tcp: TcpStream) -> Socket {
    Socket {
        local_addr: tcp.local_addr().expect("tcp stream has no local address"),
        peer_addr: tcp.peer_addr().expect("tcp stream has no peer address"),
        tcp,
    }
}

pub struct Socket {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    tcp: TcpStream,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Socket")
            .field("peer", &self.peer_addr)
            .field("local", &self.local_addr)
            .finish()
    }
}

impl Socket {
    pub fn tcp_shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        trace!("{:?}.tcp_shutdown({:?})", self, how);
        TcpStream::shutdown(&self.tcp, how)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let ret = self.tcp.read(buf);
        trace!("{:?}.read({}) -> {:?}", self, buf.len(), ret);
        ret
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let ret = self.tcp.write(buf);
        trace!("{:?}.write({}) -> {:?}", self, buf.len(), ret);
        ret
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tcp.flush()
    }
}

impl AsyncWrite for Socket {
    fn shutdown(&mut self) -> futures::Poll<(), io::Error> {
        AsyncWrite::shutdown(&mut self.tcp)
    }
}
