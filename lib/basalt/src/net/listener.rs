//! The TCP listening socket.
//!
//! Plain IPv4. The accept itself is performed by the engine through the
//! completion queue; this type only owns the listening file descriptor.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

/// Default number of queued connections in the kernel accept queue.
pub const DEFAULT_BACKLOG: i32 = 32;

pub struct Listener {
    fd: RawFd,
    port: u16,
}

impl Listener {
    /// Binds a listening TCP socket to `address:port`.
    ///
    /// Passing port 0 asks the kernel for an ephemeral port; `port()` reports
    /// the one actually bound.
    pub fn bind(address: Ipv4Addr, port: u16, backlog: i32) -> io::Result<Listener> {
        let fd = unsafe { libc::socket(libc::PF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let enable: libc::c_int = 1;
        if unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &enable as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        } < 0
        {
            return Err(Self::fail(fd));
        }

        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = u32::from(address).to_be();

        if unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        } < 0
        {
            return Err(Self::fail(fd));
        }

        if unsafe { libc::listen(fd, backlog) } < 0 {
            return Err(Self::fail(fd));
        }

        // Recover the port for the ephemeral case.
        let mut bound: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut bound_len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        if unsafe {
            libc::getsockname(
                fd,
                &mut bound as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut bound_len,
            )
        } < 0
        {
            return Err(Self::fail(fd));
        }

        Ok(Listener {
            fd,
            port: u16::from_be(bound.sin_port),
        })
    }

    fn fail(fd: RawFd) -> io::Error {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        err
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The port the socket is bound to.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Hands ownership of the descriptor to the caller without closing it.
    pub fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
