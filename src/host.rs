use std::{
    io, mem,
    net::{Ipv4Addr, SocketAddrV4},
    os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
};

/// The OS-facing half of the shim.
///
/// Arguments are already translated to host values; results are plain
/// `io::Result`s. Dropping a `Socket` releases the OS resource.
pub trait SocketBackend: Send + Sync {
    type Socket: Send + Sync;

    fn socket(&self, domain: i32, ty: i32, protocol: i32) -> io::Result<Self::Socket>;
    fn connect(&self, sock: &Self::Socket, addr: SocketAddrV4) -> io::Result<()>;
    fn bind(&self, sock: &Self::Socket, addr: SocketAddrV4) -> io::Result<()>;
    fn listen(&self, sock: &Self::Socket, backlog: i32) -> io::Result<()>;
    fn accept(&self, sock: &Self::Socket) -> io::Result<(Self::Socket, SocketAddrV4)>;
    fn send(&self, sock: &Self::Socket, buf: &[u8]) -> io::Result<usize>;
    fn recv(&self, sock: &Self::Socket, buf: &mut [u8]) -> io::Result<usize>;
    fn shutdown(&self, sock: &Self::Socket, how: i32) -> io::Result<()>;
}

/// Real sockets through libc.
#[derive(Debug, Clone)]
pub struct HostSockets {
    reuse_addr: bool,
}

impl HostSockets {
    pub fn new(reuse_addr: bool) -> Self {
        Self { reuse_addr }
    }
}

impl Default for HostSockets {
    fn default() -> Self {
        Self::new(true)
    }
}

/// One host socket descriptor.
#[derive(Debug)]
pub struct Socket {
    fd: Option<OwnedFd>,
}

impl Socket {
    fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: Some(unsafe { OwnedFd::from_raw_fd(fd) }),
        }
    }

    fn raw(&self) -> RawFd {
        self.fd.as_ref().map(|fd| fd.as_raw_fd()).unwrap_or(-1)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.raw()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // OwnedFd swallows close errors; close by hand so they reach the log.
        if let Some(fd) = self.fd.take() {
            let raw = fd.into_raw_fd();
            if unsafe { libc::close(raw) } == -1 {
                log::warn!(
                    "closing host socket {raw} failed: {}",
                    io::Error::last_os_error()
                );
            }
        }
    }
}

/// Map a libc `-1` return to the pending errno.
fn cvt(result: libc::c_int) -> io::Result<libc::c_int> {
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

fn cvt_size(result: libc::ssize_t) -> io::Result<usize> {
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result as usize)
    }
}

fn to_sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
    raw.sin_family = libc::AF_INET as libc::sa_family_t;
    raw.sin_port = addr.port().to_be();
    raw.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        raw.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
    }
    raw
}

fn from_sockaddr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddrV4> {
    if storage.ss_family as libc::c_int != libc::AF_INET {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("peer address family {} is not AF_INET", storage.ss_family),
        ));
    }
    let raw = unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in) };
    Ok(SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr)),
        u16::from_be(raw.sin_port),
    ))
}

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: libc::c_int = 0;

impl SocketBackend for HostSockets {
    type Socket = Socket;

    fn socket(&self, domain: i32, ty: i32, protocol: i32) -> io::Result<Socket> {
        let fd = cvt(unsafe { libc::socket(domain, ty, protocol) })?;
        let sock = Socket::from_raw(fd);

        if self.reuse_addr {
            let on: libc::c_int = 1;
            let result = unsafe {
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_REUSEADDR,
                    &on as *const libc::c_int as *const libc::c_void,
                    mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if let Err(err) = cvt(result) {
                log::warn!("SO_REUSEADDR on host socket {fd} failed: {err}");
            }
        }
        Ok(sock)
    }

    fn connect(&self, sock: &Socket, addr: SocketAddrV4) -> io::Result<()> {
        let raw = to_sockaddr_in(addr);
        cvt(unsafe {
            libc::connect(
                sock.raw(),
                &raw as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    fn bind(&self, sock: &Socket, addr: SocketAddrV4) -> io::Result<()> {
        let raw = to_sockaddr_in(addr);
        cvt(unsafe {
            libc::bind(
                sock.raw(),
                &raw as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    fn listen(&self, sock: &Socket, backlog: i32) -> io::Result<()> {
        cvt(unsafe { libc::listen(sock.raw(), backlog) })?;
        Ok(())
    }

    fn accept(&self, sock: &Socket) -> io::Result<(Socket, SocketAddrV4)> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = cvt(unsafe {
            libc::accept(
                sock.raw(),
                &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
                &mut len,
            )
        })?;
        // Own the new descriptor before anything can fail.
        let conn = Socket::from_raw(fd);
        let peer = from_sockaddr(&storage)?;
        Ok((conn, peer))
    }

    fn send(&self, sock: &Socket, buf: &[u8]) -> io::Result<usize> {
        cvt_size(unsafe {
            libc::send(
                sock.raw(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                SEND_FLAGS,
            )
        })
    }

    fn recv(&self, sock: &Socket, buf: &mut [u8]) -> io::Result<usize> {
        cvt_size(unsafe {
            libc::recv(
                sock.raw(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        })
    }

    fn shutdown(&self, sock: &Socket, how: i32) -> io::Result<()> {
        cvt(unsafe { libc::shutdown(sock.raw(), how) })?;
        Ok(())
    }
}
