mod accept;
mod bind;
mod close;
mod connect;
mod listen;
mod recv;
mod send;
mod shutdown;
mod socket;

use std::{error::Error, fmt, io, sync::Arc};

use crate::{
    addr::{AddrError, SockAddrIn},
    fdtable::{DEFAULT_FD_BASE, FdTable, SocketHandle},
    host::{HostSockets, SocketBackend},
    memory::{GuestMemory, MemoryError},
};

/// Knobs for one guest instance's socket shim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimConfig {
    /// First fd handed to the guest.
    pub fd_base: i32,
    /// Set `SO_REUSEADDR` on every socket the guest creates.
    pub reuse_addr: bool,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            fd_base: DEFAULT_FD_BASE,
            reuse_addr: true,
        }
    }
}

/// Translates guest socket calls into host socket calls.
///
/// Every entry point returns the guest-visible result: a non-negative value
/// on success, `-1` on any failure. The cause of a failure goes to the log,
/// never to the guest. One dispatcher serves exactly one guest instance.
pub struct Dispatcher<B: SocketBackend = HostSockets> {
    backend: B,
    table: FdTable<B::Socket>,
}

impl Dispatcher<HostSockets> {
    pub fn new(config: &ShimConfig) -> Self {
        Self::with_backend(HostSockets::new(config.reuse_addr), config.fd_base)
    }
}

impl<B: SocketBackend> Dispatcher<B> {
    pub fn with_backend(backend: B, fd_base: i32) -> Self {
        Self {
            backend,
            table: FdTable::new(fd_base),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of descriptors the guest currently holds.
    pub fn open_descriptors(&self) -> usize {
        self.table.len()
    }

    pub fn socket(&self, domain: i32, ty: i32, protocol: i32) -> i32 {
        finish(
            || format!("socket({domain}, {ty}, {protocol})"),
            self.sys_socket(domain, ty, protocol),
        )
    }

    pub fn connect<M: GuestMemory + ?Sized>(
        &self,
        mem: &M,
        fd: i32,
        addr_ptr: i32,
        addr_len: i32,
    ) -> i32 {
        finish(
            || format!("connect(fd={fd})"),
            self.sys_connect(mem, fd, addr_ptr, addr_len),
        )
    }

    pub fn send<M: GuestMemory + ?Sized>(
        &self,
        mem: &M,
        fd: i32,
        buf_ptr: i32,
        len: i32,
        flags: i32,
    ) -> i32 {
        finish(
            || format!("send(fd={fd}, len={len})"),
            self.sys_send(mem, fd, buf_ptr, len, flags),
        )
    }

    pub fn recv<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        fd: i32,
        buf_ptr: i32,
        len: i32,
        flags: i32,
    ) -> i32 {
        finish(
            || format!("recv(fd={fd}, len={len})"),
            self.sys_recv(mem, fd, buf_ptr, len, flags),
        )
    }

    pub fn close(&self, fd: i32) -> i32 {
        finish(|| format!("close(fd={fd})"), self.sys_close(fd))
    }

    pub fn bind<M: GuestMemory + ?Sized>(
        &self,
        mem: &M,
        fd: i32,
        addr_ptr: i32,
        addr_len: i32,
    ) -> i32 {
        finish(
            || format!("bind(fd={fd})"),
            self.sys_bind(mem, fd, addr_ptr, addr_len),
        )
    }

    pub fn listen(&self, fd: i32, backlog: i32) -> i32 {
        finish(
            || format!("listen(fd={fd}, backlog={backlog})"),
            self.sys_listen(fd, backlog),
        )
    }

    pub fn accept<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        fd: i32,
        addr_ptr: i32,
        addrlen_ptr: i32,
    ) -> i32 {
        finish(
            || format!("accept(fd={fd})"),
            self.sys_accept(mem, fd, addr_ptr, addrlen_ptr),
        )
    }

    pub fn shutdown(&self, fd: i32, how: i32) -> i32 {
        finish(
            || format!("shutdown(fd={fd}, how={how})"),
            self.sys_shutdown(fd, how),
        )
    }

    fn handle(&self, fd: i32) -> Result<Arc<SocketHandle<B::Socket>>, ShimError> {
        self.table
            .lookup(fd)
            .ok_or(ShimError::UnknownDescriptor(fd))
    }

    /// Read and decode a `sockaddr_in` the guest passed by pointer.
    fn guest_sockaddr<M: GuestMemory + ?Sized>(
        mem: &M,
        addr_ptr: i32,
        addr_len: i32,
    ) -> Result<SockAddrIn, ShimError> {
        let raw = mem.read(addr_ptr as u32, guest_len(addr_len)?)?;
        Ok(SockAddrIn::decode(&raw)?)
    }
}

/// Guest lengths are signed on the wire; a negative one is never valid.
fn guest_len(len: i32) -> Result<u32, ShimError> {
    u32::try_from(len).map_err(|_| ShimError::InvalidLength(len))
}

/// Collapse a handler result to the guest ABI, logging the failure cause.
fn finish<F: FnOnce() -> String>(call: F, result: Result<i32, ShimError>) -> i32 {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::warn!("{} failed: {err}", call());
            -1
        }
    }
}

#[derive(Debug)]
pub enum ShimError {
    Bounds(MemoryError),
    InvalidLength(i32),
    UnknownDescriptor(i32),
    Address(AddrError),
    Host(io::Error),
}

impl fmt::Display for ShimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShimError::Bounds(err) => write!(f, "{err}"),
            ShimError::InvalidLength(len) => write!(f, "negative length {len}"),
            ShimError::UnknownDescriptor(fd) => write!(f, "fd {fd} is not an open socket"),
            ShimError::Address(err) => write!(f, "{err}"),
            ShimError::Host(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ShimError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ShimError::Bounds(err) => Some(err),
            ShimError::Address(err) => Some(err),
            ShimError::Host(err) => Some(err),
            ShimError::InvalidLength(_) | ShimError::UnknownDescriptor(_) => None,
        }
    }
}

impl From<MemoryError> for ShimError {
    fn from(err: MemoryError) -> Self {
        ShimError::Bounds(err)
    }
}

impl From<AddrError> for ShimError {
    fn from(err: AddrError) -> Self {
        ShimError::Address(err)
    }
}

impl From<io::Error> for ShimError {
    fn from(err: io::Error) -> Self {
        ShimError::Host(err)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        net::{Ipv4Addr, SocketAddrV4},
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicU32, Ordering},
        },
    };

    use super::*;
    use crate::addr::SOCKADDR_IN_LEN;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Socket(i32, i32, i32),
        Connect(SocketAddrV4),
        Bind(SocketAddrV4),
        Listen(i32),
        Accept,
        Send(Vec<u8>),
        Recv(usize),
        Shutdown(i32),
    }

    /// Scripted backend that records every OS call it would have made.
    #[derive(Default)]
    struct Mock {
        calls: Mutex<Vec<Call>>,
        inbox: Mutex<VecDeque<Vec<u8>>>,
        next_socket: AtomicU32,
        fail: AtomicBool,
    }

    impl Mock {
        fn record(&self, call: Call) -> io::Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::ErrorKind::ConnectionRefused.into());
            }
            Ok(())
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn socket_id(&self) -> u32 {
            self.next_socket.fetch_add(1, Ordering::SeqCst)
        }
    }

    fn peer() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 40000)
    }

    impl SocketBackend for Mock {
        type Socket = u32;

        fn socket(&self, domain: i32, ty: i32, protocol: i32) -> io::Result<u32> {
            self.record(Call::Socket(domain, ty, protocol))?;
            Ok(self.socket_id())
        }

        fn connect(&self, _: &u32, addr: SocketAddrV4) -> io::Result<()> {
            self.record(Call::Connect(addr))
        }

        fn bind(&self, _: &u32, addr: SocketAddrV4) -> io::Result<()> {
            self.record(Call::Bind(addr))
        }

        fn listen(&self, _: &u32, backlog: i32) -> io::Result<()> {
            self.record(Call::Listen(backlog))
        }

        fn accept(&self, _: &u32) -> io::Result<(u32, SocketAddrV4)> {
            self.record(Call::Accept)?;
            Ok((self.socket_id(), peer()))
        }

        fn send(&self, _: &u32, buf: &[u8]) -> io::Result<usize> {
            self.record(Call::Send(buf.to_vec()))?;
            Ok(buf.len())
        }

        fn recv(&self, _: &u32, buf: &mut [u8]) -> io::Result<usize> {
            self.record(Call::Recv(buf.len()))?;
            let Some(chunk) = self.inbox.lock().unwrap().pop_front() else {
                return Ok(0);
            };
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }

        fn shutdown(&self, _: &u32, how: i32) -> io::Result<()> {
            self.record(Call::Shutdown(how))
        }
    }

    fn shim() -> Dispatcher<Mock> {
        Dispatcher::with_backend(Mock::default(), 100)
    }

    fn guest_addr(ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut raw = vec![2, 0];
        raw.extend_from_slice(&port.to_be_bytes());
        raw.extend_from_slice(&ip);
        raw.resize(SOCKADDR_IN_LEN, 0);
        raw
    }

    #[test]
    fn socket_translates_constants_and_allocates_from_base() {
        let shim = shim();
        assert_eq!(shim.socket(2, 1, 6), 100);
        assert_eq!(shim.socket(2, 2, 0), 101);
        assert_eq!(
            shim.backend().calls(),
            vec![
                Call::Socket(libc::AF_INET, libc::SOCK_STREAM, libc::IPPROTO_TCP),
                Call::Socket(libc::AF_INET, libc::SOCK_DGRAM, 0),
            ]
        );
        assert_eq!(shim.open_descriptors(), 2);
    }

    #[test]
    fn unknown_constants_reach_the_host_unchanged() {
        let shim = shim();
        shim.socket(99, 42, 7);
        assert_eq!(shim.backend().calls(), vec![Call::Socket(99, 42, 7)]);
    }

    #[test]
    fn unknown_fd_never_reaches_the_host() {
        let shim = shim();
        let mut mem = vec![0u8; 256];
        mem[..SOCKADDR_IN_LEN].copy_from_slice(&guest_addr([127, 0, 0, 1], 80));

        for fd in [-1, 0, 3, 99, 100, 12345] {
            assert_eq!(shim.connect(&mem, fd, 0, 16), -1);
            assert_eq!(shim.bind(&mem, fd, 0, 16), -1);
            assert_eq!(shim.listen(fd, 1), -1);
            assert_eq!(shim.accept(&mut mem, fd, 32, 64), -1);
            assert_eq!(shim.send(&mem, fd, 0, 4, 0), -1);
            assert_eq!(shim.recv(&mut mem, fd, 0, 4, 0), -1);
            assert_eq!(shim.shutdown(fd, 2), -1);
            assert_eq!(shim.close(fd), -1);
        }
        assert!(shim.backend().calls().is_empty());
        assert_eq!(shim.open_descriptors(), 0);
    }

    #[test]
    fn close_twice_fails_the_second_time() {
        let shim = shim();
        let fd = shim.socket(2, 1, 6);
        assert_eq!(shim.close(fd), 0);
        assert_eq!(shim.close(fd), -1);
        assert_eq!(shim.open_descriptors(), 0);
        assert_eq!(shim.listen(fd, 1), -1);
    }

    #[test]
    fn connect_and_bind_decode_the_guest_address() {
        let shim = shim();
        let mut mem = vec![0u8; 64];
        mem[8..24].copy_from_slice(&guest_addr([93, 184, 215, 14], 80));
        let fd = shim.socket(2, 1, 6);

        assert_eq!(shim.connect(&mem, fd, 8, 16), 0);
        assert_eq!(shim.bind(&mem, fd, 8, 16), 0);
        let expected = SocketAddrV4::new(Ipv4Addr::new(93, 184, 215, 14), 80);
        assert_eq!(
            &shim.backend().calls()[1..],
            &[Call::Connect(expected), Call::Bind(expected)]
        );
    }

    #[test]
    fn bad_address_arguments_fail_before_the_host() {
        let shim = shim();
        let mem = vec![0u8; 64];
        let fd = shim.socket(2, 1, 6);

        // Truncated sockaddr.
        assert_eq!(shim.connect(&mem, fd, 0, 8), -1);
        // Runs off the end of memory.
        assert_eq!(shim.connect(&mem, fd, 56, 16), -1);
        assert_eq!(shim.bind(&mem, fd, 60, 16), -1);
        // Negative length.
        assert_eq!(shim.bind(&mem, fd, 0, -16), -1);

        assert_eq!(shim.backend().calls().len(), 1);
    }

    #[test]
    fn send_copies_guest_bytes_and_ignores_flags() {
        let shim = shim();
        let mut mem = vec![0u8; 32];
        mem[4..8].copy_from_slice(b"ping");
        let fd = shim.socket(2, 1, 6);

        assert_eq!(shim.send(&mem, fd, 4, 4, 0x4000), 4);
        assert_eq!(shim.send(&mem, fd, 30, 4, 0), -1);
        assert_eq!(shim.send(&mem, fd, 0, -1, 0), -1);
        assert_eq!(
            shim.backend().calls().last(),
            Some(&Call::Send(b"ping".to_vec()))
        );
    }

    #[test]
    fn recv_writes_into_guest_memory() {
        let shim = shim();
        shim.backend()
            .inbox
            .lock()
            .unwrap()
            .push_back(b"pong".to_vec());
        let mut mem = vec![0u8; 32];
        let fd = shim.socket(2, 1, 6);

        assert_eq!(shim.recv(&mut mem, fd, 16, 8, 0), 4);
        assert_eq!(&mem[16..20], b"pong");
        assert!(mem[20..24].iter().all(|b| *b == 0));
        assert_eq!(shim.backend().calls().last(), Some(&Call::Recv(8)));

        // Peer closed: zero, not an error.
        assert_eq!(shim.recv(&mut mem, fd, 16, 8, 0), 0);
    }

    #[test]
    fn recv_checks_the_destination_before_blocking() {
        let shim = shim();
        let mut mem = vec![0u8; 32];
        let fd = shim.socket(2, 1, 6);

        assert_eq!(shim.recv(&mut mem, fd, 28, 8, 0), -1);
        assert_eq!(shim.recv(&mut mem, fd, 0, -8, 0), -1);
        assert_eq!(shim.backend().calls().len(), 1);
    }

    #[test]
    fn accept_reports_the_peer() {
        let shim = shim();
        let mut mem = vec![0xaau8; 64];
        let server = shim.socket(2, 1, 6);

        let conn = shim.accept(&mut mem, server, 8, 32);
        assert_eq!(conn, 101);
        assert_eq!(&mem[8..24], guest_addr([10, 0, 0, 7], 40000).as_slice());
        assert_eq!(&mem[32..36], &16u32.to_le_bytes());
        assert_eq!(shim.open_descriptors(), 2);
    }

    #[test]
    fn accept_with_null_pointers_writes_nothing() {
        let shim = shim();
        let mut mem = vec![0xaau8; 64];
        let server = shim.socket(2, 1, 6);

        assert_eq!(shim.accept(&mut mem, server, 0, 0), 101);
        assert!(mem.iter().all(|b| *b == 0xaa));
    }

    #[test]
    fn accept_with_bad_pointer_does_not_leak_a_descriptor() {
        let shim = shim();
        let mut mem = vec![0u8; 64];
        let server = shim.socket(2, 1, 6);

        assert_eq!(shim.accept(&mut mem, server, 60, 0), -1);
        assert_eq!(shim.accept(&mut mem, server, 0, 62), -1);
        assert_eq!(shim.open_descriptors(), 1);
        assert!(!shim.backend().calls().contains(&Call::Accept));
    }

    #[test]
    fn shutdown_and_listen_forward_arguments() {
        let shim = shim();
        let fd = shim.socket(2, 1, 6);
        assert_eq!(shim.listen(fd, 5), 0);
        assert_eq!(shim.shutdown(fd, 1), 0);
        assert_eq!(shim.shutdown(fd, 9), 0);
        assert_eq!(
            &shim.backend().calls()[1..],
            &[
                Call::Listen(5),
                Call::Shutdown(libc::SHUT_WR),
                Call::Shutdown(9)
            ]
        );
    }

    #[test]
    fn host_failure_becomes_minus_one() {
        let shim = shim();
        let addr = guest_addr([127, 0, 0, 1], 1);
        let fd = shim.socket(2, 1, 6);
        shim.backend().fail.store(true, Ordering::SeqCst);

        assert_eq!(shim.connect(&addr, fd, 0, 16), -1);
        assert_eq!(shim.socket(2, 1, 6), -1);
        assert_eq!(shim.listen(fd, 1), -1);
        // The failed socket() allocated nothing; the live fd is untouched.
        assert_eq!(shim.open_descriptors(), 1);
        assert_eq!(shim.close(fd), 0);
    }
}
