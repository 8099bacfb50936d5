use super::{Dispatcher, ShimError};
use crate::{host::SocketBackend, memory::GuestMemory};

impl<B: SocketBackend> Dispatcher<B> {
    /// connect(fd, addr, addrlen) - addr is a guest sockaddr_in
    pub(crate) fn sys_connect<M: GuestMemory + ?Sized>(
        &self,
        mem: &M,
        fd: i32,
        addr_ptr: i32,
        addr_len: i32,
    ) -> Result<i32, ShimError> {
        let handle = self.handle(fd)?;
        let addr = Self::guest_sockaddr(mem, addr_ptr, addr_len)?.socket_addr();

        self.backend.connect(handle.socket(), addr)?;
        log::debug!("connect(fd={fd}, {addr})");
        Ok(0)
    }
}
