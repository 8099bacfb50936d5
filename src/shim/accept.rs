use std::net::SocketAddrV4;

use super::{Dispatcher, ShimError};
use crate::{
    addr::{SOCKADDR_IN_LEN, SockAddrIn},
    host::SocketBackend,
    memory::GuestMemory,
};

impl<B: SocketBackend> Dispatcher<B> {
    /// accept(fd, addr, addrlen) - either pointer may be NULL
    pub(crate) fn sys_accept<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        fd: i32,
        addr_ptr: i32,
        addrlen_ptr: i32,
    ) -> Result<i32, ShimError> {
        let handle = self.handle(fd)?;

        // Check the output buffers up front: once accept returns, the
        // connection has been taken off the backlog.
        if addr_ptr != 0 {
            mem.check(addr_ptr as u32, SOCKADDR_IN_LEN as u32)?;
        }
        if addrlen_ptr != 0 {
            mem.check(addrlen_ptr as u32, 4)?;
        }

        let (conn, peer) = self.backend.accept(handle.socket())?;
        let new_fd = self.table.allocate(conn)?;

        if let Err(err) = Self::write_peer(mem, addr_ptr, addrlen_ptr, peer) {
            self.table.release(new_fd);
            return Err(err);
        }
        log::debug!("accept(fd={fd}) -> fd={new_fd} from {peer}");
        Ok(new_fd)
    }

    fn write_peer<M: GuestMemory + ?Sized>(
        mem: &mut M,
        addr_ptr: i32,
        addrlen_ptr: i32,
        peer: SocketAddrV4,
    ) -> Result<(), ShimError> {
        if addr_ptr != 0 {
            mem.write(addr_ptr as u32, &SockAddrIn::from(peer).encode())?;
        }
        if addrlen_ptr != 0 {
            mem.write_u32_le(addrlen_ptr as u32, SOCKADDR_IN_LEN as u32)?;
        }
        Ok(())
    }
}
