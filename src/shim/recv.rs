use super::{Dispatcher, ShimError, guest_len};
use crate::{host::SocketBackend, memory::GuestMemory};

impl<B: SocketBackend> Dispatcher<B> {
    /// recv(fd, buf, len, flags) - received bytes are written to guest memory
    ///
    /// Returns 0 exactly when the peer has shut down its sending side.
    pub(crate) fn sys_recv<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        fd: i32,
        buf_ptr: i32,
        len: i32,
        _flags: i32,
    ) -> Result<i32, ShimError> {
        let handle = self.handle(fd)?;
        let len = guest_len(len)?;
        // Validate before blocking so a bad buffer can't swallow data.
        mem.check(buf_ptr as u32, len)?;

        let mut data = vec![0u8; len as usize];
        let received = {
            let _guard = handle.lock_recv();
            self.backend.recv(handle.socket(), &mut data)?
        };
        if received == 0 {
            log::debug!("recv(fd={fd}) -> peer closed");
            return Ok(0);
        }

        mem.write(buf_ptr as u32, &data[..received])?;
        log::debug!("recv(fd={fd}, {received} bytes)");
        Ok(received as i32)
    }
}
