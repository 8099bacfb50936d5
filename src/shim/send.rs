use super::{Dispatcher, ShimError, guest_len};
use crate::{host::SocketBackend, memory::GuestMemory};

impl<B: SocketBackend> Dispatcher<B> {
    /// send(fd, buf, len, flags) - buf is read from guest memory
    ///
    /// Guest flags use guest numbering and are not forwarded.
    pub(crate) fn sys_send<M: GuestMemory + ?Sized>(
        &self,
        mem: &M,
        fd: i32,
        buf_ptr: i32,
        len: i32,
        _flags: i32,
    ) -> Result<i32, ShimError> {
        let handle = self.handle(fd)?;
        let data = mem.read(buf_ptr as u32, guest_len(len)?)?;

        let sent = {
            let _guard = handle.lock_send();
            self.backend.send(handle.socket(), &data)?
        };
        log::debug!("send(fd={fd}, {sent} bytes)");
        // sent <= len <= i32::MAX
        Ok(sent as i32)
    }
}
