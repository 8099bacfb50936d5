use super::{Dispatcher, ShimError};
use crate::host::SocketBackend;

impl<B: SocketBackend> Dispatcher<B> {
    /// close(fd) - drops the table's reference; the host socket closes with it
    pub(crate) fn sys_close(&self, fd: i32) -> Result<i32, ShimError> {
        self.table
            .release(fd)
            .ok_or(ShimError::UnknownDescriptor(fd))?;
        log::debug!("close(fd={fd})");
        Ok(0)
    }
}
