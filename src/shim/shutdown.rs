use super::{Dispatcher, ShimError};
use crate::{host::SocketBackend, syscall::translate_shutdown};

impl<B: SocketBackend> Dispatcher<B> {
    pub(crate) fn sys_shutdown(&self, fd: i32, how: i32) -> Result<i32, ShimError> {
        let handle = self.handle(fd)?;
        self.backend
            .shutdown(handle.socket(), translate_shutdown(how))?;
        log::debug!("shutdown(fd={fd}, how={how})");
        Ok(0)
    }
}
