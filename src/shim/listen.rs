use super::{Dispatcher, ShimError};
use crate::host::SocketBackend;

impl<B: SocketBackend> Dispatcher<B> {
    pub(crate) fn sys_listen(&self, fd: i32, backlog: i32) -> Result<i32, ShimError> {
        let handle = self.handle(fd)?;
        self.backend.listen(handle.socket(), backlog)?;
        log::debug!("listen(fd={fd}, backlog={backlog})");
        Ok(0)
    }
}
