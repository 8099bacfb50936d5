use super::{Dispatcher, ShimError};
use crate::{
    host::SocketBackend,
    syscall::{translate_domain, translate_protocol, translate_type},
};

impl<B: SocketBackend> Dispatcher<B> {
    /// socket(domain, type, protocol) - no pointers
    pub(crate) fn sys_socket(&self, domain: i32, ty: i32, protocol: i32) -> Result<i32, ShimError> {
        let sock = self.backend.socket(
            translate_domain(domain),
            translate_type(ty),
            translate_protocol(protocol),
        )?;
        let fd = self.table.allocate(sock)?;
        log::debug!("socket({domain}, {ty}, {protocol}) -> fd={fd}");
        Ok(fd)
    }
}
