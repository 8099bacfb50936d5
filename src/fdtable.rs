use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex, MutexGuard},
};

/// First descriptor handed to the guest. WASI reserves 0..=2 for stdio and
/// numbers preopened directories from 3, so start well clear of both.
pub const DEFAULT_FD_BASE: i32 = 100;

/// A host socket owned by the table, plus the locks that keep one socket's
/// sends and receives in order when guest contexts call in concurrently.
#[derive(Debug)]
pub struct SocketHandle<S> {
    socket: S,
    send_lock: Mutex<()>,
    recv_lock: Mutex<()>,
}

impl<S> SocketHandle<S> {
    fn new(socket: S) -> Self {
        Self {
            socket,
            send_lock: Mutex::new(()),
            recv_lock: Mutex::new(()),
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn lock_send(&self) -> MutexGuard<'_, ()> {
        self.send_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lock_recv(&self) -> MutexGuard<'_, ()> {
        self.recv_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct Slots<S> {
    next_fd: i32,
    entries: HashMap<i32, Arc<SocketHandle<S>>>,
}

/// Guest-visible descriptors to host sockets.
///
/// Descriptors count up from the base and are never handed out twice.
/// Lookups return a shared reference to the handle so the table lock is
/// never held across a blocking OS call. Releasing an fd drops the table's
/// reference; the OS socket closes once no in-flight call still holds it.
#[derive(Debug)]
pub struct FdTable<S> {
    slots: Mutex<Slots<S>>,
}

impl<S> FdTable<S> {
    pub fn new(base: i32) -> Self {
        Self {
            slots: Mutex::new(Slots {
                next_fd: base,
                entries: HashMap::new(),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots<S>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn allocate(&self, socket: S) -> io::Result<i32> {
        let mut slots = self.slots();
        let fd = slots.next_fd;
        slots.next_fd = fd
            .checked_add(1)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EMFILE))?;
        slots.entries.insert(fd, Arc::new(SocketHandle::new(socket)));
        Ok(fd)
    }

    pub fn lookup(&self, fd: i32) -> Option<Arc<SocketHandle<S>>> {
        self.slots().entries.get(&fd).cloned()
    }

    pub fn release(&self, fd: i32) -> Option<()> {
        let handle = self.slots().entries.remove(&fd)?;
        // Drop outside the table lock: closing a socket can block.
        drop(handle);
        Some(())
    }

    pub fn len(&self) -> usize {
        self.slots().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S> Default for FdTable<S> {
    fn default() -> Self {
        Self::new(DEFAULT_FD_BASE)
    }
}
