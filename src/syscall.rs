use std::{collections::HashMap, sync::LazyLock};

/// Guest socket enumerants and their host counterparts.
///
/// The guest headers use the Linux numbering. Values with no entry are
/// handed to the host unchanged, so a guest built against host-native
/// constants keeps working.
pub fn translate_domain(guest: i32) -> i32 {
    DOMAINS.get(&guest).copied().unwrap_or(guest)
}

pub fn translate_type(guest: i32) -> i32 {
    TYPES.get(&guest).copied().unwrap_or(guest)
}

pub fn translate_protocol(guest: i32) -> i32 {
    PROTOCOLS.get(&guest).copied().unwrap_or(guest)
}

pub fn translate_shutdown(guest: i32) -> i32 {
    SHUTDOWN_HOW.get(&guest).copied().unwrap_or(guest)
}

fn table(pairs: &[(i32, i32)]) -> HashMap<i32, i32> {
    pairs.iter().copied().collect()
}

static DOMAINS: LazyLock<HashMap<i32, i32>> = LazyLock::new(|| {
    table(&[
        (2, libc::AF_INET), // AF_INET
    ])
});

static TYPES: LazyLock<HashMap<i32, i32>> = LazyLock::new(|| {
    table(&[
        (1, libc::SOCK_STREAM), // SOCK_STREAM
        (2, libc::SOCK_DGRAM),  // SOCK_DGRAM
    ])
});

static PROTOCOLS: LazyLock<HashMap<i32, i32>> = LazyLock::new(|| {
    table(&[
        (6, libc::IPPROTO_TCP), // IPPROTO_TCP
    ])
});

static SHUTDOWN_HOW: LazyLock<HashMap<i32, i32>> = LazyLock::new(|| {
    table(&[
        (0, libc::SHUT_RD),   // SHUT_RD
        (1, libc::SHUT_WR),   // SHUT_WR
        (2, libc::SHUT_RDWR), // SHUT_RDWR
    ])
});
