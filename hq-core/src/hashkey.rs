use std::net::SocketAddr;

use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::hmac;

// Keyed hash so an attacker who can pick CIDs cannot aim collisions at the
// accept map. The key is per-process and never leaves it.
static ACCEPT_HASH_KEY: Lazy<hmac::Key> = Lazy::new(|| {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    hmac::Key::new(hmac::HMAC_SHA256, &seed)
});

/// The 64-bit accept-map key for a `(peer address, offered CID)` pair.
///
/// Deterministic within a process; distinct pairs collide with the usual
/// HMAC truncation odds.
pub(crate) fn accept_key(sa: SocketAddr, cid: &[u8]) -> u64 {
    let mut input = Vec::with_capacity(1 + 16 + 2 + 1 + cid.len());

    match sa {
        SocketAddr::V4(v4) => {
            input.push(4);
            input.extend_from_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            input.push(6);
            input.extend_from_slice(&v6.ip().octets());
        }
    }
    input.extend_from_slice(&sa.port().to_be_bytes());
    input.push(cid.len() as u8);
    input.extend_from_slice(cid);

    let tag = hmac::sign(&ACCEPT_HASH_KEY, &input);
    let mut truncated = [0u8; 8];
    truncated.copy_from_slice(&tag.as_ref()[..8]);
    u64::from_le_bytes(truncated)
}
