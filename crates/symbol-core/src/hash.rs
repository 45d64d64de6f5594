/// 32-bit FNV-1a over a byte string.
///
/// Dictionary words cache this value so rehashing never touches the bytes again.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Capacity after one growth step: `capacity + isqrt(capacity + 1)`.
///
/// Starts at 1 for an empty table and grows sub-geometrically, so large child
/// tables do not overshoot by much.
#[inline]
pub fn grown_capacity(capacity: usize) -> usize {
    capacity + (capacity + 1).isqrt()
}

/// Capacity to shrink to once `len` has fallen far enough below `capacity`.
///
/// Returns `None` while the slack stays inside the hysteresis band
/// (`2 * isqrt(capacity) + 1`), so alternating insert/remove at a boundary does
/// not rebuild the index every time.
#[inline]
pub fn shrunk_capacity(len: usize, capacity: usize) -> Option<usize> {
    let slack = capacity.saturating_sub(len);
    if slack > 2 * capacity.isqrt() + 1 {
        Some(len + (len + 1).isqrt())
    } else {
        None
    }
}
