use super::key::Key;

/// Stable hash of a key.
///
/// Integer keys hash to themselves so that `k mod n` placement is predictable
/// for numeric workloads; string keys use seahash, which does not change across
/// processes or compiler versions.
pub fn key_hash(key: &Key) -> i64 {
    match key {
        Key::Int(i) => *i,
        Key::Str(s) => seahash::hash(s.as_bytes()) as i64,
    }
}

/// Maps a key onto one of `partitions` partitions.
///
/// `partitions` must be at least 1; graph validation guarantees this for every
/// operator the engine routes to.
pub fn partition_for(key: &Key, partitions: u32) -> u32 {
    let partitions = partitions.max(1) as i64;
    key_hash(key).rem_euclid(partitions) as u32
}
