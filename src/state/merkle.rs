use crate::wallet::keccak256;

/// Root of a binary Keccak-256 tree over pre-hashed leaves. Odd levels pair the
/// last node with itself; no leaves gives the all-zero hash.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&left);
                buf[32..].copy_from_slice(&right);
                keccak256(&buf)
            })
            .collect();
    }
    level[0]
}
