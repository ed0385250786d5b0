// SPDX-License-Identifier: MIT OR Apache-2.0
//! Name hashing.
//!
//! Component types, scene plugins, command group kinds and prefab
//! paths are all identified on disk by the CRC-32 (IEEE reflected) of
//! their name.

/// CRC-32 hash of a name.
pub fn name_hash(name: &str) -> u32 {
    crc32fast::hash(name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::name_hash;

    #[test]
    fn stable_and_distinct() {
        assert_eq!(name_hash("camera"), name_hash("camera"));
        assert_ne!(name_hash("camera"), name_hash("box_rigid_actor"));
        // IEEE 802.3 reflected polynomial check value.
        assert_eq!(name_hash("123456789"), 0xcbf4_3926);
    }
}
