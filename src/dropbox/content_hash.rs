//! Dropbox `content_hash`: SHA-256 over the concatenated SHA-256 digests of
//! each 4 MiB block of the file.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const BLOCK_SIZE: u64 = 4 * 1024 * 1024;

pub fn content_hash_reader(mut reader: impl Read) -> Result<String> {
    let mut overall = Sha256::new();
    let mut block = Vec::with_capacity(BLOCK_SIZE as usize);
    loop {
        block.clear();
        let read = (&mut reader).take(BLOCK_SIZE).read_to_end(&mut block)?;
        if read == 0 {
            break;
        }
        overall.update(Sha256::digest(&block));
    }
    Ok(format!("{:x}", overall.finalize()))
}

pub fn content_hash(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    content_hash_reader(file).with_context(|| format!("failed to hash {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_hashes_nothing() {
        assert_eq!(
            content_hash_reader(&b""[..]).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn single_block_is_hash_of_hash() {
        assert_eq!(
            content_hash_reader(&b"abc"[..]).unwrap(),
            "4f8b42c22dd3729b519ba6f68d2da7cc5b2d606d05daed5ad5128cc03e6c6358"
        );
    }

    #[test]
    fn input_spanning_two_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("zeros.bin");
        std::fs::write(&path, vec![0u8; BLOCK_SIZE as usize + 1]).unwrap();
        assert_eq!(
            content_hash(&path).unwrap(),
            "14a4d47f23a30177885d9820122f17d2d3a55fe63f7f5c27b95f689e0b2accd6"
        );
    }
}
