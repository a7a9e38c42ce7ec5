//! Content checksums shared by the library index and project registry.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Checksum of a file's content: the first 8 bytes of its SHA-256, hex-encoded.
///
/// Symlinks are followed, so a linked project file hashes its library target.
pub fn checksum(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..8]))
}

/// Size and checksum of a file, following symlinks.
pub fn file_info(path: &Path) -> std::io::Result<(u64, String)> {
    let size = std::fs::metadata(path)?.len();
    Ok((size, checksum(path)?))
}
