//! Content hashing for tracked files.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read buffer size, memory use does not grow with file size.
const HASH_BUFFER_SIZE: usize = 8192;

/// Computes the SHA-256 of a file's content as 64 lowercase hex characters.
///
/// The file is streamed through a fixed buffer. Any I/O failure is reported as
/// [`Error::FileAccess`] carrying the path, and is never retried.
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| Error::file_access(path, "hash", e))?;
    hash_reader(&mut file).map_err(|e| Error::file_access(path, "hash", e))
}

pub fn hash_reader<R: Read>(reader: &mut R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
