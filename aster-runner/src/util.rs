//! Small helpers shared across executors

use std::path::Path;

use aster_core::domain::log::Actor;
use sha2::{Digest, Sha256};

/// Identity of this process for audit rows: short hostname plus the user
/// the runner is executing as.
pub fn local_actor() -> Actor {
    let host = whoami::fallible::hostname().unwrap_or_else(|_| "unknown-host".to_string());
    let short = host.split('.').next().unwrap_or("unknown-host").to_string();
    Actor::new(short, whoami::username())
}

/// SHA-256 of a file's contents, hex encoded.
pub fn checksum_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();

    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Total size in bytes of all regular files under a directory.
///
/// Used by the fetch usage guard; a missing directory counts as empty.
pub fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_file() {
        let dir = std::env::temp_dir().join(format!("aster-util-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("checksum.dat");
        std::fs::write(&path, b"hello").unwrap();

        // SHA-256 of "hello".
        assert_eq!(
            checksum_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_dir_size() {
        let dir = std::env::temp_dir().join(format!("aster-dirsize-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("a"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.join("sub/b"), vec![0u8; 5]).unwrap();

        assert_eq!(dir_size(&dir).unwrap(), 15);
        assert_eq!(dir_size(&dir.join("missing")).unwrap(), 0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_local_actor_is_populated() {
        let actor = local_actor();
        assert!(!actor.host.is_empty());
        assert!(!actor.host.contains('.'));
    }
}
