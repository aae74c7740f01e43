use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Largest file `read_binary_file` will accept by default (16 MiB)
pub const DEFAULT_MAX_FILE_SIZE: usize = 0x100_0000;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("could not open file '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("could not read file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("file '{path}' is too large")]
    TooLarge { path: String },
    #[error("file '{path}' is empty")]
    Empty { path: String },
}

/// Slurp a whole file into a byte buffer, rejecting empty files and
/// files larger than `max_size`
pub fn read_binary_file(path: &Path, max_size: usize) -> Result<Vec<u8>, IoError> {
    let display = || path.display().to_string();

    let file = File::open(path).map_err(|source| IoError::Open {
        path: display(),
        source,
    })?;

    let mut data = Vec::new();
    file.take(max_size as u64 + 1)
        .read_to_end(&mut data)
        .map_err(|source| IoError::Read {
            path: display(),
            source,
        })?;

    if data.len() > max_size {
        return Err(IoError::TooLarge { path: display() });
    }
    if data.is_empty() {
        return Err(IoError::Empty { path: display() });
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("rmips-io-test-{}-{}", std::process::id(), name));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn reads_whole_file() {
        let path = temp_file("whole", &[1, 2, 3, 4]);
        assert_eq!(
            read_binary_file(&path, DEFAULT_MAX_FILE_SIZE).unwrap(),
            vec![1, 2, 3, 4]
        );
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_empty_file() {
        let path = temp_file("empty", &[]);
        assert!(matches!(
            read_binary_file(&path, DEFAULT_MAX_FILE_SIZE),
            Err(IoError::Empty { .. })
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_oversized_file() {
        let path = temp_file("large", &[0u8; 32]);
        assert!(matches!(
            read_binary_file(&path, 16),
            Err(IoError::TooLarge { .. })
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_missing_file() {
        let path = std::path::Path::new("/nonexistent/rmips-io-test");
        assert!(matches!(
            read_binary_file(path, DEFAULT_MAX_FILE_SIZE),
            Err(IoError::Open { .. })
        ));
    }
}
