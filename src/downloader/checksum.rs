//! 文件 CRC32 校验

use crate::error::{DownloadError, Result};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// 计算整个文件的 CRC32（同步）
pub fn crc32_file(path: &Path) -> io::Result<u32> {
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, File::open(path)?);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// 在阻塞线程池中计算 CRC32
pub async fn crc32_file_async(path: PathBuf) -> Result<u32> {
    tokio::task::spawn_blocking(move || crc32_file(&path))
        .await
        .map_err(|e| DownloadError::Io(io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(DownloadError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crc32_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"123456789").unwrap();
        // CRC-32/ISO-HDLC 标准校验值
        assert_eq!(crc32_file(&path).unwrap(), 0xCBF4_3926);
        assert_eq!(crc32_file_async(path).await.unwrap(), 0xCBF4_3926);

        assert!(crc32_file_async(dir.path().join("missing")).await.is_err());
    }
}
