//! 基于 JSON 清单的远端实现
//!
//! 清单直接列出文件夹、文件及其直链，适合自建对象存储或测试环境：
//!
//! ```json
//! {
//!   "folders": [
//!     {
//!       "id": "movies",
//!       "name": "电影",
//!       "files": [
//!         { "id": "f1", "name": "a.mkv", "relative_path": "科幻", "size": 1024,
//!           "url": "http://127.0.0.1:9000/a.mkv", "token": "secret" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use super::{RemoteClient, RemoteEntry, RemoteFolder, TreeWalker};
use crate::downloader::{DownloadLink, Item};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub folders: Vec<ManifestFolder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFolder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub relative_path: String,
    pub size: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ManifestSource {
    manifest: Manifest,
    /// 文件ID -> 下载链接
    links: HashMap<String, DownloadLink>,
}

impl ManifestSource {
    pub fn new(manifest: Manifest) -> Self {
        let links = manifest
            .folders
            .iter()
            .flat_map(|folder| folder.files.iter())
            .map(|file| {
                let mut link = DownloadLink::new(file.url.clone());
                if let Some(token) = &file.token {
                    link = link.with_token(token.clone());
                }
                (file.id.clone(), link)
            })
            .collect();
        Self { manifest, links }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取清单失败: {:?}", path))?;
        let manifest: Manifest =
            serde_json::from_str(&content).with_context(|| format!("解析清单失败: {:?}", path))?;
        info!(
            "清单加载成功: {:?}, 共 {} 个文件夹",
            path,
            manifest.folders.len()
        );
        Ok(Self::new(manifest))
    }

    pub fn folder_ids(&self) -> Vec<String> {
        self.manifest.folders.iter().map(|f| f.id.clone()).collect()
    }
}

#[async_trait]
impl TreeWalker for ManifestSource {
    async fn walk(&self, folder_id: &str) -> Result<RemoteFolder> {
        let folder = self
            .manifest
            .folders
            .iter()
            .find(|f| f.id == folder_id)
            .with_context(|| format!("清单中不存在文件夹: {}", folder_id))?;

        debug!("遍历文件夹 {}: {} 个文件", folder_id, folder.files.len());

        Ok(RemoteFolder {
            id: folder.id.clone(),
            name: folder.name.clone(),
            entries: folder
                .files
                .iter()
                .map(|file| RemoteEntry {
                    file_id: file.id.clone(),
                    name: file.name.clone(),
                    relative_path: file.relative_path.clone(),
                    size: file.size,
                    crc32: file.crc32,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl RemoteClient for ManifestSource {
    async fn resolve_download_link(&self, item: &Item) -> Result<DownloadLink> {
        self.links
            .get(&item.id)
            .cloned()
            .with_context(|| format!("清单中不存在文件: {}", item.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "folders": [{
            "id": "movies",
            "name": "电影",
            "files": [
                {"id": "f1", "name": "a.mkv", "relative_path": "科幻", "size": 10, "url": "http://h/a", "token": "t"},
                {"id": "f2", "name": "b.mkv", "size": 20, "url": "http://h/b", "crc32": 123}
            ]
        }]
    }"#;

    #[tokio::test]
    async fn test_manifest_walk_and_resolve() {
        let source = ManifestSource::new(serde_json::from_str(MANIFEST).unwrap());
        assert_eq!(source.folder_ids(), vec!["movies".to_string()]);

        let folder = source.walk("movies").await.unwrap();
        assert_eq!(folder.entries.len(), 2);
        assert_eq!(folder.entries[0].relative_path, "科幻");
        assert_eq!(folder.entries[1].crc32, Some(123));
        assert!(source.walk("missing").await.is_err());

        let item = Item::new("f1", "movies", "a.mkv", "科幻", 10);
        let link = source.resolve_download_link(&item).await.unwrap();
        assert_eq!(link.url, "http://h/a");
        assert_eq!(link.bearer_token.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_manifest_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, MANIFEST).unwrap();
        let source = ManifestSource::load(&path).await.unwrap();
        assert_eq!(source.folder_ids().len(), 1);

        assert!(ManifestSource::load(dir.path().join("nope.json")).await.is_err());
    }
}
