//! Filesystem-backed vault: document discovery, link resolution and reads.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    application::render::DocumentStore,
    domain::document::{DocumentHandle, normalize_logical_path},
};

use super::error::InfraError;

const MARKDOWN_EXTENSION: &str = ".md";

/// Vault rooted at a directory. The file index is taken once at open time.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
    documents: BTreeMap<String, DocumentHandle>,
}

impl FsDocumentStore {
    /// Indexes every non-hidden file below `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, InfraError> {
        let root = tokio::fs::canonicalize(root.as_ref()).await?;
        let mut documents = BTreeMap::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let Some(logical) = logical_path(&root, &path) else {
                    continue;
                };
                if let Ok(handle) = DocumentHandle::new(&logical) {
                    documents.insert(handle.path().to_string(), handle);
                }
            }
        }

        info!(
            target = "infra::store",
            op = "open",
            root = %root.display(),
            documents = documents.len(),
            "vault indexed"
        );
        Ok(Self { root, documents })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentHandle> {
        self.documents.values()
    }

    pub fn get(&self, path: &str) -> Option<&DocumentHandle> {
        self.documents.get(path)
    }

    /// Absolute location of a document inside the vault.
    pub fn absolute_path(&self, handle: &DocumentHandle) -> PathBuf {
        handle
            .path()
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    pub async fn read_to_string(&self, handle: &DocumentHandle) -> Result<String, InfraError> {
        let path = self.absolute_path(handle);
        let text = tokio::fs::read_to_string(&path).await?;
        debug!(
            target = "infra::store",
            op = "read",
            path = handle.path(),
            bytes = text.len(),
            "document read"
        );
        Ok(text)
    }

    fn resolve_path(&self, link: &str) -> Option<&DocumentHandle> {
        let target = link_target(link);
        let normalized = normalize_logical_path(target).ok()?;

        if let Some(handle) = self.documents.get(&normalized) {
            return Some(handle);
        }
        let with_extension = format!("{normalized}{MARKDOWN_EXTENSION}");
        if let Some(handle) = self.documents.get(&with_extension) {
            return Some(handle);
        }
        if normalized.contains('/') {
            return None;
        }

        let mut matches = self.documents.values().filter(|handle| {
            handle.file_name() == normalized || handle.file_name() == with_extension
        });
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    }
}

impl DocumentStore for FsDocumentStore {
    fn resolve(&self, link: &str) -> Option<DocumentHandle> {
        self.resolve_path(link).cloned()
    }
}

/// Strips heading/block anchors and display aliases from a wiki link.
fn link_target(link: &str) -> &str {
    let end = link.find(['#', '|', '^']).unwrap_or(link.len());
    link[..end].trim()
}

fn logical_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<_> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn vault() -> (tempfile::TempDir, FsDocumentStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("notes/daily")).expect("dirs");
        std::fs::create_dir_all(root.join(".obsidian")).expect("dirs");
        std::fs::write(root.join("notes/alpha.md"), "# Alpha").expect("alpha");
        std::fs::write(root.join("notes/daily/today.md"), "today").expect("today");
        std::fs::write(root.join("notes/daily/alpha.md"), "other alpha").expect("alpha 2");
        std::fs::write(root.join("board.canvas"), "{}").expect("canvas");
        std::fs::write(root.join(".obsidian/app.json"), "{}").expect("hidden");
        let store = FsDocumentStore::open(root).await.expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn indexes_visible_files_only() {
        let (_dir, store) = vault().await;
        let paths: Vec<_> = store.documents().map(|handle| handle.path()).collect();
        assert_eq!(
            paths,
            vec![
                "board.canvas",
                "notes/alpha.md",
                "notes/daily/alpha.md",
                "notes/daily/today.md"
            ]
        );
    }

    #[tokio::test]
    async fn resolves_exact_extensionless_and_stem_links() {
        let (_dir, store) = vault().await;

        let exact = store.resolve("notes/alpha.md").expect("exact");
        assert_eq!(exact.path(), "notes/alpha.md");

        let appended = store.resolve("notes/daily/today").expect("appended");
        assert_eq!(appended.path(), "notes/daily/today.md");

        let by_stem = store.resolve("today#Morning|alias").expect("stem");
        assert_eq!(by_stem.path(), "notes/daily/today.md");

        assert!(store.resolve("alpha").is_none(), "ambiguous stem");
        assert!(store.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn rejects_links_escaping_the_vault() {
        let (_dir, store) = vault().await;
        assert!(store.resolve("../secret.md").is_none());
        assert!(store.resolve("notes/../../etc/passwd").is_none());
    }

    #[tokio::test]
    async fn reads_document_contents() {
        let (_dir, store) = vault().await;
        let handle = store.resolve("notes/alpha").expect("alpha");
        let text = store.read_to_string(&handle).await.expect("read");
        assert_eq!(text, "# Alpha");
    }
}
