//! Face embedding gallery, persisted as one JSON document.
//!
//! The whole file is rewritten (temp file + rename) on every mutation,
//! which is O(n) per write.

use rollcall_core::{Embedding, GalleryEntry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const GALLERY_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed gallery {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported gallery version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Deserialize)]
struct GalleryFile {
    version: u32,
    entries: Vec<GalleryEntry>,
}

#[derive(Serialize)]
struct GalleryFileRef<'a> {
    version: u32,
    entries: &'a [GalleryEntry],
}

/// Name → embedding mapping, at most one embedding per name.
///
/// Iteration order is insertion order; replacing an entry keeps its slot.
pub struct EmbeddingGallery {
    path: PathBuf,
    entries: Vec<GalleryEntry>,
}

impl EmbeddingGallery {
    /// Load the gallery at `path`, or start empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => {
                let file: GalleryFile =
                    serde_json::from_slice(&bytes).map_err(|source| GalleryError::Json {
                        path: path.clone(),
                        source,
                    })?;
                if file.version != GALLERY_VERSION {
                    return Err(GalleryError::UnsupportedVersion(file.version));
                }
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(GalleryError::Io { path, source }),
        };

        tracing::info!(path = %path.display(), entries = entries.len(), "gallery loaded");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.embedding)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace the embedding for `name`, then persist. On a
    /// failed write the in-memory gallery is left unchanged.
    pub fn put(&mut self, name: &str, embedding: Embedding) -> Result<(), GalleryError> {
        let mut entries = self.entries.clone();
        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.embedding = embedding,
            None => entries.push(GalleryEntry {
                name: name.to_string(),
                embedding,
            }),
        }
        self.persist(&entries)?;
        self.entries = entries;
        tracing::info!(name, entries = self.entries.len(), "gallery entry stored");
        Ok(())
    }

    /// Remove the embedding for `name`. Returns `false` if there was none.
    pub fn remove(&mut self, name: &str) -> Result<bool, GalleryError> {
        let Some(pos) = self.entries.iter().position(|e| e.name == name) else {
            return Ok(false);
        };
        let mut entries = self.entries.clone();
        entries.remove(pos);
        self.persist(&entries)?;
        self.entries = entries;
        tracing::info!(name, "gallery entry removed");
        Ok(true)
    }

    /// All entries, in gallery order.
    pub fn all(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self, entries: &[GalleryEntry]) -> Result<(), GalleryError> {
        let doc = GalleryFileRef {
            version: GALLERY_VERSION,
            entries,
        };
        let bytes = serde_json::to_vec(&doc).map_err(|source| GalleryError::Json {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| GalleryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|source| GalleryError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| GalleryError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = EmbeddingGallery::open(dir.path().join("g.json")).unwrap();
        assert!(gallery.is_empty());
        assert!(gallery.get("Alice").is_none());
    }

    #[test]
    fn test_put_get_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.json");
        let mut gallery = EmbeddingGallery::open(&path).unwrap();
        gallery.put("Alice", emb(&[1.0, 0.0])).unwrap();

        let reopened = EmbeddingGallery::open(&path).unwrap();
        assert_eq!(reopened.get("Alice"), Some(&emb(&[1.0, 0.0])));
    }

    #[test]
    fn test_put_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = EmbeddingGallery::open(dir.path().join("g.json")).unwrap();
        gallery.put("Alice", emb(&[1.0])).unwrap();
        gallery.put("Bob", emb(&[2.0])).unwrap();
        gallery.put("Alice", emb(&[3.0])).unwrap();

        assert_eq!(gallery.len(), 2);
        let names: Vec<&str> = gallery.all().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Alice", "Bob"]);
        assert_eq!(gallery.get("Alice"), Some(&emb(&[3.0])));
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.json");
        let mut gallery = EmbeddingGallery::open(&path).unwrap();
        gallery.put("Alice", emb(&[1.0])).unwrap();

        assert!(gallery.remove("Alice").unwrap());
        assert!(!gallery.remove("Alice").unwrap());
        assert!(EmbeddingGallery::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_order_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.json");
        let mut gallery = EmbeddingGallery::open(&path).unwrap();
        for name in ["Carol", "Alice", "Bob"] {
            gallery.put(name, emb(&[0.0])).unwrap();
        }

        let reopened = EmbeddingGallery::open(&path).unwrap();
        let names: Vec<&str> = reopened.all().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Carol", "Alice", "Bob"]);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.json");
        fs::write(&path, r#"{"version":7,"entries":[]}"#).unwrap();
        assert!(matches!(
            EmbeddingGallery::open(&path),
            Err(GalleryError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(EmbeddingGallery::open(&path), Err(GalleryError::Json { .. })));
    }

    #[test]
    fn test_failed_write_leaves_gallery_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.json");
        let mut gallery = EmbeddingGallery::open(&path).unwrap();
        gallery.put("Alice", emb(&[1.0])).unwrap();

        // A directory in place of the file makes the final rename fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        assert!(gallery.put("Bob", emb(&[2.0])).is_err());
        assert_eq!(gallery.len(), 1);
        assert!(!gallery.contains("Bob"));

        assert!(gallery.remove("Alice").is_err());
        assert!(gallery.contains("Alice"));
    }
}
