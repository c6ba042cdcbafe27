//! On-disk layout of one cache.
//!
//! ```text
//! <parent>/<name>/<aa>/<bb>/<docId><ext>     committed entry
//! <parent>/<name>/<aa>/<bb>/.<docId>.caching in-progress marker (temp file)
//! <parent>/<name>.zip                        latest snapshot archive
//! <parent>/<name>.generate                   snapshot archive under construction
//! ```

use std::path::{Path, PathBuf};

use crate::DocId;

const MARKER_SUFFIX: &str = ".caching";

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    name: String,
    root: PathBuf,
    extension: String,
}

impl Layout {
    pub(crate) fn new(name: impl Into<String>, root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self { name: name.into(), root: root.into(), extension: extension.into() }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn extension(&self) -> &str {
        &self.extension
    }

    pub(crate) fn shard_dirs(&self, doc_id: &DocId) -> (PathBuf, PathBuf) {
        let (first, second) = doc_id.shard();
        let first = self.root.join(first);
        let second = first.join(second);
        (first, second)
    }

    pub(crate) fn entry_file_name(&self, doc_id: &DocId) -> String {
        format!("{doc_id}{}", self.extension)
    }

    pub(crate) fn entry_path(&self, doc_id: &DocId) -> PathBuf {
        self.shard_dirs(doc_id).1.join(self.entry_file_name(doc_id))
    }

    pub(crate) fn marker_path(&self, doc_id: &DocId) -> PathBuf {
        self.shard_dirs(doc_id).1.join(format!(".{doc_id}{MARKER_SUFFIX}"))
    }

    /// Parse a committed entry's file name back into its id.
    ///
    /// Markers and foreign files yield `None`.
    pub(crate) fn doc_id_from_file_name(&self, file_name: &str) -> Option<DocId> {
        let stem = file_name.strip_suffix(self.extension.as_str())?;
        DocId::new(stem).ok()
    }

    pub(crate) fn is_marker_file_name(file_name: &str) -> bool {
        file_name.starts_with('.') && file_name.ends_with(MARKER_SUFFIX)
    }

    /// Shard directories are exactly two characters long.
    pub(crate) fn is_shard_dir_name(dir_name: &str) -> bool {
        dir_name.len() == 2 && !dir_name.starts_with('.')
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let parent = self.root.parent().map(Path::to_path_buf).unwrap_or_default();
        parent.join(format!("{}{suffix}", self.name))
    }

    pub(crate) fn archive_path(&self) -> PathBuf {
        self.sibling(".zip")
    }

    pub(crate) fn archive_temp_path(&self) -> PathBuf {
        self.sibling(".generate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::new("html", "/var/cache/doccache/html", ".xml")
    }

    #[test]
    fn test_entry_path_is_sharded() {
        let id = DocId::new("F7A2C91B").unwrap();
        assert_eq!(layout().entry_path(&id), PathBuf::from("/var/cache/doccache/html/F7/A2/F7A2C91B.xml"));
    }

    #[test]
    fn test_marker_lives_next_to_entry() {
        let id = DocId::new("F7A2C91B").unwrap();
        let marker = layout().marker_path(&id);
        assert_eq!(marker, PathBuf::from("/var/cache/doccache/html/F7/A2/.F7A2C91B.caching"));
        let name = marker.file_name().unwrap().to_str().unwrap();
        assert!(Layout::is_marker_file_name(name));
        assert!(layout().doc_id_from_file_name(name).is_none());
    }

    #[test]
    fn test_doc_id_from_file_name() {
        let l = layout();
        assert_eq!(l.doc_id_from_file_name("F7A2C91B.xml").unwrap().as_str(), "F7A2C91B");
        assert!(l.doc_id_from_file_name("F7A2C91B.txt").is_none());
        assert!(l.doc_id_from_file_name(".xml").is_none());
    }

    #[test]
    fn test_archive_paths_are_siblings_of_root() {
        let l = layout();
        assert_eq!(l.archive_path(), PathBuf::from("/var/cache/doccache/html.zip"));
        assert_eq!(l.archive_temp_path(), PathBuf::from("/var/cache/doccache/html.generate"));
    }
}
