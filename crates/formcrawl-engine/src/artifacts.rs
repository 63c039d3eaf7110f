//! Output directory for downloaded artifacts

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Directory receiving artifact files, written atomically (tmp + rename).
///
/// Each write gets its own uniquely named temp file, so executors that
/// produce the same artifact name never share a partial file.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    dir: PathBuf,
}

impl ArtifactDir {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` as `name`, replacing any previous file of that name.
    pub fn write(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let final_path = self.dir.join(name);
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&final_path).map_err(io::Error::from)?;
        Ok(final_path)
    }
}

/// File name for the artifact behind `detail_url`.
///
/// Detail URLs look like `https://host/<doc-id>/chi-tiet-ban-an`, so the
/// second-to-last path segment names the document. Falls back to the last
/// segment, then to `item{item}_{n}.pdf`.
pub fn artifact_file_name(detail_url: &str, item: u32, n: usize) -> String {
    let without_query = detail_url
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => without_query,
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let stem = match segments.as_slice() {
        [.., doc, _] => sanitize(doc),
        [only] => sanitize(only),
        [] => String::new(),
    };
    let stem = stem.trim_end_matches(".pdf");
    if stem.trim_matches(['_', '.']).is_empty() {
        return format!("item{item}_{n}.pdf");
    }
    format!("{stem}.pdf")
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn names_from_document_segment() {
        assert_eq!(
            artifact_file_name("https://example.vn/2ta1707573t1cvn/chi-tiet-ban-an", 3, 1),
            "2ta1707573t1cvn.pdf"
        );
        assert_eq!(
            artifact_file_name("https://example.vn/abc/chi-tiet-ban-an/", 3, 1),
            "abc.pdf"
        );
        assert_eq!(
            artifact_file_name("https://example.vn/abc/detail?x=1#top", 3, 1),
            "abc.pdf"
        );
    }

    #[test]
    fn falls_back_to_last_segment_then_item() {
        assert_eq!(artifact_file_name("https://example.vn/doc.pdf", 2, 1), "doc.pdf");
        assert_eq!(artifact_file_name("https://example.vn/", 2, 4), "item2_4.pdf");
        assert_eq!(artifact_file_name("", 7, 1), "item7_1.pdf");
    }

    #[test]
    fn sanitizes_path_characters() {
        assert_eq!(
            artifact_file_name("https://example.vn/a b%2F..x/detail", 1, 1),
            "a_b_2F..x.pdf"
        );
        assert_eq!(artifact_file_name("https://example.vn/%%/detail", 5, 2), "item5_2.pdf");
    }

    #[test]
    fn write_is_atomic_and_overwrites() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path().join("dataset")).unwrap();
        let path = dir.write("x.pdf", b"one").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"one");
        dir.write("x.pdf", b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("x.pdf")]);
    }

    #[test]
    fn concurrent_writes_of_same_name_publish_whole_files() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path()).unwrap();
        let bodies: Vec<Vec<u8>> = (0u8..8).map(|b| vec![b; 256 * 1024]).collect();

        std::thread::scope(|s| {
            for body in &bodies {
                let dir = &dir;
                s.spawn(move || {
                    for _ in 0..4 {
                        dir.write("same.pdf", body).unwrap();
                    }
                });
            }
        });

        let written = fs::read(dir.path().join("same.pdf")).unwrap();
        assert!(bodies.contains(&written));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
