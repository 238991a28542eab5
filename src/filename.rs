//! Output file naming.

use chrono::Utc;
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

const DISPOSITION_PARAM: &str = "response-content-disposition";

/// Derives a file name for the resource at `url`.
///
/// 1. `filename=` inside a `response-content-disposition` query parameter
///    (signed object-store links carry the real name there).
/// 2. The last path segment.
/// 3. `download_<unix millis>.bin`.
pub fn derive_file_name(url: &str) -> String {
    let parsed = Url::parse(url).ok();

    parsed
        .as_ref()
        .and_then(from_content_disposition)
        .or_else(|| parsed.as_ref().and_then(from_path))
        .unwrap_or_else(|| format!("download_{}.bin", Utc::now().timestamp_millis()))
}

fn from_content_disposition(url: &Url) -> Option<String> {
    // query_pairs already percent-decodes the parameter value once
    let (_, value) = url.query_pairs().find(|(k, _)| k == DISPOSITION_PARAM)?;
    let raw = value.split("filename=").nth(1)?;
    let raw = raw.split(';').next().unwrap_or(raw).trim();
    let unquoted = strip_quotes(raw);
    let decoded = percent_decode_str(unquoted).decode_utf8_lossy().to_string();
    Some(decoded).filter(|s| !s.is_empty())
}

fn strip_quotes(s: &str) -> &str {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn from_path(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let decoded = percent_decode_str(segment).decode_utf8_lossy().to_string();
    Some(decoded).filter(|s| !s.is_empty())
}

/// Final output path for a task saved under `save_path`.
///
/// An existing directory, or a path whose last component has no extension,
/// is treated as a directory and `file_name` is placed inside it.
pub fn resolve_output_path(save_path: &Path, file_name: &str) -> PathBuf {
    if save_path.is_dir() || save_path.extension().is_none() {
        save_path.join(file_name)
    } else {
        save_path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_content_disposition() {
        let url = "https://bucket.example.com/obj/abc123?X-Sig=1&response-content-disposition=attachment%3B%20filename%3D%22report%2520final.pdf%22&x=2";
        assert_eq!(derive_file_name(url), "report final.pdf");
    }

    #[test]
    fn single_quotes_are_stripped() {
        let url = "https://example.com/x?response-content-disposition=attachment;filename='a.zip'";
        assert_eq!(derive_file_name(url), "a.zip");
    }

    #[test]
    fn falls_back_to_path_segment() {
        assert_eq!(derive_file_name("https://example.com/files/archive.tar.gz"), "archive.tar.gz");
        assert_eq!(
            derive_file_name("https://example.com/my%20vacation%20photo.jpg?id=123"),
            "my vacation photo.jpg"
        );
    }

    #[test]
    fn synthesises_a_name_when_nothing_fits() {
        let name = derive_file_name("https://example.com/");
        assert!(name.starts_with("download_"));
        assert!(name.ends_with(".bin"));

        assert!(derive_file_name("not a url").starts_with("download_"));
    }

    #[test]
    fn directories_get_the_file_name_appended() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_output_path(dir.path(), "a.bin"), dir.path().join("a.bin"));
        assert_eq!(resolve_output_path(Path::new("/data/downloads"), "a.bin"), Path::new("/data/downloads/a.bin"));
        assert_eq!(resolve_output_path(Path::new("/data/out.iso"), "a.bin"), Path::new("/data/out.iso"));
    }
}
