//! Utility functions

use crate::error::{Result, ZarrError};
use crate::types::Element;

/// Name of the metadata document stored under every node path
pub const META_KEY: &str = "zarr.json";

/// Convert little-endian element bytes to typed data
pub fn bytes_to_elements<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = T::DATA_TYPE.size_in_bytes();
    if bytes.len() % size != 0 {
        return Err(ZarrError::Shape(format!(
            "byte length {} not aligned with {} element size {}",
            bytes.len(),
            T::DATA_TYPE,
            size
        )));
    }

    Ok(bytes.chunks_exact(size).map(T::read_le).collect())
}

/// Convert typed data to little-endian element bytes
pub fn elements_to_bytes<T: Element>(data: &[T]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * T::DATA_TYPE.size_in_bytes());
    for value in data {
        value.write_le(&mut bytes);
    }
    bytes
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Normalize a node path: `/`, `""` and `/a/b/` become `""`, `""` and `a/b`
pub fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Join a node path and a child name or key suffix
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Metadata key of the node at `path`
pub fn meta_key(path: &str) -> String {
    join_path(path, META_KEY)
}

/// Last component of a node path (empty for the root)
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

/// Parent of a node path; `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    if path.is_empty() {
        None
    } else {
        Some(path.rsplit_once('/').map_or("", |(parent, _)| parent))
    }
}

/// Validate a store key: non-empty, relative, and without `.`/`..`/empty components
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ZarrError::InvalidKey("empty key".to_string()));
    }
    validate_prefix(key)
}

/// Validate a list prefix; the empty prefix addresses the store root
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    if prefix.contains('\\') {
        return Err(ZarrError::InvalidKey(format!("{prefix}: backslash in key")));
    }
    for component in prefix.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(ZarrError::InvalidKey(format!(
                "{prefix}: invalid component {component:?}"
            )));
        }
    }
    Ok(())
}

/// Validate the name of a child node
pub fn validate_node_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." || name == META_KEY {
        return Err(ZarrError::InvalidKey(format!("invalid node name {name:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_conversion() {
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let bytes = elements_to_bytes(&data);
        assert_eq!(bytes.len(), data.len() * 4);

        let recovered: Vec<f32> = bytes_to_elements(&bytes).unwrap();
        assert_eq!(data, recovered);

        assert!(bytes_to_elements::<u32>(&bytes[..3]).is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_paths() {
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("/foo/bar/"), "foo/bar");
        assert_eq!(meta_key(""), "zarr.json");
        assert_eq!(meta_key("foo"), "foo/zarr.json");
        assert_eq!(node_name("foo/spam"), "spam");
        assert_eq!(node_name(""), "");
        assert_eq!(parent_path("foo/spam"), Some("foo"));
        assert_eq!(parent_path("foo"), Some(""));
        assert_eq!(parent_path(""), None);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("foo/c/0/0").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("foo/../bar").is_err());
        assert!(validate_key("foo//bar").is_err());
        assert!(validate_prefix("").is_ok());
        assert!(validate_node_name("zarr.json").is_err());
        assert!(validate_node_name("a/b").is_err());
    }
}
