use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::error::StorageError;

/// Read a JSON document, treating a missing file as the type's default.
pub fn load_json_or_default<T>(path: &Path) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).map_err(|e| StorageError::json(path, e))
}

/// Write the whole document, replacing the previous file in one rename.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let body = serde_json::to_string_pretty(value).map_err(|e| StorageError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| StorageError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let value: Vec<String> = load_json_or_default(&temp_dir.path().join("nope.json")).unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn test_save_creates_parent_and_leaves_no_tmp() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.json");
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1);

        save_json(&path, &value).unwrap();

        let back: BTreeMap<String, i32> = load_json_or_default(&path).unwrap();
        assert_eq!(back, value);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_invalid_json_is_reported_with_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        let err = load_json_or_default::<Vec<String>>(&path).unwrap_err();
        assert!(matches!(err, StorageError::Json { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
