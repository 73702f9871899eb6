use std::path::Path;

use crate::UploadError;

/// Lowercases the configured extensions and gives each a leading dot.
pub fn normalize_extensions<S: AsRef<str>>(extensions: &[S]) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| ext.as_ref().trim().to_lowercase())
        .filter(|ext| !ext.is_empty() && ext != ".")
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}

/// Checks the file name against the (normalized) extension allow-list.
///
/// Comparison is case-insensitive; only the last extension counts.
pub fn check_extension(file_name: &str, allowed: &[String]) -> Result<(), UploadError> {
    let lower = file_name.to_lowercase();
    let extension = Path::new(&lower)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"));

    match extension {
        Some(ext) if allowed.contains(&ext) => Ok(()),
        _ => Err(UploadError::BadRequest("Not allowed file extension".into())),
    }
}

/// Checks the raw form values and converts them to engine indices.
pub fn check_chunk_position(index: i64, total_count: i64) -> Result<(u32, u32), UploadError> {
    if index >= total_count || index < 0 || total_count < 1 {
        return Err(UploadError::BadRequest("index out of range".into()));
    }
    let total_count = u32::try_from(total_count)
        .map_err(|_| UploadError::BadRequest("totalCount too large".into()))?;
    // index < total_count here, so it fits as well.
    let index = u32::try_from(index)
        .map_err(|_| UploadError::BadRequest("index out of range".into()))?;
    Ok((index, total_count))
}
