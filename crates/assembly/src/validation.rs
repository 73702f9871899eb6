use std::path::{Component, Path};

use crate::AssemblyError;

/// Longest file name most filesystems accept, in bytes.
const MAX_FILE_NAME_LEN: usize = 255;

/// Bytes staging adds to a destination name: `.{u32 index}.{uuid}.part`.
const STAGING_SUFFIX_LEN: usize = 1 + 10 + 1 + 36 + 5;

/// Longest destination name, in bytes, whose staging entries still fit.
pub const MAX_DESTINATION_LEN: usize = MAX_FILE_NAME_LEN - STAGING_SUFFIX_LEN;

/// Validates that a destination name is a single plain file name.
///
/// The name is used verbatim to derive staging and artifact paths, so it
/// must not be able to address anything outside those roots.
///
/// Rejects:
/// - Empty names
/// - Path separators (`/`, `\`) and NUL bytes
/// - `.` and `..`
/// - Absolute paths and Windows prefix components (`C:`, `\\server`)
/// - Names longer than [`MAX_DESTINATION_LEN`] bytes
pub fn validate_destination_name(name: &str) -> Result<(), AssemblyError> {
    if name.is_empty() {
        return Err(AssemblyError::InvalidArgument(
            "destination name is empty".into(),
        ));
    }

    if name.len() > MAX_DESTINATION_LEN {
        return Err(AssemblyError::InvalidArgument(format!(
            "destination name is {} bytes, the limit is {MAX_DESTINATION_LEN}",
            name.len()
        )));
    }

    if name.contains(['/', '\\', '\0']) {
        return Err(AssemblyError::InvalidArgument(format!(
            "destination name must be a plain file name: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        (Some(Component::ParentDir | Component::CurDir), _) => {
            return Err(AssemblyError::InvalidArgument(format!(
                "directory references are not allowed: {name}"
            )));
        }
        (Some(Component::Prefix(_) | Component::RootDir), _) => {
            return Err(AssemblyError::InvalidArgument(format!(
                "absolute path not allowed: {name}"
            )));
        }
        _ => {
            return Err(AssemblyError::InvalidArgument(format!(
                "destination name must be a plain file name: {name}"
            )));
        }
    }

    Ok(())
}

/// Validates `index` against the declared chunk count of its session.
pub fn validate_chunk_position(index: u32, total_count: u32) -> Result<(), AssemblyError> {
    if total_count == 0 {
        return Err(AssemblyError::InvalidArgument(
            "total count must be at least 1".into(),
        ));
    }
    if index >= total_count {
        return Err(AssemblyError::InvalidArgument(format!(
            "index {index} out of range for {total_count} chunks"
        )));
    }
    Ok(())
}
