use std::{
    fs::File,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;

pub fn extract_tar_gz(archive_path: &Path, target_directory: &Path) -> Result<(), String> {
    log::info!(
        "[archive] extracting {} in {}",
        archive_path.display(),
        target_directory.display()
    );

    std::fs::create_dir_all(target_directory).map_err(|error| {
        format!(
            "Failed to create directory {}: {error}",
            target_directory.display()
        )
    })?;

    let file = File::open(archive_path)
        .map_err(|error| format!("Failed to open {}: {error}", archive_path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(target_directory)
        .map_err(|error| format!("tar.gz extraction failed: {error}"))
}

/// The single top-level directory of an extracted archive, or the extraction
/// directory itself when the archive has any other shape.
pub fn find_content_root(extract_directory: &Path) -> Result<PathBuf, String> {
    let items: Vec<PathBuf> = std::fs::read_dir(extract_directory)
        .map_err(|error| format!("Failed to read {}: {error}", extract_directory.display()))?
        .flatten()
        .map(|entry| entry.path())
        .collect();

    match items.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(extract_directory.to_path_buf()),
    }
}

fn copy_tree(source: &Path, destination: &Path) -> Result<(), String> {
    std::fs::create_dir_all(destination)
        .map_err(|error| format!("Failed to create {}: {error}", destination.display()))?;

    let entries = std::fs::read_dir(source)
        .map_err(|error| format!("Failed to read {}: {error}", source.display()))?;
    for entry in entries.flatten() {
        let from = entry.path();
        let to = destination.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|error| {
                format!("Failed to copy {} → {}: {error}", from.display(), to.display())
            })?;
        }
    }
    Ok(())
}

/// Copies every item of `source` into `destination`. Directories that
/// already exist at the destination are replaced, files are overwritten.
pub fn copy_directory_contents(source: &Path, destination: &Path) -> Result<usize, String> {
    let entries = std::fs::read_dir(source)
        .map_err(|error| format!("Failed to read {}: {error}", source.display()))?;

    let mut copied = 0;
    for entry in entries.flatten() {
        let from = entry.path();
        let to = destination.join(entry.file_name());

        if from.is_dir() {
            if to.exists() {
                std::fs::remove_dir_all(&to)
                    .map_err(|error| format!("Failed to replace {}: {error}", to.display()))?;
            }
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|error| {
                format!("Failed to copy {} → {}: {error}", from.display(), to.display())
            })?;
        }
        copied += 1;
    }
    Ok(copied)
}

pub fn find_binary_recursive(directory: &Path, binary_name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(directory).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file()
            && let Some(name) = path.file_name().and_then(|n| n.to_str())
            && name == binary_name
        {
            return Some(path);
        } else if path.is_dir()
            && let Some(found) = find_binary_recursive(&path, binary_name)
        {
            return Some(found);
        }
    }
    None
}

/// `<directory>/<binary_name>` when present, otherwise the first match found
/// by walking the tree.
pub fn locate_binary(directory: &Path, binary_name: &str) -> Option<PathBuf> {
    let direct = directory.join(binary_name);
    if direct.is_file() {
        return Some(direct);
    }
    find_binary_recursive(directory, binary_name)
}

pub fn make_executable(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|error| {
            format!(
                "Failed to set executable permission on {}: {error}",
                path.display()
            )
        })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_directory_is_the_content_root() {
        let directory = tempfile::tempdir().unwrap();
        std::fs::create_dir(directory.path().join("pkg")).unwrap();
        assert_eq!(
            find_content_root(directory.path()).unwrap(),
            directory.path().join("pkg")
        );

        std::fs::write(directory.path().join("README"), "x").unwrap();
        assert_eq!(
            find_content_root(directory.path()).unwrap(),
            directory.path()
        );
    }

    #[test]
    fn lone_file_is_not_a_content_root() {
        let directory = tempfile::tempdir().unwrap();
        std::fs::write(directory.path().join("adguardvpn-cli"), "x").unwrap();
        assert_eq!(
            find_content_root(directory.path()).unwrap(),
            directory.path()
        );
    }

    #[test]
    fn copy_replaces_existing_directories() {
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();

        std::fs::create_dir(source.path().join("lib")).unwrap();
        std::fs::write(source.path().join("lib").join("new.so"), "new").unwrap();
        std::fs::write(source.path().join("adguardvpn-cli"), "bin").unwrap();

        std::fs::create_dir(destination.path().join("lib")).unwrap();
        std::fs::write(destination.path().join("lib").join("stale.so"), "old").unwrap();

        assert_eq!(
            copy_directory_contents(source.path(), destination.path()).unwrap(),
            2
        );
        assert!(destination.path().join("lib").join("new.so").exists());
        assert!(!destination.path().join("lib").join("stale.so").exists());
        assert!(destination.path().join("adguardvpn-cli").is_file());
    }

    #[test]
    fn locates_nested_binary() {
        let directory = tempfile::tempdir().unwrap();
        let nested = directory.path().join("a").join("bin");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("adguardvpn-cli"), "bin").unwrap();

        assert_eq!(
            locate_binary(directory.path(), "adguardvpn-cli"),
            Some(nested.join("adguardvpn-cli"))
        );
        assert_eq!(locate_binary(directory.path(), "other"), None);
    }

    #[test]
    fn extracts_generated_archive() {
        let directory = tempfile::tempdir().unwrap();
        let archive = directory.path().join("release.tar.gz");
        std::fs::write(
            &archive,
            test_support::tar_gz(&[("pkg/adguardvpn-cli", "#!/bin/sh\n", 0o644)]),
        )
        .unwrap();

        let target = directory.path().join("out");
        extract_tar_gz(&archive, &target).unwrap();
        assert!(target.join("pkg").join("adguardvpn-cli").is_file());
    }
}
