//! Block package archives
//!
//! Reading and writing the `.tar.gz` files blocks exchange.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tar::{Archive, Builder};
use walkdir::WalkDir;

use crate::error::ArchiveError;

/// Pack the contents of `src` into a gzip-compressed tarball at `dest`
///
/// Member names are relative to `src`. Top-level entries for which `skip`
/// returns true are left out along with everything below them.
pub fn pack_dir(src: &Path, dest: &Path, skip: impl Fn(&Path) -> bool) -> Result<(), ArchiveError> {
    let write_error = |error: String| ArchiveError::Write {
        path: dest.to_path_buf(),
        error,
    };

    let file = File::create(dest).map_err(|e| write_error(e.to_string()))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(entry.depth() == 1 && skip(entry.path())));

    for entry in walker {
        let entry = entry.map_err(|e| write_error(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| write_error(e.to_string()))?;

        if entry.file_type().is_dir() {
            builder
                .append_dir(relative, entry.path())
                .map_err(|e| write_error(e.to_string()))?;
        } else {
            builder
                .append_path_with_name(entry.path(), relative)
                .map_err(|e| write_error(e.to_string()))?;
        }
    }

    let encoder = builder.into_inner().map_err(|e| write_error(e.to_string()))?;
    encoder.finish().map_err(|e| write_error(e.to_string()))?;
    Ok(())
}

/// List member names of a tarball, normalized without `./` or trailing `/`
pub fn list_members(path: &Path) -> Result<Vec<String>, ArchiveError> {
    let read_error = |error: String| ArchiveError::Read {
        path: path.to_path_buf(),
        error,
    };

    let file = File::open(path).map_err(|e| read_error(e.to_string()))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut members = Vec::new();
    for entry in archive.entries().map_err(|e| read_error(e.to_string()))? {
        let entry = entry.map_err(|e| read_error(e.to_string()))?;
        let name = entry.path().map_err(|e| read_error(e.to_string()))?;
        let name = normalize_member(&name.to_string_lossy());
        if !name.is_empty() {
            members.push(name);
        }
    }
    Ok(members)
}

/// Unpack a tarball into `dest`, creating it if needed
pub fn unpack(path: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let unpack_error = |error: String| ArchiveError::Unpack {
        path: path.to_path_buf(),
        dest: dest.to_path_buf(),
        error,
    };

    std::fs::create_dir_all(dest).map_err(|e| unpack_error(e.to_string()))?;
    let file = File::open(path).map_err(|e| unpack_error(e.to_string()))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.unpack(dest).map_err(|e| unpack_error(e.to_string()))?;

    tracing::debug!("Unpacked '{}' to '{}'", path.display(), dest.display());
    Ok(())
}

fn normalize_member(name: &str) -> String {
    let mut name = name;
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    name.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_pack_list_unpack() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("out");
        write(&src.join("Image"), "kernel");
        write(&src.join("dtbs/board.dtb"), "dtb");
        write(&src.join("bp_kernel_old.tar.gz"), "stale package");

        let package = temp.path().join("pkg.tar.gz");
        pack_dir(&src, &package, |p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with("bp_kernel_"))
        })
        .unwrap();

        let members = list_members(&package).unwrap();
        assert_eq!(members, vec!["Image", "dtbs", "dtbs/board.dtb"]);

        let dest = temp.path().join("extracted");
        unpack(&package, &dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("dtbs/board.dtb")).unwrap(), "dtb");
        assert!(!dest.join("bp_kernel_old.tar.gz").exists());
    }

    #[test]
    fn test_normalize_member() {
        assert_eq!(normalize_member("./boot/Image"), "boot/Image");
        assert_eq!(normalize_member("boot/"), "boot");
        assert_eq!(normalize_member("./"), "");
    }

    #[test]
    fn test_list_members_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let bogus = temp.path().join("bogus.tar.gz");
        std::fs::write(&bogus, "not gzip").unwrap();
        assert!(matches!(list_members(&bogus), Err(ArchiveError::Read { .. })));
    }
}
