use crate::config::Compression;
use crate::error::{Error, Result};
use brig_core::{ImageHash, ImageManifest};
use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha512};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

pub(crate) const MANIFEST_ENTRY: &str = "manifest";
pub(crate) const ROOTFS_ENTRY: &str = "rootfs";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompresses an archive into its canonical byte stream. The content
/// hash is always computed over this stream, so re-compressing with a
/// different codec does not change an image's identity.
pub(crate) fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() >= 2 && data[..2] == GZIP_MAGIC {
        let mut decompressed = Vec::new();
        GzDecoder::new(Cursor::new(data)).read_to_end(&mut decompressed)?;
        Ok(decompressed)
    } else {
        Ok(data.to_vec())
    }
}

pub(crate) fn content_hash(canonical: &[u8]) -> ImageHash {
    let digest = Sha512::digest(canonical);
    ImageHash::from_digest_hex(&hex::encode(digest)).expect("sha512 digest is a valid hash")
}

/// Extracts and parses the `manifest` entry of a decompressed archive.
pub(crate) fn read_manifest(canonical: &[u8]) -> Result<ImageManifest> {
    let mut archive = Archive::new(Cursor::new(canonical));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == Path::new(MANIFEST_ENTRY) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            return Ok(serde_json::from_slice(&bytes)?);
        }
    }
    Err(Error::UsageError("archive has no manifest entry".to_string()))
}

/// Unpacks the `rootfs/` entries of a decompressed archive under
/// `dest`. Other entries (the manifest, signatures someone tarred in)
/// are left alone.
pub(crate) fn unpack_rootfs(canonical: &[u8], dest: &Path) -> Result<()> {
    let mut archive = Archive::new(Cursor::new(canonical));
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if path.starts_with(ROOTFS_ENTRY) {
            entry.unpack_in(dest)?;
        }
    }
    Ok(())
}

/// Builds the canonical tar stream of an image: the manifest entry
/// followed by rootfs content. With a packing list only the named paths
/// are archived (directories non-recursively), producing an incremental
/// archive; without one the whole rootfs is walked in sorted order.
pub(crate) fn build_tar(
    image_dir: &Path,
    manifest_bytes: &[u8],
    packlist: Option<&[String]>,
) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let mut header = Header::new_gnu();
    header.set_size(manifest_bytes.len() as u64);
    header.set_mode(0o444);
    header.set_mtime(0);
    builder.append_data(&mut header, MANIFEST_ENTRY, manifest_bytes)?;

    match packlist {
        Some(paths) => {
            for rel in paths {
                builder.append_path_with_name(image_dir.join(rel), rel)?;
            }
        }
        None => {
            let rootfs = image_dir.join(ROOTFS_ENTRY);
            for rel in walk_sorted(&rootfs)? {
                let name = Path::new(ROOTFS_ENTRY).join(&rel);
                builder.append_path_with_name(rootfs.join(&rel), name)?;
            }
        }
    }

    Ok(builder.into_inner()?)
}

/// Writes an archive to disk with the configured codec.
pub(crate) fn write_archive_file(
    canonical: &[u8],
    out: &Path,
    compression: Compression,
) -> Result<()> {
    match compression {
        Compression::None => std::fs::write(out, canonical)?,
        Compression::Gzip => {
            let file = std::fs::File::create(out)?;
            let mut encoder = GzEncoder::new(file, GzLevel::default());
            encoder.write_all(canonical)?;
            encoder.finish()?;
        }
    }
    Ok(())
}

/// Relative paths of everything under `root`, depth-first, each
/// directory before its children, siblings in name order.
pub(crate) fn walk_sorted(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk_into(root, Path::new(""), &mut out)?;
    Ok(out)
}

fn walk_into(dir: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let child_rel = rel.join(entry.file_name());
        out.push(child_rel.clone());
        // Don't descend into symlinked directories.
        if entry.file_type()?.is_dir() {
            walk_into(&entry.path(), &child_rel, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use brig_core::Name;
    use tempfile::TempDir;

    fn sample_image_dir() -> (TempDir, Vec<u8>) {
        let dir = TempDir::new().unwrap();
        let rootfs = dir.path().join(ROOTFS_ENTRY);
        std::fs::create_dir_all(rootfs.join("etc")).unwrap();
        std::fs::create_dir_all(rootfs.join("usr/local/bin")).unwrap();
        std::fs::write(rootfs.join("etc/rc.conf"), "daemon_enable=YES\n").unwrap();
        std::fs::write(rootfs.join("usr/local/bin/app"), "#!/bin/sh\n").unwrap();
        std::os::unix::fs::symlink("app", rootfs.join("usr/local/bin/app-link")).unwrap();

        let manifest = ImageManifest::new(Name::parse("example.com/sample").unwrap());
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
        (dir, manifest_bytes)
    }

    #[test]
    fn test_flat_round_trip() {
        let (dir, manifest_bytes) = sample_image_dir();
        let tar = build_tar(dir.path(), &manifest_bytes, None).unwrap();

        let manifest = read_manifest(&tar).unwrap();
        assert_eq!(manifest.name.as_str(), "example.com/sample");

        let dest = TempDir::new().unwrap();
        unpack_rootfs(&tar, dest.path()).unwrap();
        let unpacked =
            std::fs::read_to_string(dest.path().join("rootfs/etc/rc.conf")).unwrap();
        assert_eq!(unpacked, "daemon_enable=YES\n");
        let link = dest.path().join("rootfs/usr/local/bin/app-link");
        assert!(std::fs::symlink_metadata(link).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_hash_is_codec_independent() {
        let (dir, manifest_bytes) = sample_image_dir();
        let tar = build_tar(dir.path(), &manifest_bytes, None).unwrap();

        let plain_hash = content_hash(&decompress(&tar).unwrap());

        let out = dir.path().join("archive.tgz");
        write_archive_file(&tar, &out, Compression::Gzip).unwrap();
        let compressed = std::fs::read(&out).unwrap();
        assert_ne!(compressed, tar);
        let gz_hash = content_hash(&decompress(&compressed).unwrap());

        assert_eq!(plain_hash, gz_hash);
    }

    #[test]
    fn test_packlist_limits_entries() {
        let (dir, manifest_bytes) = sample_image_dir();
        let packlist = vec![
            "rootfs/etc".to_string(),
            "rootfs/etc/rc.conf".to_string(),
        ];
        let tar = build_tar(dir.path(), &manifest_bytes, Some(&packlist)).unwrap();

        let mut archive = Archive::new(Cursor::new(&tar));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["manifest", "rootfs/etc", "rootfs/etc/rc.conf"]);
    }

    #[test]
    fn test_walk_sorted_is_stable() {
        let (dir, _) = sample_image_dir();
        let walk = walk_sorted(&dir.path().join(ROOTFS_ENTRY)).unwrap();
        let again = walk_sorted(&dir.path().join(ROOTFS_ENTRY)).unwrap();
        assert_eq!(walk, again);
        assert!(walk.contains(&PathBuf::from("etc/rc.conf")));
        // Parents come before children.
        let etc = walk.iter().position(|p| p == Path::new("etc")).unwrap();
        let rc = walk.iter().position(|p| p == Path::new("etc/rc.conf")).unwrap();
        assert!(etc < rc);
    }

    #[test]
    fn test_missing_manifest() {
        let mut builder = Builder::new(Vec::new());
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("stray"), "x").unwrap();
        builder
            .append_path_with_name(dir.path().join("stray"), "stray")
            .unwrap();
        let tar = builder.into_inner().unwrap();
        assert!(matches!(read_manifest(&tar), Err(Error::UsageError(_))));
    }
}
