//! Layer tarball helpers: gzip wrapping, decoding, and merging a layer stack
//! into a single filesystem tarball.
//!
//! Whiteout semantics follow the OCI image spec:
//! - `.wh.<name>` removes `<name>` (and anything below it) from lower layers.
//! - `.wh..wh..opq` clears everything lower layers put in its directory.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::digest::Digest;
use super::image::Layer;
use super::model::{DOCKER_LAYER_GZIP, OCI_LAYER_GZIP, OCI_LAYER_TAR, OCI_LAYER_ZSTD};
use crate::error::SynthError;
use crate::types::Result;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const DOCKER_LAYER_TAR: &str = "application/vnd.docker.image.rootfs.diff.tar";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn is_gzip(media_type: &str) -> bool {
    media_type == OCI_LAYER_GZIP || media_type == DOCKER_LAYER_GZIP || media_type.ends_with("+gzip")
}

pub fn gzip(tar: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(tar.len() / 2), Compression::default());
    encoder.write_all(tar)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| {
        SynthError::InvalidInput(format!("layer is not valid gzip: {e}"))
    })?;
    Ok(out)
}

/// Gzip a tarball into an OCI layer, recording its diff id.
pub fn layer_from_tar(tar: &[u8]) -> Result<Layer> {
    let diff_id = Digest::sha256(tar);
    let compressed = gzip(tar)?;
    Ok(Layer::new(OCI_LAYER_GZIP, compressed, Some(diff_id)))
}

/// Wrap an already gzipped tarball, decoding it once to learn its diff id.
pub fn layer_from_gzip(compressed: Vec<u8>) -> Result<Layer> {
    let diff_id = Digest::sha256(&gunzip(&compressed)?);
    Ok(Layer::new(OCI_LAYER_GZIP, compressed, Some(diff_id)))
}

/// The uncompressed tar stream of a layer.
pub fn uncompressed(layer: &Layer) -> Result<Vec<u8>> {
    let media_type = layer.media_type();
    if media_type == OCI_LAYER_ZSTD || media_type.ends_with("+zstd") {
        return Err(SynthError::UnsupportedMediaType(media_type.to_string()));
    }
    let data = layer.compressed();
    if is_gzip(media_type) || data.starts_with(&GZIP_MAGIC) {
        return gunzip(data);
    }
    if media_type == OCI_LAYER_TAR || media_type == DOCKER_LAYER_TAR {
        return Ok(data.to_vec());
    }
    Err(SynthError::UnsupportedMediaType(media_type.to_string()))
}

/// A tarball holding one regular file, with fixed ownership and mtime so the
/// same contents always produce the same bytes.
pub fn single_file_tar(name: &str, contents: &[u8]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::with_capacity(contents.len() + 1024));
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(contents.len() as u64);
    builder.append_data(&mut header, name, contents)?;
    Ok(builder.into_inner()?)
}

struct MergedEntry {
    header: tar::Header,
    link: Option<PathBuf>,
    data: Vec<u8>,
    layer: usize,
}

/// Merge a layer stack, lowest first, into one uncompressed tarball.
pub fn flatten(layers: &[Layer]) -> Result<Vec<u8>> {
    let mut merged: BTreeMap<String, MergedEntry> = BTreeMap::new();

    for (index, layer) in layers.iter().enumerate() {
        let tar = uncompressed(layer)?;
        let mut archive = tar::Archive::new(tar.as_slice());
        for entry in archive.entries()? {
            let mut entry = entry?;
            let Some(path) = normalize_path(&entry.path()?) else {
                continue;
            };
            let (parent, name) = split_parent(&path);

            if name == OPAQUE_WHITEOUT {
                remove_lower(&mut merged, parent, index, false);
                continue;
            }
            if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
                let target = if parent.is_empty() {
                    target.to_string()
                } else {
                    format!("{parent}/{target}")
                };
                remove_lower(&mut merged, &target, index, true);
                continue;
            }

            let header = entry.header().clone();
            let entry_type = header.entry_type();
            if !entry_type.is_dir() {
                // A non-directory replaces a lower directory and its contents.
                remove_lower(&mut merged, &path, index, false);
            }
            let link = entry.link_name()?.map(|link| link.into_owned());
            let mut data = Vec::new();
            if entry_type.is_file() {
                entry.read_to_end(&mut data)?;
            }
            merged.insert(
                path,
                MergedEntry {
                    header,
                    link,
                    data,
                    layer: index,
                },
            );
        }
    }

    let mut builder = tar::Builder::new(Vec::new());
    for (path, entry) in merged {
        let mut header = entry.header;
        match entry.link {
            Some(target) => builder.append_link(&mut header, &path, &target)?,
            None => {
                header.set_size(entry.data.len() as u64);
                builder.append_data(&mut header, &path, entry.data.as_slice())?;
            }
        }
    }
    Ok(builder.into_inner()?)
}

fn normalize_path(path: &Path) -> Option<String> {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

fn remove_lower(
    merged: &mut BTreeMap<String, MergedEntry>,
    root: &str,
    layer: usize,
    include_root: bool,
) {
    merged.retain(|path, entry| {
        if entry.layer >= layer {
            return true;
        }
        let is_root = path == root;
        let is_below = root.is_empty()
            || path
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'));
        !((include_root && is_root) || is_below)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Item<'a> {
        Dir(&'a str),
        File(&'a str, &'a [u8]),
        Symlink(&'a str, &'a str),
    }

    fn tarball(items: &[Item<'_>]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for item in items {
            let mut header = tar::Header::new_gnu();
            header.set_mode(0o755);
            header.set_mtime(0);
            match item {
                Item::Dir(path) => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    builder.append_data(&mut header, path, &[][..]).unwrap();
                }
                Item::File(path, contents) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(contents.len() as u64);
                    builder.append_data(&mut header, path, *contents).unwrap();
                }
                Item::Symlink(path, target) => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    builder.append_link(&mut header, path, target).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    fn contents(tar: &[u8]) -> BTreeMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(tar);
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            out.insert(path, data);
        }
        out
    }

    fn layer(items: &[Item<'_>]) -> Layer {
        layer_from_tar(&tarball(items)).unwrap()
    }

    #[test]
    fn gzip_layers_record_diff_ids() {
        let tar = tarball(&[Item::File("hello.txt", b"hi")]);
        let layer = layer_from_tar(&tar).unwrap();
        assert_eq!(layer.diff_id(), Some(&Digest::sha256(&tar)));
        assert_eq!(layer.digest(), &Digest::sha256(layer.compressed()));
        assert_eq!(uncompressed(&layer).unwrap(), tar);

        let rewrapped = layer_from_gzip(layer.compressed().to_vec()).unwrap();
        assert_eq!(rewrapped.diff_id(), layer.diff_id());
        assert_eq!(rewrapped.digest(), layer.digest());
    }

    #[test]
    fn zstd_layers_are_unsupported() {
        let layer = Layer::new(OCI_LAYER_ZSTD, b"zstd".to_vec(), None);
        assert!(matches!(
            uncompressed(&layer),
            Err(SynthError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn flatten_later_layers_win() {
        let lower = layer(&[
            Item::Dir("etc"),
            Item::File("etc/motd", b"old"),
            Item::File("a", b"a"),
        ]);
        let upper = layer(&[Item::File("etc/motd", b"new")]);

        let merged = contents(&flatten(&[lower, upper]).unwrap());
        assert_eq!(merged["etc/motd"], b"new");
        assert_eq!(merged["a"], b"a");
        assert!(merged.contains_key("etc"));
    }

    #[test]
    fn flatten_applies_whiteouts() {
        let lower = layer(&[
            Item::Dir("var"),
            Item::Dir("var/cache"),
            Item::File("var/cache/one", b"1"),
            Item::File("var/keep", b"k"),
            Item::File("gone", b"x"),
        ]);
        let upper = layer(&[Item::File(".wh.gone", b""), Item::File("var/.wh.cache", b"")]);

        let merged = contents(&flatten(&[lower, upper]).unwrap());
        assert!(!merged.contains_key("gone"));
        assert!(!merged.contains_key("var/cache"));
        assert!(!merged.contains_key("var/cache/one"));
        assert!(merged.contains_key("var/keep"));
        assert!(!merged.keys().any(|k| k.contains(".wh.")));
    }

    #[test]
    fn flatten_applies_opaque_directories() {
        let lower = layer(&[
            Item::Dir("data"),
            Item::File("data/old", b"o"),
            Item::File("other", b"x"),
        ]);
        let upper = layer(&[
            Item::Dir("data"),
            Item::File("data/.wh..wh..opq", b""),
            Item::File("data/new", b"n"),
        ]);

        let merged = contents(&flatten(&[lower, upper]).unwrap());
        assert!(!merged.contains_key("data/old"));
        assert_eq!(merged["data/new"], b"n");
        assert!(merged.contains_key("data"));
        assert!(merged.contains_key("other"));
    }

    #[test]
    fn flatten_keeps_symlinks() {
        let lower = layer(&[Item::File("bin/busybox", b"elf"), Item::Symlink("bin/sh", "busybox")]);
        let tar = flatten(&[lower]).unwrap();

        let mut archive = tar::Archive::new(tar.as_slice());
        let link = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().to_string_lossy() == "bin/sh")
            .unwrap();
        assert_eq!(link.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(
            link.link_name().unwrap().unwrap().to_string_lossy(),
            "busybox"
        );
    }

    #[test]
    fn single_file_tar_is_reproducible() {
        let a = single_file_tar("random_file", b"payload").unwrap();
        let b = single_file_tar("random_file", b"payload").unwrap();
        assert_eq!(a, b);
        assert_eq!(contents(&a)["random_file"], b"payload");
    }
}
