//! Tar packing and unpacking for container transfers.
//!
//! Archives travel as bounded chunk streams. Packing and unpacking run on the
//! blocking pool, so neither side ever holds a whole tree in memory.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use dockhand_shared::errors::{DockhandError, DockhandResult, TransferDirection};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, trace};

use super::chunk::{spawn_packer, sync_reader};
use crate::backend::ArchiveStream;

/// Where unpacked entries land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Entries keep their names and land under this directory. This is how
    /// a container extracts an uploaded archive.
    Into(PathBuf),
    /// The archive's root entry becomes this path; everything below it is
    /// re-rooted accordingly.
    As(PathBuf),
}

impl Placement {
    /// Directory no entry may escape.
    fn root(&self) -> &Path {
        match self {
            Placement::Into(dir) => dir,
            Placement::As(dest) => dest,
        }
    }
}

/// First entry of a downloaded archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SingleEntry {
    File(Vec<u8>),
    Directory,
    Symlink(PathBuf),
    Other(String),
    /// The archive had no entries.
    Empty,
}

/// Stream `source` as a tar archive whose root entry is named `name`.
///
/// Directories are archived recursively. Symlinks are stored as links and
/// never followed.
pub fn pack_path(source: PathBuf, name: String, direction: TransferDirection) -> ArchiveStream {
    spawn_packer(direction, move |writer| {
        let mut builder = Builder::new(writer);
        builder.follow_symlinks(false);

        let metadata = fs::symlink_metadata(&source)?;
        if metadata.is_dir() {
            builder.append_dir_all(&name, &source)?;
        } else {
            builder.append_path_with_name(&source, &name)?;
        }
        debug!(source = %source.display(), name = %name, "Packed archive");
        builder.into_inner()?.flush()
    })
}

/// Build a one-entry archive holding `content` as `name`.
pub fn pack_file_bytes(name: &str, content: &[u8], mode: u32) -> DockhandResult<Vec<u8>> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(mtime);

    let mut builder = Builder::new(Vec::with_capacity(content.len() + 2048));
    builder
        .append_data(&mut header, name, content)
        .map_err(DockhandError::upload)?;
    builder.into_inner().map_err(DockhandError::upload)
}

/// Unpack an archive stream onto the host filesystem.
///
/// Returns the number of entries written.
pub async fn unpack(
    stream: ArchiveStream,
    placement: Placement,
    direction: TransferDirection,
) -> DockhandResult<u64> {
    let reader = sync_reader(stream);
    tokio::task::spawn_blocking(move || unpack_entries(reader, &placement))
        .await
        .map_err(|e| DockhandError::transfer(direction, e))?
        .map_err(|e| DockhandError::transfer(direction, e))
}

/// Read the first entry of an archive stream into memory.
pub async fn read_single_entry(stream: ArchiveStream) -> DockhandResult<SingleEntry> {
    let reader = sync_reader(stream);
    tokio::task::spawn_blocking(move || first_entry(reader))
        .await
        .map_err(DockhandError::download)?
        .map_err(DockhandError::download)
}

fn unpack_entries<R: Read>(reader: R, placement: &Placement) -> io::Result<u64> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut count = 0u64;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();
        let Some(target) = place(&raw_path, placement)? else {
            trace!(path = %raw_path.display(), "Skipping archive root entry");
            continue;
        };

        ensure_inside(placement.root(), &target)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry_type = entry.header().entry_type();
        remove_existing_if_needed(&target, entry_type)?;

        if entry_type == EntryType::Link {
            // Hard link names are archive paths and need the same mapping.
            let link_name = entry
                .link_name()?
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "hard link without target"))?
                .into_owned();
            let Some(source) = place(&link_name, placement)? else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("hard link {} points at the archive root", raw_path.display()),
                ));
            };
            ensure_inside(placement.root(), &source)?;
            fs::hard_link(source, &target)?;
        } else {
            entry.unpack(&target)?;
        }
        trace!(path = %target.display(), ?entry_type, "Unpacked entry");
        count += 1;
    }
    Ok(count)
}

/// Map an archive path to its host location. `None` for entries that map
/// onto the destination directory itself.
fn place(raw_path: &Path, placement: &Placement) -> io::Result<Option<PathBuf>> {
    let relative = normalize_entry_path(raw_path)?;
    match placement {
        Placement::Into(dir) => {
            if relative.as_os_str().is_empty() {
                Ok(None)
            } else {
                Ok(Some(dir.join(relative)))
            }
        }
        Placement::As(dest) => {
            let mut components = relative.components();
            if components.next().is_none() {
                return Ok(None);
            }
            let rest = components.as_path();
            if rest.as_os_str().is_empty() {
                Ok(Some(dest.clone()))
            } else {
                Ok(Some(dest.join(rest)))
            }
        }
    }
}

/// Fail if an existing ancestor of `target` below `root` is a symlink. An
/// earlier entry of the same archive could otherwise redirect later entries
/// outside `root`.
fn ensure_inside(root: &Path, target: &Path) -> io::Result<()> {
    let relative = target.strip_prefix(root).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is outside {}", target.display(), root.display()),
        )
    })?;
    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        // The final component gets replaced, never traversed.
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "archive entry {} passes through symlink {}",
                        target.display(),
                        current.display()
                    ),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn normalize_entry_path(path: &Path) -> io::Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("archive entry {} escapes the destination", path.display()),
                ));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    Ok(normalized)
}

fn remove_existing_if_needed(path: &Path, entry_type: EntryType) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            if entry_type != EntryType::Directory {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a directory", path.display()),
                ));
            }
            Ok(())
        }
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn first_entry<R: Read>(reader: R) -> io::Result<SingleEntry> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        if matches!(entry_type, EntryType::XGlobalHeader | EntryType::XHeader) {
            continue;
        }
        return Ok(match entry_type {
            t if t.is_file() => {
                let size = entry.header().size().unwrap_or(0);
                let mut data = Vec::with_capacity(size as usize);
                entry.read_to_end(&mut data)?;
                SingleEntry::File(data)
            }
            EntryType::Directory => SingleEntry::Directory,
            EntryType::Symlink => SingleEntry::Symlink(
                entry
                    .link_name()?
                    .map(|target| target.into_owned())
                    .unwrap_or_default(),
            ),
            other => SingleEntry::Other(format!("{:?}", other)),
        });
    }
    Ok(SingleEntry::Empty)
}
