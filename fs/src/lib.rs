// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

use log::{debug, error};
use md5::{Digest, Md5};
use zerocopy::{FromZeros, IntoBytes};

pub use ghostfs_err::*;
use ghostfs_sampler::Sampler;
use ghostfs_steg::Stegger;
use ghostfs_steg_lsb::LsbStegger;

mod layout;

use layout::{
    Cluster, DirEntry, CLUSTER0_OFFSET, CLUSTER_DATA_SIZE, CLUSTER_SIZE, DIGEST_SIZE, DIR_FLAG,
    ENTRIES_PER_CLUSTER, HEADER_SIZE, NAME_MAX,
};

/// Stegger offset of cluster `nr`.
fn cluster_offset(nr: u16) -> u64 {
    CLUSTER0_OFFSET + nr as u64 * CLUSTER_SIZE as u64
}

/// Clusters needed to hold `size` bytes of file data.
fn clusters_for(size: u64) -> u64 {
    size.div_ceil(CLUSTER_DATA_SIZE as u64)
}

/// Last path component, validated against the name limits.
fn filename_of(path: &str) -> Result<&[u8]> {
    let name = path
        .rsplit('/')
        .find(|component| !component.is_empty())
        .unwrap_or("");
    if name.is_empty() || name.as_bytes().contains(&0) {
        return Err(Error::Fs(FsError::Invalid));
    }
    if name.len() > NAME_MAX {
        error!("Name {name:?} shall be at most {NAME_MAX} bytes");
        return Err(Error::Fs(FsError::NameTooLong));
    }
    Ok(name.as_bytes())
}

/// Position of a directory entry on the volume.
#[derive(Clone, Copy, PartialEq, Eq)]
struct EntryPos {
    cluster: u16,
    index: usize,
}

/// A resolved path: the entry and, unless it is the root, its position.
///
/// The root is synthetic; it behaves like a directory entry with the
/// directory flag set and cluster 0, but is never stored on the medium.
struct Located {
    pos: Option<EntryPos>,
    entry: DirEntry,
}

/// An open file. The handle addresses the file's directory entry and stays
/// valid until that entry is unlinked; releasing it is just dropping it.
pub struct FileHandle {
    pos: EntryPos,
}

/// Directory iteration state for [`Volume::next_entry`].
pub struct Dir {
    cluster: u16,
    index: usize,
    done: bool,
}

/// A directory entry as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub size: u32,
    pub is_dir: bool,
}

/// Entry kind and size, as reported by [`Volume::metadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub size: u32,
    pub is_dir: bool,
}

/// Cluster usage counters, for statfs-style reporting.
#[derive(Debug, Clone, Copy)]
pub struct VolumeStats {
    pub clusters: u16,
    pub free_clusters: u16,
}

/// A failed mount, handing the stegger back so the caller can retry with
/// another configuration; `?` converts it into the plain [`Error`].
pub struct MountError<S> {
    pub stegger: S,
    pub error: Error,
}

impl<S> From<MountError<S>> for Error {
    fn from(error: MountError<S>) -> Self {
        error.error
    }
}

impl<S> fmt::Debug for MountError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountError")
            .field("error", &self.error)
            .finish()
    }
}

/// Initialises an empty volume on the stegger: every cluster zeroed, the
/// cluster count written behind the digest of header and root cluster.
pub fn format<S: Stegger>(stegger: &mut S) -> Result<()> {
    let avail = stegger
        .capacity()
        .saturating_sub((DIGEST_SIZE + HEADER_SIZE) as u64);
    let cluster_count = (avail / CLUSTER_SIZE as u64).min(u16::MAX as u64) as u16;
    if cluster_count == 0 {
        error!(
            "Cover capacity ({}) shall fit at least one cluster",
            stegger.capacity()
        );
        return Err(Error::Fs(FsError::NoSpace));
    }
    debug!("Formatting {cluster_count} clusters");

    let zeroed = [0u8; CLUSTER_SIZE];
    for nr in 0..cluster_count {
        stegger.write(cluster_offset(nr), &zeroed)?;
    }
    write_superblock(stegger, cluster_count, &zeroed)
}

/// Writes digest, header and cluster 0; the digest covers header ‖ cluster 0
/// and is what `mount` verifies.
fn write_superblock<S: Stegger>(
    stegger: &mut S,
    cluster_count: u16,
    cluster0: &[u8; CLUSTER_SIZE],
) -> Result<()> {
    let header = cluster_count.to_le_bytes();
    let mut md5 = Md5::new();
    md5.update(header);
    md5.update(cluster0);
    stegger.write(0, &md5.finalize())?;
    stegger.write(DIGEST_SIZE as u64, &header)?;
    stegger.write(CLUSTER0_OFFSET, cluster0)
}

/// Probes LSB widths 1 through 8 and mounts the first volume whose
/// superblock digest verifies. An unformatted or foreign medium fails
/// every width, as does a medium formatted with another width.
pub fn try_mount_lsb<C: Sampler>(mut cover: C) -> Result<Volume<LsbStegger<C>>> {
    let mut last = Error::Fs(FsError::WrongMedium);
    for bits in 1..=8 {
        let stegger = LsbStegger::new(cover, bits)?;
        match Volume::mount(stegger) {
            Ok(volume) => {
                debug!("Mounted with LSB width {bits}");
                return Ok(volume);
            }
            Err(failed) => {
                cover = failed.stegger.into_inner();
                last = failed.error;
            }
        }
    }
    error!("Tried to mount LSB widths 1..=8: failed");
    Err(last)
}

/// A mounted GhostFS volume.
///
/// Clusters are cached on first use and written back on [`Volume::sync`];
/// dropping the volume without [`Volume::unmount`] discards unwritten
/// mutations. One volume serves one caller; there is no internal locking.
pub struct Volume<S: Stegger> {
    stegger: S,
    cluster_count: u16,
    clusters: Vec<Option<Box<Cluster>>>,
    root: DirEntry,
}

impl<S: Stegger> Volume<S> {
    /// Mounts a volume after verifying the superblock digest.
    pub fn mount(stegger: S) -> core::result::Result<Self, MountError<S>> {
        match Self::read_superblock(&stegger) {
            Ok((cluster_count, cluster0)) => {
                let mut clusters: Vec<Option<Box<Cluster>>> =
                    (0..cluster_count).map(|_| None).collect();
                clusters[0] = Some(cluster0);

                let mut root = DirEntry::new_zeroed();
                root.size.set(DIR_FLAG);

                debug!("Mounted volume with {cluster_count} clusters");
                Ok(Self {
                    stegger,
                    cluster_count,
                    clusters,
                    root,
                })
            }
            Err(error) => Err(MountError { stegger, error }),
        }
    }

    fn read_superblock(stegger: &S) -> Result<(u16, Box<Cluster>)> {
        let mut digest = [0u8; DIGEST_SIZE];
        stegger.read(0, &mut digest)?;
        let mut header = [0u8; HEADER_SIZE];
        stegger.read(DIGEST_SIZE as u64, &mut header)?;
        let mut cluster0 = Box::new(Cluster::new_zeroed());
        stegger.read(CLUSTER0_OFFSET, cluster0.as_mut_bytes())?;

        let mut md5 = Md5::new();
        md5.update(header);
        md5.update(cluster0.as_bytes());
        if md5.finalize()[..] != digest[..] {
            debug!("Superblock digest mismatch");
            return Err(Error::Fs(FsError::WrongMedium));
        }

        let cluster_count = u16::from_le_bytes(header);
        if cluster_count == 0 {
            return Err(Error::Fs(FsError::WrongMedium));
        }
        cluster0.dirty = 0;
        Ok((cluster_count, cluster0))
    }

    /// Syncs and consumes the volume, returning the stegger.
    pub fn unmount(mut self) -> Result<S> {
        self.sync()?;
        self.stegger.flush()?;
        Ok(self.stegger)
    }

    /// Writes the superblock and every dirty cluster through to the
    /// stegger, ascending by cluster number.
    ///
    /// Cluster 0 goes first: an interrupted sync then leaves the digest
    /// inconsistent with the rest and the next mount detects it.
    pub fn sync(&mut self) -> Result<()> {
        let cluster0 = self.cluster_image(0)?;
        write_superblock(&mut self.stegger, self.cluster_count, &cluster0)?;
        if let Some(cluster) = self.clusters[0].as_deref_mut() {
            cluster.dirty = 0;
        }

        for nr in 1..self.cluster_count {
            match self.clusters[nr as usize].as_deref() {
                Some(cluster) if cluster.dirty != 0 => {}
                _ => continue,
            }
            let image = self.cluster_image(nr)?;
            self.stegger.write(cluster_offset(nr), &image)?;
            if let Some(cluster) = self.clusters[nr as usize].as_deref_mut() {
                cluster.dirty = 0;
            }
        }
        Ok(())
    }

    /// Number of clusters the volume was formatted with.
    pub fn cluster_count(&self) -> u16 {
        self.cluster_count
    }

    /// Cluster usage counters.
    pub fn stats(&mut self) -> Result<VolumeStats> {
        let mut free_clusters = 0;
        for nr in 1..self.cluster_count {
            if self.cluster_mut(nr)?.used == 0 {
                free_clusters += 1;
            }
        }
        Ok(VolumeStats {
            clusters: self.cluster_count,
            free_clusters,
        })
    }

    /// Creates an empty file.
    pub fn create(&mut self, path: &str) -> Result<()> {
        self.add_entry(path, false)
    }

    /// Creates a directory.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.add_entry(path, true)
    }

    /// Removes a file.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        self.remove_entry(path, false)
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.remove_entry(path, true)
    }

    /// Grows or shrinks a file to `new_size` bytes. Grown space is
    /// uninitialised, it reads as whatever the clusters last held.
    pub fn truncate(&mut self, path: &str, new_size: i64) -> Result<()> {
        if new_size < 0 {
            return Err(Error::Fs(FsError::Invalid));
        }
        if new_size > i32::MAX as i64 {
            return Err(Error::Fs(FsError::TooLarge));
        }
        let (pos, _) = self.file_at(path)?;
        self.truncate_at(pos, new_size as u32)
    }

    /// Opens a file for [`Volume::read`] and [`Volume::write`].
    pub fn open(&mut self, path: &str) -> Result<FileHandle> {
        let (pos, _) = self.file_at(path)?;
        Ok(FileHandle { pos })
    }

    /// Fills `buffer` from the file at `offset`; the range must lie inside
    /// the file. Returns the bytes read.
    pub fn read(&mut self, handle: &FileHandle, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let entry = self.entry_at(handle.pos)?;
        if offset + buffer.len() as u64 > entry.file_size() as u64 {
            return Err(Error::Fs(FsError::Invalid));
        }
        if buffer.is_empty() {
            return Ok(0);
        }

        let mut nr = self.chain_nth(entry.cluster.get(), offset / CLUSTER_DATA_SIZE as u64)?;
        let mut at = (offset % CLUSTER_DATA_SIZE as u64) as usize;
        let mut done = 0;
        while done < buffer.len() {
            let cluster = self.cluster_mut(nr)?;
            let step = (buffer.len() - done).min(CLUSTER_DATA_SIZE - at);
            buffer[done..done + step].copy_from_slice(&cluster.data[at..at + step]);
            done += step;
            at = 0;
            if done < buffer.len() {
                nr = cluster.next.get();
                if nr == 0 {
                    error!("Cluster chain ends inside the file");
                    return Err(Error::Fs(FsError::Corrupt));
                }
            }
        }
        Ok(done)
    }

    /// Writes `buffer` into the file at `offset`, growing it first when
    /// the range reaches past the current size. Returns the bytes written.
    pub fn write(&mut self, handle: &FileHandle, offset: u64, buffer: &[u8]) -> Result<usize> {
        let entry = self.entry_at(handle.pos)?;
        if entry.is_dir() {
            return Err(Error::Fs(FsError::IsADirectory));
        }
        let end = offset + buffer.len() as u64;
        if end > entry.file_size() as u64 {
            if end > i32::MAX as u64 {
                return Err(Error::Fs(FsError::TooLarge));
            }
            self.truncate_at(handle.pos, end as u32)?;
        }
        if buffer.is_empty() {
            return Ok(0);
        }

        let entry = self.entry_at(handle.pos)?;
        let mut nr = self.chain_nth(entry.cluster.get(), offset / CLUSTER_DATA_SIZE as u64)?;
        let mut at = (offset % CLUSTER_DATA_SIZE as u64) as usize;
        let mut done = 0;
        while done < buffer.len() {
            let cluster = self.cluster_mut(nr)?;
            let step = (buffer.len() - done).min(CLUSTER_DATA_SIZE - at);
            cluster.data[at..at + step].copy_from_slice(&buffer[done..done + step]);
            cluster.dirty = 1;
            done += step;
            at = 0;
            if done < buffer.len() {
                nr = cluster.next.get();
                if nr == 0 {
                    error!("Cluster chain ends inside the file");
                    return Err(Error::Fs(FsError::Corrupt));
                }
            }
        }
        Ok(done)
    }

    /// Opens a directory for [`Volume::next_entry`] iteration.
    pub fn open_dir(&mut self, path: &str) -> Result<Dir> {
        let found = self.lookup(path, false)?;
        if !found.entry.is_dir() {
            return Err(Error::Fs(FsError::NotADirectory));
        }
        Ok(Dir {
            cluster: found.entry.cluster.get(),
            index: 0,
            done: false,
        })
    }

    /// Next used entry of the directory, or `None` at the end of the chain.
    pub fn next_entry(&mut self, dir: &mut Dir) -> Result<Option<Entry>> {
        while !dir.done {
            let (entry, next) = {
                let cluster = self.cluster_mut(dir.cluster)?;
                (cluster.entries()[dir.index], cluster.next.get())
            };
            if dir.index + 1 < ENTRIES_PER_CLUSTER {
                dir.index += 1;
            } else if next != 0 {
                dir.cluster = next;
                dir.index = 0;
            } else {
                dir.done = true;
            }
            if entry.is_used() {
                return Ok(Some(Entry {
                    name: String::from_utf8_lossy(entry.name()).into_owned(),
                    size: entry.file_size(),
                    is_dir: entry.is_dir(),
                }));
            }
        }
        Ok(None)
    }

    /// Collects a directory's used entries.
    pub fn read_dir(&mut self, path: &str) -> Result<Vec<Entry>> {
        let mut dir = self.open_dir(path)?;
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry(&mut dir)? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Entry kind and size, the getattr backing.
    pub fn metadata(&mut self, path: &str) -> Result<Metadata> {
        let found = self.lookup(path, false)?;
        Ok(Metadata {
            size: found.entry.file_size(),
            is_dir: found.entry.is_dir(),
        })
    }

    /// Moves an entry, possibly across directories. The destination name
    /// must not exist yet.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let src = self.lookup(from, false)?;
        let Some(src_pos) = src.pos else {
            return Err(Error::Fs(FsError::Invalid));
        };
        // moving a directory below itself would orphan the whole subtree
        if src.entry.is_dir()
            && to
                .strip_prefix(from)
                .is_some_and(|rest| rest.starts_with('/'))
        {
            return Err(Error::Fs(FsError::Invalid));
        }

        let parent = self.lookup(to, true)?;
        if !parent.entry.is_dir() {
            return Err(Error::Fs(FsError::NotADirectory));
        }
        let name = filename_of(to)?;
        if self.find_entry(parent.entry.cluster.get(), name)?.is_some() {
            return Err(Error::Fs(FsError::Exists));
        }

        let (pos, _) = self.claim_slot(parent.entry.cluster.get())?;
        self.update_entry(pos, |entry| {
            entry.set_name(name);
            entry.size = src.entry.size;
            entry.cluster = src.entry.cluster;
        })?;
        self.update_entry(src_pos, |entry| entry.filename[0] = 0)
    }

    fn add_entry(&mut self, path: &str, dir: bool) -> Result<()> {
        let parent = self.lookup(path, true)?;
        if !parent.entry.is_dir() {
            return Err(Error::Fs(FsError::NotADirectory));
        }
        let name = filename_of(path)?;
        if self.find_entry(parent.entry.cluster.get(), name)?.is_some() {
            return Err(Error::Fs(FsError::Exists));
        }

        let (pos, extension) = self.claim_slot(parent.entry.cluster.get())?;
        let cluster = if dir {
            match self.alloc_clusters(1, true) {
                Ok(nr) => nr,
                Err(error) => {
                    self.release_slot(extension).ok();
                    return Err(error);
                }
            }
        } else {
            0
        };

        self.update_entry(pos, |entry| {
            entry.set_name(name);
            entry.size.set(if dir { DIR_FLAG } else { 0 });
            entry.cluster.set(cluster);
        })
    }

    fn remove_entry(&mut self, path: &str, dir: bool) -> Result<()> {
        let found = self.lookup(path, false)?;
        let Some(pos) = found.pos else {
            // the root has no entry to remove
            return Err(Error::Fs(FsError::Invalid));
        };
        if found.entry.is_dir() != dir {
            return Err(Error::Fs(if dir {
                FsError::NotADirectory
            } else {
                FsError::IsADirectory
            }));
        }
        if dir && self.dir_has_entries(found.entry.cluster.get())? {
            return Err(Error::Fs(FsError::NotEmpty));
        }
        // a never-written file has no chain; freeing cluster 0 would take
        // the root directory with it
        if found.entry.cluster.get() != 0 {
            self.free_chain(found.entry.cluster.get())?;
        }
        self.update_entry(pos, |entry| entry.filename[0] = 0)
    }

    fn truncate_at(&mut self, pos: EntryPos, new_size: u32) -> Result<()> {
        let entry = self.entry_at(pos)?;
        let old_clusters = clusters_for(entry.file_size() as u64);
        let new_clusters = clusters_for(new_size as u64);
        let head = entry.cluster.get();

        if new_clusters > old_clusters {
            let tail = if head != 0 {
                Some(self.chain_tail(head)?)
            } else {
                None
            };
            let fresh = self.alloc_clusters(new_clusters - old_clusters, false)?;
            match tail {
                Some(tail) => {
                    let cluster = self.cluster_mut(tail)?;
                    cluster.next.set(fresh);
                    cluster.dirty = 1;
                }
                None => self.update_entry(pos, |entry| entry.cluster.set(fresh))?,
            }
        } else if new_clusters < old_clusters {
            if new_clusters == 0 {
                self.free_chain(head)?;
                self.update_entry(pos, |entry| entry.cluster.set(0))?;
            } else {
                let keep = self.chain_nth(head, new_clusters - 1)?;
                let cluster = self.cluster_mut(keep)?;
                let rest = cluster.next.get();
                cluster.next.set(0);
                cluster.dirty = 1;
                self.free_chain(rest)?;
            }
        }

        self.update_entry(pos, |entry| entry.size.set(new_size))
    }

    /// Resolves an absolute path. With `skip_last` the trailing component
    /// is left to the caller and its parent is returned; every component
    /// before the last must name a directory.
    fn lookup(&mut self, path: &str, skip_last: bool) -> Result<Located> {
        let Some(rest) = path.strip_prefix('/') else {
            error!("Path {path:?} shall be absolute");
            return Err(Error::Fs(FsError::Invalid));
        };
        let mut components: Vec<&str> = rest
            .split('/')
            .filter(|component| !component.is_empty())
            .collect();
        if skip_last {
            components.pop();
        }

        let mut current = Located {
            pos: None,
            entry: self.root,
        };
        for component in components {
            if !current.entry.is_dir() {
                return Err(Error::Fs(FsError::NotADirectory));
            }
            let Some((pos, entry)) =
                self.find_entry(current.entry.cluster.get(), component.as_bytes())?
            else {
                return Err(Error::Fs(FsError::NotFound));
            };
            current = Located {
                pos: Some(pos),
                entry,
            };
        }
        Ok(current)
    }

    /// Resolves a path that must name a file.
    fn file_at(&mut self, path: &str) -> Result<(EntryPos, DirEntry)> {
        let found = self.lookup(path, false)?;
        match found.pos {
            Some(pos) if !found.entry.is_dir() => Ok((pos, found.entry)),
            _ => Err(Error::Fs(FsError::IsADirectory)),
        }
    }

    /// Scans a directory chain for a name.
    fn find_entry(&mut self, first: u16, name: &[u8]) -> Result<Option<(EntryPos, DirEntry)>> {
        let mut nr = first;
        loop {
            let cluster = self.cluster_mut(nr)?;
            for (index, entry) in cluster.entries().iter().enumerate() {
                if entry.is_used() && entry.name() == name {
                    return Ok(Some((EntryPos { cluster: nr, index }, *entry)));
                }
            }
            let next = cluster.next.get();
            if next == 0 {
                return Ok(None);
            }
            nr = next;
        }
    }

    fn dir_has_entries(&mut self, first: u16) -> Result<bool> {
        let mut nr = first;
        loop {
            let cluster = self.cluster_mut(nr)?;
            if cluster.entries().iter().any(DirEntry::is_used) {
                return Ok(true);
            }
            let next = cluster.next.get();
            if next == 0 {
                return Ok(false);
            }
            nr = next;
        }
    }

    /// Finds an unused entry slot in a directory chain, appending one
    /// zeroed cluster when every slot is taken. Returns the slot and, when
    /// the chain grew, `(tail, fresh)` for rollback.
    fn claim_slot(&mut self, first: u16) -> Result<(EntryPos, Option<(u16, u16)>)> {
        let mut nr = first;
        loop {
            let cluster = self.cluster_mut(nr)?;
            if let Some(index) = cluster.entries().iter().position(|entry| !entry.is_used()) {
                return Ok((EntryPos { cluster: nr, index }, None));
            }
            let next = cluster.next.get();
            if next == 0 {
                break;
            }
            nr = next;
        }

        let fresh = self.alloc_clusters(1, true)?;
        let tail = self.cluster_mut(nr)?;
        tail.next.set(fresh);
        tail.dirty = 1;
        debug!("Directory chain extended with cluster {fresh}");
        Ok((
            EntryPos {
                cluster: fresh,
                index: 0,
            },
            Some((nr, fresh)),
        ))
    }

    /// Undoes a [`Volume::claim_slot`] chain extension.
    fn release_slot(&mut self, extension: Option<(u16, u16)>) -> Result<()> {
        let Some((tail, fresh)) = extension else {
            return Ok(());
        };
        let cluster = self.cluster_mut(tail)?;
        cluster.next.set(0);
        cluster.dirty = 1;
        self.free_chain(fresh)
    }

    /// Allocates `n` free clusters as a chain and returns its head. An
    /// exhausted or failing scan rolls the partial chain back.
    fn alloc_clusters(&mut self, n: u64, zero: bool) -> Result<u16> {
        debug_assert!(n > 0);
        let mut first: u16 = 0;
        let mut prev: u16 = 0;
        let mut missing = n;
        for nr in 1..self.cluster_count {
            {
                let cluster = match self.cluster_mut(nr) {
                    Ok(cluster) => cluster,
                    Err(error) => {
                        self.free_chain(first).ok();
                        return Err(error);
                    }
                };
                if cluster.used != 0 {
                    continue;
                }
                if zero {
                    cluster.data.fill(0);
                }
                cluster.used = 1;
                cluster.next.set(0);
                cluster.dirty = 1;
            }
            if first == 0 {
                first = nr;
            } else {
                let prev_cluster = self.cluster_mut(prev)?;
                prev_cluster.next.set(nr);
                prev_cluster.dirty = 1;
            }
            prev = nr;
            missing -= 1;
            if missing == 0 {
                debug!("Allocated {n} clusters from {first}");
                return Ok(first);
            }
        }

        self.free_chain(first)?;
        error!("Volume full: {missing} of {n} clusters missing");
        Err(Error::Fs(FsError::NoSpace))
    }

    /// Returns every cluster of a chain to the free pool; `nr` may be 0
    /// for the empty chain.
    fn free_chain(&mut self, mut nr: u16) -> Result<()> {
        while nr != 0 {
            let cluster = self.cluster_mut(nr)?;
            cluster.used = 0;
            cluster.dirty = 1;
            nr = cluster.next.get();
        }
        Ok(())
    }

    /// Last cluster of a chain.
    fn chain_tail(&mut self, mut nr: u16) -> Result<u16> {
        loop {
            let next = self.cluster_mut(nr)?.next.get();
            if next == 0 {
                return Ok(nr);
            }
            nr = next;
        }
    }

    /// `hops`-th successor within a chain.
    fn chain_nth(&mut self, mut nr: u16, hops: u64) -> Result<u16> {
        for _ in 0..hops {
            nr = self.cluster_mut(nr)?.next.get();
            if nr == 0 {
                error!("Cluster chain ends early");
                return Err(Error::Fs(FsError::Corrupt));
            }
        }
        Ok(nr)
    }

    fn entry_at(&mut self, pos: EntryPos) -> Result<DirEntry> {
        Ok(self.cluster_mut(pos.cluster)?.entries()[pos.index])
    }

    fn update_entry(&mut self, pos: EntryPos, update: impl FnOnce(&mut DirEntry)) -> Result<()> {
        let cluster = self.cluster_mut(pos.cluster)?;
        update(&mut cluster.entries_mut()[pos.index]);
        cluster.dirty = 1;
        Ok(())
    }

    /// The cached cluster `nr`, loading it from the stegger on first use.
    fn cluster_mut(&mut self, nr: u16) -> Result<&mut Cluster> {
        if nr >= self.cluster_count {
            error!(
                "Cluster {nr} shall be below the cluster count ({})",
                self.cluster_count
            );
            return Err(Error::Fs(FsError::Range));
        }
        let slot = &mut self.clusters[nr as usize];
        if slot.is_none() {
            let mut cluster = Box::new(Cluster::new_zeroed());
            self.stegger.read(cluster_offset(nr), cluster.as_mut_bytes())?;
            cluster.dirty = 0;
            *slot = Some(cluster);
        }
        Ok(self.clusters[nr as usize].as_deref_mut().unwrap())
    }

    /// Copy of the cluster's on-disk image, the reserved byte zeroed so
    /// the in-memory dirty flag never reaches the medium.
    fn cluster_image(&mut self, nr: u16) -> Result<[u8; CLUSTER_SIZE]> {
        let cluster = self.cluster_mut(nr)?;
        let mut image = [0u8; CLUSTER_SIZE];
        image.copy_from_slice(cluster.as_bytes());
        image[CLUSTER_SIZE - 1] = 0;
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clusters_scale_with_payload_size() {
        assert_eq!(clusters_for(0), 0);
        assert_eq!(clusters_for(1), 1);
        assert_eq!(clusters_for(4092), 1);
        assert_eq!(clusters_for(4093), 2);
        assert_eq!(clusters_for(2 * 4092), 2);
    }

    #[test]
    fn cluster_offsets_follow_the_superblock() {
        assert_eq!(cluster_offset(0), 18);
        assert_eq!(cluster_offset(1), 18 + 4096);
        assert_eq!(cluster_offset(3), 18 + 3 * 4096);
    }

    #[test]
    fn filename_of_takes_the_last_component() {
        assert_eq!(filename_of("/a").unwrap(), b"a");
        assert_eq!(filename_of("/a/b/c").unwrap(), b"c");
        assert_eq!(filename_of("/a/b/").unwrap(), b"b");
    }

    #[test]
    fn filename_of_enforces_the_limits() {
        assert!(matches!(
            filename_of("/"),
            Err(Error::Fs(FsError::Invalid))
        ));
        let long = format!("/{}", "x".repeat(56));
        assert!(matches!(
            filename_of(&long),
            Err(Error::Fs(FsError::NameTooLong))
        ));
        let max = format!("/{}", "x".repeat(55));
        assert_eq!(filename_of(&max).unwrap().len(), 55);
        assert!(matches!(
            filename_of("/a\0b"),
            Err(Error::Fs(FsError::Invalid))
        ));
    }
}
