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

//! On-medium layout.
//!
//! The volume occupies the stegger's byte space from offset 0:
//!
//! | Offset      | Length | Content                             |
//! |-------------|--------|-------------------------------------|
//! | 0           | 16     | MD5 over header ‖ cluster 0         |
//! | 16          | 2      | header: cluster count, little endian|
//! | 18          | 4096   | cluster 0, the root directory       |
//! | 18 + n·4096 | 4096   | cluster n                           |
//!
//! Everything is little endian and packed; the structs below are
//! reinterpreted in place and therefore must match byte for byte.

use zerocopy::{
    little_endian::{U16, U32},
    transmute_mut, transmute_ref, FromBytes, Immutable, IntoBytes, KnownLayout,
};

/// Bytes per cluster on the stegger, header included.
pub(crate) const CLUSTER_SIZE: usize = 4096;
/// Payload bytes per cluster.
pub(crate) const CLUSTER_DATA_SIZE: usize = CLUSTER_SIZE - 4;
/// MD5 digest prefixing the volume; it covers the header and cluster 0.
pub(crate) const DIGEST_SIZE: usize = 16;
/// Volume header following the digest: the cluster count as `u16`.
pub(crate) const HEADER_SIZE: usize = 2;
/// Stegger offset of cluster 0, the root directory.
pub(crate) const CLUSTER0_OFFSET: u64 = (DIGEST_SIZE + HEADER_SIZE) as u64;
/// Directory entries held by one cluster (66 · 62 = 4092).
pub(crate) const ENTRIES_PER_CLUSTER: usize = 66;
/// Longest filename, terminating NUL excluded.
pub(crate) const NAME_MAX: usize = 55;
pub(crate) const FILENAME_SIZE: usize = 56;
/// High bit of `DirEntry::size` marks a directory.
pub(crate) const DIR_FLAG: u32 = 0x8000_0000;

/// One cluster as stored on the stegger.
///
/// Clusters serve both file data and directory entries; which one is
/// decided solely by the entry that references the chain. Chains are
/// singly linked through `next` and terminated by 0. Cluster 0 holds the
/// root directory and is never a chain member.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct Cluster {
    pub data: [u8; CLUSTER_DATA_SIZE],
    /// Next cluster of the chain. 0 terminates; since cluster 0 is the
    /// root directory it can never be a successor.
    pub next: U16,
    /// Non-zero while the cluster belongs to a chain. Allocation scans
    /// for the first zero.
    pub used: u8,
    /// Reserved on the medium and always written as zero; in memory the
    /// cache repurposes it as the dirty flag.
    pub dirty: u8,
}

impl Cluster {
    pub fn entries(&self) -> &[DirEntry; ENTRIES_PER_CLUSTER] {
        transmute_ref!(&self.data)
    }

    pub fn entries_mut(&mut self) -> &mut [DirEntry; ENTRIES_PER_CLUSTER] {
        transmute_mut!(&mut self.data)
    }
}

/// A 62-byte directory entry; 66 of them fill a cluster's payload.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct DirEntry {
    /// NUL-terminated name, at most 55 name bytes. A leading NUL marks
    /// the slot unused; removal only writes that byte. Names are unique
    /// within a directory and compared byte for byte.
    pub filename: [u8; FILENAME_SIZE],
    /// Low 31 bits: file size in bytes, 0 for directories. High bit:
    /// entry is a directory.
    pub size: U32,
    /// First cluster of the file's data chain or of the directory's
    /// entry chain. 0 for a file that has never been written; a
    /// directory always owns at least one cluster.
    pub cluster: U16,
}

impl DirEntry {
    pub fn is_used(&self) -> bool {
        self.filename[0] != 0
    }

    pub fn is_dir(&self) -> bool {
        self.size.get() & DIR_FLAG != 0
    }

    pub fn file_size(&self) -> u32 {
        self.size.get() & !DIR_FLAG
    }

    /// Filename bytes up to the terminating NUL.
    pub fn name(&self) -> &[u8] {
        let len = self
            .filename
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(FILENAME_SIZE);
        &self.filename[..len]
    }

    pub fn set_name(&mut self, name: &[u8]) {
        debug_assert!(name.len() <= NAME_MAX);
        self.filename.fill(0);
        self.filename[..name.len()].copy_from_slice(name);
    }
}
