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

use std::io::Write as _;

use ghostfs_fs::{format, try_mount_lsb, Error, FsError, Volume};
use ghostfs_sampler::{Cover, MemSampler, Sampler};
use ghostfs_steg::Stegger;
use ghostfs_steg_lsb::LsbStegger;
use ghostfs_steg_passwd::PasswdStegger;

const CLUSTER_SIZE: u64 = 4096;
const CLUSTER_DATA_SIZE: usize = 4092;

fn lsb_volume(count: usize) -> Volume<LsbStegger<MemSampler>> {
    let mut stegger = LsbStegger::new(MemSampler::new(count, 8), 8).unwrap();
    format(&mut stegger).unwrap();
    Volume::mount(stegger).map_err(Error::from).unwrap()
}

fn passwd_volume(password: &str) -> Volume<PasswdStegger<MemSampler>> {
    let mut stegger = PasswdStegger::new(MemSampler::new(200_000, 16), password);
    format(&mut stegger).unwrap();
    Volume::mount(stegger).map_err(Error::from).unwrap()
}

#[test]
fn format_reports_the_cluster_count() {
    let mut volume = lsb_volume(100_000);
    // capacity 100_000 bytes, 18 of them superblock
    assert_eq!(volume.cluster_count() as u64, (100_000 - 18) / CLUSTER_SIZE);
    assert_eq!(volume.cluster_count(), 24);

    let stats = volume.stats().unwrap();
    assert_eq!(stats.clusters, 24);
    assert_eq!(stats.free_clusters, 23);
    assert!(volume.read_dir("/").unwrap().is_empty());
}

#[test]
fn every_lsb_width_formats_and_mounts() {
    for bits in 1..=8 {
        let mut stegger = LsbStegger::new(MemSampler::new(120_000, 8), bits).unwrap();
        let capacity = stegger.capacity();
        format(&mut stegger).unwrap();
        let volume = Volume::mount(stegger).map_err(Error::from).unwrap();
        assert_eq!(
            volume.cluster_count() as u64,
            ((capacity - 18) / CLUSTER_SIZE).min(0xFFFF),
            "width {bits}"
        );
    }
}

#[test]
fn small_file_lifecycle() {
    let mut volume = lsb_volume(100_000);
    volume.create("/a").unwrap();

    let handle = volume.open("/a").unwrap();
    assert_eq!(volume.write(&handle, 0, b"Hello World!").unwrap(), 12);
    let mut readback = [0u8; 12];
    assert_eq!(volume.read(&handle, 0, &mut readback).unwrap(), 12);
    assert_eq!(&readback, b"Hello World!");

    volume.unlink("/a").unwrap();
    assert!(matches!(
        volume.open("/a"),
        Err(Error::Fs(FsError::NotFound))
    ));
}

#[test]
fn directory_chain_overflows_into_a_second_cluster() {
    let mut volume = lsb_volume(100_000);
    let free_before = volume.stats().unwrap().free_clusters;

    let names: Vec<String> = (0..=66).map(|nr| format!("f{nr:02}")).collect();
    for name in &names {
        volume.create(&format!("/{name}")).unwrap();
    }

    // 66 entries fill the root cluster; the 67th forces an extension
    assert_eq!(volume.stats().unwrap().free_clusters, free_before - 1);
    let mut listed: Vec<String> = volume
        .read_dir("/")
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    listed.sort();
    assert_eq!(listed, names);

    for name in &names {
        volume.unlink(&format!("/{name}")).unwrap();
    }
    assert!(volume.read_dir("/").unwrap().is_empty());
}

#[test]
fn nested_directories_must_be_empty_to_remove() {
    let mut volume = lsb_volume(100_000);
    volume.mkdir("/x").unwrap();
    volume.mkdir("/x/y").unwrap();

    assert!(matches!(
        volume.rmdir("/x"),
        Err(Error::Fs(FsError::NotEmpty))
    ));
    volume.rmdir("/x/y").unwrap();
    volume.rmdir("/x").unwrap();
    assert!(volume.read_dir("/").unwrap().is_empty());
}

#[test]
fn password_volume_round_trips_across_remounts() {
    let payload: Vec<u8> = (0..=255).collect();

    let mut volume = passwd_volume("secret");
    volume.create("/p").unwrap();
    let handle = volume.open("/p").unwrap();
    volume.write(&handle, 0, &payload).unwrap();
    let sampler = volume.unmount().unwrap().into_inner();

    let mut volume = Volume::mount(PasswdStegger::new(sampler, "secret"))
        .map_err(Error::from)
        .unwrap();
    let handle = volume.open("/p").unwrap();
    let mut readback = vec![0u8; payload.len()];
    volume.read(&handle, 0, &mut readback).unwrap();
    assert_eq!(readback, payload);
    let sampler = volume.unmount().unwrap().into_inner();

    let failed = Volume::mount(PasswdStegger::new(sampler, "wrong")).err().unwrap();
    assert!(matches!(failed.error, Error::Fs(FsError::WrongMedium)));
}

#[test]
fn truncate_grows_and_shrinks_cluster_chains() {
    let mut volume = lsb_volume(100_000);
    let free_initial = volume.stats().unwrap().free_clusters;
    volume.create("/t").unwrap();

    volume.truncate("/t", 4093).unwrap();
    assert_eq!(volume.stats().unwrap().free_clusters, free_initial - 2);

    let handle = volume.open("/t").unwrap();
    volume.write(&handle, 0, b"A").unwrap();
    volume.write(&handle, 4092, b"B").unwrap();

    volume.truncate("/t", 10).unwrap();
    assert_eq!(volume.stats().unwrap().free_clusters, free_initial - 1);
    assert_eq!(volume.metadata("/t").unwrap().size, 10);

    let mut readback = [0u8; 10];
    volume.read(&handle, 0, &mut readback).unwrap();
    assert_eq!(readback[0], b'A');
    assert!(matches!(
        volume.read(&handle, 0, &mut [0u8; 11]),
        Err(Error::Fs(FsError::Invalid))
    ));

    volume.truncate("/t", 0).unwrap();
    assert_eq!(volume.stats().unwrap().free_clusters, free_initial);
}

#[test]
fn removal_returns_every_allocated_cluster() {
    let mut volume = lsb_volume(100_000);
    let free_initial = volume.stats().unwrap().free_clusters;

    volume.create("/f").unwrap();
    let handle = volume.open("/f").unwrap();
    volume.write(&handle, 0, &vec![7u8; 3 * CLUSTER_DATA_SIZE]).unwrap();
    volume.mkdir("/d").unwrap();
    volume.mkdir("/d/e").unwrap();

    volume.unlink("/f").unwrap();
    volume.rmdir("/d/e").unwrap();
    volume.rmdir("/d").unwrap();
    assert_eq!(volume.stats().unwrap().free_clusters, free_initial);
}

#[test]
fn unlink_of_a_never_written_file_leaves_the_root_alone() {
    let mut volume = lsb_volume(100_000);
    volume.create("/keep").unwrap();
    let free_before = volume.stats().unwrap().free_clusters;

    volume.create("/empty").unwrap();
    volume.unlink("/empty").unwrap();

    assert_eq!(volume.stats().unwrap().free_clusters, free_before);
    // the root directory must still resolve entries
    assert!(volume.open("/keep").is_ok());
}

#[test]
fn duplicate_names_are_rejected() {
    let mut volume = lsb_volume(100_000);
    volume.create("/a").unwrap();
    assert!(matches!(
        volume.create("/a"),
        Err(Error::Fs(FsError::Exists))
    ));
    assert!(matches!(
        volume.mkdir("/a"),
        Err(Error::Fs(FsError::Exists))
    ));
    volume.mkdir("/d").unwrap();
    assert!(matches!(
        volume.create("/d"),
        Err(Error::Fs(FsError::Exists))
    ));
}

#[test]
fn name_and_path_limits() {
    let mut volume = lsb_volume(100_000);
    let long = format!("/{}", "x".repeat(56));
    assert!(matches!(
        volume.create(&long),
        Err(Error::Fs(FsError::NameTooLong))
    ));
    let max = format!("/{}", "x".repeat(55));
    volume.create(&max).unwrap();

    assert!(matches!(
        volume.create("relative"),
        Err(Error::Fs(FsError::Invalid))
    ));
}

#[test]
fn lookup_distinguishes_files_and_directories() {
    let mut volume = lsb_volume(100_000);
    volume.create("/f").unwrap();
    volume.mkdir("/d").unwrap();

    assert!(matches!(
        volume.create("/f/x"),
        Err(Error::Fs(FsError::NotADirectory))
    ));
    assert!(matches!(
        volume.metadata("/f/x"),
        Err(Error::Fs(FsError::NotADirectory))
    ));
    assert!(matches!(
        volume.unlink("/d"),
        Err(Error::Fs(FsError::IsADirectory))
    ));
    assert!(matches!(
        volume.rmdir("/f"),
        Err(Error::Fs(FsError::NotADirectory))
    ));
    assert!(matches!(
        volume.open("/d"),
        Err(Error::Fs(FsError::IsADirectory))
    ));
    assert!(matches!(
        volume.unlink("/missing"),
        Err(Error::Fs(FsError::NotFound))
    ));

    let meta = volume.metadata("/d").unwrap();
    assert!(meta.is_dir);
    assert_eq!(meta.size, 0);
    assert!(volume.metadata("/").unwrap().is_dir);
}

#[test]
fn truncate_rejects_bad_sizes_and_directories() {
    let mut volume = lsb_volume(100_000);
    volume.create("/f").unwrap();
    volume.mkdir("/d").unwrap();

    assert!(matches!(
        volume.truncate("/f", -1),
        Err(Error::Fs(FsError::Invalid))
    ));
    assert!(matches!(
        volume.truncate("/f", 0x8000_0000),
        Err(Error::Fs(FsError::TooLarge))
    ));
    assert!(matches!(
        volume.truncate("/d", 10),
        Err(Error::Fs(FsError::IsADirectory))
    ));
}

#[test]
fn exhausted_volume_rolls_allocations_back() {
    // capacity 8300 bytes leaves two clusters: the root and one free
    let mut stegger = LsbStegger::new(MemSampler::new(8300, 8), 8).unwrap();
    format(&mut stegger).unwrap();
    let mut volume = Volume::mount(stegger).map_err(Error::from).unwrap();
    assert_eq!(volume.cluster_count(), 2);

    volume.create("/t").unwrap();
    assert!(matches!(
        volume.truncate("/t", 4093),
        Err(Error::Fs(FsError::NoSpace))
    ));
    assert_eq!(volume.stats().unwrap().free_clusters, 1);
    assert_eq!(volume.metadata("/t").unwrap().size, 0);

    volume.truncate("/t", 4092).unwrap();
    assert_eq!(volume.stats().unwrap().free_clusters, 0);
    assert!(matches!(
        volume.mkdir("/d"),
        Err(Error::Fs(FsError::NoSpace))
    ));
}

#[test]
fn rename_moves_entries_between_directories() {
    let mut volume = lsb_volume(100_000);
    volume.mkdir("/src").unwrap();
    volume.mkdir("/dst").unwrap();
    volume.create("/src/f").unwrap();
    let handle = volume.open("/src/f").unwrap();
    volume.write(&handle, 0, b"payload").unwrap();

    volume.rename("/src/f", "/dst/g").unwrap();
    assert!(matches!(
        volume.open("/src/f"),
        Err(Error::Fs(FsError::NotFound))
    ));
    let handle = volume.open("/dst/g").unwrap();
    let mut readback = [0u8; 7];
    volume.read(&handle, 0, &mut readback).unwrap();
    assert_eq!(&readback, b"payload");

    volume.create("/dst/h").unwrap();
    assert!(matches!(
        volume.rename("/dst/g", "/dst/h"),
        Err(Error::Fs(FsError::Exists))
    ));
    assert!(matches!(
        volume.rename("/dst", "/dst/inner"),
        Err(Error::Fs(FsError::Invalid))
    ));
    volume.rename("/dst", "/moved").unwrap();
    assert!(volume.open("/moved/g").is_ok());
}

#[test]
fn mutations_survive_a_remount() {
    let mut volume = lsb_volume(100_000);
    volume.mkdir("/d").unwrap();
    volume.create("/d/f").unwrap();
    let handle = volume.open("/d/f").unwrap();
    let payload: Vec<u8> = (0..200u32).flat_map(|nr| nr.to_le_bytes()).collect();
    volume.write(&handle, 0, &payload).unwrap();
    let stegger = volume.unmount().unwrap();

    let mut volume = Volume::mount(stegger).map_err(Error::from).unwrap();
    let handle = volume.open("/d/f").unwrap();
    let mut readback = vec![0u8; payload.len()];
    volume.read(&handle, 0, &mut readback).unwrap();
    assert_eq!(readback, payload);
}

#[test]
fn mount_rejects_a_foreign_width() {
    let mut stegger = LsbStegger::new(MemSampler::new(100_000, 8), 1).unwrap();
    format(&mut stegger).unwrap();
    let sampler = stegger.into_inner();

    let stegger = LsbStegger::new(sampler, 2).unwrap();
    let failed = Volume::mount(stegger).err().unwrap();
    assert!(matches!(failed.error, Error::Fs(FsError::WrongMedium)));

    // the stegger travels back; the right width still mounts
    let sampler = failed.stegger.into_inner();
    let stegger = LsbStegger::new(sampler, 1).unwrap();
    assert!(Volume::mount(stegger).is_ok());
}

#[test]
fn unformatted_medium_fails_every_probe() {
    assert!(matches!(
        try_mount_lsb(MemSampler::new(100_000, 8)),
        Err(Error::Fs(FsError::WrongMedium))
    ));
}

#[test]
fn reserved_cluster_byte_stays_zero_on_the_medium() {
    let mut volume = lsb_volume(100_000);
    volume.create("/f").unwrap();
    let handle = volume.open("/f").unwrap();
    volume.write(&handle, 0, &vec![3u8; 2 * CLUSTER_DATA_SIZE]).unwrap();
    let stegger = volume.unmount().unwrap();

    for nr in 0..(100_000 - 18) / CLUSTER_SIZE {
        let mut reserved = [0u8; 1];
        stegger.read(18 + nr * CLUSTER_SIZE + CLUSTER_SIZE - 1, &mut reserved).unwrap();
        assert_eq!(reserved[0], 0, "cluster {nr}");
    }
}

#[test]
fn wav_cover_lifecycle_with_width_probing() {
    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF\0\0\0\0WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&44100u32.to_le_bytes());
    wav.extend_from_slice(&88200u32.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&150_000u32.to_le_bytes());
    wav.resize(wav.len() + 150_000, 0);

    let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    file.write_all(&wav).unwrap();
    file.flush().unwrap();

    // format with width 3: capacity = 75_000 * 3 / 8 = 28_125
    let cover = Cover::open(file.path()).unwrap();
    assert_eq!(cover.count(), 75_000);
    let mut stegger = LsbStegger::new(cover, 3).unwrap();
    format(&mut stegger).unwrap();
    stegger.flush().unwrap();
    drop(stegger);

    let cover = Cover::open(file.path()).unwrap();
    let mut volume = try_mount_lsb(cover).unwrap();
    assert_eq!(volume.cluster_count() as u64, (28_125 - 18) / CLUSTER_SIZE);

    volume.create("/song").unwrap();
    let handle = volume.open("/song").unwrap();
    volume.write(&handle, 0, b"hidden in plain hearing").unwrap();
    volume.unmount().unwrap().into_inner().flush().unwrap();

    let cover = Cover::open(file.path()).unwrap();
    let mut volume = try_mount_lsb(cover).unwrap();
    let handle = volume.open("/song").unwrap();
    let mut readback = [0u8; 23];
    volume.read(&handle, 0, &mut readback).unwrap();
    assert_eq!(&readback, b"hidden in plain hearing");
}

#[test]
fn write_extends_files_across_cluster_boundaries() {
    let mut volume = lsb_volume(100_000);
    volume.create("/big").unwrap();
    let handle = volume.open("/big").unwrap();

    let payload: Vec<u8> = (0..2 * CLUSTER_DATA_SIZE + 100).map(|nr| nr as u8).collect();
    assert_eq!(volume.write(&handle, 0, &payload).unwrap(), payload.len());
    assert_eq!(volume.metadata("/big").unwrap().size as usize, payload.len());

    let mut readback = vec![0u8; payload.len()];
    volume.read(&handle, 0, &mut readback).unwrap();
    assert_eq!(readback, payload);

    // sparse growth: the gap below the new offset keeps its old bytes
    volume.write(&handle, payload.len() as u64 + 50, b"tail").unwrap();
    assert_eq!(
        volume.metadata("/big").unwrap().size as usize,
        payload.len() + 54
    );
    let mut tail = [0u8; 4];
    volume.read(&handle, payload.len() as u64 + 50, &mut tail).unwrap();
    assert_eq!(&tail, b"tail");
}
