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

use std::{
    io::{self, Read as _, Write as _},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Parser, Subcommand};

use ghostfs_err::{Error, Result};
use ghostfs_fs::{format, try_mount_lsb, Volume};
use ghostfs_sampler::Cover;
use ghostfs_steg::Stegger;
use ghostfs_steg_lsb::LsbStegger;
use ghostfs_steg_passwd::PasswdStegger;

/// Hidden filesystems inside lossless cover media.
#[derive(Parser)]
#[command(name = "ghost", version)]
struct Cli {
    /// Cover file (.bmp or .wav)
    cover: PathBuf,

    /// Password-scheduled bit placement instead of plain LSB
    #[arg(long)]
    password: Option<String>,

    /// LSB width; mount probes 1 through 8 when neither this nor a
    /// password is given
    #[arg(long, conflicts_with = "password")]
    lsb: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialise an empty volume on the cover
    Format,
    /// Print cluster usage
    Info,
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create an empty file
    Create { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file
    Rm { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Grow or shrink a file
    Truncate { path: String, size: i64 },
    /// Copy a file's contents to stdout
    Read { path: String },
    /// Replace a file's contents with stdin
    Write { path: String },
    /// Move an entry
    Rename { from: String, to: String },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ghost: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli {
        cover,
        password,
        lsb,
        command,
    } = cli;
    let cover = Cover::open(&cover)?;

    if matches!(command, Command::Format) {
        return match (password, lsb) {
            (Some(password), _) => format_on(PasswdStegger::new(cover, &password)),
            (None, lsb) => format_on(LsbStegger::new(cover, lsb.unwrap_or(1))?),
        };
    }

    match (password, lsb) {
        (Some(password), _) => {
            let volume =
                Volume::mount(PasswdStegger::new(cover, &password)).map_err(Error::from)?;
            drive(volume, command)
        }
        (None, Some(lsb)) => {
            let volume = Volume::mount(LsbStegger::new(cover, lsb)?).map_err(Error::from)?;
            drive(volume, command)
        }
        (None, None) => drive(try_mount_lsb(cover)?, command),
    }
}

fn format_on<S: Stegger>(mut stegger: S) -> Result<()> {
    format(&mut stegger)?;
    stegger.flush()
}

fn drive<S: Stegger>(mut volume: Volume<S>, command: Command) -> Result<()> {
    match command {
        Command::Format => unreachable!("format never mounts"),
        Command::Info => {
            let stats = volume.stats()?;
            println!(
                "{} clusters, {} free ({} bytes usable)",
                stats.clusters,
                stats.free_clusters,
                stats.free_clusters as u64 * 4092
            );
        }
        Command::Ls { path } => {
            for entry in volume.read_dir(&path)? {
                let kind = if entry.is_dir { 'd' } else { '-' };
                println!("{kind} {:>10} {}", entry.size, entry.name);
            }
        }
        Command::Create { path } => volume.create(&path)?,
        Command::Mkdir { path } => volume.mkdir(&path)?,
        Command::Rm { path } => volume.unlink(&path)?,
        Command::Rmdir { path } => volume.rmdir(&path)?,
        Command::Truncate { path, size } => volume.truncate(&path, size)?,
        Command::Read { path } => {
            let handle = volume.open(&path)?;
            let size = volume.metadata(&path)?.size;
            let mut buffer = vec![0; size as usize];
            volume.read(&handle, 0, &mut buffer)?;
            io::stdout().write_all(&buffer)?;
        }
        Command::Write { path } => {
            let mut buffer = Vec::new();
            io::stdin().read_to_end(&mut buffer)?;
            if volume.metadata(&path).is_err() {
                volume.create(&path)?;
            }
            volume.truncate(&path, buffer.len() as i64)?;
            let handle = volume.open(&path)?;
            volume.write(&handle, 0, &buffer)?;
        }
        Command::Rename { from, to } => volume.rename(&from, &to)?,
    }
    volume.unmount()?;
    Ok(())
}
