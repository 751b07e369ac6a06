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

use std::{fs::OpenOptions, path::Path};

use log::error;
use memmap2::MmapMut;

use ghostfs_err::{Error, MediaError, Result};

mod bmp;
mod wav;

/// An indexed, mutable view of a cover medium's sample stream.
///
/// A sample is the smallest unit of the cover's payload: a PCM sample of a
/// WAV file, or one byte of a BMP pixel array. Samples are addressed
/// `0..count` and hold `bits` significant bits each.
pub trait Sampler {
    /// Number of samples in the stream.
    fn count(&self) -> u64;

    /// Sample width in bits, one of 8, 16 or 32.
    fn bits(&self) -> u32;

    fn read(&self, nr: u64) -> u32;

    fn write(&mut self, nr: u64, sample: u32);

    /// Pushes pending sample mutations to durable storage.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Geometry of the sample stream inside a parsed cover file.
pub(crate) struct Layout {
    /// Byte offset of the first sample.
    first: usize,
    count: u64,
    bits: u32,
}

/// A cover file mapped into memory, with the sample stream located by its
/// container header. Mutations land directly in the mapping and reach the
/// file when it is flushed or unmapped.
pub struct Cover {
    map: MmapMut,
    first: usize,
    count: u64,
    bits: u32,
}

impl Cover {
    /// Opens a cover file, dispatching on the filename suffix: `.bmp` and
    /// `.wav` are recognised.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("bmp") => Self::open_bmp(path),
            Some("wav") => Self::open_wav(path),
            _ => {
                error!("Unknown cover format: {}", path.display());
                Err(Error::Media(MediaError::UnknownFormat))
            }
        }
    }

    pub fn open_bmp<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_parser(path.as_ref(), bmp::parse)
    }

    pub fn open_wav<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_parser(path.as_ref(), wav::parse)
    }

    fn with_parser(path: &Path, parse: fn(&[u8]) -> Result<Layout>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        let layout = parse(&map)?;
        Ok(Self {
            map,
            first: layout.first,
            count: layout.count,
            bits: layout.bits,
        })
    }
}

impl Sampler for Cover {
    fn count(&self) -> u64 {
        self.count
    }

    fn bits(&self) -> u32 {
        self.bits
    }

    fn read(&self, nr: u64) -> u32 {
        let at = self.first + nr as usize * (self.bits / 8) as usize;
        match self.bits {
            8 => self.map[at] as u32,
            16 => u16::from_le_bytes(self.map[at..at + 2].try_into().unwrap()) as u32,
            32 => u32::from_le_bytes(self.map[at..at + 4].try_into().unwrap()),
            _ => unreachable!("sample width is validated on open"),
        }
    }

    fn write(&mut self, nr: u64, sample: u32) {
        let at = self.first + nr as usize * (self.bits / 8) as usize;
        match self.bits {
            8 => self.map[at] = sample as u8,
            16 => self.map[at..at + 2].copy_from_slice(&(sample as u16).to_le_bytes()),
            32 => self.map[at..at + 4].copy_from_slice(&sample.to_le_bytes()),
            _ => unreachable!("sample width is validated on open"),
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(self.map.flush()?)
    }
}

/// A `Vec`-backed sample store. Serves tests and purely in-memory volumes;
/// written samples are truncated to the sample width like a real medium.
pub struct MemSampler {
    samples: Vec<u32>,
    bits: u32,
}

impl MemSampler {
    pub fn new(count: usize, bits: u32) -> Self {
        assert!(matches!(bits, 8 | 16 | 32));
        Self {
            samples: vec![0; count],
            bits,
        }
    }
}

impl Sampler for MemSampler {
    fn count(&self) -> u64 {
        self.samples.len() as u64
    }

    fn bits(&self) -> u32 {
        self.bits
    }

    fn read(&self, nr: u64) -> u32 {
        self.samples[nr as usize]
    }

    fn write(&mut self, nr: u64, sample: u32) {
        let mask = match self.bits {
            32 => u32::MAX,
            bits => (1 << bits) - 1,
        };
        self.samples[nr as usize] = sample & mask;
    }
}

pub(crate) fn read_u16(map: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(map[at..at + 2].try_into().unwrap())
}

pub(crate) fn read_u32(map: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(map[at..at + 4].try_into().unwrap())
}
