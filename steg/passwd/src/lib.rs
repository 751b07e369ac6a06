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

use log::error;

use ghostfs_err::{Error, MediaError, Result};
use ghostfs_sampler::Sampler;
use ghostfs_steg::Stegger;
use md5::{Digest, Md5};

/// Stegger hiding one user bit per sample, at a bit position chosen by a
/// password-derived schedule.
///
/// MD5 of the password, split into 32 nibbles and reduced mod 4, yields a
/// base position within the sample's 4 low bits for every
/// (byte-in-group, bit-in-byte) pair; the position then rotates through
/// those 4 bits every 4 samples. The password never encrypts the payload,
/// it only decides where each bit hides.
pub struct PasswdStegger<S: Sampler> {
    schedule: [u8; 32],
    sampler: S,
    capacity: u64,
}

impl<S: Sampler> PasswdStegger<S> {
    pub fn new(sampler: S, password: &str) -> Self {
        let digest = Md5::digest(password.as_bytes());
        let mut schedule = [0u8; 32];
        for (nibble, slot) in schedule.iter_mut().enumerate() {
            *slot = if nibble % 2 == 0 {
                digest[nibble / 2] & 0xF
            } else {
                digest[nibble / 2] >> 4
            } % 4;
        }
        let capacity = sampler.count() / 8;
        Self {
            schedule,
            sampler,
            capacity,
        }
    }

    /// Hands the sampler back, e.g. to retry with another password.
    pub fn into_inner(self) -> S {
        self.sampler
    }

    /// Bit position within sample `nr` that hides user bit `bit` of the
    /// byte the sample group belongs to.
    fn target_bit(&self, nr: u64, bit: usize) -> u32 {
        let add = nr / 4;
        let group = (nr % 4) as usize;
        ((self.schedule[group * 8 + bit] as u64 + add) % 4) as u32
    }

    fn check_range(&self, first: u64, len: usize) -> Result<()> {
        if first + len as u64 * 8 >= self.sampler.count() {
            error!(
                "Password range: {len} bytes at sample {first} shall stay within {} samples",
                self.sampler.count()
            );
            return Err(Error::Media(MediaError::Range));
        }
        Ok(())
    }
}

impl<S: Sampler> Stegger for PasswdStegger<S> {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let mut nr = offset * 8;
        self.check_range(nr, buffer.len())?;

        for slot in buffer.iter_mut() {
            let mut byte = 0u8;
            for bit in 0..8 {
                let sample = self.sampler.read(nr);
                if sample & (1 << self.target_bit(nr, bit)) != 0 {
                    byte |= 1 << bit;
                }
                nr += 1;
            }
            *slot = byte;
        }
        Ok(())
    }

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()> {
        let mut nr = offset * 8;
        self.check_range(nr, buffer.len())?;

        for &byte in buffer {
            for bit in 0..8 {
                let mut sample = self.sampler.read(nr);
                let target = self.target_bit(nr, bit);
                if byte & (1 << bit) != 0 {
                    sample |= 1 << target;
                } else {
                    sample &= !(1 << target);
                }
                self.sampler.write(nr, sample);
                nr += 1;
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.sampler.flush()
    }
}
