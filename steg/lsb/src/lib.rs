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

use ghostfs_err::{Error, FsError, MediaError, Result};
use ghostfs_sampler::Sampler;
use ghostfs_steg::Stegger;

/// Stegger packing user bytes into the `bits` lowest bits of consecutive
/// samples.
///
/// The low `bits` bits of every sample, LSB first and sample index
/// ascending, form one flat bit array; user byte `n` occupies bits
/// `n*8 .. n*8 + 8` of it, LSB first. Stego bit `b` therefore lives in
/// sample `b / bits` at bit position `b % bits`.
pub struct LsbStegger<S: Sampler> {
    sampler: S,
    bits: u32,
    capacity: u64,
}

impl<S: Sampler> LsbStegger<S> {
    /// `bits` must lie within `[1, sampler.bits]`.
    pub fn new(sampler: S, bits: u32) -> Result<Self> {
        if bits < 1 || bits > sampler.bits() {
            error!("LSB width {bits} shall be within [1, {}]", sampler.bits());
            return Err(Error::Fs(FsError::Invalid));
        }
        let capacity = sampler.count() * bits as u64 / 8;
        Ok(Self {
            sampler,
            bits,
            capacity,
        })
    }

    /// Hands the sampler back, e.g. to retry with another width.
    pub fn into_inner(self) -> S {
        self.sampler
    }

    /// The request must keep every touched sample below `count`; the head
    /// estimate rounds down, so the exact index of the last touched sample
    /// is checked as well.
    fn check_range(&self, first_bit: u64, len: usize) -> Result<()> {
        let bits = self.bits as u64;
        let span = len as u64 * 8;
        let head = first_bit / bits + span / bits;
        let last = (first_bit + span - 1) / bits;
        if head >= self.sampler.count() || last >= self.sampler.count() {
            error!(
                "LSB range: {len} bytes at bit {first_bit} shall stay within {} samples",
                self.sampler.count()
            );
            return Err(Error::Media(MediaError::Range));
        }
        Ok(())
    }
}

impl<S: Sampler> Stegger for LsbStegger<S> {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let bits = self.bits;
        let first_bit = offset * 8;
        self.check_range(first_bit, buffer.len())?;

        let mut nr = first_bit / bits as u64;
        let mut rbit = (first_bit % bits as u64) as u32;
        let mut sample = 0;
        let mut fetch = true;
        for slot in buffer.iter_mut() {
            let mut byte = 0u8;
            for wbit in 0..8 {
                if fetch {
                    sample = self.sampler.read(nr);
                    fetch = false;
                }
                if sample & (1 << rbit) != 0 {
                    byte |= 1 << wbit;
                }
                rbit += 1;
                if rbit == bits {
                    rbit = 0;
                    nr += 1;
                    fetch = true;
                }
            }
            *slot = byte;
        }
        Ok(())
    }

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let bits = self.bits;
        let first_bit = offset * 8;
        self.check_range(first_bit, buffer.len())?;

        let mut nr = first_bit / bits as u64;
        let mut wbit = (first_bit % bits as u64) as u32;
        let mut sample = 0;
        let mut fetch = true;
        for &byte in buffer {
            for rbit in 0..8 {
                if fetch {
                    sample = self.sampler.read(nr);
                    fetch = false;
                }
                if byte & (1 << rbit) != 0 {
                    sample |= 1 << wbit;
                } else {
                    sample &= !(1 << wbit);
                }
                wbit += 1;
                if wbit == bits {
                    wbit = 0;
                    self.sampler.write(nr, sample);
                    nr += 1;
                    fetch = true;
                }
            }
        }
        // partially filled sample at the tail
        if wbit > 0 {
            self.sampler.write(nr, sample);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.sampler.flush()
    }
}
