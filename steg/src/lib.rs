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

pub use ghostfs_err::*;

/// A flat, byte-addressable store hidden inside a cover's sample stream.
///
/// `capacity` bounds the store; a read or write whose sample span would
/// reach past the stream fails with [`MediaError::Range`] and leaves the
/// cover untouched.
pub trait Stegger {
    fn capacity(&self) -> u64;

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()>;

    /// Pushes pending mutations down to the cover medium.
    fn flush(&self) -> Result<()>;
}
