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

use ghostfs_err::{MediaError, Result};

use crate::{read_u16, read_u32, Layout};

/// Fixed BMP header bytes up to and including bits-per-pixel.
const HEADER_LEN: usize = 30;

/// Parses the fixed BMP header.
///
/// Every byte of the pixel array is one 8-bit sample regardless of the
/// image's bit depth; the depth only scales how many bytes the array holds.
pub(crate) fn parse(map: &[u8]) -> Result<Layout> {
    if map.len() < HEADER_LEN {
        error!("BMP header shall be at least {HEADER_LEN} bytes");
        return Err(MediaError::Truncated.into());
    }
    if &map[0..2] != b"BM" {
        error!("BMP magic mismatch");
        return Err(MediaError::BadMagic.into());
    }

    let pixel_offset = read_u32(map, 10) as u64;
    let width = read_u32(map, 18) as u64;
    let height = read_u32(map, 22) as u64;
    let bytes_per_pixel = (read_u16(map, 28) / 8) as u64;

    let count = width * height * bytes_per_pixel;
    if pixel_offset + count > map.len() as u64 {
        error!(
            "BMP pixel array ({count} bytes at {pixel_offset}) exceeds file size ({})",
            map.len()
        );
        return Err(MediaError::Bounds.into());
    }

    Ok(Layout {
        first: pixel_offset as usize,
        count,
        bits: 8,
    })
}
