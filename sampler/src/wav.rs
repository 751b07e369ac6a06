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

/// Bytes that must remain at the "fmt " tag: the tag itself, the chunk
/// size and the fields through bits-per-sample.
const FMT_MIN: usize = 24;

/// Bytes that must remain at the "data" tag: the tag and the chunk size.
const DATA_MIN: usize = 8;

/// Locates the sample stream of a PCM WAV file.
///
/// Chunks are found by a forward byte scan rather than by walking chunk
/// sizes, so covers with nonstandard padding between chunks still parse.
pub(crate) fn parse(map: &[u8]) -> Result<Layout> {
    let fmt = match find_tag(map, 0, b"fmt ") {
        Some(at) if map.len() - at >= FMT_MIN => at,
        _ => {
            error!("WAV: incomplete or missing \"fmt \" chunk");
            return Err(MediaError::Truncated.into());
        }
    };

    let audio_fmt = read_u16(map, fmt + 8);
    if audio_fmt != 1 {
        error!("WAV: audio format {audio_fmt} shall be 1 (PCM)");
        return Err(MediaError::UnsupportedCodec(audio_fmt).into());
    }
    let bits = read_u16(map, fmt + 22) as u32;
    if !matches!(bits, 8 | 16 | 32) {
        error!("WAV: sample width {bits} shall be 8, 16 or 32");
        return Err(MediaError::SampleWidth(bits).into());
    }

    let data = match find_tag(map, fmt, b"data") {
        Some(at) if map.len() - at >= DATA_MIN => at,
        _ => {
            error!("WAV: incomplete or missing \"data\" chunk");
            return Err(MediaError::Truncated.into());
        }
    };

    let data_len = read_u32(map, data + 4) as u64;
    let first = data + DATA_MIN;
    if first as u64 + data_len > map.len() as u64 {
        error!("WAV: data chunk ({data_len} bytes) exceeds file size");
        return Err(MediaError::Bounds.into());
    }

    Ok(Layout {
        first,
        count: data_len / (bits as u64 / 8),
        bits,
    })
}

fn find_tag(map: &[u8], from: usize, tag: &[u8; 4]) -> Option<usize> {
    (from..map.len().saturating_sub(3)).find(|&at| &map[at..at + 4] == tag)
}
