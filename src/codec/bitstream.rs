//! H.264 and AAC bitstream helpers: NAL framing, access-unit splitting, ADTS and
//! AudioSpecificConfig.

use crate::foundation::error::{VidmarkError, VidmarkResult};

/// Four-byte Annex-B start code.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit types the pipeline cares about.
pub mod nal {
    /// Coded slice of an IDR picture.
    pub const IDR: u8 = 5;
    /// Sequence parameter set.
    pub const SPS: u8 = 7;
    /// Picture parameter set.
    pub const PPS: u8 = 8;
    /// Access unit delimiter.
    pub const AUD: u8 = 9;
}

/// NAL unit type of `unit` (header byte without start code).
pub fn nal_type(unit: &[u8]) -> Option<u8> {
    unit.first().map(|b| b & 0x1f)
}

/// Byte ranges `(start_code_pos, payload_pos)` of every start code in `data`.
fn start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let begin = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            out.push((begin, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }
    out
}

/// NAL units of an Annex-B byte stream, without their start codes.
pub fn annex_b_units(data: &[u8]) -> Vec<&[u8]> {
    let codes = start_codes(data);
    codes
        .iter()
        .enumerate()
        .map(|(n, (_, payload))| {
            let end = codes.get(n + 1).map_or(data.len(), |(next, _)| *next);
            &data[*payload..end]
        })
        .filter(|unit| !unit.is_empty())
        .collect()
}

/// Strip a leading Annex-B start code, if any.
pub fn strip_start_code(data: &[u8]) -> &[u8] {
    data.strip_prefix(&START_CODE[..])
        .or_else(|| data.strip_prefix(&START_CODE[1..]))
        .unwrap_or(data)
}

/// Prefix `unit` with a four-byte start code.
pub fn with_start_code(unit: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(unit.len() + 4);
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(unit);
    out
}

/// Convert length-prefixed (AVCC, 4-byte lengths) NAL units into an Annex-B stream.
pub fn avcc_to_annex_b(data: &[u8]) -> VidmarkResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut rest = data;
    while !rest.is_empty() {
        let Some((len_bytes, tail)) = rest.split_first_chunk::<4>() else {
            return Err(VidmarkError::source_error("truncated AVCC length prefix"));
        };
        let len = u32::from_be_bytes(*len_bytes) as usize;
        if len > tail.len() {
            return Err(VidmarkError::source_error(format!(
                "AVCC unit of {len} bytes exceeds the {} remaining",
                tail.len()
            )));
        }
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&tail[..len]);
        rest = &tail[len..];
    }
    Ok(out)
}

/// Length-prefix `units` (AVCC, 4-byte lengths), skipping the types in `skip`.
pub fn units_to_avcc<'a>(units: impl IntoIterator<Item = &'a [u8]>, skip: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        if nal_type(unit).is_some_and(|t| skip.contains(&t)) {
            continue;
        }
        out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        out.extend_from_slice(unit);
    }
    out
}

/// Splits an Annex-B stream into access units at access unit delimiters.
#[derive(Debug, Default)]
pub struct AccessUnitSplitter {
    buf: Vec<u8>,
}

impl AccessUnitSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    fn delimiters(&self) -> Vec<usize> {
        start_codes(&self.buf)
            .into_iter()
            .filter(|(_, payload)| {
                self.buf
                    .get(*payload)
                    .is_some_and(|b| b & 0x1f == nal::AUD)
            })
            .map(|(begin, _)| begin)
            .collect()
    }

    /// Append stream bytes and return every access unit completed by them.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);
        let delimiters = self.delimiters();
        if delimiters.len() < 2 {
            return Vec::new();
        }
        let last = delimiters[delimiters.len() - 1];
        let units = delimiters
            .windows(2)
            .map(|w| self.buf[w[0]..w[1]].to_vec())
            .collect();
        self.buf.drain(..last);
        units
    }

    /// The trailing access unit once the stream has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buf);
        (!annex_b_units(&rest).is_empty()).then_some(rest)
    }
}

/// Sampling frequencies addressable by a 4-bit frequency index.
pub const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

/// Frequency index of `rate`.
pub fn freq_index_for_rate(rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|r| *r == rate).map(|i| i as u8)
}

/// Sampling frequency of `index`.
pub fn rate_for_freq_index(index: u8) -> Option<u32> {
    SAMPLE_RATES.get(index as usize).copied()
}

/// Parameters shared by ADTS headers and AudioSpecificConfig.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AacParams {
    /// Audio object type (2 = AAC-LC).
    pub object_type: u8,
    /// Sampling frequency index.
    pub freq_index: u8,
    /// Channel configuration.
    pub channels: u8,
}

impl AacParams {
    /// Sampling frequency in Hz.
    pub fn sample_rate(&self) -> Option<u32> {
        rate_for_freq_index(self.freq_index)
    }
}

/// Two-byte AudioSpecificConfig for `params`.
pub fn audio_specific_config(params: AacParams) -> [u8; 2] {
    let v: u16 = (u16::from(params.object_type & 0x1f) << 11)
        | (u16::from(params.freq_index & 0x0f) << 7)
        | (u16::from(params.channels & 0x0f) << 3);
    v.to_be_bytes()
}

/// Parse the leading fields of an AudioSpecificConfig.
pub fn parse_audio_specific_config(asc: &[u8]) -> VidmarkResult<AacParams> {
    let [b0, b1, ..] = asc else {
        return Err(VidmarkError::source_error(format!(
            "AudioSpecificConfig needs 2 bytes, got {}",
            asc.len()
        )));
    };
    let object_type = b0 >> 3;
    let freq_index = ((b0 & 0x07) << 1) | (b1 >> 7);
    if freq_index == 0x0f {
        return Err(VidmarkError::source_error(
            "explicit AAC sampling frequencies are not supported",
        ));
    }
    Ok(AacParams {
        object_type,
        freq_index,
        channels: (b1 >> 3) & 0x0f,
    })
}

/// Length of an ADTS header without CRC.
pub const ADTS_HEADER_LEN: usize = 7;

/// ADTS header for a raw AAC frame of `payload_len` bytes.
pub fn adts_header(params: AacParams, payload_len: usize) -> [u8; ADTS_HEADER_LEN] {
    let frame_len = (payload_len + ADTS_HEADER_LEN) as u32;
    let profile = params.object_type.saturating_sub(1) & 0x03;
    [
        0xff,
        0xf1,
        (profile << 6) | ((params.freq_index & 0x0f) << 2) | ((params.channels >> 2) & 0x01),
        ((params.channels & 0x03) << 6) | ((frame_len >> 11) & 0x03) as u8,
        ((frame_len >> 3) & 0xff) as u8,
        (((frame_len & 0x07) << 5) as u8) | 0x1f,
        0xfc,
    ]
}

/// One frame located in an ADTS stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdtsFrame {
    /// Stream parameters from the header.
    pub params: AacParams,
    /// Header length (7, or 9 with CRC).
    pub header_len: usize,
    /// Whole frame length including the header.
    pub frame_len: usize,
}

/// Parse the ADTS header at the start of `data`.
///
/// Returns `Ok(None)` while `data` is too short to hold the header.
pub fn parse_adts(data: &[u8]) -> VidmarkResult<Option<AdtsFrame>> {
    if data.len() < ADTS_HEADER_LEN {
        return Ok(None);
    }
    if data[0] != 0xff || data[1] & 0xf0 != 0xf0 {
        return Err(VidmarkError::codec("ADTS sync word not found"));
    }
    let protection_absent = data[1] & 0x01 == 1;
    let header_len = if protection_absent { 7 } else { 9 };
    let frame_len = ((usize::from(data[3] & 0x03)) << 11)
        | (usize::from(data[4]) << 3)
        | (usize::from(data[5]) >> 5);
    if frame_len < header_len {
        return Err(VidmarkError::codec(format!(
            "ADTS frame length {frame_len} shorter than its header"
        )));
    }
    Ok(Some(AdtsFrame {
        params: AacParams {
            object_type: ((data[2] >> 6) & 0x03) + 1,
            freq_index: (data[2] >> 2) & 0x0f,
            channels: ((data[2] & 0x01) << 2) | (data[3] >> 6),
        },
        header_len,
        frame_len,
    }))
}

#[cfg(test)]
#[path = "../../tests/unit/codec/bitstream.rs"]
mod tests;
