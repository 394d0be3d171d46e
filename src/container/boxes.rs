//! Minimal ISO-BMFF box walking: locate the video track header and read or rewrite its display
//! matrix, and delay track starts with edit lists.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use crate::foundation::core::Rotation;
use crate::foundation::error::{VidmarkError, VidmarkResult};

const FIXED_ONE: i32 = 0x0001_0000;
const W_ONE: i32 = 0x4000_0000;

/// Header of one box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    /// Four-character type.
    pub kind: [u8; 4],
    /// Offset of the first header byte.
    pub start: u64,
    /// Offset of the first payload byte.
    pub payload: u64,
    /// Offset one past the last byte.
    pub end: u64,
}

fn read_header<R: Read + Seek>(r: &mut R, start: u64, limit: u64) -> VidmarkResult<Option<BoxHeader>> {
    if start + 8 > limit {
        return Ok(None);
    }
    r.seek(SeekFrom::Start(start))?;
    let mut head = [0u8; 8];
    r.read_exact(&mut head)?;
    let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let kind = [head[4], head[5], head[6], head[7]];
    let (size, header_len) = match size32 {
        0 => (limit - start, 8),
        1 => {
            let mut large = [0u8; 8];
            r.read_exact(&mut large)?;
            (u64::from_be_bytes(large), 16)
        }
        n => (u64::from(n), 8),
    };
    if size < header_len || start + size > limit {
        return Err(VidmarkError::source_error(format!(
            "box '{}' at {start} has invalid size {size}",
            String::from_utf8_lossy(&kind)
        )));
    }
    Ok(Some(BoxHeader {
        kind,
        start,
        payload: start + header_len,
        end: start + size,
    }))
}

/// Direct children of the range `[from, to)`.
pub fn children<R: Read + Seek>(r: &mut R, from: u64, to: u64) -> VidmarkResult<Vec<BoxHeader>> {
    let mut out = Vec::new();
    let mut pos = from;
    while let Some(header) = read_header(r, pos, to)? {
        pos = header.end;
        out.push(header);
    }
    Ok(out)
}

fn child<R: Read + Seek>(r: &mut R, parent: &BoxHeader, kind: &[u8; 4]) -> VidmarkResult<Option<BoxHeader>> {
    Ok(children(r, parent.payload, parent.end)?
        .into_iter()
        .find(|b| &b.kind == kind))
}

fn handler_type<R: Read + Seek>(r: &mut R, trak: &BoxHeader) -> VidmarkResult<Option<[u8; 4]>> {
    let Some(mdia) = child(r, trak, b"mdia")? else {
        return Ok(None);
    };
    let Some(hdlr) = child(r, &mdia, b"hdlr")? else {
        return Ok(None);
    };
    // version/flags (4) + pre_defined (4)
    r.seek(SeekFrom::Start(hdlr.payload + 8))?;
    let mut handler = [0u8; 4];
    r.read_exact(&mut handler)?;
    Ok(Some(handler))
}

/// Offset of the display matrix inside the first video track's `tkhd`.
pub fn video_matrix_offset<R: Read + Seek>(r: &mut R) -> VidmarkResult<Option<u64>> {
    let len = r.seek(SeekFrom::End(0))?;
    let Some(moov) = children(r, 0, len)?.into_iter().find(|b| &b.kind == b"moov") else {
        return Err(VidmarkError::source_error("no 'moov' box found"));
    };
    for trak in children(r, moov.payload, moov.end)?
        .into_iter()
        .filter(|b| &b.kind == b"trak")
    {
        if handler_type(r, &trak)? != Some(*b"vide") {
            continue;
        }
        let Some(tkhd) = child(r, &trak, b"tkhd")? else {
            continue;
        };
        r.seek(SeekFrom::Start(tkhd.payload))?;
        let mut version = [0u8; 1];
        r.read_exact(&mut version)?;
        let offset = if version[0] == 1 { 52 } else { 40 };
        if tkhd.payload + offset + 36 > tkhd.end {
            return Err(VidmarkError::source_error("truncated 'tkhd' box"));
        }
        return Ok(Some(tkhd.payload + offset));
    }
    Ok(None)
}

/// Display matrix `[a, b, u, c, d, v, x, y, w]` for `rotation`.
pub fn rotation_matrix(rotation: Rotation) -> [i32; 9] {
    let (a, b, c, d) = match rotation {
        Rotation::None => (FIXED_ONE, 0, 0, FIXED_ONE),
        Rotation::Cw90 => (0, FIXED_ONE, -FIXED_ONE, 0),
        Rotation::Cw180 => (-FIXED_ONE, 0, 0, -FIXED_ONE),
        Rotation::Cw270 => (0, -FIXED_ONE, FIXED_ONE, 0),
    };
    [a, b, 0, c, d, 0, 0, 0, W_ONE]
}

/// Rotation described by a display matrix; non-rotational matrices map to `None`.
pub fn matrix_rotation(matrix: &[i32; 9]) -> Rotation {
    let sign = |v: i32| v.signum();
    match (sign(matrix[0]), sign(matrix[1]), sign(matrix[3]), sign(matrix[4])) {
        (0, 1, -1, 0) => Rotation::Cw90,
        (-1, 0, 0, -1) => Rotation::Cw180,
        (0, -1, 1, 0) => Rotation::Cw270,
        _ => Rotation::None,
    }
}

/// Rotation recorded in the first video track header, `None` without a video track.
pub fn read_video_rotation<R: Read + Seek>(r: &mut R) -> VidmarkResult<Rotation> {
    let Some(offset) = video_matrix_offset(r)? else {
        return Ok(Rotation::None);
    };
    r.seek(SeekFrom::Start(offset))?;
    let mut raw = [0u8; 36];
    r.read_exact(&mut raw)?;
    let mut matrix = [0i32; 9];
    for (v, chunk) in matrix.iter_mut().zip(raw.chunks_exact(4)) {
        *v = i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(matrix_rotation(&matrix))
}

/// Rewrite the first video track's display matrix. Returns `false` without a video track.
pub fn write_video_rotation<F: Read + Write + Seek>(f: &mut F, rotation: Rotation) -> VidmarkResult<bool> {
    let Some(offset) = video_matrix_offset(f)? else {
        return Ok(false);
    };
    let mut raw = Vec::with_capacity(36);
    for v in rotation_matrix(rotation) {
        raw.extend_from_slice(&v.to_be_bytes());
    }
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(&raw)?;
    f.flush()?;
    Ok(true)
}

fn be_u32(raw: &[u8], at: usize) -> VidmarkResult<u32> {
    raw.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| VidmarkError::source_error("truncated box"))
}

fn be_u64(raw: &[u8], at: usize) -> VidmarkResult<u64> {
    raw.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| VidmarkError::source_error("truncated box"))
}

/// Position and width of the duration field of a full box whose payload starts at `payload`.
/// `v0_at` and `v1_at` are offsets past the version/flags word.
fn duration_field(raw: &[u8], payload: usize, v0_at: usize, v1_at: usize) -> VidmarkResult<(usize, bool)> {
    let version = *raw
        .get(payload)
        .ok_or_else(|| VidmarkError::source_error("truncated box"))?;
    if version == 1 {
        Ok((payload + 4 + v1_at, true))
    } else {
        Ok((payload + 4 + v0_at, false))
    }
}

fn read_duration(raw: &[u8], (at, wide): (usize, bool)) -> VidmarkResult<u64> {
    if wide { be_u64(raw, at) } else { be_u32(raw, at).map(u64::from) }
}

fn write_duration(raw: &mut [u8], (at, wide): (usize, bool), value: u64) -> VidmarkResult<()> {
    if wide {
        raw[at..at + 8].copy_from_slice(&value.to_be_bytes());
    } else {
        let value = u32::try_from(value)
            .map_err(|_| VidmarkError::io("track duration does not fit a version 0 header"))?;
        raw[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }
    Ok(())
}

fn push_box(out: &mut Vec<u8>, kind: &[u8; 4], payload: &[u8]) -> VidmarkResult<()> {
    let size = u32::try_from(payload.len() + 8)
        .map_err(|_| VidmarkError::io(format!("'{}' box too large", String::from_utf8_lossy(kind))))?;
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    Ok(())
}

/// `edts` box holding an empty edit of `delay` followed by the whole media, both in movie ticks.
pub fn start_delay_edts(delay: u64, media_duration: u64) -> VidmarkResult<Vec<u8>> {
    let wide = delay > u64::from(u32::MAX) || media_duration > u64::from(u32::MAX);
    let mut elst = Vec::with_capacity(48);
    elst.push(u8::from(wide));
    elst.extend_from_slice(&[0, 0, 0]);
    elst.extend_from_slice(&2u32.to_be_bytes());
    for (segment, media_time) in [(delay, -1i64), (media_duration, 0)] {
        if wide {
            elst.extend_from_slice(&segment.to_be_bytes());
            elst.extend_from_slice(&media_time.to_be_bytes());
        } else {
            elst.extend_from_slice(&(segment as u32).to_be_bytes());
            elst.extend_from_slice(&(media_time as i32).to_be_bytes());
        }
        // rate 1.0
        elst.extend_from_slice(&[0, 1, 0, 0]);
    }
    let mut edts = Vec::new();
    push_box(&mut edts, b"elst", &elst)?;
    let mut out = Vec::new();
    push_box(&mut out, b"edts", &edts)?;
    Ok(out)
}

/// Rebuild one `trak` with its start delayed by `delay` movie ticks. Returns the bytes and the
/// track's end on the movie timeline.
fn delay_trak(moov: &[u8], trak: &BoxHeader, delay: u64) -> VidmarkResult<(Vec<u8>, u64)> {
    let mut cur = Cursor::new(moov);
    let mut payload = Vec::with_capacity((trak.end - trak.payload) as usize + 48);
    let mut end = 0;
    for child in children(&mut cur, trak.payload, trak.end)? {
        let mut raw = moov[child.start as usize..child.end as usize].to_vec();
        match &child.kind {
            b"tkhd" => {
                let header_len = (child.payload - child.start) as usize;
                // creation, modification, track id, reserved
                let field = duration_field(&raw, header_len, 16, 24)?;
                let media = read_duration(&raw, field)?;
                end = media + delay;
                if delay > 0 {
                    write_duration(&mut raw, field, end)?;
                    payload.extend_from_slice(&raw);
                    payload.extend_from_slice(&start_delay_edts(delay, media)?);
                    continue;
                }
            }
            b"edts" if delay > 0 => continue,
            _ => {}
        }
        payload.extend_from_slice(&raw);
    }
    let mut out = Vec::with_capacity(payload.len() + 8);
    push_box(&mut out, b"trak", &payload)?;
    Ok((out, end))
}

/// Delay the start of tracks on the movie timeline with edit lists. `delays` holds one entry per
/// track in `trak` order, in movie ticks. `moov` must be the last box of the file.
pub fn write_start_delays<F: Read + Write + Seek>(f: &mut F, delays: &[u64]) -> VidmarkResult<()> {
    if delays.iter().all(|&d| d == 0) {
        return Ok(());
    }
    let len = f.seek(SeekFrom::End(0))?;
    let Some(moov) = children(f, 0, len)?.into_iter().find(|b| &b.kind == b"moov") else {
        return Err(VidmarkError::source_error("no 'moov' box found"));
    };
    if moov.end != len {
        return Err(VidmarkError::io("'moov' is not the last box of the file"));
    }
    let mut raw = vec![0u8; (moov.end - moov.start) as usize];
    f.seek(SeekFrom::Start(moov.start))?;
    f.read_exact(&mut raw)?;

    let base = moov.start;
    let mut cur = Cursor::new(raw.as_slice());
    let boxes = children(&mut cur, moov.payload - base, moov.end - base)?;
    let mut payload = Vec::with_capacity(raw.len() + 48 * delays.len());
    let mut mvhd_at = None;
    let mut movie_end = 0;
    let mut traks = delays.iter();
    for b in boxes {
        match &b.kind {
            b"trak" => {
                let delay = traks.next().copied().unwrap_or(0);
                let (trak, end) = delay_trak(&raw, &b, delay)?;
                movie_end = movie_end.max(end);
                payload.extend_from_slice(&trak);
            }
            kind => {
                if kind == b"mvhd" {
                    mvhd_at = Some((payload.len(), (b.payload - b.start) as usize));
                }
                payload.extend_from_slice(&raw[b.start as usize..b.end as usize]);
            }
        }
    }
    if let Some((at, header_len)) = mvhd_at {
        // creation, modification, timescale
        let (offset, wide) = duration_field(&payload[at..], header_len, 12, 20)?;
        let field = (at + offset, wide);
        if read_duration(&payload, field)? < movie_end {
            write_duration(&mut payload, field, movie_end)?;
        }
    }

    let mut out = Vec::with_capacity(payload.len() + 8);
    push_box(&mut out, b"moov", &payload)?;
    f.seek(SeekFrom::Start(moov.start))?;
    f.write_all(&out)?;
    f.flush()?;
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/container/boxes.rs"]
mod tests;
