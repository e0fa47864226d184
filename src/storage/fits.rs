//! Minimal FITS codec for 16-bit unsigned monochrome images
//!
//! Writes a single primary HDU: `BITPIX = 16` with `BZERO = 32768`, which is
//! the standard way to store unsigned 16-bit samples as big-endian signed
//! integers. Header and data are each padded to 2880-byte blocks.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::StorageError;

const BLOCK: usize = 2880;
const CARD: usize = 80;
const UNSIGNED_ZERO: i64 = 32_768;

/// Decoded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitsImage {
    pub samples: Vec<u16>,
    pub width: u32,
    pub height: u32,
}

fn push_card(buf: &mut BytesMut, text: &str) {
    let mut card = [b' '; CARD];
    let len = text.len().min(CARD);
    card[..len].copy_from_slice(&text.as_bytes()[..len]);
    buf.put_slice(&card);
}

fn value_card(buf: &mut BytesMut, key: &str, value: impl std::fmt::Display, comment: &str) {
    push_card(buf, &format!("{key:<8}= {value:>20} / {comment}"));
}

fn string_card(buf: &mut BytesMut, key: &str, value: &str, comment: &str) {
    let quoted = format!("'{value}'");
    push_card(buf, &format!("{key:<8}= {quoted:<20} / {comment}"));
}

fn pad_to_block(buf: &mut BytesMut, fill: u8) {
    let rem = buf.len() % BLOCK;
    if rem != 0 {
        buf.put_bytes(fill, BLOCK - rem);
    }
}

/// Serialize an image. `date` goes into the `DATE` card when given.
pub fn encode(samples: &[u16], width: u32, height: u32, date: Option<&str>) -> BytesMut {
    let data_len = samples.len() * 2;
    let mut buf = BytesMut::with_capacity(BLOCK + data_len + BLOCK);

    value_card(&mut buf, "SIMPLE", "T", "conforms to FITS standard");
    value_card(&mut buf, "BITPIX", 16, "array data type");
    value_card(&mut buf, "NAXIS", 2, "number of array dimensions");
    value_card(&mut buf, "NAXIS1", width, "");
    value_card(&mut buf, "NAXIS2", height, "");
    value_card(&mut buf, "BZERO", UNSIGNED_ZERO, "offset data range to that of unsigned short");
    value_card(&mut buf, "BSCALE", 1, "default scaling factor");
    if let Some(date) = date {
        string_card(&mut buf, "DATE", date, "file creation date");
    }
    push_card(&mut buf, "END");
    pad_to_block(&mut buf, b' ');

    for sample in samples {
        buf.put_i16((sample ^ 0x8000) as i16);
    }
    pad_to_block(&mut buf, 0);
    buf
}

/// Write an image to a new file, failing if `path` already exists.
pub fn write_image(
    path: &Path,
    samples: &[u16],
    width: u32,
    height: u32,
    date: Option<&str>,
) -> Result<(), StorageError> {
    if width as usize * height as usize != samples.len() {
        return Err(StorageError::Malformed {
            path: path.to_path_buf(),
            reason: format!("{} samples do not fill {width}x{height}", samples.len()),
        });
    }

    let encoded = encode(samples, width, height, date);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| match source.kind() {
            ErrorKind::AlreadyExists => StorageError::Exists(path.to_path_buf()),
            _ => StorageError::Write {
                path: path.to_path_buf(),
                source,
            },
        })?;
    file.write_all(&encoded).map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Header value with any trailing comment and quotes removed.
fn card_value(card: &str) -> Option<&str> {
    let rest = card.get(8..)?.strip_prefix("= ")?.trim_start();
    if let Some(quoted) = rest.strip_prefix('\'') {
        return quoted.split('\'').next();
    }
    Some(rest.split('/').next().unwrap_or("").trim())
}

/// Parse an image produced by [`encode`].
pub fn decode(path: &Path, bytes: &[u8]) -> Result<FitsImage, StorageError> {
    let malformed = |reason: String| StorageError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let mut bitpix = None;
    let mut naxis = None;
    let mut width = None;
    let mut height = None;
    let mut bzero = 0i64;
    let mut bscale = 1i64;
    let mut header_cards = None;

    for (index, raw) in bytes.chunks(CARD).enumerate() {
        if raw.len() < CARD {
            break;
        }
        let card = std::str::from_utf8(raw).map_err(|_| malformed("non-ASCII header".into()))?;
        let key = card.get(..8).unwrap_or(card).trim_end();
        if key == "END" {
            header_cards = Some(index + 1);
            break;
        }
        let Some(value) = card_value(card) else {
            continue;
        };
        let parse = |v: &str| {
            v.parse::<i64>()
                .map_err(|_| malformed(format!("bad {key} value {v:?}")))
        };
        match key {
            "BITPIX" => bitpix = Some(parse(value)?),
            "NAXIS" => naxis = Some(parse(value)?),
            "NAXIS1" => width = Some(parse(value)?),
            "NAXIS2" => height = Some(parse(value)?),
            "BZERO" => bzero = parse(value)?,
            "BSCALE" => bscale = parse(value)?,
            _ => {}
        }
    }

    let header_cards = header_cards.ok_or_else(|| malformed("missing END card".into()))?;
    if bitpix != Some(16) || naxis != Some(2) || bscale != 1 {
        return Err(malformed(format!(
            "unsupported layout BITPIX={bitpix:?} NAXIS={naxis:?} BSCALE={bscale}"
        )));
    }
    let (width, height) = match (width, height) {
        (Some(w), Some(h)) if w > 0 && h >= 0 && w <= i64::from(u32::MAX) && h <= i64::from(u32::MAX) => {
            (w as u32, h as u32)
        }
        _ => return Err(malformed("missing or invalid NAXIS1/NAXIS2".into())),
    };

    let offset = (header_cards * CARD).div_ceil(BLOCK) * BLOCK;
    let (count, end) = (width as usize)
        .checked_mul(height as usize)
        .and_then(|count| Some((count, offset.checked_add(count.checked_mul(2)?)?)))
        .ok_or_else(|| malformed("image too large".into()))?;
    let mut data = bytes
        .get(offset..end)
        .ok_or_else(|| malformed("truncated data unit".into()))?;

    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let physical = i64::from(data.get_i16()) + bzero;
        samples.push(physical.clamp(0, i64::from(u16::MAX)) as u16);
    }

    Ok(FitsImage {
        samples,
        width,
        height,
    })
}

pub fn read_image(path: &Path) -> Result<FitsImage, StorageError> {
    let bytes = fs::read(path).map_err(|source| StorageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode(path, &bytes)
}
