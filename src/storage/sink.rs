//! Frame persistence with collision-free, timestamped file names

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tracing::{info, instrument};

use super::fits;
use crate::capture::Frame;
use crate::error::StorageError;

/// Image file writer. Must refuse to overwrite an existing file.
pub trait ImageEncoder: Send {
    fn write_image(
        &self,
        path: &Path,
        samples: &[u16],
        width: u32,
        height: u32,
    ) -> Result<(), StorageError>;

    /// File extension without the dot
    fn extension(&self) -> &'static str;
}

/// Writes 16-bit FITS files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsEncoder;

impl ImageEncoder for FitsEncoder {
    fn write_image(
        &self,
        path: &Path,
        samples: &[u16],
        width: u32,
        height: u32,
    ) -> Result<(), StorageError> {
        let date = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        fits::write_image(path, samples, width, height, Some(&date))
    }

    fn extension(&self) -> &'static str {
        "fits"
    }
}

/// Where the acquisition loop sends frames it was asked to keep.
pub trait FrameSink: Send {
    fn save(&mut self, frame: &Frame) -> Result<PathBuf, StorageError>;
}

/// Saves frames into a directory as `image-YYYY-MM-DD_HH-MM-SS[.N].fits`.
///
/// The probe for a free name is not atomic against other processes writing
/// the same directory.
pub struct PersistenceSink<E = FitsEncoder> {
    dir: PathBuf,
    encoder: E,
}

impl PersistenceSink<FitsEncoder> {
    pub fn fits(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, FitsEncoder)
    }
}

impl<E: ImageEncoder> PersistenceSink<E> {
    pub fn new(dir: impl Into<PathBuf>, encoder: E) -> Self {
        Self {
            dir: dir.into(),
            encoder,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the output directory if it is missing.
    pub fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Write {
            path: self.dir.clone(),
            source,
        })
    }

    /// First free path for a capture taken at `timestamp`.
    pub fn next_path(&self, timestamp: NaiveDateTime) -> PathBuf {
        let base = format!("image-{}", timestamp.format("%Y-%m-%d_%H-%M-%S"));
        let ext = self.encoder.extension();

        let mut index = 0u32;
        loop {
            let name = if index == 0 {
                format!("{base}.{ext}")
            } else {
                format!("{base}.{index}.{ext}")
            };
            let candidate = self.dir.join(name);
            if !candidate.exists() {
                return candidate;
            }
            index += 1;
        }
    }

    #[instrument(level = "debug", skip(self, frame), fields(sequence = frame.sequence))]
    pub fn save_at(&self, frame: &Frame, timestamp: NaiveDateTime) -> Result<PathBuf, StorageError> {
        let path = self.next_path(timestamp);
        self.encoder
            .write_image(&path, frame.pixels(), frame.width(), frame.height())?;
        info!("Saved {}", path.display());
        Ok(path)
    }
}

impl<E: ImageEncoder> FrameSink for PersistenceSink<E> {
    fn save(&mut self, frame: &Frame) -> Result<PathBuf, StorageError> {
        self.save_at(frame, Local::now().naive_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn frame() -> Frame {
        Frame::new(vec![1u16, 2, 3, 4, 5, 6], 3, 1).unwrap()
    }

    #[test]
    fn same_second_saves_get_numbered() {
        let dir = tempdir().unwrap();
        let sink = PersistenceSink::fits(dir.path());

        let names: Vec<_> = (0..3)
            .map(|_| sink.save_at(&frame(), noon()).unwrap())
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            names,
            vec![
                "image-2024-01-01_12-00-00.fits",
                "image-2024-01-01_12-00-00.1.fits",
                "image-2024-01-01_12-00-00.2.fits",
            ]
        );
    }

    #[test]
    fn existing_file_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("image-2024-01-01_12-00-00.fits"), b"taken").unwrap();
        let sink = PersistenceSink::fits(dir.path());

        let path = sink.save_at(&frame(), noon()).unwrap();
        assert!(path.ends_with("image-2024-01-01_12-00-00.1.fits"));
        assert_eq!(fs::read(dir.path().join("image-2024-01-01_12-00-00.fits")).unwrap(), b"taken");
    }

    #[test]
    fn uses_24_hour_clock() {
        let dir = tempdir().unwrap();
        let sink = PersistenceSink::fits(dir.path());
        let evening = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(21, 5, 7)
            .unwrap();
        assert!(sink
            .next_path(evening)
            .ends_with("image-2024-03-09_21-05-07.fits"));
    }

    #[test]
    fn saved_frame_reads_back() {
        let dir = tempdir().unwrap();
        let mut sink = PersistenceSink::fits(dir.path());
        let original = frame();

        let path = sink.save(&original).unwrap();
        let image = fits::read_image(&path).unwrap();

        assert_eq!(image.samples, original.pixels());
        assert_eq!(image.width, original.width());
    }

    #[test]
    fn missing_directory_is_a_write_error() {
        let dir = tempdir().unwrap();
        let sink = PersistenceSink::fits(dir.path().join("absent"));
        assert!(matches!(
            sink.save_at(&frame(), noon()),
            Err(StorageError::Write { .. })
        ));
        sink.ensure_dir().unwrap();
        assert!(sink.save_at(&frame(), noon()).is_ok());
    }
}
