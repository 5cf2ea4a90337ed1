// THEORY:
// The `frame_source` module supplies frames to the engine from a folder of numbered
// still images (the layout a video extractor writes: `frame_000.jpg`, `frame_001.jpg`, ...).
//
// Key principles:
// 1.  **Lazy decoding**: files are listed up front but decoded one at a time as the
//     accumulator pulls them, so a 420-frame shot never sits in memory at once.
// 2.  **Per-frame failures travel as values**: a file that fails to decode becomes an
//     `Err` item in the sequence. The accumulator decides to skip it.
// 3.  **Name order is frame order**: files are sorted by name, case-insensitively. The
//     segmenter depends on this order being the capture order.

use crate::config::AnalyzerConfig;
use crate::error::{FlowError, FlowResult};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// An ordered, capped list of frame files.
#[derive(Debug, Clone)]
pub struct FolderFrameSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    total_files: usize,
    target_frames: usize,
    pad_to_target: bool,
    fps: u32,
}

impl FolderFrameSource {
    /// Lists the frames in `dir`. Fails when the folder holds no image files.
    pub fn open(dir: impl AsRef<Path>, config: &AnalyzerConfig) -> FlowResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect();
        files.sort_by_key(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().to_lowercase())
                .unwrap_or_default()
        });

        if files.is_empty() {
            return Err(FlowError::NoUsableFrames {
                decoded: 0,
                required: config.min_frames.max(1),
            });
        }

        let total_files = files.len();
        let target_frames = config.max_frames();
        let files: Vec<PathBuf> = files
            .into_iter()
            .skip(config.skip_frames())
            .take(target_frames)
            .collect();
        debug!(dir = %dir.display(), total_files, kept = files.len(), "listed frames");

        Ok(Self {
            dir,
            files,
            total_files,
            target_frames,
            pad_to_target: config.source.pad_to_target,
            fps: config.fps,
        })
    }

    /// Does `dir` directly contain at least one frame file?
    pub fn has_frames(dir: impl AsRef<Path>) -> bool {
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .any(|entry| is_frame_file(&entry.path()))
            })
            .unwrap_or(false)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Frame files that will be decoded, after skipping and capping.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Duration of the whole folder at the nominal rate, before skipping or capping.
    pub fn source_duration_s(&self) -> f64 {
        self.total_files as f64 / self.fps.max(1) as f64
    }

    /// Decodes the frames in order. With padding enabled the last decoded frame is repeated
    /// until `target_frames` frames have decoded successfully, so files that fail to decode
    /// are made up for as well.
    pub fn frames(&self) -> FolderFrames {
        FolderFrames {
            files: self.files.clone().into_iter(),
            pad_until: if self.pad_to_target { self.target_frames } else { 0 },
            decoded: 0,
            last_good: None,
        }
    }
}

/// Iterator over the decoded frames of a `FolderFrameSource`.
pub struct FolderFrames {
    files: std::vec::IntoIter<PathBuf>,
    /// Padding stops once this many frames have been yielded as `Ok`.
    pad_until: usize,
    decoded: usize,
    last_good: Option<RgbImage>,
}

impl Iterator for FolderFrames {
    type Item = FlowResult<RgbImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(path) = self.files.next() {
            let result = decode(&path);
            if let Ok(frame) = &result {
                self.decoded += 1;
                if self.pad_until > 0 {
                    self.last_good = Some(frame.clone());
                }
            }
            return Some(result);
        }

        if self.decoded >= self.pad_until {
            return None;
        }
        let frame = self.last_good.clone()?;
        self.decoded += 1;
        Some(Ok(frame))
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.as_str()))
}

fn decode(path: &Path) -> FlowResult<RgbImage> {
    image::open(path)
        .map(|image| image.to_rgb8())
        .map_err(|source| FlowError::FrameDecode {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frames(dir: &Path, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            RgbImage::from_pixel(4, 4, Rgb([i as u8 * 10, 0, 0]))
                .save(dir.join(name))
                .unwrap();
        }
    }

    #[test]
    fn empty_folder_has_no_usable_frames() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();
        let result = FolderFrameSource::open(dir.path(), &AnalyzerConfig::default());
        assert!(matches!(result, Err(FlowError::NoUsableFrames { decoded: 0, .. })));
        assert!(!FolderFrameSource::has_frames(dir.path()));
    }

    #[test]
    fn frames_come_back_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["frame_002.png", "FRAME_000.png", "frame_001.png"]);

        let source = FolderFrameSource::open(dir.path(), &AnalyzerConfig::default()).unwrap();
        let reds: Vec<u8> = source.frames().map(|f| f.unwrap().get_pixel(0, 0).0[0]).collect();
        assert_eq!(reds, vec![10, 20, 0]);
    }

    #[test]
    fn undecodable_files_are_reported_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["frame_000.png"]);
        fs::write(dir.path().join("frame_001.jpg"), b"garbage").unwrap();

        let source = FolderFrameSource::open(dir.path(), &AnalyzerConfig::default()).unwrap();
        let frames: Vec<_> = source.frames().collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(matches!(frames[1], Err(FlowError::FrameDecode { .. })));
    }

    #[test]
    fn skip_cap_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..10).map(|i| format!("frame_{i:03}.png")).collect();
        write_frames(dir.path(), &names.iter().map(String::as_str).collect::<Vec<_>>());

        let mut config = AnalyzerConfig { fps: 2, max_seconds: 3.0, ..AnalyzerConfig::default() };
        config.source.skip_seconds = 1.0;
        let source = FolderFrameSource::open(dir.path(), &config).unwrap();
        assert_eq!(source.len(), 6);
        assert_eq!(source.source_duration_s(), 5.0);
        let first = source.frames().next().unwrap().unwrap();
        assert_eq!(first.get_pixel(0, 0).0[0], 20);
    }

    #[test]
    fn short_folders_can_be_padded() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["a.png", "b.png"]);

        let mut config = AnalyzerConfig { fps: 5, max_seconds: 1.0, ..AnalyzerConfig::default() };
        config.source.pad_to_target = true;
        let source = FolderFrameSource::open(dir.path(), &config).unwrap();
        let reds: Vec<u8> = source.frames().map(|f| f.unwrap().get_pixel(0, 0).0[0]).collect();
        assert_eq!(reds, vec![0, 10, 10, 10, 10]);
    }

    #[test]
    fn padding_makes_up_for_undecodable_files() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), &["a.png", "b.png"]);
        fs::write(dir.path().join("c.jpg"), b"garbage").unwrap();

        let mut config = AnalyzerConfig { fps: 5, max_seconds: 1.0, ..AnalyzerConfig::default() };
        config.source.pad_to_target = true;
        let source = FolderFrameSource::open(dir.path(), &config).unwrap();
        let frames: Vec<_> = source.frames().collect();
        assert_eq!(frames.len(), 6);
        assert!(matches!(frames[2], Err(FlowError::FrameDecode { .. })));
        assert_eq!(frames.iter().filter(|f| f.is_ok()).count(), 5);
    }

    #[test]
    fn nothing_decodable_means_nothing_to_pad() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"garbage").unwrap();

        let mut config = AnalyzerConfig { fps: 5, max_seconds: 1.0, ..AnalyzerConfig::default() };
        config.source.pad_to_target = true;
        let source = FolderFrameSource::open(dir.path(), &config).unwrap();
        assert_eq!(source.frames().count(), 1);
    }
}
