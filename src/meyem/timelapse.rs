//! Per-day timelapse builds: partition, encode chunks, concatenate.
//!
//! Every step detects completed work so an interrupted build resumes:
//! a finished artifact skips the day, a finished chunk skips its batch.

use crate::error::MeyemError;
use crate::logging;
use crate::meyem::config::MeyemConfig;
use crate::meyem::dates::{Clock, DayStamp};
use crate::meyem::encoder::Encoder;
use crate::meyem::entry::LocalEntry;
use crate::meyem::warn;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const SCRATCH_DIR_NAME: &str = ".meyem-tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub framerate: u32,
    pub batch_seconds: u32,
    pub image_extension: String,
    pub timelapse_extension: String,
    pub workers: usize,
}

impl BuildSettings {
    pub fn from_config(cfg: &MeyemConfig) -> Self {
        Self {
            framerate: cfg.timelapse.framerate,
            batch_seconds: cfg.timelapse.batch_seconds,
            image_extension: cfg.timelapse.image_extension.clone(),
            timelapse_extension: cfg.timelapse.extension.clone(),
            workers: cfg.timelapse.workers,
        }
    }

    pub fn batch_size(&self) -> usize {
        (self.framerate as usize * self.batch_seconds as usize).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DayOutcome {
    NotDirectory,
    Active { date: DayStamp },
    AlreadyBuilt { artifact: PathBuf },
    NoImages,
    Built {
        artifact: PathBuf,
        images: usize,
        batches: usize,
        encoded: usize,
        reused: usize,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildSummary {
    pub built: usize,
    pub active: usize,
    pub existing: usize,
    pub empty: usize,
    pub skipped: usize,
    pub failed: usize,
    pub encoded_batches: usize,
    pub reused_batches: usize,
    pub built_days: Vec<String>,
    pub failed_days: Vec<String>,
}

/// Split `items` into contiguous batches of at most `batch_size`; only the
/// last batch may be shorter.
pub fn partition<T>(items: &[T], batch_size: usize) -> Vec<&[T]> {
    items.chunks(batch_size.max(1)).collect()
}

pub fn artifact_path(timelapses_dir: &Path, day_identity: &str, extension: &str) -> PathBuf {
    timelapses_dir.join(format!("{day_identity}{extension}"))
}

/// Chunk for 1-based `batch_index`.
pub fn chunk_path(scratch_dir: &Path, day_identity: &str, batch_index: usize, extension: &str) -> PathBuf {
    scratch_dir.join(format!("{day_identity}_{batch_index}{extension}"))
}

/// Image files directly inside `day_dir`, in lexicographic order. Capture
/// file names are sequence-numbered, so this is also capture order.
pub fn list_images(day_dir: &Path, image_extension: &str) -> Result<Vec<PathBuf>> {
    let read_dir = fs::read_dir(day_dir).map_err(|err| MeyemError::filesystem(day_dir, err))?;
    let mut images = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|err| MeyemError::filesystem(day_dir, err))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.ends_with(image_extension) {
            continue;
        }
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            images.push(entry.path());
        }
    }
    images.sort();
    Ok(images)
}

/// An encoder can exit 0 without writing anything.
fn ensure_written(staging: &Path, target: &Path) -> Result<()> {
    let len = fs::metadata(staging)
        .map_err(|err| MeyemError::filesystem(staging, err))?
        .len();
    if len == 0 {
        let target = target.display().to_string();
        return Err(MeyemError::encode(target, "encoder produced no output").into());
    }
    Ok(())
}

fn encode_batch(
    encoder: &dyn Encoder,
    batch: &[PathBuf],
    framerate: u32,
    scratch_dir: &Path,
    chunk: &Path,
    extension: &str,
) -> Result<bool> {
    if chunk.is_file() {
        return Ok(false);
    }
    // Encode into a staging file so a chunk that exists is always complete.
    let staging = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(extension)
        .tempfile_in(scratch_dir)
        .map_err(|err| MeyemError::filesystem(scratch_dir, err))?;
    encoder.encode_images(batch, framerate, staging.path())?;
    ensure_written(staging.path(), chunk)?;
    staging
        .persist(chunk)
        .map_err(|err| MeyemError::filesystem(chunk, err.error))?;
    Ok(true)
}

fn remove_scratch(scratch_dir: &Path, day_identity: &str) {
    if !scratch_dir.exists() {
        return;
    }
    if let Err(err) = fs::remove_dir_all(scratch_dir) {
        let err = anyhow::Error::from(MeyemError::filesystem(scratch_dir, err));
        warn::emit_failure("build", "cleanup", day_identity, "scratch-remove-failed", &err);
    }
}

pub fn build_day(
    day_dir: &Path,
    timelapses_dir: &Path,
    today: DayStamp,
    clock: &Clock,
    settings: &BuildSettings,
    encoder: &dyn Encoder,
) -> Result<DayOutcome> {
    if !day_dir.is_dir() {
        return Ok(DayOutcome::NotDirectory);
    }
    let day = LocalEntry::new(day_dir);

    let date = clock.classify_entry(&day.identity, day_dir)?;
    if date >= today {
        return Ok(DayOutcome::Active { date });
    }

    let scratch_dir = day_dir.join(SCRATCH_DIR_NAME);
    let artifact = artifact_path(timelapses_dir, &day.identity, &settings.timelapse_extension);
    if artifact.is_file() {
        remove_scratch(&scratch_dir, &day.identity);
        return Ok(DayOutcome::AlreadyBuilt { artifact });
    }

    let images = list_images(day_dir, &settings.image_extension)?;
    if images.is_empty() {
        return Ok(DayOutcome::NoImages);
    }

    let batches = partition(&images, settings.batch_size());
    logging::debug(format!(
        "{}: {} batch(es) from {} image(s)",
        day.identity,
        batches.len(),
        images.len()
    ));
    fs::create_dir_all(&scratch_dir).map_err(|err| MeyemError::filesystem(&scratch_dir, err))?;

    let chunks: Vec<PathBuf> = (1..=batches.len())
        .map(|index| chunk_path(&scratch_dir, &day.identity, index, &settings.timelapse_extension))
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.workers.max(1))
        .build()
        .context("failed to start encode workers")?;
    // collect() is the join point: every batch has finished before we look.
    let results: Vec<Result<bool>> = pool.install(|| {
        batches
            .par_iter()
            .zip(chunks.par_iter())
            .map(|(batch, chunk)| {
                encode_batch(
                    encoder,
                    batch,
                    settings.framerate,
                    &scratch_dir,
                    chunk,
                    &settings.timelapse_extension,
                )
                .with_context(|| format!("batch {}", chunk.display()))
            })
            .collect()
    });

    let mut encoded = 0usize;
    let mut reused = 0usize;
    for result in results {
        if result? {
            encoded += 1;
        } else {
            reused += 1;
        }
    }

    fs::create_dir_all(timelapses_dir)
        .map_err(|err| MeyemError::filesystem(timelapses_dir, err))?;
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}.", day.identity))
        .suffix(&settings.timelapse_extension)
        .tempfile_in(timelapses_dir)
        .map_err(|err| MeyemError::filesystem(timelapses_dir, err))?;
    encoder.concat_videos(&chunks, &scratch_dir, staging.path())?;
    ensure_written(staging.path(), &artifact)?;
    staging
        .persist(&artifact)
        .map_err(|err| MeyemError::filesystem(&artifact, err.error))?;

    remove_scratch(&scratch_dir, &day.identity);

    Ok(DayOutcome::Built {
        artifact,
        images: images.len(),
        batches: batches.len(),
        encoded,
        reused,
    })
}

/// Build every completed day in `days`. A failing day is reported and the
/// remaining days still run.
pub fn build_all(
    days: &[LocalEntry],
    timelapses_dir: &Path,
    today: DayStamp,
    clock: &Clock,
    settings: &BuildSettings,
    encoder: &dyn Encoder,
) -> BuildSummary {
    let mut summary = BuildSummary::default();
    for day in days {
        logging::debug(format!("working on {}", day.identity));
        match build_day(&day.path, timelapses_dir, today, clock, settings, encoder) {
            Ok(DayOutcome::NotDirectory) => summary.skipped += 1,
            Ok(DayOutcome::Active { date }) => {
                logging::debug(format!("{}: still active ({date}), skipping", day.identity));
                summary.active += 1;
            }
            Ok(DayOutcome::AlreadyBuilt { .. }) => {
                logging::debug(format!("{}: already exists, skipping", day.identity));
                summary.existing += 1;
            }
            Ok(DayOutcome::NoImages) => {
                logging::debug(format!("{}: no images", day.identity));
                summary.empty += 1;
            }
            Ok(DayOutcome::Built {
                encoded, reused, ..
            }) => {
                logging::debug(format!("{}: done", day.identity));
                summary.built += 1;
                summary.encoded_batches += encoded;
                summary.reused_batches += reused;
                summary.built_days.push(day.identity.clone());
            }
            Err(err) => {
                warn::emit_failure("build", "build-day", &day.identity, "day-build-failed", &err);
                summary.failed += 1;
                summary.failed_days.push(day.identity.clone());
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meyem::encoder::testing::FakeEncoder;
    use chrono_tz::Tz;

    const TODAY: DayStamp = DayStamp::new(20240310);

    fn clock() -> Clock {
        Clock::Zone(Tz::UTC)
    }

    fn settings(framerate: u32, batch_seconds: u32) -> BuildSettings {
        BuildSettings {
            framerate,
            batch_seconds,
            image_extension: ".jpg".into(),
            timelapse_extension: ".mp4".into(),
            workers: 2,
        }
    }

    fn day_with_images(root: &Path, name: &str, count: usize) -> PathBuf {
        let day = root.join(name);
        fs::create_dir_all(&day).unwrap();
        for i in 0..count {
            fs::write(day.join(format!("img_{i:04}.jpg")), b"jpeg").unwrap();
        }
        day
    }

    #[test]
    fn partition_is_complete_and_bounded() {
        for n in [0usize, 1, 5, 149, 150, 151, 451] {
            let items: Vec<usize> = (0..n).collect();
            for b in [1usize, 7, 150] {
                let batches = partition(&items, b);
                assert_eq!(batches.len(), n.div_ceil(b));
                assert!(batches.iter().all(|batch| batch.len() <= b && !batch.is_empty()));
                let rebuilt: Vec<usize> = batches.concat();
                assert_eq!(rebuilt, items);
            }
        }
    }

    #[test]
    fn active_day_is_skipped_without_side_effects() {
        let tmp = tempfile::tempdir().unwrap();
        let day = day_with_images(tmp.path(), "2024-03-10", 3);
        let encoder = FakeEncoder::default();
        let out = build_day(&day, &tmp.path().join("timelapses"), TODAY, &clock(), &settings(30, 5), &encoder)
            .unwrap();
        assert_eq!(out, DayOutcome::Active { date: TODAY });
        assert_eq!(encoder.encode_count(), 0);
        assert!(!day.join(SCRATCH_DIR_NAME).exists());
    }

    #[test]
    fn day_without_images_is_skipped_quietly() {
        let tmp = tempfile::tempdir().unwrap();
        let day = tmp.path().join("2024-03-01");
        fs::create_dir_all(&day).unwrap();
        fs::write(day.join("motion.log"), b"x").unwrap();
        let encoder = FakeEncoder::default();
        let out = build_day(&day, &tmp.path().join("timelapses"), TODAY, &clock(), &settings(30, 5), &encoder)
            .unwrap();
        assert_eq!(out, DayOutcome::NoImages);
        assert!(!day.join(SCRATCH_DIR_NAME).exists());
    }

    #[test]
    fn sixty_five_images_make_one_chunk_and_one_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let day = day_with_images(tmp.path(), "2024-03-05", 65);
        let timelapses = tmp.path().join("timelapses");
        let encoder = FakeEncoder::default();

        let out = build_day(&day, &timelapses, TODAY, &clock(), &settings(30, 5), &encoder).unwrap();
        let artifact = timelapses.join("2024-03-05.mp4");
        assert_eq!(
            out,
            DayOutcome::Built {
                artifact: artifact.clone(),
                images: 65,
                batches: 1,
                encoded: 1,
                reused: 0,
            }
        );
        assert!(artifact.is_file());
        assert_eq!(fs::read_to_string(&artifact).unwrap().lines().count(), 65);
        assert!(!day.join(SCRATCH_DIR_NAME).exists());
    }

    #[test]
    fn second_build_performs_no_encodes() {
        let tmp = tempfile::tempdir().unwrap();
        let day = day_with_images(tmp.path(), "2024-03-05", 10);
        let timelapses = tmp.path().join("timelapses");
        let encoder = FakeEncoder::default();

        build_day(&day, &timelapses, TODAY, &clock(), &settings(2, 2), &encoder).unwrap();
        let first = encoder.encode_count();
        assert_eq!(first, 3);

        let again = build_day(&day, &timelapses, TODAY, &clock(), &settings(2, 2), &encoder).unwrap();
        assert!(matches!(again, DayOutcome::AlreadyBuilt { .. }));
        assert_eq!(encoder.encode_count(), first);
    }

    #[test]
    fn chunks_concatenate_in_batch_order() {
        let tmp = tempfile::tempdir().unwrap();
        let day = day_with_images(tmp.path(), "2024-03-05", 25);
        let timelapses = tmp.path().join("timelapses");
        let encoder = FakeEncoder::default();

        build_day(&day, &timelapses, TODAY, &clock(), &settings(2, 2), &encoder).unwrap();

        let concatenated = encoder.concatenated.lock().unwrap();
        let names: Vec<String> = concatenated[0]
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        let expected: Vec<String> = (1..=7).map(|i| format!("2024-03-05_{i}.mp4")).collect();
        assert_eq!(names, expected);

        let lines: Vec<String> = fs::read_to_string(timelapses.join("2024-03-05.mp4"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        let images: Vec<String> = (0..25).map(|i| format!("img_{i:04}.jpg")).collect();
        assert_eq!(lines, images);
    }

    #[test]
    fn failed_batch_keeps_scratch_and_rerun_resumes() {
        let tmp = tempfile::tempdir().unwrap();
        let day = day_with_images(tmp.path(), "2024-03-05", 10);
        let timelapses = tmp.path().join("timelapses");
        let settings = BuildSettings {
            workers: 1,
            ..settings(2, 2)
        };

        // Batches hold 4 images: the one with img_0009 is batch 3.
        let failing = FakeEncoder::default();
        failing.fail_chunk("img_0009.jpg");
        let err = build_day(&day, &timelapses, TODAY, &clock(), &settings, &failing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MeyemError>(),
            Some(MeyemError::Encode { .. })
        ));
        let scratch = day.join(SCRATCH_DIR_NAME);
        assert!(scratch.join("2024-03-05_1.mp4").is_file());
        assert!(scratch.join("2024-03-05_2.mp4").is_file());
        assert!(!scratch.join("2024-03-05_3.mp4").exists());
        assert!(!timelapses.join("2024-03-05.mp4").exists());

        let resumed = FakeEncoder::default();
        let out = build_day(&day, &timelapses, TODAY, &clock(), &settings, &resumed).unwrap();
        assert!(matches!(out, DayOutcome::Built { encoded: 1, reused: 2, .. }));
        assert_eq!(resumed.encode_count(), 1);
        assert_eq!(resumed.concatenated.lock().unwrap()[0].len(), 3);
        let lines = fs::read_to_string(timelapses.join("2024-03-05.mp4")).unwrap();
        assert_eq!(lines.lines().count(), 10);
        assert_eq!(lines.lines().last(), Some("img_0009.jpg"));
        assert!(!scratch.exists());
    }

    #[test]
    fn failed_concat_leaves_chunks_and_no_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let day = day_with_images(tmp.path(), "2024-03-05", 6);
        let timelapses = tmp.path().join("timelapses");
        let encoder = FakeEncoder::default();
        *encoder.fail_concat.lock().unwrap() = true;

        assert!(build_day(&day, &timelapses, TODAY, &clock(), &settings(2, 2), &encoder).is_err());
        assert!(!timelapses.join("2024-03-05.mp4").exists());
        assert!(day.join(SCRATCH_DIR_NAME).join("2024-03-05_2.mp4").is_file());
        assert!(day.join(SCRATCH_DIR_NAME).join("chunks.txt").is_file());
        let leftovers: Vec<_> = fs::read_dir(&timelapses).unwrap().collect();
        assert!(leftovers.is_empty(), "staging file should be cleaned up");
    }

    #[test]
    fn build_all_isolates_failures_per_day() {
        let tmp = tempfile::tempdir().unwrap();
        let timelapses = tmp.path().join("timelapses");
        let bad = day_with_images(tmp.path(), "2024-03-04", 2);
        fs::rename(bad.join("img_0001.jpg"), bad.join("broken.jpg")).unwrap();
        day_with_images(tmp.path(), "2024-03-05", 2);
        day_with_images(tmp.path(), "2024-03-10", 2);
        fs::write(tmp.path().join("stray.txt"), b"x").unwrap();

        let encoder = FakeEncoder::default();
        encoder.fail_chunk("broken.jpg");
        let days = crate::meyem::entry::list_local(tmp.path(), Some("timelapses")).unwrap();
        let summary = build_all(&days, &timelapses, TODAY, &clock(), &settings(30, 5), &encoder);

        assert_eq!(summary.built, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.built_days, vec!["2024-03-05".to_string()]);
        assert_eq!(summary.failed_days, vec!["2024-03-04".to_string()]);
    }

    #[test]
    fn stale_scratch_is_removed_once_artifact_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let day = day_with_images(tmp.path(), "2024-03-05", 1);
        let timelapses = tmp.path().join("timelapses");
        fs::create_dir_all(&timelapses).unwrap();
        fs::write(timelapses.join("2024-03-05.mp4"), b"done").unwrap();
        fs::create_dir_all(day.join(SCRATCH_DIR_NAME)).unwrap();

        let encoder = FakeEncoder::default();
        let out = build_day(&day, &timelapses, TODAY, &clock(), &settings(30, 5), &encoder).unwrap();
        assert!(matches!(out, DayOutcome::AlreadyBuilt { .. }));
        assert!(!day.join(SCRATCH_DIR_NAME).exists());
    }

    struct SilentEncoder;

    impl Encoder for SilentEncoder {
        fn encode_images(&self, _: &[PathBuf], _: u32, _: &Path) -> Result<()> {
            Ok(())
        }

        fn concat_videos(&self, _: &[PathBuf], _: &Path, _: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn empty_encoder_output_is_never_kept_as_a_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let day = day_with_images(tmp.path(), "2024-03-05", 3);
        let timelapses = tmp.path().join("timelapses");

        let err = build_day(&day, &timelapses, TODAY, &clock(), &settings(30, 5), &SilentEncoder)
            .unwrap_err();
        match err.downcast_ref::<MeyemError>() {
            Some(MeyemError::Encode { reason, .. }) => assert!(reason.contains("no output")),
            other => panic!("unexpected error: {other:?}"),
        }
        let scratch = day.join(SCRATCH_DIR_NAME);
        assert!(!scratch.join("2024-03-05_1.mp4").exists());
        let leftovers: Vec<_> = fs::read_dir(&scratch).unwrap().collect();
        assert!(leftovers.is_empty());
        assert!(!timelapses.join("2024-03-05.mp4").exists());
    }
}
