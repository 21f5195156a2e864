//! The external video encoder as a capability.

use crate::error::MeyemError;
use crate::meyem::util::wait_with_optional_timeout;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, Stdio};
use std::thread;

pub const CONCAT_MANIFEST_NAME: &str = "chunks.txt";

/// Encoders write exactly to `dest` and report failure as an error; callers
/// never inspect partial output.
pub trait Encoder: Sync {
    fn encode_images(&self, images: &[PathBuf], framerate: u32, dest: &Path) -> Result<()>;
    fn concat_videos(&self, chunks: &[PathBuf], scratch_dir: &Path, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    bin: PathBuf,
    timeout_secs: Option<u64>,
}

pub fn resolve_ffmpeg_bin(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(bin) = configured {
        if bin.is_file() {
            return Ok(bin.to_path_buf());
        }
        anyhow::bail!("FFMPEG_BIN does not point to a file: {}", bin.display());
    }
    which::which("ffmpeg").context("ffmpeg binary not found in FFMPEG_BIN or PATH")
}

fn input_codec_for(images: &[PathBuf]) -> &'static str {
    let is_png = images.first().is_some_and(|p| {
        p.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"))
    });
    if is_png { "png" } else { "mjpeg" }
}

/// ffmpeg concat demuxer line with single quotes escaped.
fn manifest_line(path: &Path) -> String {
    let escaped = path.display().to_string().replace('\'', r"'\''");
    format!("file '{escaped}'\n")
}

pub fn write_concat_manifest(scratch_dir: &Path, chunks: &[PathBuf]) -> Result<PathBuf> {
    let manifest = scratch_dir.join(CONCAT_MANIFEST_NAME);
    let body: String = chunks.iter().map(|chunk| manifest_line(chunk)).collect();
    fs::write(&manifest, body).map_err(|err| MeyemError::filesystem(&manifest, err))?;
    Ok(manifest)
}

fn read_tail(mut log: File) -> String {
    let mut raw = String::new();
    if log.seek(SeekFrom::Start(0)).is_err() || log.read_to_string(&mut raw).is_err() {
        return String::new();
    }
    let lines: Vec<&str> = raw.lines().rev().take(5).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join(" | ")
}

fn feed_images(images: &[PathBuf], mut stdin: ChildStdin) -> Option<String> {
    for image in images {
        let copied = File::open(image).and_then(|mut reader| io::copy(&mut reader, &mut stdin));
        match copied {
            Ok(_) => {}
            // ffmpeg stopped reading; its exit status tells why.
            Err(err) if err.kind() == ErrorKind::BrokenPipe => return None,
            Err(err) => return Some(format!("failed to feed {}: {err}", image.display())),
        }
    }
    let _ = stdin.flush();
    None
}

impl FfmpegEncoder {
    pub fn new(bin: PathBuf, timeout_secs: Option<u64>) -> Self {
        Self { bin, timeout_secs }
    }

    pub fn resolve(configured: Option<&Path>, timeout_secs: Option<u64>) -> Result<Self> {
        Ok(Self::new(resolve_ffmpeg_bin(configured)?, timeout_secs))
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error").arg("-y");
        cmd
    }

    fn finish(&self, mut cmd: Command, dest: &Path, stdin_images: Option<&[PathBuf]>) -> Result<()> {
        let target = dest.display().to_string();
        // stderr goes to a file so a chatty ffmpeg can never block on a full pipe.
        let log = tempfile::tempfile().context("failed to create ffmpeg log file")?;
        cmd.stdout(Stdio::null())
            .stderr(Stdio::from(log.try_clone()?))
            .stdin(if stdin_images.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd
            .spawn()
            .map_err(|err| MeyemError::encode(&target, format!("failed to spawn ffmpeg: {err}")))?;

        let stdin = child.stdin.take();
        // Fed from a second thread so the timeout also covers an ffmpeg that
        // never drains its stdin.
        let (waited, feed_error) = thread::scope(|scope| {
            let feeder = match (stdin_images, stdin) {
                (Some(images), Some(stdin)) => {
                    Some(scope.spawn(move || feed_images(images, stdin)))
                }
                _ => None,
            };
            let waited = wait_with_optional_timeout(&mut child, self.timeout_secs);
            let feed_error = feeder.and_then(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Some("image feeder panicked".to_string()))
            });
            (waited, feed_error)
        });

        let status = match waited {
            Ok(status) => status,
            Err(err) => return Err(MeyemError::encode(&target, format!("{err:#}")).into()),
        };
        if let Some(reason) = feed_error {
            let _ = fs::remove_file(dest);
            return Err(MeyemError::encode(&target, reason).into());
        }
        if !status.success() {
            return Err(MeyemError::encode(
                &target,
                format!("ffmpeg exited with {status}: {}", read_tail(log)),
            )
            .into());
        }
        Ok(())
    }
}

impl Encoder for FfmpegEncoder {
    fn encode_images(&self, images: &[PathBuf], framerate: u32, dest: &Path) -> Result<()> {
        if images.is_empty() {
            return Err(MeyemError::encode(dest.display().to_string(), "no images in batch").into());
        }
        let mut cmd = self.base_command();
        cmd.arg("-framerate")
            .arg(framerate.to_string())
            .arg("-f")
            .arg("image2pipe")
            .arg("-vcodec")
            .arg(input_codec_for(images))
            .arg("-i")
            .arg("-")
            .arg("-c:v")
            .arg("libx264")
            .arg("-profile:v")
            .arg("main")
            .arg("-level:v")
            .arg("4.1")
            .arg("-preset")
            .arg("medium")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg(dest);
        self.finish(cmd, dest, Some(images))
    }

    fn concat_videos(&self, chunks: &[PathBuf], scratch_dir: &Path, dest: &Path) -> Result<()> {
        let manifest = write_concat_manifest(scratch_dir, chunks)?;
        let mut cmd = self.base_command();
        cmd.arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(&manifest)
            .arg("-c")
            .arg("copy")
            .arg(dest);
        self.finish(cmd, dest, None)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_lists_chunks_in_order_and_escapes_quotes() {
        let tmp = tempfile::tempdir().unwrap();
        let chunks = vec![
            PathBuf::from("/t/2024-03-05_1.mp4"),
            PathBuf::from("/t/it's_2.mp4"),
        ];
        let manifest = write_concat_manifest(tmp.path(), &chunks).unwrap();
        assert_eq!(
            fs::read_to_string(manifest).unwrap(),
            "file '/t/2024-03-05_1.mp4'\nfile '/t/it'\\''s_2.mp4'\n"
        );
    }

    #[test]
    fn input_codec_follows_image_type() {
        assert_eq!(input_codec_for(&[PathBuf::from("a.png")]), "png");
        assert_eq!(input_codec_for(&[PathBuf::from("a.jpg")]), "mjpeg");
    }

    #[test]
    fn configured_binary_must_exist() {
        let err = resolve_ffmpeg_bin(Some(Path::new("/no/such/ffmpeg"))).unwrap_err();
        assert!(err.to_string().contains("FFMPEG_BIN"));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ffmpeg");
        fs::write(&path, body).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_an_encode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(tmp.path(), "#!/bin/sh\ncat >/dev/null\necho 'codec exploded' >&2\nexit 3\n");
        let image = tmp.path().join("a.jpg");
        fs::write(&image, b"jpeg").unwrap();

        let encoder = FfmpegEncoder::new(bin, None);
        let err = encoder
            .encode_images(&[image], 30, &tmp.path().join("out.mp4"))
            .unwrap_err();
        match err.downcast_ref::<MeyemError>() {
            Some(MeyemError::Encode { reason, .. }) => assert!(reason.contains("codec exploded")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn images_are_streamed_to_stdin_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(
            tmp.path(),
            "#!/bin/sh\nfor last; do :; done\ncat > \"$last\"\n",
        );
        let a = tmp.path().join("a.jpg");
        let b = tmp.path().join("b.jpg");
        fs::write(&a, b"AAA").unwrap();
        fs::write(&b, b"BBB").unwrap();
        let out = tmp.path().join("out.mp4");

        FfmpegEncoder::new(bin, Some(30))
            .encode_images(&[a, b], 30, &out)
            .unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"AAABBB");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_covers_an_encoder_that_never_reads_stdin() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = script(tmp.path(), "#!/bin/sh\nexec sleep 8\n");
        let image = tmp.path().join("big.jpg");
        fs::write(&image, vec![0u8; 1024 * 1024]).unwrap();

        let started = std::time::Instant::now();
        let err = FfmpegEncoder::new(bin, Some(1))
            .encode_images(&[image], 30, &tmp.path().join("out.mp4"))
            .unwrap_err();
        assert!(started.elapsed() < std::time::Duration::from_secs(6));
        match err.downcast_ref::<MeyemError>() {
            Some(MeyemError::Encode { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
