//! Segment file handling: naming, positional I/O and allocation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use seqlog_core::error::{Error, Result, ResultExt};

use crate::codec::{encode_fresh_header, today, SegmentLayout, EMPTY_SEGMENT_EXT, SEGMENT_EXT};

const ZERO_CHUNK: usize = 64 << 10;

pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.{}", id, SEGMENT_EXT))
}

pub fn empty_segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.{}", id, EMPTY_SEGMENT_EXT))
}

/// Segment files in `dir` as `(id, path)`, ascending by id. Files whose name
/// is not `<integer>.dat` are ignored.
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("read directory {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() || path.extension() != Some(std::ffi::OsStr::new(SEGMENT_EXT)) {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            segments.push((id, path));
        }
    }

    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

/// The base directory must exist and be a directory.
pub fn check_dir(dir: &Path) -> Result<()> {
    let meta = fs::metadata(dir).with_context(|| format!("stat directory {}", dir.display()))?;
    if !meta.is_dir() {
        return Err(Error::Configuration {
            message: format!("{} should be a directory", dir.display()),
        });
    }
    Ok(())
}

pub fn open_read(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("open file {} for reading", path.display()))
}

pub fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open file {} for writing", path.display()))
}

#[cfg(unix)]
pub fn read_exact_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, pos)
}

#[cfg(unix)]
pub fn write_all_at(file: &File, buf: &[u8], pos: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, pos)
}

#[cfg(windows)]
pub fn read_exact_at(file: &File, mut buf: &mut [u8], mut pos: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, pos) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => {
                buf = &mut buf[n..];
                pos += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
pub fn write_all_at(file: &File, mut buf: &[u8], mut pos: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, pos) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf = &buf[n..];
                pos += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Allocate a zero-filled, dated segment at `path`. Leaves an existing file
/// alone. The caller decides whether the file is a pre-allocated `.emp` or
/// goes straight into service.
pub fn create_empty_segment(path: &Path, layout: &SegmentLayout) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("create file {}", path.display()))?;

    let result = fill_segment(&file, path, layout);
    if result.is_err() {
        drop(file);
        let _ = fs::remove_file(path);
    }
    result
}

fn fill_segment(file: &File, path: &Path, layout: &SegmentLayout) -> Result<()> {
    let mut writer = BufWriter::with_capacity(ZERO_CHUNK, file);
    let mut chunk = vec![0u8; ZERO_CHUNK];
    let header = encode_fresh_header(today());
    let mut remaining = layout.segment_size;
    let mut first = true;
    while remaining > 0 {
        let n = remaining.min(ZERO_CHUNK as u64) as usize;
        if first {
            // header rides in the first chunk so a full-size file is always dated
            let h = header.len().min(n);
            chunk[..h].copy_from_slice(&header[..h]);
        }
        writer
            .write_all(&chunk[..n])
            .with_context(|| format!("write zero into file {}", path.display()))?;
        if first {
            chunk.fill(0);
            first = false;
        }
        remaining -= n as u64;
    }
    writer
        .flush()
        .with_context(|| format!("write zero into file {}", path.display()))?;
    drop(writer);

    file.sync_all()
        .with_context(|| format!("sync file {}", path.display()))?;

    debug!("Allocated segment file {:?} ({} bytes)", path, layout.segment_size);
    Ok(())
}

/// A pre-allocated file is usable only if it reached its full size.
pub fn is_complete_segment(path: &Path, layout: &SegmentLayout) -> bool {
    fs::metadata(path)
        .map(|m| m.len() == layout.segment_size)
        .unwrap_or(false)
}

pub fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)
        .with_context(|| format!("rename {} to {}", from.display(), to.display()))
}
