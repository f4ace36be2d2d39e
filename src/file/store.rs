//! Record-file primitives. Callers hold the queue's lock marker.
//!
//! Files only ever change by whole-line appends or by writing a complete
//! replacement next to the original and renaming it into place.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// All complete lines of `path`; a missing file reads as empty.
///
/// A final fragment without a newline is an append that was cut short by a
/// crash. It is skipped here and dropped by the next rewrite.
pub(crate) fn read_lines(path: &Path) -> Result<Vec<String>> {
    let mut contents = String::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_string(&mut contents).map_err(|err| {
                if err.kind() == ErrorKind::InvalidData {
                    Error::Corrupt("record file is not utf-8")
                } else {
                    Error::Io(err)
                }
            })?;
        }
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    }

    let complete = contents.rfind('\n').map_or("", |end| &contents[..=end]);
    if complete.len() < contents.len() {
        log::warn!("{}: ignoring torn trailing record", path.display());
    }
    Ok(complete.split_terminator('\n').map(str::to_owned).collect())
}

/// Replaces `path` with exactly `lines`, via a temp file and a rename.
pub(crate) fn rewrite<'a>(
    path: &Path,
    lines: impl IntoIterator<Item = &'a str>,
    sync: bool,
) -> Result<()> {
    let tmp_path = temp_path(path);
    match fs::remove_file(&tmp_path) {
        Ok(()) => log::debug!("removed orphaned {}", tmp_path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    if sync {
        file.sync_all()?;
    }
    drop(file);
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Appends one record with a single write.
pub(crate) fn append_line(path: &Path, line: &str, sync: bool) -> Result<()> {
    if has_torn_tail(path)? {
        let lines = read_lines(path)?;
        rewrite(path, lines.iter().map(String::as_str), sync)?;
    }

    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    record.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(record.as_bytes())?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

pub(crate) fn count_lines(path: &Path) -> Result<usize> {
    Ok(read_lines(path)?.len())
}

fn has_torn_tail(path: &Path) -> Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
