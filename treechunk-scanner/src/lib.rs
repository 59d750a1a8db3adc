/*!
A sparse-file scanner: walks a file as an alternating sequence of data and
hole sections using the `SEEK_DATA`/`SEEK_HOLE` extension to `lseek(2)`,
without ever materialising hole bytes by reading them from the kernel.

Given a seekable file, [`HoleReader::open`] determines the mode (data or
hole) at offset 0, and [`HoleReader::next_section`] walks forward section
by section. Each [`Section`] is either a [`DataSection`], whose `read`
pulls real bytes off the file, or a [`HoleSection`], whose `read` and
`skip` synthesise zeros and advance the logical offset without touching
the file descriptor at all -- the filesystem already told us this region
has no data to read. A non-seekable input (a pipe, a named FIFO) is
treated as one large data section of unknown length; this crate does not
attempt to detect holes in it.
*/
#![warn(clippy::all)]

mod error;

pub use error::ScanError;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub type Result<T> = std::result::Result<T, ScanError>;

/// Walks a file's data/hole layout, handing out [`Section`]s in order.
///
/// Holds one file descriptor for its lifetime. Not `Sync`; a single
/// `HoleReader` is meant to be driven by one writer loop.
pub struct HoleReader {
    file: File,
    offset: u64,
    eof: bool,
    seekable: bool,
    size: Option<u64>,
    in_data: bool,
}

impl HoleReader {
    /// Opens `path` read-only and detects whether it supports seeking and,
    /// if so, whether byte 0 falls in a data region or a hole.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<HoleReader> {
        let file = File::open(path)?;
        let seekable = match lseek_raw(&file, 0, libc::SEEK_SET) {
            Ok(_) => true,
            Err(err) if err.raw_os_error() == Some(libc::ESPIPE) => false,
            Err(err) => return Err(err.into()),
        };
        let size = if seekable { Some(file.metadata()?.len()) } else { None };

        let mut reader = HoleReader {
            file,
            offset: 0,
            eof: false,
            seekable,
            size,
            in_data: true,
        };
        reader.detect_initial_mode();
        Ok(reader)
    }

    pub fn seekable(&self) -> bool {
        self.seekable
    }

    /// The file's size, known only for seekable inputs.
    pub fn total_size(&self) -> Option<u64> {
        self.size
    }

    fn detect_initial_mode(&mut self) {
        if !self.seekable {
            self.in_data = true;
            return;
        }
        // A file that is one giant hole fails this probe (ENXIO, "no data
        // past this offset"); `in_data` is left false, the sole hole
        // section spans the whole file.
        self.in_data = matches!(lseek_raw(&self.file, 0, libc::SEEK_DATA), Ok(0));
    }

    /// Byte length of the section starting at the current offset, or
    /// `None` for a non-seekable stream (whose single section has
    /// unknown length and is drained by reading until EOF).
    fn detect_section_size(&mut self) -> Result<Option<u64>> {
        if !self.seekable {
            return Ok(None);
        }
        let whence = if self.in_data { libc::SEEK_HOLE } else { libc::SEEK_DATA };
        let next_cut = match lseek_raw(&self.file, self.offset as i64, whence) {
            Ok(cut) => cut as u64,
            // No further transition of this kind: the section runs to EOF.
            Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                self.size.expect("seekable files always have a known size")
            }
            Err(err) => return Err(err.into()),
        };
        // The probe above moved the real file position; put it back so a
        // subsequent data read starts exactly where we think we are.
        self.file.seek(SeekFrom::Start(self.offset))?;
        Ok(Some(next_cut - self.offset))
    }

    fn advance(&mut self, n: u64) {
        self.offset += n;
        if let Some(size) = self.size {
            if self.offset >= size {
                self.eof = true;
            }
        }
    }

    fn read_raw(&mut self, max: usize) -> Result<Vec<u8>> {
        if self.eof {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; max];
        let n = self.file.read(&mut buf)?;
        buf.truncate(n);
        self.advance(n as u64);
        if n == 0 {
            self.eof = true;
        }
        Ok(buf)
    }

    /// Returns the next section, or `None` once the file is exhausted.
    /// Callers must fully read or skip a section before requesting the
    /// next one -- `detect_section_size` trusts the logical offset to
    /// reflect what was actually consumed, so an unread tail is silently
    /// skipped rather than re-surfaced.
    pub fn next_section(&mut self) -> Result<Option<Section<'_>>> {
        if self.eof {
            return Ok(None);
        }
        let size = self.detect_section_size()?;
        let in_data = self.in_data;
        self.in_data = !self.in_data;
        Ok(Some(if in_data {
            Section::Data(DataSection {
                reader: self,
                remaining: size,
            })
        } else {
            Section::Hole(HoleSection {
                reader: self,
                remaining: size.unwrap_or(0),
            })
        }))
    }
}

fn lseek_raw(file: &File, offset: i64, whence: i32) -> io::Result<i64> {
    let result = unsafe { libc::lseek(file.as_raw_fd(), offset, whence) };
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

/// One contiguous data or hole region of the scanned file.
pub enum Section<'a> {
    Data(DataSection<'a>),
    Hole(HoleSection<'a>),
}

impl<'a> Section<'a> {
    pub fn all_zero(&self) -> bool {
        matches!(self, Section::Hole(_))
    }
}

/// A run of real file bytes. `read` pulls up to `max` bytes off the file
/// and advances; for a non-seekable source (`remaining == None`) it reads
/// directly, with no length tracked ahead of time.
pub struct DataSection<'a> {
    reader: &'a mut HoleReader,
    remaining: Option<u64>,
}

impl<'a> DataSection<'a> {
    pub fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let cap = match self.remaining {
            Some(r) => max.min(r as usize),
            None => max,
        };
        if cap == 0 {
            return Ok(Vec::new());
        }
        let buf = self.reader.read_raw(cap)?;
        if let Some(r) = self.remaining.as_mut() {
            *r -= buf.len() as u64;
        }
        Ok(buf)
    }
}

/// A run of sparse file with no backing data. Bytes are synthesised as
/// zeros, never read from the kernel.
pub struct HoleSection<'a> {
    reader: &'a mut HoleReader,
    remaining: u64,
}

impl<'a> HoleSection<'a> {
    /// Returns up to `max` zero bytes and advances the logical offset by
    /// that amount.
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        let read_size = max.min(self.remaining as usize);
        if read_size == 0 {
            return Vec::new();
        }
        self.reader.advance(read_size as u64);
        self.remaining -= read_size as u64;
        vec![0u8; read_size]
    }

    /// Advances past the entire remaining hole without reading anything,
    /// returning how many bytes were skipped.
    pub fn skip(&mut self) -> u64 {
        let skipped = self.remaining;
        self.reader.advance(skipped);
        self.remaining = 0;
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Builds a sparse file: `pre` zero bytes (a hole, via `set_len`),
    /// then `data`, then `post` zero bytes (another hole).
    fn sparse_file(pre: u64, data: &[u8], post: u64) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.as_file().set_len(pre + data.len() as u64 + post).unwrap();
        f.as_file_mut().seek(SeekFrom::Start(pre)).unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        f
    }

    fn drain_all(reader: &mut HoleReader) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(section) = reader.next_section().unwrap() {
            match section {
                Section::Data(mut d) => loop {
                    let buf = d.read(4096).unwrap();
                    if buf.is_empty() {
                        break;
                    }
                    out.extend_from_slice(&buf);
                },
                Section::Hole(mut h) => {
                    let skipped = h.skip();
                    out.resize(out.len() + skipped as usize, 0);
                }
            }
        }
        out
    }

    #[test]
    fn reads_data_hole_data_as_a_contiguous_stream() {
        let f = sparse_file(1 << 20, b"middle data", 1 << 20);
        let mut reader = HoleReader::open(f.path()).unwrap();
        assert!(reader.seekable());
        let out = drain_all(&mut reader);

        let mut expected = vec![0u8; 1 << 20];
        expected.extend_from_slice(b"middle data");
        expected.resize(expected.len() + (1 << 20), 0);
        assert_eq!(out, expected);
    }

    #[test]
    fn all_hole_file_is_one_hole_section() {
        let f = sparse_file(1 << 20, b"", 0);
        let mut reader = HoleReader::open(f.path()).unwrap();
        let mut sections = 0;
        while let Some(section) = reader.next_section().unwrap() {
            assert!(section.all_zero());
            sections += 1;
            match section {
                Section::Hole(mut h) => {
                    assert_eq!(h.skip(), 1 << 20);
                }
                Section::Data(_) => unreachable!(),
            }
        }
        assert_eq!(sections, 1);
    }

    #[test]
    fn hole_read_returns_zeros_without_touching_the_file() {
        let f = sparse_file(8192, b"", 0);
        let mut reader = HoleReader::open(f.path()).unwrap();
        let section = reader.next_section().unwrap().unwrap();
        match section {
            Section::Hole(mut h) => {
                let first = h.read(100);
                assert_eq!(first, vec![0u8; 100]);
                let rest = h.skip();
                assert_eq!(rest, 8192 - 100);
            }
            Section::Data(_) => unreachable!(),
        }
        assert!(reader.next_section().unwrap().is_none());
    }
}
