use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Written once at the start of every log file.
const MAGIC: [u8; 4] = *b"LDW1";
/// Larger length prefixes can only come from corruption.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

fn encode_record<R: Serialize>(writer: &mut impl Write, record: &R) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

fn open_for_append(path: &Path) -> io::Result<File> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        file.write_all(&MAGIC)?;
        file.sync_all()?;
    }
    Ok(file)
}

/// Fill `buf` as far as the file allows; returns the byte count read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Result of reading a log back from disk.
#[derive(Debug)]
pub struct Replay<R> {
    pub records: Vec<R>,
    /// A torn or corrupt tail was found and ignored.
    pub discarded_tail: bool,
}

/// Append-only write-ahead log of serde records.
///
/// File: `MAGIC` then entries of `[u32: len][bincode: record][u32: crc32]`.
/// A truncated or corrupt trailing entry (crash mid-write) is dropped on replay.
pub struct Wal<R> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn(R)>,
}

impl<R: Serialize + DeserializeOwned> Wal<R> {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(open_for_append(path)?),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        })
    }

    /// Append and fsync a single record.
    #[cfg(test)]
    pub fn append(&mut self, record: &R) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without syncing. `flush_sync()` commits the batch.
    pub fn append_buffered(&mut self, record: &R) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot to the temp file next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, records: &[R]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(&MAGIC)?;
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Replace the log at `path` with exactly `records`. Used before opening
    /// a log whose tail was torn, so new appends are not hidden behind it.
    pub fn rewrite(path: &Path, records: &[R]) -> io::Result<()> {
        Self::write_compact_file(path, records)?;
        fs::rename(path.with_extension("wal.tmp"), path)
    }

    /// Rename the temp snapshot over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        self.writer = BufWriter::new(open_for_append(&self.path)?);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[R]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every valid record. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Replay<R>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay { records: Vec::new(), discarded_tail: false });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        let mut magic = [0u8; 4];
        match reader.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(Replay { records, discarded_tail: false });
            }
            Err(e) => return Err(e),
        }
        if magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a labdesk WAL", path.display()),
            ));
        }

        let discarded_tail = loop {
            let mut len_buf = [0u8; 4];
            match read_up_to(&mut reader, &mut len_buf)? {
                0 => break false,
                4 => {}
                _ => break true,
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                break true;
            }

            let mut payload = vec![0u8; len];
            if read_up_to(&mut reader, &mut payload)? < len {
                break true;
            }
            let mut crc_buf = [0u8; 4];
            if read_up_to(&mut reader, &mut crc_buf)? < 4 {
                break true;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break true;
            }

            match bincode::deserialize::<R>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break true,
            }
        };

        Ok(Replay { records, discarded_tail })
    }
}
