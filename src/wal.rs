use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// No single event comes close to this.
const MAX_ENTRY_BYTES: usize = 16 * 1024 * 1024;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only write-ahead log of [`Event`]s.
///
/// Each entry is `[u32 len][bincode Event][u32 crc32]`, little endian, where
/// `len` counts the payload only. Replay stops at the first entry that is
/// short, fails its checksum or does not decode.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one event and fsync. The engine batches with `append_buffered`
    /// and `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Append a single event to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered events.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Return the WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to `<wal>.wal.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the WAL and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Both compaction phases in one call.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid events.
    /// A truncated or corrupt tail is discarded with a warning.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let (events, damage) = read_entries(BufReader::new(file))?;
        if let Some(damage) = damage {
            let last = events.last();
            warn!(
                path = %path.display(),
                offset = damage.offset,
                reason = damage.reason,
                valid = events.len(),
                last_event = last.map(Event::kind).unwrap_or("none"),
                last_day = ?last.and_then(Event::day),
                "WAL tail discarded, schedule restored up to the last intact event"
            );
        }
        Ok(events)
    }
}

/// Where and why replay stopped before the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TailDamage {
    /// Byte offset of the first discarded entry.
    offset: u64,
    reason: &'static str,
}

fn read_entries(mut reader: impl Read) -> io::Result<(Vec<Event>, Option<TailDamage>)> {
    let mut events = Vec::new();
    let mut offset = 0u64;

    loop {
        let damage = |reason| Some(TailDamage { offset, reason });

        let mut len_buf = [0u8; 4];
        match read_full(&mut reader, &mut len_buf)? {
            0 => return Ok((events, None)),
            4 => {}
            _ => return Ok((events, damage("torn length prefix"))),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_ENTRY_BYTES {
            return Ok((events, damage("entry length out of range")));
        }

        let mut payload = vec![0u8; len];
        if read_full(&mut reader, &mut payload)? < len {
            return Ok((events, damage("torn payload")));
        }
        let mut crc_buf = [0u8; 4];
        if read_full(&mut reader, &mut crc_buf)? < 4 {
            return Ok((events, damage("torn checksum")));
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            return Ok((events, damage("checksum mismatch")));
        }

        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(_) => return Ok((events, damage("undecodable entry"))),
        }
        offset += 8 + len as u64;
    }
}

/// Fill `buf` as far as the reader allows, returning the bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
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
