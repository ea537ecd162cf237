use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Bytes of framing around each payload: length prefix + CRC suffix.
const FRAME_OVERHEAD: u64 = 8;

/// No real event comes close; a larger length prefix is garbage.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode a single event as `[len][bincode][crc32]`. Returns the frame length.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(len as u64 + FRAME_OVERHEAD)
}

/// Read one record. `Ok(None)` marks the end of the valid prefix: clean EOF,
/// a torn frame, a CRC mismatch or an undecodable payload.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_frame_part(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_frame_part(reader, &mut payload)? {
        return Ok(None);
    }

    let mut crc_buf = [0u8; 4];
    if !read_frame_part(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, len as u64 + FRAME_OVERHEAD))),
        Err(_) => Ok(None),
    }
}

fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of reading a log from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Length of the valid prefix in bytes.
    pub valid_len: u64,
    /// Bytes after the valid prefix (torn or corrupt tail).
    pub discarded_bytes: u64,
}

/// Append-only write-ahead log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little-endian.
/// A torn or corrupt tail is cut off when the log is opened, so appends always
/// land directly after the last valid record.
///
/// Appends are buffered until `flush_sync`. If an append or flush fails, the
/// buffer is discarded and the file is cut back to its last durable length, so a
/// failed batch can never become durable with a later one. If even that fails
/// the log refuses writes until it is reopened.
pub struct Wal {
    /// `None` once a rollback failed.
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    committed_len: u64,
    pending_len: u64,
    pending_appends: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay the log at `path`, truncate any invalid tail, and open it for appending.
    pub fn open(path: &Path) -> io::Result<(Self, Replay)> {
        let replay = Self::replay(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        if replay.discarded_bytes > 0 {
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            committed_len: replay.valid_len,
            pending_len: 0,
            pending_appends: 0,
            appends_since_compact: 0,
        };
        Ok((wal, replay))
    }

    /// Read every valid record. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        while let Some((event, frame_len)) = decode_record(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += frame_len;
        }
        replay.discarded_bytes = total_len - replay.valid_len;
        Ok(replay)
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("WAL refused writes after a failed rollback"))
    }

    /// Buffer one record without flushing. Pair with `flush_sync` to commit a batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let encoded = encode_record(self.writer()?, event);
        match encoded {
            Ok(frame_len) => {
                self.pending_len += frame_len;
                self.pending_appends += 1;
                Ok(())
            }
            Err(e) => {
                self.roll_back();
                Err(e)
            }
        }
    }

    /// Flush the buffer and fsync the file. On error the whole pending batch is
    /// rolled back.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        let writer = self.writer()?;
        let synced = writer.flush().and_then(|()| writer.get_ref().sync_all());
        match synced {
            Ok(()) => {
                self.committed_len += self.pending_len;
                self.appends_since_compact += self.pending_appends;
                self.pending_len = 0;
                self.pending_appends = 0;
                Ok(())
            }
            Err(e) => {
                self.roll_back();
                Err(e)
            }
        }
    }

    /// Durable appends since open or the last rewrite.
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Drop everything after the last durable record, buffered or on disk.
    fn roll_back(&mut self) {
        self.pending_len = 0;
        self.pending_appends = 0;
        if let Some(stale) = self.writer.take() {
            // Discard, do not flush.
            let _ = stale.into_parts();
        }
        let reopened = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|file| {
                file.set_len(self.committed_len)?;
                file.sync_all()?;
                Ok(file)
            });
        match reopened {
            Ok(file) => self.writer = Some(BufWriter::new(file)),
            Err(e) => tracing::error!(
                "WAL rollback of {} failed, refusing further writes: {e}",
                self.path.display()
            ),
        }
    }

    /// Replace the log with `events`: write a sibling temp file, fsync it, rename it
    /// over the log and reopen for appending.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut new_len = 0;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                new_len += encode_record(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        // Anything still buffered belongs to the old file and is superseded.
        if let Some(stale) = self.writer.take() {
            let _ = stale.into_parts();
        }
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        self.committed_len = new_len;
        self.pending_len = 0;
        self.pending_appends = 0;
        self.appends_since_compact = 0;
        Ok(())
    }
}
