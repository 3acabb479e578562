//! Durable backlog ledger
//!
//! Text file, one entry per line as `<tick_ms>,<json record>`, preceded by
//! a header line written when the file is created. New entries are only
//! ever appended. A replay pass streams the ledger and collects the entries
//! it could not deliver in a scratch file, which then replaces the ledger:
//!
//! 1. retained lines are appended to [`SCRATCH_FILE`] (header first)
//! 2. a [`COMMIT_MARK`] line seals the scratch file
//! 3. the ledger is removed, the scratch file copied over it and removed
//!
//! A power loss between 2 and 3 is finished by [`Ledger::recover`]; an
//! unsealed scratch file is discarded and the ledger is left untouched.

use alloc::format;
use alloc::vec::Vec;

use envnode_hal::FileStore;

use super::record::DeliveryRecord;

pub const LEDGER_FILE: &str = "backlog.csv";
pub const SCRATCH_FILE: &str = "backlog.tmp";
pub const HEADER: &str = "ticks_ms,json\n";
/// Lines starting with `#` are ignored by readers
pub const COMMIT_MARK: &str = "#commit\n";
pub const MAX_LINE_LEN: usize = 512;

const CHUNK_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedgerError<E> {
    Storage(E),
    /// Record could not be encoded within [`MAX_LINE_LEN`]
    Encode,
}

impl<E> From<E> for LedgerError<E> {
    fn from(e: E) -> Self {
        Self::Storage(e)
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for LedgerError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "Backlog storage error: {:?}", e),
            Self::Encode => write!(f, "Backlog record could not be encoded"),
        }
    }
}

impl<E: core::fmt::Debug> core::error::Error for LedgerError<E> {}

/// Why a ledger line was unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineError {
    MissingSeparator,
    BadTick,
    BadRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacklogEntry {
    pub tick_ms: u64,
    pub record: DeliveryRecord,
}

/// A ledger line as stored, with its parse result
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub line: Vec<u8>,
    pub parsed: Result<BacklogEntry, LineError>,
}

pub fn encode_line(tick_ms: u64, record: &DeliveryRecord) -> Option<Vec<u8>> {
    let json = serde_json::to_string(record).ok()?;
    let line = format!("{},{}\n", tick_ms, json);
    (line.len() <= MAX_LINE_LEN).then(|| line.into_bytes())
}

pub fn parse_line(line: &[u8]) -> Result<BacklogEntry, LineError> {
    let comma = line
        .iter()
        .position(|&b| b == b',')
        .ok_or(LineError::MissingSeparator)?;
    let tick_ms = core::str::from_utf8(&line[..comma])
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or(LineError::BadTick)?;
    let record =
        serde_json::from_slice(&line[comma + 1..]).map_err(|_| LineError::BadRecord)?;
    Ok(BacklogEntry { tick_ms, record })
}

pub struct Ledger<'a, S> {
    store: &'a S,
}

impl<'a, S: FileStore> Ledger<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn exists(&self) -> Result<bool, S::Error> {
        self.store.exists(LEDGER_FILE)
    }

    /// Append one entry, creating the ledger with its header if needed
    pub fn append(&self, tick_ms: u64, record: &DeliveryRecord) -> Result<(), LedgerError<S::Error>> {
        let line = encode_line(tick_ms, record).ok_or(LedgerError::Encode)?;
        if !self.exists()? {
            self.store.append(LEDGER_FILE, HEADER.as_bytes())?;
        }
        self.store.append(LEDGER_FILE, &line)?;
        Ok(())
    }

    pub fn reader(&self) -> LineReader<'a, S> {
        LineReader::new(self.store, LEDGER_FILE)
    }

    /// Start collecting retained lines, discarding any leftover scratch
    pub fn rewrite(&self) -> Result<Rewrite<'a, S>, S::Error> {
        if self.store.exists(SCRATCH_FILE)? {
            self.store.remove(SCRATCH_FILE)?;
        }
        Ok(Rewrite {
            store: self.store,
            retained: 0,
        })
    }

    /// Finish or discard a rewrite interrupted by a restart
    pub fn recover(&self) -> Result<(), S::Error> {
        if !self.store.exists(SCRATCH_FILE)? {
            return Ok(());
        }
        if is_sealed(self.store)? {
            warn!("Completing interrupted backlog rewrite");
            commit(self.store)
        } else {
            warn!("Discarding unsealed backlog scratch file");
            self.store.remove(SCRATCH_FILE)
        }
    }
}

/// Retained lines of a replay pass
pub struct Rewrite<'a, S> {
    store: &'a S,
    retained: usize,
}

impl<S: FileStore> Rewrite<'_, S> {
    pub fn retain(&mut self, line: &[u8]) -> Result<(), S::Error> {
        if self.retained == 0 {
            self.store.write(SCRATCH_FILE, HEADER.as_bytes())?;
        }
        self.store.append(SCRATCH_FILE, line)?;
        self.store.append(SCRATCH_FILE, b"\n")?;
        self.retained += 1;
        Ok(())
    }

    pub fn retained(&self) -> usize {
        self.retained
    }

    /// Replace the ledger with the retained lines, or delete it when
    /// nothing was retained
    pub fn finish(self) -> Result<usize, S::Error> {
        if self.retained == 0 {
            if self.store.exists(LEDGER_FILE)? {
                self.store.remove(LEDGER_FILE)?;
            }
            return Ok(0);
        }
        self.store.append(SCRATCH_FILE, COMMIT_MARK.as_bytes())?;
        commit(self.store)?;
        Ok(self.retained)
    }
}

fn commit<S: FileStore>(store: &S) -> Result<(), S::Error> {
    if store.exists(LEDGER_FILE)? {
        store.remove(LEDGER_FILE)?;
    }
    let mut chunk = [0u8; CHUNK_LEN];
    let mut offset = 0u32;
    loop {
        let n = store.read_at(SCRATCH_FILE, offset, &mut chunk)?;
        if n == 0 {
            break;
        }
        store.append(LEDGER_FILE, &chunk[..n])?;
        offset += n as u32;
    }
    store.remove(SCRATCH_FILE)
}

fn is_sealed<S: FileStore>(store: &S) -> Result<bool, S::Error> {
    let mut reader = LineReader::new(store, SCRATCH_FILE);
    let mut last_marker = false;
    while let Some(line) = reader.next_line()? {
        last_marker = line == COMMIT_MARK.trim_end().as_bytes();
    }
    Ok(last_marker)
}

/// Streams a file line by line in fixed-size chunks
pub struct LineReader<'a, S> {
    store: &'a S,
    name: &'static str,
    offset: u32,
    pending: Vec<u8>,
    skipping: bool,
    eof: bool,
}

impl<'a, S: FileStore> LineReader<'a, S> {
    fn new(store: &'a S, name: &'static str) -> Self {
        Self {
            store,
            name,
            offset: 0,
            pending: Vec::new(),
            skipping: false,
            eof: false,
        }
    }

    /// Next line without its terminator. Lines longer than
    /// [`MAX_LINE_LEN`] are skipped.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>, S::Error> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if self.skipping {
                    self.skipping = false;
                    continue;
                }
                return Ok(Some(line));
            }

            if self.pending.len() > MAX_LINE_LEN {
                if !self.skipping {
                    error!("Backlog line over {} bytes dropped", MAX_LINE_LEN);
                }
                self.skipping = true;
                self.pending.clear();
            }

            if self.eof {
                if self.skipping || self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(core::mem::take(&mut self.pending)));
            }

            let mut chunk = [0u8; CHUNK_LEN];
            let n = self.store.read_at(self.name, self.offset, &mut chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.offset += n as u32;
                self.pending.extend_from_slice(&chunk[..n]);
            }
        }
    }

    /// Next entry line, skipping the header, blank and `#` lines
    pub fn next_entry(&mut self) -> Result<Option<RawEntry>, S::Error> {
        while let Some(line) = self.next_line()? {
            if line.is_empty()
                || line.first() == Some(&b'#')
                || line == HEADER.trim_end().as_bytes()
            {
                continue;
            }
            let parsed = parse_line(&line);
            return Ok(Some(RawEntry { line, parsed }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::record::ChannelRef;
    use crate::mock::MemStore;
    use alloc::string::ToString;
    use alloc::vec;

    fn record(pin: u8) -> DeliveryRecord {
        DeliveryRecord {
            mac: "02:00:00:00:00:01".to_string(),
            pin: ChannelRef::Channel(pin),
            avg_temp: Some(21.5),
            avg_hum: Some(48.0),
            max_temp: Some(22.0),
            min_temp: Some(21.0),
            max_hum: None,
            min_hum: None,
            timestamp: None,
        }
    }

    fn drain(store: &MemStore) -> Vec<RawEntry> {
        let ledger = Ledger::new(store);
        let mut reader = ledger.reader();
        let mut out = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_append_writes_header_once() {
        let store = MemStore::default();
        let ledger = Ledger::new(&store);
        ledger.append(1_000, &record(25)).unwrap();
        ledger.append(2_000, &record(26)).unwrap();

        let text = store.text(LEDGER_FILE).unwrap();
        assert!(text.starts_with(HEADER));
        assert_eq!(text.matches("ticks_ms").count(), 1);
        assert_eq!(text.lines().count(), 3);

        let entries = drain(&store);
        let ticks: Vec<u64> = entries
            .iter()
            .map(|e| e.parsed.as_ref().unwrap().tick_ms)
            .collect();
        assert_eq!(ticks, vec![1_000, 2_000]);
        assert_eq!(entries[1].parsed.as_ref().unwrap().record, record(26));
    }

    #[test]
    fn test_long_ledger_streams_across_chunks() {
        let store = MemStore::default();
        let ledger = Ledger::new(&store);
        for i in 0..40u64 {
            ledger.append(i * 1_000, &record(i as u8)).unwrap();
        }
        let entries = drain(&store);
        assert_eq!(entries.len(), 40);
        assert!(entries.iter().all(|e| e.parsed.is_ok()));
    }

    #[test]
    fn test_corrupt_lines_reported() {
        let store = MemStore::default();
        let good = encode_line(5_000, &record(25)).unwrap();
        let mut data = HEADER.as_bytes().to_vec();
        data.extend_from_slice(b"garbage\n");
        data.extend_from_slice(b"abc,{}\n");
        data.extend_from_slice(b"7000,{\"mac\":\n");
        data.extend_from_slice(&good);
        data.extend_from_slice(b"9000,{\"mac\":\"x\",\"pin\"");
        store.put(LEDGER_FILE, &data);

        let parsed: Vec<Result<u64, LineError>> = drain(&store)
            .into_iter()
            .map(|e| e.parsed.map(|p| p.tick_ms))
            .collect();
        assert_eq!(
            parsed,
            vec![
                Err(LineError::MissingSeparator),
                Err(LineError::BadTick),
                Err(LineError::BadRecord),
                Ok(5_000),
                Err(LineError::BadRecord),
            ]
        );
    }

    #[test]
    fn test_oversized_line_skipped() {
        let store = MemStore::default();
        let mut data = HEADER.as_bytes().to_vec();
        data.extend_from_slice(&[b'x'; MAX_LINE_LEN * 2]);
        data.push(b'\n');
        data.extend_from_slice(&encode_line(1, &record(25)).unwrap());
        store.put(LEDGER_FILE, &data);

        let entries = drain(&store);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].parsed.as_ref().unwrap().tick_ms, 1);
    }

    #[test]
    fn test_rewrite_keeps_retained_in_order() {
        let store = MemStore::default();
        let ledger = Ledger::new(&store);
        for tick in [1, 2, 3, 4] {
            ledger.append(tick, &record(25)).unwrap();
        }

        let mut reader = ledger.reader();
        let mut rewrite = ledger.rewrite().unwrap();
        while let Some(entry) = reader.next_entry().unwrap() {
            if entry.parsed.as_ref().unwrap().tick_ms % 2 == 0 {
                rewrite.retain(&entry.line).unwrap();
            }
        }
        assert_eq!(rewrite.finish().unwrap(), 2);

        assert!(!store.exists(SCRATCH_FILE).unwrap());
        let ticks: Vec<u64> = drain(&store)
            .iter()
            .map(|e| e.parsed.as_ref().unwrap().tick_ms)
            .collect();
        assert_eq!(ticks, vec![2, 4]);
        assert!(store.text(LEDGER_FILE).unwrap().starts_with(HEADER));
    }

    #[test]
    fn test_rewrite_without_retained_removes_ledger() {
        let store = MemStore::default();
        let ledger = Ledger::new(&store);
        ledger.append(1, &record(25)).unwrap();

        let rewrite = ledger.rewrite().unwrap();
        assert_eq!(rewrite.finish().unwrap(), 0);
        assert!(!ledger.exists().unwrap());
    }

    #[test]
    fn test_recover_sealed_scratch() {
        let store = MemStore::default();
        let mut scratch = HEADER.as_bytes().to_vec();
        scratch.extend_from_slice(&encode_line(42, &record(25)).unwrap());
        scratch.extend_from_slice(COMMIT_MARK.as_bytes());
        store.put(SCRATCH_FILE, &scratch);

        let ledger = Ledger::new(&store);
        ledger.recover().unwrap();

        assert!(!store.exists(SCRATCH_FILE).unwrap());
        let entries = drain(&store);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].parsed.as_ref().unwrap().tick_ms, 42);
    }

    #[test]
    fn test_recover_discards_unsealed_scratch() {
        let store = MemStore::default();
        let ledger = Ledger::new(&store);
        ledger.append(7, &record(25)).unwrap();
        store.put(SCRATCH_FILE, HEADER.as_bytes());

        ledger.recover().unwrap();

        assert!(!store.exists(SCRATCH_FILE).unwrap());
        assert_eq!(drain(&store).len(), 1);
    }
}
