//! Line-oriented datasets.
//!
//! A dataset is a file of newline-delimited records with an optional header line.
//! Records are handled as raw bytes (terminator included) so shards and merged
//! outputs are byte-for-byte copies of their sources, `\r\n` endings and all.

use crate::error::{Phase, Result, ShardError};
use crate::io::compression::auto_detect_reader;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

/// How the first line of a dataset is treated when it is split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    /// Every line is a record.
    None,
    /// The first line is a header and is repeated at the top of every shard.
    #[default]
    Keep,
    /// The first line is a header; it is read once and left out of the shards.
    Strip,
}

impl HeaderMode {
    /// Whether the dataset starts with a header line.
    #[must_use]
    pub fn has_header(self) -> bool {
        !matches!(self, HeaderMode::None)
    }

    /// Whether shards get a copy of the header.
    #[must_use]
    pub fn writes_header(self) -> bool {
        matches!(self, HeaderMode::Keep)
    }
}

/// Column names of a dataset, fixed once from its header line.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    columns: Vec<String>,
}

impl RecordSchema {
    /// Parse a delimited header line (quotes honored) into column names.
    #[must_use]
    pub fn from_header_line(line: &[u8], delimiter: u8) -> Self {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(line);
        let mut record = csv::ByteRecord::new();
        let columns = match rdr.read_byte_record(&mut record) {
            Ok(true) => record
                .iter()
                .map(|field| String::from_utf8_lossy(field).trim_end_matches('\r').to_string())
                .collect(),
            _ => Vec::new(),
        };
        Self { columns }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of `name` among the columns.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// A header line: its exact bytes plus the schema parsed from them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    raw: Vec<u8>,
    schema: RecordSchema,
}

impl Header {
    #[must_use]
    pub fn new(raw: Vec<u8>) -> Self {
        let delimiter = sniff_delimiter(&raw);
        let schema = RecordSchema::from_header_line(&raw, delimiter);
        Self { raw, schema }
    }

    /// The header exactly as it appears in the file, line terminator included.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }
}

/// Tab wins over comma when the header contains tabs; the rest is comma-separated.
fn sniff_delimiter(line: &[u8]) -> u8 {
    if line.contains(&b'\t') { b'\t' } else { b',' }
}

/// Streams a file one record at a time, reusing a single buffer.
pub struct LineReader {
    inner: Box<dyn BufRead>,
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new(inner: Box<dyn BufRead>) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(4096),
        }
    }

    /// Next record including its terminator, or `None` at end of input.
    /// A final line without a trailing newline is still returned.
    ///
    /// # Errors
    /// Propagates read errors from the underlying stream.
    pub fn next_line(&mut self) -> io::Result<Option<&[u8]>> {
        self.buf.clear();
        let n = self.inner.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(self.buf.as_slice()))
        }
    }
}

/// A dataset file and how its first line is treated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset {
    path: PathBuf,
    header_mode: HeaderMode,
}

/// Result of scanning a dataset once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetStats {
    pub header: Option<Header>,
    /// Data records, header excluded.
    pub records: u64,
}

impl Dataset {
    pub fn new(path: impl AsRef<Path>, header_mode: HeaderMode) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            header_mode,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header_mode(&self) -> HeaderMode {
        self.header_mode
    }

    /// Open the file (decompressing if needed) and consume the header line if
    /// there is one.
    ///
    /// # Errors
    /// Returns [`ShardError::Io`] in the split phase if the file is missing or unreadable.
    pub fn open(&self) -> Result<(Option<Header>, LineReader)> {
        let f = File::open(&self.path).map_err(|e| ShardError::io(Phase::Split, &self.path, e))?;
        let rdr = auto_detect_reader(f, &self.path)
            .map_err(|e| ShardError::io(Phase::Split, &self.path, e))?;
        let mut lines = LineReader::new(rdr);
        let header = if self.header_mode.has_header() {
            lines
                .next_line()
                .map_err(|e| ShardError::io(Phase::Split, &self.path, e))?
                .map(|raw| Header::new(raw.to_vec()))
        } else {
            None
        };
        Ok((header, lines))
    }

    /// Count data records in one streaming pass.
    ///
    /// # Errors
    /// See [`Dataset::open`].
    pub fn scan(&self) -> Result<DatasetStats> {
        let (header, mut lines) = self.open()?;
        let mut records = 0u64;
        while lines
            .next_line()
            .map_err(|e| ShardError::io(Phase::Split, &self.path, e))?
            .is_some()
        {
            records += 1;
        }
        Ok(DatasetStats { header, records })
    }
}
