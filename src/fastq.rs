//! gzip-aware FASTQ reader with 3' quality trimming. (spec §3, §6 collaborator)
//!
//! Modeled on `seqkmer::fastq::QReader`/`reader::dyn_reader`: a 4-line
//! record reader that transparently unwraps gzip, trims line endings, and
//! can soft-trim the 3' end on low quality.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{StrError, StrResult};

pub const BUFSIZE: usize = 8 * 1024 * 1024;

/// A single FASTQ record: name, bases, quals, and the bookkeeping the spec
/// calls out in §3 (slen, encoding, whether trimming is enabled for this
/// read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub name: String,
    pub bases: Vec<u8>,
    pub quals: Vec<u8>,
    pub slen: usize,
    pub is_illumina_encoded: bool,
    pub do_trim: bool,
}

impl SequenceRecord {
    fn new(name: String, bases: Vec<u8>, quals: Vec<u8>, is_illumina_encoded: bool, do_trim: bool) -> Self {
        let slen = bases.len();
        Self {
            name,
            bases,
            quals,
            slen,
            is_illumina_encoded,
            do_trim,
        }
    }
}

fn trim_end(buf: &mut Vec<u8>) {
    while let Some(&b'\n' | &b'\r') = buf.last() {
        buf.pop();
    }
}

/// 3' quality trim: cut bases from the tail while `(Q - 33) <= 2` (spec §3).
fn quality_trim_3prime(bases: &mut Vec<u8>, quals: &mut Vec<u8>, is_illumina_encoded: bool) {
    let offset: i32 = if is_illumina_encoded { 64 } else { 33 };
    while let Some(&q) = quals.last() {
        if (q as i32 - offset) <= 2 {
            quals.pop();
            bases.pop();
        } else {
            break;
        }
    }
}

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == [0x1F, 0x8B]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_reader(path: &Path) -> io::Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            io::Error::new(e.kind(), format!("file not found: {path:?}"))
        } else {
            e
        }
    })?;
    if is_gzipped(path)? {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Reads 4-line FASTQ records from any `Read`, gzip or plain.
pub struct FastqReader<R: Read> {
    reader: BufReader<R>,
    header: Vec<u8>,
    seq: Vec<u8>,
    plus: Vec<u8>,
    quals: Vec<u8>,
    is_illumina_encoded: bool,
    do_trim: bool,
}

impl<R: Read> FastqReader<R> {
    pub fn new(reader: R, is_illumina_encoded: bool, do_trim: bool) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFSIZE, reader),
            header: Vec::new(),
            seq: Vec::new(),
            plus: Vec::new(),
            quals: Vec::new(),
            is_illumina_encoded,
            do_trim,
        }
    }

    /// Reads the next record, or `None` at end of stream.
    ///
    /// Fatal input error (spec §7b) if the stream ends mid-record (header
    /// present but seq/plus/quals missing).
    pub fn read_next(&mut self) -> StrResult<Option<SequenceRecord>> {
        self.header.clear();
        if self.reader.read_until(b'\n', &mut self.header)? == 0 {
            return Ok(None);
        }
        if self.header.first() != Some(&b'@') {
            return Err(StrError::Input(
                "expected FASTQ record to start with '@'".to_string(),
            ));
        }

        self.seq.clear();
        if self.reader.read_until(b'\n', &mut self.seq)? == 0 {
            return Err(StrError::Input(
                "truncated FASTQ record: missing sequence line".to_string(),
            ));
        }
        trim_end(&mut self.seq);

        self.plus.clear();
        if self.reader.read_until(b'\n', &mut self.plus)? == 0 {
            return Err(StrError::Input(
                "truncated FASTQ record: missing '+' line".to_string(),
            ));
        }

        self.quals.clear();
        if self.reader.read_until(b'\n', &mut self.quals)? == 0 {
            return Err(StrError::Input(
                "truncated FASTQ record: missing quality line".to_string(),
            ));
        }
        trim_end(&mut self.quals);

        if self.seq.len() != self.quals.len() {
            return Err(StrError::Input(format!(
                "sequence/quality length mismatch: {} vs {}",
                self.seq.len(),
                self.quals.len()
            )));
        }

        trim_end(&mut self.header);
        let name = String::from_utf8_lossy(&self.header[1..]).into_owned();

        let mut bases = self.seq.clone();
        let mut quals = self.quals.clone();
        if self.do_trim {
            quality_trim_3prime(&mut bases, &mut quals, self.is_illumina_encoded);
        }

        Ok(Some(SequenceRecord::new(
            name,
            bases,
            quals,
            self.is_illumina_encoded,
            self.do_trim,
        )))
    }
}

impl FastqReader<Box<dyn Read>> {
    pub fn from_path<P: AsRef<Path>>(path: P, do_trim: bool) -> StrResult<Self> {
        let reader = open_reader(path.as_ref())?;
        Ok(Self::new(reader, false, do_trim))
    }
}

/// Reads every record from a path into memory, in file order.
pub fn read_all<P: AsRef<Path>>(path: P, do_trim: bool) -> StrResult<Vec<SequenceRecord>> {
    let mut reader = FastqReader::from_path(path, do_trim)?;
    let mut out = Vec::new();
    while let Some(rec) = reader.read_next()? {
        out.push(rec);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader_for(text: &str) -> FastqReader<Cursor<Vec<u8>>> {
        FastqReader::new(Cursor::new(text.as_bytes().to_vec()), false, false)
    }

    #[test]
    fn parses_single_record() {
        let mut r = reader_for("@read1\nACGT\n+\nIIII\n");
        let rec = r.read_next().unwrap().unwrap();
        assert_eq!(rec.name, "read1");
        assert_eq!(rec.bases, b"ACGT");
        assert_eq!(rec.quals, b"IIII");
        assert_eq!(rec.slen, 4);
        assert!(r.read_next().unwrap().is_none());
    }

    #[test]
    fn parses_multiple_records() {
        let mut r = reader_for("@a\nAC\n+\nII\n@b\nGT\n+\nII\n");
        assert_eq!(r.read_next().unwrap().unwrap().name, "a");
        assert_eq!(r.read_next().unwrap().unwrap().name, "b");
        assert!(r.read_next().unwrap().is_none());
    }

    #[test]
    fn truncated_record_is_fatal() {
        let mut r = reader_for("@a\nACGT\n+\n");
        assert!(r.read_next().is_err());
    }

    #[test]
    fn quality_trim_cuts_low_quality_tail() {
        // '#' is Phred+33 Q2 -> (35-33)=2 <= 2, trimmed; 'I' is Q40, kept.
        let mut r = FastqReader::new(Cursor::new(b"@a\nACGTAC\n+\nIIII##\n".to_vec()), false, true);
        let rec = r.read_next().unwrap().unwrap();
        assert_eq!(rec.bases, b"ACGT");
        assert_eq!(rec.quals, b"IIII");
    }

    #[test]
    fn missing_at_sign_is_fatal() {
        let mut r = reader_for("notafastq\nACGT\n+\nIIII\n");
        assert!(r.read_next().is_err());
    }
}
