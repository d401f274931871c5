//! Input file reader
//!
//! The delimiter comes from the file extension, never from the content: tab
//! for `.txt`, comma for anything else. After splitting on the delimiter every
//! piece is split again on whitespace, so space-aligned exports still yield
//! one field per column.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::IngestError;

/// Column separator selected by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("txt") => Delimiter::Tab,
            _ => Delimiter::Comma,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Delimiter::Tab => '\t',
            Delimiter::Comma => ',',
        }
    }
}

/// Split a line on `delimiter`, then on whitespace, dropping empty pieces.
pub fn split_fields(line: &str, delimiter: Delimiter) -> Vec<&str> {
    line.split(delimiter.as_char())
        .flat_map(str::split_whitespace)
        .collect()
}

/// Line-by-line reader over one input file
pub struct RowReader {
    path: PathBuf,
    inner: BufReader<File>,
    delimiter: Delimiter,
    next_index: usize,
    buf: Vec<u8>,
}

impl RowReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|source| IngestError::Open {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            delimiter: Delimiter::for_path(&path),
            path,
            inner: BufReader::new(file),
            next_index: 0,
            buf: Vec::with_capacity(256),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    /// Next line with its 0-based row index, or `None` at end of file.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than rejected.
    pub async fn next_line(&mut self) -> Result<Option<(usize, String)>, IngestError> {
        self.buf.clear();
        let read = self
            .inner
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|source| IngestError::Read {
                line: self.next_index + 1,
                source,
            })?;

        if read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some((index, line)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_delimiter_by_extension() {
        assert_eq!(Delimiter::for_path(Path::new("base_teste.txt")), Delimiter::Tab);
        assert_eq!(Delimiter::for_path(Path::new("BASE.TXT")), Delimiter::Tab);
        assert_eq!(Delimiter::for_path(Path::new("base.csv")), Delimiter::Comma);
        assert_eq!(Delimiter::for_path(Path::new("base")), Delimiter::Comma);
    }

    #[test]
    fn test_split_fields_tab() {
        let fields = split_fields("a\tb\t\tc ", Delimiter::Tab);
        assert_eq!(fields, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_fields_space_aligned() {
        let line = "041.091.641-25  0  0  NULL   NULL   NULL   NULL   NULL";
        assert_eq!(split_fields(line, Delimiter::Tab).len(), 8);
    }

    #[test]
    fn test_split_fields_comma() {
        let fields = split_fields("1, 0 ,x", Delimiter::Comma);
        assert_eq!(fields, vec!["1", "0", "x"]);
    }

    #[tokio::test]
    async fn test_reads_lines_with_indices() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(file, "header\r\nfirst\nsecond").unwrap();

        let mut reader = RowReader::open(file.path()).await.unwrap();
        assert_eq!(reader.path(), file.path());
        assert_eq!(reader.delimiter(), Delimiter::Tab);

        assert_eq!(reader.next_line().await.unwrap(), Some((0, "header".to_string())));
        assert_eq!(reader.next_line().await.unwrap(), Some((1, "first".to_string())));
        assert_eq!(reader.next_line().await.unwrap(), Some((2, "second".to_string())));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let result = RowReader::open("/definitely/not/here.csv").await;
        assert!(matches!(result, Err(IngestError::Open { .. })));
    }
}
