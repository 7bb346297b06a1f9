use std::io::{self, Read};
use std::sync::mpsc::SyncSender;

use stellar_xdr::curr::{LedgerCloseMeta, Limits, ReadXdr};

// from the stellar/go/ingestion lib
const META_PIPE_BUFFER_SIZE: usize = 10 * 1024 * 1024;
pub(crate) const LEDGER_READ_AHEAD_BUFFER_SIZE: usize = 20;

/// XDR record marks carry the frame length in the lower 31 bits.
const RECORD_MARK_LAST_FRAGMENT: u32 = 0x8000_0000;

/// Enum to represent different types of errors related to `BufReader` operations.
#[derive(thiserror::Error, Debug, Clone)]
pub enum BufReaderError {
    /// The pipe ended in the middle of a frame.
    #[error("stream ended inside a {0} byte frame")]
    TruncatedFrame(u32),

    /// Error encountered while decoding XDR data.
    #[error("error decoding XDR: {0}")]
    ReadXdr(String),

    /// Underlying pipe failure.
    #[error("error reading meta pipe: {0}")]
    Io(String),
}

impl From<io::Error> for BufReaderError {
    fn from(error: io::Error) -> Self {
        BufReaderError::Io(error.to_string())
    }
}

/// Represents the result of reading one ledger from the meta pipe.
pub type MetaResult = Result<LedgerCloseMeta, BufReaderError>;

/// Struct for reading buffered, record-marked ledger metadata.
pub struct BufferedLedgerMetaReader {
    reader: io::BufReader<Box<dyn Read + Send>>,

    /// Set once the pipe is exhausted or a frame failed, no more
    /// frames are read after that.
    finished: bool,
}

impl BufferedLedgerMetaReader {
    /// Creates a new `BufferedLedgerMetaReader` over `reader`.
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader: io::BufReader::with_capacity(META_PIPE_BUFFER_SIZE, reader),
            finished: false,
        }
    }

    /// Reads the next frame.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the pipe closed cleanly on a frame boundary.
    pub fn read_frame(&mut self) -> Result<Option<LedgerCloseMeta>, BufReaderError> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(BufReaderError::TruncatedFrame(0)),
                Ok(read) => filled += read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let len = u32::from_be_bytes(header) & !RECORD_MARK_LAST_FRAGMENT;
        let mut frame = vec![0u8; len as usize];
        self.reader.read_exact(&mut frame).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => BufReaderError::TruncatedFrame(len),
            _ => err.into(),
        })?;

        LedgerCloseMeta::from_xdr(&frame, Limits::none())
            .map(Some)
            .map_err(|err| BufReaderError::ReadXdr(err.to_string()))
    }

    /// Reads frames until the pipe closes or the receiving side hangs up.
    /// A failed frame is forwarded and ends the stream.
    pub fn stream_into(mut self, transmitter: SyncSender<MetaResult>) {
        for result in &mut self {
            let failed = result.is_err();
            if transmitter.send(result).is_err() {
                log::debug!("meta receiver dropped, stop reading pipe");
                return;
            }

            if failed {
                return;
            }
        }

        log::debug!("meta pipe closed");
    }
}

impl Iterator for BufferedLedgerMetaReader {
    type Item = MetaResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_frame() {
            Ok(Some(meta)) => Some(Ok(meta)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
