use async_trait::async_trait;
use stellar_xdr::curr::LedgerCloseMeta;

use crate::RunnerError;

/// Inclusive `[start, end]` range of ledgers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundedRange(pub u32, pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Range {
    Bounded(BoundedRange),

    /// `[start, ∞)`
    Unbounded(u32),
}

impl Range {
    /// `end` of `None` prepares an unbounded range.
    pub fn new(start: u32, end: Option<u32>) -> Self {
        match end {
            Some(end) => Range::Bounded(BoundedRange(start, end)),
            None => Range::Unbounded(start),
        }
    }

    pub fn start(&self) -> u32 {
        match self {
            Range::Bounded(BoundedRange(start, _)) => *start,
            Range::Unbounded(start) => *start,
        }
    }

    pub fn end(&self) -> Option<u32> {
        match self {
            Range::Bounded(BoundedRange(_, end)) => Some(*end),
            Range::Unbounded(_) => None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// The ledger is not available yet, ask again later.
    #[error("ledger {0} is not available yet")]
    EndOfStream(u32),

    /// The source stopped producing ledgers for good.
    #[error("ledger source closed")]
    Closed,

    #[error("ledger source failed: {0}")]
    Backend(String),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("asked for ledger {requested} but the source produced {received}")]
    UnexpectedSequence { requested: u32, received: u32 },
}

/// Where ledger close meta comes from.
#[async_trait]
pub trait LedgerSource: Send {
    /// Readies the source to serve `range`. Called once before streaming.
    async fn prepare(&mut self, range: Range) -> Result<(), SourceError>;

    /// Meta of ledger `sequence`. Returns [`SourceError::EndOfStream`] when
    /// the ledger has not been produced yet.
    async fn get_ledger(&mut self, sequence: u32) -> Result<LedgerCloseMeta, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounds() {
        let bounded = Range::new(10, Some(12));
        assert_eq!(bounded, Range::Bounded(BoundedRange(10, 12)));
        assert_eq!((bounded.start(), bounded.end()), (10, Some(12)));

        let unbounded = Range::new(10, None);
        assert_eq!((unbounded.start(), unbounded.end()), (10, None));
    }
}
