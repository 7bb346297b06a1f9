use stellar_xdr::curr::{
    GeneralizedTransactionSet, LedgerCloseMeta, LedgerHeaderHistoryEntry, TransactionEnvelope,
    TransactionPhase, TransactionResultMeta, TxSetComponent,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("unsupported ledger close meta version {0}")]
    UnsupportedMeta(&'static str),
}

/// Accessors over the versions of `LedgerCloseMeta` the ingester understands.
pub struct LedgerCloseMetaReader;

impl LedgerCloseMetaReader {
    #[allow(unreachable_patterns)]
    pub fn ledger_header(meta: &LedgerCloseMeta) -> Result<&LedgerHeaderHistoryEntry, ReaderError> {
        match meta {
            LedgerCloseMeta::V0(v0) => Ok(&v0.ledger_header),
            LedgerCloseMeta::V1(v1) => Ok(&v1.ledger_header),
            other => Err(ReaderError::UnsupportedMeta(other.name())),
        }
    }

    pub fn ledger_sequence(meta: &LedgerCloseMeta) -> Result<u32, ReaderError> {
        Ok(Self::ledger_header(meta)?.header.ledger_seq)
    }

    /// Transaction results in application order.
    #[allow(unreachable_patterns)]
    pub fn transaction_metas(meta: &LedgerCloseMeta) -> Result<&[TransactionResultMeta], ReaderError> {
        match meta {
            LedgerCloseMeta::V0(v0) => Ok(v0.tx_processing.as_slice()),
            LedgerCloseMeta::V1(v1) => Ok(v1.tx_processing.as_slice()),
            other => Err(ReaderError::UnsupportedMeta(other.name())),
        }
    }

    /// Envelopes in tx set order, which is not the application order.
    #[allow(unreachable_patterns)]
    pub fn transaction_envelopes(meta: &LedgerCloseMeta) -> Result<Vec<&TransactionEnvelope>, ReaderError> {
        match meta {
            LedgerCloseMeta::V0(v0) => Ok(v0.tx_set.txs.iter().collect()),
            LedgerCloseMeta::V1(v1) => {
                let mut envelopes = Vec::with_capacity(v1.tx_processing.len());

                match &v1.tx_set {
                    GeneralizedTransactionSet::V1(set) => {
                        for phase in set.phases.iter() {
                            match phase {
                                TransactionPhase::V0(components) => {
                                    for component in components.iter() {
                                        match component {
                                            TxSetComponent::TxsetCompTxsMaybeDiscountedFee(txset) => {
                                                envelopes.extend(txset.txs.iter())
                                            }
                                            other => {
                                                log::warn!("skipping unsupported tx set component {}", other.name())
                                            }
                                        }
                                    }
                                }
                                other => log::warn!("skipping unsupported transaction phase {}", other.name()),
                            }
                        }
                    }
                    other => return Err(ReaderError::UnsupportedMeta(other.name())),
                }

                Ok(envelopes)
            }
            other => Err(ReaderError::UnsupportedMeta(other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{LedgerBuilder, TxBuilder};

    #[test]
    fn reads_v0_meta() {
        let meta = LedgerBuilder::new(42)
            .transaction(TxBuilder::new(1).payment(2, 1))
            .transaction(TxBuilder::new(3).payment(4, 1))
            .build();

        assert_eq!(LedgerCloseMetaReader::ledger_sequence(&meta).unwrap(), 42);
        assert_eq!(LedgerCloseMetaReader::transaction_metas(&meta).unwrap().len(), 2);
        assert_eq!(LedgerCloseMetaReader::transaction_envelopes(&meta).unwrap().len(), 2);
    }

    #[test]
    fn reads_v1_meta_across_phases() {
        let meta = LedgerBuilder::new(43)
            .transaction(TxBuilder::new(1).invoke([7; 32], "mint"))
            .transaction(TxBuilder::new(2).payment(4, 1))
            .build_v1();

        assert_eq!(LedgerCloseMetaReader::ledger_sequence(&meta).unwrap(), 43);
        assert_eq!(LedgerCloseMetaReader::transaction_metas(&meta).unwrap().len(), 2);

        // classic phase first
        let envelopes = LedgerCloseMetaReader::transaction_envelopes(&meta).unwrap();
        assert_eq!(envelopes.len(), 2);
        let first_body = match envelopes[0] {
            TransactionEnvelope::Tx(v1) => &v1.tx.operations[0].body,
            other => panic!("unexpected envelope {}", other.name()),
        };
        assert_eq!(first_body.name(), "Payment");
    }
}
