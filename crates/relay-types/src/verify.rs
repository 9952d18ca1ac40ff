use bitcoin::Transaction;
use thiserror::Error;

/// The "codec's structural verifier" spec.md §4.4 calls out: the only
/// well-formedness check this system performs on a transaction before
/// considering it for relay. Deliberately not a full consensus check —
/// that's a trusted validator's job (spec.md §1 non-goals).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructuralVerifyError {
    #[error("no inputs or no outputs")]
    NoInputsOrOutputs,
}

pub fn verify_structural(tx: &Transaction) -> Result<(), StructuralVerifyError> {
    if tx.input.is_empty() || tx.output.is_empty() {
        return Err(StructuralVerifyError::NoInputsOrOutputs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bitcoin::{absolute::LockTime, Transaction};

    use super::*;

    fn empty_tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![],
        }
    }

    #[test]
    fn rejects_no_inputs_or_outputs() {
        assert_eq!(
            verify_structural(&empty_tx()),
            Err(StructuralVerifyError::NoInputsOrOutputs)
        );
    }
}
