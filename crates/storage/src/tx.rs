//! Typed transaction outcomes.

use serde::Serialize;

/// Result of a transaction whose failure must be reported, not raised.
///
/// Used where a later transaction may fail after an earlier one has already
/// committed (metadata refresh after a data merge): the caller gets the
/// rollback cause in its report instead of an error that would suggest the
/// whole operation was undone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxOutcome<T> {
    Committed { value: T },
    RolledBack { cause: String },
}

impl<T> TxOutcome<T> {
    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => TxOutcome::Committed { value },
            Err(e) => TxOutcome::RolledBack {
                cause: e.to_string(),
            },
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed { .. })
    }

    pub fn committed(&self) -> Option<&T> {
        match self {
            TxOutcome::Committed { value } => Some(value),
            TxOutcome::RolledBack { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result() {
        let ok: TxOutcome<u32> = TxOutcome::from_result(Ok::<_, String>(3));
        assert!(ok.is_committed());
        assert_eq!(ok.committed(), Some(&3));

        let failed: TxOutcome<u32> = TxOutcome::from_result(Err("deadlock detected"));
        assert!(!failed.is_committed());
        assert_eq!(
            failed,
            TxOutcome::RolledBack {
                cause: "deadlock detected".to_string()
            }
        );
    }

    #[test]
    fn test_serializes_with_status_tag() {
        let json = serde_json::to_value(TxOutcome::<u32>::RolledBack {
            cause: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "rolled_back");
        assert_eq!(json["cause"], "boom");
    }
}
