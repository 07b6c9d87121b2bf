//! Transfer FSM State Definitions
//!
//! ```text
//! STARTED → SOURCE_DEBITED → DESTINATION_CREDITED → RECORD_APPENDED → COMMITTED
//!    ↓            ↓                   ↓                    ↓
//!    └────────────┴───────────────────┴────────────────────┴──→ ABORTED
//! ```
//!
//! All states live inside a single unit of work; only `Committed` is ever
//! observable from outside it.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Unit of work opened, nothing applied
    Started,
    /// Source balance decreased
    SourceDebited,
    /// Destination balance increased
    DestinationCredited,
    /// History record inserted
    RecordAppended,
    /// Terminal: all effects durable
    Committed,
    /// Terminal: all effects rolled back
    Aborted,
}

impl TransferState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Committed | TransferState::Aborted)
    }

    /// The state reached when the step out of `self` succeeds
    pub fn next(&self) -> Option<TransferState> {
        match self {
            TransferState::Started => Some(TransferState::SourceDebited),
            TransferState::SourceDebited => Some(TransferState::DestinationCredited),
            TransferState::DestinationCredited => Some(TransferState::RecordAppended),
            TransferState::RecordAppended => Some(TransferState::Committed),
            TransferState::Committed | TransferState::Aborted => None,
        }
    }

    /// Any non-terminal state may abort; forward moves follow [`Self::next`]
    pub fn can_transition_to(&self, to: TransferState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == TransferState::Aborted || self.next() == Some(to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Started => "STARTED",
            TransferState::SourceDebited => "SOURCE_DEBITED",
            TransferState::DestinationCredited => "DESTINATION_CREDITED",
            TransferState::RecordAppended => "RECORD_APPENDED",
            TransferState::Committed => "COMMITTED",
            TransferState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
