use serde::{Deserialize, Serialize};

/// One published meeting document for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meeting {
    /// Meeting date, `YYYY-MM-DD` where the source allows it.
    pub date: String,
    /// Link to the agenda document (HTML page or file).
    pub agenda: String,
}
