//! Source locations (spec §3.4 `sps`, §6.1 "a `(file-name . line)` lexical
//! object").

use std::fmt;

/// A resolved `(file line)` pair, as stored in an xenv's `sps` table once
/// the file-name constant index has been dereferenced for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
