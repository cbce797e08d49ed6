//! Generic JSON document parsing, canonicalization and diffing primitives used
//! by higher-level tools.

pub mod canonical;
pub mod diff;
pub mod format;
pub mod parser;
pub mod similarity;
pub mod writer;

pub use canonical::{canonicalize, CanonicalOptions};
pub use diff::{diff, diff_with_options, DiffEntry, DiffOptions};
pub use format::{format_json, format_summary, format_text, DiffCounts};
pub use parser::{parse, parse_file, ParseError};
pub use similarity::{line_similarity, unified_diff, LineChange, LineChangeKind, Similarity};
pub use writer::{to_pretty_string, write, write_file, WriteError};
