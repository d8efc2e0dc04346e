//! Authored trial tables: the raw rows a researcher edits, their CSV
//! persistence, and validation into an immutable [`peg_core::TrialTable`].

pub mod error;
pub mod io;
pub mod row;
pub mod validate;

pub use error::{TableIoError, ValidationError, ValidationErrors};
pub use io::{FormatVersion, LoadedTable, load_table, read_table, save_table, write_table};
pub use row::{AuthoredRow, Field};
pub use validate::{ValidationOptions, validate_repetitions, validate_rows};
