//! Positional reads over container files.

mod file_reader;
mod range_reader;

pub use file_reader::FileRangeReader;
pub use range_reader::RangeReader;
