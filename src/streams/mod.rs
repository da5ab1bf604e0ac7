//! Byte streams over stored files: buffered writers that upload on flush
//! boundaries and positional readers over range GETs.

pub mod block_streams;
pub mod partitioned_writer;
pub mod segment;
pub mod stream_reader;
