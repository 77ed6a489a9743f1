//! Codec module - field encoding for command payloads.
//!
//! Payloads are a fixed sequence of typed fields per command, with no
//! self-describing envelope:
//!
//! - [`put_string`] / [`PayloadReader::read_string`] - u16-prefixed UTF-8
//! - [`put_long_list`] / [`PayloadReader::read_long_list`] - u16-counted u64 list
//! - fixed-width big-endian integers and 0/1 flags
//!
//! # Example
//!
//! ```
//! use relay_link::codec::{put_string, PayloadReader};
//! use bytes::BytesMut;
//!
//! let mut buf = BytesMut::new();
//! put_string(&mut buf, "hello").unwrap();
//!
//! let mut reader = PayloadReader::new(buf.freeze());
//! assert_eq!(reader.read_string().unwrap(), "hello");
//! ```

mod fields;

pub use fields::{put_bool, put_long_list, put_string, PayloadReader};
