//! Agent output stream handling.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing of
//!   the agent's newline-delimited JSON output.
//! - `protocol`: wire types for individual lines (crate-private).
//! - `parser`: [`StreamParser`], the incremental decoder that turns output
//!   chunks into [`NormalizedEvent`](crate::models::event::NormalizedEvent)s.

pub mod codec;
pub mod parser;
pub(crate) mod protocol;

pub use parser::{EventSink, StreamParser};
