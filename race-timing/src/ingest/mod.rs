//! Arrival ingestion pipeline.
//!
//! Streaming readings travel: transport bytes → [`LineBuffer`] →
//! [`Reading::parse_line`] → bounded [`ReadingQueue`] → [`drain`] on the
//! state machine's thread. Manual entries skip the queue and call the
//! state machine directly.

mod drain;
mod line;
mod queue;
mod reading;
mod tags;

pub use drain::{DrainSummary, drain};
pub use line::LineBuffer;
pub use queue::{ReadingConsumer, ReadingProducer, ReadingQueue};
pub use reading::{MalformedReading, Reading};
pub use tags::{NumericTags, TagResolver, TagTable};
