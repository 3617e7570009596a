//! Transport implementations and the subject taxonomy.

pub mod embedded;
pub mod subjects;

pub use embedded::EmbeddedTransport;
