//! Types and wire protocol shared by the Murmur server and client.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::SharedError;
