//! corekit core: error context chain, API errors, codec registry and pingers.

pub mod apikit;
pub mod codec;
pub mod errors;
pub mod ping;
pub mod testkit;

pub use apikit::{ApiError, Code};
pub use codec::{Codec, CodecRegistry};
pub use errors::{Error, ErrorContext, ResultExt};
pub use ping::Pinger;
