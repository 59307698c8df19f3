//! Common plumbing shared by every layer of the engine: byte cursors,
//! encode/decode traits and the generic error type.

#[macro_use]
mod macros;

mod as_any;
mod cursor;
mod decode;
mod encode;
mod error;
mod into_owned;
mod padding;
mod write_buf;

pub use self::as_any::*;
pub use self::cursor::*;
pub use self::decode::*;
pub use self::encode::*;
pub use self::error::*;
pub use self::into_owned::*;
pub use self::padding::*;
pub use self::write_buf::*;
