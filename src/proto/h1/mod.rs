//! The HTTP/1.1 engine: request serialization, response head parsing,
//! body framing and the per-exchange dispatch loop.

pub(crate) mod decode;
pub(crate) mod dispatch;
pub(crate) mod encode;
pub(crate) mod parse;

pub(crate) use self::decode::Decoder;
pub(crate) use self::parse::ResponseHead;
