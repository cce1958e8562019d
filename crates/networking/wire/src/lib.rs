//! TCP transport for the aotserver compile service.
//!
//! Each connection carries exactly one [`CompileRequest`](aotserver_dispatch::CompileRequest)
//! and, unless the request could not be read, exactly one completion status
//! back. A stream whose request fails to decode, does not arrive within the
//! read timeout, or is still pending at shutdown is cancelled: closed with no
//! status written.

pub mod client;
pub mod codec;
pub mod error;
pub mod server;
pub mod stream;

pub use codec::{MAX_FRAME_LEN, Message, WireCodec};
pub use error::{ServerError, WireError};
pub use server::{DEFAULT_READ_TIMEOUT, bind, serve, serve_with_read_timeout};
pub use stream::ServerStream;
