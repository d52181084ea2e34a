//! Transport layer module.

pub mod mock;
pub mod tcp;
pub mod traits;

pub use mock::MockConnection;
pub use tcp::{MessageReader, TcpConnection};
pub use traits::{MessageSink, TransportError};
