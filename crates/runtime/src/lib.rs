//! Device runtime: transport, response correlation, and device handles.
//!
//! [`Transport`] owns one TCP connection and its reader task; responses are
//! correlated by request id through the [`Mailbox`]. [`RemoteDevice`] is the
//! synchronous facade test code calls; [`OfflineDevice`] serves the same
//! facade from a saved accessibility dump.

pub mod device;
pub mod error;
pub mod info;
pub mod mailbox;
pub mod node;
pub mod offline;
pub mod remote;
pub mod transport;

pub use device::{Device, ExecOutput};
pub use error::{Error, Result};
pub use info::DeviceInfo;
pub use mailbox::Mailbox;
pub use node::NodeRef;
pub use offline::OfflineDevice;
pub use remote::{DEFAULT_RESPONSE_TIMEOUT, RemoteDevice};
pub use transport::{ConnectOptions, Transport};
