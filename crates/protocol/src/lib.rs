//! Wire protocol for the dtx device agent.
//!
//! Devices talk a small XML-shaped protocol over TCP: each frame is one
//! document terminated by the literal `"<>"`, carrying a single request or
//! response inside an envelope. This crate owns the element tree, the typed
//! value/schema layer, the message registry with its built-in catalog, and
//! the frame codec. It is transport-agnostic; the runtime crate drives it
//! over sockets.

pub mod accessible;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod message;
pub mod path;
pub mod registry;
pub mod value;
pub mod xmlwire;

pub use accessible::{Accessible, Relation};
pub use catalog::{SearchMethod, build};
pub use codec::{FrameSplitter, TERMINATOR, decode_message, encode_frame, encode_message};
pub use error::{ProtocolError, Result};
pub use message::{DEFAULT_ID, ERROR_ID, INFO_ID, Message, MsgKind, Target};
pub use path::NodePath;
pub use registry::{MessageSpec, Registry};
pub use value::{Schema, Value};
pub use xmlwire::{Elem, parse, sanitize};
