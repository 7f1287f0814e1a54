//! # dndex-relay-protocol
//!
//! Wire format for the DnDex room relay.
//!
//! Every frame exchanged over a relay connection is a UTF-8 JSON object
//! (an [`Envelope`]) with a string `type` discriminator and an optional
//! `room` field. All other fields are application payload and pass through
//! the relay untouched.
//!
//! ## Envelope Types
//!
//! - `join` - Assigns the sending connection to a room
//! - `joined` - Server acknowledgement, sent only to the joining connection
//! - anything else - Application message, fanned out to room peers
//!
//! ## Example
//!
//! ```rust
//! use dndex_relay_protocol::{codec, Envelope};
//!
//! let mut envelope = codec::decode(br#"{"type":"chat","text":"hello"}"#).unwrap();
//! envelope.restamp_room("table-42");
//!
//! let text = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(text.as_bytes()).unwrap();
//! assert_eq!(decoded.room_id().as_deref(), Some("table-42"));
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{Envelope, Profile, RoomId};
