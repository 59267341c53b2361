//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Chat Relay Wire Protocol
//!
//! The relay speaks a line-oriented text protocol in which every message is
//! identified by a literal header and fields are separated by literal
//! delimiters:
//!
//! | Kind | Format |
//! |---|---|
//! | Register | `<< CONNECT >>uuid>>>>>name<< CONNECT >>` |
//! | Logoff | `<< DISCONNECT >>uuid` |
//! | Incoming message | `<< MESSAGE >>> <<<<uuid>>>>> << MESSAGE >>text` |
//! | Debug | `/// DEBUG ///` |
//! | Username query | `<<< DUP ? >>> name` |
//! | Keep-alive | `<< KEEP ALIVE >>uuid<< KEEP ALIVE >>` |
//!
//! On a byte stream each message is terminated by `\n`; [`RelayCodec`]
//! handles that framing.
//!
//! # Example
//!
//! ```
//! use chatrelay_protocol::{ChatText, Message, MessageKind};
//!
//! let raw = "<< MESSAGE >>> <<<<42>>>>> << MESSAGE >>@Bob#hello";
//! assert_eq!(MessageKind::classify(raw), MessageKind::IncomingMessage);
//!
//! if let Ok(Message::Incoming { uuid, text }) = Message::parse(raw) {
//!     assert_eq!(uuid, "42");
//!     assert_eq!(
//!         ChatText::parse(&text),
//!         ChatText::Private { target: "Bob", payload: "hello" }
//!     );
//! }
//! ```

mod codec;
pub mod consts;
mod kind;
mod message;
mod result;

pub use codec::RelayCodec;
pub use kind::{
    FIELD_MESSAGE_TEXT, FIELD_NAME, FIELD_USERNAME, FIELD_UUID, Fields, MessageKind,
};
pub use message::{
    ChatText, Message, bridge_greeting, display_line, display_speaker, parse_bridge_greeting,
};
pub use result::{ProtocolError, ProtocolResult};
