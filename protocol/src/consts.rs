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

//! Literal markers of the relay wire protocol.
//!
//! Every field is delimited by one of these literal substrings. There is no
//! escaping, so a payload containing a marker is ambiguous; tokenizers always
//! split on the *first* occurrence of a middle delimiter.

/// Default TCP relay port.
pub const DEFAULT_RELAY_PORT: u16 = 10240;

/// Default UDP duplicate-name query port.
pub const DEFAULT_QUERY_PORT: u16 = 10241;

/// Default WebSocket bridge port.
pub const DEFAULT_BRIDGE_PORT: u16 = 8090;

/// Maximum length of a single frame in bytes (excluding the terminator).
///
/// Frames longer than this are discarded by the decoder.
pub const MAX_FRAME_LENGTH: usize = 1024;

/// Left marker of a registration greet.
///
/// Format: `<< CONNECT >>(UUID)>>>>>(Name)<< CONNECT >>`
pub const CONNECT_LEFT: &str = "<< CONNECT >>";

/// Middle delimiter of a registration greet.
pub const CONNECT_MIDDLE: &str = ">>>>>";

/// Right marker of a registration greet. Optional on input.
pub const CONNECT_RIGHT: &str = "<< CONNECT >>";

/// Header of a logoff request.
///
/// Format: `<< DISCONNECT >>(UUID)`
pub const DISCONNECT: &str = "<< DISCONNECT >>";

/// Left part of a chat message.
///
/// Format: `<< MESSAGE >>> <<<<(UUID)>>>>> << MESSAGE >>(text)`
pub const MESSAGE_LEFT: &str = "<< MESSAGE >>> <<<<";

/// Middle delimiter of a chat message.
pub const MESSAGE_MIDDLE: &str = ">>>>>";

/// Right part of a chat message, directly preceding the text.
pub const MESSAGE_RIGHT: &str = " << MESSAGE >>";

/// Debug signal. The server dumps its session table when it receives it.
pub const DEBUG_SIGNAL: &str = "/// DEBUG ///";

/// Header of a duplicate-name query.
///
/// Format: `<<< DUP ? >>> (Name)`
pub const DUP_QUERY_HEADER: &str = "<<< DUP ? >>> ";

/// Query response: the name is in use.
pub const NAME_DUPLICATED: &str = ">>> DUPLICATED <<< ";

/// Query response: the name is free.
pub const NAME_CLEAR: &str = "<<< Clear >>>";

/// Header of a keep-alive ping.
///
/// Format: `<< KEEP ALIVE >>(UUID)<< KEEP ALIVE >>`
pub const KEEP_ALIVE_HEADER: &str = "<< KEEP ALIVE >>";

/// Tail of a keep-alive ping.
pub const KEEP_ALIVE_TAIL: &str = "<< KEEP ALIVE >>";

/// Header of the id greeting sent to a freshly connected bridge peer.
pub const BRIDGE_GREETING_HEADER: &str = "<WS><<";

/// Tail of the bridge id greeting.
pub const BRIDGE_GREETING_TAIL: &str = ">>";

/// Sender id used for messages originating from the server itself.
pub const SERVER_SENDER: &str = "SERVER";

/// Separator between a display name and its text in display lines.
pub const DISPLAY_SEPARATOR: &str = ": ";

/// Marker between sender and target in a private message sender slot.
pub const PRIVATE_ARROW: &str = " -> ";

/// Leading character of a private chat address (`@name#payload`).
pub const PRIVATE_PREFIX: char = '@';

/// Separator between the private chat target and the payload.
pub const PRIVATE_SEPARATOR: char = '#';
