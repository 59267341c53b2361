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

use crate::MessageKind;

/// Result Type for Protocol Operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Represents possible errors raised while tokenizing or framing relay messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A message was classified but is missing a required delimiter or field.
    ///
    /// Callers treat this as a no-op rather than a fatal condition.
    #[error("Malformed {kind} message: {reason}")]
    Malformed {
        /// The kind the message was classified as
        kind: MessageKind,
        /// What was missing
        reason: &'static str,
    },

    /// A frame exceeded the configured maximum length and was discarded.
    #[error("Frame exceeds maximum length of {limit} bytes")]
    FrameTooLong {
        /// Configured limit in bytes
        limit: usize,
    },

    /// An outbound frame contained a line terminator.
    #[error("Frame contains an embedded newline")]
    EmbeddedNewline,

    /// An I/O error occurred while reading from or writing to the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(kind: MessageKind, reason: &'static str) -> Self {
        ProtocolError::Malformed { kind, reason }
    }

    /// Whether the stream can keep being decoded after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}
