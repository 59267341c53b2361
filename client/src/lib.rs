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


//! # Chat Relay Client
//!
//! Async client for the chat relay. A [`RelayClient`] registers a display
//! name, keeps its session alive in the background and hands every line
//! worth showing to a [`ClientHandler`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use chatrelay_client::{CallbackHandler, ClientConfig, RelayClient, check_name_duplicates};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("localhost", 10240);
//!     if check_name_duplicates(&config, "Alice").await? {
//!         eprintln!("Name already taken");
//!         return Ok(());
//!     }
//!
//!     let handler = Arc::new(CallbackHandler {
//!         on_line: Some(Box::new(|_client: &RelayClient, line: &str| println!("{line}"))),
//!         ..Default::default()
//!     });
//!     let client = RelayClient::connect(config, "Alice", handler).await?;
//!     client.send_message("hello everyone").await?;
//!     client.send_private("Bob", "hi Bob").await?;
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod handler;

pub use client::{ConnectionState, RelayClient, check_name_duplicates};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use handler::{CallbackHandler, ClientHandler, SERVER_CLOSED_LINE, ServerFrame};
