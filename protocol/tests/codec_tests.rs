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

//! Stream-level tests for RelayCodec

use chatrelay_protocol::{Message, RelayCodec};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, duplex};
use tokio_util::codec::{FramedRead, FramedWrite};

#[tokio::test]
async fn test_framed_round_trip() {
    let (client, server) = duplex(4096);
    let mut writer = FramedWrite::new(client, RelayCodec::new());
    let mut reader = FramedRead::new(server, RelayCodec::new());

    let messages = vec![
        Message::register("u1", "Alice"),
        Message::incoming("u1", "hello"),
        Message::keep_alive("u1"),
        Message::logoff("u1"),
    ];

    for message in &messages {
        writer.send(message.to_string()).await.unwrap();
    }
    drop(writer);

    let mut received = Vec::new();
    while let Some(frame) = reader.next().await {
        received.push(Message::parse(&frame.unwrap()).unwrap());
    }
    assert_eq!(received, messages);
}

#[tokio::test]
async fn test_frames_split_across_writes() {
    let (mut client, server) = duplex(4096);
    let mut reader = FramedRead::new(server, RelayCodec::new());

    client.write_all(b"<< MESSAGE >>> <<<<u1>>>").await.unwrap();
    client.write_all(b">> << MESSAGE >>hi\n/// DEB").await.unwrap();
    client.write_all(b"UG ///\n").await.unwrap();
    drop(client);

    assert_eq!(
        reader.next().await.unwrap().unwrap(),
        "<< MESSAGE >>> <<<<u1>>>>> << MESSAGE >>hi"
    );
    assert_eq!(reader.next().await.unwrap().unwrap(), "/// DEBUG ///");
    assert!(reader.next().await.is_none());
}

#[tokio::test]
async fn test_oversized_frame_is_skipped() {
    let (mut client, server) = duplex(8192);
    let mut reader = FramedRead::new(server, RelayCodec::with_max_length(16));

    client.write_all(&[b'x'; 100]).await.unwrap();
    client.write_all(b"\nafter\n").await.unwrap();
    drop(client);

    assert_eq!(reader.next().await.unwrap().unwrap(), "after");
    assert!(reader.next().await.is_none());
    assert_eq!(reader.decoder().discarded_frames(), 1);
}
