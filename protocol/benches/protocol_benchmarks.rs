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

//! Benchmarks for protocol parsing and framing

use bytes::BytesMut;
use chatrelay_protocol::{Message, MessageKind, RelayCodec};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use tokio_util::codec::{Decoder, Encoder};

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let raw = Message::incoming("0f8fad5b-d9cb-469f-a165-70867728950e", "hello world").to_string();

    group.bench_function("incoming", |b| {
        b.iter(|| MessageKind::classify(black_box(&raw)));
    });
    group.bench_function("unknown", |b| {
        b.iter(|| MessageKind::classify(black_box("just some text")));
    });
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    let register = Message::register("0f8fad5b-d9cb-469f-a165-70867728950e", "Alice").to_string();
    let incoming = Message::incoming("0f8fad5b-d9cb-469f-a165-70867728950e", "@Bob#hi").to_string();

    group.bench_function("register", |b| {
        b.iter(|| Message::parse(black_box(&register)).unwrap());
    });
    group.bench_function("incoming", |b| {
        b.iter(|| Message::parse(black_box(&incoming)).unwrap());
    });
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let uuid = "0f8fad5b-d9cb-469f-a165-70867728950e";
    let frame = Message::incoming(uuid, "x".repeat(200)).to_string();

    let mut stream = BytesMut::new();
    let mut encoder = RelayCodec::new();
    for _ in 0..100 {
        encoder.encode(&frame, &mut stream).unwrap();
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("decode_100_frames", |b| {
        b.iter(|| {
            let mut codec = RelayCodec::new();
            let mut buffer = stream.clone();
            let mut count = 0;
            while let Some(frame) = codec.decode(&mut buffer).unwrap() {
                black_box(frame);
                count += 1;
            }
            assert_eq!(count, 100);
        });
    });

    group.bench_function("encode_frame", |b| {
        let mut codec = RelayCodec::new();
        let mut buffer = BytesMut::with_capacity(1024);
        b.iter(|| {
            buffer.clear();
            codec.encode(black_box(&frame), &mut buffer).unwrap();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_classify, bench_parse, bench_codec);
criterion_main!(benches);
