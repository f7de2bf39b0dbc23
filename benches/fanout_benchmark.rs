use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use tether::gateway::ClientEvent;
use tether::identity::{ConnectionId, RoomId, ServerId};
use tether::presence::{ConnectionSnapshot, distinct_owners};

/// room of `members` connections spread round-robin over `processes` servers
fn room(members: usize, processes: usize) -> Vec<ConnectionSnapshot> {
    let servers: Vec<ServerId> = (0..processes).map(|_| ServerId::generate()).collect();
    (0..members)
        .map(|i| {
            let mut snapshot =
                ConnectionSnapshot::new(ConnectionId::generate(), servers[i % processes].clone());
            snapshot.client_tag = Some(i as i64);
            snapshot.room_id = Some(RoomId::from("BENCH"));
            snapshot
        })
        .collect()
}

/// broadcast destination resolution
fn bench_distinct_owners(c: &mut Criterion) {
    let mut group = c.benchmark_group("DistinctOwners");

    for (members, processes) in [(10, 2), (100, 4), (1000, 16)] {
        let snapshots = room(members, processes);
        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", members, processes)),
            &snapshots,
            |b, snapshots| b.iter(|| black_box(distinct_owners(black_box(snapshots)))),
        );
    }

    group.finish();
}

/// client event parsing
fn bench_parse(c: &mut Criterion) {
    let join = r#"{"event":"join","args":["ABCD",1]}"#;
    let signal = r#"{"event":"signal","args":[{"data":{"type":"offer","sdp":"v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\n"},"to":"conn_0123456789abcdef"}]}"#;

    let mut group = c.benchmark_group("Parse");
    group.throughput(Throughput::Elements(1));

    group.bench_function("join", |b| {
        b.iter(|| black_box(ClientEvent::parse(black_box(join)).unwrap()))
    });
    group.bench_function("signal", |b| {
        b.iter(|| black_box(ClientEvent::parse(black_box(signal)).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_distinct_owners, bench_parse);
criterion_main!(benches);
