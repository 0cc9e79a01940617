use concurrent_collections::structures::HashMap;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections;

use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;

fn bench_typical(num_threads: usize) {
    let map: Arc<HashMap<u32, u32>> = Arc::default();
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for t in 0..num_threads as u32 {
        let map_clone = map.clone();
        let base = (t % 2) * 1000;
        wait_vec.push(thread::spawn(move || {
            for i in base..base + 1000 {
                map_clone.insert(i, i);
            }
            for i in 0..7000 {
                map_clone.find(&((i % 1000) + base));
            }
            for i in base..base + 200 {
                map_clone.remove(&i);
            }
        }));
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_typical_lock(num_threads: usize) {
    let map: Arc<Mutex<collections::HashMap<u32, u32>>> = Arc::default();
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for t in 0..num_threads as u32 {
        let map_clone = map.clone();
        let base = (t % 2) * 1000;
        wait_vec.push(thread::spawn(move || {
            for i in base..base + 1000 {
                map_clone.lock().unwrap().insert(i, i);
            }
            for i in 0..7000 {
                map_clone.lock().unwrap().get(&((i % 1000) + base)).cloned();
            }
            for i in base..base + 200 {
                map_clone.lock().unwrap().remove(&i);
            }
        }));
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

/// Every thread inserts its own keys, forcing repeated resizes from the minimum capacity.
fn bench_heavy_insert(num_threads: usize) {
    let map: Arc<HashMap<u32, u32>> = Arc::default();
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for t in 0..num_threads as u32 {
        let map_clone = map.clone();
        wait_vec.push(thread::spawn(move || {
            for i in 0..2000 {
                map_clone.insert(t * 2000 + i, i);
            }
        }));
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn bench_heavy_insert_lock(num_threads: usize) {
    let map: Arc<Mutex<collections::HashMap<u32, u32>>> = Arc::default();
    let mut wait_vec: Vec<JoinHandle<()>> = Vec::new();

    for t in 0..num_threads as u32 {
        let map_clone = map.clone();
        wait_vec.push(thread::spawn(move || {
            for i in 0..2000 {
                map_clone.lock().unwrap().insert(t * 2000 + i, i);
            }
        }));
    }

    for handle in wait_vec {
        handle.join().unwrap();
    }
}

fn thread_counts() -> Vec<usize> {
    (2..18).filter(|num| num % 2 == 0).collect()
}

fn bench_map_typical(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_typical");
    for num_threads in thread_counts() {
        group.bench_with_input(BenchmarkId::new("lock", num_threads), &num_threads, |b, n| b.iter(|| bench_typical_lock(*n)));
        group.bench_with_input(BenchmarkId::new("concurrent", num_threads), &num_threads, |b, n| b.iter(|| bench_typical(*n)));
    }
    group.finish();
}

fn bench_map_heavy_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_heavy_insert");
    for num_threads in thread_counts() {
        group.bench_with_input(BenchmarkId::new("lock", num_threads), &num_threads, |b, n| b.iter(|| bench_heavy_insert_lock(*n)));
        group.bench_with_input(BenchmarkId::new("concurrent", num_threads), &num_threads, |b, n| b.iter(|| bench_heavy_insert(*n)));
    }
    group.finish();
}

criterion_group!(benches, bench_map_typical, bench_map_heavy_insert);
criterion_main!(benches);
