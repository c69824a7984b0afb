//! Example: Concurrent region writes through shared array handles
//!
//! Run with: cargo run --example concurrent_writes

use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};
use zarrkit::{
    Array, ArrayMetadata, CodecDescriptor, DataType, Endian, MemoryStore, Region, Store,
};

const ROWS: usize = 512;
const COLS: usize = 512;
const WRITERS: usize = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    println!("zarrkit Concurrent Write Demo");
    println!("=============================\n");

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let metadata = ArrayMetadata::new(vec![ROWS, COLS], vec![64, 64], DataType::UInt32, 0)
        .with_codecs(vec![CodecDescriptor::bytes(Endian::Little), CodecDescriptor::zstd(3)]);
    let array = Array::create(store, "counters", metadata).await?;

    println!("Array: {} x {} uint32 in 64 x 64 chunks", ROWS, COLS);
    println!("Writers: {} tasks, one horizontal band each", WRITERS);
    println!("Bands are {} rows tall, so neighbours share chunks\n", ROWS / WRITERS);

    // Each band is 32 rows, so two writers touch every 64-row chunk.
    // Per-chunk locks keep their read-modify-write cycles from interleaving.
    let band = ROWS / WRITERS;
    let start = Instant::now();
    let tasks = (0..WRITERS).map(|writer| {
        let array = array.clone();
        tokio::spawn(async move {
            let region = Region::new(vec![writer * band, 0], vec![(writer + 1) * band, COLS])?;
            let values = vec![writer as u32 + 1; band * COLS];
            array.write_region_elements(&region, &values).await
        })
    });
    for result in try_join_all(tasks).await? {
        result?;
    }
    let elapsed = start.elapsed();

    let values: Vec<u32> = array.read_region_elements(&Region::full(&[ROWS, COLS])).await?;
    let mut lost = 0usize;
    for (index, value) in values.iter().enumerate() {
        let expected = (index / COLS / band) as u32 + 1;
        if *value != expected {
            lost += 1;
        }
    }

    println!("Wrote {} elements in {:?}", ROWS * COLS, elapsed);
    println!("Lost updates: {}", lost);
    println!("{}", array.info().await?.summary());

    anyhow::ensure!(lost == 0, "{} elements lost to interleaved writes", lost);
    Ok(())
}
