//! Example: Generate the reference fixture set under ./fixtures
//!
//! Run with: cargo run --example generate_fixtures
//!
//! Takes no arguments. Exits 0 on success, 2 for usage/configuration errors
//! and 1 when stored data could not be written or read back.

use anyhow::{ensure, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use zarrkit::{
    materialize, open_store, snapshot, Array, ArrayMetadata, Attributes, CodecDescriptor,
    CompressionLevel, DataType, Endian, Group, GroupMetadata, MemoryStore, OpenMode, Region,
    Snapshot, Store, StoreConfig, ZarrError, ZipStore,
};

const FIXTURE_DIR: &str = "fixtures";
const SEED: u64 = 20240101;

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Path::new(FIXTURE_DIR)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fixture generation failed: {err:#}");
            let code = err.downcast_ref::<ZarrError>().map_or(1, ZarrError::exit_code);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(root: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(root).await? {
        tokio::fs::remove_dir_all(root)
            .await
            .with_context(|| format!("clearing {}", root.display()))?;
    }
    tokio::fs::create_dir_all(root).await?;

    let mut rng = StdRng::seed_from_u64(SEED);

    random_float_array(&root.join("example-1.zarr"), &mut rng)
        .await
        .context("example-1: random float array")?;
    let hierarchy = root.join("example-2.zarr");
    nested_hierarchy(&hierarchy)
        .await
        .context("example-2: nested hierarchy")?;
    zip_archive(&root.join("example-3.zip"), &mut rng)
        .await
        .context("example-3: zip archive")?;
    hierarchy_snapshot(&hierarchy, &root.join("example-2.snapshot.json"))
        .await
        .context("example-2: snapshot")?;

    info!(path = %root.display(), "fixtures written");
    Ok(())
}

async fn directory_store(path: &Path) -> anyhow::Result<Arc<dyn Store>> {
    let url = format!("file://{}", path.display());
    Ok(open_store(&StoreConfig::from_url(&url, OpenMode::Create)?).await?)
}

/// 100x100 float32 of uniform noise in 10x10 gzip chunks
async fn random_float_array(path: &Path, rng: &mut StdRng) -> anyhow::Result<()> {
    let store = directory_store(path).await?;
    let metadata = ArrayMetadata::new(vec![100, 100], vec![10, 10], DataType::Float32, 0.0)
        .with_codecs(vec![
            CodecDescriptor::bytes(Endian::Little),
            CodecDescriptor::gzip(CompressionLevel::default()),
        ])
        .with_dimension_names(["y", "x"]);
    let array = Array::create(store, "", metadata).await?;

    let data: Vec<f32> = (0..100 * 100).map(|_| rng.random::<f32>()).collect();
    let region = Region::full(&[100, 100]);
    array.write_region_elements(&region, &data).await?;

    let back: Vec<f32> = array.read_region_elements(&region).await?;
    ensure!(back == data, "read-back differs from written data");

    info!("{}", array.info().await?.summary());
    Ok(())
}

/// root{name=root} / bar, foo / spam
async fn nested_hierarchy(path: &Path) -> anyhow::Result<()> {
    let store = directory_store(path).await?;
    let root = Group::create(store, "", GroupMetadata::new().with_attribute("name", "root")).await?;

    let foo = root
        .create_group("foo", GroupMetadata::new().with_attribute("description", "a sub-group"))
        .await?;
    let bar = root
        .create_array(
            "bar",
            ArrayMetadata::new(vec![20, 20], vec![10, 10], DataType::Int32, -1)
                .with_codecs(vec![
                    CodecDescriptor::bytes(Endian::Little),
                    CodecDescriptor::zstd(3),
                ]),
        )
        .await?;
    let spam = foo
        .create_array(
            "spam",
            ArrayMetadata::new(vec![100, 10], vec![10, 10], DataType::UInt16, 0)
                .with_codecs(vec![
                    CodecDescriptor::bytes(Endian::Big),
                    CodecDescriptor::shuffle(2),
                    CodecDescriptor::zstd(3),
                    CodecDescriptor::crc32c(),
                ])
                .with_attribute("units", "counts"),
        )
        .await?;

    // Only the diagonal chunks of bar are written; the rest read as fill
    for i in 0..2 {
        let chunk: Vec<i32> = (0..100).map(|v| v + 100 * i as i32).collect();
        bar.store_chunk_elements(&[i, i], &chunk).await?;
    }

    let pattern: Vec<u16> = (0..1000).collect();
    spam.write_region_elements(&Region::full(&[100, 10]), &pattern)
        .await?;

    info!(children = ?root.children().await?, "hierarchy written");
    Ok(())
}

/// A 1-D int64 array in a zip archive, finalized on close
async fn zip_archive(path: &Path, rng: &mut StdRng) -> anyhow::Result<()> {
    let values: Vec<i64> = (0..250).map(|_| rng.random_range(-1000..1000)).collect();
    let written = values.clone();

    ZipStore::scoped(path, OpenMode::Create, |store| async move {
        let store: Arc<dyn Store> = store;
        let root = Group::create(
            Arc::clone(&store),
            "",
            GroupMetadata::new().with_attributes(Attributes::from([(
                "source".to_string(),
                "generate_fixtures".into(),
            )])),
        )
        .await?;
        let array = root
            .create_array(
                "values",
                ArrayMetadata::new(vec![250], vec![64], DataType::Int64, 0)
                    .with_codecs(vec![
                        CodecDescriptor::bytes(Endian::Little),
                        CodecDescriptor::crc32c(),
                    ]),
            )
            .await?;
        array.write_region_elements(&Region::full(&[250]), &written).await
    })
    .await?;

    // Reopen the finalized archive read-only and check the values survived
    let reader: Arc<dyn Store> = Arc::new(ZipStore::open(path, OpenMode::ReadOnly).await?);
    let array = Array::open(Arc::clone(&reader), "values").await?;
    let back: Vec<i64> = array.read_region_elements(&Region::full(&[250])).await?;
    reader.close().await?;
    ensure!(back == values, "archive read-back differs from written data");
    Ok(())
}

/// Snapshot the directory hierarchy, persist it, and rebuild it in memory
async fn hierarchy_snapshot(hierarchy: &Path, output: &Path) -> anyhow::Result<()> {
    let url = format!("file://{}", hierarchy.display());
    let store = open_store(&StoreConfig::from_url(&url, OpenMode::ReadOnly)?).await?;
    let root = Group::open(store, "").await?;

    let taken = snapshot(&root).await?;
    tokio::fs::write(output, taken.to_json()?).await?;

    let restored = Snapshot::from_json(&tokio::fs::read(output).await?)?;
    let rebuilt = materialize(Arc::new(MemoryStore::new()), &restored).await?;
    ensure!(
        rebuilt.attributes() == root.attributes(),
        "rebuilt root attributes differ"
    );
    info!(nodes = restored.len(), "snapshot round-tripped");
    Ok(())
}
