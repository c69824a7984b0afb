//! End-to-end properties of the storage engine across every store backend

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tempfile::TempDir;
use zarrkit::{
    materialize, snapshot, Array, ArrayMetadata, ArchiveState, CodecChain, CodecDescriptor,
    CompressionLevel, DataType, Endian, FileSystemStore, Group, GroupMetadata, MemoryStore, Node,
    OpenMode, Region, Snapshot, Store, ZarrError, ZipStore,
};

fn compressor_strategy() -> impl Strategy<Value = Option<CodecDescriptor>> {
    prop_oneof![
        Just(None),
        (0u8..=9).prop_map(|level| Some(CodecDescriptor::gzip(CompressionLevel::new(level)))),
        (1i32..=9).prop_map(|level| Some(CodecDescriptor::zstd(level))),
    ]
}

/// Valid chains: byte-order, optional shuffle and compressor, optional checksum
fn chain_strategy() -> impl Strategy<Value = Vec<CodecDescriptor>> {
    (
        prop_oneof![Just(Endian::Little), Just(Endian::Big)],
        prop::option::of(prop_oneof![Just(1usize), Just(2), Just(4), Just(8)]),
        compressor_strategy(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(endian, shuffle, compressor, identity, crc)| {
            let mut codecs = vec![CodecDescriptor::bytes(endian)];
            codecs.extend(shuffle.map(CodecDescriptor::shuffle));
            if identity {
                codecs.push(CodecDescriptor::identity());
            }
            codecs.extend(compressor);
            if crc {
                codecs.push(CodecDescriptor::crc32c());
            }
            codecs
        })
}

proptest! {
    #[test]
    fn codec_chain_round_trip(
        codecs in chain_strategy(),
        data in (1usize..64).prop_flat_map(|n| prop::collection::vec(any::<u8>(), n * 8)),
    ) {
        let chain = CodecChain::from_descriptors(&codecs, DataType::Float64).unwrap();
        let encoded = chain.encode(&data, data.len()).unwrap();
        let decoded = chain.decode(&encoded, data.len()).unwrap();
        prop_assert_eq!(decoded, data);
    }
}

fn float_metadata() -> ArrayMetadata {
    ArrayMetadata::new(vec![100, 100], vec![10, 10], DataType::Float32, 0.0)
}

#[tokio::test]
async fn fill_value_consistency() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let array = Array::create(store, "fill", float_metadata()).await.unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..20 {
        let start = vec![rng.random_range(0..100), rng.random_range(0..100)];
        let stop = vec![
            rng.random_range(start[0]..=100),
            rng.random_range(start[1]..=100),
        ];
        let region = Region::new(start, stop).unwrap();
        let values: Vec<f32> = array.read_region_elements(&region).await.unwrap();
        assert_eq!(values.len(), region.num_elements());
        assert!(values.iter().all(|value| *value == 0.0));
    }
}

#[tokio::test]
async fn write_read_identity_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let data: Vec<f32> = (0..100 * 100).map(|_| rng.random::<f32>()).collect();

    {
        let store: Arc<dyn Store> =
            Arc::new(FileSystemStore::open(temp_dir.path(), OpenMode::Create).await.unwrap());
        let metadata = float_metadata().with_codecs(vec![
            CodecDescriptor::bytes(Endian::Little),
            CodecDescriptor::zstd(3),
        ]);
        let array = Array::create(store, "random", metadata).await.unwrap();
        array
            .write_region_elements(&Region::full(&[100, 100]), &data)
            .await
            .unwrap();
    }

    let store: Arc<dyn Store> =
        Arc::new(FileSystemStore::open(temp_dir.path(), OpenMode::ReadOnly).await.unwrap());
    let array = Array::open(store, "random").await.unwrap();
    let back: Vec<f32> = array
        .read_region_elements(&Region::full(&[100, 100]))
        .await
        .unwrap();

    assert_eq!(back.len(), data.len());
    assert!(back
        .iter()
        .zip(&data)
        .all(|(a, b)| a.to_bits() == b.to_bits()));
    assert_eq!(array.info().await.unwrap().stored_chunks, 100);
}

#[tokio::test]
async fn archive_state_machine() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("data.zip");
    let values: Vec<i32> = (0..50).collect();

    let writer = Arc::new(ZipStore::open(&path, OpenMode::Create).await.unwrap());
    assert_eq!(writer.state(), ArchiveState::OpenForWrite);
    let store: Arc<dyn Store> = writer.clone();
    let array = Array::create(
        store,
        "values",
        ArrayMetadata::new(vec![50], vec![16], DataType::Int32, -1),
    )
    .await
    .unwrap();
    array
        .write_region_elements(&Region::full(&[50]), &values)
        .await
        .unwrap();

    // Not finalized yet
    assert!(matches!(
        ZipStore::open(&path, OpenMode::ReadOnly).await,
        Err(ZarrError::IncompleteArchive(_))
    ));

    writer.close().await.unwrap();
    assert_eq!(writer.state(), ArchiveState::Closed);
    assert!(matches!(
        array.read_region(&Region::full(&[50])).await,
        Err(ZarrError::StoreCapability(_))
    ));

    let reader: Arc<dyn Store> = Arc::new(ZipStore::open(&path, OpenMode::ReadOnly).await.unwrap());
    let array = Array::open(reader, "values").await.unwrap();
    let back: Vec<i32> = array
        .read_region_elements(&Region::full(&[50]))
        .await
        .unwrap();
    assert_eq!(back, values);

    assert!(matches!(
        array
            .write_region_elements(&Region::new(vec![0], vec![1]).unwrap(), &[5])
            .await,
        Err(ZarrError::StoreCapability(_))
    ));
}

#[tokio::test]
async fn hierarchy_round_trip() {
    let source: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let root = Group::create(source, "", GroupMetadata::new().with_attribute("name", "root"))
        .await
        .unwrap();
    let foo = root.create_group("foo", GroupMetadata::new()).await.unwrap();
    let bar = root
        .create_array("bar", ArrayMetadata::new(vec![10, 10], vec![5, 5], DataType::Int16, 0))
        .await
        .unwrap();
    foo.create_array("spam", float_metadata()).await.unwrap();
    bar.write_region_elements(&Region::full(&[10, 10]), &[3i16; 100])
        .await
        .unwrap();

    let taken = snapshot(&root).await.unwrap();
    let restored = Snapshot::from_json(&taken.to_json().unwrap()).unwrap();

    let target: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let rebuilt = materialize(target, &restored).await.unwrap();

    assert_eq!(rebuilt.attributes(), root.attributes());
    assert_eq!(rebuilt.children().await.unwrap(), vec!["bar", "foo"]);
    let foo = match rebuilt.child("foo").await.unwrap() {
        Node::Group(group) => group,
        Node::Array(_) => panic!("foo should be a group"),
    };
    assert_eq!(foo.children().await.unwrap(), vec!["spam"]);
    assert!(foo.child("spam").await.unwrap().is_array());

    // Structure travels, chunk data does not
    let bar = rebuilt.child("bar").await.unwrap();
    let bar = bar.as_array().unwrap();
    let values: Vec<i16> = bar
        .read_region_elements(&Region::full(&[10, 10]))
        .await
        .unwrap();
    assert!(values.iter().all(|value| *value == 0));
}

#[tokio::test]
async fn boundary_padding() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let array = Array::create(
        store,
        "edge",
        ArrayMetadata::new(vec![100, 10], vec![10, 10], DataType::UInt32, 0),
    )
    .await
    .unwrap();

    let pattern: Vec<u32> = (0..1000).collect();
    array
        .write_region_elements(&Region::full(&[100, 10]), &pattern)
        .await
        .unwrap();

    // Overwrite a 2x2 block straddling the edge between chunk rows 4 and 5
    array
        .write_region_elements(&Region::new(vec![49, 8], vec![51, 10]).unwrap(), &[7u32; 4])
        .await
        .unwrap();

    for row in 0..10 {
        let chunk: Vec<u32> = array.retrieve_chunk_elements(&[row, 0]).await.unwrap();
        for (offset, value) in chunk.iter().enumerate() {
            let index = row * 100 + offset;
            let (i, j) = (index / 10, index % 10);
            let expected = if (49..51).contains(&i) && j >= 8 {
                7
            } else {
                index as u32
            };
            assert_eq!(*value, expected, "element ({i}, {j})");
        }
    }

    let last: Vec<u32> = array
        .read_region_elements(&Region::new(vec![99, 9], vec![100, 10]).unwrap())
        .await
        .unwrap();
    assert_eq!(last, vec![999]);
}

#[tokio::test]
async fn boundary_chunks_keep_fill_padding() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let array = Array::create(
        store,
        "ragged",
        ArrayMetadata::new(vec![25, 7], vec![10, 5], DataType::Int8, -3),
    )
    .await
    .unwrap();

    array
        .write_region_elements(&Region::full(&[25, 7]), &vec![1i8; 25 * 7])
        .await
        .unwrap();

    // Chunk (2, 1) holds rows 20..25 and columns 5..7 of the array
    let chunk: Vec<i8> = array.retrieve_chunk_elements(&[2, 1]).await.unwrap();
    for (offset, value) in chunk.iter().enumerate() {
        let (row, col) = (offset / 5, offset % 5);
        let expected = if row < 5 && col < 2 { 1 } else { -3 };
        assert_eq!(*value, expected, "chunk offset ({row}, {col})");
    }
}
