//! End-to-end scenarios: write, close, reopen, query.

use alopex_burrow::{
    CompressionType, MeasurementSchema, MemoryInput, MemoryOutput, Path, RowRecord, TSDataType,
    TSEncoding, Tablet, TimeRange, TsFileConfig, TsFileError, TsFileReader, TsFileWriter,
    TsRecord, Value,
};
use std::sync::Arc;
use tempfile::TempDir;

fn memory_writer(config: TsFileConfig) -> TsFileWriter<MemoryOutput> {
    TsFileWriter::new(MemoryOutput::new(), config).unwrap()
}

fn reopen(writer: &TsFileWriter<MemoryOutput>) -> TsFileReader {
    let bytes = writer.output().as_bytes().to_vec();
    TsFileReader::from_input(Arc::new(MemoryInput::from(bytes))).unwrap()
}

fn collect(reader: &TsFileReader, paths: &[Path]) -> Vec<RowRecord> {
    reader.query(paths).collect::<Result<Vec<_>, _>>().unwrap()
}

fn paths(device: &str, measurements: &[&str]) -> Vec<Path> {
    measurements.iter().map(|m| Path::new(device, *m)).collect()
}

#[test]
fn test_end_to_end_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("scenario.tsfile");

    let schemas = vec![
        MeasurementSchema::new("s1", TSDataType::Int32),
        MeasurementSchema::new("s2", TSDataType::Int64),
    ];
    {
        let mut writer = TsFileWriter::create(&file_path, TsFileConfig::default()).unwrap();
        for schema in &schemas {
            writer.register_timeseries("d1", schema.clone()).unwrap();
        }
        let mut tablet = Tablet::new("d1", schemas.clone(), 2);
        for (row, (ts, s1, s2)) in [(100, 1i32, 10i64), (101, 2, 20)].into_iter().enumerate() {
            tablet.add_timestamp(row, ts).unwrap();
            tablet.add_value(row, 0, s1).unwrap();
            tablet.add_value(row, 1, s2).unwrap();
        }
        writer.write_tablet(&tablet).unwrap();
        writer.close().unwrap();
    }

    let reader = TsFileReader::open(&file_path).unwrap();
    let rows = collect(&reader, &paths("d1", &["s1", "s2"]));
    assert_eq!(
        rows,
        vec![
            RowRecord::new(100, vec![Some(Value::Int32(1)), Some(Value::Int64(10))]),
            RowRecord::new(101, vec![Some(Value::Int32(2)), Some(Value::Int64(20))]),
        ]
    );
}

#[test]
fn test_truncated_trailer_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("truncated.tsfile");
    {
        let mut writer = TsFileWriter::create(&file_path, TsFileConfig::default()).unwrap();
        writer
            .register_timeseries("d1", MeasurementSchema::new("s1", TSDataType::Int32))
            .unwrap();
        writer.write_record(&TsRecord::new("d1", 1).with_field("s1", 1i32)).unwrap();
        writer.close().unwrap();
    }

    let len = std::fs::metadata(&file_path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&file_path).unwrap();
    file.set_len(len - 8).unwrap();
    drop(file);

    let err = TsFileReader::open(&file_path).err().unwrap();
    assert!(err.is_format_error(), "unexpected error: {:?}", err);
}

#[test]
fn test_corrupted_footer_detected() {
    let mut writer = memory_writer(TsFileConfig::default());
    writer
        .register_timeseries("d1", MeasurementSchema::new("s1", TSDataType::Int64))
        .unwrap();
    writer.write_record(&TsRecord::new("d1", 1).with_field("s1", 1i64)).unwrap();
    let summary = writer.close().unwrap();

    let mut bytes = writer.output().as_bytes().to_vec();
    bytes[summary.footer_offset as usize + 2] ^= 0x01;
    let err = TsFileReader::from_input(Arc::new(MemoryInput::from(bytes))).err().unwrap();
    assert!(matches!(err, TsFileError::ChecksumMismatch { .. }));
    assert!(err.is_format_error());
}

/// One Int64 series with a single chunk, closed into memory.
fn small_file() -> Vec<u8> {
    let mut writer = memory_writer(TsFileConfig::default());
    writer
        .register_timeseries("d1", MeasurementSchema::new("s1", TSDataType::Int64))
        .unwrap();
    for ts in 0..10 {
        writer.write_record(&TsRecord::new("d1", ts).with_field("s1", ts * 3)).unwrap();
    }
    writer.close().unwrap();
    writer.output().as_bytes().to_vec()
}

#[test]
fn test_footer_offset_near_u64_max_rejected() {
    for footer_offset in [u64::MAX - 1, u64::MAX, u64::MAX - 3] {
        let mut bytes = small_file();
        let trailer = bytes.len() - 14;
        bytes[trailer..trailer + 8].copy_from_slice(&footer_offset.to_le_bytes());
        let err = TsFileReader::from_input(Arc::new(MemoryInput::from(bytes))).err().unwrap();
        assert!(matches!(err, TsFileError::CorruptFooter(_)), "unexpected error: {:?}", err);
    }
}

#[test]
fn test_oversized_chunk_data_size_fails_query() {
    let bytes = small_file();
    let chunk_offset = {
        let reader = TsFileReader::from_input(Arc::new(MemoryInput::from(bytes.clone()))).unwrap();
        reader.metadata().timeseries(&Path::new("d1", "s1")).unwrap().chunks[0].offset as usize
    };
    let header_len = u32::from_le_bytes(bytes[chunk_offset..chunk_offset + 4].try_into().unwrap()) as usize;
    // data_size closes the chunk header.
    let data_size_at = chunk_offset + 4 + header_len - 8;

    for data_size in [u64::MAX, u64::MAX - 7, bytes.len() as u64] {
        let mut corrupted = bytes.clone();
        corrupted[data_size_at..data_size_at + 8].copy_from_slice(&data_size.to_le_bytes());
        // The footer is intact, so the file still opens.
        let reader = TsFileReader::from_input(Arc::new(MemoryInput::from(corrupted))).unwrap();

        let rows = reader.query(&paths("d1", &["s1"])).collect::<Result<Vec<_>, _>>();
        let err = rows.err().unwrap();
        assert!(matches!(err, TsFileError::Truncated { .. }), "unexpected error: {:?}", err);
        assert!(reader.chunk_groups().is_err());
        assert!(reader.scan_chunks(&Path::new("d1", "s1")).is_err());
    }
}

#[test]
fn test_unclosed_file_has_no_footer() {
    let mut writer = memory_writer(TsFileConfig::default().with_group_size_threshold(1));
    writer
        .register_timeseries("d1", MeasurementSchema::new("s1", TSDataType::Int32))
        .unwrap();
    writer.write_record(&TsRecord::new("d1", 1).with_field("s1", 1i32)).unwrap();
    assert_eq!(writer.chunk_group_count(), 1);

    let bytes = writer.output().as_bytes().to_vec();
    let err = TsFileReader::from_input(Arc::new(MemoryInput::from(bytes))).err().unwrap();
    assert!(err.is_format_error(), "unexpected error: {:?}", err);
}

#[test]
fn test_wrong_head_magic() {
    let mut writer = memory_writer(TsFileConfig::default());
    writer.close().unwrap();
    let mut bytes = writer.output().as_bytes().to_vec();
    bytes[0] = b'X';
    let err = TsFileReader::from_input(Arc::new(MemoryInput::from(bytes))).err().unwrap();
    assert!(matches!(err, TsFileError::InvalidMagic(_)));

    let mut bytes = writer.output().as_bytes().to_vec();
    bytes[6] = 9;
    let err = TsFileReader::from_input(Arc::new(MemoryInput::from(bytes))).err().unwrap();
    assert!(matches!(err, TsFileError::UnsupportedVersion(9)));
}

#[test]
fn test_empty_file_roundtrip() {
    let mut writer = memory_writer(TsFileConfig::default());
    let summary = writer.close().unwrap();
    assert_eq!(summary.chunk_group_count, 0);
    let reader = reopen(&writer);
    assert!(reader.devices().is_empty());
    assert!(reader.chunk_groups().unwrap().is_empty());
    assert!(collect(&reader, &paths("d1", &["s1"])).is_empty());
}

#[test]
fn test_flush_thresholds() {
    // Each tablet buffers 100 int64 points at 16 bytes apiece.
    let mut writer = memory_writer(TsFileConfig::default().with_group_size_threshold(4000));
    let schema = MeasurementSchema::new("s1", TSDataType::Int64);
    writer.register_timeseries("d1", schema.clone()).unwrap();

    let mut tablet = Tablet::new("d1", vec![schema], 100);
    let mut counts = Vec::new();
    for batch in 0..6i64 {
        tablet.reset();
        for row in 0..100 {
            let ts = batch * 100 + row as i64;
            tablet.add_timestamp(row, ts).unwrap();
            tablet.add_value(row, 0, ts).unwrap();
        }
        writer.write_tablet(&tablet).unwrap();
        counts.push(writer.chunk_group_count());
    }
    assert_eq!(counts, vec![0, 0, 1, 1, 1, 2]);

    writer.write_record(&TsRecord::new("d1", 600).with_field("s1", 600i64)).unwrap();
    let summary = writer.close().unwrap();
    assert_eq!(summary.chunk_group_count, 3);
    assert_eq!(summary.point_count, 601);

    let reader = reopen(&writer);
    let groups = reader.chunk_groups().unwrap();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|g| g.header.device_id == "d1"));
    let rows = collect(&reader, &paths("d1", &["s1"]));
    assert_eq!(rows.len(), 601);
    assert!(rows.iter().enumerate().all(|(i, r)| r.timestamp == i as i64));
}

#[test]
fn test_non_aligned_order_preservation() {
    let mut writer = memory_writer(TsFileConfig::default().with_max_points_per_page(7));
    writer
        .register_timeseries("d1", MeasurementSchema::new("s1", TSDataType::Int32))
        .unwrap();
    writer
        .register_timeseries(
            "d1",
            MeasurementSchema::new("s2", TSDataType::Double).with_encoding(TSEncoding::Gorilla),
        )
        .unwrap();

    for ts in 0..60i64 {
        let mut record = TsRecord::new("d1", ts);
        if ts % 2 == 0 {
            record.add_field("s1", ts as i32);
        }
        if ts % 3 == 0 {
            record.add_field("s2", ts as f64 / 3.0);
        }
        if !record.fields.is_empty() {
            writer.write_record(&record).unwrap();
        }
    }
    writer.close().unwrap();

    let reader = reopen(&writer);
    let rows = collect(&reader, &paths("d1", &["s1", "s2"]));
    let expected: Vec<i64> = (0..60).filter(|ts| ts % 2 == 0 || ts % 3 == 0).collect();
    assert_eq!(rows.iter().map(|r| r.timestamp).collect::<Vec<_>>(), expected);
    assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    for row in &rows {
        let ts = row.timestamp;
        assert_eq!(row.get(0).cloned(), (ts % 2 == 0).then(|| Value::Int32(ts as i32)));
        assert_eq!(row.get(1).cloned(), (ts % 3 == 0).then(|| Value::Double(ts as f64 / 3.0)));
    }
}

#[test]
fn test_aligned_integrity() {
    let mut writer = memory_writer(
        TsFileConfig::default()
            .with_max_points_per_page(5)
            .with_group_size_threshold(300),
    );
    writer
        .register_aligned_timeseries(
            "v1",
            vec![
                MeasurementSchema::new("a", TSDataType::Int64).with_encoding(TSEncoding::Ts2Diff),
                MeasurementSchema::new("b", TSDataType::Text).with_compression(CompressionType::Zstd),
                MeasurementSchema::new("c", TSDataType::Boolean).with_encoding(TSEncoding::Rle),
            ],
        )
        .unwrap();
    for ts in 0..50i64 {
        let mut record = TsRecord::new("v1", ts * 10);
        record.add_field("a", ts);
        if ts % 4 != 0 {
            record.add_field("b", format!("v{}", ts));
        }
        if ts % 5 == 0 {
            record.add_field("c", ts % 2 == 0);
        }
        writer.write_record(&record).unwrap();
    }
    let summary = writer.close().unwrap();
    assert!(summary.chunk_group_count > 1);
    assert_eq!(summary.point_count, 50);

    let reader = reopen(&writer);
    assert_eq!(reader.is_aligned("v1"), Some(true));

    let rows = collect(&reader, &paths("v1", &["c", "a", "b"]));
    assert_eq!(rows.len(), 50);
    for (i, row) in rows.iter().enumerate() {
        let ts = i as i64;
        assert_eq!(row.timestamp, ts * 10);
        assert_eq!(row.fields.len(), 3);
        assert_eq!(row.get(1), Some(&Value::Int64(ts)));
        assert_eq!(row.get(2).cloned(), (ts % 4 != 0).then(|| Value::Text(format!("v{}", ts))));
        assert_eq!(row.get(0).cloned(), (ts % 5 == 0).then(|| Value::Boolean(ts % 2 == 0)));
    }

    // Rows where every selected column is null are not emitted.
    let rows = collect(&reader, &paths("v1", &["c"]));
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|r| r.timestamp % 50 == 0));
}

#[test]
fn test_query_range_and_absent_paths() {
    let mut writer = memory_writer(TsFileConfig::default().with_max_points_per_page(10));
    writer
        .register_timeseries("d1", MeasurementSchema::new("s1", TSDataType::Float))
        .unwrap();
    for ts in 0..100i64 {
        writer
            .write_record(&TsRecord::new("d1", ts).with_field("s1", ts as f32))
            .unwrap();
    }
    writer.close().unwrap();
    let reader = reopen(&writer);

    let selected = vec![Path::new("d1", "s1"), Path::new("d1", "missing"), Path::new("d9", "s1")];
    let rows = reader
        .query_range(&selected, TimeRange::new(25, 34))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0].timestamp, 25);
    assert_eq!(rows[9].timestamp, 34);
    assert!(rows.iter().all(|r| r.is_null(1) && r.is_null(2)));
    assert_eq!(rows[0].to_string(), "25\t25\tnull\tnull");

    assert!(collect(&reader, &selected[1..]).is_empty());
    assert!(reader
        .query_range(&selected[..1], TimeRange::new(200, 300))
        .next()
        .is_none());
}

#[test]
fn test_concurrent_queries() {
    let mut writer = memory_writer(TsFileConfig::default().with_max_points_per_page(64));
    for device in ["d1", "d2", "d3", "d4"] {
        writer
            .register_timeseries(device, MeasurementSchema::new("s1", TSDataType::Int64))
            .unwrap();
        for ts in 0..500i64 {
            writer
                .write_record(&TsRecord::new(device, ts).with_field("s1", ts * 2))
                .unwrap();
        }
    }
    writer.close().unwrap();
    let reader = Arc::new(reopen(&writer));

    std::thread::scope(|scope| {
        for device in ["d1", "d2", "d3", "d4"] {
            let reader = Arc::clone(&reader);
            scope.spawn(move || {
                let rows = collect(&reader, &paths(device, &["s1"]));
                assert_eq!(rows.len(), 500);
                let sum: i64 = rows.iter().filter_map(|r| r.get(0)?.as_i64()).sum();
                assert_eq!(sum, (0..500i64).map(|v| v * 2).sum::<i64>());
            });
        }
    });
}

#[test]
fn test_schema_conflict_and_rejected_batches() {
    let mut writer = memory_writer(TsFileConfig::default());
    writer
        .register_timeseries("d1", MeasurementSchema::new("s1", TSDataType::Int32))
        .unwrap();
    let err = writer
        .register_timeseries("d1", MeasurementSchema::new("s1", TSDataType::Double))
        .unwrap_err();
    assert!(matches!(err, TsFileError::SchemaConflict { .. }));

    writer.write_record(&TsRecord::new("d1", 10).with_field("s1", 1i32)).unwrap();
    let err = writer
        .write_record(&TsRecord::new("d1", 9).with_field("s1", 2i32))
        .unwrap_err();
    assert!(matches!(err, TsFileError::OutOfOrderTimestamp { .. }));

    writer.close().unwrap();
    let reader = reopen(&writer);
    let rows = collect(&reader, &paths("d1", &["s1"]));
    assert_eq!(rows, vec![RowRecord::new(10, vec![Some(Value::Int32(1))])]);
}
