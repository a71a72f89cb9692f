// Integration tests for retailiq-warehouse
//
// Write tables through the partition writer, then read them back through the
// warehouse snapshot, the pruned reader and the query façade.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use parquet::arrow::ArrowWriter;
use retailiq_warehouse::{
    filter, metastore, retail_tables, FileProblem, MetastorePolicy, PartitionColumn,
    PartitionFilter, PartitionType, PartitionValue, PartitionWriter, TableDeclaration, Warehouse,
    WarehouseError, WarehouseOptions, WriteOptions, HIVE_DEFAULT_PARTITION, METADATA_FILE,
};
use tempfile::TempDir;

fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, a)| a).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
}

fn fact_sales_decl() -> TableDeclaration {
    TableDeclaration::new(
        "fact_sales",
        vec![
            PartitionColumn::int64("order_year"),
            PartitionColumn::int64("order_month"),
        ],
    )
}

/// Three rows in 2017-11, two in 2017-12
fn fact_sales_rows() -> RecordBatch {
    batch(vec![
        (
            "order_id",
            Arc::new(StringArray::from(vec!["CA-1", "CA-2", "CA-3", "CA-4", "CA-5"])) as ArrayRef,
        ),
        (
            "sales",
            Arc::new(Float64Array::from(vec![100.0, 250.5, 12.25, 80.0, 40.0])) as ArrayRef,
        ),
        (
            "order_year",
            Arc::new(Int64Array::from(vec![2017, 2017, 2017, 2017, 2017])) as ArrayRef,
        ),
        (
            "order_month",
            Arc::new(Int64Array::from(vec![11, 12, 11, 12, 11])) as ArrayRef,
        ),
    ])
}

fn write_fact_sales(root: &Path) {
    PartitionWriter::new(root, WriteOptions::default())
        .write_table(&fact_sales_decl(), &fact_sales_rows())
        .unwrap();
}

fn open(root: &Path) -> Warehouse {
    Warehouse::open(
        root,
        WarehouseOptions {
            declarations: retail_tables(),
            ..Default::default()
        },
    )
    .unwrap()
}

fn total_sales(batch: &RecordBatch) -> f64 {
    batch
        .column_by_name("sales")
        .unwrap()
        .as_primitive::<Float64Type>()
        .iter()
        .flatten()
        .sum()
}

#[test]
fn test_fact_sales_scenario_prunes_to_one_partition() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let result = warehouse
        .scan("fact_sales", &filter([("order_year", 2017i64), ("order_month", 11)]))
        .unwrap();
    assert_eq!(result.batch.num_rows(), 3);
    assert_eq!(result.files.len(), 1);
    assert!(result.files[0].ends_with("order_year=2017/order_month=11/data.parquet"));

    let months = result
        .batch
        .column_by_name("order_month")
        .unwrap()
        .as_primitive::<Int64Type>();
    assert!(months.iter().all(|m| m == Some(11)));
}

#[test]
fn test_partition_columns_are_typed_on_both_read_paths() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let full = warehouse
        .read_table("fact_sales", &PartitionFilter::new())
        .unwrap();
    let pruned = warehouse
        .read_table("fact_sales", &filter([("order_month", 12i64)]))
        .unwrap();

    for batch in [&full, &pruned] {
        let schema = batch.schema();
        assert_eq!(
            schema.field_with_name("order_year").unwrap().data_type(),
            &DataType::Int64
        );
        assert_eq!(
            schema.field_with_name("order_month").unwrap().data_type(),
            &DataType::Int64
        );
    }
    assert_eq!(pruned.num_rows(), 2);
}

#[test]
fn test_round_trip_through_unfiltered_read() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let read = warehouse
        .read_table("fact_sales", &PartitionFilter::new())
        .unwrap();
    assert_eq!(read.num_rows(), 5);
    assert!((total_sales(&read) - total_sales(&fact_sales_rows())).abs() < 1e-9);

    let mut ids: Vec<String> = read
        .column_by_name("order_id")
        .unwrap()
        .as_string::<i32>()
        .iter()
        .flatten()
        .map(str::to_string)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["CA-1", "CA-2", "CA-3", "CA-4", "CA-5"]);

    // Payload columns first, partition columns appended in declared order
    let names: Vec<String> = read
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names, vec!["order_id", "sales", "order_year", "order_month"]);
}

#[test]
fn test_pruning_reads_only_matching_partitions() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let by_year = warehouse
        .scan("fact_sales", &filter([("order_year", 2017i64)]))
        .unwrap();
    assert_eq!(by_year.files.len(), 2);
    assert_eq!(by_year.batch.num_rows(), 5);

    // Filtering only the inner level walks every outer directory
    let by_month = warehouse
        .scan("fact_sales", &filter([("order_month", "12")]))
        .unwrap();
    assert_eq!(by_month.files.len(), 1);
    assert_eq!(by_month.batch.num_rows(), 2);
}

#[test]
fn test_reads_are_idempotent() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let filters = filter([("order_month", 11i64)]);
    let first = warehouse.read_table("fact_sales", &filters).unwrap();
    let second = warehouse.read_table("fact_sales", &filters).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_empty_partition_returns_empty_result_with_schema() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let result = warehouse
        .scan("fact_sales", &filter([("order_year", 2018i64)]))
        .unwrap();
    assert_eq!(result.batch.num_rows(), 0);
    assert!(result.files.is_empty());
    assert!(result.batch.schema().field_with_name("sales").is_ok());
    assert!(result.batch.schema().field_with_name("order_year").is_ok());
}

fn write_customers(root: &Path) -> TableDeclaration {
    let declaration = TableDeclaration::new("dim_customer", vec![PartitionColumn::utf8("region")]);
    PartitionWriter::new(root, WriteOptions::default())
        .write_table(
            &declaration,
            &batch(vec![
                ("customer_sk", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
                ("region", Arc::new(StringArray::from(vec!["East", "West"])) as ArrayRef),
            ]),
        )
        .unwrap();
    declaration
}

#[test]
fn test_filter_on_unencodable_value_matches_nothing() {
    let dir = TempDir::new().unwrap();
    write_customers(dir.path());
    let warehouse = Warehouse::open(dir.path(), WarehouseOptions::default()).unwrap();

    for value in ["", "North/West", ".."] {
        let result = warehouse
            .scan("dim_customer", &filter([("region", value)]))
            .unwrap();
        assert_eq!(result.batch.num_rows(), 0, "filter region={:?}", value);
        assert!(result.files.is_empty());
    }

    let read = warehouse
        .query("SELECT * FROM dim_customer WHERE region=''")
        .unwrap();
    assert_eq!(read.num_rows(), 0);
}

#[test]
fn test_null_sentinel_string_is_rejected_on_write() {
    let dir = TempDir::new().unwrap();
    let declaration = TableDeclaration::new("dim_customer", vec![PartitionColumn::utf8("region")]);

    let err = PartitionWriter::new(dir.path(), WriteOptions::default())
        .write_table(
            &declaration,
            &batch(vec![
                ("customer_sk", Arc::new(Int64Array::from(vec![1])) as ArrayRef),
                (
                    "region",
                    Arc::new(StringArray::from(vec![HIVE_DEFAULT_PARTITION])) as ArrayRef,
                ),
            ]),
        )
        .unwrap_err();
    assert!(matches!(err, WarehouseError::InvalidPartitionValue { .. }));
    assert_eq!(err.code(), Some("E002"));
    assert!(!dir.path().join("dim_customer").exists());
}

#[test]
fn test_unknown_table_and_unknown_filter_column() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let err = warehouse
        .read_table("fact_returns", &PartitionFilter::new())
        .unwrap_err();
    assert!(matches!(err, WarehouseError::UnknownTable { .. }));
    assert_eq!(err.code(), Some("E001"));

    let err = warehouse
        .read_table("fact_sales", &filter([("region", "East")]))
        .unwrap_err();
    assert!(matches!(err, WarehouseError::UnknownPartitionColumn { .. }));
}

#[test]
fn test_metastore_diverges_when_partition_is_deleted() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    fs::remove_dir_all(
        dir.path()
            .join("fact_sales")
            .join("order_year=2017")
            .join("order_month=11"),
    )
    .unwrap();

    let warehouse = open(dir.path());
    assert_eq!(warehouse.metadata("fact_sales").unwrap().record_count, 5);
    assert_eq!(warehouse.metadata("fact_sales").unwrap().partitions.len(), 2);

    let read = warehouse
        .read_table("fact_sales", &PartitionFilter::new())
        .unwrap();
    assert_eq!(read.num_rows(), 2);

    let tables = warehouse.show_tables();
    assert_eq!(tables[0].name, "fact_sales");
    assert_eq!(tables[0].record_count, 5);

    let partitions = warehouse.show_partitions("fact_sales").unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].relative_path, "order_year=2017/order_month=12");
    assert_eq!(partitions[0].row_count, 2);

    let report = warehouse.verify(&[fact_sales_decl()]);
    assert!(!report.healthy());
    assert_eq!(
        report.tables[0].problems,
        vec![FileProblem::Missing {
            path: "order_year=2017/order_month=11/data.parquet".to_string()
        }]
    );
    assert!(!report.tables[0].rows_match());
}

#[test]
fn test_verify_detects_checksum_mismatch() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());

    let warehouse = open(dir.path());
    let report = warehouse.verify(&[fact_sales_decl()]);
    assert!(report.healthy());
    assert!(report.total_bytes > 0);
    assert_eq!(report.tables[0].physical_rows, Some(5));

    // Rewrite one data file with different (still valid) content
    let path = dir
        .path()
        .join("fact_sales/order_year=2017/order_month=12/data.parquet");
    let replacement = batch(vec![
        ("order_id", Arc::new(StringArray::from(vec!["XX-1"])) as ArrayRef),
        ("sales", Arc::new(Float64Array::from(vec![1.0])) as ArrayRef),
    ]);
    let file = fs::File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, replacement.schema(), None).unwrap();
    writer.write(&replacement).unwrap();
    writer.close().unwrap();

    let report = warehouse.verify(&[fact_sales_decl()]);
    assert!(!report.healthy());
    assert!(matches!(
        report.tables[0].problems[0],
        FileProblem::ChecksumMismatch { .. }
    ));
}

#[test]
fn test_verify_reports_undeclared_table_missing() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let report = warehouse.verify(&retail_tables());
    assert_eq!(report.tables.len(), 6);
    assert!(!report.healthy());
    let customer = report
        .tables
        .iter()
        .find(|t| t.table == "dim_customer")
        .unwrap();
    assert!(!customer.in_metastore);
}

#[test]
fn test_strict_and_lenient_metastore_policy() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());

    let broken = dir.path().join("dim_product");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join(METADATA_FILE), "{\"table_name\": ").unwrap();

    let err = Warehouse::open(dir.path(), WarehouseOptions::default()).unwrap_err();
    assert!(matches!(err, WarehouseError::MetastoreCorrupt { .. }));
    assert_eq!(err.code(), Some("E004"));

    let warehouse = Warehouse::open(
        dir.path(),
        WarehouseOptions {
            policy: MetastorePolicy::Lenient,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(warehouse.table_names(), vec!["fact_sales".to_string()]);
}

#[test]
fn test_schema_contract_on_rewrite() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());

    let changed = batch(vec![
        ("order_id", Arc::new(StringArray::from(vec!["CA-9"])) as ArrayRef),
        ("sales", Arc::new(Int64Array::from(vec![10])) as ArrayRef),
        ("order_year", Arc::new(Int64Array::from(vec![2018])) as ArrayRef),
        ("order_month", Arc::new(Int64Array::from(vec![1])) as ArrayRef),
    ]);

    let err = PartitionWriter::new(dir.path(), WriteOptions::default())
        .write_table(&fact_sales_decl(), &changed)
        .unwrap_err();
    assert!(matches!(err, WarehouseError::SchemaIncompatible { .. }));

    // The previous table is untouched
    let warehouse = open(dir.path());
    assert_eq!(warehouse.metadata("fact_sales").unwrap().record_count, 5);

    let summary = PartitionWriter::new(
        dir.path(),
        WriteOptions {
            allow_schema_change: true,
            ..Default::default()
        },
    )
    .write_table(&fact_sales_decl(), &changed)
    .unwrap();
    assert_eq!(summary.schema_version, 2);

    let mut warehouse = warehouse;
    warehouse.refresh().unwrap();
    let metadata = warehouse.metadata("fact_sales").unwrap();
    assert_eq!(metadata.schema_version, 2);
    assert_eq!(metadata.record_count, 1);
    assert_eq!(
        metadata.partitions,
        vec![vec![PartitionValue::Int(2018), PartitionValue::Int(1)]]
    );
}

#[test]
fn test_rewrite_replaces_tree_and_leaves_no_staging() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());

    let only_december = batch(vec![
        ("order_id", Arc::new(StringArray::from(vec!["CA-2"])) as ArrayRef),
        ("sales", Arc::new(Float64Array::from(vec![250.5])) as ArrayRef),
        ("order_year", Arc::new(Int64Array::from(vec![2017])) as ArrayRef),
        ("order_month", Arc::new(Int64Array::from(vec![12])) as ArrayRef),
    ]);
    let summary = PartitionWriter::new(dir.path(), WriteOptions::default())
        .write_table(&fact_sales_decl(), &only_december)
        .unwrap();
    assert_eq!(summary.schema_version, 1);

    let entries: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["fact_sales".to_string()]);

    assert!(!dir
        .path()
        .join("fact_sales/order_year=2017/order_month=11")
        .exists());

    let warehouse = open(dir.path());
    let read = warehouse
        .read_table("fact_sales", &PartitionFilter::new())
        .unwrap();
    assert_eq!(read.num_rows(), 1);
}

#[test]
fn test_writer_does_not_check_payload_against_partition_values() {
    let dir = TempDir::new().unwrap();
    let decl = TableDeclaration::new("dim_customer", vec![PartitionColumn::utf8("region")]);

    // `home_region` disagrees with the partition value; the writer trusts the caller
    let rows = batch(vec![
        ("customer_sk", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
        ("home_region", Arc::new(StringArray::from(vec!["West", "West"])) as ArrayRef),
        ("region", Arc::new(StringArray::from(vec!["East", "East"])) as ArrayRef),
    ]);
    PartitionWriter::new(dir.path(), WriteOptions::default())
        .write_table(&decl, &rows)
        .unwrap();

    let warehouse = Warehouse::open(dir.path(), WarehouseOptions::default()).unwrap();
    let read = warehouse
        .read_table("dim_customer", &filter([("region", "East")]))
        .unwrap();
    assert_eq!(read.num_rows(), 2);
    let home = read
        .column_by_name("home_region")
        .unwrap()
        .as_string::<i32>();
    assert_eq!(home.value(0), "West");
}

#[test]
fn test_query_facade() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());
    let warehouse = open(dir.path());

    let rows = warehouse
        .query("SELECT * FROM fact_sales WHERE order_year = 2017 AND order_month = '11'")
        .unwrap();
    assert_eq!(rows.num_rows(), 3);

    let err = warehouse.query("SELECT * fact_sales").unwrap_err();
    assert_eq!(err.code(), Some("E003"));

    let tables = warehouse.show_tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "fact_sales");
    assert_eq!(tables[0].record_count, 5);
    assert_eq!(tables[0].partitions, 2);

    let partitions = warehouse.show_partitions("fact_sales").unwrap();
    let paths: Vec<&str> = partitions.iter().map(|p| p.relative_path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["order_year=2017/order_month=11", "order_year=2017/order_month=12"]
    );
    assert_eq!(partitions[0].row_count, 3);

    assert!(matches!(
        warehouse.show_partitions("fact_returns").unwrap_err(),
        WarehouseError::UnknownTable { .. }
    ));
}

#[test]
fn test_unpartitioned_table_partitions_show_root() {
    let dir = TempDir::new().unwrap();
    let rows = batch(vec![
        ("location_sk", Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef),
        (
            "city",
            Arc::new(StringArray::from(vec!["Henderson", "Seattle", "Houston"])) as ArrayRef,
        ),
    ]);
    PartitionWriter::new(dir.path(), WriteOptions::default())
        .write_table(&TableDeclaration::unpartitioned("dim_location"), &rows)
        .unwrap();

    let warehouse = open(dir.path());
    let partitions = warehouse.show_partitions("dim_location").unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].relative_path, ".");
    assert_eq!(partitions[0].row_count, 3);
    assert_eq!(warehouse.show_tables()[0].partitions, 0);

    let read = warehouse.query("SELECT * FROM dim_location").unwrap();
    assert_eq!(read.num_rows(), 3);
}

#[test]
fn test_legacy_warehouse_reads_as_strings_without_declarations() {
    let dir = TempDir::new().unwrap();
    let table_dir = dir.path().join("dim_customer");
    let east = table_dir.join("region=East");
    let west = table_dir.join("region=West");
    fs::create_dir_all(&east).unwrap();
    fs::create_dir_all(&west).unwrap();

    for (path, ids) in [(&east, vec![1i64, 2]), (&west, vec![3])] {
        let rows = batch(vec![(
            "customer_sk",
            Arc::new(Int64Array::from(ids)) as ArrayRef,
        )]);
        let file = fs::File::create(path.join("data.parquet")).unwrap();
        let mut writer = ArrowWriter::try_new(file, rows.schema(), None).unwrap();
        writer.write(&rows).unwrap();
        writer.close().unwrap();
    }
    fs::write(
        table_dir.join(METADATA_FILE),
        r#"{"table_name": "dim_customer", "partition_column": "Region",
            "partitions": ["East", "West"], "created_date": "2024-02-01T10:00:00.000001",
            "record_count": 3}"#,
    )
    .unwrap();

    let warehouse = Warehouse::open(dir.path(), WarehouseOptions::default()).unwrap();
    let metadata = warehouse.metadata("dim_customer").unwrap();
    assert_eq!(metadata.partition_columns, vec!["region".to_string()]);

    let read = warehouse
        .read_table("dim_customer", &PartitionFilter::new())
        .unwrap();
    assert_eq!(read.num_rows(), 3);
    let regions = read.column_by_name("region").unwrap();
    assert_eq!(regions.data_type(), &DataType::Utf8);
    assert_eq!(regions.as_string::<i32>().value(2), "West");

    let east_only = warehouse
        .read_table("dim_customer", &filter([("region", "East")]))
        .unwrap();
    assert_eq!(east_only.num_rows(), 2);
}

#[test]
fn test_metastore_entry_records_types_and_files() {
    let dir = TempDir::new().unwrap();
    write_fact_sales(dir.path());

    let metadata = metastore::read(&dir.path().join("fact_sales"))
        .unwrap()
        .unwrap();
    assert_eq!(metadata.record_count, 5);
    assert_eq!(
        metadata.partition_types.get("order_month"),
        Some(&PartitionType::Int64)
    );
    assert_eq!(metadata.files.len(), 2);
    assert_eq!(metadata.files.iter().map(|f| f.row_count).sum::<u64>(), 5);
    assert!(looks_like_rfc3339(&metadata.created_date));
    let names: Vec<&str> = metadata.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["order_id", "sales"]);
}

fn looks_like_rfc3339(value: &str) -> bool {
    value.len() >= 19 && value.as_bytes()[4] == b'-' && value.as_bytes()[10] == b'T'
}
