//! Integration tests: data-analysis snippets over CSV files in a data root.

use std::fs;
use std::path::Path;

use quarry_core::{CapabilitySet, FailureKind, Outcome};
use quarry_executor::frame::parse_csv;
use quarry_executor::{Pipeline, RunOptions, ThreadBackend};
use serde_json::json;

const SALES_CSV: &str = "\
region,product,units,price
north,apple,5,1.5
south,apple,2,1.5
north,pear,7,2.0
east,pear,,2.0
south,plum,4,3.25
";

fn data_dir() -> tempfile::TempDir {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir: {e}"),
    };
    if let Err(e) = fs::write(dir.path().join("sales.csv"), SALES_CSV) {
        panic!("write fixture: {e}");
    }
    dir
}

fn pipeline(root: &Path) -> Pipeline<ThreadBackend> {
    Pipeline::new(ThreadBackend::new()).with_capabilities(CapabilitySet::default().with_data_root(root))
}

fn result(outcome: &Outcome) -> serde_json::Value {
    match serde_json::to_value(outcome) {
        Ok(v) => v["result"].clone(),
        Err(e) => panic!("serialize: {e}"),
    }
}

#[test]
fn csv_types_are_inferred_per_column() {
    let table = match parse_csv(SALES_CSV) {
        Ok(t) => t,
        Err(e) => panic!("parse failed: {e}"),
    };
    assert_eq!(table.shape(), (5, 4));
    let units = table.column("units").map(<[_]>::to_vec).unwrap_or_default();
    assert_eq!(units[0].type_name(), "int");
    assert!(units[3].is_none());
    let price = table.column("price").map(<[_]>::to_vec).unwrap_or_default();
    assert_eq!(price[0].type_name(), "float");
}

#[tokio::test]
async fn revenue_by_region() {
    let dir = data_dir();
    let source = "\
import polars as pl
df = pl.read_csv('sales.csv')
revenue = (
    df.with_columns((pl.col('units') * pl.col('price')).alias('revenue'))
    .group_by('region')
    .agg(pl.col('revenue').sum().alias('total'))
    .sort('total', descending=True)
)
revenue";
    let outcome = pipeline(dir.path()).run(source).await;
    assert_eq!(
        result(&outcome),
        json!({
            "type": "polars.DataFrame",
            "data": {"region": ["east", "north", "south"], "total": [null, 21.5, 16.0]},
            "shape": [3, 2]
        })
    );
}

#[tokio::test]
async fn lazy_scan_filter_collect() {
    let dir = data_dir();
    let source = "\
import polars as pl
out = pl.scan_csv('sales.csv').filter(pl.col('units') >= 4).select('product', 'units').collect()
out";
    let outcome = pipeline(dir.path()).run(source).await;
    let value = result(&outcome);
    assert_eq!(value["shape"], json!([3, 2]));
    assert_eq!(value["data"]["product"], json!(["apple", "pear", "plum"]));
}

#[tokio::test]
async fn summary_statistics_as_scalars() {
    let dir = data_dir();
    let source = "\
import polars as pl
df = pl.read_csv('sales.csv')
units = [u for u in df['units'] if u is not None]
report = f\"{len(units)} rows, mean {sum(units) / len(units):.2f}\"
report";
    let outcome = pipeline(dir.path()).run(source).await;
    assert_eq!(result(&outcome), json!({"type": "str", "value": "4 rows, mean 4.50"}));
}

#[tokio::test]
async fn files_outside_the_root_are_refused() {
    let dir = data_dir();
    let outcome = pipeline(dir.path())
        .run("import polars as pl\ndf = pl.read_csv('../../etc/passwd')")
        .await;
    assert_eq!(outcome.failure_kind(), Some(FailureKind::ExecutionError));
}

#[tokio::test]
async fn without_a_data_root_file_access_is_withheld() {
    let dir = data_dir();
    let outcome = Pipeline::new(ThreadBackend::new())
        .run_with(
            "import polars as pl\ndf = pl.read_csv('sales.csv')",
            RunOptions::new().with_capabilities(CapabilitySet::default()),
        )
        .await;
    drop(dir);
    assert!(outcome
        .message()
        .is_some_and(|m| m.contains("PermissionError")));
}

#[tokio::test]
async fn missing_columns_surface_as_execution_errors() {
    let dir = data_dir();
    let outcome = pipeline(dir.path())
        .run("import polars as pl\ndf = pl.read_csv('sales.csv').select('nope')")
        .await;
    assert!(outcome
        .message()
        .is_some_and(|m| m.contains("ColumnNotFoundError")));
}
