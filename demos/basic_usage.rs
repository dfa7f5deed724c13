//! Basic usage example for cqlexec-rs over the embedded session.

use cqlexec::processor::{row_mapper, RowCountCallbackHandler};
use cqlexec::query::{Consistency, ExecuteOptions};
use cqlexec::{CqlTemplate, InMemorySession, TemplateConfig};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

const TABLE: &str = "example_users";

/// Builds a template with quorum reads and a one second bounded wait.
fn example_template(runtime: &tokio::runtime::Runtime) -> Result<CqlTemplate, Box<dyn Error>> {
    let config: TemplateConfig = "consistency=LOCAL_QUORUM;fetch_size=2;timeout_ms=1000;ingest_max_in_flight=4".parse()?;
    let session = InMemorySession::new().with_keyspace("example");
    Ok(CqlTemplate::with_config(
        Arc::new(session),
        runtime.handle().clone(),
        config,
    ))
}

/// Creates the table and bulk loads three rows through one prepared statement.
fn example_ingest(template: &CqlTemplate) -> Result<usize, Box<dyn Error>> {
    template.execute_cql(
        &format!("CREATE TABLE {} (id int PRIMARY KEY, name text)", TABLE),
        None,
    )?;

    let written = template.ingest(
        &format!("INSERT INTO {} (id, name) VALUES (?, ?)", TABLE),
        vec![
            vec![1i32.into(), "Alice".into()],
            vec![2i32.into(), "Bob".into()],
            vec![3i32.into(), "Charlie".into()],
        ],
        None,
    )?;
    Ok(written)
}

/// Reads the rows back in a few different shapes.
fn example_select(template: &CqlTemplate) -> Result<(), Box<dyn Error>> {
    let count: i64 = template.select_one_value(&format!("SELECT COUNT(*) FROM {}", TABLE), None)?;
    println!("Count: {}", count);

    let names = template
        .select_mapped(
            &format!("SELECT id, name FROM {}", TABLE),
            row_mapper(|row, _| Ok(format!("{}={}", row.get_as::<i32>(0)?, row.get_as::<String>(1)?))),
            None,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    println!("Rows: {}", names.join(", "));

    let mut handler = RowCountCallbackHandler::new();
    let one = ExecuteOptions::new().with_consistency(Consistency::One);
    template.select_rows(&format!("SELECT * FROM {}", TABLE), &mut handler, Some(&one))?;
    println!("Columns: {:?} over {} row(s)", handler.column_names(), handler.row_count());
    Ok(())
}

/// Dispatches asynchronously and waits with a timeout.
fn example_async(template: &CqlTemplate) -> Result<(), Box<dyn Error>> {
    let pending = template.select_async(&format!("SELECT name FROM {} WHERE id = 2", TABLE), None);
    let name = pending.get_timeout(Duration::from_secs(1))?;
    println!("Async: {:?}", name.rows().next().transpose()?.map(|row| row.to_map()));

    for member in template.describe_ring()? {
        println!("Ring: {} in {}/{}", member.host_name, member.datacenter, member.rack);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let template = example_template(&runtime)?;

    let written = example_ingest(&template)?;
    println!("Ingested: {} row(s)", written);

    example_select(&template)?;
    example_async(&template)?;

    template.truncate(TABLE, None)?;
    println!("Done");
    Ok(())
}
