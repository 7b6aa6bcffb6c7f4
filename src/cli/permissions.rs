use anyhow::Result;
use permissions_broker::config::permission_table;
use serde::Serialize;

use super::output::{emit_structured, OutputFormat};

#[derive(Serialize)]
struct PermissionRow {
    name: &'static str,
    bit: u32,
    value: String,
}

pub fn cmd_permissions(output: OutputFormat) -> Result<()> {
    let rows: Vec<PermissionRow> = permission_table()
        .into_iter()
        .map(|(name, value)| PermissionRow {
            name,
            bit: value.trailing_zeros(),
            value: value.to_string(),
        })
        .collect();

    if emit_structured(output, &rows)? {
        return Ok(());
    }
    for row in &rows {
        println!("{:>3}  {:<36} {}", row.bit, row.name, row.value);
    }
    Ok(())
}
