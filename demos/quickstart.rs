/// Quickstart example - flatten one ads response row
use ads_flatten::flatten::{FieldExtractor, PathConfig, PathFlattener, Table, TableWriter};
use ads_flatten::message::{EnumBindings, EnumDescriptor, Message};
use serde_json::json;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    println!("=== ads-flatten Quick Start ===\n");

    // Step 1: A response row as the platform returns it
    let row = json!({
        "campaign": {
            "resource_name": "customers/1/campaigns/7",
            "id": {"value": 7},
            "name": {"value": "Brand - Search"},
            "status": 2,
            "frequency_caps": [{"cap": {"value": 3}}, {"cap": {"value": 5}}]
        },
        "segments": {"date": {"value": "2019-06-11"}},
        "metrics": {"clicks": {"value": 12}, "cost_micros": {"value": 1_500_000}}
    });

    println!("Response row:");
    println!("{}\n", serde_json::to_string_pretty(&row)?);

    // Step 2: Tell the message which fields are enums
    let status = Arc::new(EnumDescriptor::new("CampaignStatus", [(2, "ENABLED"), (3, "PAUSED")]));
    let enums = EnumBindings::new().bind("campaign.status", status);
    let message = Message::from_json(&row, &enums).unwrap_or_default();

    // Step 3: Extract, then flatten with the ads defaults
    let nested = FieldExtractor::new(true).extract(&message)?;
    let flat = PathFlattener::new(PathConfig::ads_defaults()).flatten(&nested)?;

    println!("Flattened row:");
    println!("{}\n", serde_json::to_string_pretty(&flat)?);

    // Step 4: Collect rows into a table and write JSON Lines
    let table: Table = std::iter::once(flat).collect();
    println!("Table with {} row(s) and columns {:?}:", table.len(), table.columns());
    let mut writer = TableWriter::new(std::io::stdout());
    writer.write_table(&table)?;
    writer.flush()?;

    Ok(())
}
