use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::counter::FrequencyTable;
use crate::job::JobReport;
use crate::models::Ecosystem;

/// Render a colored terminal report.
pub fn render(report: &JobReport, aggregate_key: &str, top: usize, verbose: bool, quiet: bool) -> Result<()> {
    let manifests: u64 = report.content.values().map(|c| c.manifests).sum();
    let batches: usize = report.batches.values().map(|b| b.sealed.len()).sum();
    let discarded = report.discarded.total();

    if quiet {
        println!(
            "Rows: {}  Manifests: {}  Batches: {}  Discarded: {}",
            report.rows,
            manifests.to_string().green(),
            batches,
            if discarded > 0 {
                discarded.to_string().yellow()
            } else {
                discarded.to_string().normal()
            },
        );
        return Ok(());
    }

    println!(
        "\n {} v{}",
        "manifest-harvester".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(" Published: {}\n", aggregate_key);

    let elapsed_ms: u64 = report.timings.iter().map(|t| t.elapsed_ms).sum();
    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<49} │", "SUMMARY".bold());
    println!(" │  {:<49} │", format!("Rows fetched       : {:>8}", report.rows));
    println!(" │  {:<49} │", format!("Manifests batched  : {:>8}", manifests));
    println!(
        " │  {:<49} │",
        format!("Manifests replayed : {:>8}", report.replay.manifests)
    );
    println!(" │  {:<49} │", format!("Batches sealed     : {:>8}", batches));
    println!(" │  {:<49} │", format!("Rows discarded     : {:>8}", discarded));
    println!(" │  {:<49} │", format!("Elapsed            : {:>6} ms", elapsed_ms));
    println!(" └────────────────────────────────────────────────────┘\n");

    println!("{}", summary_table(report));
    println!();

    for ecosystem in Ecosystem::ALL {
        let Some(table) = report.published.get(&ecosystem).filter(|t| !t.is_empty()) else {
            continue;
        };
        println!(
            " {} Most common dependency sets:\n",
            format!("[{}]", ecosystem.as_str().to_uppercase()).cyan().bold()
        );
        println!("{}", top_table(table, top));
        println!();
    }

    if verbose {
        println!(" {} Sealed batches:\n", "[BATCHES]".bold());
        for (ecosystem, state) in &report.batches {
            for key in &state.sealed {
                println!("   {:<6} {}", ecosystem.to_string(), key);
            }
        }
        println!();
        for timing in &report.timings {
            println!("   {:<20} {:>6} ms", timing.state.to_string(), timing.elapsed_ms);
        }
        println!();
    }

    Ok(())
}

/// One row per ecosystem: what was fetched and what the aggregate now holds.
fn summary_table(report: &JobReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Ecosystem").add_attribute(Attribute::Bold),
            Cell::new("Manifests").add_attribute(Attribute::Bold),
            Cell::new("Content").add_attribute(Attribute::Bold),
            Cell::new("Batches").add_attribute(Attribute::Bold),
            Cell::new("Counted").add_attribute(Attribute::Bold),
            Cell::new("Sets this run").add_attribute(Attribute::Bold),
            Cell::new("Sets published").add_attribute(Attribute::Bold),
        ]);

    for ecosystem in Ecosystem::ALL {
        let content = report.content.get(&ecosystem).cloned().unwrap_or_default();
        let batches = report
            .batches
            .get(&ecosystem)
            .map(|b| b.sealed.len())
            .unwrap_or(0);
        let counted = report.collected.get(&ecosystem).map(FrequencyTable::total).unwrap_or(0);
        let collected = report.collected.get(&ecosystem).map(FrequencyTable::len).unwrap_or(0);
        let published = report.published.get(&ecosystem).map(FrequencyTable::len).unwrap_or(0);

        table.add_row(vec![
            Cell::new(ecosystem.to_string()).fg(Color::Cyan),
            Cell::new(content.manifests).set_alignment(CellAlignment::Right),
            Cell::new(format_bytes(content.bytes)).set_alignment(CellAlignment::Right),
            Cell::new(batches).set_alignment(CellAlignment::Right),
            Cell::new(counted).set_alignment(CellAlignment::Right),
            Cell::new(collected).set_alignment(CellAlignment::Right),
            Cell::new(published).set_alignment(CellAlignment::Right),
        ]);
    }

    table
}

fn top_table(counts: &FrequencyTable, top: usize) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Count").add_attribute(Attribute::Bold),
            Cell::new("Dependency set").add_attribute(Attribute::Bold),
        ]);

    for (rank, (key, count)) in counts.most_common().into_iter().take(top).enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1).set_alignment(CellAlignment::Right),
            Cell::new(count).set_alignment(CellAlignment::Right),
            Cell::new(key),
        ]);
    }

    table
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
