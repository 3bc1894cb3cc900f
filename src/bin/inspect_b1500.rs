use anyhow::Result;
use b1500conv::{
    config::TestType,
    parse::{parse_file, ParamValue, TestParameters},
};
use std::{env, path::Path, process::exit};

fn main() {
    // Expect a file path, optionally followed by a test type.
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <EXPORT_CSV> [raw|multi-raw]", args[0]);
        exit(1);
    }
    let test_type = match args.get(2).map(String::as_str) {
        None | Some("multi-raw") => TestType::MultiRaw,
        Some("raw") => TestType::Raw,
        Some(other) => {
            eprintln!("Unknown test type '{}'", other);
            exit(1);
        }
    };
    if let Err(e) = inspect(Path::new(&args[1]), test_type) {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}

/// Print every block of an export with its columns, row count and parameters.
fn inspect(path: &Path, test_type: TestType) -> Result<()> {
    let parsed = parse_file(path, test_type)?;

    println!("=== B1500A export: {} ===", path.display());
    println!("Parsed as:   {}", test_type.as_str());
    println!("Blocks:      {}", parsed.blocks.len());
    println!("Total rows:  {}", parsed.total_rows());
    println!();

    for block in &parsed.blocks {
        let title = if block.setup_title.is_empty() {
            "<untitled>"
        } else {
            block.setup_title.as_str()
        };
        println!("--- Block {}: {} ---", block.index + 1, title);
        println!("Columns: {}", block.columns.join(", "));
        println!("Rows:    {}", block.rows.len());
        let missing: usize = block
            .rows
            .iter()
            .map(|r| r.iter().filter(|v| v.is_none()).count())
            .sum();
        if missing > 0 {
            println!("Missing: {} non-numeric cells", missing);
        }
        print_params(&block.params);
        println!();
    }
    Ok(())
}

fn print_params(params: &TestParameters) {
    if params.is_empty() {
        return;
    }
    println!("Parameters:");
    for (key, value) in params {
        let shown = match value {
            ParamValue::Single(v) => v.clone(),
            ParamValue::List(vs) => format!("[{}]", vs.join(", ")),
        };
        println!("  {:<40} {}", key, shown);
    }
}
