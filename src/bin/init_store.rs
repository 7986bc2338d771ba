use std::path::Path;

use solar_insights::adapters::store::{KeyValueStore, PREFERENCES_KEY, SqliteStore};

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to initialize store: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut path = std::env::var("DB_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "./data/insights.db".to_string());
    let mut reset_preferences = false;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--path" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--path requires a value".to_string());
                };
                path = value.clone();
                index += 2;
            }
            "--reset-preferences" => {
                reset_preferences = true;
                index += 1;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    if let Some(parent) = Path::new(&path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }

    let store = SqliteStore::open(&path).map_err(|error| error.to_string())?;
    let version = store.schema_version().map_err(|error| error.to_string())?;

    println!("store ready at: {path}");
    println!("schema version: {version}");

    if reset_preferences {
        let removed = store
            .delete(PREFERENCES_KEY)
            .map_err(|error| error.to_string())?;
        if removed {
            println!("stored preferences cleared");
        } else {
            println!("no stored preferences to clear");
        }
    }

    let keys = store.keys().map_err(|error| error.to_string())?;
    if keys.is_empty() {
        println!("stored records: none");
    } else {
        println!("stored records: {}", keys.join(", "));
    }

    Ok(())
}

fn print_help() {
    println!("init_store");
    println!();
    println!("Usage:");
    println!("  init_store [--path <file>] [--reset-preferences]");
    println!();
    println!("Options:");
    println!("  --path <file>          sqlite file (default: $DB_PATH or ./data/insights.db)");
    println!("  --reset-preferences    delete the persisted dismissals and filters");
}
