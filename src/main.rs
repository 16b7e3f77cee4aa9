//! schema-mirror - Main entry point.
//!
//! Connects to a database, reflects its schema and prints the generated
//! entity model.

use schema_mirror::config::{Config, OutputFormat};
use schema_mirror::entity::{EntityType, Model};
use schema_mirror::{Database, DbError};
use std::fmt::Write as _;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn selected<'a>(model: &'a Model, tables: &[String]) -> Result<Vec<&'a EntityType>, DbError> {
    if tables.is_empty() {
        return Ok(model.entities().iter().map(|e| e.as_ref()).collect());
    }
    tables
        .iter()
        .map(|name| {
            model
                .entity(name)
                .map(|e| e.as_ref())
                .ok_or_else(|| DbError::schema(format!("No table or view named '{}'", name), name))
        })
        .collect()
}

fn render_json(model: &Model, tables: &[String]) -> Result<String, Box<dyn std::error::Error>> {
    let mut doc = serde_json::to_value(model)?;
    if !tables.is_empty() {
        let wanted = selected(model, tables)?;
        doc["tables"] = serde_json::to_value(wanted)?;
    }
    Ok(serde_json::to_string_pretty(&doc)?)
}

fn render_text(model: &Model, tables: &[String]) -> Result<String, DbError> {
    let entities = selected(model, tables)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} schema '{}': {} tables, {} composite types, {} routines",
        model.backend(),
        model.schema(),
        model.entities().len(),
        model.registry().composites().len(),
        model.routines().len()
    );

    for entity in entities {
        let _ = writeln!(out, "\n{} {}", entity.kind(), entity.name());
        let width = entity.columns().iter().map(|c| c.name.len()).max().unwrap_or(0);
        for column in entity.columns() {
            let mut notes = Vec::new();
            if column.primary_key {
                notes.push("primary key".to_string());
            }
            if !column.nullable {
                notes.push("not null".to_string());
            }
            if !column.updatable {
                notes.push("read only".to_string());
            }
            if column.get_value_on_insert {
                notes.push("server value".to_string());
            }
            if let Some(literal) = column.default.as_ref().and_then(|d| d.literal()) {
                notes.push(format!("default {}", serde_json::to_string(literal).unwrap_or_default()));
            }
            if let Some(fk) = &column.foreign_key {
                notes.push(format!("-> {}.{}", fk.referenced_table, fk.referenced_column));
            }
            let _ = writeln!(
                out,
                "  {:<width$}  {:<16} {}",
                column.name,
                column.semantic.to_string(),
                notes.join(", "),
                width = width
            );
        }
        for reverse in entity.reverse_collections() {
            let _ = writeln!(
                out,
                "  <- {} ({}.{} = {})",
                reverse.name, reverse.referencing_table, reverse.referencing_column, reverse.target_column
            );
        }
    }

    if tables.is_empty() {
        for composite in model.registry().composites() {
            let attributes: Vec<String> = composite
                .attributes()
                .iter()
                .map(|a| format!("{} {}", a.name, a.semantic))
                .collect();
            let _ = writeln!(out, "\ntype {} ({})", composite.name(), attributes.join(", "));
        }
        for routine in model.routines() {
            let params: Vec<&str> = routine
                .in_params
                .iter()
                .map(|p| p.udt_name.as_str())
                .collect();
            let _ = writeln!(
                out,
                "\n{:?} {}({}) -> {}",
                routine.kind,
                routine.name,
                params.join(", "),
                routine.return_type.as_deref().unwrap_or("void")
            );
        }
    }
    Ok(out)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting schema-mirror");

    let db = match Database::connect(&config.database) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to load schema");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {}", suggestion);
            }
            return Err(e.into());
        }
    };

    let model = db.model();
    let output = match config.format {
        OutputFormat::Json => render_json(&model, &config.tables)?,
        OutputFormat::Text => render_text(&model, &config.tables)?,
    };
    println!("{}", output);

    db.disconnect();
    Ok(())
}
