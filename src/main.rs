// Main entry point for the RustyShard CLI
// Loads a sharding schema and shows where statements would be routed

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use rustyshard::{logging, Router, Schema, SchemaConfig, StatementKind};
use std::io::{self, Write};
use std::path::PathBuf;

/// RustyShard - route MySQL statements across shards
#[derive(ClapParser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Schema configuration file (JSON); a demo schema is used if omitted
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Number of shards of the demo schema
    #[arg(short, long, default_value_t = 4)]
    shards: u32,

    /// Client connection charset
    #[arg(short, long, default_value = "utf8mb4")]
    charset: String,

    /// Route a single SQL statement and exit
    #[arg(short, long)]
    execute: Option<String>,

    /// Log as JSON
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    let config = match &args.schema {
        Some(path) => SchemaConfig::load(path)?,
        None => SchemaConfig::demo(args.shards),
    };
    let schema = Schema::from_config(&config).context("Invalid schema configuration")?;

    // If a statement was provided, route it and exit
    if let Some(sql) = args.execute {
        route_statement(&schema, &args.charset, &sql)?;
        return Ok(());
    }

    println!("╔════════════════════════════════════════════╗");
    println!("║        RustyShard Routing Shell            ║");
    println!("╚════════════════════════════════════════════╝");
    println!();
    println!(
        "Schema '{}' with {} shard(s), charset {}",
        schema.name(),
        schema.shards().len(),
        args.charset
    );
    println!("Type SQL statements or '.help' for help");
    println!("Type '.exit' to quit");
    println!();

    repl(&schema, |sql| route_statement(&schema, &args.charset, sql))
}

/// Read-eval-print loop over stdin
fn repl<F>(schema: &Schema, mut route_fn: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("rustyshard> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            // EOF
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('.') {
            match input {
                ".exit" | ".quit" => {
                    println!("Goodbye!");
                    break;
                }
                ".help" => print_help(),
                ".tables" => print_tables(schema),
                _ => {
                    println!("Unknown command: {}", input);
                    println!("Type '.help' for help");
                }
            }
            continue;
        }

        if let Err(e) = route_fn(input) {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

/// Route one statement and print its outlets
fn route_statement(schema: &Schema, charset: &str, sql: &str) -> Result<()> {
    let kind = StatementKind::classify(sql);
    let outlets = Router::route(schema, sql, charset, kind)?;
    println!("{}", outlets.format());
    Ok(())
}

fn print_tables(schema: &Schema) {
    for name in schema.table_names() {
        let Some(table) = schema.table(name) else {
            continue;
        };
        let placement = match table.rule_column() {
            Some(column) => format!("sharded by {}", column),
            None if table.is_global() => "global".to_string(),
            None => "unsharded".to_string(),
        };
        println!("  {:<16} shards {:?}  {}", name, table.shards(), placement);
    }
}

fn print_help() {
    println!("Special Commands:");
    println!("  .help              Show this help message");
    println!("  .tables            List tables and their placement");
    println!("  .exit, .quit       Exit the shell");
    println!();
    println!("Routing examples:");
    println!("  SELECT * FROM users WHERE id = 7          one shard");
    println!("  SELECT * FROM users WHERE id IN (1, 2)    the shards owning 1 and 2");
    println!("  SELECT * FROM users ORDER BY id LIMIT 10  every shard, merged");
    println!("  INSERT INTO users (id, name) VALUES (1, 'a'), (2, 'b')");
    println!("                                            rows split per shard");
    println!("  SELECT * FROM countries                   any one copy");
    println!();
    println!("Set RUSTYSHARD_LOG=debug to see routing decisions.");
    println!();
}
