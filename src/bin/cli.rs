//! Binary entry point for the livegraph demo CLI.
//!
//! Loads a schema JSON file, optionally replays a seed-mutation script
//! against it, and optionally opens a view over a query file, printing its
//! materialized rows. There is no on-disk graph to point this at — the CLI
//! exists to drive the in-memory engine from the shell, not to administer a
//! database file the way the teacher's admin CLI does.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing_subscriber::EnvFilter;

use livegraph::{Graph, NodeId, Query, Schema, Value};

#[derive(Parser, Debug)]
#[command(name = "livegraph", version, about = "Demo CLI for the livegraph in-memory reactive graph")]
struct Cli {
    /// Path to a schema JSON file (an array of type declarations).
    schema: PathBuf,

    /// Path to a JSON array of seed-mutation ops, applied in order.
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Path to a JSON query file; if given, a view is opened and printed.
    #[arg(long, value_name = "FILE")]
    query: Option<PathBuf>,

    /// Viewport height for the printed view.
    #[arg(long, default_value_t = 20)]
    height: usize,
}

/// One seed-mutation step, tagged by `op` (§6's JSON mutation wire form).
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ScriptOp {
    Insert {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        properties: std::collections::BTreeMap<String, Json>,
        #[serde(rename = "as")]
        label: Option<String>,
    },
    SetProperty {
        node: String,
        property: String,
        value: Json,
    },
    Link {
        source: String,
        edge: String,
        target: String,
    },
    Unlink {
        source: String,
        edge: String,
        target: String,
    },
    Delete {
        node: String,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let schema_json: Json = serde_json::from_str(&fs::read_to_string(&cli.schema)?)?;
    let graph = Graph::open(&schema_json)?;

    if let Some(script_path) = &cli.script {
        let ops: Vec<ScriptOp> = serde_json::from_str(&fs::read_to_string(script_path)?)?;
        run_script(&graph, ops)?;
    }

    if let Some(query_path) = &cli.query {
        let schema = Schema::from_json(&schema_json)?;
        let query_json: Json = serde_json::from_str(&fs::read_to_string(query_path)?)?;
        let query = Query::from_json(&query_json, &schema)?;
        let view = graph.view(query, true)?;
        view.set_height(cli.height);
        print_view(&graph, &schema, &view);
    }

    Ok(())
}

fn run_script(graph: &Graph, ops: Vec<ScriptOp>) -> Result<(), Box<dyn Error>> {
    let mut labels: std::collections::HashMap<String, NodeId> = std::collections::HashMap::new();
    for op in ops {
        match op {
            ScriptOp::Insert { type_name, properties, label } => {
                let props: Vec<(String, Value)> = properties.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect();
                let props_ref: Vec<(&str, Value)> = props.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
                let id = graph.insert(&type_name, &props_ref)?;
                if let Some(label) = label {
                    labels.insert(label, id);
                }
            }
            ScriptOp::SetProperty { node, property, value } => {
                let id = resolve(&labels, &node)?;
                graph.set_property(id, &property, Value::from(&value))?;
            }
            ScriptOp::Link { source, edge, target } => {
                let source = resolve(&labels, &source)?;
                let target = resolve(&labels, &target)?;
                graph.link(source, &edge, target)?;
            }
            ScriptOp::Unlink { source, edge, target } => {
                let source = resolve(&labels, &source)?;
                let target = resolve(&labels, &target)?;
                graph.unlink(source, &edge, target)?;
            }
            ScriptOp::Delete { node } => {
                let id = resolve(&labels, &node)?;
                graph.delete(id)?;
            }
        }
    }
    Ok(())
}

/// A node reference in a script is either a label assigned by a prior
/// `insert`'s `as`, or a bare numeric node id.
fn resolve(labels: &std::collections::HashMap<String, NodeId>, reference: &str) -> Result<NodeId, Box<dyn Error>> {
    if let Some(id) = labels.get(reference) {
        return Ok(*id);
    }
    let raw: u64 = reference.parse().map_err(|_| format!("unknown node reference '{reference}'"))?;
    Ok(NodeId(raw))
}

fn print_view(graph: &Graph, schema: &Schema, view: &livegraph::View) {
    println!("view: {} of {} visible", view.items().len(), view.total());
    for item in view.items() {
        let type_name = &schema.type_def(item.type_id).name;
        let indent = "  ".repeat(item.depth);
        let props = graph.get_property(item.id, "name").ok().flatten();
        match props {
            Some(value) => println!("{indent}[{}] {} #{} = {}", item.position, type_name, item.id.0, value),
            None => println!("{indent}[{}] {} #{}", item.position, type_name, item.id.0),
        }
    }
}
