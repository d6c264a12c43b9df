// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Import a serialized graph definition and list its operations.

use native_graph::{runtime, Graph, GraphConfig, RuntimeConfig};
use std::path::Path;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <graph_def> [prefix] [runtime_config.json]", args[0]);
        std::process::exit(1);
    }

    let graph_def_path = Path::new(&args[1]);
    let prefix = args.get(2).map(|s| s.as_str()).unwrap_or("");

    let runtime_config = match args.get(3) {
        Some(path) => RuntimeConfig::from_file(Path::new(path))?,
        None => RuntimeConfig::default(),
    };
    let runtime = runtime::init(&runtime_config)?;
    println!(
        "Backend: {} (version {})",
        runtime.kind().as_str(),
        runtime.version()
    );

    let bytes = std::fs::read(graph_def_path)?;
    println!("Loading graph definition from: {:?} ({} bytes)", graph_def_path, bytes.len());

    let graph = Graph::with_config(runtime.backend(), GraphConfig::default())?;
    graph.import_graph_def_with_prefix(&bytes, prefix)?;

    println!("\nOperations:");
    let mut total = 0usize;
    for (i, op) in graph.operations().enumerate() {
        let info = op?.info()?;
        println!(
            "  {:3}. {} [{}] ({} output{})",
            i + 1,
            info.name,
            info.op_type,
            info.num_outputs,
            if info.num_outputs == 1 { "" } else { "s" }
        );
        total += 1;
    }
    println!("\nTotal operations: {}", total);

    let status = graph.close();
    println!("Closed: {:?}", status);

    Ok(())
}
