// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Exercise the graph lifecycle from several threads.
//!
//! Usage:
//!   graph_demo [workers] [lookups_per_worker]
//!
//! Each worker repeatedly looks up operations while the main thread
//! closes the graph. Workers that started before the close finish their
//! lookups; later ones observe the closed graph.

use native_graph::{CloseStatus, Graph, GraphDef, InMemoryBackend, NativeGraphError, Session};
use std::sync::Arc;
use std::thread;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let workers: usize = args.get(1).map(|s| s.parse::<usize>()).transpose()?.unwrap_or(4);
    let lookups: usize = args.get(2).map(|s| s.parse::<usize>()).transpose()?.unwrap_or(1000);

    println!("=== native-graph lifecycle demo ===");
    println!();

    let backend = Arc::new(InMemoryBackend::new());
    let graph = Graph::with_backend(backend.clone())?;

    let def = GraphDef::new()
        .node("x", "Placeholder", &[])
        .node("w", "Const", &[])
        .node("xw", "MatMul", &["x", "w"])
        .node("loss", "Square", &["xw"]);
    graph.import_graph_def_with_prefix(&def.to_bytes()?, "model")?;
    println!("Imported {} operations", graph.operations().count());

    let x = graph
        .operation("model/x")?
        .ok_or_else(|| anyhow::anyhow!("model/x missing after import"))?;
    let loss = graph
        .operation("model/loss")?
        .ok_or_else(|| anyhow::anyhow!("model/loss missing after import"))?;
    let grads = graph.add_gradients(None, &[loss.output(0)], &[x.output(0)], None)?;
    println!("Added {} gradient output(s)", grads.len());

    let mut session = Session::new(&graph)?;
    println!("Session open, borrows outstanding: {}", graph.resource().borrow_count());
    println!();
    println!("Starting {} workers x {} lookups...", workers, lookups);

    let status = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let graph = &graph;
                s.spawn(move || {
                    let mut found = 0usize;
                    for _ in 0..lookups {
                        match graph.operation("model/xw") {
                            Ok(Some(_)) => found += 1,
                            Ok(None) => {}
                            Err(NativeGraphError::Closed) => break,
                            Err(e) => return Err(e),
                        }
                    }
                    Ok((id, found))
                })
            })
            .collect();

        let closer = s.spawn(|| graph.close());

        // The session keeps the graph alive until it is released.
        while !graph.resource().is_close_requested() {
            thread::yield_now();
        }
        let still_visible = session.operation("model/loss").map(|op| op.is_some());
        println!("Close requested; session still sees the graph: {:?}", still_visible);
        session.close();

        for handle in handles {
            match handle.join() {
                Ok(Ok((id, found))) => println!("  worker {id}: {found} successful lookups"),
                Ok(Err(e)) => println!("  worker failed: {e}"),
                Err(_) => println!("  worker panicked"),
            }
        }
        closer.join()
    });

    let status = status.map_err(|_| anyhow::anyhow!("closer thread panicked"))?;
    println!();
    println!("Close status: {:?}", status);
    println!("Second close: {:?}", graph.close());
    println!(
        "Native graphs allocated: {}, freed: {}",
        backend.allocations(),
        backend.frees()
    );

    if status != CloseStatus::Closed {
        anyhow::bail!("expected the graph to close, got {status:?}");
    }
    Ok(())
}
