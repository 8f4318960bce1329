//! Hash command - content-address a file or directory

use crate::cli::args::{HashArgs, OutputFormat};
use crate::error::ReplicaResult;
use crate::snapshot::{dir_entries, AssetStore, KIND_DIR};
use console::style;

/// Execute the hash command
pub async fn execute(args: HashArgs) -> ReplicaResult<()> {
    let store = AssetStore::new();
    let root = store.put_path(&args.path)?;
    let node = store.node(&root)?;
    let entries = if node.kind == KIND_DIR {
        dir_entries(&node)?
    } else {
        Vec::new()
    };

    match args.format {
        OutputFormat::Plain => println!("{}", root),
        OutputFormat::Json => {
            let report = serde_json::json!({
                "path": args.path.display().to_string(),
                "checksum": root,
                "kind": node.kind,
                "entries": entries,
                "nodes": store.len(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!("{}", style("Snapshot Tree").bold().cyan());
            println!();
            println!("  {}: {}", style("Path").dim(), args.path.display());
            println!("  {}: {}", style("Root checksum").dim(), root);
            println!("  {}: {}", style("Kind").dim(), node.kind);
            if !entries.is_empty() {
                println!("  {}: {}", style("Entries").dim(), entries.join(", "));
            }
            println!("  {}: {}", style("Distinct nodes").dim(), store.len());
        }
    }

    Ok(())
}
