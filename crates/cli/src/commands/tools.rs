//! `stepwise tools` — List the tools a run can call.

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let registry = stepwise_tools::default_registry()?;
    let manifest = registry.describe();

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!("🧰 Available tools ({})", manifest.len());
    println!();
    for tool in &manifest {
        println!("  {:<14} {}", tool.name, tool.description);
    }

    Ok(())
}
