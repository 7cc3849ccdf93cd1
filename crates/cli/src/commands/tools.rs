//! `rustact tools`: list the built-in tools.

use rustact_config::AppConfig;
use rustact_core::tool::ToolRegistry;
use std::fmt::Write;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let work_dir = config.resolved_work_dir();
    let registry = rustact_tools::default_registry(&work_dir, &config.tools)?;

    println!("Work directory: {}\n", work_dir.display());
    print!("{}", render(&registry));
    Ok(())
}

fn render(registry: &ToolRegistry) -> String {
    let mut out = String::new();
    for spec in registry.specs() {
        let _ = writeln!(out, "{}", spec.name);
        let _ = writeln!(out, "  {}", spec.description);
        for param in &spec.params {
            let _ = writeln!(
                out,
                "    {:<12} {:<8} {}{}",
                param.name,
                param.kind.as_str(),
                if param.required { "(required) " } else { "" },
                param.description
            );
        }
        out.push('\n');
    }
    out
}
