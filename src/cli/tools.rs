use crate::cli::commands::ToolsArgs;
use crate::errors::WardenError;
use crate::registry::ToolRegistry;

pub async fn handle_tools(args: ToolsArgs) -> Result<(), WardenError> {
    let config = super::load_config(args.config.as_deref()).await?;
    let registry = super::build_registry(&config, args.tools_dir.as_deref())?;
    print!("{}", render_table(&registry));
    Ok(())
}

pub fn render_table(registry: &ToolRegistry) -> String {
    let width = registry.tools().map(|t| t.name.len()).max().unwrap_or(4).max(4);
    let mut out = format!("{:<width$}  {:<11}  {:<14}  {:>7}  IMAGE\n", "TOOL", "CLASS", "PARSER", "TIMEOUT");
    for tool in registry.tools() {
        out.push_str(&format!(
            "{:<width$}  {:<11}  {:<14}  {:>6}s  {}\n",
            tool.name,
            tool.class.as_str(),
            tool.parser_name(),
            tool.timeout_secs,
            tool.image,
        ));
    }
    out.push_str(&format!("\n{} tools\n", registry.len()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolSpec;

    #[test]
    fn test_table_lists_every_tool() {
        let spec: ToolSpec = serde_yaml::from_str(
            "name: port-scanner\nimage: nmap:latest\ncommand: [nmap, '{target}']\nclass: active\nparser: ports\n",
        ).unwrap();
        let registry = ToolRegistry::from_specs([spec]).unwrap();
        let table = render_table(&registry);
        assert!(table.starts_with("TOOL"));
        assert!(table.contains("port-scanner"));
        assert!(table.contains("active"));
        assert!(table.contains("ports"));
        assert!(table.ends_with("1 tools\n"));
    }
}
