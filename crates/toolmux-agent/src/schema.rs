//! Tool definitions advertised to the model.

use serde_json::{Value, json};
use toolmux_core::ToolDefinition;

/// List the tools of one or all servers.
pub const LIST_TOOLS: &str = "list_tools";

/// Call one tool on one server.
pub const CALL_TOOL: &str = "call_tool";

/// The two generic definitions, with `server` restricted to `identities`.
#[must_use]
pub fn tool_definitions(identities: &[&str]) -> Vec<ToolDefinition> {
    let mut server = json!({ "type": "string" });
    if !identities.is_empty() {
        server["enum"] = json!(identities);
    }

    let mut list_server = server.clone();
    list_server["description"] = Value::from("If omitted, list tools for every server.");

    vec![
        ToolDefinition {
            name: LIST_TOOLS.to_string(),
            description: "List the available tools for one or all MCP servers.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "server": list_server },
            }),
        },
        ToolDefinition {
            name: CALL_TOOL.to_string(),
            description:
                "Call a tool by name on a specific MCP server. Provide arguments as an object."
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "server": server,
                    "tool": { "type": "string" },
                    "arguments": {
                        "type": "object",
                        "description": format!(
                            "Key-value arguments for the target tool. Check {LIST_TOOLS} first."
                        ),
                    },
                },
                "required": ["server", "tool", "arguments"],
            }),
        },
    ]
}

/// System instruction naming the available servers.
#[must_use]
pub fn default_system_prompt(identities: &[&str]) -> String {
    let servers = identities
        .iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You are an AI assistant with access to these MCP servers: {servers}.\n\
         You can discover tools with {LIST_TOOLS}, then invoke them with {CALL_TOOL}.\n\
         When a request involves one of these servers, call an MCP tool.\n\
         Prefer to call {LIST_TOOLS} first if you are unsure about arguments or available tools.\n\
         Be concise and explain what you did."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_enum_lists_identities() {
        let defs = tool_definitions(&["azure", "filesystem"]);
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, LIST_TOOLS);
        assert_eq!(
            defs[1].parameters["properties"]["server"]["enum"],
            json!(["azure", "filesystem"])
        );
        assert_eq!(
            defs[1].parameters["required"],
            json!(["server", "tool", "arguments"])
        );
        assert!(defs[0].parameters.get("required").is_none());
    }

    #[test]
    fn test_no_enum_without_servers() {
        let defs = tool_definitions(&[]);
        assert!(defs[0].parameters["properties"]["server"].get("enum").is_none());
    }

    #[test]
    fn test_prompt_names_servers() {
        let prompt = default_system_prompt(&["azure", "filesystem"]);
        assert!(prompt.contains("'azure', 'filesystem'"));
        assert!(prompt.contains("list_tools"));
    }
}
