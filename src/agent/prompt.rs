//! System prompt assembly.

/// Build the system prompt, naming the tool servers currently connected.
pub fn build_system_prompt(connected_servers: &[String]) -> String {
    let servers = if connected_servers.is_empty() {
        "None".to_string()
    } else {
        connected_servers.join(", ")
    };

    format!(
        "You are a helpful AI assistant that can use tools to help users.\n\n\
         When you need to use a tool, respond with a tool call in the appropriate format.\n\
         When you receive tool results, incorporate them into your response naturally.\n\n\
         Available tool servers: {servers}\n\n\
         Be concise, helpful, and friendly in your responses."
    )
}
