mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{server, ScriptedLauncher};
use toolbridge::mcp::{JsonObject, ToolServerRegistry};

fn args(value: serde_json::Value) -> JsonObject {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

fn tool_names(tools: &[toolbridge::types::ToolSchema]) -> Vec<&str> {
    tools.iter().map(|t| t.name.as_str()).collect()
}

#[tokio::test]
async fn composite_names_round_trip_to_owning_server() {
    let launcher = ScriptedLauncher::new()
        .with_server("alpha", &["search"])
        .with_server("beta", &["search", "fetch"]);
    let invocations = launcher.invocations();
    let registry = ToolServerRegistry::with_launcher(Arc::new(launcher));

    assert!(registry.add_server(server("alpha")).await);
    assert!(registry.add_server(server("beta")).await);

    let tools = registry.all_tools().await;
    assert_eq!(
        tool_names(&tools),
        vec!["alpha__search", "beta__search", "beta__fetch"]
    );
    assert_eq!(tools[0].description, "search on alpha");

    let result = registry
        .call_tool("beta__search", args(json!({"q": "rust"})))
        .await;
    assert_eq!(result, r#"beta:search {"q":"rust"}"#);

    let seen = invocations.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].server, "beta");
    assert_eq!(seen[0].tool, "search");
}

#[tokio::test]
async fn routing_failures_are_text_results() {
    let launcher = ScriptedLauncher::new().with_server("alpha", &["search"]);
    let registry = ToolServerRegistry::with_launcher(Arc::new(launcher));
    assert!(registry.add_server(server("alpha")).await);

    let no_separator = registry.call_tool("search", JsonObject::new()).await;
    assert_eq!(no_separator, "Error: Invalid tool name format: search");

    let unknown = registry.call_tool("ghost__search", JsonObject::new()).await;
    assert!(unknown.starts_with("Error:"));
    assert!(unknown.contains("'ghost'"), "{unknown}");
}

#[tokio::test]
async fn failed_server_is_discarded_and_others_unaffected() {
    let launcher = ScriptedLauncher::new()
        .with_server("alpha", &["search"])
        .failing("broken");
    let registry = ToolServerRegistry::with_launcher(Arc::new(launcher));

    assert!(registry.add_server(server("alpha")).await);
    assert!(!registry.add_server(server("broken")).await);

    assert_eq!(registry.connected_server_names().await, vec!["alpha".to_string()]);
    assert_eq!(tool_names(&registry.all_tools().await), vec!["alpha__search"]);

    let result = registry.call_tool("broken__anything", JsonObject::new()).await;
    assert!(result.contains("'broken' not found"), "{result}");
}

#[tokio::test]
async fn add_servers_isolates_failures_and_keeps_declaration_order() {
    let launcher = ScriptedLauncher::new()
        .with_server("zeta", &["z"])
        .with_server("alpha", &["a"])
        .failing("broken");
    let registry = ToolServerRegistry::with_launcher(Arc::new(launcher));

    let outcomes = registry
        .add_servers(vec![server("zeta"), server("broken"), server("alpha")])
        .await;

    let summary: Vec<(&str, bool)> = outcomes
        .iter()
        .map(|o| (o.name.as_str(), o.is_connected()))
        .collect();
    assert_eq!(summary, vec![("zeta", true), ("broken", false), ("alpha", true)]);
    assert_eq!(
        registry.connected_server_names().await,
        vec!["zeta".to_string(), "alpha".to_string()]
    );
    assert_eq!(tool_names(&registry.all_tools().await), vec!["zeta__z", "alpha__a"]);
}

#[tokio::test]
async fn duplicate_and_ambiguous_names_are_rejected() {
    let launcher = ScriptedLauncher::new()
        .with_server("alpha", &["search"])
        .with_server("a__b", &["c"]);
    let launches = launcher.launches();
    let registry = ToolServerRegistry::with_launcher(Arc::new(launcher));

    assert!(registry.add_server(server("alpha")).await);
    assert!(!registry.add_server(server("alpha")).await);
    assert!(!registry.add_server(server("a__b")).await);

    let err = registry
        .try_add_server(server(""))
        .await
        .expect_err("empty name should be rejected");
    assert!(err.to_string().contains("must not be empty"));

    // Rejected names never spawn a process.
    assert_eq!(launches.lock().unwrap().clone(), vec!["alpha".to_string()]);

    let outcomes = registry
        .add_servers(vec![server("alpha"), server("a__b")])
        .await;
    assert!(outcomes.iter().all(|o| !o.is_connected()));
    assert_eq!(registry.connected_server_names().await, vec!["alpha".to_string()]);
}

#[tokio::test]
async fn remove_and_disconnect_all_clear_routes() {
    let launcher = ScriptedLauncher::new()
        .with_server("alpha", &["search"])
        .with_server("beta", &["fetch"]);
    let registry = ToolServerRegistry::with_launcher(Arc::new(launcher));
    registry.add_servers(vec![server("alpha"), server("beta")]).await;

    assert!(registry.remove_server("alpha").await);
    assert!(!registry.remove_server("alpha").await);
    assert_eq!(tool_names(&registry.all_tools().await), vec!["beta__fetch"]);
    let gone = registry.call_tool("alpha__search", JsonObject::new()).await;
    assert!(gone.starts_with("Error:"));

    registry.disconnect_all().await;
    assert!(registry.all_tools().await.is_empty());
    assert!(registry.connected_server_names().await.is_empty());

    // A removed name can be registered again.
    assert!(registry.add_server(server("alpha")).await);
}

#[tokio::test]
async fn tool_snapshots_do_not_alias_client_catalogs() {
    let launcher = ScriptedLauncher::new().with_server("alpha", &["search"]);
    let registry = ToolServerRegistry::with_launcher(Arc::new(launcher));
    registry.add_server(server("alpha")).await;

    let mut first = registry.all_tools().await;
    first[0].name = "mutated".into();
    assert_eq!(tool_names(&registry.all_tools().await), vec!["alpha__search"]);
}

#[tokio::test]
async fn concurrent_calls_share_the_registry() {
    let launcher = ScriptedLauncher::new().with_server("alpha", &["search"]);
    let invocations = launcher.invocations();
    let registry = Arc::new(ToolServerRegistry::with_launcher(Arc::new(launcher)));
    registry.add_server(server("alpha")).await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .call_tool("alpha__search", args(json!({ "i": i })))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let result = handle.await.expect("task panicked");
        assert!(result.starts_with("alpha:search"));
    }
    assert_eq!(invocations.lock().unwrap().len(), 8);
}
