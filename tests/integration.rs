use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

/// Spawn the memory graph MCP server binary with given args.
async fn spawn_server(args: &[&str]) -> Result<ServerHandle> {
    let mut cmd = Command::new(server_bin());
    cmd.args(args)
        .env_remove("MEMORY_FILE_PATH")
        .env_remove("MEMORY_TYPE_EXAMPLES")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().unwrap();
    let mut stdin = child.stdin.take().unwrap();

    let (tx_out, mut rx_out) = mpsc::channel::<serde_json::Value>(32);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

    // Writer task
    tokio::spawn(async move {
        while let Some(msg) = rx_out.recv().await {
            if let Ok(line) = serde_json::to_string(&msg) {
                let _ = stdin.write_all(line.as_bytes()).await;
                let _ = stdin.write_all(b"\n").await;
                let _ = stdin.flush().await;
            }
        }
    });

    // Reader task
    {
        let pending = pending.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(&line)
                    && let Some(id) = v.get("id").and_then(|x| x.as_str())
                    && let Some(waiter) = pending.lock().await.remove(id)
                {
                    let _ = waiter.send(v);
                }
                // Notifications without id are ignored
            }
        });
    }

    Ok(ServerHandle {
        child,
        tx_out,
        pending,
    })
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>>;

struct ServerHandle {
    child: Child,
    tx_out: mpsc::Sender<serde_json::Value>,
    pending: PendingMap,
}

impl ServerHandle {
    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        self.tx_out
            .send(json!({"jsonrpc":"2.0","id":id,"method":method,"params":params}))
            .await?;
        let resp = rx.await?;
        Ok(resp)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.request(
            "tools/call",
            json!({
                "name": name,
                "arguments": arguments
            }),
        )
        .await
    }

    async fn notify(&self, method: &str, params: serde_json::Value) -> Result<()> {
        self.tx_out
            .send(json!({"jsonrpc":"2.0","method":method,"params":params}))
            .await?;
        Ok(())
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
    }
}

fn server_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_memory-graph-mcp"))
}

async fn start_server(memory_file: &Path) -> Result<ServerHandle> {
    let srv = spawn_server(&["--memory-file", memory_file.to_str().unwrap()]).await?;
    let _ = srv
        .request(
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "1" }
            }),
        )
        .await?;
    srv.notify("notifications/initialized", json!({})).await?;
    Ok(srv)
}

fn assert_ok(res: &serde_json::Value) {
    assert!(res.get("error").is_none(), "protocol error: {}", res);
    assert!(
        !res["result"]["isError"].as_bool().unwrap_or(false),
        "tool error: {}",
        res
    );
}

fn assert_tool_err(res: &serde_json::Value) {
    assert!(res["result"]["isError"].as_bool().unwrap_or(false), "expected error: {}", res);
}

fn structured(res: &serde_json::Value) -> &serde_json::Value {
    &res["result"]["structuredContent"]
}

fn first_text(res: &serde_json::Value) -> &str {
    res["result"]["content"][0]["text"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn tools_list_includes_all_tools() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    let tools = srv.request("tools/list", json!({})).await?;
    let names: Vec<_> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t.get("name").and_then(|v| v.as_str()))
        .collect();
    for required in [
        "create_entity",
        "create_entities",
        "create_relation",
        "create_relations",
        "add_observations",
        "delete_entities",
        "delete_entity",
        "delete_observations",
        "delete_relations",
        "delete_relation",
        "read_graph",
        "search_nodes",
        "open_nodes",
        "rename_entity",
        "get_node_relations",
        "create_type",
        "delete_type",
        "list_types",
        "validate_integrity",
        "graph_stats",
        "export_mermaid",
    ] {
        assert!(names.contains(&required), "missing tool {}", required);
    }

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn rename_keeps_relations_attached() -> Result<()> {
    let tmp = TempDir::new()?;
    let memory = tmp.path().join("memory.json");
    let srv = start_server(&memory).await?;

    let res = srv
        .call_tool(
            "create_entities",
            json!({"entities": [
                {"name": "Alice", "entityType": "Person", "observations": ["likes tea"]},
                {"name": "Acme", "entityType": "Company"}
            ]}),
        )
        .await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["entities"].as_array().unwrap().len(), 2);

    let res = srv
        .call_tool(
            "create_relations",
            json!({"relations": [{"from": "Alice", "to": "Acme", "relationType": "works_at"}]}),
        )
        .await?;
    assert_ok(&res);

    let res = srv
        .call_tool("rename_entity", json!({"oldName": "Alice", "newName": "Alicia"}))
        .await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["entity"]["name"], "Alicia");

    let res = srv.call_tool("read_graph", json!({})).await?;
    assert_ok(&res);
    let relations = structured(&res)["relations"].as_array().unwrap().clone();
    assert_eq!(
        relations,
        vec![json!({"id": "3", "from": "Alicia", "to": "Acme", "relationType": "works_at"})]
    );

    // The file stores ids, so the rename touched only the entity record.
    let content = std::fs::read_to_string(&memory)?;
    assert!(content.contains(r#""name":"Alicia""#));
    assert!(!content.contains("Alice\""));
    assert!(content.contains(r#""from":"1","to":"2""#));

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn relation_can_be_deleted_by_returned_id() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    srv.call_tool(
        "create_entities",
        json!({"entities": [
            {"name": "Ann", "entityType": "Person"},
            {"name": "Bob", "entityType": "Person"}
        ]}),
    )
    .await?;
    let res = srv
        .call_tool(
            "create_relation",
            json!({"from": "Ann", "to": "Bob", "relationType": "knows"}),
        )
        .await?;
    assert_ok(&res);
    let id = structured(&res)["relation"]["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let res = srv.call_tool("read_graph", json!({})).await?;
    assert_eq!(structured(&res)["relations"][0]["id"], id.as_str());

    let res = srv.call_tool("delete_relation", json!({"id": id})).await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["deleted"]["relationType"], "knows");

    let res = srv.call_tool("read_graph", json!({})).await?;
    assert_ok(&res);
    assert!(structured(&res)["relations"].as_array().unwrap().is_empty());

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_relation_is_not_created_twice() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    srv.call_tool(
        "create_entities",
        json!({"entities": [
            {"name": "X", "entityType": "Thing"},
            {"name": "Y", "entityType": "Thing"}
        ]}),
    )
    .await?;

    let relation = json!({"relations": [{"from": "X", "to": "Y", "relationType": "likes"}]});
    let first = srv.call_tool("create_relations", relation.clone()).await?;
    assert_ok(&first);
    assert_eq!(structured(&first)["relations"].as_array().unwrap().len(), 1);

    let second = srv.call_tool("create_relations", relation).await?;
    assert_ok(&second);
    assert_eq!(structured(&second)["relations"].as_array().unwrap().len(), 0);

    let stats = srv.call_tool("graph_stats", json!({})).await?;
    assert_ok(&stats);
    assert_eq!(structured(&stats)["relations"], 1);

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn force_replace_rewrites_entity_type() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    srv.call_tool(
        "create_entities",
        json!({"entities": [
            {"name": "Ann", "entityType": "Person"},
            {"name": "Bob", "entityType": "Person"}
        ]}),
    )
    .await?;
    srv.call_tool(
        "create_relations",
        json!({"relations": [{"from": "Ann", "to": "Bob", "relationType": "knows"}]}),
    )
    .await?;

    let blocked = srv
        .call_tool("delete_type", json!({"category": "entityType", "name": "Person"}))
        .await?;
    assert_tool_err(&blocked);
    assert!(first_text(&blocked).contains("entity type 'Person' is used by 2"));

    let res = srv
        .call_tool(
            "delete_type",
            json!({
                "category": "entityType",
                "name": "Person",
                "force": true,
                "replaceWith": "Human"
            }),
        )
        .await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["action"], "replaced");
    assert_eq!(structured(&res)["replacedCount"], 2);

    let graph = srv.call_tool("read_graph", json!({})).await?;
    let graph = structured(&graph);
    let entities = graph["entities"].as_array().unwrap();
    assert_eq!(entities.len(), 2);
    assert!(entities.iter().all(|e| e["entityType"] == "Human"));
    assert_eq!(graph["relations"].as_array().unwrap().len(), 1);

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn list_types_accepts_string_limit() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    srv.call_tool(
        "create_entities",
        json!({"entities": [
            {"name": "Ann", "entityType": "Person"},
            {"name": "Bob", "entityType": "Person"},
            {"name": "Acme", "entityType": "Company"}
        ]}),
    )
    .await?;
    let res = srv
        .call_tool(
            "create_type",
            json!({"category": "relationType", "name": "mentors", "description": "teaches"}),
        )
        .await?;
    assert_ok(&res);

    let res = srv
        .call_tool("list_types", json!({"sortBy": "usage", "exampleLimit": "1"}))
        .await?;
    assert_ok(&res);
    let catalog = structured(&res);
    let entity_types = catalog["entityTypes"].as_array().unwrap();
    assert_eq!(entity_types[0]["name"], "Person");
    assert_eq!(entity_types[0]["count"], 2);
    assert_eq!(entity_types[0]["examples"].as_array().unwrap().len(), 1);
    let relation_types = catalog["relationTypes"].as_array().unwrap();
    assert_eq!(relation_types[0]["name"], "mentors");
    assert_eq!(relation_types[0]["count"], 0);
    assert_eq!(relation_types[0]["registered"], true);

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn graph_errors_are_tool_errors() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    let res = srv
        .call_tool("rename_entity", json!({"oldName": "Ghost", "newName": "Spirit"}))
        .await?;
    assert_tool_err(&res);
    assert!(first_text(&res).contains("Entity 'Ghost' not found"));

    srv.call_tool(
        "create_entities",
        json!({"entities": [
            {"name": "A", "entityType": "Thing"},
            {"name": "B", "entityType": "Thing"}
        ]}),
    )
    .await?;
    srv.call_tool(
        "create_relations",
        json!({"relations": [{"from": "A", "to": "B", "relationType": "near"}]}),
    )
    .await?;

    let res = srv
        .call_tool("delete_entity", json!({"name": "A", "cascade": false}))
        .await?;
    assert_tool_err(&res);

    let res = srv.call_tool("delete_entity", json!({"name": "A"})).await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["deletedRelations"], 1);

    let res = srv.call_tool("delete_relation", json!({"id": 99})).await?;
    assert_tool_err(&res);

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn legacy_name_based_file_loads() -> Result<()> {
    let tmp = TempDir::new()?;
    let memory = tmp.path().join("memory.json");
    std::fs::write(
        &memory,
        concat!(
            r#"{"type":"entity","name":"Alice","entityType":"Person","observations":["Engineer"]}"#,
            "\n",
            r#"{"type":"entity","name":"Acme","entityType":"Company","observations":[]}"#,
            "\n",
            r#"{"type":"relation","from":"Alice","to":"Acme","relationType":"works_at"}"#,
        ),
    )?;
    let srv = start_server(&memory).await?;

    let res = srv.call_tool("open_nodes", json!({"names": ["Alice", "Acme"]})).await?;
    assert_ok(&res);
    assert_eq!(
        structured(&res)["relations"],
        json!([{"id": "3", "from": "Alice", "to": "Acme", "relationType": "works_at"}])
    );

    let res = srv.call_tool("search_nodes", json!({"query": "engineer"})).await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["entities"][0]["name"], "Alice");

    let res = srv
        .call_tool("get_node_relations", json!({"entityName": "Acme"}))
        .await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["incoming"].as_array().unwrap().len(), 1);

    // Any write migrates the file to the id-keyed format.
    let res = srv
        .call_tool(
            "add_observations",
            json!({"observations": [{"entityName": "Acme", "contents": ["Founded 1999"]}]}),
        )
        .await?;
    assert_ok(&res);
    let content = std::fs::read_to_string(&memory)?;
    assert!(content.contains(r#"{"type":"relation","id":"3","from":"1","to":"2","relationType":"works_at"}"#));

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn integrity_auto_fix_removes_orphans() -> Result<()> {
    let tmp = TempDir::new()?;
    let memory = tmp.path().join("memory.json");
    std::fs::write(
        &memory,
        concat!(
            r#"{"type":"entity","id":"1","name":"A","entityType":"Thing","observations":[]}"#,
            "\n",
            r#"{"type":"relation","id":"2","from":"1","to":"7","relationType":"near"}"#,
        ),
    )?;
    let srv = start_server(&memory).await?;

    let res = srv.call_tool("read_graph", json!({})).await?;
    assert_tool_err(&res);

    let res = srv.call_tool("validate_integrity", json!({})).await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["issues"].as_array().unwrap().len(), 1);
    assert_eq!(structured(&res)["fixed"], 0);

    let res = srv.call_tool("validate_integrity", json!({"autoFix": true})).await?;
    assert_ok(&res);
    assert_eq!(structured(&res)["fixed"], 1);

    let res = srv.call_tool("read_graph", json!({})).await?;
    assert_ok(&res);
    assert!(structured(&res)["relations"].as_array().unwrap().is_empty());

    srv.kill().await;
    Ok(())
}

#[tokio::test]
async fn export_mermaid_renders_flowchart() -> Result<()> {
    let tmp = TempDir::new()?;
    let srv = start_server(&tmp.path().join("memory.json")).await?;

    srv.call_tool(
        "create_entities",
        json!({"entities": [
            {"name": "Ann", "entityType": "Person"},
            {"name": "Acme", "entityType": "Company"}
        ]}),
    )
    .await?;
    srv.call_tool(
        "create_relations",
        json!({"relations": [{"from": "Ann", "to": "Acme", "relationType": "works_at"}]}),
    )
    .await?;

    let res = srv.call_tool("export_mermaid", json!({"focus": "Ann"})).await?;
    assert_ok(&res);
    let text = first_text(&res);
    assert!(text.starts_with("graph TD"));
    assert!(text.contains("works_at"));

    srv.kill().await;
    Ok(())
}
