use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::core::serde::{id_string, option_number_or_string};
use crate::tools::memory::{
    Entity, GraphError, KnowledgeGraphManager, ObjectType, ObservationDeletion, ObservationInput,
    Relation, TypeSortBy,
};

mod config;
mod core;
mod logging;
mod tools;

use logging::{TransportMode, init_logging};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path of the line-delimited JSON memory file (overrides MEMORY_FILE_PATH).
    #[arg(short = 'm', long = "memory-file", value_name = "FILE")]
    memory_file: Option<PathBuf>,

    /// Enable streamable HTTP mode (default: stdio)
    #[arg(short = 's', long = "stream")]
    stream_mode: bool,

    /// HTTP port for stream mode
    #[arg(short = 'p', long, default_value = "8000")]
    port: u16,

    /// Bind address for stream mode
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    bind: String,

    /// Enable file logging. Optionally specify log file name (default: memory-graph-mcp.log)
    #[arg(short = 'l', long, value_name = "FILE", num_args = 0..=1, default_missing_value = "memory-graph-mcp.log")]
    log: Option<String>,
}

#[derive(Clone)]
struct MemoryServer {
    manager: Arc<KnowledgeGraphManager>,
    tool_router: ToolRouter<Self>,
}

impl MemoryServer {
    fn new(manager: KnowledgeGraphManager) -> Self {
        Self {
            manager: Arc::new(manager),
            tool_router: Self::tool_router(),
        }
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "memory-graph-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Persistent knowledge graph: entities with observations, typed relations \
                 between them, and an optional catalog of entity/relation types."
                    .to_string(),
            ),
        }
    }

    /// Run a store operation on the blocking pool; the store does synchronous
    /// file I/O under its own lock.
    async fn run<T, F>(&self, op: F) -> Result<T, McpError>
    where
        F: FnOnce(&KnowledgeGraphManager) -> T + Send + 'static,
        T: Send + 'static,
    {
        let manager = Arc::clone(&self.manager);
        tokio::task::spawn_blocking(move || op(&manager))
            .await
            .map_err(internal_err("Knowledge graph task failed"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CreateEntitiesArgs {
    /// Entities to create; names that already exist are skipped
    entities: Vec<Entity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CreateRelationsArgs {
    /// Relations to create (active voice, e.g. "works_at")
    relations: Vec<Relation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct AddObservationsArgs {
    observations: Vec<ObservationInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct DeleteEntitiesArgs {
    entity_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct DeleteEntityArgs {
    name: String,
    /// Also delete the entity's relations (default true). When false, an
    /// entity that still has relations is not deleted.
    #[serde(default = "default_true")]
    cascade: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct DeleteObservationsArgs {
    deletions: Vec<ObservationDeletion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct DeleteRelationsArgs {
    relations: Vec<Relation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct DeleteRelationArgs {
    /// Relation id as returned by create_relation or read_graph
    #[serde(deserialize_with = "id_string")]
    id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct SearchNodesArgs {
    /// Case-insensitive text matched against names, types and observations
    query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct OpenNodesArgs {
    names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct RenameEntityArgs {
    old_name: String,
    new_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct NodeRelationsArgs {
    entity_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CreateTypeArgs {
    /// "entityType" or "relationType"
    category: ObjectType,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    /// Overwrite an existing definition instead of failing
    #[serde(default)]
    replace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct DeleteTypeArgs {
    category: ObjectType,
    name: String,
    /// Required when the type is still in use
    #[serde(default)]
    force: bool,
    /// With force: rewrite every usage to this type instead of deleting usages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replace_with: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ListTypesArgs {
    /// "name" (default) or "usage"
    #[serde(default)]
    sort_by: TypeSortBy,
    /// Maximum example names per type
    #[serde(
        default,
        deserialize_with = "option_number_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    example_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ValidateIntegrityArgs {
    /// Remove orphaned, duplicate and self-referencing relations
    #[serde(default)]
    auto_fix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct ExportMermaidArgs {
    /// Entity to center the diagram on; omit for the whole graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    focus: Option<String>,
}

#[tool_router]
impl MemoryServer {
    #[tool(
        name = "create_entities",
        description = "Create multiple new entities in the knowledge graph. Existing names are skipped."
    )]
    async fn create_entities(
        &self,
        Parameters(CreateEntitiesArgs { entities }): Parameters<CreateEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.create_entities(entities)).await? {
            Ok(created) => json_result(json!({ "entities": created })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "create_entity",
        description = "Create one entity. Fails if the name is already taken."
    )]
    async fn create_entity(
        &self,
        Parameters(entity): Parameters<Entity>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.create_entity(entity)).await? {
            Ok(created) => json_result(json!({ "entity": created })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "create_relation",
        description = "Create one relation. Fails on unknown endpoints, duplicates and self-relations."
    )]
    async fn create_relation(
        &self,
        Parameters(relation): Parameters<Relation>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.create_relation(relation)).await? {
            Ok(created) => json_result(json!({ "relation": created })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "create_relations",
        description = "Create relations between existing entities. Duplicates, self-relations and unknown endpoints are skipped."
    )]
    async fn create_relations(
        &self,
        Parameters(CreateRelationsArgs { relations }): Parameters<CreateRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.create_relations(relations)).await? {
            Ok(created) => json_result(json!({ "relations": created })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "add_observations",
        description = "Add observations to existing entities. Returns the observations that were new."
    )]
    async fn add_observations(
        &self,
        Parameters(AddObservationsArgs { observations }): Parameters<AddObservationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.add_observations(observations)).await? {
            Ok(results) => json_result(json!({ "results": results })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "delete_entities",
        description = "Delete entities and every relation touching them. Unknown names are ignored."
    )]
    async fn delete_entities(
        &self,
        Parameters(DeleteEntitiesArgs { entity_names }): Parameters<DeleteEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.delete_entities(&entity_names)).await? {
            Ok(summary) => json_result(json!(summary)),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "delete_entity",
        description = "Delete one entity. Fails if it does not exist, or if cascade is false and it still has relations."
    )]
    async fn delete_entity(
        &self,
        Parameters(DeleteEntityArgs { name, cascade }): Parameters<DeleteEntityArgs>,
    ) -> Result<CallToolResult, McpError> {
        let target = name.clone();
        match self.run(move |m| m.delete_entity(&name, cascade)).await? {
            Ok(relations) => json_result(json!({ "deleted": target, "deletedRelations": relations })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "delete_observations",
        description = "Delete specific observations from entities. Missing entities or observations are ignored."
    )]
    async fn delete_observations(
        &self,
        Parameters(DeleteObservationsArgs { deletions }): Parameters<DeleteObservationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.delete_observations(&deletions)).await? {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(
                "Observations deleted successfully",
            )])),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "delete_relations",
        description = "Delete relations matching the given from/to/relationType triples."
    )]
    async fn delete_relations(
        &self,
        Parameters(DeleteRelationsArgs { relations }): Parameters<DeleteRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.delete_relations(&relations)).await? {
            Ok(count) => json_result(json!({ "deletedRelations": count })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(name = "delete_relation", description = "Delete one relation by its stored id.")]
    async fn delete_relation(
        &self,
        Parameters(DeleteRelationArgs { id }): Parameters<DeleteRelationArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.delete_relation(&id)).await? {
            Ok(relation) => json_result(json!({ "deleted": relation })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(name = "read_graph", description = "Read the entire knowledge graph.")]
    async fn read_graph(&self) -> Result<CallToolResult, McpError> {
        match self.run(|m| m.read_graph()).await? {
            Ok(graph) => json_result(json!(graph)),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "search_nodes",
        description = "Search entities by case-insensitive substring of name, type or observation. Returns matches and the relations among them."
    )]
    async fn search_nodes(
        &self,
        Parameters(SearchNodesArgs { query }): Parameters<SearchNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.search_nodes(&query)).await? {
            Ok(graph) => json_result(json!(graph)),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "open_nodes",
        description = "Open specific entities by name, with the relations among them."
    )]
    async fn open_nodes(
        &self,
        Parameters(OpenNodesArgs { names }): Parameters<OpenNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.open_nodes(&names)).await? {
            Ok(graph) => json_result(json!(graph)),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "rename_entity",
        description = "Rename an entity. Its relations and observations follow the new name."
    )]
    async fn rename_entity(
        &self,
        Parameters(RenameEntityArgs { old_name, new_name }): Parameters<RenameEntityArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.rename_entity(&old_name, &new_name)).await? {
            Ok(entity) => json_result(json!({ "entity": entity })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "get_node_relations",
        description = "List an entity's outgoing and incoming relations and the entities it connects to."
    )]
    async fn get_node_relations(
        &self,
        Parameters(NodeRelationsArgs { entity_name }): Parameters<NodeRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.get_node_relations(&entity_name)).await? {
            Ok(relations) => json_result(json!(relations)),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "create_type",
        description = "Register an entity or relation type with an optional description."
    )]
    async fn create_type(
        &self,
        Parameters(CreateTypeArgs {
            category,
            name,
            description,
            replace,
        }): Parameters<CreateTypeArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .run(move |m| m.create_type(category, &name, description, replace))
            .await?
        {
            Ok(def) => json_result(json!({ "type": def })),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "delete_type",
        description = "Delete a type. In-use types need force; with replaceWith their usages are rewritten, otherwise deleted."
    )]
    async fn delete_type(
        &self,
        Parameters(DeleteTypeArgs {
            category,
            name,
            force,
            replace_with,
        }): Parameters<DeleteTypeArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .run(move |m| m.delete_type(category, &name, force, replace_with.as_deref()))
            .await?
        {
            Ok(outcome) => json_result(json!(outcome)),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "list_types",
        description = "List entity and relation types with usage counts and example entities."
    )]
    async fn list_types(
        &self,
        Parameters(ListTypesArgs {
            sort_by,
            example_limit,
        }): Parameters<ListTypesArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.list_types(sort_by, example_limit)).await? {
            Ok(catalog) => json_result(json!(catalog)),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "validate_integrity",
        description = "Check relations for orphaned endpoints, duplicates and self-references; optionally remove them."
    )]
    async fn validate_integrity(
        &self,
        Parameters(ValidateIntegrityArgs { auto_fix }): Parameters<ValidateIntegrityArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.validate_integrity(auto_fix)).await? {
            Ok(report) => {
                let mut lines = vec![if report.is_clean() {
                    "No integrity issues found".to_string()
                } else {
                    format!("{} issue(s) found, {} fixed", report.issues.len(), report.fixed)
                }];
                lines.extend(report.issues.iter().map(|issue| format!("- {}", issue)));
                Ok(CallToolResult::success(vec![Content::text(lines.join("\n"))])
                    .with_structured(json!(report)))
            }
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "graph_stats",
        description = "Counts of entities, relations and type definitions with a per-type breakdown."
    )]
    async fn graph_stats(&self) -> Result<CallToolResult, McpError> {
        match self.run(|m| m.stats()).await? {
            Ok(stats) => json_result(json!(stats)),
            Err(err) => graph_error(err),
        }
    }

    #[tool(
        name = "export_mermaid",
        description = "Render the graph, or one entity and its neighbours, as a Mermaid flowchart."
    )]
    async fn export_mermaid(
        &self,
        Parameters(ExportMermaidArgs { focus }): Parameters<ExportMermaidArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.run(move |m| m.export_mermaid(focus.as_deref())).await? {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text.clone())])
                .with_structured(json!({ "mermaid": text }))),
            Err(err) => graph_error(err),
        }
    }
}

#[tool_handler]
impl ServerHandler for MemoryServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }
}

/// Run server in stdio mode (default)
async fn run_stdio_mode(server: MemoryServer) -> anyhow::Result<()> {
    let transport = stdio();
    let svc = server.serve(transport).await?;
    svc.waiting().await?;
    Ok(())
}

/// Run server in streamable HTTP mode
async fn run_stream_mode(server: MemoryServer, bind: &str, port: u16) -> anyhow::Result<()> {
    use rmcp::transport::StreamableHttpService;
    use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;

    let addr = format!("{}:{}", bind, port);
    info!("Starting MCP HTTP server on http://{}/mcp", addr);

    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", axum::routing::get(|| async { "OK" }));

    let tcp_listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mode = if args.stream_mode {
        TransportMode::Stream
    } else {
        TransportMode::Stdio
    };

    // stdio mode must stay silent on stderr until a log file is requested
    init_logging(mode, args.log)?;

    let mut config = Config::load();
    if let Some(path) = args.memory_file {
        config.memory_file = path;
    }

    let manager = KnowledgeGraphManager::open(&config.memory_file)?
        .with_type_examples(config.type_examples);
    info!("Using memory file {}", manager.memory_file().display());
    let server = MemoryServer::new(manager);

    match mode {
        TransportMode::Stdio => run_stdio_mode(server).await,
        TransportMode::Stream => run_stream_mode(server, &args.bind, args.port).await,
    }
}

fn internal_err<T: ToString>(message: &'static str) -> impl FnOnce(T) -> McpError + Clone {
    move |err| McpError::internal_error(message, Some(json!({ "error": err.to_string() })))
}

/// Pretty JSON as text plus the same value as structured content.
fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(internal_err("Failed to serialize result"))?;
    Ok(CallToolResult::success(vec![Content::text(text)]).with_structured(value))
}

/// Caller and graph-state errors become error results the model can read;
/// storage failures become protocol errors.
fn graph_error(err: GraphError) -> Result<CallToolResult, McpError> {
    if err.is_user_error() {
        Ok(CallToolResult::error(vec![Content::text(err.to_string())]))
    } else {
        Err(McpError::internal_error(
            "Knowledge graph storage failure",
            Some(json!({ "error": err.to_string() })),
        ))
    }
}

trait WithStructured {
    fn with_structured(self, value: serde_json::Value) -> Self;
}

impl WithStructured for CallToolResult {
    fn with_structured(mut self, value: serde_json::Value) -> Self {
        self.structured_content = Some(value);
        self
    }
}
