//! Document tools.

use serde_json::{json, Value};

use crate::domain::errors::DomainError;
use crate::domain::models::Document;
use crate::tools::types::{GetDocumentRequest, SaveDocumentRequest, SearchDocumentsRequest};
use crate::tools::{parse_args, ToolContext, ToolError, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "save_document",
        "Store a document owned by the caller",
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "content": { "type": "string" },
                "doc_type": { "type": "string", "default": "note" }
            },
            "required": ["title", "content"]
        }),
        save_document,
    );

    registry.register(
        "get_document",
        "Fetch a document by id",
        json!({
            "type": "object",
            "properties": {
                "document_id": { "type": "string" }
            },
            "required": ["document_id"]
        }),
        get_document,
    );

    registry.register(
        "search_documents",
        "Substring search over document titles and contents",
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "default": 50 }
            },
            "required": ["query"]
        }),
        search_documents,
    );

    registry.register(
        "list_my_documents",
        "List documents owned by the caller",
        json!({ "type": "object", "properties": {} }),
        list_my_documents,
    );
}

async fn save_document(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SaveDocumentRequest = parse_args(arguments)?;
    let document = Document::new(&ctx.caller_agent_id, &params.title, &params.content)
        .with_doc_type(&params.doc_type);
    let id = document.id.clone();
    ctx.deps.memory.save_document(&document).await?;
    Ok(json!({ "document_id": id }))
}

async fn get_document(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: GetDocumentRequest = parse_args(arguments)?;
    let document = ctx
        .deps
        .memory
        .get_document(&params.document_id)
        .await?
        .ok_or_else(|| DomainError::TaskNotFound(format!("document {}", params.document_id)))?;
    Ok(json!({ "document": document }))
}

async fn search_documents(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SearchDocumentsRequest = parse_args(arguments)?;
    let documents = ctx.deps.memory.search_documents(&params.query, params.limit).await?;
    Ok(json!({ "count": documents.len(), "documents": documents }))
}

async fn list_my_documents(ctx: ToolContext, _arguments: Value) -> Result<Value, ToolError> {
    let documents = ctx.deps.memory.list_documents_for_agent(&ctx.caller_agent_id).await?;
    Ok(json!({ "count": documents.len(), "documents": documents }))
}
