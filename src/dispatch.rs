//! JSON request dispatch over stdin/stdout.
//!
//! A request is one JSON object:
//!
//! ```json
//! {"id": 7, "method": "search_knowledge", "params": {"query": "hjärtsvikt", "max_results": 3}}
//! ```
//!
//! | Method | Params | `data` |
//! |--------|--------|--------|
//! | `search_knowledge` | `query` (string), `max_results` (integer, optional) | array of results |
//! | `get_document` | `path` (string) | document or `null` |
//! | `list_tools` | none | `{"tools": [...]}` |
//!
//! Responses use the [`Response`] envelope. Protocol errors add a `code`
//! (`parse_error`, `invalid_request`, `unknown_method`, `invalid_params`).
//! When the request carries an `id`, the response echoes it.
//!
//! [`serve_lines`] handles one request per line; [`serve_once`] reads the
//! whole input as a single request.

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::config::Config;
use crate::query::{QueryEngine, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    UnknownMethod,
    InvalidParams,
}

/// Discovery entry for one callable method.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON Schema of the `params` object.
    pub parameters: Value,
}

pub fn tool_definitions(default_limit: i64) -> Vec<ToolInfo> {
    vec![
        ToolInfo {
            name: "search_knowledge".to_string(),
            description: "Ranked full-text search over the indexed documents.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search terms; every term must match"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results; 0 or less returns all",
                        "default": default_limit
                    }
                },
                "required": ["query"]
            }),
        },
        ToolInfo {
            name: "get_document".to_string(),
            description: "Fetch one indexed document by its exact path.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute path as returned by search_knowledge"
                    }
                },
                "required": ["path"]
            }),
        },
        ToolInfo {
            name: "list_tools".to_string(),
            description: "List the callable methods and their parameters.".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// Checks `params` against a tool's JSON Schema: required fields present,
/// declared types respected. Missing optional fields with a `default` are
/// filled in.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => bail!("params must be an object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for field in &required {
        if !params_obj.contains_key(*field) {
            bail!("missing required parameter: {}", field);
        }
    }

    let mut result = params_obj.clone();
    for (name, prop_schema) in &properties {
        match params_obj.get(name) {
            Some(value) => {
                if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if expected == "integer" && value.is_u64() && !value.is_i64() {
                        bail!("parameter '{}' is out of range", name);
                    }
                    if !type_ok {
                        bail!(
                            "parameter '{}' must be of type '{}', got {}",
                            name,
                            expected,
                            json_type_name(value)
                        );
                    }
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn error_response(code: ErrorCode, message: impl Into<String>) -> Value {
    let message: String = message.into();
    json!({ "success": false, "error": message, "code": code })
}

fn envelope<T: Serialize>(response: &Response<T>) -> Value {
    serde_json::to_value(response)
        .unwrap_or_else(|e| json!({ "success": false, "error": e.to_string() }))
}

/// Parses and answers one raw request.
pub async fn handle_request(engine: &QueryEngine, raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(request) => handle_value(engine, request).await,
        Err(e) => error_response(ErrorCode::ParseError, format!("Invalid JSON request: {}", e)),
    }
}

/// Answers an already-parsed request.
pub async fn handle_value(engine: &QueryEngine, request: Value) -> Value {
    let mut request = match request {
        Value::Object(map) => map,
        other => {
            return error_response(
                ErrorCode::InvalidRequest,
                format!("request must be an object, got {}", json_type_name(&other)),
            )
        }
    };
    let id = request.remove("id");

    let mut response = dispatch(engine, &request).await;
    if let (Some(id), Value::Object(map)) = (id, &mut response) {
        map.insert("id".to_string(), id);
    }
    response
}

async fn dispatch(engine: &QueryEngine, request: &Map<String, Value>) -> Value {
    let method = match request.get("method") {
        Some(Value::String(m)) => m.as_str(),
        Some(_) => return error_response(ErrorCode::InvalidRequest, "method must be a string"),
        None => return error_response(ErrorCode::InvalidRequest, "missing method"),
    };
    debug!(method, "dispatching request");

    let tools = tool_definitions(engine.default_limit());
    let tool = match tools.iter().find(|t| t.name == method) {
        Some(tool) => tool,
        None => {
            return error_response(
                ErrorCode::UnknownMethod,
                format!("Unknown method: {}", method),
            )
        }
    };

    let raw_params = request.get("params").cloned().unwrap_or(Value::Null);
    let params = match validate_params(&tool.parameters, &raw_params) {
        Ok(params) => params,
        Err(e) => return error_response(ErrorCode::InvalidParams, e.to_string()),
    };

    match method {
        "search_knowledge" => {
            let query = params.get("query").and_then(Value::as_str).unwrap_or_default();
            let max_results = params.get("max_results").and_then(Value::as_i64);
            envelope(&engine.search_knowledge(query, max_results).await)
        }
        "get_document" => {
            let path = params.get("path").and_then(Value::as_str).unwrap_or_default();
            envelope(&engine.get_document(path).await)
        }
        _ => envelope(&Response::Success(json!({ "tools": tools }))),
    }
}

/// Answers one request per input line until EOF. Blank lines are ignored;
/// a line that is not valid UTF-8 gets a `parse_error` like any other
/// malformed request.
pub async fn serve_lines<R, W>(engine: &QueryEngine, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_request(engine, line.trim_end_matches(['\r', '\n'])).await;
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

/// Reads the entire input as a single request and answers it.
pub async fn serve_once<R, W>(engine: &QueryEngine, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw).await?;
    let raw = String::from_utf8_lossy(&raw);
    let response = handle_request(engine, &raw).await;
    write_response(&mut writer, &response).await
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Value) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// CLI entry point for `kbh serve`. A store that cannot be opened does not
/// stop the server; each query is answered with `success: false`.
pub async fn run_serve(config: &Config, once: bool) -> Result<()> {
    let engine = QueryEngine::open_or_unavailable(config).await;
    let stdout = tokio::io::stdout();
    if once {
        serve_once(&engine, tokio::io::stdin(), stdout).await
    } else {
        serve_lines(&engine, tokio::io::BufReader::new(tokio::io::stdin()), stdout).await
    }
}

/// CLI entry point for `kbh tools`.
pub fn run_tools(config: &Config) -> Result<()> {
    let doc = json!({ "tools": tool_definitions(config.retrieval.default_limit) });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::store::{InMemoryStore, Store};
    use std::sync::Arc;

    async fn engine() -> QueryEngine {
        let store = InMemoryStore::new();
        store
            .rebuild(&[
                Document {
                    path: "/kb/hjartsvikt.md".to_string(),
                    title: "hjartsvikt".to_string(),
                    content: "Behandling av hjärtsvikt på avdelningen.".to_string(),
                },
                Document {
                    path: "/kb/rutin.txt".to_string(),
                    title: "rutin".to_string(),
                    content: "Allmän rutin för hjärtsvikt och annat.".to_string(),
                },
            ])
            .await
            .unwrap();
        QueryEngine::new(Arc::new(store), 5)
    }

    #[test]
    fn validate_injects_defaults_and_checks_types() {
        let schema = &tool_definitions(5)[0].parameters;
        let params = validate_params(schema, &json!({"query": "x"})).unwrap();
        assert_eq!(params["max_results"], json!(5));

        let err = validate_params(schema, &json!({"query": 3})).unwrap_err();
        assert!(err.to_string().contains("must be of type 'string'"));

        let err = validate_params(schema, &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: query"));

        assert!(validate_params(schema, &json!(["query"])).is_err());
    }

    #[tokio::test]
    async fn oversized_max_results_is_invalid_params() {
        let engine = engine().await;
        let r = handle_request(
            &engine,
            r#"{"id": 9, "method": "search_knowledge", "params": {"query": "rutin", "max_results": 18446744073709551615}}"#,
        )
        .await;
        assert_eq!(r["code"], json!("invalid_params"));
        assert_eq!(r["id"], json!(9));
        assert!(r["error"].as_str().unwrap().contains("out of range"));
    }

    #[tokio::test]
    async fn search_request_echoes_id() {
        let engine = engine().await;
        let response = handle_request(
            &engine,
            r#"{"id": 7, "method": "search_knowledge", "params": {"query": "hjärtsvikt", "max_results": 1}}"#,
        )
        .await;
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["id"], json!(7));
        assert_eq!(response["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_missing_document_is_null() {
        let engine = engine().await;
        let response = handle_request(
            &engine,
            r#"{"method": "get_document", "params": {"path": "/kb/none.txt"}}"#,
        )
        .await;
        assert_eq!(response, json!({"success": true, "data": null}));
    }

    #[tokio::test]
    async fn protocol_errors_carry_codes() {
        let engine = engine().await;

        let r = handle_request(&engine, "{not json").await;
        assert_eq!(r["code"], json!("parse_error"));
        assert_eq!(r["success"], json!(false));

        let r = handle_request(&engine, "[1, 2]").await;
        assert_eq!(r["code"], json!("invalid_request"));

        let r = handle_request(&engine, r#"{"params": {}}"#).await;
        assert_eq!(r["code"], json!("invalid_request"));

        let r = handle_request(&engine, r#"{"id": "a", "method": "delete_everything"}"#).await;
        assert_eq!(r["code"], json!("unknown_method"));
        assert_eq!(r["id"], json!("a"));
        assert!(r["error"].as_str().unwrap().contains("delete_everything"));

        let r = handle_request(&engine, r#"{"method": "get_document", "params": {"path": 1}}"#).await;
        assert_eq!(r["code"], json!("invalid_params"));
    }

    #[tokio::test]
    async fn list_tools_describes_methods() {
        let engine = engine().await;
        let r = handle_request(&engine, r#"{"method": "list_tools"}"#).await;
        let names: Vec<&str> = r["data"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["search_knowledge", "get_document", "list_tools"]);
    }

    #[tokio::test]
    async fn line_mode_answers_each_line() {
        let engine = engine().await;
        let input = concat!(
            r#"{"id": 1, "method": "search_knowledge", "params": {"query": "rutin"}}"#,
            "\n\n",
            "garbage\n",
            r#"{"id": 3, "method": "get_document", "params": {"path": "/kb/rutin.txt"}}"#,
            "\n"
        );
        let mut out = Vec::new();
        serve_lines(&engine, input.as_bytes(), &mut out).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], json!(1));
        assert_eq!(lines[1]["code"], json!("parse_error"));
        assert_eq!(lines[2]["data"]["title"], json!("rutin"));
    }

    #[tokio::test]
    async fn line_mode_survives_invalid_utf8() {
        let engine = engine().await;
        let input: &[u8] = b"\xff\xfe trasig rad\n{\"id\": 2, \"method\": \"list_tools\"}\r\n";
        let mut out = Vec::new();
        serve_lines(&engine, input, &mut out).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["code"], json!("parse_error"));
        assert_eq!(lines[1]["id"], json!(2));
        assert_eq!(lines[1]["success"], json!(true));
    }

    #[tokio::test]
    async fn once_mode_reads_whole_input() {
        let engine = engine().await;
        let input = "{\n  \"method\": \"search_knowledge\",\n  \"params\": {\"query\": \"behandling\"}\n}\n";
        let mut out = Vec::new();
        serve_once(&engine, input.as_bytes(), &mut out).await.unwrap();

        let response: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(response["data"][0]["path"], json!("/kb/hjartsvikt.md"));
    }
}
