//! Wire decoding for the remote API
//!
//! This is the only module that knows the response shapes. Bodies follow the
//! JSON:API layout `{data: ..., meta: {pagination: {...}}}`. Every failure is
//! a `MalformedResponse` tagged with the request path; nothing is defaulted.

use crate::error::{ApiError, ApiResult};
use crate::model::{Attributes, Resource, StateVersion, Workspace};
use crate::pagination::PageCursor;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Pagination {
    #[serde(default, alias = "next_page_cursor")]
    next_page_cursor: Option<String>,
    #[serde(default)]
    next_page: Option<u64>,
}

#[derive(Deserialize)]
struct Relationship {
    data: Option<RelationshipData>,
}

#[derive(Deserialize)]
struct RelationshipData {
    id: String,
}

#[derive(Deserialize)]
struct WorkspaceItem {
    id: String,
    attributes: WorkspaceAttributes,
    #[serde(default)]
    relationships: WorkspaceRelationships,
}

#[derive(Deserialize)]
struct WorkspaceAttributes {
    name: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct WorkspaceRelationships {
    organization: Option<Relationship>,
    current_state_version: Option<Relationship>,
}

#[derive(Deserialize)]
struct StateVersionItem {
    id: String,
    attributes: StateVersionAttributes,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StateVersionAttributes {
    serial: u64,
    created_at: DateTime<Utc>,
}

/// Attribute keys lifted into typed `Resource` fields
const ADDRESS: &str = "address";
const PROVIDER_TYPE: &str = "provider-type";
const PROVIDER: &str = "provider";
const MODULE: &str = "module";

fn from_value<T: DeserializeOwned>(path: &str, what: &str, value: &Value) -> ApiResult<T> {
    T::deserialize(value).map_err(|e| ApiError::malformed(path, format!("{what}: {e}")))
}

/// Read the next-page cursor from a list response
///
/// `next_page_cursor` wins over `next-page`. A body without pagination meta
/// is a single-page collection. An empty cursor ends the walk.
pub fn next_cursor(path: &str, body: &Value) -> ApiResult<Option<PageCursor>> {
    let Some(pagination) = body.get("meta").and_then(|m| m.get("pagination")) else {
        return Ok(None);
    };
    if pagination.is_null() {
        return Ok(None);
    }

    let pagination: Pagination = from_value(path, "meta.pagination", pagination)?;
    if let Some(cursor) = pagination.next_page_cursor.filter(|c| !c.is_empty()) {
        return Ok(Some(PageCursor::Opaque(cursor)));
    }
    Ok(pagination.next_page.map(PageCursor::Page))
}

/// Borrow the `data` array of a list response
pub fn list_items<'a>(path: &str, body: &'a Value) -> ApiResult<&'a [Value]> {
    match body.get("data") {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(ApiError::malformed(path, "`data` is not an array")),
        None => Err(ApiError::malformed(path, "missing field `data`")),
    }
}

/// Decode one element of the workspace list
pub fn workspace(path: &str, item: &Value) -> ApiResult<Workspace> {
    let item: WorkspaceItem = from_value(path, "workspace", item)?;
    let organization = item
        .relationships
        .organization
        .and_then(|r| r.data)
        .map(|d| d.id)
        .ok_or_else(|| {
            ApiError::malformed(path, format!("workspace {} missing `organization`", item.id))
        })?;
    let last_state_version_id = item
        .relationships
        .current_state_version
        .and_then(|r| r.data)
        .map(|d| d.id);

    Ok(Workspace {
        id: item.id,
        name: item.attributes.name,
        organization,
        last_state_version_id,
    })
}

/// Decode a single state version response
pub fn state_version(path: &str, workspace_id: &str, body: &Value) -> ApiResult<StateVersion> {
    let data = body
        .get("data")
        .ok_or_else(|| ApiError::malformed(path, "missing field `data`"))?;
    let item: StateVersionItem = from_value(path, "state version", data)?;

    Ok(StateVersion {
        workspace_id: workspace_id.to_string(),
        version_id: item.id,
        serial: item.attributes.serial,
        created_at: item.attributes.created_at,
    })
}

fn required_str(path: &str, attributes: &mut Attributes, key: &str) -> ApiResult<String> {
    match attributes.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) => Err(ApiError::malformed(
            path,
            format!("resource field `{key}` is empty"),
        )),
        Some(_) => Err(ApiError::malformed(
            path,
            format!("resource field `{key}` is not a string"),
        )),
        None => Err(ApiError::malformed(
            path,
            format!("resource missing field `{key}`"),
        )),
    }
}

/// Decode one element of a workspace's resource list
pub fn resource(path: &str, workspace_id: &str, item: &Value) -> ApiResult<Resource> {
    let mut attributes: Attributes = match item.get("attributes") {
        Some(value @ Value::Object(_)) => from_value(path, "resource attributes", value)?,
        Some(_) => return Err(ApiError::malformed(path, "resource `attributes` is not an object")),
        None => return Err(ApiError::malformed(path, "resource missing field `attributes`")),
    };

    let address = required_str(path, &mut attributes, ADDRESS)?;
    let resource_type = required_str(path, &mut attributes, PROVIDER_TYPE)?;
    let provider = required_str(path, &mut attributes, PROVIDER)?;
    let module_path = match attributes.remove(MODULE) {
        None | Some(Value::Null) => None,
        Some(Value::String(m)) => Some(m),
        Some(_) => {
            return Err(ApiError::malformed(
                path,
                "resource field `module` is not a string",
            ))
        }
    };

    Ok(Resource {
        workspace_id: workspace_id.to_string(),
        address,
        resource_type,
        provider,
        module_path,
        attributes,
    })
}
