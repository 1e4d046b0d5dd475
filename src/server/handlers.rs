use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::db::connection::DatabaseConnection;
use crate::db::manager::ConnectionHandle;
use crate::db::schema;
use crate::engine::aggregate::{ResultPage, ResultQuery};
use crate::engine::jobs::JobStatus;
use crate::engine::options::{ComparisonOptions, ExportFormat};
use crate::engine::orchestrator::{self, RunContext};
use crate::engine::result::ComparisonResult;
use crate::error::{AppError, ComparisonError, ErrorKind};
use crate::output;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub success: bool,
    pub message: String,
    pub connection_id: String,
}

pub async fn connect(
    State(state): State<Arc<AppState>>,
    Json(connection): Json<DatabaseConnection>,
) -> ApiResult<Json<ConnectResponse>> {
    let handle = state.manager.connect(&connection).await?;
    let connection_id = handle.id().to_string();
    state.hold(handle);
    Ok(Json(ConnectResponse {
        success: true,
        message: format!(
            "Connected to {} database '{}'",
            connection.database_type, connection.database_name
        ),
        connection_id,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub connection_id: String,
    pub database_type: String,
    pub database_name: String,
    pub references: usize,
}

pub async fn list_connections(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionSummary>> {
    let summaries = state
        .manager
        .connection_ids()
        .into_iter()
        .filter_map(|id| {
            let handle = state.manager.get(&id)?;
            let connection = handle.connection().clone();
            drop(handle);
            Some(ConnectionSummary {
                references: state.manager.ref_count(&id),
                connection_id: id,
                database_type: connection.database_type,
                database_name: connection.database_name,
            })
        })
        .collect();
    Json(summaries)
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.release(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ComparisonError::ConnectionNotFound(id).into())
    }
}

pub async fn tables(
    State(state): State<Arc<AppState>>,
    Path(connection): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let handle = state.resolve(&connection)?;
    Ok(Json(schema::list_tables(&handle).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnsQuery {
    pub connection: Option<String>,
    pub db_name: Option<String>,
    #[serde(default)]
    pub types: bool,
}

/// Column names, or `{name, dataType}` objects with `types=true`.
pub async fn columns(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(query): Query<ColumnsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let (handle, table) = match query.connection.or(query.db_name) {
        Some(reference) => (state.resolve(&reference)?, table),
        None => state
            .resolve_qualified(&table)
            .or_else(|| state.only_connection().map(|handle| (handle, table.clone())))
            .ok_or_else(|| {
                AppError::new(
                    ErrorKind::Config,
                    format!(
                        "Cannot tell which connection '{}' belongs to; pass ?connection= or ?dbName=",
                        table
                    ),
                )
            })?,
    };

    let columns = schema::list_columns(&handle, &table).await?;
    let body = if query.types {
        json!(columns)
    } else {
        json!(columns.into_iter().map(|c| c.name).collect::<Vec<_>>())
    };
    Ok(Json(body))
}

/// Comparison options plus optional explicit connections. Without them each
/// side is resolved from a `database.table` prefix.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareRequest {
    #[serde(flatten)]
    pub options: ComparisonOptions,
    pub source_connection: Option<String>,
    pub target_connection: Option<String>,
}

fn side(
    state: &AppState,
    connection: Option<&str>,
    table: &mut String,
) -> Result<ConnectionHandle, ComparisonError> {
    if let Some(reference) = connection {
        return state.resolve(reference);
    }
    if let Some((handle, rest)) = state.resolve_qualified(table) {
        *table = rest;
        return Ok(handle);
    }
    state
        .only_connection()
        .ok_or_else(|| ComparisonError::ConnectionNotFound(table.clone()))
}

fn prepare(
    state: &AppState,
    request: CompareRequest,
) -> Result<(ComparisonOptions, RunContext), ComparisonError> {
    let CompareRequest {
        mut options,
        source_connection,
        target_connection,
    } = request;
    let source = side(state, source_connection.as_deref(), &mut options.source_table)?;
    let target = side(state, target_connection.as_deref(), &mut options.target_table)?;
    let mut ctx = RunContext::new(source, target);
    ctx.batch_size = state.engine.batch_size;
    Ok((options, ctx))
}

/// Synchronous comparison. A client that disconnects cancels the run.
pub async fn compare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompareRequest>,
) -> ApiResult<Json<Vec<ComparisonResult>>> {
    let (options, ctx) = prepare(&state, request)?;
    let _cancel_on_drop = ctx.cancel.clone().drop_guard();
    let report = orchestrator::compare(&options, &ctx).await?;
    Ok(Json(report.into_results()))
}

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompareRequest>,
) -> ApiResult<(StatusCode, Json<JobStatus>)> {
    let (options, ctx) = prepare(&state, request)?;
    options.validate()?;
    let status = state.jobs.submit(options, ctx);
    Ok((StatusCode::ACCEPTED, Json(status)))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobStatus>> {
    Json(state.jobs.list())
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.jobs.status(id)?))
}

pub async fn job_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ResultQuery>,
) -> ApiResult<Json<ResultPage>> {
    Ok(Json(state.jobs.results(id, &query)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

pub async fn job_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let requested = match query.format.as_deref() {
        Some(raw) => Some(ExportFormat::parse(raw).ok_or_else(|| {
            AppError::new(
                ErrorKind::Config,
                format!("Unknown export format '{}' (expected json, csv or excel)", raw),
            )
        })?),
        None => None,
    };
    let (format, body) = state.jobs.export(id, requested)?;
    info!(job = %id, format = %format, bytes = body.len(), "exported results");
    let disposition = format!(
        "attachment; filename=\"{}\"",
        output::export_file_name(&id.to_string(), format)
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Cancels a running job, or forgets a finished one.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.jobs.remove(id)?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SettingsResolved;
    use crate::db::driver::SessionSettings;
    use crate::db::manager::ConnectionManager;
    use crate::db::memory::{MemoryConnector, MemoryDatabase, MemoryTable};
    use crate::db::types::Value;
    use crate::engine::jobs::JobState;
    use crate::engine::options::ColumnMapping;
    use crate::engine::result::RowStatus;

    fn users(rows: &[(i64, &str)]) -> MemoryTable {
        rows.iter().fold(
            MemoryTable::new("users", &[("id", "integer"), ("name", "varchar")]),
            |t, (id, name)| t.row(vec![Value::Int(*id), Value::Text(name.to_string())]),
        )
    }

    fn state() -> Arc<AppState> {
        let connector = Arc::new(MemoryConnector::new());
        connector.register(
            "crm",
            MemoryDatabase::default().with_table(users(&[(1, "Ann"), (2, "Bob")])),
        );
        connector.register(
            "erp",
            MemoryDatabase::default().with_table(users(&[(1, "Ann"), (3, "Cid")])),
        );
        let manager = ConnectionManager::with_connector(connector, SessionSettings::default());
        Arc::new(AppState::new(manager, SettingsResolved::default().engine))
    }

    fn connection(db: &str) -> DatabaseConnection {
        DatabaseConnection::from_url(&format!("mysql://app:pw@db-{}/{}", db, db)).expect("url")
    }

    async fn connect_both(state: &Arc<AppState>) -> (String, String) {
        let crm = connect(State(state.clone()), Json(connection("crm"))).await.expect("crm");
        let erp = connect(State(state.clone()), Json(connection("erp"))).await.expect("erp");
        (crm.0.connection_id.clone(), erp.0.connection_id.clone())
    }

    fn request(source: &str, target: &str) -> CompareRequest {
        let mut options = ComparisonOptions::new(
            source,
            target,
            vec![ColumnMapping::new("id", "id"), ColumnMapping::new("name", "name")],
        );
        options.key_columns = vec!["id".to_string()];
        CompareRequest {
            options,
            source_connection: None,
            target_connection: None,
        }
    }

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[tokio::test]
    async fn connect_returns_stable_id() {
        let state = state();
        let (crm, _) = connect_both(&state).await;
        assert_eq!(crm, "mysql:app@db-crm:3306/crm");
        assert_eq!(state.manager.ref_count(&crm), 1);

        let again = connect(State(state.clone()), Json(connection("crm")))
            .await
            .expect("reconnect");
        assert_eq!(again.0.connection_id, crm);
        assert!(again.0.success);
    }

    #[tokio::test]
    async fn lists_tables_by_database_name() {
        let state = state();
        connect_both(&state).await;
        let tables = tables(State(state.clone()), Path("crm".to_string())).await.expect("tables");
        assert_eq!(tables.0, vec!["users".to_string()]);

        let err = tables_err(&state, "nope").await;
        assert_eq!(status_of(err), StatusCode::NOT_FOUND);
    }

    async fn tables_err(state: &Arc<AppState>, name: &str) -> ApiError {
        match tables(State(state.clone()), Path(name.to_string())).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        }
    }

    #[tokio::test]
    async fn columns_resolve_from_prefix_or_query() {
        let state = state();
        let (crm, _) = connect_both(&state).await;

        let names = columns(
            State(state.clone()),
            Path("erp.users".to_string()),
            Query(ColumnsQuery::default()),
        )
        .await
        .expect("prefixed");
        assert_eq!(names.0, json!(["id", "name"]));

        let typed = columns(
            State(state.clone()),
            Path("users".to_string()),
            Query(ColumnsQuery {
                connection: Some(crm),
                types: true,
                ..ColumnsQuery::default()
            }),
        )
        .await
        .expect("typed");
        assert_eq!(typed.0[1], json!({"name": "name", "dataType": "varchar"}));

        let ambiguous = columns(
            State(state.clone()),
            Path("users".to_string()),
            Query(ColumnsQuery::default()),
        )
        .await;
        match ambiguous {
            Ok(_) => panic!("expected an error"),
            Err(err) => assert_eq!(status_of(err), StatusCode::BAD_REQUEST),
        }
    }

    #[tokio::test]
    async fn compare_resolves_database_prefixes() {
        let state = state();
        connect_both(&state).await;
        let results = compare(State(state.clone()), Json(request("crm.users", "erp.users")))
            .await
            .expect("compare");
        let statuses = results.0.iter().map(|r| r.status).collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![RowStatus::Matched, RowStatus::MissingTarget, RowStatus::MissingSource]
        );
    }

    #[tokio::test]
    async fn compare_rejects_bad_mapping_with_422() {
        let state = state();
        connect_both(&state).await;
        let mut req = request("crm.users", "erp.users");
        req.options.column_mappings.push(ColumnMapping::new("email", "email"));
        match compare(State(state.clone()), Json(req)).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => assert_eq!(status_of(err), StatusCode::UNPROCESSABLE_ENTITY),
        }
    }

    #[tokio::test]
    async fn job_lifecycle_serves_results_and_export() {
        let state = state();
        let (crm, erp) = connect_both(&state).await;
        let mut req = request("users", "users");
        req.source_connection = Some(crm);
        req.target_connection = Some(erp);
        req.options.export_format = ExportFormat::Csv;

        let (status, submitted) = submit_job(State(state.clone()), Json(req))
            .await
            .expect("submit");
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = submitted.0.job_id;

        let mut finished = None;
        for _ in 0..200 {
            let current = job_status(State(state.clone()), Path(id)).await.expect("status");
            if current.0.state != JobState::Running {
                finished = Some(current.0);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(finished.expect("finished").state, JobState::Completed);

        let page = job_results(
            State(state.clone()),
            Path(id),
            Query(ResultQuery {
                status: Some(RowStatus::MissingSource),
                ..ResultQuery::default()
            }),
        )
        .await
        .expect("results");
        assert_eq!(page.0.total, 1);

        let response = job_export(State(state.clone()), Path(id), Query(ExportQuery::default()))
            .await
            .expect("export");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert!(
            response.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .expect("header")
                .ends_with(".csv\"")
        );

        let bad = job_export(
            State(state.clone()),
            Path(id),
            Query(ExportQuery {
                format: Some("pdf".to_string()),
            }),
        )
        .await;
        match bad {
            Ok(_) => panic!("expected an error"),
            Err(err) => assert_eq!(status_of(err), StatusCode::BAD_REQUEST),
        }

        let removed = delete_job(State(state.clone()), Path(id)).await.expect("delete");
        assert_eq!(removed.0.state, JobState::Completed);
        match job_status(State(state.clone()), Path(id)).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => assert_eq!(status_of(err), StatusCode::NOT_FOUND),
        }
    }

    #[tokio::test]
    async fn disconnect_releases_session() {
        let state = state();
        let (crm, _) = connect_both(&state).await;
        let status = disconnect(State(state.clone()), Path(crm.clone())).await.expect("disconnect");
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(state.manager.ref_count(&crm), 0);

        match disconnect(State(state.clone()), Path(crm)).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => assert_eq!(status_of(err), StatusCode::NOT_FOUND),
        }
    }
}
