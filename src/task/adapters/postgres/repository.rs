//! `PostgreSQL` repository implementation for task lifecycle storage.

use super::{
    models::{AttemptRecordRow, AttemptRow, ChainRow, EdgeRow, TaskRecordRow, TaskRow},
    schema::{task_chain_edges, task_chains, task_executions, tasks},
};
use crate::task::{
    domain::{
        AttemptId, AttemptNumber, Chain, ChainId, CreatedBy, EdgeId, ExecutionAttempt,
        LineageEdge, LineageWrite, NewTaskRecord, OutputMapping, PersistedAttemptData,
        PersistedTaskData, Priority, Prompt, Task, TaskId, TaskListQuery, TaskName, TaskStatus,
        TokenUsage, WorkerId,
    },
    ports::{
        LineageRepository, TaskPage, TaskRepository, TaskRepositoryError, TaskRepositoryResult,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::{Map, Value};

/// `PostgreSQL` connection pool type used by task adapters.
pub type TaskPgPool = Pool<ConnectionManager<PgConnection>>;

/// `PostgreSQL`-backed task repository.
///
/// Status writes are conditional `UPDATE … WHERE status = $expected`
/// statements; multi-row writes run inside one transaction.
#[derive(Debug, Clone)]
pub struct PostgresTaskRepository {
    pool: TaskPgPool,
}

impl PostgresTaskRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: TaskPgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> TaskRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> TaskRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(TaskRepositoryError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(TaskRepositoryError::persistence)?
    }
}

impl From<DieselError> for TaskRepositoryError {
    fn from(err: DieselError) -> Self {
        Self::persistence(err)
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn store(&self, record: &NewTaskRecord) -> TaskRepositoryResult<()> {
        self.store_batch(std::slice::from_ref(record)).await
    }

    async fn store_batch(&self, records: &[NewTaskRecord]) -> TaskRepositoryResult<()> {
        let rows = records
            .iter()
            .map(|record| Ok((to_task_row(record.task())?, record.lineage().clone())))
            .collect::<TaskRepositoryResult<Vec<_>>>()?;

        self.run_blocking(move |connection| {
            connection.transaction::<_, TaskRepositoryError, _>(|tx| {
                for (row, lineage) in &rows {
                    insert_task_with_lineage(tx, row, lineage)?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn find_by_id(&self, id: TaskId) -> TaskRepositoryResult<Option<Task>> {
        self.run_blocking(move |connection| {
            let row = tasks::table
                .filter(tasks::id.eq(id.into_inner()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn find_many(&self, ids: &[TaskId]) -> TaskRepositoryResult<Vec<Task>> {
        let requested = ids.to_vec();
        self.run_blocking(move |connection| {
            let uuids: Vec<uuid::Uuid> = requested.iter().map(|id| id.into_inner()).collect();
            let rows = tasks::table
                .filter(tasks::id.eq_any(&uuids))
                .select(TaskRow::as_select())
                .load::<TaskRow>(connection)?;
            let mut loaded = rows
                .into_iter()
                .map(row_to_task)
                .collect::<TaskRepositoryResult<Vec<_>>>()?;
            loaded.sort_by_key(|task| requested.iter().position(|id| *id == task.id()));
            Ok(loaded)
        })
        .await
    }

    async fn list(&self, query: &TaskListQuery) -> TaskRepositoryResult<TaskPage> {
        let query = query.clone();
        self.run_blocking(move |connection| {
            let total: i64 = filtered_tasks(&query).count().get_result(connection)?;
            let limit = i64::from(query.limit());
            let offset =
                i64::try_from(query.offset()).map_err(TaskRepositoryError::persistence)?;
            let rows = filtered_tasks(&query)
                .order((tasks::created_at.desc(), tasks::id.desc()))
                .limit(limit)
                .offset(offset)
                .select(TaskRow::as_select())
                .load::<TaskRow>(connection)?;
            let tasks = rows
                .into_iter()
                .map(row_to_task)
                .collect::<TaskRepositoryResult<Vec<_>>>()?;
            let total_count = u64::try_from(total).map_err(TaskRepositoryError::persistence)?;
            Ok(TaskPage::new(tasks, total_count, query.offset()))
        })
        .await
    }

    async fn update_if_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> TaskRepositoryResult<bool> {
        let task_id = task.id();
        let row = to_task_row(task)?;
        self.run_blocking(move |connection| {
            if compare_and_set_task(connection, &row, expected)? {
                return Ok(true);
            }
            ensure_task_exists(connection, task_id)?;
            Ok(false)
        })
        .await
    }

    async fn claim(
        &self,
        task: &Task,
        expected: TaskStatus,
        attempt: &ExecutionAttempt,
    ) -> TaskRepositoryResult<bool> {
        let task_id = task.id();
        let attempt_number = attempt.attempt_number();
        let task_row = to_task_row(task)?;
        let attempt_row = to_attempt_row(attempt)?;
        self.run_blocking(move |connection| {
            connection.transaction::<_, TaskRepositoryError, _>(|tx| {
                if !compare_and_set_task(tx, &task_row, expected)? {
                    ensure_task_exists(tx, task_id)?;
                    return Ok(false);
                }
                diesel::insert_into(task_executions::table)
                    .values(&attempt_row)
                    .execute(tx)
                    .map_err(|err| match err {
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            TaskRepositoryError::DuplicateAttempt {
                                task_id,
                                attempt_number,
                            }
                        }
                        _ => TaskRepositoryError::persistence(err),
                    })?;
                Ok(true)
            })
        })
        .await
    }

    async fn record_outcome(
        &self,
        attempt: &ExecutionAttempt,
        task: Option<&Task>,
    ) -> TaskRepositoryResult<bool> {
        let attempt_id = attempt.id();
        let attempt_row = to_attempt_row(attempt)?;
        let task_row = task.map(to_task_row).transpose()?;
        self.run_blocking(move |connection| {
            connection.transaction::<_, TaskRepositoryError, _>(|tx| {
                let updated = diesel::update(
                    task_executions::table
                        .filter(task_executions::id.eq(attempt_id.into_inner()))
                        .filter(task_executions::completed_at.is_null()),
                )
                .set(&attempt_row)
                .execute(tx)?;
                if updated == 0 {
                    let exists: i64 = task_executions::table
                        .filter(task_executions::id.eq(attempt_id.into_inner()))
                        .count()
                        .get_result(tx)?;
                    return Err(if exists > 0 {
                        TaskRepositoryError::AttemptAlreadyRecorded(attempt_id)
                    } else {
                        TaskRepositoryError::AttemptNotFound(attempt_id)
                    });
                }
                match task_row {
                    Some(row) => compare_and_set_task(tx, &row, TaskStatus::Running),
                    None => Ok(false),
                }
            })
        })
        .await
    }

    async fn find_attempt(&self, id: AttemptId) -> TaskRepositoryResult<Option<ExecutionAttempt>> {
        self.run_blocking(move |connection| {
            let row = task_executions::table
                .filter(task_executions::id.eq(id.into_inner()))
                .select(AttemptRow::as_select())
                .first::<AttemptRow>(connection)
                .optional()?;
            row.map(row_to_attempt).transpose()
        })
        .await
    }

    async fn attempts_for_task(
        &self,
        task_id: TaskId,
    ) -> TaskRepositoryResult<Vec<ExecutionAttempt>> {
        self.run_blocking(move |connection| {
            task_executions::table
                .filter(task_executions::task_id.eq(task_id.into_inner()))
                .order(task_executions::attempt_number.asc())
                .select(AttemptRow::as_select())
                .load::<AttemptRow>(connection)?
                .into_iter()
                .map(row_to_attempt)
                .collect()
        })
        .await
    }
}

#[async_trait]
impl LineageRepository for PostgresTaskRepository {
    async fn parent_edge(&self, child: TaskId) -> TaskRepositoryResult<Option<LineageEdge>> {
        self.run_blocking(move |connection| {
            let row = task_chain_edges::table
                .filter(task_chain_edges::child_task_id.eq(child.into_inner()))
                .select(EdgeRow::as_select())
                .first::<EdgeRow>(connection)
                .optional()?;
            row.map(row_to_edge).transpose()
        })
        .await
    }

    async fn child_edges(&self, parent: TaskId) -> TaskRepositoryResult<Vec<LineageEdge>> {
        self.run_blocking(move |connection| {
            task_chain_edges::table
                .filter(task_chain_edges::parent_task_id.eq(parent.into_inner()))
                .order((task_chain_edges::created_at.asc(), task_chain_edges::id.asc()))
                .select(EdgeRow::as_select())
                .load::<EdgeRow>(connection)?
                .into_iter()
                .map(row_to_edge)
                .collect()
        })
        .await
    }

    async fn chain_containing(&self, task: TaskId) -> TaskRepositoryResult<Option<Chain>> {
        self.run_blocking(move |connection| {
            let member_chain = task_chain_edges::table
                .filter(task_chain_edges::child_task_id.eq(task.into_inner()))
                .select(task_chain_edges::chain_id)
                .first::<uuid::Uuid>(connection)
                .optional()?;
            let row = match member_chain {
                Some(chain_id) => task_chains::table
                    .filter(task_chains::id.eq(chain_id))
                    .select(ChainRow::as_select())
                    .first::<ChainRow>(connection)
                    .optional()?,
                None => task_chains::table
                    .filter(task_chains::root_task_id.eq(task.into_inner()))
                    .select(ChainRow::as_select())
                    .first::<ChainRow>(connection)
                    .optional()?,
            };
            Ok(row.map(row_to_chain))
        })
        .await
    }

    async fn chain_edges(&self, chain: ChainId) -> TaskRepositoryResult<Vec<LineageEdge>> {
        self.run_blocking(move |connection| {
            task_chain_edges::table
                .filter(task_chain_edges::chain_id.eq(chain.into_inner()))
                .order((task_chain_edges::created_at.asc(), task_chain_edges::id.asc()))
                .select(EdgeRow::as_select())
                .load::<EdgeRow>(connection)?
                .into_iter()
                .map(row_to_edge)
                .collect()
        })
        .await
    }
}

fn insert_task_with_lineage(
    connection: &mut PgConnection,
    row: &TaskRecordRow,
    lineage: &LineageWrite,
) -> TaskRepositoryResult<()> {
    let parent_name = match lineage {
        LineageWrite::AttachChild { parent_task_id, .. } => Some(
            tasks::table
                .filter(tasks::id.eq(parent_task_id.into_inner()))
                .select(tasks::name)
                .first::<String>(connection)
                .optional()?
                .ok_or(TaskRepositoryError::ParentNotFound(*parent_task_id))?,
        ),
        LineageWrite::Root => None,
    };

    let task_id = TaskId::from_uuid(row.id);
    diesel::insert_into(tasks::table)
        .values(row)
        .execute(connection)
        .map_err(|err| match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                TaskRepositoryError::DuplicateTask(task_id)
            }
            _ => TaskRepositoryError::persistence(err),
        })?;

    let LineageWrite::AttachChild {
        parent_task_id,
        child_task_id,
        output_mapping,
    } = lineage
    else {
        return Ok(());
    };

    let chain_id = resolve_chain(connection, *parent_task_id, parent_name, row.created_at)?;
    diesel::update(task_chains::table.filter(task_chains::id.eq(chain_id)))
        .set(task_chains::updated_at.eq(row.created_at))
        .execute(connection)?;

    let edge = LineageEdge::new(
        ChainId::from_uuid(chain_id),
        *parent_task_id,
        *child_task_id,
        *output_mapping,
        row.created_at,
    )
    .map_err(TaskRepositoryError::persistence)?;
    let mapping = serde_json::to_value(edge.output_mapping())
        .map_err(TaskRepositoryError::persistence)?;
    diesel::insert_into(task_chain_edges::table)
        .values(&EdgeRow {
            id: edge.id().into_inner(),
            chain_id,
            parent_task_id: parent_task_id.into_inner(),
            child_task_id: child_task_id.into_inner(),
            output_mapping: Some(mapping),
            created_at: edge.created_at(),
        })
        .execute(connection)?;
    Ok(())
}

/// Returns the chain the parent belongs to, creating one rooted at the
/// parent when it has none.
fn resolve_chain(
    connection: &mut PgConnection,
    parent_task_id: TaskId,
    parent_name: Option<String>,
    now: DateTime<Utc>,
) -> TaskRepositoryResult<uuid::Uuid> {
    let parent = parent_task_id.into_inner();
    let inherited = task_chain_edges::table
        .filter(task_chain_edges::child_task_id.eq(parent))
        .select(task_chain_edges::chain_id)
        .first::<uuid::Uuid>(connection)
        .optional()?;
    if let Some(chain_id) = inherited {
        return Ok(chain_id);
    }

    // Concurrent siblings may race to create the root chain; the unique
    // root constraint lets exactly one insert win.
    diesel::insert_into(task_chains::table)
        .values(&ChainRow {
            id: ChainId::new().into_inner(),
            chain_name: parent_name,
            root_task_id: parent,
            created_at: now,
            updated_at: now,
        })
        .on_conflict(task_chains::root_task_id)
        .do_nothing()
        .execute(connection)?;

    Ok(task_chains::table
        .filter(task_chains::root_task_id.eq(parent))
        .select(task_chains::id)
        .first::<uuid::Uuid>(connection)?)
}

fn compare_and_set_task(
    connection: &mut PgConnection,
    row: &TaskRecordRow,
    expected: TaskStatus,
) -> TaskRepositoryResult<bool> {
    let updated = diesel::update(
        tasks::table
            .filter(tasks::id.eq(row.id))
            .filter(tasks::status.eq(expected.as_str())),
    )
    .set(row)
    .execute(connection)?;
    Ok(updated == 1)
}

fn ensure_task_exists(connection: &mut PgConnection, task_id: TaskId) -> TaskRepositoryResult<()> {
    let count: i64 = tasks::table
        .filter(tasks::id.eq(task_id.into_inner()))
        .count()
        .get_result(connection)?;
    if count == 0 {
        return Err(TaskRepositoryError::NotFound(task_id));
    }
    Ok(())
}

fn filtered_tasks(query: &TaskListQuery) -> tasks::BoxedQuery<'static, Pg> {
    let mut statement = tasks::table.into_boxed();
    if let Some(status) = query.status() {
        statement = statement.filter(tasks::status.eq(status.as_str()));
    }
    if let Some(search) = query.search() {
        let pattern = format!("%{}%", escape_like(search));
        statement = statement.filter(
            tasks::name
                .ilike(pattern.clone())
                .or(tasks::prompt.ilike(pattern)),
        );
    }
    statement
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        if matches!(character, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

fn to_i32(value: u32) -> TaskRepositoryResult<i32> {
    i32::try_from(value).map_err(TaskRepositoryError::persistence)
}

fn to_u32(value: i32) -> TaskRepositoryResult<u32> {
    u32::try_from(value).map_err(TaskRepositoryError::persistence)
}

fn optional_u32(value: Option<i32>) -> TaskRepositoryResult<Option<u32>> {
    value.map(to_u32).transpose()
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn to_task_row(task: &Task) -> TaskRepositoryResult<TaskRecordRow> {
    Ok(TaskRecordRow {
        id: task.id().into_inner(),
        name: task.name().as_str().to_owned(),
        prompt: task.prompt().as_str().to_owned(),
        status: task.status().as_str().to_owned(),
        priority: task.priority().as_str().to_owned(),
        scheduled_at: task.scheduled_at(),
        execute_after: task.execute_after(),
        started_at: task.started_at(),
        completed_at: task.completed_at(),
        output: task.output().map(str::to_owned),
        error_message: task.error_message().map(str::to_owned),
        retry_count: to_i32(task.retry_count())?,
        max_retries: to_i32(task.max_retries())?,
        parent_task_id: task.parent_task_id().map(TaskId::into_inner),
        chain_position: task.chain_position().map(to_i32).transpose()?,
        created_by: task.created_by().map(|value| value.as_str().to_owned()),
        metadata: Value::Object(task.metadata().clone()),
        created_at: task.created_at(),
        updated_at: task.updated_at(),
    })
}

fn row_to_task(row: TaskRow) -> TaskRepositoryResult<Task> {
    let name = TaskName::new(row.name).map_err(TaskRepositoryError::persistence)?;
    let status =
        TaskStatus::try_from(row.status.as_str()).map_err(TaskRepositoryError::persistence)?;
    let priority =
        Priority::try_from(row.priority.as_str()).map_err(TaskRepositoryError::persistence)?;
    let created_by = row
        .created_by
        .map(CreatedBy::new)
        .transpose()
        .map_err(TaskRepositoryError::persistence)?
        .flatten();

    Ok(Task::from_persisted(PersistedTaskData {
        id: TaskId::from_uuid(row.id),
        name,
        prompt: Prompt::from_persisted(row.prompt),
        status,
        priority,
        scheduled_at: row.scheduled_at,
        execute_after: row.execute_after,
        started_at: row.started_at,
        completed_at: row.completed_at,
        output: row.output,
        error_message: row.error_message,
        retry_count: to_u32(row.retry_count)?,
        max_retries: to_u32(row.max_retries)?,
        parent_task_id: row.parent_task_id.map(TaskId::from_uuid),
        chain_position: optional_u32(row.chain_position)?,
        created_by,
        metadata: into_object(row.metadata),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

fn to_attempt_row(attempt: &ExecutionAttempt) -> TaskRepositoryResult<AttemptRecordRow> {
    let usage = attempt.token_usage();
    let duration_ms = attempt
        .duration_ms()
        .map(i64::try_from)
        .transpose()
        .map_err(TaskRepositoryError::persistence)?;
    Ok(AttemptRecordRow {
        id: attempt.id().into_inner(),
        task_id: attempt.task_id().into_inner(),
        attempt_number: to_i32(attempt.attempt_number().value())?,
        status: attempt.status().as_str().to_owned(),
        queued_at: attempt.queued_at(),
        started_at: attempt.started_at(),
        completed_at: attempt.completed_at(),
        duration_ms,
        model_name: attempt.model_name().map(str::to_owned),
        prompt_tokens: usage.map(|u| to_i32(u.prompt_tokens)).transpose()?,
        completion_tokens: usage.map(|u| to_i32(u.completion_tokens)).transpose()?,
        total_tokens: usage.map(|u| to_i32(u.total_tokens)).transpose()?,
        output: attempt.output().map(str::to_owned),
        error_message: attempt.error_message().map(str::to_owned),
        error_kind: attempt.error_kind().map(str::to_owned),
        worker_id: attempt.worker_id().map(|id| id.as_str().to_owned()),
        execution_metadata: Value::Object(attempt.metadata().clone()),
        created_at: attempt.started_at(),
    })
}

fn row_to_attempt(row: AttemptRow) -> TaskRepositoryResult<ExecutionAttempt> {
    let attempt_number = AttemptNumber::new(to_u32(row.attempt_number)?)
        .map_err(TaskRepositoryError::persistence)?;
    let status =
        TaskStatus::try_from(row.status.as_str()).map_err(TaskRepositoryError::persistence)?;
    let worker_id = row
        .worker_id
        .map(WorkerId::new)
        .transpose()
        .map_err(TaskRepositoryError::persistence)?;
    let token_usage = TokenUsage::from_optional(
        optional_u32(row.prompt_tokens)?,
        optional_u32(row.completion_tokens)?,
        optional_u32(row.total_tokens)?,
    );

    Ok(ExecutionAttempt::from_persisted(PersistedAttemptData {
        id: AttemptId::from_uuid(row.id),
        task_id: TaskId::from_uuid(row.task_id),
        attempt_number,
        status,
        queued_at: row.queued_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
        model_name: row.model_name,
        token_usage,
        output: row.output,
        error_message: row.error_message,
        error_kind: row.error_kind,
        worker_id,
        metadata: into_object(row.execution_metadata),
    }))
}

fn row_to_chain(row: ChainRow) -> Chain {
    Chain::from_persisted(
        ChainId::from_uuid(row.id),
        TaskId::from_uuid(row.root_task_id),
        row.chain_name,
        row.created_at,
        row.updated_at,
    )
}

fn row_to_edge(row: EdgeRow) -> TaskRepositoryResult<LineageEdge> {
    let output_mapping = row
        .output_mapping
        .map(serde_json::from_value::<OutputMapping>)
        .transpose()
        .map_err(TaskRepositoryError::persistence)?
        .unwrap_or_default();
    Ok(LineageEdge::from_persisted(
        EdgeId::from_uuid(row.id),
        ChainId::from_uuid(row.chain_id),
        TaskId::from_uuid(row.parent_task_id),
        TaskId::from_uuid(row.child_task_id),
        output_mapping,
        row.created_at,
    ))
}
