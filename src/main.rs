use std::env;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json as SqlxJson;
use tokio::net::{TcpListener, UnixListener};
use tracing::info;

use studycoach::auth::{AuthService, AuthUser};
use studycoach::catalog::{Catalog, WorkbookRef};
use studycoach::error::{AiError, ApiError};
use studycoach::feedback::{self, FocusPayload};
use studycoach::gateway::ChatClient;
use studycoach::planner::{self, RevisionRequest, DEFAULT_WEEK_COUNT};
use studycoach::{AppState, StudyInfo, Subject};

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(rename = "userID")]
    user_id: String,
    name: String,
    #[serde(default)]
    school: String,
    #[serde(default)]
    gmail: String,
    password: String,
    grade: String,
    #[serde(default)]
    subject_name: Vec<String>,
    #[serde(default)]
    subject_publish: Vec<String>,
    #[serde(default)]
    subject_workbook: Vec<String>,
    #[serde(default)]
    subject_scope: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(rename = "userID")]
    user_id: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ScheduleCreateRequest {
    #[serde(default)]
    weeks: Option<u32>,
    #[serde(default)]
    goal: Option<String>,
    /// Workbooks to plan for; the account's registered subjects when absent.
    #[serde(default)]
    workbooks: Option<Vec<WorkbookRef>>,
}

#[derive(Debug, Deserialize)]
struct ScheduleModifyRequest {
    feedback: String,
}

#[derive(Debug, Deserialize)]
struct ScopeModifyRequest {
    subject_name: String,
    subject_publish: String,
    subject_workbook: String,
    new_scope: String,
}

#[derive(Debug, Deserialize)]
struct FocusStartRequest {
    #[serde(rename = "focusTime", default)]
    focus_time: i64,
    #[serde(rename = "measureTime", default)]
    measure_time: i64,
    #[serde(rename = "whenTime", default)]
    when_time: String,
    #[serde(rename = "whenDay", default)]
    when_day: String,
}

#[derive(Debug, Deserialize)]
struct FocusFeedbackRequest {
    #[serde(default)]
    study: StudyInfo,
    #[serde(flatten)]
    focus: FocusPayload,
}

#[derive(Debug, Deserialize)]
struct NeurofeedbackSendRequest {
    when: i64,
    #[serde(default)]
    find_dog: Value,
    #[serde(default)]
    select_square: Value,
}

#[derive(Debug, Deserialize)]
struct FindDogImageLoadRequest {
    number: Vec<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    user_id: String,
    name: String,
    school: String,
    gmail: String,
    grade: String,
    password: String,
    subjects: SqlxJson<Vec<Subject>>,
}

#[derive(Debug, sqlx::FromRow)]
struct FocusRow {
    when_day: String,
    when_time: String,
    measure_time: i64,
    focus_time: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct NeurofeedbackRow {
    measured_on: i64,
    find_dog: SqlxJson<Value>,
    select_square: SqlxJson<Value>,
}

async fn fetch_user(db: &sqlx::PgPool, user_id: &str) -> Result<UserRow, ApiError> {
    sqlx::query_as::<_, UserRow>(
        "SELECT user_id, name, school, gmail, grade, password, subjects
        FROM users WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::UserNotFound(user_id.to_string()))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "hello world!" }))
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.user_id.is_empty() || body.password.is_empty() {
        tracing::warn!(user_id = %body.user_id, "registration with missing fields");
        return Err(ApiError::MissingRequiredField(vec!["userID", "password"]));
    }

    let subjects: Vec<Subject> = body
        .subject_name
        .iter()
        .zip(&body.subject_publish)
        .zip(&body.subject_workbook)
        .zip(&body.subject_scope)
        .map(|(((name, publish), workbook), scope)| Subject {
            name: name.clone(),
            publish: publish.clone(),
            workbook: workbook.clone(),
            scope: scope.clone(),
        })
        .collect();

    let existing: Option<i32> = sqlx::query_scalar("SELECT 1 FROM users WHERE user_id = $1")
        .bind(&body.user_id)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        tracing::warn!(user_id = %body.user_id, "registration for existing user");
        return Err(ApiError::UserAlreadyExists(body.user_id));
    }

    let hashed = state.auth.hash_password(&body.password)?;
    sqlx::query(
        "INSERT INTO users (user_id, name, school, gmail, password, grade, subjects)
        VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&body.user_id)
    .bind(&body.name)
    .bind(&body.school)
    .bind(&body.gmail)
    .bind(&hashed)
    .bind(&body.grade)
    .bind(SqlxJson(&subjects))
    .execute(&state.db)
    .await?;

    Ok(Json(json!({
        "message": format!("User {} signed up successfully!", body.user_id)
    })))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.user_id.is_empty() || body.password.is_empty() {
        return Err(ApiError::MissingRequiredField(vec!["userID", "password"]));
    }

    let user = fetch_user(&state.db, &body.user_id).await?;
    if !state.auth.verify_password(&body.password, &user.password) {
        tracing::warn!(user_id = %body.user_id, "login with invalid password");
        return Err(ApiError::InvalidPassword);
    }

    let token = state.auth.create_access_token(&user.user_id)?;
    Ok(Json(json!({
        "message": format!("{} signed in successfully!", user.user_id),
        "access_token": token,
    })))
}

async fn user_info(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let user = fetch_user(&state.db, &user_id).await?;
    Ok(Json(json!({
        "userInfo": {
            "userID": user.user_id,
            "name": user.name,
            "school": user.school,
            "gmail": user.gmail,
            "grade": user.grade,
            "subjects": user.subjects.0,
        }
    })))
}

async fn schedule_create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<ScheduleCreateRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = fetch_user(&state.db, &user_id).await?;

    let requested: Vec<WorkbookRef> = match body.workbooks {
        Some(workbooks) if !workbooks.is_empty() => workbooks,
        _ => user
            .subjects
            .0
            .iter()
            .map(|s| WorkbookRef {
                grade: user.grade.clone(),
                publish: s.publish.clone(),
                workbook: s.workbook.clone(),
            })
            .collect(),
    };
    if requested.is_empty() {
        return Err(AiError::MissingInput("workbooks").into());
    }

    let relevant = state.catalog.find_relevant(&requested);
    if relevant.is_empty() {
        tracing::warn!(user_id = %user.user_id, "no catalog entries for requested workbooks");
        return Err(AiError::NoMatchingWorkbooks.into());
    }

    let weeks = body.weeks.unwrap_or(DEFAULT_WEEK_COUNT);
    let profile = json!({
        "userID": user.user_id,
        "name": user.name,
        "school": user.school,
        "grade": user.grade,
        "workbooks": requested,
        "goal": body.goal,
    });

    let prompt = planner::build_initial_prompt(&profile, &relevant, weeks, body.goal.as_deref());
    let plan = state.chat.generate_schedule(&prompt, weeks).await?;

    sqlx::query("INSERT INTO schedules (user_id, created_on, plan) VALUES ($1, $2, $3)")
        .bind(&user.user_id)
        .bind(planner::today_key())
        .bind(SqlxJson(&plan))
        .execute(&state.db)
        .await?;

    Ok(Json(json!({
        "message": "Schedule created successfully!",
        "schedule": plan,
    })))
}

async fn schedule_modify(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<ScheduleModifyRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = fetch_user(&state.db, &user_id).await?;

    let existing: Option<SqlxJson<Value>> = sqlx::query_scalar(
        "SELECT plan FROM schedules WHERE user_id = $1 ORDER BY id DESC LIMIT 1",
    )
    .bind(&user.user_id)
    .fetch_optional(&state.db)
    .await?;
    let existing = existing
        .map(|j| j.0)
        .ok_or(ApiError::MissingRequiredField(vec!["existing schedule"]))?;

    let grade_entries = state.catalog.entries_for_grade(&user.grade);
    let profile = json!({
        "userID": user.user_id,
        "name": user.name,
        "grade": user.grade,
        "subjects": user.subjects.0,
    });

    let revised = state
        .chat
        .revise_schedule_grounded(&RevisionRequest {
            profile: &profile,
            catalog: &grade_entries,
            existing: &existing,
            feedback: &body.feedback,
        })
        .await?;

    sqlx::query("INSERT INTO schedules (user_id, created_on, plan) VALUES ($1, $2, $3)")
        .bind(&user.user_id)
        .bind(planner::today_key())
        .bind(SqlxJson(&revised))
        .execute(&state.db)
        .await?;

    Ok(Json(json!({
        "message": "Schedule modified successfully!",
        "schedule": revised,
    })))
}

async fn scope_modify(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<ScopeModifyRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = fetch_user(&state.db, &user_id).await?;

    let mut subjects = user.subjects.0;
    let target = subjects.iter_mut().find(|s| {
        s.name == body.subject_name
            && s.publish == body.subject_publish
            && s.workbook == body.subject_workbook
    });
    match target {
        Some(subject) => subject.scope = body.new_scope,
        None => {
            tracing::warn!(user_id = %user.user_id, subject = %body.subject_name, "scope modify for unknown subject");
            return Err(ApiError::SubjectNotFound {
                name: body.subject_name,
                publish: body.subject_publish,
                workbook: body.subject_workbook,
            });
        }
    }

    sqlx::query("UPDATE users SET subjects = $1 WHERE user_id = $2")
        .bind(SqlxJson(&subjects))
        .bind(&user.user_id)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({ "message": "Scope modified successfully!" })))
}

async fn focus_start(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<FocusStartRequest>,
) -> Result<Json<Value>, ApiError> {
    sqlx::query(
        "INSERT INTO focus_records (user_id, when_day, when_time, measure_time, focus_time)
        VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&user_id)
    .bind(&body.when_day)
    .bind(&body.when_time)
    .bind(body.measure_time)
    .bind(body.focus_time)
    .execute(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Focus started successfully!" })))
}

async fn focus_feedback(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<FocusFeedbackRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.focus.time_slots.is_empty() {
        tracing::warn!(user_id = %user_id, "focus feedback without slot data");
        return Err(ApiError::MissingRequiredField(vec!["timeSlots"]));
    }

    let when_day = body.focus.when_day.clone().unwrap_or_default();
    for (slot, data) in &body.focus.time_slots {
        sqlx::query(
            "INSERT INTO focus_records (user_id, when_day, when_time, measure_time, focus_time)
            VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&user_id)
        .bind(&when_day)
        .bind(slot)
        .bind(data.measure_time as i64)
        .bind(data.focus_time as i64)
        .execute(&state.db)
        .await?;
    }

    // Never errors: the generator degrades to a fixed apology string.
    let message = feedback::generate_feedback(&state.chat, &body.study, Some(&body.focus)).await;
    Ok(Json(json!({ "message": message })))
}

async fn focus_data(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rows = sqlx::query_as::<_, FocusRow>(
        "SELECT when_day, when_time, measure_time, focus_time
        FROM focus_records WHERE user_id = $1 ORDER BY id DESC",
    )
    .bind(&user_id)
    .fetch_all(&state.db)
    .await?;

    let data: Vec<Value> = rows
        .iter()
        .map(|r| {
            json!({
                "whenDay": r.when_day,
                "whenTime": r.when_time,
                "measureTime": r.measure_time,
                "focusTime": r.focus_time,
            })
        })
        .collect();
    Ok(Json(json!({ "focus_data": data })))
}

async fn neurofeedback_send(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<NeurofeedbackSendRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.when == 0 {
        tracing::warn!(user_id = %user_id, "neurofeedback without when parameter");
        return Err(ApiError::MissingRequiredField(vec!["when"]));
    }

    sqlx::query(
        "INSERT INTO neurofeedback (user_id, measured_on, find_dog, select_square)
        VALUES ($1, $2, $3, $4)",
    )
    .bind(&user_id)
    .bind(body.when)
    .bind(SqlxJson(&body.find_dog))
    .bind(SqlxJson(&body.select_square))
    .execute(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Neurofeedback data sent successfully!" })))
}

async fn neurofeedback_load(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rows = sqlx::query_as::<_, NeurofeedbackRow>(
        "SELECT measured_on, find_dog, select_square
        FROM neurofeedback WHERE user_id = $1 ORDER BY id DESC",
    )
    .bind(&user_id)
    .fetch_all(&state.db)
    .await?;

    let data: Vec<Value> = rows
        .into_iter()
        .map(|r| {
            json!({
                "when": r.measured_on,
                "find_dog": r.find_dog.0,
                "select_square": r.select_square.0,
            })
        })
        .collect();
    Ok(Json(json!({ "neurofeedback_data": data })))
}

async fn find_dog_image_load(
    Json(body): Json<FindDogImageLoadRequest>,
) -> Result<Json<Value>, ApiError> {
    let image_dir = env::var("FIND_DOG_IMAGE_DIR")
        .map_err(|_| ApiError::Internal("FIND_DOG_IMAGE_DIR is not set".to_string()))?;
    let upload_url = env::var("UPLOAD_URL")
        .map_err(|_| ApiError::Internal("UPLOAD_URL is not set".to_string()))?;

    let mut entries = match tokio::fs::read_dir(&image_dir).await {
        Ok(entries) => entries,
        Err(_) => {
            tracing::error!("image directory not found: {image_dir}");
            return Err(ApiError::FileNotFound(image_dir));
        }
    };
    let mut filenames = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        filenames.push(entry.file_name().to_string_lossy().into_owned());
    }
    filenames.sort();

    let client = reqwest::Client::new();
    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for num in body.number {
        let Some(filename) = usize::try_from(num).ok().and_then(|i| filenames.get(i)) else {
            tracing::warn!("image number out of range: {num}");
            errors.push(json!({
                "number": num,
                "error": format!(
                    "이미지 번호가 범위를 벗어났습니다. (사용 가능 범위: 0-{})",
                    filenames.len().saturating_sub(1)
                ),
            }));
            continue;
        };

        let path = std::path::Path::new(&image_dir).join(filename);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("failed to read {}: {e}", path.display());
                errors.push(json!({
                    "number": num,
                    "error": format!("파일을 찾을 수 없습니다: {}", path.display()),
                }));
                continue;
            }
        };

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str("image/jpeg")
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        match client.post(&upload_url).multipart(form).send().await {
            Ok(response) if response.status().is_success() => {
                let reply = response.json::<Value>().await.unwrap_or(Value::Null);
                successes.push(reply);
            }
            Ok(response) => {
                tracing::error!("upload failed for {filename}: {}", response.status());
                errors.push(json!({
                    "number": num,
                    "filename": filename,
                    "error": format!("업로드 실패: {}", response.status()),
                }));
            }
            Err(e) => {
                tracing::error!("upload failed for {filename}: {e}");
                errors.push(json!({
                    "number": num,
                    "filename": filename,
                    "error": format!("업로드 실패: {e}"),
                }));
            }
        }
    }

    info!(
        "find dog image load completed, successes: {}, errors: {}",
        successes.len(),
        errors.len()
    );
    Ok(Json(json!({ "successes": successes, "errors": errors })))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studycoach=info".into()),
        )
        .init();

    let db = PgPoolOptions::new()
        .connect(&env::var("DATABASE_URL").expect("DATABASE_URL must be set"))
        .await?;
    sqlx::migrate!().run(&db).await?;

    let catalog_path =
        env::var("WORKBOOK_DICT_PATH").unwrap_or_else(|_| "data/workbooks.json".to_string());
    let catalog = Catalog::load(&catalog_path)?;
    info!(
        "loaded {} workbook entries from {catalog_path}",
        catalog.entries().len()
    );

    let state = AppState {
        db,
        catalog: Arc::new(catalog),
        chat: Arc::new(ChatClient::from_env()?),
        auth: Arc::new(AuthService::from_env()?),
    };

    // Parse command-line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut port = "8000".to_string();
    let mut unix_socket = None;

    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--unix" && i + 1 < args.len() {
            unix_socket = Some(args[i + 1].clone());
            i += 2; // Skip both --unix and the socket path
        } else {
            port = args[i].clone();
            i += 1;
        }
    }

    let app = Router::new()
        .route("/", get(root))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/userInfo", get(user_info))
        .route("/schedule-create", post(schedule_create))
        .route("/schedule-modify", post(schedule_modify))
        .route("/scope-modify", post(scope_modify))
        .route("/focus-start", post(focus_start))
        .route("/focus-feedback", post(focus_feedback))
        .route("/focus-data", get(focus_data))
        .route("/neurofeedback_send", post(neurofeedback_send))
        .route("/neurofeedback_load", get(neurofeedback_load))
        .route("/find_dog_image_load", post(find_dog_image_load))
        .with_state(state);

    info!("Initialized routes");

    if let Some(socket_path) = unix_socket {
        // delete the file before binding
        tokio::fs::remove_file(&socket_path).await.ok();
        let listener = UnixListener::bind(&socket_path)?;

        info!("Starting server on Unix socket: {}", socket_path);
        axum::serve(listener, app.into_make_service()).await?;
    } else {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        info!("Starting server on port {}", port);
        axum::serve(listener, app.into_make_service()).await?;
    }

    Ok(())
}
