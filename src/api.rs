use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{AuthUser, Permission, Role, issue_token};
use crate::db::{
    ActivityEntry, NewStudent, SchoolStats, StudentPatch, authenticate_user, create_dossier,
    create_exam_center, create_school, create_student, create_user, delete_exam_center,
    delete_school, delete_student, delete_user, get_all_exam_centers, get_all_schools,
    get_all_users, get_dossier, get_dossier_steps, get_dossier_summary, get_dossiers,
    get_exam_center, get_latest_dossier_for_student, get_recent_activity, get_school,
    get_school_stats, get_student, get_students, get_user_account, update_dossier_step,
    update_exam_center, update_school, update_student, update_user,
};
use crate::error::AppError;
use crate::models::{
    Dossier, DossierStep, DossierSummary, ExamCenter, School, StepName, Student, UserAccount,
};
use crate::validation::{AppErrorExt, JsonValidateExt, ToValidationResponse, ValidationResponse};

type ApiResult<T> = Result<T, Custom<Json<ValidationResponse>>>;

// ---------------------------------------------------------------------------
// Authentication

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: AuthUser,
}

#[post("/auth/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<LoginResponse>> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = issue_token(user.id, &user.username, user.role, user.school_id)
                .validate_custom()?;

            Ok(Json(LoginResponse { token, user }))
        }
        None => Err(AppError::Authentication("Invalid credentials".to_string())
            .to_validation_response()),
    }
}

#[get("/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Dossiers

#[derive(Deserialize, Validate)]
pub struct CreateDossierRequest {
    student_id: i64,
    license_type: Option<String>,
}

#[derive(Serialize)]
pub struct DossierDetailResponse {
    #[serde(flatten)]
    pub dossier: DossierSummary,
    pub steps: Vec<DossierStep>,
}

#[derive(Deserialize, Validate)]
pub struct UpdateStepRequest {
    #[validate(length(min = 1, message = "Step name is required"))]
    step: String,
    completed: bool,
    completion_date: Option<chrono::NaiveDate>,
    result: Option<String>,
}

#[derive(Serialize)]
pub struct StepProgressResponse {
    pub progress: i64,
}

#[get("/dossiers")]
pub async fn api_get_dossiers(
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<DossierSummary>>> {
    user.require_permission(Permission::ViewDossiers)
        .validate_custom()?;

    let dossiers = get_dossiers(db, user.school_scope()).await.validate_custom()?;
    Ok(Json(dossiers))
}

#[get("/dossiers/school/<school_id>")]
pub async fn api_get_dossiers_by_school(
    school_id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<DossierSummary>>> {
    user.require_permission(Permission::ViewDossiers)
        .validate_custom()?;
    user.require_school_access(Some(school_id)).validate_custom()?;

    let dossiers = get_dossiers(db, Some(school_id)).await.validate_custom()?;
    Ok(Json(dossiers))
}

#[get("/dossiers/<id>")]
pub async fn api_get_dossier(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<DossierDetailResponse>> {
    user.require_permission(Permission::ViewDossiers)
        .validate_custom()?;

    let dossier = get_dossier_summary(db, id).await.validate_custom()?;
    user.require_school_access(dossier.school_id).validate_custom()?;

    let steps = get_dossier_steps(db, id).await.validate_custom()?;
    Ok(Json(DossierDetailResponse { dossier, steps }))
}

#[post("/dossiers", data = "<request>")]
pub async fn api_create_dossier(
    request: Json<CreateDossierRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Dossier>>> {
    user.require_permission(Permission::ManageDossiers)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let student = get_student(db, validated.student_id).await.validate_custom()?;
    user.require_school_access(student.school_id).validate_custom()?;

    let license_type = validated.license_type.as_deref().unwrap_or("B");
    let dossier = create_dossier(db, &student, license_type)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(dossier)))
}

#[patch("/dossiers/<id>/step", data = "<request>")]
pub async fn api_update_dossier_step(
    id: i64,
    request: Json<UpdateStepRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<StepProgressResponse>> {
    user.require_permission(Permission::ManageDossiers)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let dossier = get_dossier(db, id).await.validate_custom()?;
    user.require_school_access(dossier.school_id).validate_custom()?;

    let step = StepName::from_str(&validated.step)
        .map_err(|e| AppError::Validation(e.to_string()))
        .validate_custom()?;

    let progress = update_dossier_step(
        db,
        id,
        step,
        validated.completed,
        validated.completion_date,
        validated.result.as_deref(),
    )
    .await
    .validate_custom()?;

    Ok(Json(StepProgressResponse { progress }))
}

// ---------------------------------------------------------------------------
// Schools

#[derive(Deserialize, Validate)]
pub struct SchoolRequest {
    #[validate(length(min = 1, message = "School name is required"))]
    name: String,
    address: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    director_name: Option<String>,
}

#[get("/schools")]
pub async fn api_get_schools(
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<School>>> {
    user.require_permission(Permission::ManageSchools)
        .validate_custom()?;

    let schools = get_all_schools(db).await.validate_custom()?;
    Ok(Json(schools))
}

#[get("/schools/<id>")]
pub async fn api_get_school(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<School>> {
    user.require_permission(Permission::ManageSchools)
        .validate_custom()?;

    let school = get_school(db, id).await.validate_custom()?;
    Ok(Json(school))
}

#[post("/schools", data = "<request>")]
pub async fn api_create_school(
    request: Json<SchoolRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<School>>> {
    user.require_permission(Permission::ManageSchools)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let id = create_school(
        db,
        &validated.name,
        validated.address.as_deref(),
        validated.phone.as_deref(),
        validated.email.as_deref(),
        validated.director_name.as_deref(),
    )
    .await
    .validate_custom()?;

    let school = get_school(db, id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(school)))
}

#[put("/schools/<id>", data = "<request>")]
pub async fn api_update_school(
    id: i64,
    request: Json<SchoolRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<School>> {
    user.require_permission(Permission::ManageSchools)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    update_school(
        db,
        id,
        &validated.name,
        validated.address.as_deref(),
        validated.phone.as_deref(),
        validated.email.as_deref(),
        validated.director_name.as_deref(),
    )
    .await
    .validate_custom()?;

    let school = get_school(db, id).await.validate_custom()?;
    Ok(Json(school))
}

#[delete("/schools/<id>")]
pub async fn api_delete_school(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::ManageSchools)
        .validate_custom()?;

    delete_school(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}

#[get("/schools/<id>/stats")]
pub async fn api_get_school_stats(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<SchoolStats>> {
    user.require_permission(Permission::ViewSchoolStats)
        .validate_custom()?;
    user.require_school_access(Some(id)).validate_custom()?;

    let stats = get_school_stats(db, id).await.validate_custom()?;
    Ok(Json(stats))
}

#[get("/schools/<id>/recent-activity")]
pub async fn api_get_school_recent_activity(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<ActivityEntry>>> {
    user.require_permission(Permission::ViewSchoolStats)
        .validate_custom()?;
    user.require_school_access(Some(id)).validate_custom()?;

    let entries = get_recent_activity(db, id).await.validate_custom()?;
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------
// Students

#[derive(Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(length(min = 1, message = "First name is required"))]
    first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    last_name: String,
    #[validate(email(message = "Invalid email address"))]
    email: Option<String>,
    phone: Option<String>,
    date_of_birth: Option<chrono::NaiveDate>,
    birth_country: Option<String>,
    address: Option<String>,
    school_id: Option<i64>,
    status: Option<String>,
    nip: Option<String>,
    cnss_number: Option<String>,
    cnamgs_number: Option<String>,
    picture: Option<String>,
    nfc_uid: Option<String>,
    qr_code: Option<String>,
}

#[get("/students")]
pub async fn api_get_students(
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<Student>>> {
    user.require_permission(Permission::ViewStudents)
        .validate_custom()?;

    let students = get_students(db, user.school_scope()).await.validate_custom()?;
    Ok(Json(students))
}

#[get("/students/school/<school_id>", rank = 1)]
pub async fn api_get_students_by_school(
    school_id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<Student>>> {
    user.require_permission(Permission::ViewStudents)
        .validate_custom()?;
    user.require_school_access(Some(school_id)).validate_custom()?;

    let students = get_students(db, Some(school_id)).await.validate_custom()?;
    Ok(Json(students))
}

#[get("/students/<id>")]
pub async fn api_get_student(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Student>> {
    user.require_permission(Permission::ViewStudents)
        .validate_custom()?;

    let student = get_student(db, id).await.validate_custom()?;
    user.require_school_access(student.school_id).validate_custom()?;

    Ok(Json(student))
}

#[post("/students", data = "<request>")]
pub async fn api_create_student(
    request: Json<CreateStudentRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Student>>> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    // School callers always create into their own school.
    let school_id = match user.role {
        Role::School => user.school_id,
        _ => validated.school_id,
    };
    user.require_school_access(school_id).validate_custom()?;

    let new_student = NewStudent {
        first_name: validated.first_name,
        last_name: validated.last_name,
        email: validated.email,
        phone: validated.phone,
        date_of_birth: validated.date_of_birth,
        birth_country: validated.birth_country,
        address: validated.address,
        school_id,
        status: validated.status,
        nip: validated.nip,
        cnss_number: validated.cnss_number,
        cnamgs_number: validated.cnamgs_number,
        picture: validated.picture,
        nfc_uid: validated.nfc_uid,
        qr_code: validated.qr_code,
    };

    let id = create_student(db, &new_student).await.validate_custom()?;
    let student = get_student(db, id).await.validate_custom()?;

    Ok(Custom(Status::Created, Json(student)))
}

#[put("/students/<id>", data = "<patch>")]
pub async fn api_update_student(
    id: i64,
    patch: Json<StudentPatch>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Student>> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;

    let existing = get_student(db, id).await.validate_custom()?;
    user.require_school_access(existing.school_id).validate_custom()?;

    update_student(db, id, &patch.into_inner()).await.validate_custom()?;

    let student = get_student(db, id).await.validate_custom()?;
    Ok(Json(student))
}

#[delete("/students/<id>")]
pub async fn api_delete_student(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;

    let existing = get_student(db, id).await.validate_custom()?;
    user.require_school_access(existing.school_id).validate_custom()?;

    delete_student(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}

#[derive(Serialize)]
pub struct ProgressStep {
    pub step_name: String,
    pub completed: bool,
    pub completion_date: Option<chrono::NaiveDate>,
    pub result: Option<String>,
}

#[derive(Serialize)]
pub struct StudentDossierProgress {
    pub student_name: String,
    pub license_type: String,
    pub steps: Vec<ProgressStep>,
}

#[get("/students/<id>/dossier-progress", rank = 2)]
pub async fn api_get_student_dossier_progress(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<StudentDossierProgress>> {
    user.require_permission(Permission::ViewDossiers)
        .validate_custom()?;

    let student = get_student(db, id).await.validate_custom()?;
    user.require_school_access(student.school_id).validate_custom()?;

    let dossier = get_latest_dossier_for_student(db, id)
        .await
        .validate_custom()?
        .ok_or_else(|| AppError::NotFound(format!("No dossier found for student {}", id)))
        .validate_custom()?;

    let steps = get_dossier_steps(db, dossier.id)
        .await
        .validate_custom()?
        .into_iter()
        .map(|s| ProgressStep {
            step_name: s.step_name,
            completed: s.completed,
            completion_date: s.completion_date,
            result: s.result,
        })
        .collect();

    Ok(Json(StudentDossierProgress {
        student_name: dossier.student_name,
        license_type: dossier.license_type,
        steps,
    }))
}

// ---------------------------------------------------------------------------
// Users

#[derive(Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    password: String,
    #[validate(length(min = 1, message = "Role is required"))]
    role: String,
    school_id: Option<i64>,
}

#[derive(Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Role is required"))]
    role: String,
    school_id: Option<i64>,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    password: Option<String>,
}

fn parse_role(role: &str, school_id: Option<i64>) -> Result<Role, AppError> {
    let role = Role::from_str(role).map_err(|e| AppError::Validation(e.to_string()))?;

    if role == Role::School && school_id.is_none() {
        return Err(AppError::Validation(
            "school_id is required for school accounts".to_string(),
        ));
    }

    Ok(role)
}

#[get("/users")]
pub async fn api_get_users(
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<UserAccount>>> {
    user.require_permission(Permission::ManageUsers)
        .validate_custom()?;

    let users = get_all_users(db).await.validate_custom()?;
    Ok(Json(users))
}

#[post("/users", data = "<request>")]
pub async fn api_create_user(
    request: Json<CreateUserRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<UserAccount>>> {
    user.require_permission(Permission::ManageUsers)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let role = parse_role(&validated.role, validated.school_id).validate_custom()?;

    let id = create_user(db, &validated.username, &validated.password, role, validated.school_id)
        .await
        .validate_custom()?;

    let account = get_user_account(db, id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(account)))
}

#[put("/users/<id>", data = "<request>")]
pub async fn api_update_user(
    id: i64,
    request: Json<UpdateUserRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<UserAccount>> {
    user.require_permission(Permission::ManageUsers)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let role = parse_role(&validated.role, validated.school_id).validate_custom()?;

    update_user(
        db,
        id,
        &validated.username,
        role,
        validated.school_id,
        validated.password.as_deref(),
    )
    .await
    .validate_custom()?;

    let account = get_user_account(db, id).await.validate_custom()?;
    Ok(Json(account))
}

#[delete("/users/<id>")]
pub async fn api_delete_user(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::ManageUsers)
        .validate_custom()?;

    delete_user(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}

// ---------------------------------------------------------------------------
// Exam centers

#[derive(Deserialize, Validate)]
pub struct ExamCenterRequest {
    #[validate(length(min = 1, message = "Exam center name is required"))]
    name: String,
    address: Option<String>,
    contact_person: Option<String>,
    phone: Option<String>,
    email: Option<String>,
}

#[get("/exam-centers")]
pub async fn api_get_exam_centers(
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<ExamCenter>>> {
    user.require_permission(Permission::ManageExamCenters)
        .validate_custom()?;

    let centers = get_all_exam_centers(db).await.validate_custom()?;
    Ok(Json(centers))
}

#[get("/exam-centers/<id>")]
pub async fn api_get_exam_center(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<ExamCenter>> {
    user.require_permission(Permission::ManageExamCenters)
        .validate_custom()?;

    let center = get_exam_center(db, id).await.validate_custom()?;
    Ok(Json(center))
}

#[post("/exam-centers", data = "<request>")]
pub async fn api_create_exam_center(
    request: Json<ExamCenterRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<ExamCenter>>> {
    user.require_permission(Permission::ManageExamCenters)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let id = create_exam_center(
        db,
        &validated.name,
        validated.address.as_deref(),
        validated.contact_person.as_deref(),
        validated.phone.as_deref(),
        validated.email.as_deref(),
    )
    .await
    .validate_custom()?;

    let center = get_exam_center(db, id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(center)))
}

#[put("/exam-centers/<id>", data = "<request>")]
pub async fn api_update_exam_center(
    id: i64,
    request: Json<ExamCenterRequest>,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<ExamCenter>> {
    user.require_permission(Permission::ManageExamCenters)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    update_exam_center(
        db,
        id,
        &validated.name,
        validated.address.as_deref(),
        validated.contact_person.as_deref(),
        validated.phone.as_deref(),
        validated.email.as_deref(),
    )
    .await
    .validate_custom()?;

    let center = get_exam_center(db, id).await.validate_custom()?;
    Ok(Json(center))
}

#[delete("/exam-centers/<id>")]
pub async fn api_delete_exam_center(
    id: i64,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::ManageExamCenters)
        .validate_custom()?;

    delete_exam_center(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}
