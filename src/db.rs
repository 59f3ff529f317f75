use crate::{
    auth::{AuthUser, Role},
    error::AppError,
};
use chrono::NaiveDate;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use crate::models::{
    Dossier, DossierStep, DossierSummary, ExamCenter, School, StepName, Student, UserAccount,
};

// ---------------------------------------------------------------------------
// Users and authentication

#[derive(sqlx::FromRow)]
struct AuthUserRow {
    id: i64,
    username: String,
    role: String,
    school_id: Option<i64>,
    school_name: Option<String>,
}

impl TryFrom<AuthUserRow> for AuthUser {
    type Error = AppError;

    fn try_from(row: AuthUserRow) -> Result<Self, AppError> {
        let role = Role::from_str(&row.role)
            .map_err(|e| AppError::Internal(format!("Corrupt role on user {}: {}", row.id, e)))?;

        Ok(AuthUser {
            id: row.id,
            username: row.username,
            role,
            school_id: row.school_id,
            school_name: row.school_name,
        })
    }
}

#[instrument(skip(pool))]
pub async fn get_auth_user(pool: &Pool<Sqlite>, id: i64) -> Result<AuthUser, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, AuthUserRow>(
        "SELECT u.id, u.username, u.role, u.school_id, s.name AS school_name
         FROM users u
         LEFT JOIN schools s ON u.school_id = s.id
         WHERE u.id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => AuthUser::try_from(row),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<AuthUser>, AppError> {
    info!("Authenticating user");

    #[derive(sqlx::FromRow)]
    struct CredentialRow {
        id: i64,
        password: String,
    }

    let row = sqlx::query_as::<_, CredentialRow>(
        "SELECT id, password FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => match bcrypt::verify(password, &row.password) {
            Ok(true) => Ok(Some(get_auth_user(pool, row.id).await?)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[instrument(skip_all, fields(username, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: Role,
    school_id: Option<i64>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    // Only school accounts carry a school reference.
    let school_id = match role {
        Role::School => school_id,
        _ => None,
    };

    let res = sqlx::query("INSERT INTO users (username, password, role, school_id) VALUES (?, ?, ?, ?)")
        .bind(username)
        .bind(hashed_password)
        .bind(role.as_str())
        .bind(school_id)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_user_account(pool: &Pool<Sqlite>, id: i64) -> Result<UserAccount, AppError> {
    let row = sqlx::query_as::<_, UserAccount>(
        "SELECT u.id, u.username, u.role, u.school_id, s.name AS school_name,
                u.created_at, u.updated_at
         FROM users u
         LEFT JOIN schools s ON u.school_id = s.id
         WHERE u.id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn get_all_users(pool: &Pool<Sqlite>) -> Result<Vec<UserAccount>, AppError> {
    info!("Getting all users");
    let users = sqlx::query_as::<_, UserAccount>(
        "SELECT u.id, u.username, u.role, u.school_id, s.name AS school_name,
                u.created_at, u.updated_at
         FROM users u
         LEFT JOIN schools s ON u.school_id = s.id
         ORDER BY u.created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(users)
}

#[instrument(skip_all, fields(user_id, username, role))]
pub async fn update_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
    username: &str,
    role: Role,
    school_id: Option<i64>,
    password: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating user");

    let taken: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM users WHERE username = ? AND id != ?")
            .bind(username)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

    if taken.is_some() {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }

    let school_id = match role {
        Role::School => school_id,
        _ => None,
    };

    let res = match password {
        // Rehash only when a new password is supplied.
        Some(password) => {
            let hashed = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
            sqlx::query(
                "UPDATE users SET username = ?, role = ?, school_id = ?, password = ?,
                 updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            )
            .bind(username)
            .bind(role.as_str())
            .bind(school_id)
            .bind(hashed)
            .bind(user_id)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                "UPDATE users SET username = ?, role = ?, school_id = ?,
                 updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            )
            .bind(username)
            .bind(role.as_str())
            .bind(school_id)
            .bind(user_id)
            .execute(pool)
            .await?
        }
    };

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User with id {} not found", user_id)));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_user(pool: &Pool<Sqlite>, user_id: i64) -> Result<(), AppError> {
    info!("Deleting user");
    let res = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User with id {} not found", user_id)));
    }

    Ok(())
}

/// Seeds the default administrator account on first startup.
#[instrument(skip(pool))]
pub async fn ensure_default_admin(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = 'admin'")
        .fetch_optional(pool)
        .await?;

    if existing.is_none() {
        create_user(pool, "admin", "admin123", Role::Admin, None).await?;
        info!("Default admin user created");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Schools

#[instrument(skip(pool))]
pub async fn get_all_schools(pool: &Pool<Sqlite>) -> Result<Vec<School>, AppError> {
    info!("Getting all schools");
    let schools = sqlx::query_as::<_, School>("SELECT * FROM schools ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(schools)
}

#[instrument(skip(pool))]
pub async fn get_school(pool: &Pool<Sqlite>, id: i64) -> Result<School, AppError> {
    info!("Getting school by ID");
    let school = sqlx::query_as::<_, School>("SELECT * FROM schools WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    school.ok_or_else(|| AppError::NotFound(format!("School with id {} not found", id)))
}

#[instrument(skip_all, fields(name))]
pub async fn create_school(
    pool: &Pool<Sqlite>,
    name: &str,
    address: Option<&str>,
    phone: Option<&str>,
    email: Option<&str>,
    director_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating school");
    let res = sqlx::query(
        "INSERT INTO schools (name, address, phone, email, director_name) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(address)
    .bind(phone)
    .bind(email)
    .bind(director_name)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(school_id))]
pub async fn update_school(
    pool: &Pool<Sqlite>,
    school_id: i64,
    name: &str,
    address: Option<&str>,
    phone: Option<&str>,
    email: Option<&str>,
    director_name: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating school");
    let res = sqlx::query(
        "UPDATE schools SET name = ?, address = ?, phone = ?, email = ?, director_name = ?,
         updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(name)
    .bind(address)
    .bind(phone)
    .bind(email)
    .bind(director_name)
    .bind(school_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("School with id {} not found", school_id)));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_school(pool: &Pool<Sqlite>, school_id: i64) -> Result<(), AppError> {
    info!("Deleting school");
    let res = sqlx::query("DELETE FROM schools WHERE id = ?")
        .bind(school_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("School with id {} not found", school_id)));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, serde::Serialize, sqlx::FromRow)]
pub struct SchoolStats {
    pub total_students: i64,
    pub total_dossiers: i64,
    pub completed_dossiers: i64,
    pub in_progress_dossiers: i64,
}

#[instrument(skip(pool))]
pub async fn get_school_stats(pool: &Pool<Sqlite>, school_id: i64) -> Result<SchoolStats, AppError> {
    info!("Computing school statistics");
    let stats = sqlx::query_as::<_, SchoolStats>(
        "SELECT
            (SELECT COUNT(*) FROM students WHERE school_id = ?1) AS total_students,
            (SELECT COUNT(*) FROM dossiers WHERE school_id = ?1) AS total_dossiers,
            (SELECT COUNT(*) FROM dossiers WHERE school_id = ?1 AND status = 'completed')
                AS completed_dossiers,
            (SELECT COUNT(*) FROM dossiers WHERE school_id = ?1 AND status = 'in_progress')
                AS in_progress_dossiers",
    )
    .bind(school_id)
    .fetch_one(pool)
    .await?;

    Ok(stats)
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct ActivityEntry {
    pub student_name: String,
    pub step_name: String,
    pub completed: bool,
    pub date: chrono::NaiveDateTime,
}

/// Ten most recently touched dossier steps for one school's dossiers.
#[instrument(skip(pool))]
pub async fn get_recent_activity(
    pool: &Pool<Sqlite>,
    school_id: i64,
) -> Result<Vec<ActivityEntry>, AppError> {
    info!("Getting recent dossier activity");
    let entries = sqlx::query_as::<_, ActivityEntry>(
        "SELECT d.student_name, ds.step_name, ds.completed, ds.updated_at AS date
         FROM dossier_steps ds
         JOIN dossiers d ON ds.dossier_id = d.id
         WHERE d.school_id = ?
         ORDER BY ds.updated_at DESC
         LIMIT 10",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

// ---------------------------------------------------------------------------
// Students

const STUDENT_SELECT: &str = "SELECT s.*, sc.name AS school_name
     FROM students s
     LEFT JOIN schools sc ON s.school_id = sc.id";

#[instrument(skip(pool))]
pub async fn get_students(
    pool: &Pool<Sqlite>,
    school_scope: Option<i64>,
) -> Result<Vec<Student>, AppError> {
    info!("Getting students");

    let students = match school_scope {
        Some(school_id) => {
            let query = format!(
                "{} WHERE s.school_id = ? ORDER BY s.last_name, s.first_name",
                STUDENT_SELECT
            );
            sqlx::query_as::<_, Student>(&query)
                .bind(school_id)
                .fetch_all(pool)
                .await?
        }
        None => {
            let query = format!("{} ORDER BY s.last_name, s.first_name", STUDENT_SELECT);
            sqlx::query_as::<_, Student>(&query).fetch_all(pool).await?
        }
    };

    Ok(students)
}

#[instrument(skip(pool))]
pub async fn get_student(pool: &Pool<Sqlite>, id: i64) -> Result<Student, AppError> {
    info!("Getting student by ID");
    let query = format!("{} WHERE s.id = ?", STUDENT_SELECT);
    let student = sqlx::query_as::<_, Student>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    student.ok_or_else(|| AppError::NotFound(format!("Student with id {} not found", id)))
}

/// Insertable student fields; everything optional beyond the two names.
#[derive(Debug, Default, Clone)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub birth_country: Option<String>,
    pub address: Option<String>,
    pub school_id: Option<i64>,
    pub status: Option<String>,
    pub nip: Option<String>,
    pub cnss_number: Option<String>,
    pub cnamgs_number: Option<String>,
    pub picture: Option<String>,
    pub nfc_uid: Option<String>,
    pub qr_code: Option<String>,
}

#[instrument(skip_all, fields(first_name = %student.first_name, last_name = %student.last_name))]
pub async fn create_student(pool: &Pool<Sqlite>, student: &NewStudent) -> Result<i64, AppError> {
    info!("Creating student");
    let res = sqlx::query(
        "INSERT INTO students
         (first_name, last_name, email, phone, date_of_birth, birth_country, address,
          school_id, status, nip, cnss_number, cnamgs_number, picture, nfc_uid, qr_code)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&student.first_name)
    .bind(&student.last_name)
    .bind(&student.email)
    .bind(&student.phone)
    .bind(student.date_of_birth)
    .bind(&student.birth_country)
    .bind(&student.address)
    .bind(student.school_id)
    .bind(student.status.as_deref().unwrap_or("active"))
    .bind(&student.nip)
    .bind(&student.cnss_number)
    .bind(&student.cnamgs_number)
    .bind(&student.picture)
    .bind(&student.nfc_uid)
    .bind(&student.qr_code)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

/// Sparse student update: absent fields are left untouched. The struct is
/// the allow-list; nothing outside it can be patched.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct StudentPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub birth_country: Option<String>,
    pub address: Option<String>,
    pub status: Option<String>,
    pub nip: Option<String>,
    pub cnss_number: Option<String>,
    pub cnamgs_number: Option<String>,
    pub picture: Option<String>,
    pub nfc_uid: Option<String>,
    pub qr_code: Option<String>,
}

impl StudentPatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.date_of_birth.is_none()
            && self.birth_country.is_none()
            && self.address.is_none()
            && self.status.is_none()
            && self.nip.is_none()
            && self.cnss_number.is_none()
            && self.cnamgs_number.is_none()
            && self.picture.is_none()
            && self.nfc_uid.is_none()
            && self.qr_code.is_none()
    }
}

#[instrument(skip_all, fields(student_id))]
pub async fn update_student(
    pool: &Pool<Sqlite>,
    student_id: i64,
    patch: &StudentPatch,
) -> Result<(), AppError> {
    info!("Updating student");

    if patch.is_empty() {
        return Err(AppError::Validation(
            "No valid fields provided for update".to_string(),
        ));
    }

    if matches!(&patch.first_name, Some(name) if name.trim().is_empty()) {
        return Err(AppError::Validation("first name is required".to_string()));
    }
    if matches!(&patch.last_name, Some(name) if name.trim().is_empty()) {
        return Err(AppError::Validation("last name is required".to_string()));
    }

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE students SET ");
    let mut fields = builder.separated(", ");

    if let Some(v) = &patch.first_name {
        fields.push("first_name = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.last_name {
        fields.push("last_name = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.email {
        fields.push("email = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.phone {
        fields.push("phone = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.date_of_birth {
        fields.push("date_of_birth = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.birth_country {
        fields.push("birth_country = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.address {
        fields.push("address = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.status {
        fields.push("status = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.nip {
        fields.push("nip = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.cnss_number {
        fields.push("cnss_number = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.cnamgs_number {
        fields.push("cnamgs_number = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.picture {
        fields.push("picture = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.nfc_uid {
        fields.push("nfc_uid = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.qr_code {
        fields.push("qr_code = ").push_bind_unseparated(v);
    }
    fields.push("updated_at = CURRENT_TIMESTAMP");

    builder.push(" WHERE id = ").push_bind(student_id);

    let res = builder.build().execute(pool).await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Student with id {} not found",
            student_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_student(pool: &Pool<Sqlite>, student_id: i64) -> Result<(), AppError> {
    info!("Deleting student");
    let res = sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(student_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Student with id {} not found",
            student_id
        )));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Exam centers

#[instrument(skip(pool))]
pub async fn get_all_exam_centers(pool: &Pool<Sqlite>) -> Result<Vec<ExamCenter>, AppError> {
    info!("Getting all exam centers");
    let centers = sqlx::query_as::<_, ExamCenter>("SELECT * FROM exam_centers ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(centers)
}

#[instrument(skip(pool))]
pub async fn get_exam_center(pool: &Pool<Sqlite>, id: i64) -> Result<ExamCenter, AppError> {
    info!("Getting exam center by ID");
    let center = sqlx::query_as::<_, ExamCenter>("SELECT * FROM exam_centers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    center.ok_or_else(|| AppError::NotFound(format!("Exam center with id {} not found", id)))
}

#[instrument(skip_all, fields(name))]
pub async fn create_exam_center(
    pool: &Pool<Sqlite>,
    name: &str,
    address: Option<&str>,
    contact_person: Option<&str>,
    phone: Option<&str>,
    email: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating exam center");
    let res = sqlx::query(
        "INSERT INTO exam_centers (name, address, contact_person, phone, email)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(address)
    .bind(contact_person)
    .bind(phone)
    .bind(email)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(center_id))]
pub async fn update_exam_center(
    pool: &Pool<Sqlite>,
    center_id: i64,
    name: &str,
    address: Option<&str>,
    contact_person: Option<&str>,
    phone: Option<&str>,
    email: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating exam center");
    let res = sqlx::query(
        "UPDATE exam_centers SET name = ?, address = ?, contact_person = ?, phone = ?, email = ?,
         updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(name)
    .bind(address)
    .bind(contact_person)
    .bind(phone)
    .bind(email)
    .bind(center_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Exam center with id {} not found",
            center_id
        )));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_exam_center(pool: &Pool<Sqlite>, center_id: i64) -> Result<(), AppError> {
    info!("Deleting exam center");
    let res = sqlx::query("DELETE FROM exam_centers WHERE id = ?")
        .bind(center_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Exam center with id {} not found",
            center_id
        )));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Dossiers

const DOSSIER_SUMMARY_SELECT: &str = "SELECT d.*,
     (SELECT COUNT(*) FROM dossier_steps WHERE dossier_id = d.id AND completed = 1)
         AS completed_steps,
     (SELECT COUNT(*) FROM dossier_steps WHERE dossier_id = d.id) AS total_steps
     FROM dossiers d";

pub fn compute_progress(completed_steps: i64, total_steps: i64) -> i64 {
    if total_steps == 0 {
        return 0;
    }
    ((completed_steps as f64 / total_steps as f64) * 100.0).round() as i64
}

#[instrument(skip(pool))]
pub async fn get_dossiers(
    pool: &Pool<Sqlite>,
    school_scope: Option<i64>,
) -> Result<Vec<DossierSummary>, AppError> {
    info!("Getting dossiers");

    let dossiers = match school_scope {
        Some(school_id) => {
            let query = format!(
                "{} WHERE d.school_id = ? ORDER BY d.created_at DESC, d.id DESC",
                DOSSIER_SUMMARY_SELECT
            );
            sqlx::query_as::<_, DossierSummary>(&query)
                .bind(school_id)
                .fetch_all(pool)
                .await?
        }
        None => {
            let query = format!(
                "{} ORDER BY d.created_at DESC, d.id DESC",
                DOSSIER_SUMMARY_SELECT
            );
            sqlx::query_as::<_, DossierSummary>(&query)
                .fetch_all(pool)
                .await?
        }
    };

    Ok(dossiers)
}

#[instrument(skip(pool))]
pub async fn get_dossier_summary(pool: &Pool<Sqlite>, id: i64) -> Result<DossierSummary, AppError> {
    info!("Getting dossier by ID");
    let query = format!("{} WHERE d.id = ?", DOSSIER_SUMMARY_SELECT);
    let dossier = sqlx::query_as::<_, DossierSummary>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    dossier.ok_or_else(|| AppError::NotFound(format!("Dossier with id {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn get_dossier(pool: &Pool<Sqlite>, id: i64) -> Result<Dossier, AppError> {
    let dossier = sqlx::query_as::<_, Dossier>("SELECT * FROM dossiers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    dossier.ok_or_else(|| AppError::NotFound(format!("Dossier with id {} not found", id)))
}

/// Creates the dossier row and seeds the eight-step checklist in one
/// transaction, so a dossier can never be observed with a partial checklist.
#[instrument(skip(pool, student), fields(student_id = %student.id))]
pub async fn create_dossier(
    pool: &Pool<Sqlite>,
    student: &Student,
    license_type: &str,
) -> Result<Dossier, AppError> {
    info!("Creating dossier");

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO dossiers (student_id, student_name, school_id, license_type)
         VALUES (?, ?, ?, ?)",
    )
    .bind(student.id)
    .bind(student.full_name())
    .bind(student.school_id)
    .bind(license_type)
    .execute(&mut *tx)
    .await?;

    let dossier_id = res.last_insert_rowid();

    for step in StepName::ALL {
        sqlx::query(
            "INSERT INTO dossier_steps (dossier_id, step_name, step_order) VALUES (?, ?, ?)",
        )
        .bind(dossier_id)
        .bind(step.as_str())
        .bind(step.order())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    get_dossier(pool, dossier_id).await
}

/// Updates one step and recomputes the persisted dossier progress in the
/// same transaction. Returns the new progress percentage.
#[instrument(skip(pool), fields(dossier_id, step = %step))]
pub async fn update_dossier_step(
    pool: &Pool<Sqlite>,
    dossier_id: i64,
    step: StepName,
    completed: bool,
    completion_date: Option<NaiveDate>,
    result: Option<&str>,
) -> Result<i64, AppError> {
    info!("Updating dossier step");

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "UPDATE dossier_steps
         SET completed = ?, completion_date = ?, result = ?, updated_at = CURRENT_TIMESTAMP
         WHERE dossier_id = ? AND step_name = ?",
    )
    .bind(completed)
    .bind(completion_date)
    .bind(result)
    .bind(dossier_id)
    .bind(step.as_str())
    .execute(&mut *tx)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Step '{}' not found on dossier {}",
            step, dossier_id
        )));
    }

    let (completed_steps, total_steps): (i64, i64) = sqlx::query_as(
        "SELECT
            COALESCE(SUM(CASE WHEN completed = 1 THEN 1 ELSE 0 END), 0),
            COUNT(*)
         FROM dossier_steps
         WHERE dossier_id = ?",
    )
    .bind(dossier_id)
    .fetch_one(&mut *tx)
    .await?;

    let progress = compute_progress(completed_steps, total_steps);

    sqlx::query("UPDATE dossiers SET progress = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(progress)
        .bind(dossier_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(progress)
}

#[instrument(skip(pool))]
pub async fn get_dossier_steps(
    pool: &Pool<Sqlite>,
    dossier_id: i64,
) -> Result<Vec<DossierStep>, AppError> {
    info!("Getting dossier steps");
    let steps = sqlx::query_as::<_, DossierStep>(
        "SELECT * FROM dossier_steps WHERE dossier_id = ? ORDER BY step_order",
    )
    .bind(dossier_id)
    .fetch_all(pool)
    .await?;

    Ok(steps)
}

#[instrument(skip(pool))]
pub async fn get_latest_dossier_for_student(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Option<Dossier>, AppError> {
    let dossier = sqlx::query_as::<_, Dossier>(
        "SELECT * FROM dossiers WHERE student_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    Ok(dossier)
}
