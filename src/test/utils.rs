#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::db::{NewStudent, create_dossier, create_school, create_student, create_user};
    use crate::error::AppError;
    use rocket::http::{ContentType, Header};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use sqlx::{Pool, Sqlite, SqlitePool};
    use std::collections::HashMap;
    use std::sync::Once;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        schools: Vec<String>,
        users: Vec<TestUser>,
        students: Vec<TestStudent>,
        dossiers: Vec<TestDossier>,
    }

    pub struct TestUser {
        pub username: String,
        pub role: Role,
        pub school_name: Option<String>,
    }

    pub struct TestStudent {
        pub first_name: String,
        pub last_name: String,
        pub school_name: Option<String>,
    }

    pub struct TestDossier {
        pub student_full_name: String,
        pub license_type: String,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn school(mut self, name: &str) -> Self {
            self.schools.push(name.to_string());
            self
        }

        pub fn admin(mut self, username: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                role: Role::Admin,
                school_name: None,
            });
            self
        }

        pub fn school_user(mut self, username: &str, school_name: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                role: Role::School,
                school_name: Some(school_name.to_string()),
            });
            self
        }

        pub fn dgtt_agent(mut self, username: &str) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                role: Role::DgttAgent,
                school_name: None,
            });
            self
        }

        pub fn student(mut self, first_name: &str, last_name: &str, school_name: &str) -> Self {
            self.students.push(TestStudent {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                school_name: Some(school_name.to_string()),
            });
            self
        }

        pub fn dossier(mut self, student_full_name: &str, license_type: &str) -> Self {
            self.dossiers.push(TestDossier {
                student_full_name: student_full_name.to_string(),
                license_type: license_type.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            let pool = SqlitePool::connect("sqlite::memory:").await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut school_id_map: HashMap<String, i64> = HashMap::new();
            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut student_id_map: HashMap<String, i64> = HashMap::new();
            let mut dossier_id_map: HashMap<String, i64> = HashMap::new();

            for name in &self.schools {
                let id = create_school(&pool, name, None, None, None, None).await?;
                school_id_map.insert(name.clone(), id);
            }

            for user in &self.users {
                let school_id = user
                    .school_name
                    .as_ref()
                    .and_then(|name| school_id_map.get(name).copied());

                let id =
                    create_user(&pool, &user.username, STANDARD_PASSWORD, user.role, school_id)
                        .await?;
                user_id_map.insert(user.username.clone(), id);
            }

            for student in &self.students {
                let school_id = student
                    .school_name
                    .as_ref()
                    .and_then(|name| school_id_map.get(name).copied());

                let id = create_student(
                    &pool,
                    &NewStudent {
                        first_name: student.first_name.clone(),
                        last_name: student.last_name.clone(),
                        school_id,
                        ..Default::default()
                    },
                )
                .await?;

                student_id_map.insert(
                    format!("{} {}", student.first_name, student.last_name),
                    id,
                );
            }

            for dossier in &self.dossiers {
                let student_id = student_id_map
                    .get(&dossier.student_full_name)
                    .copied()
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "Fixture student '{}' missing",
                            dossier.student_full_name
                        ))
                    })?;

                let student = crate::db::get_student(&pool, student_id).await?;
                let created = create_dossier(&pool, &student, &dossier.license_type).await?;

                dossier_id_map.insert(dossier.student_full_name.clone(), created.id);
            }

            Ok(TestDb {
                pool,
                school_id_map,
                user_id_map,
                student_id_map,
                dossier_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub school_id_map: HashMap<String, i64>,
        pub user_id_map: HashMap<String, i64>,
        pub student_id_map: HashMap<String, i64>,
        pub dossier_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn school_id(&self, name: &str) -> Option<i64> {
            self.school_id_map.get(name).copied()
        }

        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn student_id(&self, full_name: &str) -> Option<i64> {
            self.student_id_map.get(full_name).copied()
        }

        pub fn dossier_id(&self, student_full_name: &str) -> Option<i64> {
            self.dossier_id_map.get(student_full_name).copied()
        }
    }

    /// Two schools with one user and one student each, plus an admin, a
    /// DGTT agent, and a dossier for the Alpha student.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .school("Alpha Driving")
            .school("Beta Driving")
            .admin("admin_user")
            .school_user("alpha_user", "Alpha Driving")
            .school_user("beta_user", "Beta Driving")
            .dgtt_agent("agent_user")
            .student("Jean", "Moussavou", "Alpha Driving")
            .student("Marie", "Ondo", "Beta Driving")
            .dossier("Jean Moussavou", "B")
            .build()
            .await
            .expect("Failed to build fixture database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = crate::init_rocket(test_db.pool.clone()).await;
        let client = Client::tracked(rocket)
            .await
            .expect("Failed to build test client");

        (client, test_db)
    }

    /// Logs in through the API and returns the bearer token.
    pub async fn login_test_user(client: &Client, username: &str) -> String {
        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        let body = response.into_string().await.expect("Empty login response");
        let parsed: serde_json::Value = serde_json::from_str(&body).expect("Invalid login JSON");

        parsed["token"]
            .as_str()
            .expect("Login response missing token")
            .to_string()
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }
}
