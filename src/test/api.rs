#[cfg(test)]
mod tests {
    use crate::test::utils::test_db::{
        TestDbBuilder, bearer, create_standard_test_db, login_test_user, setup_test_client,
    };
    use rocket::http::{ContentType, Status};
    use serde_json::{Value, json};

    #[rocket::async_test]
    async fn test_health_endpoint() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn test_login_api() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "alpha_user",
                    "password": "password123"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();

        assert!(!parsed["token"].as_str().unwrap().is_empty());
        assert_eq!(parsed["user"]["username"], "alpha_user");
        assert_eq!(parsed["user"]["role"], "school");
        assert!(parsed["user"].get("password").is_none());

        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "alpha_user",
                    "password": "wrong_password"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_auth_required_apis() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let endpoints = vec!["/api/dossiers", "/api/students", "/api/schools", "/api/users"];

        for endpoint in endpoints {
            let response = client.get(endpoint).dispatch().await;
            assert_eq!(
                response.status(),
                Status::Unauthorized,
                "Endpoint {} did not require authentication",
                endpoint
            );
        }
    }

    #[rocket::async_test]
    async fn test_garbage_token_rejected() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client
            .get("/api/dossiers")
            .header(bearer("not-a-real-token"))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_deleted_user_token_rejected() {
        let test_db = create_standard_test_db().await;
        let alpha_id = test_db.user_id("alpha_user").unwrap();
        let pool = test_db.pool.clone();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "alpha_user").await;

        crate::db::delete_user(&pool, alpha_id).await.unwrap();

        let response = client
            .get("/api/students")
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_dossier_lifecycle() {
        let test_db = TestDbBuilder::new()
            .school("Alpha Driving")
            .school_user("alpha_user", "Alpha Driving")
            .student("Jean", "Moussavou", "Alpha Driving")
            .build()
            .await
            .unwrap();
        let student_id = test_db.student_id("Jean Moussavou").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "alpha_user").await;

        let response = client
            .post("/api/dossiers")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "student_id": student_id }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Created);

        let body = response.into_string().await.unwrap();
        let dossier: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(dossier["student_name"], "Jean Moussavou");
        assert_eq!(dossier["license_type"], "B");
        assert_eq!(dossier["progress"], 0);

        let dossier_id = dossier["id"].as_i64().unwrap();

        let response = client
            .get("/api/dossiers")
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let dossiers: Vec<Value> = serde_json::from_str(&body).unwrap();

        assert_eq!(dossiers.len(), 1);
        assert_eq!(dossiers[0]["total_steps"], 8);
        assert_eq!(dossiers[0]["completed_steps"], 0);

        let response = client
            .patch(format!("/api/dossiers/{}/step", dossier_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(
                json!({
                    "step": "registration",
                    "completed": true,
                    "completion_date": "2024-03-01"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let progress: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(progress["progress"], 13);

        let response = client
            .patch(format!("/api/dossiers/{}/step", dossier_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "step": "payment", "completed": true }).to_string())
            .dispatch()
            .await;

        let body = response.into_string().await.unwrap();
        let progress: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(progress["progress"], 25);

        // Unchecking goes back down.
        let response = client
            .patch(format!("/api/dossiers/{}/step", dossier_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "step": "payment", "completed": false }).to_string())
            .dispatch()
            .await;

        let body = response.into_string().await.unwrap();
        let progress: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(progress["progress"], 13);

        let response = client
            .get(format!("/api/dossiers/{}", dossier_id))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let detail: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(detail["progress"], 13);
        let steps = detail["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 8);
        assert_eq!(steps[0]["step_name"], "registration");
        assert_eq!(steps[0]["completed"], true);
        assert_eq!(steps[7]["step_name"], "license_issued");
    }

    #[rocket::async_test]
    async fn test_step_update_error_cases() {
        let test_db = create_standard_test_db().await;
        let dossier_id = test_db.dossier_id("Jean Moussavou").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "alpha_user").await;

        let response = client
            .patch("/api/dossiers/9999/step")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "step": "registration", "completed": true }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::NotFound);

        let response = client
            .patch(format!("/api/dossiers/{}/step", dossier_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "step": "graduation_party", "completed": true }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_cross_school_access_forbidden() {
        let test_db = create_standard_test_db().await;
        let alpha_school = test_db.school_id("Alpha Driving").unwrap();
        let alpha_student = test_db.student_id("Jean Moussavou").unwrap();
        let alpha_dossier = test_db.dossier_id("Jean Moussavou").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "beta_user").await;

        let response = client
            .get(format!("/api/students/school/{}", alpha_school))
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .get(format!("/api/students/{}", alpha_student))
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .patch(format!("/api/dossiers/{}/step", alpha_dossier))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "step": "registration", "completed": true }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        // Scoped listing only shows the caller's own school.
        let response = client
            .get("/api/dossiers")
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        let dossiers: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert!(dossiers.is_empty());
    }

    #[rocket::async_test]
    async fn test_dgtt_agent_read_only() {
        let test_db = create_standard_test_db().await;
        let alpha_student = test_db.student_id("Jean Moussavou").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "agent_user").await;

        let response = client
            .get("/api/dossiers")
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        let dossiers: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(dossiers.len(), 1);

        let response = client
            .post("/api/dossiers")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "student_id": alpha_student }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .get("/api/students")
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_admin_only_resources() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "alpha_user").await;

        for endpoint in ["/api/schools", "/api/users", "/api/exam-centers"] {
            let response = client
                .get(endpoint)
                .header(bearer(&token))
                .dispatch()
                .await;
            assert_eq!(
                response.status(),
                Status::Forbidden,
                "School user reached admin endpoint {}",
                endpoint
            );
        }
    }

    #[rocket::async_test]
    async fn test_user_creation_rules() {
        let test_db = create_standard_test_db().await;
        let alpha_school = test_db.school_id("Alpha Driving").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "admin_user").await;

        // School role without a school id is invalid.
        let response = client
            .post("/api/users")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(
                json!({
                    "username": "new_school_user",
                    "password": "secret123",
                    "role": "school"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .post("/api/users")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(
                json!({
                    "username": "new_school_user",
                    "password": "secret123",
                    "role": "school",
                    "school_id": alpha_school
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Created);

        let body = response.into_string().await.unwrap();
        let account: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(account["role"], "school");
        assert_eq!(account["school_name"], "Alpha Driving");
        assert!(account.get("password").is_none());

        // Duplicate username conflicts.
        let response = client
            .post("/api/users")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(
                json!({
                    "username": "new_school_user",
                    "password": "secret123",
                    "role": "dgtt_agent"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Conflict);

        // Unknown roles never reach the database.
        let response = client
            .post("/api/users")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(
                json!({
                    "username": "other_user",
                    "password": "secret123",
                    "role": "superuser"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_student_patch() {
        let test_db = create_standard_test_db().await;
        let student_id = test_db.student_id("Jean Moussavou").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "alpha_user").await;

        let response = client
            .put(format!("/api/students/{}", student_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({}).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .put(format!("/api/students/{}", student_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "first_name": "" }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .put(format!("/api/students/{}", student_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "phone": "+24101234567", "status": "suspended" }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let student: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(student["phone"], "+24101234567");
        assert_eq!(student["status"], "suspended");
        assert_eq!(student["first_name"], "Jean");
    }

    #[rocket::async_test]
    async fn test_school_delete_conflict() {
        let test_db = create_standard_test_db().await;
        let alpha_school = test_db.school_id("Alpha Driving").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "admin_user").await;

        // Alpha still has a user and a student referencing it.
        let response = client
            .delete(format!("/api/schools/{}", alpha_school))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .delete("/api/schools/9999")
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_school_stats_and_activity() {
        let test_db = create_standard_test_db().await;
        let alpha_school = test_db.school_id("Alpha Driving").unwrap();
        let alpha_dossier = test_db.dossier_id("Jean Moussavou").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "alpha_user").await;

        client
            .patch(format!("/api/dossiers/{}/step", alpha_dossier))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "step": "registration", "completed": true }).to_string())
            .dispatch()
            .await;

        let response = client
            .get(format!("/api/schools/{}/stats", alpha_school))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let stats: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(stats["total_students"], 1);
        assert_eq!(stats["total_dossiers"], 1);
        assert_eq!(stats["completed_dossiers"], 0);

        let response = client
            .get(format!("/api/schools/{}/recent-activity", alpha_school))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let activity: Vec<Value> = serde_json::from_str(&body).unwrap();

        assert!(!activity.is_empty());
        assert_eq!(activity[0]["student_name"], "Jean Moussavou");

        // Another school's aggregations stay hidden.
        let beta_token = login_test_user(&client, "beta_user").await;
        let response = client
            .get(format!("/api/schools/{}/stats", alpha_school))
            .header(bearer(&beta_token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_student_route_disambiguation() {
        // The by-school listing and the dossier-progress view share the
        // /students/<a>/<b> shape; each must reach its own handler.
        let test_db = create_standard_test_db().await;
        let alpha_school = test_db.school_id("Alpha Driving").unwrap();
        let alpha_student = test_db.student_id("Jean Moussavou").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "admin_user").await;

        let response = client
            .get(format!("/api/students/school/{}", alpha_school))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let students: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0]["first_name"], "Jean");

        let response = client
            .get(format!("/api/students/{}/dossier-progress", alpha_student))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let progress: Value = serde_json::from_str(&body).unwrap();
        assert!(progress["steps"].is_array());
    }

    #[rocket::async_test]
    async fn test_student_dossier_progress() {
        let test_db = create_standard_test_db().await;
        let alpha_student = test_db.student_id("Jean Moussavou").unwrap();
        let beta_student = test_db.student_id("Marie Ondo").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "admin_user").await;

        let response = client
            .get(format!("/api/students/{}/dossier-progress", alpha_student))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let progress: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(progress["student_name"], "Jean Moussavou");
        assert_eq!(progress["license_type"], "B");

        let steps = progress["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 8);
        assert_eq!(steps[0]["step_name"], "registration");

        // Marie has no dossier yet.
        let response = client
            .get(format!("/api/students/{}/dossier-progress", beta_student))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_exam_center_crud() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let token = login_test_user(&client, "admin_user").await;

        let response = client
            .post("/api/exam-centers")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(
                json!({
                    "name": "Centre Libreville Nord",
                    "contact_person": "P. Nzeng"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Created);

        let body = response.into_string().await.unwrap();
        let center: Value = serde_json::from_str(&body).unwrap();
        let center_id = center["id"].as_i64().unwrap();

        let response = client
            .put(format!("/api/exam-centers/{}", center_id))
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(json!({ "name": "Centre Libreville Sud" }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let center: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(center["name"], "Centre Libreville Sud");

        let response = client
            .delete(format!("/api/exam-centers/{}", center_id))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::NoContent);

        let response = client
            .get(format!("/api/exam-centers/{}", center_id))
            .header(bearer(&token))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::NotFound);
    }
}
