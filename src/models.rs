use anyhow::Error;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed checklist every dossier is seeded with, in process order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Registration,
    Payment,
    MedicalCheck,
    TheoryCourse,
    TheoryExam,
    PracticeCourse,
    PracticeExam,
    LicenseIssued,
}

impl StepName {
    pub const ALL: [StepName; 8] = [
        StepName::Registration,
        StepName::Payment,
        StepName::MedicalCheck,
        StepName::TheoryCourse,
        StepName::TheoryExam,
        StepName::PracticeCourse,
        StepName::PracticeExam,
        StepName::LicenseIssued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Registration => "registration",
            StepName::Payment => "payment",
            StepName::MedicalCheck => "medical_check",
            StepName::TheoryCourse => "theory_course",
            StepName::TheoryExam => "theory_exam",
            StepName::PracticeCourse => "practice_course",
            StepName::PracticeExam => "practice_exam",
            StepName::LicenseIssued => "license_issued",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "registration" => Ok(StepName::Registration),
            "payment" => Ok(StepName::Payment),
            "medical_check" => Ok(StepName::MedicalCheck),
            "theory_course" => Ok(StepName::TheoryCourse),
            "theory_exam" => Ok(StepName::TheoryExam),
            "practice_course" => Ok(StepName::PracticeCourse),
            "practice_exam" => Ok(StepName::PracticeExam),
            "license_issued" => Ok(StepName::LicenseIssued),
            _ => Err(Error::msg(format!("Unknown dossier step: {}", s))),
        }
    }

    /// 1-based position in the canonical checklist, persisted as `step_order`.
    pub fn order(&self) -> i64 {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0) as i64 + 1
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct School {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub director_name: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub birth_country: Option<String>,
    pub address: Option<String>,
    pub school_id: Option<i64>,
    pub school_name: Option<String>,
    pub status: String,
    pub nip: Option<String>,
    pub cnss_number: Option<String>,
    pub cnamgs_number: Option<String>,
    pub picture: Option<String>,
    pub nfc_uid: Option<String>,
    pub qr_code: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExamCenter {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Dossier {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub school_id: Option<i64>,
    pub license_type: String,
    pub status: String,
    pub progress: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Dossier annotated with live step counts for list views. The persisted
/// `progress` column stays the source of truth; the counts are informational.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DossierSummary {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub school_id: Option<i64>,
    pub license_type: String,
    pub status: String,
    pub progress: i64,
    pub completed_steps: i64,
    pub total_steps: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DossierStep {
    pub id: i64,
    pub dossier_id: i64,
    pub step_name: String,
    pub step_order: i64,
    pub completed: bool,
    pub completion_date: Option<NaiveDate>,
    pub result: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A user row without the password hash. The hash never leaves `db.rs`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub school_id: Option<i64>,
    pub school_name: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
