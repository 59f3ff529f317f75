use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ManageSchools,
    ManageUsers,
    ManageExamCenters,

    ViewStudents,
    ManageStudents,

    ViewDossiers,
    ManageDossiers,

    ViewSchoolStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    School,
    DgttAgent,
}

// DGTT agents audit dossiers and nothing else; every other surface sits
// behind an admin or admin-or-school gate.
static DGTT_AGENT_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewDossiers);

    permissions
});

static SCHOOL_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewStudents);
    permissions.insert(Permission::ManageStudents);
    permissions.insert(Permission::ViewDossiers);
    permissions.insert(Permission::ManageDossiers);
    permissions.insert(Permission::ViewSchoolStats);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(SCHOOL_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageSchools);
    permissions.insert(Permission::ManageUsers);
    permissions.insert(Permission::ManageExamCenters);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Admin => &ADMIN_PERMISSIONS,
            Role::School => &SCHOOL_PERMISSIONS,
            Role::DgttAgent => &DGTT_AGENT_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::School => "school",
            Role::DgttAgent => "dgtt_agent",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "admin" => Ok(Role::Admin),
            "school" => Ok(Role::School),
            "dgtt_agent" => Ok(Role::DgttAgent),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
