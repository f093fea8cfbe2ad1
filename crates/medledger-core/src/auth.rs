//! Authorization gate.
//!
//! Principals are resolved by an external identity collaborator; this module
//! only decides whether a resolved principal may perform an action. The
//! check has no IO and no side effects, and every write path runs it before
//! a transaction is opened.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of clinical roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Prescriber,
    Nurse,
    Pharmacist,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Prescriber => "prescriber",
            Role::Nurse => "nurse",
            Role::Pharmacist => "pharmacist",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles allowed to administer doses.
pub const ADMINISTER_ROLES: &[Role] = &[Role::Nurse];
/// Roles allowed to move or receive stock and maintain the formulary.
pub const PHARMACY_ROLES: &[Role] = &[Role::Pharmacist];
/// Roles allowed to write and close orders.
pub const PRESCRIBE_ROLES: &[Role] = &[Role::Prescriber];
/// Roles allowed to read orders and the administration record.
pub const CLINICAL_ROLES: &[Role] = &[Role::Prescriber, Role::Nurse, Role::Pharmacist];

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub roles: BTreeSet<Role>,
    /// Ward the principal is scoped to; `None` means hospital-wide.
    pub ward: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().collect(),
            ward: None,
        }
    }

    pub fn in_ward(mut self, ward: impl Into<String>) -> Self {
        self.ward = Some(ward.into());
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// Whether the principal's ward scope covers `ward`.
    pub fn covers_ward(&self, ward: &str) -> bool {
        if self.is_admin() {
            return true;
        }
        match &self.ward {
            None => true,
            Some(scope) => scope == ward,
        }
    }

    /// Ward to filter ward-scoped read models by, if any.
    pub fn ward_filter(&self) -> Option<&str> {
        if self.is_admin() {
            None
        } else {
            self.ward.as_deref()
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: requires one of roles [{}]", join_roles(.0))]
    MissingRole(Vec<Role>),

    #[error("forbidden: ward '{0}' is outside the caller's scope")]
    WardOutOfScope(String),

    #[error("forbidden: {0}")]
    NotOwner(String),
}

fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Authorize a principal against a role requirement and optional ward.
///
/// The principal passes if it holds any of `required` (Admin always passes)
/// and, when `ward` is given, its ward scope covers it.
pub fn authorize<'p>(
    principal: &'p Principal,
    required: &[Role],
    ward: Option<&str>,
) -> Result<&'p Principal, AuthzError> {
    let role_ok = principal.is_admin() || required.iter().any(|r| principal.has_role(*r));
    if !role_ok {
        return Err(AuthzError::MissingRole(required.to_vec()));
    }

    if let Some(ward) = ward {
        if !principal.covers_ward(ward) {
            return Err(AuthzError::WardOutOfScope(ward.to_string()));
        }
    }

    Ok(principal)
}

/// Authorize a principal to act on something owned by `owner_id`.
///
/// Admins act on anything; everyone else only on what they own.
pub fn authorize_owner<'p>(
    principal: &'p Principal,
    owner_id: &str,
    resource: &str,
) -> Result<&'p Principal, AuthzError> {
    if principal.is_admin() || principal.id == owner_id {
        Ok(principal)
    } else {
        Err(AuthzError::NotOwner(format!(
            "{} belongs to another principal",
            resource
        )))
    }
}
