//! The closed Departments registry.
//!
//! Every field that offers a department or affiliation choice derives its
//! option list from [`DEPARTMENTS`]; nothing else in the workspace spells out
//! department keys.

use serde::{Deserialize, Serialize};

use crate::schema::SelectOption;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub key: &'static str,
    pub full_name: &'static str,
    pub abbreviation: &'static str,
}

pub static DEPARTMENTS: [Department; 21] = [
    dept("ACES", "Agricultural Consumer and Environmental Sciences", "ACES"),
    dept("AHS", "Applied Health Sciences", "AHS"),
    dept("ARMED_FORCES", "Armed Forces", "Armed Forces"),
    dept("CARLE", "Carle Illinois College of Medicine", "Medicine"),
    dept("MEDIA", "College of Media", "Media"),
    dept("DGS", "Division of General Studies", "DGS"),
    dept("EDUCATION", "College of Education", "Education"),
    dept("FAA", "College of Fine and Applied Arts", "FAA"),
    dept("GIES", "Gies College of Business", "Gies"),
    dept("GRADUATE", "Graduate College", "Graduate College"),
    dept("GRAINGER", "Grainger College of Engineering", "Grainger"),
    dept("LAW", "College of Law", "Law"),
    dept("LAS", "College of Liberal Arts and Sciences", "LAS"),
    dept("ISCHOOL", "School of Information Sciences", "iSchool"),
    dept(
        "LABOR",
        "School of Labor and Employee Relations",
        "School of Labor and Employee Relations",
    ),
    dept("SOCIAL_WORK", "School of Social Work", "School of Social Work"),
    dept("SIEBELDESIGN", "Siebel Center for Design", "Siebel Design"),
    dept("SIEBELCS", "Siebel Center for Computer Science", "Siebel CS"),
    dept("VET_MED", "College of Veterinary Medicine", "Vet Med"),
    dept("NURSING", "College of Nursing", "Nursing"),
    dept("EXTERNAL", "External", "External"),
];

const fn dept(
    key: &'static str,
    full_name: &'static str,
    abbreviation: &'static str,
) -> Department {
    Department {
        key,
        full_name,
        abbreviation,
    }
}

pub fn all() -> &'static [Department] {
    &DEPARTMENTS
}

pub fn lookup(key: &str) -> Option<&'static Department> {
    DEPARTMENTS.iter().find(|d| d.key == key)
}

/// Select options in registry order, labelled with the full name.
pub fn options() -> Vec<SelectOption> {
    DEPARTMENTS
        .iter()
        .map(|d| SelectOption::new(d.full_name, d.key))
        .collect()
}

/// A registry key as stored on documents (`"GRAINGER"`, `"LAS"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentKey(String);

impl DepartmentKey {
    /// Returns `None` when the key is not in the registry.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        lookup(&key).map(|_| Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn department(&self) -> Option<&'static Department> {
        lookup(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_keys_are_unique() {
        let keys: HashSet<_> = DEPARTMENTS.iter().map(|d| d.key).collect();
        assert_eq!(keys.len(), DEPARTMENTS.len());
    }

    #[test]
    fn options_follow_registry_order_and_labels() {
        let opts = options();
        assert_eq!(opts.len(), DEPARTMENTS.len());
        assert_eq!(opts[0].value, "ACES");
        assert_eq!(opts[0].label, "Agricultural Consumer and Environmental Sciences");
        assert_eq!(opts.last().unwrap().value, "EXTERNAL");
    }

    #[test]
    fn department_key_rejects_unknown_values() {
        assert!(DepartmentKey::new("GRAINGER").is_some());
        assert!(DepartmentKey::new("grainger").is_none());
        assert_eq!(
            DepartmentKey::new("ISCHOOL").unwrap().department().unwrap().abbreviation,
            "iSchool"
        );
    }
}
