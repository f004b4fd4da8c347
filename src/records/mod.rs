//! Personnel records
//!
//! Only task bodies and event handlers touch this module; the lifecycle
//! core treats it as opaque.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod roster;
pub mod store;

pub use roster::Roster;
pub use store::CsvStore;

const MAX_TEXT_LEN: usize = 64;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$").expect("email pattern is valid"));

static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9+\-() ]+$").expect("phone pattern is valid"));

/// A single employee record, one CSV row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: String,
    pub title: String,
    pub phone: Option<String>,
    pub hired_on: NaiveDate,
}

impl Person {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Check every field in record order, returning the first failure
    pub fn validate(&self) -> Result<()> {
        validate_details(self)?;
        check_hire_date(self.hired_on)
    }
}

/// Every field except the hire date, in record order
fn validate_details(person: &Person) -> Result<()> {
    require_text("First name", &person.first_name)?;
    require_text("Last name", &person.last_name)?;
    if !EMAIL.is_match(&person.email) {
        bail!("Email '{}' is not a valid address", person.email);
    }
    require_text("Department", &person.department)?;
    if person.title.chars().count() > MAX_TEXT_LEN {
        bail!("Title must be at most {} characters", MAX_TEXT_LEN);
    }

    if let Some(phone) = &person.phone {
        let len = phone.chars().count();
        if !(7..=20).contains(&len) || !PHONE.is_match(phone) {
            bail!("Phone '{}' must be 7-20 digits, spaces or + - ( )", phone);
        }
    }
    Ok(())
}

fn check_hire_date(hired_on: NaiveDate) -> Result<()> {
    if hired_on > Local::now().date_naive() {
        bail!("Hire date {} is in the future", hired_on);
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{} is required", field);
    }
    if value.chars().count() > MAX_TEXT_LEN {
        bail!("{} must be at most {} characters", field, MAX_TEXT_LEN);
    }
    Ok(())
}

/// Raw form input, as typed by the user
///
/// Travels as the `save_record` event payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub phone: String,
    pub hired_on: String,
}

impl PersonDraft {
    /// Parse and validate into a record; a missing id means a new record
    pub fn into_person(self) -> Result<Person> {
        let phone = self.phone.trim();
        let mut person = Person {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            department: self.department.trim().to_string(),
            title: self.title.trim().to_string(),
            phone: (!phone.is_empty()).then(|| phone.to_string()),
            hired_on: NaiveDate::MIN,
        };
        validate_details(&person)?;

        person.hired_on = NaiveDate::parse_from_str(self.hired_on.trim(), "%Y-%m-%d")
            .with_context(|| format!("Hire date '{}' must be YYYY-MM-DD", self.hired_on.trim()))?;
        check_hire_date(person.hired_on)?;
        Ok(person)
    }

    pub fn from_person(person: &Person) -> Self {
        Self {
            id: Some(person.id),
            first_name: person.first_name.clone(),
            last_name: person.last_name.clone(),
            email: person.email.clone(),
            department: person.department.clone(),
            title: person.title.clone(),
            phone: person.phone.clone().unwrap_or_default(),
            hired_on: person.hired_on.format("%Y-%m-%d").to_string(),
        }
    }

    /// Read a draft out of an event payload
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let draft = payload
            .get("person")
            .ok_or_else(|| anyhow!("Payload has no 'person' field"))?;
        serde_json::from_value(draft.clone()).context("Malformed person payload")
    }
}
