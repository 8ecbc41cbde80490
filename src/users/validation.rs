use std::{fmt, ops::RangeInclusive};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use validator::ValidateEmail;

use crate::users::{
    dto::{CandidateUser, UserPatch},
    password::{derive_secret, SecretError},
    repo_types::{Address, NewUser, Role, StoredUser},
};

pub const NAME_LENGTH: RangeInclusive<usize> = 3..=10;
pub const AGE_RANGE: RangeInclusive<i64> = 18..=60;
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// RFC 5322 syntax via `validator`, plus a dotted domain ending in an alphabetic TLD
/// and a local part with no empty dot-separated segment.
pub(crate) fn is_valid_email(email: &str) -> bool {
    if !email.validate_email() {
        return false;
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    let local_ok = local.split('.').all(|part| !part.is_empty());
    let tld_ok = domain
        .rsplit_once('.')
        .is_some_and(|(_, tld)| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));
    local_ok && tld_ok
}

/// One rejected field, keyed by its JSON name (`address.zip` for nested fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

/// Every violation found in a candidate record, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{} field(s) failed validation", .violations.len())]
pub struct ValidationErrors {
    pub violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn single(field: &'static str, message: String) -> Self {
        Self {
            violations: vec![FieldViolation { field, message }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    #[cfg(test)]
    pub fn has(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    #[cfg(test)]
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.violations
            .iter()
            .find(|v| v.field == field)
            .map(|v| v.message.as_str())
    }

    fn push(&mut self, field: &'static str, message: String) {
        self.violations.push(FieldViolation { field, message });
    }

    /// Records a failed rule and hands back the value of a passing one.
    fn check<T>(&mut self, field: &'static str, outcome: Result<T, String>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(message) => {
                self.push(field, message);
                None
            }
        }
    }
}

/// A normalized user whose password is still plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatedUser {
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub address: Option<Address>,
}

impl fmt::Debug for ValidatedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedUser")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("age", &self.age)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("address", &self.address)
            .finish()
    }
}

impl ValidatedUser {
    /// Replaces the plaintext password with its derived secret.
    pub fn into_new_user(self) -> Result<NewUser, SecretError> {
        let password_hash = derive_secret(&self.password)?;
        Ok(NewUser {
            first_name: self.first_name,
            last_name: self.last_name,
            age: self.age,
            email: self.email,
            password_hash,
            role: self.role,
            address: self.address,
        })
    }
}

/// Result of applying a patch: the merged record plus a new password waiting to be hashed.
#[derive(Clone)]
pub struct UserUpdate {
    record: StoredUser,
    new_password: Option<String>,
}

impl fmt::Debug for UserUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserUpdate")
            .field("record", &self.record)
            .field("changes_password", &self.changes_password())
            .finish()
    }
}

impl UserUpdate {
    pub fn record(&self) -> &StoredUser {
        &self.record
    }

    pub fn changes_password(&self) -> bool {
        self.new_password.is_some()
    }

    pub fn into_record(self) -> Result<StoredUser, SecretError> {
        let mut record = self.record;
        if let Some(plain) = self.new_password {
            record.password_hash = derive_secret(&plain)?;
        }
        Ok(record)
    }
}

/// Checks a candidate against every field rule and normalizes it.
///
/// Rules run independently, so the error lists every bad field rather than the first one.
pub fn validate(candidate: &CandidateUser) -> Result<ValidatedUser, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let first_name = errors.check(
        "firstName",
        rules::required(candidate.first_name.as_ref(), "First name")
            .and_then(|v| rules::person_name(v, "First name")),
    );
    let last_name = errors.check(
        "lastName",
        rules::required(candidate.last_name.as_ref(), "Last name")
            .and_then(|v| rules::person_name(v, "Last name")),
    );
    let age = errors.check(
        "age",
        rules::required(candidate.age.as_ref(), "Age").and_then(rules::age),
    );
    let email = errors.check(
        "email",
        rules::required(candidate.email.as_ref(), "Email").and_then(rules::email),
    );
    let password = errors.check(
        "password",
        rules::required(candidate.password.as_ref(), "Password").and_then(rules::password),
    );
    let role = match candidate.role.as_ref() {
        None => Some(Role::default()),
        Some(raw) => errors.check("role", rules::role(raw)),
    };
    let address = candidate
        .address
        .as_ref()
        .and_then(|raw| rules::address(raw, &mut errors));

    let (Some(first_name), Some(last_name), Some(age), Some(email), Some(password), Some(role)) =
        (first_name, last_name, age, email, password, role)
    else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedUser {
        first_name,
        last_name,
        age,
        email,
        password,
        role,
        address,
    })
}

/// Merges a patch into an existing record, re-checking every field the patch carries.
pub fn apply_update(existing: &StoredUser, patch: &UserPatch) -> Result<UserUpdate, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let mut record = existing.clone();
    let mut new_password = None;

    patch_field(&mut errors, "firstName", patch.first_name.as_ref(), &mut record.first_name, |v| {
        rules::person_name(v, "First name")
    });
    patch_field(&mut errors, "lastName", patch.last_name.as_ref(), &mut record.last_name, |v| {
        rules::person_name(v, "Last name")
    });
    patch_field(&mut errors, "age", patch.age.as_ref(), &mut record.age, rules::age);
    patch_field(&mut errors, "email", patch.email.as_ref(), &mut record.email, rules::email);
    patch_field(&mut errors, "password", patch.password.as_ref(), &mut new_password, |v| {
        rules::password(v).map(Some)
    });
    patch_field(&mut errors, "role", patch.role.as_ref(), &mut record.role, rules::role);
    if let Some(address) = patch
        .address
        .as_ref()
        .and_then(|raw| rules::address(raw, &mut errors))
    {
        record.address = Some(address);
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(UserUpdate {
        record,
        new_password,
    })
}

fn patch_field<T>(
    errors: &mut ValidationErrors,
    field: &'static str,
    raw: Option<&Value>,
    slot: &mut T,
    rule: impl FnOnce(&Value) -> Result<T, String>,
) {
    if let Some(value) = raw.and_then(|v| errors.check(field, rule(v))) {
        *slot = value;
    }
}

mod rules {
    use serde_json::{Map, Value};

    use super::{is_valid_email, ValidationErrors, AGE_RANGE, MIN_PASSWORD_LENGTH, NAME_LENGTH};
    use crate::users::repo_types::{Address, Role};

    pub fn required<'a>(raw: Option<&'a Value>, label: &str) -> Result<&'a Value, String> {
        raw.ok_or_else(|| format!("{label} is required."))
    }

    fn string<'a>(value: &'a Value, label: &str) -> Result<&'a str, String> {
        value
            .as_str()
            .ok_or_else(|| format!("{label} must be a string."))
    }

    // Integral numbers, and strings holding one, are accepted. Values outside i64 are not integers.
    fn integer(value: &Value) -> Option<i64> {
        const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
        match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(f))
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn person_name(value: &Value, label: &str) -> Result<String, String> {
        let name = string(value, label)?.trim();
        let len = name.chars().count();
        if len < *NAME_LENGTH.start() {
            return Err(format!(
                "{label} must be at least {} characters. Got '{name}'.",
                NAME_LENGTH.start()
            ));
        }
        if len > *NAME_LENGTH.end() {
            return Err(format!(
                "{label} must not exceed {} characters. Got '{name}'.",
                NAME_LENGTH.end()
            ));
        }
        Ok(name.to_string())
    }

    pub fn age(value: &Value) -> Result<i32, String> {
        let years = integer(value)
            .and_then(|years| i32::try_from(years).ok())
            .ok_or_else(|| format!("Age must be an integer. Got {value}."))?;
        if i64::from(years) < *AGE_RANGE.start() {
            return Err(format!("Age must be at least {}. Got {years}.", AGE_RANGE.start()));
        }
        if i64::from(years) > *AGE_RANGE.end() {
            return Err(format!("Age must not exceed {}. Got {years}.", AGE_RANGE.end()));
        }
        Ok(years)
    }

    pub fn email(value: &Value) -> Result<String, String> {
        let email = string(value, "Email")?.trim();
        if !is_valid_email(email) {
            return Err(format!("Provided email is not valid. Got '{email}'."));
        }
        Ok(email.to_lowercase())
    }

    pub fn password(value: &Value) -> Result<String, String> {
        let password = string(value, "Password")?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters."
            ));
        }
        Ok(password.to_string())
    }

    pub fn role(value: &Value) -> Result<Role, String> {
        let role = string(value, "Role")?;
        role.parse()
            .map_err(|_| format!("'{role}' is not a supported role."))
    }

    /// Nested fields report under `address.<name>`; returns `None` only when the value
    /// is not an object at all.
    pub fn address(value: &Value, errors: &mut ValidationErrors) -> Option<Address> {
        let Some(fields) = value.as_object() else {
            errors.push("address", "Address must be an object.".into());
            return None;
        };
        let city = errors.check("address.city", optional_text(fields, "city", "City"));
        let street = errors.check("address.street", optional_text(fields, "street", "Street"));
        let zip = errors.check("address.zip", optional_integer(fields, "zip", "Zip"));
        Some(Address {
            city: city.flatten(),
            street: street.flatten(),
            zip: zip.flatten(),
        })
    }

    fn optional_text(fields: &Map<String, Value>, key: &str, label: &str) -> Result<Option<String>, String> {
        match fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => string(v, label).map(|s| Some(s.to_string())),
        }
    }

    fn optional_integer(fields: &Map<String, Value>, key: &str, label: &str) -> Result<Option<i64>, String> {
        match fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => integer(v)
                .map(Some)
                .ok_or_else(|| format!("{label} must be an integer. Got {v}.")),
        }
    }
}
