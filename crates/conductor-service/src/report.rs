//! User report
//!
//! Renders every user with their organization and project roles as a
//! text table.

use chrono::{DateTime, Utc};
use conductor_structure::{Structure, User};
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Wrap width of every cell, in characters.
pub const COLUMN_MAX_WIDTH: usize = 25;

#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "Full name, Civil number")]
    name: String,
    #[tabled(rename = "Email, Phone nr.")]
    contact: String,
    #[tabled(rename = "Job title")]
    job_title: String,
    #[tabled(rename = "Staff, Support")]
    flags: String,
    #[tabled(rename = "Organizations")]
    organizations: String,
    #[tabled(rename = "Projects")]
    projects: String,
}

fn wrap(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= COLUMN_MAX_WIDTH {
        return value.to_string();
    }
    chars
        .chunks(COLUMN_MAX_WIDTH)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Join cell values, one per line when they do not fit on one.
fn join(values: &[String]) -> String {
    let wrapped: Vec<String> = values.iter().map(|v| wrap(v)).collect();
    let joined = wrapped.join(", ");
    if joined.chars().count() > COLUMN_MAX_WIDTH {
        wrapped.join("\n")
    } else {
        joined
    }
}

fn yes_no(value: bool) -> String {
    let text = if value { "Yes" } else { "No" };
    text.to_string()
}

fn non_empty<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    values
        .into_iter()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn row_for(structure: &Structure, user: &User, now: DateTime<Utc>) -> UserRow {
    let organizations: Vec<String> = structure
        .customer_roles()
        .valid_for_user(user.id, now)
        .filter_map(|grant| {
            let customer = structure.customer(grant.scope_id).ok()?;
            Some(format!("{} | {}", customer.name, grant.role.display_name()))
        })
        .collect();
    let projects: Vec<String> = structure
        .project_roles()
        .valid_for_user(user.id, now)
        .filter_map(|grant| {
            let project = structure.project(grant.scope_id).ok()?;
            Some(format!("{} | {}", project.name, grant.role.display_name()))
        })
        .collect();

    UserRow {
        name: join(&non_empty([
            user.full_name.as_str(),
            user.civil_number.as_deref().unwrap_or_default(),
        ])),
        contact: join(&non_empty([user.email.as_str(), user.phone_number.as_str()])),
        job_title: join(&non_empty([user.job_title.as_str()])),
        flags: join(&[yes_no(user.is_staff), yes_no(user.is_support)]),
        organizations: join(&organizations),
        projects: join(&projects),
    }
}

/// Render every user with their valid customer and project roles.
pub fn dump_users(structure: &Structure, now: DateTime<Utc>) -> String {
    let rows: Vec<UserRow> = structure
        .users()
        .map(|user| row_for(structure, user, now))
        .collect();
    Table::new(rows).with(Style::ascii()).to_string()
}
