use crate::Database;

/// Insert a user named `username` with `<username>@example.com` and return its id.
pub(crate) fn seed_user(db: &Database, username: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    let avatar = format!("https://i.pravatar.cc/150?u={}", username);
    db.create_user(
        &id,
        username,
        &format!("{}@example.com", username.to_lowercase()),
        "hash",
        Some(username),
        Some(&avatar),
    )
    .unwrap();
    id
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
