use uuid::Uuid;

pub fn generate_id(prefix: &str) -> String {
    let uuid = Uuid::now_v7();
    let hex = format!("{:032x}", uuid.as_u128());
    // The trailing 16 hex chars are the random portion of a UUIDv7, so IDs
    // stay distinct even when generated within the same millisecond.
    format!("{prefix}-{}", &hex[16..])
}

pub fn project_id() -> String {
    generate_id("pr")
}

pub fn issue_id() -> String {
    generate_id("is")
}
