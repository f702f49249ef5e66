/// `server_version_num` of PostgreSQL 12.0.
pub const MIN_SERVER_VERSION: u32 = 120000;

/// Parses `server_version_num` and rejects servers older than [`MIN_SERVER_VERSION`].
pub fn check_postgres_version(server_version_num: &str) -> Result<u32, crate::MigrateError> {
    let version: u32 = server_version_num.trim().parse()?;
    if version < MIN_SERVER_VERSION {
        return Err(crate::MigrateError::IncompatibleVersion(version));
    }
    Ok(version)
}
