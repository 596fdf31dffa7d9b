use rust_embed::RustEmbed;

/// Embedded SQL migrations shipped inside the binary.
#[derive(RustEmbed)]
#[folder = "migrations/"]
pub struct MigrationAssets;

impl MigrationAssets {
    /// Returns all embedded migrations as (filename, content) pairs,
    /// sorted by filename so versions apply in order.
    pub fn get_migrations() -> Vec<(String, String)> {
        let mut migrations: Vec<(String, String)> = Self::iter()
            .filter_map(|name| {
                let file = Self::get(&name)?;
                let content = String::from_utf8_lossy(file.data.as_ref()).into_owned();
                Some((name.into_owned(), content))
            })
            .collect();
        migrations.sort_by(|a, b| a.0.cmp(&b.0));
        migrations
    }
}
