use std::path::PathBuf;

use rocket::State;
use rocket::fs::NamedFile;

use crate::config::AppConfig;

/// Client-side routes of the single page app all resolve to `index.html`.
/// Ranked below the static file server so real assets win. Unknown `/api`
/// paths are left to the JSON 404 catcher.
#[get("/<path..>", rank = 20)]
pub async fn spa_fallback(path: PathBuf, config: &State<AppConfig>) -> Option<NamedFile> {
    if path.starts_with("api") {
        return None;
    }

    NamedFile::open(config.frontend_dir.join("index.html"))
        .await
        .ok()
}
