use std::sync::Arc;

use scribe_db::Database;
use scribe_ingest::{HttpFetcher, Listener};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub listener: Listener<HttpFetcher>,
}
