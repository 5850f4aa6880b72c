use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str, max_connections: u32) -> Result<Db> {
    Ok(PgPoolOptions::new().max_connections(max_connections).connect(url).await?)
}
