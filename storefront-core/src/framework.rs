use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}
