//! Basic pool/connectivity check (requires a valid `DATABASE_URL` in the
//! environment; skips otherwise).

mod test_support;

#[tokio::test]
async fn create_pool_from_env() {
    let Some(pool) = test_support::test_pool().await else {
        eprintln!("DATABASE_URL not set: skipping");
        return;
    };
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.expect("select 1");
    assert_eq!(row.0, 1);
}
