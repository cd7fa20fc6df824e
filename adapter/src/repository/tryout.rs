use async_trait::async_trait;
use chrono::Utc;
use derive_new::new;
use kernel::model::{
    id::{TryoutId, UserId},
    list::PaginatedList,
    tryout::{Tryout, TryoutListing},
};
use kernel::repository::tryout::TryoutRepository;
use shared::error::{AppError, AppResult};
use sqlx::{postgres::PgExecutor, PgConnection};

use crate::database::{model::tryout::TryoutRow, ConnectionPool};
use crate::repository::reservation::reserved_tryout_ids;

const TRYOUT_COLUMNS: &str = "id, name, start_time, end_time, \
     registration_start_time, registration_end_time, \
     max_capacity, confirmed_reserved_count";

// ---- 行レベルの読み書き（試験ストア） ----

pub(crate) async fn fetch_tryout(
    executor: impl PgExecutor<'_>,
    tryout_id: i64,
) -> AppResult<Option<TryoutRow>> {
    sqlx::query_as::<_, TryoutRow>(&format!(
        "SELECT {TRYOUT_COLUMNS} FROM tryouts WHERE id = $1"
    ))
    .bind(tryout_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::SpecificOperationError)
}

// confirmed_reserved_count を読む前に必ずこちらで排他ロックを取る
pub(crate) async fn fetch_tryout_for_update(
    conn: &mut PgConnection,
    tryout_id: i64,
) -> AppResult<Option<TryoutRow>> {
    sqlx::query_as::<_, TryoutRow>(&format!(
        "SELECT {TRYOUT_COLUMNS} FROM tryouts WHERE id = $1 FOR UPDATE"
    ))
    .bind(tryout_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(AppError::SpecificOperationError)
}

pub(crate) async fn update_confirmed_count(
    conn: &mut PgConnection,
    tryout_id: i64,
    confirmed_reserved_count: i32,
) -> AppResult<()> {
    let res = sqlx::query(
        "UPDATE tryouts SET confirmed_reserved_count = $2 WHERE id = $1",
    )
    .bind(tryout_id)
    .bind(confirmed_reserved_count)
    .execute(&mut *conn)
    .await
    .map_err(AppError::SpecificOperationError)?;

    if res.rows_affected() < 1 {
        return Err(AppError::NoRowsAffectedError(
            "No tryout record has been updated".into(),
        ));
    }

    Ok(())
}

// ---- 読み取り側の合成（一覧・詳細） ----

#[derive(new)]
pub struct TryoutRepositoryImpl {
    db: ConnectionPool,
}

#[async_trait]
impl TryoutRepository for TryoutRepositoryImpl {
    async fn find_by_id(&self, tryout_id: TryoutId, user_id: UserId) -> AppResult<TryoutListing> {
        let row = fetch_tryout(self.db.inner_ref(), tryout_id.raw()).await?;
        let Some(row) = row else {
            return Err(AppError::EntityNotFound(format!(
                "試験（{tryout_id}）が見つかりませんでした。"
            )));
        };

        let reserved = reserved_tryout_ids(
            self.db.inner_ref(),
            user_id.raw(),
            &[tryout_id.raw()],
        )
        .await?;

        Ok(TryoutListing {
            tryout: Tryout::from(row),
            is_applied: reserved.contains(&tryout_id),
        })
    }

    async fn paginate_upcoming(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> AppResult<PaginatedList<TryoutListing>> {
        let now = Utc::now();

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tryouts WHERE start_time > $1",
        )
        .bind(now)
        .fetch_one(self.db.inner_ref())
        .await
        .map_err(AppError::SpecificOperationError)?;

        let rows = sqlx::query_as::<_, TryoutRow>(&format!(
            "SELECT {TRYOUT_COLUMNS} FROM tryouts \
             WHERE start_time > $1 \
             ORDER BY id, start_time \
             LIMIT $2 OFFSET $3"
        ))
        .bind(now)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.inner_ref())
        .await
        .map_err(AppError::SpecificOperationError)?;

        // 2 パス目：ページ内の試験 id に対するユーザーの有効な予約をまとめて引き、
        // メモリ上で is_applied を付与する
        let page_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let reserved = reserved_tryout_ids(self.db.inner_ref(), user_id.raw(), &page_ids).await?;

        let items = rows
            .into_iter()
            .map(|row| {
                let tryout = Tryout::from(row);
                let is_applied = reserved.contains(&tryout.id);
                TryoutListing { tryout, is_applied }
            })
            .collect();

        Ok(PaginatedList { total, items })
    }
}
